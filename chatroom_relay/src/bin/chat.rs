// Terminal client for the chat relay.
//
// Connects, sends the username, prints the welcome, then runs two threads:
// - sender: reads stdin lines and forwards each (newline included); typing
//   `exit` or closing stdin leaves the room;
// - receiver: prints everything the server relays.
// The main thread waits on a channel until either side finishes, then
// closes the socket and exits.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chatroom_protocol::message::{
    CAPACITY_REJECTION, CONNECT_IMPOSSIBLE, CONNECTION_LOST, LAST_SEND_FAILED, MESSAGE_LOST,
    is_exit_request,
};
use chatroom_relay::client::{ChatClient, Incoming};
use chatroom_relay::error::ClientError;
use chatroom_relay::logging;
use clap::Parser;

/// Receiver wake-up interval while the room is quiet.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// A client that connects to a chat room.
#[derive(Parser, Debug)]
#[command(name = "chat", about = "A client that connects to a chat room")]
struct Cli {
    /// Username for the chat room.
    #[arg(short, long)]
    username: String,

    /// Server port.
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,

    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
}

fn main() -> ExitCode {
    logging::init("warn");
    let cli = Cli::parse();

    let (client, welcome) = match ChatClient::connect((cli.host.as_str(), cli.port), &cli.username)
    {
        Ok(result) => result,
        Err(ClientError::Connect(_)) => {
            eprintln!("{CONNECT_IMPOSSIBLE}");
            return ExitCode::FAILURE;
        }
        Err(ClientError::Rejected) => {
            eprint!("{CAPACITY_REJECTION}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::debug!(error = %e, "handshake failed");
            eprint!("{CONNECTION_LOST}");
            return ExitCode::FAILURE;
        }
    };
    print_flush(&welcome);

    let (done_tx, done_rx) = mpsc::channel();

    let closer = client.sender();
    let sender = client.sender();
    let sender_done = done_tx.clone();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = format!("{line}\n");
            match sender.send(&line) {
                Ok(()) => {}
                Err(ClientError::ConnectionLost) => {
                    print_flush(CONNECTION_LOST);
                    break;
                }
                Err(_) => {
                    print_flush(LAST_SEND_FAILED);
                    continue;
                }
            }
            if is_exit_request(line.as_bytes()) {
                break;
            }
        }
        let _ = sender_done.send("sender");
    });

    thread::spawn(move || {
        loop {
            match client.recv_timeout(IDLE_WAIT) {
                Some(Incoming::Chat(text)) => print_flush(&text),
                Some(Incoming::Dropped) => print_flush(MESSAGE_LOST),
                Some(Incoming::Lost) => {
                    print_flush(CONNECTION_LOST);
                    break;
                }
                None => {}
            }
        }
        let _ = done_tx.send("receiver");
    });

    // Whichever side finishes first ends the session; the stdin thread may
    // still be blocked on a read, so it is not joined.
    if let Ok(side) = done_rx.recv() {
        tracing::debug!(side, "session finished");
    }
    closer.close();
    ExitCode::SUCCESS
}

fn print_flush(text: &str) {
    let mut out = io::stdout().lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}
