// CLI entry point for the chat relay server.
//
// Starts a relay and blocks until the process is killed. The room transcript
// (banner, joins, chat lines, leaves) goes to stdout; diagnostics go to
// stderr via `tracing` (`RUST_LOG` to adjust).
//
// Usage:
//   chat-server [OPTIONS]
//     -p, --port <PORT>               Listening port (default: 7878)
//         --bind <ADDR>               Interface to bind (default: 127.0.0.1)
//         --max-participants <N>      Room capacity (default: 10)
//         --config <FILE>             JSON config file; flags override it

use std::path::PathBuf;
use std::process::ExitCode;

use chatroom_relay::RelayConfig;
use chatroom_relay::error::ConfigError;
use chatroom_relay::{logging, start_relay};
use clap::Parser;
use tracing::error;

/// Simple multi-user chat room relay.
#[derive(Parser, Debug)]
#[command(name = "chat-server", version, about = "Simple multi-user chat room relay")]
struct Cli {
    /// Listening port for client connections.
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Interface to bind.
    #[arg(long)]
    bind: Option<String>,

    /// Maximum number of simultaneous participants.
    #[arg(long)]
    max_participants: Option<usize>,

    /// JSON config file (`bind_address`, `port`, `max_participants`).
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Start from the config file (or defaults) and apply flag overrides.
    fn into_config(self) -> Result<RelayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_json_file(path)?,
            None => RelayConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(max) = self.max_participants {
            config.max_participants = max;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    logging::init("info");
    let cli = Cli::parse();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let (handle, _addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to start relay: {e}");
            return ExitCode::FAILURE;
        }
    };

    handle.wait();
    ExitCode::SUCCESS
}
