// Wire text and message helpers shared by the relay and the client.
//
// The chatroom wire format is deliberately unframed: a client writes its
// username once, then writes free-text chat lines; the relay answers with a
// fixed welcome banner and forwards `"<name>: <content>"` to everyone else.
// Every constant a peer can observe on the socket (or on the server's
// stdout) lives here so both sides agree byte-for-byte.
//
// Content is handled as raw bytes end to end. Usernames are the one place we
// convert to `String`, since they appear in log lines and announcements.

/// Room banner printed at server start and sent as the first line of the
/// welcome message.
pub const BANNER: &str = "============== Chat Room ==============\n";

/// Greeting sent to a newly admitted participant after the banner.
pub const WELCOME: &str = "Welcome to the chat room!\n";

/// Sent to a connection that arrives while the room is full.
pub const CAPACITY_REJECTION: &str = "Could not connect. User limit has been met.\n";

/// Sent back to a participant when reading its message failed.
pub const SEND_FAILED: &str = "Your message failed to send.\n";

/// Leading bytes that turn a chat message into a disconnect request.
pub const EXIT_SENTINEL: &[u8] = b"exit";

// Client-side notices.

/// Printed by the client when the server connection drops.
pub const CONNECTION_LOST: &str = ">> Connection to the server has been lost.\n";

/// Printed by the client when the initial connect fails.
pub const CONNECT_IMPOSSIBLE: &str = ">> Could not establish a connection to the server";

/// Printed by the client when writing a typed line fails.
pub const LAST_SEND_FAILED: &str = ">> Failed to send your last message.\n";

/// Printed by the client when a receive fails transiently.
pub const MESSAGE_LOST: &str = ">> A message has been lost.\n";

/// The full welcome payload: banner followed by greeting.
pub fn welcome_message() -> String {
    format!("{BANNER}{WELCOME}")
}

/// Format a relayed chat line as `"<name>: <content>"`. The content is copied
/// verbatim, including any trailing newline the sender included.
pub fn format_chat(name: &str, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 2 + content.len());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(content);
    out
}

/// Server-side announcement when a participant joins.
pub fn join_announcement(name: &str) -> String {
    format!(">> {name} has connected!\n")
}

/// Server-side announcement when a participant leaves.
pub fn leave_announcement(name: &str) -> String {
    format!(">> {name} has disconnected.\n")
}

/// True if the message asks to leave the room. Only the leading bytes are
/// checked, so `"exit\n"` and `"exit now"` both qualify.
pub fn is_exit_request(content: &[u8]) -> bool {
    content.starts_with(EXIT_SENTINEL)
}

/// Turn the raw handshake bytes into a display name. Trailing CR/LF and NUL
/// padding are stripped and invalid UTF-8 is replaced. Returns `None` if
/// nothing printable is left.
pub fn parse_username(raw: &[u8]) -> Option<String> {
    let name = String::from_utf8_lossy(raw);
    let name = name.trim_end_matches(['\r', '\n', '\0']);
    if name.trim().is_empty() {
        return None;
    }
    Some(name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_line_keeps_content_verbatim() {
        assert_eq!(format_chat("alice", b"hi bob"), b"alice: hi bob".to_vec());
        assert_eq!(format_chat("bob", b"yo\n"), b"bob: yo\n".to_vec());
    }

    #[test]
    fn exit_detected_on_leading_bytes_only() {
        assert!(is_exit_request(b"exit"));
        assert!(is_exit_request(b"exit\n"));
        assert!(is_exit_request(b"exiting"));
        assert!(!is_exit_request(b" exit"));
        assert!(!is_exit_request(b"EXIT"));
        assert!(!is_exit_request(b"ex"));
    }

    #[test]
    fn username_strips_line_terminators() {
        assert_eq!(parse_username(b"alice\r\n").as_deref(), Some("alice"));
        assert_eq!(parse_username(b"bob").as_deref(), Some("bob"));
        assert_eq!(parse_username(b"carol\0\0").as_deref(), Some("carol"));
    }

    #[test]
    fn blank_username_rejected() {
        assert_eq!(parse_username(b""), None);
        assert_eq!(parse_username(b"\n"), None);
        assert_eq!(parse_username(b"   \r\n"), None);
    }

    #[test]
    fn welcome_is_banner_then_greeting() {
        let welcome = welcome_message();
        assert!(welcome.starts_with(BANNER));
        assert!(welcome.ends_with(WELCOME));
    }

    #[test]
    fn announcements() {
        assert_eq!(join_announcement("alice"), ">> alice has connected!\n");
        assert_eq!(leave_announcement("alice"), ">> alice has disconnected.\n");
    }
}
