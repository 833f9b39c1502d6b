//! Wire protocol seam for the streaming client.
//!
//! The client owns the connection, state machine and subscriptions. A
//! protocol only knows how to phrase frames for one venue and how to decode
//! what comes back.

use crate::events::StreamMessage;

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Venue acknowledged the authentication frame.
    AuthAccepted,
    /// Venue rejected the authentication frame.
    AuthRejected(String),
    /// Zero or more updates to dispatch by key.
    Messages(Vec<StreamMessage>),
    /// Well-formed but not interesting (acks, unknown event types).
    Ignored,
}

/// Per-venue framing for a streaming connection.
pub trait StreamProtocol: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Frame sent right after the socket opens. `None` means the connection
    /// counts as authenticated as soon as it is open.
    fn auth_frame(&self) -> Option<String>;

    fn subscribe_frame(&self, keys: &[String]) -> String;

    fn unsubscribe_frame(&self, keys: &[String]) -> String;

    /// Keepalive frame sent on the heartbeat interval.
    fn heartbeat_frame(&self) -> String;

    /// Control frames are filtered before `decode` is called.
    fn is_control(&self, text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.is_empty()
            || trimmed.eq_ignore_ascii_case("ping")
            || trimmed.eq_ignore_ascii_case("pong")
    }

    /// Decodes one text frame. Errors are logged and the frame dropped.
    fn decode(&self, text: &str) -> Result<Inbound, String>;
}
