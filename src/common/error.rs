use thiserror::Error;

/// Errors surfaced by the chat library.
///
/// Steady-state loops never propagate these; they log and keep going.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A received payload was not a valid message.
    #[error("malformed datagram: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An encoded message does not fit in one datagram.
    #[error("datagram of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    /// The client has no live leader to send to.
    #[error("not connected to a leader")]
    NotConnected,

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;
