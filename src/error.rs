#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generic environment failure, e.g. a service that never came back after resync.
    #[error("environment error: {0}")]
    Env(String),

    #[error("mission init failed: {0}")]
    MissionInit(String),

    #[error("command handler error: {0}")]
    CommandHandler(String),

    #[error("invalid mission xml: {0}")]
    MissionXml(String),

    #[error("invalid action index {index} (action space has {size} actions)")]
    InvalidAction { index: usize, size: usize },

    #[error("unexpected reply to {request}: expected {expected} bytes, got {actual}")]
    UnexpectedReply {
        request: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("connection closed by peer during {operation}")]
    Disconnected { operation: &'static str },

    #[error("not connected")]
    NotConnected,

    #[error("agent task failed: {0}")]
    TaskFailed(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// True for failures of the underlying socket, as opposed to protocol or mission errors.
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Disconnected { .. } | Error::NotConnected)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
