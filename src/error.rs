use thiserror::Error;

#[derive(Error, Debug)]
pub enum LivememoError {
    #[error("Invalid timecode: {0}")]
    InvalidTimecode(String),

    #[error("No memo at position {position} (list has {len} entries)")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("CDP connection failed: {0}")]
    CdpConnectionFailed(String),

    #[error("No page found. Start Chrome with --remote-debugging-port and open the stream.")]
    PageNotFound,

    #[error("JavaScript execution failed: {0}")]
    JavaScriptError(String),

    #[error("Bridge error: {0}")]
    BridgeError(String),

    #[error("Clipboard error: {0}")]
    ClipboardError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LivememoError>;
