use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("socket is closed")]
    SocketClosed,
    #[error("frame encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SocketError>;
