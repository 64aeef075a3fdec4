use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("transport closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] stopwatch_core::ProtocolError),
    #[error("sync client has shut down")]
    Shutdown,
    #[error("invalid client configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("retry budget exhausted; command not sent")]
    PermanentlyFailed,
}
