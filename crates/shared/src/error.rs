use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed realtime frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
    #[error("failed to encode realtime frame: {0}")]
    Encode(serde_json::Error),
}
