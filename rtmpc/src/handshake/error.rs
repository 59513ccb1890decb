use thiserror::Error;

use rtmpc_core::transport::TransportError;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Unsupported rtmp version: {0}")]
    InvalidVersion(u8),

    #[error("Peer echoed a different challenge")]
    EchoMismatch,

    #[error("Transport IO: {0}")]
    TransportIO(#[from] TransportError),
}
