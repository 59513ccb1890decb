use thiserror::Error;

use crate::chunk::error::ChunkError;
use crate::handshake::error::HandshakeError;
use crate::message::error::MessageEncodeError;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Chunk IO failed: {0}")]
    ChunkIo(#[from] ChunkError),

    #[error("Encode message failed: {0}")]
    MessageEncode(#[from] MessageEncodeError),

    #[error("Connection is closed")]
    Closed,
}
