use rml_amf0::{Amf0DeserializationError, Amf0SerializationError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageDecodeError {
    #[error("Invalid {0} field of amf command")]
    InvalidFormat(String),

    #[error("Decode amf0 value failed: {0}")]
    Amf0Decode(#[from] Amf0DeserializationError),

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum MessageEncodeError {
    #[error("Encode amf0 value failed: {0}")]
    Amf0Encode(#[from] Amf0SerializationError),

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
}
