pub mod chunk;
pub mod command;
pub mod connection;
pub mod flow;
pub mod handshake;
pub mod message;

pub use command::{CommandCallback, CommandReply, CommandRequest, InboundCommand};
pub use connection::{ChunkHandler, Connection, ConnectionState, Role};
pub use message::{RtmpMessage, RtmpPayload};
