use rml_amf0::Amf0Value;
use std::collections::HashMap;
use tracing::{trace, warn};

/// What a pending command callback eventually receives.
#[derive(Debug)]
pub enum CommandReply {
    /// The peer's answer, carrying the responder's values.
    Response {
        command_name: String,
        transaction_id: u32,
        values: Vec<Amf0Value>,
    },
    /// The connection closed before the peer answered.
    Cancelled,
}

pub type CommandCallback = Box<dyn FnOnce(CommandReply) + Send>;

pub type CommandHandler = Box<dyn FnMut(InboundCommand) + Send>;

/// An outgoing command, before AMF0 encoding.
///
/// With `transaction_id: None` and a callback attached, the connection
/// allocates the next transaction id; commands sent with no callback go
/// out with transaction id 0 and expect no answer.
pub struct CommandRequest {
    pub chunk_stream_id: u32,
    pub stream_id: u32,
    pub name: String,
    pub transaction_id: Option<u32>,
    pub command_object: Amf0Value,
    pub optional_args: Vec<Amf0Value>,
}

impl CommandRequest {
    pub fn new(chunk_stream_id: u32, stream_id: u32, name: &str, command_object: Amf0Value) -> Self {
        Self {
            chunk_stream_id,
            stream_id,
            name: name.to_string(),
            transaction_id: None,
            command_object,
            optional_args: Vec::new(),
        }
    }
}

/// A decoded command arriving from the peer. `values` holds the command
/// object followed by any additional arguments, in wire order.
#[derive(Debug)]
pub struct InboundCommand {
    pub command_name: String,
    pub transaction_id: f64,
    pub values: Vec<Amf0Value>,
    pub stream_id: u32,
    pub csid: u32,
}

/// Correlates `_result`/`_error` commands with the callbacks registered
/// when their requests went out.
#[derive(Default)]
pub struct CommandDispatcher {
    pending: HashMap<u32, CommandCallback>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, transaction_id: u32, callback: CommandCallback) {
        if transaction_id == 0 {
            warn!("Transaction id 0 never gets a response, dropping callback");
            return;
        }
        if self.pending.insert(transaction_id, callback).is_some() {
            warn!("Replaced pending callback for transaction {}", transaction_id);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Routes a command to its pending callback, matched by transaction id
    /// alone. Returns the command back when nothing matches, so the caller
    /// can hand it to the connection-level handler instead.
    pub fn dispatch(&mut self, cmd: InboundCommand) -> Option<InboundCommand> {
        let tid = cmd.transaction_id as u32;
        if let Some(callback) = self.pending.remove(&tid) {
            trace!("Dispatch {} for transaction {}", cmd.command_name, tid);
            callback(CommandReply::Response {
                command_name: cmd.command_name,
                transaction_id: tid,
                values: cmd.values,
            });
            return None;
        }
        Some(cmd)
    }

    /// Fires every pending callback with `Cancelled`. Used at teardown so
    /// no caller is left waiting forever.
    pub fn cancel_all(&mut self) {
        for (tid, callback) in self.pending.drain() {
            trace!("Cancel pending transaction {}", tid);
            callback(CommandReply::Cancelled);
        }
    }
}
