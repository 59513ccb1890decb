use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use rtmpc_core::transport::{self, TransportError};

use crate::chunk::error::ChunkError;
use crate::chunk::{ChunkDecoder, ChunkEncoder};
use crate::command::{
    CommandCallback, CommandDispatcher, CommandHandler, CommandReply, CommandRequest,
    InboundCommand,
};
use crate::flow::FlowController;
use crate::handshake;
use crate::message::{self, types::csid, RtmpMessage, RtmpPayload};

use self::error::ConnectionError;

pub mod error;

type Result<T> = std::result::Result<T, ConnectionError>;

pub type ChunkHandler = Box<dyn FnMut(RtmpPayload) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Established,
    Closing,
    Closed,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Handshaking,
            2 => ConnectionState::Established,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Requests travel over one queue, so everything the handle asks for is
/// applied in submission order.
enum Request {
    QueueChunk(RtmpPayload),
    SendCommand {
        payload: RtmpPayload,
        transaction_id: u32,
        callback: Option<CommandCallback>,
    },
    SetCommandHandler(CommandHandler),
    SetChunkHandler { csid: u32, handler: ChunkHandler },
    SetOutChunkSize(usize),
    Close,
}

enum InboundEvent {
    Message {
        payload: RtmpPayload,
        total_input_bytes: u64,
    },
    Error(ChunkError),
}

/// Handle to one RTMP connection.
///
/// All socket work happens on a dedicated task; the handle only queues
/// requests, so its methods never block on the peer. Dropping the handle
/// closes the connection.
pub struct Connection {
    req_tx: mpsc::UnboundedSender<Request>,
    state: Arc<AtomicU8>,
    next_transaction: AtomicU32,
    closed: AtomicBool,
}

impl Connection {
    /// Runs the handshake in the given role and, on success, spawns the
    /// connection task. The returned handle is already `Established`.
    pub async fn startup<IO>(io: IO, role: Role) -> Result<Self>
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ConnectionState::Connecting as u8));
        let (mut rd, mut wr) = transport::split(io);

        state.store(ConnectionState::Handshaking as u8, Ordering::SeqCst);
        let done = match role {
            Role::Client => handshake::Client::new().handshake(&mut rd, &mut wr).await,
            Role::Server => handshake::Server::new().handshake(&mut rd, &mut wr).await,
        };
        if let Err(err) = done {
            state.store(ConnectionState::Closed as u8, Ordering::SeqCst);
            return Err(err.into());
        }
        state.store(ConnectionState::Established as u8, Ordering::SeqCst);
        info!("Handshake with peer done, role={:?}", role);

        let decoder = ChunkDecoder::new(rd);
        let encoder = ChunkEncoder::new(wr);
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(decoder, in_tx));
        let task = ConnectionTask {
            encoder,
            dispatcher: CommandDispatcher::new(),
            flow: FlowController::new(),
            command_handler: None,
            chunk_handlers: HashMap::new(),
            state: Arc::clone(&state),
        };
        tokio::spawn(conn_loop(task, req_rx, in_rx, reader));

        Ok(Self {
            req_tx,
            state,
            next_transaction: AtomicU32::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Queues a message for transmission. Fragmentation happens on the
    /// connection task with whatever out-chunk-size is current then.
    pub fn queue_chunk(&self, payload: RtmpPayload) -> Result<()> {
        self.ensure_open()?;
        self.send_request(Request::QueueChunk(payload))
    }

    /// Queues a command. With a callback and no explicit transaction id,
    /// the next id is allocated and returned; fire-and-forget commands go
    /// out with transaction id 0.
    pub fn send_command(
        &self,
        request: CommandRequest,
        on_response: Option<CommandCallback>,
    ) -> Result<u32> {
        self.ensure_open()?;

        let mut callback = on_response;
        let transaction_id = match request.transaction_id {
            Some(tid) => {
                if tid == 0 && callback.is_some() {
                    warn!("Transaction id 0 never gets a response, dropping callback");
                    callback = None;
                }
                tid
            }
            None => match callback {
                Some(_) => self.next_transaction.fetch_add(1, Ordering::SeqCst),
                None => 0,
            },
        };

        let payload = message::encode(
            RtmpMessage::Amf0Command {
                command_name: request.name,
                transaction_id: transaction_id as f64,
                command_object: request.command_object,
                additional_arguments: request.optional_args,
            },
            0,
            request.chunk_stream_id,
            request.stream_id,
        )?;

        self.send_request(Request::SendCommand {
            payload,
            transaction_id,
            callback,
        })?;
        Ok(transaction_id)
    }

    /// Installs the handler for inbound commands no pending transaction
    /// claims. Replaces any previous handler.
    pub fn set_command_handler(&self, handler: CommandHandler) -> Result<()> {
        self.ensure_open()?;
        self.send_request(Request::SetCommandHandler(handler))
    }

    /// Routes non-command, non-control messages arriving on `csid` to the
    /// given handler. Without one, such messages are dropped with a trace.
    pub fn set_chunk_handler(&self, csid: u32, handler: ChunkHandler) -> Result<()> {
        self.ensure_open()?;
        self.send_request(Request::SetChunkHandler { csid, handler })
    }

    pub fn set_out_chunk_size(&self, size: usize) -> Result<()> {
        self.ensure_open()?;
        self.send_request(Request::SetOutChunkSize(size))
    }

    /// Idempotent. Pending command callbacks fire with `Cancelled` once
    /// the connection task winds down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.req_tx.send(Request::Close);
    }

    fn send_request(&self, req: Request) -> Result<()> {
        self.req_tx.send(req).map_err(|_| ConnectionError::Closed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop<R>(mut decoder: ChunkDecoder<R>, tx: mpsc::UnboundedSender<InboundEvent>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match decoder.recv_message().await {
            Ok(payload) => {
                let total_input_bytes = decoder.recv_bytes();
                let event = InboundEvent::Message {
                    payload,
                    total_input_bytes,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = tx.send(InboundEvent::Error(err));
                return;
            }
        }
    }
}

struct ConnectionTask<W> {
    encoder: ChunkEncoder<W>,
    dispatcher: CommandDispatcher,
    flow: FlowController,
    command_handler: Option<CommandHandler>,
    chunk_handlers: HashMap<u32, ChunkHandler>,
    state: Arc<AtomicU8>,
}

async fn conn_loop<W>(
    mut task: ConnectionTask<W>,
    mut req_rx: mpsc::UnboundedReceiver<Request>,
    mut in_rx: mpsc::UnboundedReceiver<InboundEvent>,
    reader: JoinHandle<()>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;
            req = req_rx.recv() => {
                match req {
                    Some(Request::Close) | None => break,
                    Some(req) => {
                        if let Err(err) = task.handle_request(req).await {
                            error!("Connection request failed: {}", err);
                            break;
                        }
                    }
                }
            }
            event = in_rx.recv() => {
                match event {
                    Some(InboundEvent::Message { payload, total_input_bytes }) => {
                        if let Err(err) = task.handle_inbound(payload, total_input_bytes).await {
                            error!("Inbound message failed: {}", err);
                            break;
                        }
                    }
                    Some(InboundEvent::Error(ChunkError::TransportIO(
                        TransportError::ReadUnexpectedEof,
                    ))) => {
                        info!("Peer closed the connection");
                        break;
                    }
                    Some(InboundEvent::Error(err)) => {
                        error!("Inbound stream failed: {}", err);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    task.state
        .store(ConnectionState::Closing as u8, Ordering::SeqCst);
    reader.abort();
    // requests that raced in behind the close still get their cancellation
    req_rx.close();
    while let Ok(req) = req_rx.try_recv() {
        if let Request::SendCommand {
            transaction_id,
            callback: Some(callback),
            ..
        } = req
        {
            trace!("Cancel unsent command transaction {}", transaction_id);
            callback(CommandReply::Cancelled);
        }
    }
    task.dispatcher.cancel_all();
    let _ = task.encoder.flush().await;
    task.state
        .store(ConnectionState::Closed as u8, Ordering::SeqCst);
    info!("Connection loop terminated");
}

impl<W: AsyncWrite + Unpin> ConnectionTask<W> {
    async fn handle_request(&mut self, req: Request) -> Result<()> {
        match req {
            Request::QueueChunk(payload) => self.encoder.send_message(&payload).await?,
            Request::SendCommand {
                payload,
                transaction_id,
                callback,
            } => {
                if let Some(callback) = callback {
                    self.dispatcher.register(transaction_id, callback);
                }
                self.encoder.send_message(&payload).await?;
            }
            Request::SetCommandHandler(handler) => self.command_handler = Some(handler),
            Request::SetChunkHandler { csid, handler } => {
                self.chunk_handlers.insert(csid, handler);
            }
            Request::SetOutChunkSize(size) => self.encoder.set_chunk_size(size).await?,
            // handled by the loop
            Request::Close => {}
        }
        Ok(())
    }

    async fn handle_inbound(&mut self, payload: RtmpPayload, total_input_bytes: u64) -> Result<()> {
        if let Some(sequence_number) = self.flow.on_bytes_received(total_input_bytes) {
            let ack = message::encode(
                RtmpMessage::Acknowledgement { sequence_number },
                0,
                csid::PROTOCOL_CONTROL,
                0,
            )?;
            self.encoder.send_message(&ack).await?;
        }

        if message::is_protocol_control(payload.message_type) {
            match message::decode(payload) {
                Ok(msg) => self.handle_control(msg),
                Err(err) => warn!("Drop malformed control message: {}", err),
            }
            return Ok(());
        }

        if message::is_command(payload.message_type) {
            let stream_id = payload.stream_id;
            let cmd_csid = payload.csid;
            match message::decode(payload) {
                Ok(RtmpMessage::Amf0Command {
                    command_name,
                    transaction_id,
                    command_object,
                    additional_arguments,
                }) => {
                    let mut values = vec![command_object];
                    values.extend(additional_arguments);
                    let cmd = InboundCommand {
                        command_name,
                        transaction_id,
                        values,
                        stream_id,
                        csid: cmd_csid,
                    };
                    if let Some(cmd) = self.dispatcher.dispatch(cmd) {
                        if let Some(handler) = self.command_handler.as_mut() {
                            handler(cmd);
                        } else {
                            trace!("Drop unhandled command {}", cmd.command_name);
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("Drop malformed command message: {}", err),
            }
            return Ok(());
        }

        match self.chunk_handlers.get_mut(&payload.csid) {
            Some(handler) => handler(payload),
            None => trace!(
                "Drop message type={} on csid={} without handler",
                payload.message_type,
                payload.csid
            ),
        }
        Ok(())
    }

    // set_chunk_size and abort already took effect inside the decoder
    fn handle_control(&mut self, msg: RtmpMessage) {
        match msg {
            RtmpMessage::SetChunkSize { chunk_size } => {
                trace!("Peer chunk size is now {}", chunk_size)
            }
            RtmpMessage::Abort { csid } => trace!("Peer aborted csid={}", csid),
            RtmpMessage::Acknowledgement { sequence_number } => {
                trace!("Peer acknowledged {} bytes", sequence_number)
            }
            RtmpMessage::UserControl {
                event_type,
                event_data,
                ..
            } => trace!("User control event={} data={}", event_type, event_data),
            RtmpMessage::SetWindowAckSize { ack_window_size } => {
                self.flow.set_window_ack_size(ack_window_size)
            }
            RtmpMessage::SetPeerBandwidth { size, limit_type } => {
                self.flow.set_peer_bandwidth(size, limit_type)
            }
            other => warn!("Unexpected control message {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::types::msg_type;
    use bytes::Bytes;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn state_survives_the_atomic_round_trip() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Handshaking,
            ConnectionState::Established,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }

    #[tokio::test]
    async fn teardown_cancels_requests_queued_behind_close() {
        let (io, _peer) = tokio::io::duplex(1024);
        let (_, wt) = transport::split(io);
        let task = ConnectionTask {
            encoder: ChunkEncoder::new(wt),
            dispatcher: CommandDispatcher::new(),
            flow: FlowController::new(),
            command_handler: None,
            chunk_handlers: HashMap::new(),
            state: Arc::new(AtomicU8::new(ConnectionState::Established as u8)),
        };
        let state = Arc::clone(&task.state);

        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let reader = tokio::spawn(async {});

        let (tx, rx) = std_mpsc::channel();
        let payload = RtmpPayload {
            message_type: msg_type::AMF0_CMD,
            csid: csid::OVER_CONNECTION,
            stream_id: 0,
            timestamp: 0,
            raw_data: Bytes::new(),
        };
        req_tx.send(Request::Close).unwrap();
        req_tx
            .send(Request::SendCommand {
                payload,
                transaction_id: 5,
                callback: Some(Box::new(move |reply| {
                    assert!(matches!(reply, CommandReply::Cancelled));
                    tx.send(()).unwrap();
                })),
            })
            .unwrap();

        conn_loop(task, req_rx, in_rx, reader).await;

        assert!(rx.try_recv().is_ok());
        assert_eq!(
            ConnectionState::from_u8(state.load(Ordering::SeqCst)),
            ConnectionState::Closed
        );
    }
}
