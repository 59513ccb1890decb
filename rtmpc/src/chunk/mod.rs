use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;
use std::{cmp, collections::HashMap, io::Cursor};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{trace, warn};

use rtmpc_core::transport::{ReadTransport, WriteTransport};

use crate::message::{
    self,
    types::{csid as cid, msg_type, DEFAULT_CHUNK_SIZE, EXTENDED_TIMESTAMP},
    RtmpMessage, RtmpPayload,
};

use self::error::ChunkError;

pub mod error;

const RTMP_FMT_TYPE0: u8 = 0;
const RTMP_FMT_TYPE1: u8 = 1;
const RTMP_FMT_TYPE2: u8 = 2;
const RTMP_FMT_TYPE3: u8 = 3;
const MH_SIZES: [usize; 4] = [11, 7, 3, 0];

// Largest csid expressible by the 3-byte basic header form.
const MAX_CSID: u32 = 65599;

type Result<T> = std::result::Result<T, ChunkError>;

#[derive(Debug, Clone, Default)]
struct MessageHeader {
    timestamp_delta: u32,
    payload_length: usize,
    message_type: u8,
    stream_id: u32,
    timestamp: u32,
}

/// Input-side header cache entry, one per chunk stream id. Created lazily
/// on first use and kept for the connection's lifetime.
#[derive(Debug)]
struct ChunkStream {
    csid: u32,
    header: MessageHeader,
    extended_timestamp: bool,
    payload: BytesMut,
    msg_count: u32,
}

impl ChunkStream {
    fn new(csid: u32) -> Self {
        Self {
            csid,
            header: MessageHeader::default(),
            extended_timestamp: false,
            payload: BytesMut::new(),
            msg_count: 0,
        }
    }
}

/// Reassembles interleaved chunk streams back into complete messages.
///
/// Parsing is driven by awaited reads on the buffered transport, so a
/// partial chunk (even a partial header) simply suspends until more bytes
/// arrive. `set_chunk_size` and `abort` are applied here, before the next
/// chunk is parsed, and still surfaced to the caller.
pub struct ChunkDecoder<R> {
    io: ReadTransport<R>,
    in_chunk_size: usize,
    chunk_streams: HashMap<u32, ChunkStream>,
    base_bytes: u64,
}

impl<R: AsyncRead + Unpin> ChunkDecoder<R> {
    pub fn new(io: ReadTransport<R>) -> Self {
        let base_bytes = io.get_recv_bytes();
        Self {
            io,
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_streams: HashMap::new(),
            base_bytes,
        }
    }

    pub fn set_in_chunk_size(&mut self, n: usize) {
        self.in_chunk_size = n;
    }

    pub fn in_chunk_size(&self) -> usize {
        self.in_chunk_size
    }

    /// Bytes consumed since chunk parsing began, handshake bytes excluded.
    pub fn recv_bytes(&self) -> u64 {
        self.io.get_recv_bytes() - self.base_bytes
    }

    pub async fn recv_message(&mut self) -> Result<RtmpPayload> {
        loop {
            trace!("Receiving message...");
            if let Some(payload) = self.recv_interlaced_chunk().await? {
                self.apply_protocol_control(&payload);
                return Ok(payload);
            }
        }
    }

    async fn recv_interlaced_chunk(&mut self) -> Result<Option<RtmpPayload>> {
        let (fmt, csid) = self.read_basic_header().await?;
        trace!("Read basic header, fmt={} csid={}", fmt, csid);

        let mut cs = self
            .chunk_streams
            .remove(&csid)
            .unwrap_or_else(|| ChunkStream::new(csid));
        let result = self.read_chunk(&mut cs, fmt).await;
        self.chunk_streams.insert(csid, cs);
        result
    }

    async fn read_chunk(&mut self, cs: &mut ChunkStream, fmt: u8) -> Result<Option<RtmpPayload>> {
        self.read_message_header(cs, fmt).await?;
        self.read_message_payload(cs).await
    }

    async fn read_basic_header(&mut self) -> Result<(u8, u32)> {
        let head = self.io.read_u8().await?;
        let csid = head & 0x3f;
        let fmt = (head >> 6) & 0x03;
        if csid > 1 {
            Ok((fmt, csid as u32))
        } else if csid == 0 {
            let mut csid = 64_u32;
            csid += self.io.read_u8().await? as u32;
            Ok((fmt, csid))
        } else {
            let mut csid = 64_u32;
            csid += self.io.read_u8().await? as u32;
            csid += self.io.read_u8().await? as u32 * 256;
            Ok((fmt, csid))
        }
    }

    async fn read_message_header(&mut self, cs: &mut ChunkStream, fmt: u8) -> Result<()> {
        let first_chunk_of_msg = cs.payload.is_empty();
        if cs.msg_count == 0 && fmt != RTMP_FMT_TYPE0 {
            if fmt == RTMP_FMT_TYPE1 {
                warn!("Fresh chunk start with fmt=1");
            } else {
                return Err(ChunkError::InvalidFmtRule1(fmt, cs.csid));
            }
        }
        // when a partial message is cached, the fmt must not be type0,
        // which would start a new message.
        if !first_chunk_of_msg && fmt == RTMP_FMT_TYPE0 {
            return Err(ChunkError::InvalidFmtRule2(fmt, cs.csid));
        }

        let mh_size = MH_SIZES[fmt as usize];
        let mut mh = [0u8; 11];
        if mh_size > 0 {
            self.io.read_exact(&mut mh[..mh_size]).await?;
        }
        let mut cursor = Cursor::new(&mh[..mh_size]);

        if fmt <= RTMP_FMT_TYPE2 {
            let ts24 = cursor.read_u24::<BigEndian>()?;
            cs.extended_timestamp = ts24 >= EXTENDED_TIMESTAMP;
            if !cs.extended_timestamp {
                if fmt == RTMP_FMT_TYPE0 {
                    cs.header.timestamp_delta = 0;
                    cs.header.timestamp = ts24;
                } else {
                    cs.header.timestamp_delta = ts24;
                    cs.header.timestamp = cs.header.timestamp.wrapping_add(ts24);
                }
            }
            if fmt <= RTMP_FMT_TYPE1 {
                let payload_length = cursor.read_u24::<BigEndian>()? as usize;
                if !first_chunk_of_msg && cs.header.payload_length != payload_length {
                    return Err(ChunkError::InvalidMsgLengthRule1(
                        cs.header.payload_length,
                        payload_length,
                    ));
                }
                cs.header.payload_length = payload_length;
                cs.payload.reserve(payload_length);
                cs.header.message_type = cursor.read_u8()?;

                if fmt == RTMP_FMT_TYPE0 {
                    cs.header.stream_id = cursor.read_u32::<LittleEndian>()?;
                }
            }
        } else {
            // fmt=3 starting a fresh message repeats the previous delta
            if first_chunk_of_msg && !cs.extended_timestamp {
                cs.header.timestamp = cs.header.timestamp.wrapping_add(cs.header.timestamp_delta);
            }
        }

        if cs.extended_timestamp {
            let timestamp = self.io.read_u32().await?;
            if !first_chunk_of_msg && cs.header.timestamp > 0 && timestamp != cs.header.timestamp {
                return Err(ChunkError::InvalidExTimestamp);
            }
            cs.header.timestamp = timestamp;
        }
        cs.header.timestamp &= 0x7fffffff;

        cs.msg_count += 1;
        Ok(())
    }

    async fn read_message_payload(&mut self, cs: &mut ChunkStream) -> Result<Option<RtmpPayload>> {
        // empty message
        if cs.header.payload_length == 0 {
            trace!("Get an empty RTMP message(type={})", cs.header.message_type);
            return Ok(Some(Self::finish_message(cs)));
        }

        // the chunk payload size
        let mut payload_size = cs.header.payload_length - cs.payload.len();
        payload_size = cmp::min(payload_size, self.in_chunk_size);

        let mut buffer = vec![0u8; payload_size];
        self.io.read_exact(&mut buffer).await?;
        cs.payload.extend_from_slice(&buffer);

        // got the entire RTMP message?
        if cs.header.payload_length == cs.payload.len() {
            trace!(
                "Reading payload finish, read={}, total={}",
                cs.payload.len(),
                cs.header.payload_length
            );
            return Ok(Some(Self::finish_message(cs)));
        }

        trace!(
            "Read payload continue, read={}, total={}",
            cs.payload.len(),
            cs.header.payload_length
        );

        Ok(None)
    }

    fn finish_message(cs: &mut ChunkStream) -> RtmpPayload {
        RtmpPayload {
            message_type: cs.header.message_type,
            csid: cs.csid,
            stream_id: cs.header.stream_id,
            timestamp: cs.header.timestamp,
            raw_data: cs.payload.split().freeze(),
        }
    }

    // set_chunk_size and abort alter how the very next chunk is parsed,
    // so they must take effect here rather than in the dispatch layer.
    fn apply_protocol_control(&mut self, payload: &RtmpPayload) {
        match payload.message_type {
            msg_type::SET_CHUNK_SIZE if payload.raw_data.len() >= 4 => {
                let n = u32::from_be_bytes([
                    payload.raw_data[0],
                    payload.raw_data[1],
                    payload.raw_data[2],
                    payload.raw_data[3],
                ]) as usize;
                if n == 0 {
                    warn!("Ignore set_chunk_size 0");
                    return;
                }
                if !(128..=65536).contains(&n) {
                    warn!("Accept unusual set_chunk_size {}", n);
                }
                trace!("Accept set_chunk_size {}", n);
                self.in_chunk_size = n;
            }
            msg_type::ABORT if payload.raw_data.len() >= 4 => {
                let target = u32::from_be_bytes([
                    payload.raw_data[0],
                    payload.raw_data[1],
                    payload.raw_data[2],
                    payload.raw_data[3],
                ]);
                if let Some(cs) = self.chunk_streams.get_mut(&target) {
                    if !cs.payload.is_empty() {
                        trace!("Abort partial message on csid={}", target);
                        cs.payload.clear();
                    }
                }
            }
            _ => {}
        }
    }
}

/// Output-side header cache entry.
#[derive(Debug)]
struct OutHeader {
    timestamp: u32,
    timestamp_delta: u32,
    payload_length: usize,
    message_type: u8,
    stream_id: u32,
}

/// Fragments outgoing messages into chunks no larger than the negotiated
/// out-chunk-size, picking the cheapest header form the per-csid cache
/// permits. Chunks of one message are written back to back, so messages on
/// the same chunk stream never interleave.
pub struct ChunkEncoder<W> {
    io: WriteTransport<W>,
    out_chunk_size: usize,
    prev_headers: HashMap<u32, OutHeader>,
}

impl<W: AsyncWrite + Unpin> ChunkEncoder<W> {
    pub fn new(io: WriteTransport<W>) -> Self {
        Self {
            io,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            prev_headers: HashMap::new(),
        }
    }

    pub fn out_chunk_size(&self) -> usize {
        self.out_chunk_size
    }

    pub fn send_bytes(&self) -> u64 {
        self.io.get_send_bytes()
    }

    /// Announces the new size to the peer first; the peer must learn the
    /// size before any chunk framed with it arrives.
    pub async fn set_chunk_size(&mut self, n: usize) -> Result<()> {
        if n == 0 || n > 0x7FFFFFFF {
            return Err(ChunkError::InvalidChunkSize(n));
        }
        let payload = message::encode(
            RtmpMessage::SetChunkSize {
                chunk_size: n as u32,
            },
            0,
            cid::PROTOCOL_CONTROL,
            0,
        )?;
        self.send_message(&payload).await?;
        self.out_chunk_size = n;
        Ok(())
    }

    pub async fn send_message(&mut self, msg: &RtmpPayload) -> Result<()> {
        let total = msg.raw_data.len();
        if total > 0xFFFFFF {
            return Err(ChunkError::MessageTooLong(total));
        }
        if msg.csid < 2 || msg.csid > MAX_CSID {
            return Err(ChunkError::InvalidCsid(msg.csid));
        }

        let (fmt, delta) = self.select_header_format(msg);
        let extended = fmt == RTMP_FMT_TYPE0 && msg.timestamp >= EXTENDED_TIMESTAMP;

        let mut sent = 0_usize;
        let mut first = true;
        loop {
            let length = cmp::min(total - sent, self.out_chunk_size);
            let mut hdr: Vec<u8> = Vec::with_capacity(16);
            if first {
                write_basic_header(&mut hdr, fmt, msg.csid)?;
                match fmt {
                    RTMP_FMT_TYPE0 => {
                        hdr.write_u24::<BigEndian>(cmp::min(msg.timestamp, EXTENDED_TIMESTAMP))?;
                        hdr.write_u24::<BigEndian>(total as u32)?;
                        hdr.write_u8(msg.message_type)?;
                        hdr.write_u32::<LittleEndian>(msg.stream_id)?;
                    }
                    RTMP_FMT_TYPE1 => {
                        hdr.write_u24::<BigEndian>(delta)?;
                        hdr.write_u24::<BigEndian>(total as u32)?;
                        hdr.write_u8(msg.message_type)?;
                    }
                    RTMP_FMT_TYPE2 => {
                        hdr.write_u24::<BigEndian>(delta)?;
                    }
                    _ => {}
                }
            } else {
                write_basic_header(&mut hdr, RTMP_FMT_TYPE3, msg.csid)?;
            }
            if extended {
                hdr.write_u32::<BigEndian>(msg.timestamp)?;
            }
            self.io.write_all(&hdr).await?;
            self.io.write_all(&msg.raw_data[sent..sent + length]).await?;

            first = false;
            sent += length;
            if sent >= total {
                break;
            }
        }

        self.prev_headers.insert(
            msg.csid,
            OutHeader {
                timestamp: msg.timestamp,
                timestamp_delta: if fmt == RTMP_FMT_TYPE0 { 0 } else { delta },
                payload_length: total,
                message_type: msg.message_type,
                stream_id: msg.stream_id,
            },
        );
        self.io.flush().await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(self.io.flush().await?)
    }

    // Compressed forms whenever the cache allows. Timestamps that need the
    // extended field always get a full header, so continuation chunks carry
    // an unambiguous absolute value.
    fn select_header_format(&self, msg: &RtmpPayload) -> (u8, u32) {
        if msg.timestamp >= EXTENDED_TIMESTAMP {
            return (RTMP_FMT_TYPE0, 0);
        }
        let prev = match self.prev_headers.get(&msg.csid) {
            None => return (RTMP_FMT_TYPE0, 0),
            Some(prev) => prev,
        };
        if msg.stream_id != prev.stream_id || msg.timestamp < prev.timestamp {
            return (RTMP_FMT_TYPE0, 0);
        }
        let delta = msg.timestamp - prev.timestamp;
        if msg.raw_data.len() != prev.payload_length || msg.message_type != prev.message_type {
            (RTMP_FMT_TYPE1, delta)
        } else if delta != prev.timestamp_delta {
            (RTMP_FMT_TYPE2, delta)
        } else {
            (RTMP_FMT_TYPE3, delta)
        }
    }
}

fn write_basic_header(hdr: &mut Vec<u8>, fmt: u8, csid: u32) -> Result<()> {
    match csid {
        2..=63 => hdr.write_u8((fmt << 6) | csid as u8)?,
        64..=319 => {
            hdr.write_u8(fmt << 6)?;
            hdr.write_u8((csid - 64) as u8)?;
        }
        _ => {
            hdr.write_u8((fmt << 6) | 1)?;
            let v = csid - 64;
            hdr.write_u8((v & 0xFF) as u8)?;
            hdr.write_u8((v >> 8) as u8)?;
        }
    }
    Ok(())
}
