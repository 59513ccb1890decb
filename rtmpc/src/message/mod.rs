use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use rml_amf0::Amf0Value;
use std::io::Cursor;
use tracing::trace;

use self::error::{MessageDecodeError, MessageEncodeError};
use self::types::*;

pub mod error;
pub mod types;

/// One fully-reassembled RTMP message plus the chunk-stream routing
/// information it arrived on (or should be sent on).
#[derive(Debug, Clone)]
pub struct RtmpPayload {
    pub message_type: u8,
    pub csid: u32,
    pub stream_id: u32,
    pub timestamp: u32,
    pub raw_data: Bytes,
}

#[derive(Debug)]
pub enum RtmpMessage {
    Amf0Command {
        command_name: String,
        transaction_id: f64,
        command_object: Amf0Value,
        additional_arguments: Vec<Amf0Value>,
    },
    SetChunkSize {
        chunk_size: u32,
    },
    Abort {
        csid: u32,
    },
    Acknowledgement {
        sequence_number: u32,
    },
    UserControl {
        event_type: u16,
        event_data: u32,
        extra_data: u32,
    },
    SetWindowAckSize {
        ack_window_size: u32,
    },
    SetPeerBandwidth {
        size: u32,
        limit_type: u8,
    },
    Unknown {
        type_id: u8,
        data: Bytes,
    },
}

/// Protocol-control messages are interpreted by the engine itself.
pub fn is_protocol_control(type_id: u8) -> bool {
    matches!(
        type_id,
        msg_type::SET_CHUNK_SIZE
            | msg_type::ABORT
            | msg_type::ACK
            | msg_type::USER_CONTROL
            | msg_type::WIN_ACK_SIZE
            | msg_type::SET_PEER_BW
    )
}

pub fn is_command(type_id: u8) -> bool {
    type_id == msg_type::AMF0_CMD || type_id == msg_type::AMF3_CMD
}

pub fn decode(payload: RtmpPayload) -> Result<RtmpMessage, MessageDecodeError> {
    match payload.message_type {
        msg_type::SET_CHUNK_SIZE => {
            trace!("Recv message <set_chunk_size>");
            let mut cursor = Cursor::new(payload.raw_data);
            let chunk_size = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::SetChunkSize { chunk_size })
        }
        msg_type::ABORT => {
            trace!("Recv message <abort>");
            let mut cursor = Cursor::new(payload.raw_data);
            let csid = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::Abort { csid })
        }
        msg_type::ACK => {
            trace!("Recv message <ack>");
            let mut cursor = Cursor::new(payload.raw_data);
            let sequence_number = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::Acknowledgement { sequence_number })
        }
        msg_type::USER_CONTROL => {
            trace!("Recv message <user_control>");
            let mut cursor = Cursor::new(payload.raw_data);
            let mut extra_data: u32 = 0;
            let event_type = cursor.read_u16::<BigEndian>()?;
            let event_data = cursor.read_u32::<BigEndian>()?;
            if event_type == user_ctrl_ev_type::SET_BUFFER_LENGTH {
                extra_data = cursor.read_u32::<BigEndian>()?;
            }

            Ok(RtmpMessage::UserControl {
                event_type,
                event_data,
                extra_data,
            })
        }
        msg_type::WIN_ACK_SIZE => {
            trace!("Recv message <win_ack_size>");
            let mut cursor = Cursor::new(payload.raw_data);
            let ack_window_size = cursor.read_u32::<BigEndian>()?;

            Ok(RtmpMessage::SetWindowAckSize { ack_window_size })
        }
        msg_type::SET_PEER_BW => {
            trace!("Recv message <set_peer_bw>");
            let mut cursor = Cursor::new(payload.raw_data);
            let size = cursor.read_u32::<BigEndian>()?;
            let limit_type = cursor.read_u8()?;

            Ok(RtmpMessage::SetPeerBandwidth { size, limit_type })
        }
        msg_type::AMF3_CMD | msg_type::AMF0_CMD => {
            trace!("Recv message <amf_cmd>");
            let mut cursor = Cursor::new(payload.raw_data);
            if payload.message_type == msg_type::AMF3_CMD {
                // leading format byte of the amf3 envelope
                cursor.read_u8()?;
            }
            let mut arguments = rml_amf0::deserialize(&mut cursor)?;
            if arguments.len() < 3 {
                return Err(MessageDecodeError::InvalidFormat("command".to_string()));
            }

            let command_name: String;
            let transaction_id: f64;
            let command_object: Amf0Value;
            {
                let mut arg_iterator = arguments.drain(..3);

                command_name = match arg_iterator
                    .next()
                    .ok_or(MessageDecodeError::InvalidFormat("command".to_string()))?
                {
                    Amf0Value::Utf8String(value) => value,
                    _ => return Err(MessageDecodeError::InvalidFormat("command".to_string())),
                };

                transaction_id = match arg_iterator.next().ok_or(
                    MessageDecodeError::InvalidFormat("transaction_id".to_string()),
                )? {
                    Amf0Value::Number(value) => value,
                    _ => {
                        return Err(MessageDecodeError::InvalidFormat(
                            "transaction_id".to_string(),
                        ))
                    }
                };

                command_object = arg_iterator
                    .next()
                    .ok_or(MessageDecodeError::InvalidFormat("command_obj".to_string()))?;
            }

            Ok(RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                additional_arguments: arguments,
            })
        }
        other => {
            trace!("Recv message <raw {}>", other);
            Ok(RtmpMessage::Unknown {
                type_id: other,
                data: payload.raw_data,
            })
        }
    }
}

pub fn encode(
    msg: RtmpMessage,
    timestamp: u32,
    csid: u32,
    stream_id: u32,
) -> Result<RtmpPayload, MessageEncodeError> {
    match msg {
        RtmpMessage::Amf0Command {
            command_name,
            transaction_id,
            command_object,
            mut additional_arguments,
        } => {
            let cmd = match command_name.is_empty() {
                true => Amf0Value::Null,
                false => Amf0Value::Utf8String(command_name),
            };
            let mut values = vec![cmd, Amf0Value::Number(transaction_id), command_object];
            values.append(&mut additional_arguments);

            let bytes = rml_amf0::serialize(&values)?;
            Ok(RtmpPayload {
                message_type: msg_type::AMF0_CMD,
                csid,
                stream_id,
                timestamp,
                raw_data: Bytes::from(bytes),
            })
        }
        RtmpMessage::SetChunkSize { chunk_size } => Ok(RtmpPayload {
            message_type: msg_type::SET_CHUNK_SIZE,
            csid,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(chunk_size)?,
        }),
        RtmpMessage::Abort { csid: target } => Ok(RtmpPayload {
            message_type: msg_type::ABORT,
            csid,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(target)?,
        }),
        RtmpMessage::Acknowledgement { sequence_number } => Ok(RtmpPayload {
            message_type: msg_type::ACK,
            csid,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(sequence_number)?,
        }),
        RtmpMessage::UserControl {
            event_type,
            event_data,
            extra_data,
        } => {
            let mut cursor = Cursor::new(Vec::new());
            cursor.write_u16::<BigEndian>(event_type)?;
            cursor.write_u32::<BigEndian>(event_data)?;
            if event_type == user_ctrl_ev_type::SET_BUFFER_LENGTH {
                cursor.write_u32::<BigEndian>(extra_data)?;
            }
            Ok(RtmpPayload {
                message_type: msg_type::USER_CONTROL,
                csid,
                stream_id,
                timestamp,
                raw_data: Bytes::from(cursor.into_inner()),
            })
        }
        RtmpMessage::SetWindowAckSize { ack_window_size } => Ok(RtmpPayload {
            message_type: msg_type::WIN_ACK_SIZE,
            csid,
            stream_id,
            timestamp,
            raw_data: fast_u32_encode(ack_window_size)?,
        }),
        RtmpMessage::SetPeerBandwidth { size, limit_type } => {
            let mut cursor = Cursor::new(Vec::new());
            cursor.write_u32::<BigEndian>(size)?;
            cursor.write_u8(limit_type)?;
            Ok(RtmpPayload {
                message_type: msg_type::SET_PEER_BW,
                csid,
                stream_id,
                timestamp,
                raw_data: Bytes::from(cursor.into_inner()),
            })
        }
        RtmpMessage::Unknown { type_id, data } => Ok(RtmpPayload {
            message_type: type_id,
            csid,
            stream_id,
            timestamp,
            raw_data: data,
        }),
    }
}

fn fast_u32_encode(value: u32) -> Result<Bytes, MessageEncodeError> {
    let mut cursor = Cursor::new(Vec::new());
    cursor.write_u32::<BigEndian>(value)?;

    Ok(Bytes::from(cursor.into_inner()))
}
