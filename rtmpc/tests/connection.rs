use bytes::Bytes;
use rml_amf0::Amf0Value;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use rtmpc::chunk::{ChunkDecoder, ChunkEncoder};
use rtmpc::handshake;
use rtmpc::message::{
    self,
    types::{csid, msg_type},
    RtmpMessage, RtmpPayload,
};
use rtmpc::{CommandReply, CommandRequest, Connection, ConnectionState, Role};
use rtmpc_core::transport;

type PeerDecoder = ChunkDecoder<ReadHalf<DuplexStream>>;
type PeerEncoder = ChunkEncoder<WriteHalf<DuplexStream>>;

// Scripted peer playing the server role over an in-memory stream.
async fn raw_server(io: DuplexStream) -> (PeerDecoder, PeerEncoder) {
    let (mut rd, mut wr) = transport::split(io);
    handshake::Server::new()
        .handshake(&mut rd, &mut wr)
        .await
        .unwrap();
    (ChunkDecoder::new(rd), ChunkEncoder::new(wr))
}

async fn recv_command(dec: &mut PeerDecoder) -> (String, f64) {
    loop {
        let payload = dec.recv_message().await.unwrap();
        if let RtmpMessage::Amf0Command {
            command_name,
            transaction_id,
            ..
        } = message::decode(payload).unwrap()
        {
            return (command_name, transaction_id);
        }
    }
}

async fn send_result(enc: &mut PeerEncoder, transaction_id: f64, value: f64) {
    let reply = message::encode(
        RtmpMessage::Amf0Command {
            command_name: "_result".to_string(),
            transaction_id,
            command_object: Amf0Value::Null,
            additional_arguments: vec![Amf0Value::Number(value)],
        },
        0,
        csid::OVER_CONNECTION,
        0,
    )
    .unwrap();
    enc.send_message(&reply).await.unwrap();
}

#[tokio::test]
async fn responses_reach_their_callbacks_out_of_order() {
    let (a, b) = tokio::io::duplex(65536);

    let peer = tokio::spawn(async move {
        let (mut dec, mut enc) = raw_server(b).await;
        let (_, tid1) = recv_command(&mut dec).await;
        let (_, tid2) = recv_command(&mut dec).await;
        send_result(&mut enc, tid2, 20.0).await;
        send_result(&mut enc, tid1, 10.0).await;
    });

    let conn = Connection::startup(a, Role::Client).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Established);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for name in ["createStream", "getStreamLength"] {
        let tx = tx.clone();
        let tid = conn
            .send_command(
                CommandRequest::new(csid::OVER_CONNECTION, 0, name, Amf0Value::Null),
                Some(Box::new(move |reply| {
                    tx.send(reply).unwrap();
                })),
            )
            .unwrap();
        assert!(tid > 0);
    }

    let mut order = Vec::new();
    for _ in 0..2 {
        match rx.recv().await.unwrap() {
            CommandReply::Response {
                command_name,
                transaction_id,
                values,
            } => {
                assert_eq!(command_name, "_result");
                assert_eq!(values.len(), 2);
                order.push(transaction_id);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
    assert_eq!(order, vec![2, 1]);
    peer.await.unwrap();
}

#[tokio::test]
async fn close_cancels_pending_commands() {
    let (a, b) = tokio::io::duplex(65536);

    let peer = tokio::spawn(async move {
        let (mut dec, _enc) = raw_server(b).await;
        // swallow the requests, never answer
        let _ = dec.recv_message().await;
        let _ = dec.recv_message().await;
        let _ = dec.recv_message().await;
    });

    let conn = Connection::startup(a, Role::Client).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..2 {
        let tx = tx.clone();
        conn.send_command(
            CommandRequest::new(csid::OVER_CONNECTION, 0, "createStream", Amf0Value::Null),
            Some(Box::new(move |reply| {
                tx.send(reply).unwrap();
            })),
        )
        .unwrap();
    }
    conn.close();

    for _ in 0..2 {
        assert!(matches!(rx.recv().await.unwrap(), CommandReply::Cancelled));
    }

    // the handle refuses further work
    let err = conn
        .send_command(
            CommandRequest::new(csid::OVER_CONNECTION, 0, "createStream", Amf0Value::Null),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, rtmpc::connection::error::ConnectionError::Closed));
    peer.await.unwrap();
}

#[tokio::test]
async fn fire_and_forget_commands_use_transaction_zero() {
    let (a, b) = tokio::io::duplex(65536);

    let peer = tokio::spawn(async move {
        let (mut dec, _enc) = raw_server(b).await;
        let (name, tid) = recv_command(&mut dec).await;
        assert_eq!(name, "deleteStream");
        assert_eq!(tid, 0.0);
    });

    let conn = Connection::startup(a, Role::Client).await.unwrap();
    let mut request = CommandRequest::new(csid::OVER_STREAM, 1, "deleteStream", Amf0Value::Null);
    request.optional_args = vec![Amf0Value::Number(1.0)];
    let tid = conn.send_command(request, None).unwrap();
    assert_eq!(tid, 0);

    peer.await.unwrap();
}

#[tokio::test]
async fn unmatched_commands_reach_the_connection_handler() {
    let (a, b) = tokio::io::duplex(65536);

    let peer = tokio::spawn(async move {
        let (mut dec, mut enc) = raw_server(b).await;
        // wait until the other side is set up
        let (name, _) = recv_command(&mut dec).await;
        assert_eq!(name, "ready");

        let status = message::encode(
            RtmpMessage::Amf0Command {
                command_name: "onStatus".to_string(),
                transaction_id: 0.0,
                command_object: Amf0Value::Null,
                additional_arguments: vec![Amf0Value::Utf8String("NetStream.Play.Start".to_string())],
            },
            0,
            csid::OVER_CONNECTION,
            0,
        )
        .unwrap();
        enc.send_message(&status).await.unwrap();
    });

    let conn = Connection::startup(a, Role::Client).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.set_command_handler(Box::new(move |cmd| {
        tx.send(cmd).unwrap();
    }))
    .unwrap();
    conn.send_command(
        CommandRequest::new(csid::OVER_CONNECTION, 0, "ready", Amf0Value::Null),
        None,
    )
    .unwrap();

    let cmd = rx.recv().await.unwrap();
    assert_eq!(cmd.command_name, "onStatus");
    assert_eq!(cmd.transaction_id, 0.0);
    assert_eq!(cmd.values.len(), 2);
    peer.await.unwrap();
}

#[tokio::test]
async fn window_acknowledgement_is_sent() {
    let (a, b) = tokio::io::duplex(65536);

    let peer = tokio::spawn(async move {
        let (mut dec, mut enc) = raw_server(b).await;
        let win = message::encode(
            RtmpMessage::SetWindowAckSize {
                ack_window_size: 256,
            },
            0,
            csid::PROTOCOL_CONTROL,
            0,
        )
        .unwrap();
        enc.send_message(&win).await.unwrap();

        let (name, _) = recv_command(&mut dec).await;
        assert_eq!(name, "ready");

        for ts in 0..4u32 {
            let media = RtmpPayload {
                message_type: msg_type::AUDIO,
                csid: 5,
                stream_id: 1,
                timestamp: ts,
                raw_data: Bytes::from(vec![0u8; 100]),
            };
            enc.send_message(&media).await.unwrap();
        }

        loop {
            let payload = dec.recv_message().await.unwrap();
            if let RtmpMessage::Acknowledgement { sequence_number } =
                message::decode(payload).unwrap()
            {
                return sequence_number;
            }
        }
    });

    let conn = Connection::startup(a, Role::Client).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    conn.set_chunk_handler(
        5,
        Box::new(move |payload| {
            tx.send(payload.timestamp).unwrap();
        }),
    )
    .unwrap();
    conn.send_command(
        CommandRequest::new(csid::OVER_CONNECTION, 0, "ready", Amf0Value::Null),
        None,
    )
    .unwrap();

    let mut stamps = Vec::new();
    for _ in 0..4 {
        stamps.push(rx.recv().await.unwrap());
    }
    assert_eq!(stamps, vec![0, 1, 2, 3]);

    let sequence_number = peer.await.unwrap();
    assert!(sequence_number >= 256);
}

#[tokio::test]
async fn queued_chunks_and_commands_keep_submission_order() {
    let (a, b) = tokio::io::duplex(65536);
    let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
    let expected = data.clone();

    let peer = tokio::spawn(async move {
        let (mut dec, _enc) = raw_server(b).await;

        // the media payload spans several chunks, all written before the
        // command that was queued behind it
        let first = dec.recv_message().await.unwrap();
        assert_eq!(first.message_type, msg_type::VIDEO);
        assert_eq!(first.csid, 6);
        assert_eq!(first.stream_id, 1);
        assert_eq!(&first.raw_data[..], &expected[..]);

        let second = dec.recv_message().await.unwrap();
        match message::decode(second).unwrap() {
            RtmpMessage::Amf0Command { command_name, .. } => {
                assert_eq!(command_name, "createStream")
            }
            other => panic!("unexpected message {:?}", other),
        }
    });

    let conn = Connection::startup(a, Role::Client).await.unwrap();
    conn.queue_chunk(RtmpPayload {
        message_type: msg_type::VIDEO,
        csid: 6,
        stream_id: 1,
        timestamp: 0,
        raw_data: Bytes::from(data),
    })
    .unwrap();
    conn.send_command(
        CommandRequest::new(csid::OVER_CONNECTION, 0, "createStream", Amf0Value::Null),
        None,
    )
    .unwrap();

    peer.await.unwrap();
}
