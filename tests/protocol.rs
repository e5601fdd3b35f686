//! Wire-level conformance tests: one side is a real `Session`, the other a
//! hand-driven `Framed` peer sending exact frames.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use rmux::{
    frame::error_code, Codec, Config, ConfigBuilder, Frame, FrameBody, Payload, RmuxError, Session,
};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// A raw peer that has consumed the client's SETUP frame.
async fn raw_accept(transport: DuplexStream, config: &Config) -> Framed<DuplexStream, Codec> {
    let mut framed = Framed::new(transport, Codec::new(config));
    let raw = framed.next().await.expect("setup frame").expect("framing");
    let frame = Frame::decode(raw).expect("setup decodes");
    assert!(matches!(frame.body, FrameBody::Setup(_)));
    framed
}

async fn next_frame(framed: &mut Framed<DuplexStream, Codec>) -> Frame {
    let raw = framed.next().await.expect("frame").expect("framing");
    Frame::decode(raw).expect("frame decodes")
}

/// Next frame that is not a scheduled keepalive emission.
async fn next_non_keepalive(framed: &mut Framed<DuplexStream, Codec>) -> Frame {
    loop {
        let frame = next_frame(framed).await;
        if !matches!(frame.body, FrameBody::Keepalive { .. }) {
            return frame;
        }
    }
}

fn quiet_config() -> Config {
    // Long keepalive timing so scheduled emissions stay out of the way.
    ConfigBuilder::new()
        .keepalive_interval(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(120))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_keepalive_respond_produces_exactly_one_echo() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = quiet_config();
    let _client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    let mut peer = raw_accept(server_transport, &config).await;

    peer.send(Frame::new_keepalive(true, Bytes::from_static(b"probe")))
        .await
        .unwrap();

    // The echo carries RESPOND unset and the probe's data. Scheduled
    // emissions always carry RESPOND set, so they cannot be mistaken for it.
    let echo = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match next_frame(&mut peer).await.body {
                FrameBody::Keepalive {
                    respond: false,
                    data,
                } => break data,
                FrameBody::Keepalive { respond: true, .. } => continue,
                other => panic!("unexpected frame {other:?}"),
            }
        }
    })
    .await
    .expect("echo within deadline");
    assert_eq!(echo, Bytes::from_static(b"probe"));

    // And exactly one: no second echo shows up.
    match tokio::time::timeout(Duration::from_millis(200), next_frame(&mut peer)).await {
        Err(_) => {}
        Ok(frame) => assert!(
            !matches!(
                frame.body,
                FrameBody::Keepalive { respond: false, .. }
            ),
            "received a second echo"
        ),
    }
}

#[tokio::test]
async fn test_keepalive_timeout_is_connection_fatal() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = ConfigBuilder::new()
        .keepalive_interval(Duration::from_millis(50))
        .max_lifetime(Duration::from_millis(200))
        .build()
        .unwrap();

    let client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    // A peer that never answers keepalives.
    let _peer = raw_accept(server_transport, &config).await;

    let pending = client.request_response(Payload::empty()).await.unwrap();

    match tokio::time::timeout(Duration::from_secs(5), pending.response()).await {
        Ok(Err(RmuxError::KeepaliveTimeout)) => {}
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.is_closed());
    assert_eq!(client.live_streams(), 0);
}

#[tokio::test]
async fn test_connection_error_terminates_every_stream() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = quiet_config();
    let client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    let mut peer = raw_accept(server_transport, &config).await;

    let pending_response = client.request_response(Payload::empty()).await.unwrap();
    let mut pending_stream = client.request_stream(Payload::empty(), 8).await.unwrap();
    assert_eq!(client.live_streams(), 2);

    peer.send(Frame::new_error(
        0,
        error_code::CONNECTION_ERROR,
        "going away",
    ))
    .await
    .unwrap();

    // Both streams observe the same connection error.
    match pending_response.response().await {
        Err(RmuxError::Connection { code, message }) => {
            assert_eq!(code, error_code::CONNECTION_ERROR);
            assert_eq!(message, "going away");
        }
        other => panic!("unexpected {other:?}"),
    }
    match pending_stream.next().await {
        Some(Err(RmuxError::Connection { code, .. })) => {
            assert_eq!(code, error_code::CONNECTION_ERROR);
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(client.is_closed());
    assert_eq!(client.live_streams(), 0);

    // The dispatcher stopped: later frames are never processed, not even
    // counted as drops.
    peer.send(Frame::new_error(99, error_code::APPLICATION_ERROR, "late"))
        .await
        .ok();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.dropped_frames(), 0);
}

#[tokio::test]
async fn test_cancel_emits_one_cancel_frame() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = quiet_config();
    let client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    let mut peer = raw_accept(server_transport, &config).await;

    let receiver = client
        .request_stream(Payload::new(Bytes::from_static(b"feed")), 4)
        .await
        .unwrap();
    let stream_id = receiver.stream_id();

    let request = next_non_keepalive(&mut peer).await;
    assert_eq!(request.stream_id, stream_id);
    match request.body {
        FrameBody::RequestStream {
            initial_request_n, ..
        } => assert_eq!(initial_request_n, 4),
        other => panic!("unexpected frame {other:?}"),
    }

    receiver.cancel().await.unwrap();
    assert_eq!(client.live_streams(), 0);

    let cancel = next_non_keepalive(&mut peer).await;
    assert_eq!(cancel.stream_id, stream_id);
    assert!(matches!(cancel.body, FrameBody::Cancel));
}

#[tokio::test]
async fn test_payload_beyond_credit_terminates_stream_only() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = quiet_config();
    let client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    let mut peer = raw_accept(server_transport, &config).await;

    let mut receiver = client.request_stream(Payload::empty(), 2).await.unwrap();
    let stream_id = receiver.stream_id();
    next_non_keepalive(&mut peer).await;

    // Spend the granted credit, then overrun it.
    for i in 0..3u8 {
        peer.send(Frame::new_payload_next(stream_id, Payload::new(vec![i])))
            .await
            .unwrap();
    }

    assert!(receiver.next().await.unwrap().is_ok());
    assert!(receiver.next().await.unwrap().is_ok());
    match receiver.next().await {
        Some(Err(RmuxError::ProtocolViolation(_))) => {}
        other => panic!("unexpected {other:?}"),
    }

    // Only the offending stream died; the requester told the peer so.
    assert!(!client.is_closed());
    assert_eq!(client.live_streams(), 0);
    let cancel = next_non_keepalive(&mut peer).await;
    assert_eq!(cancel.stream_id, stream_id);
    assert!(matches!(cancel.body, FrameBody::Cancel));
}

#[tokio::test]
async fn test_unknown_frame_type_is_dropped_not_fatal() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = quiet_config();
    let client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    let mut peer = raw_accept(server_transport, &config).await;

    peer.send(Frame {
        stream_id: 0,
        body: FrameBody::Unknown {
            type_code: 0x3F,
            flags: 0,
            body: Bytes::from_static(b"from the future"),
        },
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while client.dropped_frames() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("frame counted as dropped");
    assert!(!client.is_closed());
}

#[tokio::test]
async fn test_error_for_unknown_stream_is_dropped_not_fatal() {
    let (client_transport, server_transport) = tokio::io::duplex(64 * 1024);
    let config = quiet_config();
    let client = Session::client(client_transport, config.clone(), Payload::empty())
        .await
        .unwrap();
    let mut peer = raw_accept(server_transport, &config).await;

    peer.send(Frame::new_error(
        999,
        error_code::APPLICATION_ERROR,
        "stray",
    ))
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while client.dropped_frames() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("frame counted as dropped");
    assert!(!client.is_closed());

    // The session is still perfectly usable.
    let receiver = client.request_stream(Payload::empty(), 1).await.unwrap();
    assert_eq!(client.live_streams(), 1);
    receiver.cancel().await.unwrap();
}
