//! Integration tests for the protocol session.
//!
//! Each test runs a scripted fake peer on loopback TCP/UDP and drives a
//! real `ProtocolSession` against it.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use fdl_core::{mp, AppIdentity, AppName, PointRequest, SubscriptionTable, SIMM_CATALOG};
use fdl_protocol::{
    app, encode, AckMismatch, DataChannelMode, ErrorCode, Header, Open, PointValues,
    ProtocolSession, Publish, PublishedPoint, RegisterAppAck, SessionConfig, SessionError,
    SessionState, Subscribe, SubscribeAck, SysInit, REGISTRATION_BUDGET,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single peer-side wait
const PEER_WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Helpers
// ============================================================================

fn identity() -> AppIdentity {
    AppIdentity::current("simm".parse::<AppName>().unwrap())
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn config(peer: SocketAddr, data_dest: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::new(peer.to_string(), loopback(), data_dest, identity(), &SIMM_CATALOG);
    config.ack_timeout = Duration::from_millis(300);
    config
}

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind(loopback()).await.expect("bind listener");
    let addr = listener.local_addr().expect("listener addr");
    (listener, addr)
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    timeout(PEER_WAIT, stream.read_exact(&mut header))
        .await
        .expect("frame header in time")
        .expect("read header");
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut frame = header.to_vec();
    frame.resize(4 + len, 0);
    stream.read_exact(&mut frame[4..]).await.expect("read body");
    frame
}

/// Accepts one connection and answers its REGISTER_APP with success.
async fn accept_registration(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.expect("accept");
    let frame = read_frame(&mut stream).await;
    assert_eq!(Header::peek(&frame).unwrap().command_id, app::REGISTER_APP);
    assert_eq!(frame.len(), 13);
    let ack = encode(&RegisterAppAck { error: ErrorCode::Success }).unwrap();
    stream.write_all(&ack).await.unwrap();
    stream
}

async fn registered(config: SessionConfig) -> ProtocolSession {
    let mut session = ProtocolSession::new(config);
    session.connect().await.expect("connect");
    session.register(REGISTRATION_BUDGET).await.expect("register");
    assert_eq!(session.state(), SessionState::Registered);
    session
}

async fn join(peer: JoinHandle<()>) {
    timeout(PEER_WAIT, peer)
        .await
        .expect("peer finished in time")
        .expect("peer did not panic");
}

// ============================================================================
// Registration
// ============================================================================

#[tokio::test]
async fn test_register_within_budget() {
    let (listener, addr) = listener().await;
    let peer = tokio::spawn(async move {
        let _stream = accept_registration(&listener).await;
    });

    let mut session = ProtocolSession::new(config(addr, loopback()));
    session.connect().await.unwrap();
    sleep(Duration::from_millis(50)).await;
    session.register(Duration::from_millis(500)).await.unwrap();
    assert_eq!(session.state(), SessionState::Registered);
    join(peer).await;
}

#[tokio::test]
async fn test_late_registration_sends_nothing() {
    let (listener, addr) = listener().await;
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 32];
        let n = timeout(PEER_WAIT, stream.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0, "no bytes expected before close");
    });

    let mut session = ProtocolSession::new(config(addr, loopback()));
    session.connect().await.unwrap();
    sleep(Duration::from_millis(150)).await;
    let err = session.register(Duration::from_millis(100)).await.unwrap_err();
    assert!(matches!(err, SessionError::RegistrationTimeout { .. }));

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    join(peer).await;
}

#[tokio::test]
async fn test_rejected_registration_reports_every_mismatch() {
    let (listener, addr) = listener().await;
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream).await;
        // wrong command, length 3, error 8, one stray byte
        stream.write_all(&[0, 4, 0, 3, 0, 8, 0]).await.unwrap();
    });

    let mut session = ProtocolSession::new(config(addr, loopback()));
    session.connect().await.unwrap();
    match session.register(REGISTRATION_BUDGET).await {
        Err(SessionError::RegistrationRejected { mismatches }) => {
            assert_eq!(mismatches.len(), 4);
            assert!(mismatches.contains(&AckMismatch::Error(ErrorCode::InvalidMpNumber)));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Connected);
    join(peer).await;
}

#[tokio::test]
async fn test_missing_ack_times_out() {
    let (listener, addr) = listener().await;
    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream).await;
        sleep(Duration::from_millis(600)).await;
    });

    let mut session = ProtocolSession::new(config(addr, loopback()));
    session.connect().await.unwrap();
    let err = session.register(REGISTRATION_BUDGET).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::AckTimeout {
            command: app::REGISTER_APP_ACK,
            ..
        }
    ));
    join(peer).await;
}

// ============================================================================
// Subscriber role
// ============================================================================

#[tokio::test]
async fn test_subscription_with_point_errors_is_rejected() {
    let (listener, addr) = listener().await;
    let peer = tokio::spawn(async move {
        let mut stream = accept_registration(&listener).await;
        let frame = read_frame(&mut stream).await;
        assert_eq!(frame.len(), Subscribe::wire_size(2));
        let ack = SubscribeAck {
            topic_id: 1000,
            error: ErrorCode::InvalidMpNumber,
            mp_errors: vec![ErrorCode::Success, ErrorCode::InvalidMpNumber],
        };
        stream.write_all(&encode(&ack).unwrap()).await.unwrap();
    });

    let mut session = registered(config(addr, loopback())).await;
    let err = session
        .subscribe(&[
            PointRequest::every_period(mp::PFP_VALUE),
            PointRequest::every_period(99),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::SubscriptionRejected {
            topic_id: 1000,
            error_count: 1
        }
    ));
    assert_eq!(session.state(), SessionState::Registered);
    join(peer).await;
}

#[tokio::test]
async fn test_subscriber_streams_matching_topic_only() {
    let (listener, addr) = listener().await;
    let data = UdpSocket::bind(loopback()).await.unwrap();
    let data_addr = data.local_addr().unwrap();

    let peer = tokio::spawn(async move {
        let mut stream = accept_registration(&listener).await;
        read_frame(&mut stream).await;
        let ack = SubscribeAck {
            topic_id: 1000,
            error: ErrorCode::Success,
            mp_errors: vec![ErrorCode::Success],
        };
        stream.write_all(&encode(&ack).unwrap()).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = timeout(PEER_WAIT, data.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(Header::peek(&buf[..n]).unwrap().command_id, app::OPEN);

        for topic_id in [2000, 1000] {
            let publish = Publish {
                topic_id,
                seq_num: 1,
                points: vec![PublishedPoint {
                    mp: mp::PFP_VALUE,
                    values: PointValues::Samples(vec![5]),
                }],
            };
            data.send_to(&encode(&publish).unwrap(), from).await.unwrap();
        }
        // keep the control connection open until the client is done
        sleep(Duration::from_millis(200)).await;
    });

    let mut session = registered(config(addr, data_addr)).await;
    session
        .subscribe(&[PointRequest::every_period(mp::PFP_VALUE)])
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Subscribed);
    session
        .open_data_channel(DataChannelMode::FireAndForget)
        .await
        .unwrap();

    let publish = timeout(PEER_WAIT, session.receive_publish()).await.unwrap().unwrap();
    assert_eq!(publish.topic_id, 1000);
    assert_eq!(publish.points[0].values, PointValues::Samples(vec![5]));
    assert_eq!(session.state(), SessionState::Streaming);
    join(peer).await;
}

#[tokio::test]
async fn test_await_sysinit_ignores_echoed_open() {
    let (listener, addr) = listener().await;
    let data = UdpSocket::bind(loopback()).await.unwrap();
    let data_addr = data.local_addr().unwrap();

    let peer = tokio::spawn(async move {
        let _stream = accept_registration(&listener).await;
        let mut buf = [0u8; 64];
        let (_, from) = timeout(PEER_WAIT, data.recv_from(&mut buf)).await.unwrap().unwrap();
        let echo = encode(&Open { app_id: AppName::from_bytes(*b"aacm") }).unwrap();
        data.send_to(&echo, from).await.unwrap();
        data.send_to(&encode(&SysInit).unwrap(), from).await.unwrap();
        sleep(Duration::from_millis(100)).await;
    });

    let mut session = registered(config(addr, data_addr)).await;
    session
        .open_data_channel(DataChannelMode::AwaitSysInit)
        .await
        .unwrap();
    assert!(session.data_local_addr().is_some());
    join(peer).await;
}

// ============================================================================
// Publisher role
// ============================================================================

#[tokio::test]
async fn test_publisher_answers_subscription_and_publishes() {
    let (listener, addr) = listener().await;
    let data = UdpSocket::bind(loopback()).await.unwrap();
    let data_addr = data.local_addr().unwrap();

    let peer = tokio::spawn(async move {
        let mut stream = accept_registration(&listener).await;

        let request = Subscribe {
            identity: AppIdentity::current(AppName::from_bytes(*b"aacm")),
            seq_num: 7,
            points: vec![
                PointRequest::every_period(mp::PFP_VALUE),
                PointRequest::every_period(mp::TCMP),
            ],
        };
        let mut malformed = encode(&request).unwrap();
        malformed[4 + 9 + 3] = 9;
        stream.write_all(&malformed).await.unwrap();
        stream.write_all(&encode(&request).unwrap()).await.unwrap();

        let ack = read_frame(&mut stream).await;
        assert_eq!(Header::peek(&ack).unwrap().command_id, app::SUBSCRIBE_ACK);
        // topic id 1000, success, two success codes
        assert_eq!(&ack[4..], &[0, 0, 0x03, 0xE8, 0, 0, 0, 0, 0, 0]);

        let mut buf = [0u8; 128];
        let (n, _) = timeout(PEER_WAIT, data.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(Header::peek(&buf[..n]).unwrap().command_id, app::OPEN);
        let (n, _) = timeout(PEER_WAIT, data.recv_from(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 30);
        assert_eq!(Header::peek(&buf[..n]).unwrap().length, 26);
    });

    let mut session = registered(config(addr, data_addr)).await;
    let request = session.receive_subscription().await.unwrap();
    assert_eq!(request.seq_num, 7);
    assert_eq!(request.points.len(), 2);

    let mut table = SubscriptionTable::new(&SIMM_CATALOG);
    let topic = table.validate(&request);
    session.acknowledge_subscription(&topic).await.unwrap();
    assert_eq!(session.state(), SessionState::Subscribed);

    session
        .open_data_channel(DataChannelMode::FireAndForget)
        .await
        .unwrap();
    let written = session
        .publish(&topic, |s| PointValues::Samples(vec![1; s.requested_sample_count as usize]))
        .await
        .unwrap();
    assert_eq!(written, 30);
    assert_eq!(session.state(), SessionState::Streaming);
    join(peer).await;
}

// ============================================================================
// State checks
// ============================================================================

#[tokio::test]
async fn test_operations_out_of_order_are_refused() {
    let mut session = ProtocolSession::new(config(loopback(), loopback()));

    let err = session.heartbeat(1).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            operation: "heartbeat",
            state: SessionState::Disconnected
        }
    ));
    assert!(matches!(
        session.subscribe(&[]).await,
        Err(SessionError::InvalidState { .. })
    ));
    assert!(matches!(
        session.receive_publish().await,
        Err(SessionError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    // bind then drop to get a port nobody listens on
    let addr = {
        let (listener, addr) = listener().await;
        drop(listener);
        addr
    };
    let mut session = ProtocolSession::new(config(addr, loopback()));
    assert!(matches!(
        session.connect().await,
        Err(SessionError::Connect { .. })
    ));
    assert_eq!(session.state(), SessionState::Disconnected);
}
