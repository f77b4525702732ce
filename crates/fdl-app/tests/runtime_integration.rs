//! Integration tests for the publisher and subscriber runtimes.
//!
//! A fake manager on loopback plays the other side of each exchange.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use fdl_app::{AppConfig, Publisher, SampleStore, Subscriber};
use fdl_core::{mp, AppIdentity, AppName, PointRequest, FDL_CATALOG, SIMM_CATALOG};
use fdl_protocol::{
    app, decode, encode, ErrorCode, Header, PointValues, Publish, PublishLayout, PublishedPoint,
    RegisterAppAck, RegisterData, RegisterDataAck, Subscribe, SubscribeAck,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const PEER_WAIT: Duration = Duration::from_secs(3);

// ============================================================================
// Fake manager
// ============================================================================

struct FakeManager {
    listener: TcpListener,
    data: UdpSocket,
}

impl FakeManager {
    async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            data: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    fn config(&self, app_name: &str) -> AppConfig {
        AppConfig {
            app_name: app_name.parse().unwrap(),
            peer_addr: self.listener.local_addr().unwrap().to_string(),
            data_bind: "127.0.0.1:0".parse().unwrap(),
            data_dest: self.data.local_addr().unwrap(),
            publish_interval: Duration::from_millis(50),
            ack_timeout: Duration::from_secs(1),
            ..AppConfig::default()
        }
    }

    async fn accept_registration(&self) -> TcpStream {
        let (mut stream, _) = timeout(PEER_WAIT, self.listener.accept()).await.unwrap().unwrap();
        let frame = read_frame(&mut stream).await;
        assert_eq!(Header::peek(&frame).unwrap().command_id, app::REGISTER_APP);
        let ack = encode(&RegisterAppAck { error: ErrorCode::Success }).unwrap();
        stream.write_all(&ack).await.unwrap();
        stream
    }

    async fn recv_datagram(&self) -> (Vec<u8>, SocketAddr) {
        let mut buf = [0u8; 1000];
        let (n, from) = timeout(PEER_WAIT, self.data.recv_from(&mut buf)).await.unwrap().unwrap();
        (buf[..n].to_vec(), from)
    }
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    timeout(PEER_WAIT, stream.read_exact(&mut header)).await.unwrap().unwrap();
    let len = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut frame = header.to_vec();
    frame.resize(4 + len, 0);
    stream.read_exact(&mut frame[4..]).await.unwrap();
    frame
}

/// Reads frames until one with `command` arrives, counting skipped heartbeats.
async fn read_until(stream: &mut TcpStream, command: u16) -> (Vec<u8>, usize) {
    let mut heartbeats = 0;
    loop {
        let frame = read_frame(stream).await;
        match Header::peek(&frame).unwrap().command_id {
            c if c == command => return (frame, heartbeats),
            app::HEARTBEAT => heartbeats += 1,
            other => panic!("unexpected command {other:#06x}"),
        }
    }
}

// ============================================================================
// Publisher
// ============================================================================

#[tokio::test]
async fn test_publisher_serves_a_subscription() {
    let manager = FakeManager::bind().await;
    let config = manager.config("simm");
    let cancel = CancellationToken::new();

    let manager_task = tokio::spawn(async move {
        let mut stream = manager.accept_registration().await;

        let frame = read_frame(&mut stream).await;
        let register: RegisterData = decode(&frame).unwrap();
        assert_eq!(register.mps.len(), SIMM_CATALOG.entries.len());
        let ack = RegisterDataAck {
            error: ErrorCode::Success,
            mp_errors: vec![ErrorCode::Success; register.mps.len()],
        };
        stream.write_all(&encode(&ack).unwrap()).await.unwrap();

        let (open, _) = manager.recv_datagram().await;
        assert_eq!(Header::peek(&open).unwrap().command_id, app::OPEN);

        let request = Subscribe {
            identity: AppIdentity::current(AppName::from_bytes(*b"aacm")),
            seq_num: 1,
            points: vec![
                PointRequest::every_period(mp::PFP_VALUE),
                PointRequest::every_period(mp::TCMP),
            ],
        };
        stream.write_all(&encode(&request).unwrap()).await.unwrap();
        let (ack, _) = read_until(&mut stream, app::SUBSCRIBE_ACK).await;
        let ack: SubscribeAck = decode(&ack).unwrap();
        assert_eq!(ack.topic_id, 1000);
        assert_eq!(ack.error_count(), 0);

        let layout = PublishLayout::from_requests(&SIMM_CATALOG, &request.points);
        let (datagram, _) = manager.recv_datagram().await;
        assert_eq!(datagram.len(), 30);
        let publish = Publish::decode(&datagram, &layout).unwrap();
        assert_eq!(publish.topic_id, 1000);
        assert_eq!(publish.points.len(), 2);

        // the next tick brings another heartbeat
        let mut buf = [0u8; 8];
        timeout(PEER_WAIT, stream.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(Header::peek(&buf).unwrap().command_id, app::HEARTBEAT);
    });

    let publisher = Publisher::start(config, SampleStore::shared(), cancel.clone())
        .await
        .unwrap();
    assert_eq!(publisher.heartbeat_counter(), 0);
    let run = tokio::spawn(publisher.run());

    timeout(PEER_WAIT, manager_task).await.unwrap().unwrap();
    cancel.cancel();
    timeout(PEER_WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_publisher_rejects_mixed_periods() {
    let manager = FakeManager::bind().await;
    let config = manager.config("simm");
    let cancel = CancellationToken::new();

    let manager_task = tokio::spawn(async move {
        let mut stream = manager.accept_registration().await;
        let frame = read_frame(&mut stream).await;
        let register: RegisterData = decode(&frame).unwrap();
        let ack = RegisterDataAck {
            error: ErrorCode::Success,
            mp_errors: vec![ErrorCode::Success; register.mps.len()],
        };
        stream.write_all(&encode(&ack).unwrap()).await.unwrap();
        manager.recv_datagram().await;

        let request = Subscribe {
            identity: AppIdentity::current(AppName::from_bytes(*b"aacm")),
            seq_num: 2,
            points: vec![
                PointRequest::new(mp::PFP_VALUE, 1000, 1),
                PointRequest::new(mp::TCMP, 2000, 2),
            ],
        };
        stream.write_all(&encode(&request).unwrap()).await.unwrap();
        let (ack, _) = read_until(&mut stream, app::SUBSCRIBE_ACK).await;
        let ack: SubscribeAck = decode(&ack).unwrap();
        assert_eq!(ack.topic_id, -1);
        assert_eq!(ack.error, ErrorCode::InvalidMpNumber);
        assert_eq!(ack.error_count(), 2);
    });

    let publisher = Publisher::start(config, SampleStore::shared(), cancel.clone())
        .await
        .unwrap();
    let run = tokio::spawn(publisher.run());
    timeout(PEER_WAIT, manager_task).await.unwrap().unwrap();
    cancel.cancel();
    timeout(PEER_WAIT, run).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_publisher_survives_oversized_subscription() {
    let manager = FakeManager::bind().await;
    let config = manager.config("simm");
    let cancel = CancellationToken::new();

    let manager_task = tokio::spawn(async move {
        let mut stream = manager.accept_registration().await;
        let frame = read_frame(&mut stream).await;
        let register: RegisterData = decode(&frame).unwrap();
        let ack = RegisterDataAck {
            error: ErrorCode::Success,
            mp_errors: vec![ErrorCode::Success; register.mps.len()],
        };
        stream.write_all(&encode(&ack).unwrap()).await.unwrap();
        manager.recv_datagram().await;

        // five points of 60 samples need more than one datagram
        let request = Subscribe {
            identity: AppIdentity::current(AppName::from_bytes(*b"aacm")),
            seq_num: 3,
            points: [mp::PFP_VALUE, mp::PTLT_TEMPERATURE, mp::PTRT_TEMPERATURE, mp::TCMP, mp::COP_PRESSURE]
                .into_iter()
                .map(|id| PointRequest::new(id, 60_000, 60))
                .collect(),
        };
        stream.write_all(&encode(&request).unwrap()).await.unwrap();
        let (ack, _) = read_until(&mut stream, app::SUBSCRIBE_ACK).await;
        let ack: SubscribeAck = decode(&ack).unwrap();
        assert_eq!(ack.topic_id, -1);
        assert_eq!(ack.error_count(), 5);

        // the publisher keeps ticking and still serves a sane topic
        let request = Subscribe {
            identity: AppIdentity::current(AppName::from_bytes(*b"aacm")),
            seq_num: 4,
            points: vec![PointRequest::every_period(mp::TCMP)],
        };
        stream.write_all(&encode(&request).unwrap()).await.unwrap();
        let (ack, _) = read_until(&mut stream, app::SUBSCRIBE_ACK).await;
        let ack: SubscribeAck = decode(&ack).unwrap();
        assert_eq!(ack.topic_id, 1001);
        assert_eq!(ack.error_count(), 0);

        read_until(&mut stream, app::HEARTBEAT).await;
        let (datagram, _) = manager.recv_datagram().await;
        let layout = PublishLayout::from_requests(&SIMM_CATALOG, &request.points);
        assert_eq!(Publish::decode(&datagram, &layout).unwrap().topic_id, 1001);
    });

    let publisher = Publisher::start(config, SampleStore::shared(), cancel.clone())
        .await
        .unwrap();
    let run = tokio::spawn(publisher.run());
    timeout(PEER_WAIT, manager_task).await.unwrap().unwrap();
    assert!(!run.is_finished());
    cancel.cancel();
    timeout(PEER_WAIT, run).await.unwrap().unwrap().unwrap();
}

// ============================================================================
// Subscriber
// ============================================================================

#[tokio::test]
async fn test_subscriber_receives_published_points() {
    let manager = FakeManager::bind().await;
    let config = AppConfig {
        catalog: &FDL_CATALOG,
        ..manager.config("fdl")
    };
    let cancel = CancellationToken::new();

    let manager_task = tokio::spawn(async move {
        let mut stream = manager.accept_registration().await;
        let (_, from) = manager.recv_datagram().await;

        let frame = read_frame(&mut stream).await;
        let request: Subscribe = decode(&frame).unwrap();
        assert_eq!(request.points.len(), FDL_CATALOG.max_subscription);
        assert!(request.points.iter().all(|p| p.period_ms == 1000 && p.sample_count == 1));

        let ack = SubscribeAck {
            topic_id: 1000,
            error: ErrorCode::Success,
            mp_errors: vec![ErrorCode::Success; request.points.len()],
        };
        stream.write_all(&encode(&ack).unwrap()).await.unwrap();

        let publish = Publish {
            topic_id: 1000,
            seq_num: 0,
            points: request
                .points
                .iter()
                .map(|p| PublishedPoint {
                    mp: p.mp,
                    values: PointValues::Samples(vec![p.mp]),
                })
                .collect(),
        };
        manager.data.send_to(&encode(&publish).unwrap(), from).await.unwrap();
        // hold the control connection until the test is done
        tokio::time::sleep(Duration::from_millis(300)).await;
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = Subscriber::start(config, cancel.clone()).await.unwrap().with_events(tx);
    assert_eq!(subscriber.topic_id(), 1000);
    let run = tokio::spawn(subscriber.run());

    let publish = timeout(PEER_WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(publish.points.len(), 14);
    assert_eq!(publish.value_count(), 14);

    cancel.cancel();
    let received = timeout(PEER_WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(received, 1);
    manager_task.await.unwrap();
}
