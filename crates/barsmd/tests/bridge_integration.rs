//! Integration tests for the supervisor messaging bridge.
//!
//! A fake manager (TCP listener plus UDP socket on loopback) plays the
//! AACM side of the handshake and then exchanges control frames with a
//! bridge attached to a real supervisor.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::fs;
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use barsmd::supervisor::launcher;
use barsmd::{
    DirectoryResult, LaunchPolicy, ProcessSupervisor, SupervisorConfig, SupervisorMessagingBridge,
    SUPERVISOR_NAME,
};
use fdl_core::AppName;
use fdl_protocol::{
    decode, encode, ErrorCode, HealthNotice, HealthNoticeAck, ManagerInit, ManagerInitAck,
    Open, ProcessList, RestartAck, RestartRequest, SysInit,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Test Helpers
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

    fn control_addr(&self) -> SocketAddr {
        self.listener.local_addr().unwrap()
    }

    fn data_addr(&self) -> SocketAddr {
        self.data.local_addr().unwrap()
    }

    /// Accepts the bridge and plays the manager's side of the handshake.
    async fn accept_handshake(&self) -> TcpStream {
        let (mut stream, _) = self.listener.accept().await.unwrap();

        let init = read_frame(&mut stream).await;
        decode::<ManagerInit>(&init).unwrap();
        stream.write_all(&encode(&ManagerInitAck).unwrap()).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = self.data.recv_from(&mut buf).await.unwrap();
        let open = decode::<Open>(&buf[..len]).unwrap();
        assert_eq!(open.app_id, SUPERVISOR_NAME);
        self.data.send_to(&encode(&SysInit).unwrap(), from).await.unwrap();

        stream
    }
}

async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let length = usize::from(u16::from_be_bytes([header[2], header[3]]));
    let mut frame = header.to_vec();
    frame.resize(4 + length, 0);
    stream.read_exact(&mut frame[4..]).await.unwrap();
    frame
}

fn apps_with_sleeper() -> (TempDir, Vec<PathBuf>) {
    let root = tempfile::tempdir().unwrap();
    let system = root.path().join("system");
    let apps = root.path().join("apps");
    fs::create_dir(&system).unwrap();
    fs::create_dir(&apps).unwrap();
    let path = apps.join("simm_app");
    fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    (root, vec![system, apps])
}

fn config(manager: &FakeManager, watch_dirs: Vec<PathBuf>) -> SupervisorConfig {
    SupervisorConfig {
        watch_dirs,
        aacm_addr: manager.control_addr().to_string(),
        data_bind: "127.0.0.1:0".parse().unwrap(),
        data_dest: manager.data_addr(),
        launch: LaunchPolicy {
            max_attempts: 5,
            check_period_ms: 100,
            start_ensure_delay_ms: 300,
        },
        ..SupervisorConfig::default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_bridge_lists_processes_and_serves_manager() {
    let manager = FakeManager::bind().await;
    let (_root, dirs) = apps_with_sleeper();
    let config = config(&manager, dirs);
    let cancel = CancellationToken::new();

    let (mut supervisor, handle) = ProcessSupervisor::new(config.clone(), cancel.clone());
    // the manager directory is empty here; only the application runs
    assert_eq!(supervisor.launch_all().await, DirectoryResult::Normal);
    let simm: AppName = "simm".parse().unwrap();
    let pid = supervisor.registry().get(simm).unwrap().process_id.unwrap();
    let supervisor_task = tokio::spawn(supervisor.run());

    let bridge = SupervisorMessagingBridge::new(&config, handle, cancel.clone());
    let bridge_task = tokio::spawn(bridge.run());

    let mut stream = timeout(STEP_TIMEOUT, manager.accept_handshake()).await.unwrap();

    // process listing: the supervisor itself, then the child
    let listing = timeout(STEP_TIMEOUT, read_frame(&mut stream)).await.unwrap();
    let listing = decode::<ProcessList>(&listing).unwrap();
    assert_eq!(listing.entries.len(), 2);
    assert_eq!(listing.entries[0].name, SUPERVISOR_NAME);
    assert_eq!(listing.entries[0].pid, std::process::id());
    assert_eq!(listing.entries[1].name, simm);
    assert_eq!(listing.entries[1].pid, pid);
    assert_eq!(listing.entries[1].state, 1);

    // unknown name
    let request = RestartRequest {
        name: "zzzz".parse().unwrap(),
    };
    stream.write_all(&encode(&request).unwrap()).await.unwrap();
    let ack = timeout(STEP_TIMEOUT, read_frame(&mut stream)).await.unwrap();
    assert_eq!(
        decode::<RestartAck>(&ack).unwrap().error,
        ErrorCode::ManagerToSupervisor
    );

    // the child dies on its own: the manager hears about it
    launcher::terminate(pid).unwrap();
    let notice = timeout(STEP_TIMEOUT, read_frame(&mut stream)).await.unwrap();
    let notice = decode::<HealthNotice>(&notice).unwrap();
    assert_eq!(notice.name, simm);
    assert_eq!(notice.error, ErrorCode::SupervisorToManager);
    let notice_ack = HealthNoticeAck {
        error: ErrorCode::Success,
    };
    stream.write_all(&encode(&notice_ack).unwrap()).await.unwrap();

    // and asks for a restart
    stream
        .write_all(&encode(&RestartRequest { name: simm }).unwrap())
        .await
        .unwrap();
    let ack = timeout(STEP_TIMEOUT, read_frame(&mut stream)).await.unwrap();
    assert_eq!(decode::<RestartAck>(&ack).unwrap().error, ErrorCode::Success);

    cancel.cancel();
    timeout(STEP_TIMEOUT, bridge_task).await.unwrap().unwrap().unwrap();
    timeout(STEP_TIMEOUT, supervisor_task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bridge_gives_up_without_sysinit() {
    let manager = FakeManager::bind().await;
    let root = tempfile::tempdir().unwrap();
    let config = config(&manager, vec![root.path().to_path_buf()]);
    let cancel = CancellationToken::new();
    let (_supervisor, handle) = ProcessSupervisor::new(config.clone(), cancel.clone());

    let bridge = SupervisorMessagingBridge::new(&config, handle, cancel.clone());
    let bridge_task = tokio::spawn(bridge.run());

    let (mut stream, _) = manager.listener.accept().await.unwrap();
    read_frame(&mut stream).await;
    stream.write_all(&encode(&ManagerInitAck).unwrap()).await.unwrap();
    // OPEN arrives, SYSINIT never does

    let result = timeout(STEP_TIMEOUT, bridge_task).await.unwrap().unwrap();
    assert!(result.is_err());
    cancel.cancel();
}
