//! BARSM daemon - launches, watches and restarts the unit's applications
//!
//! - `supervisor` - `ProcessSupervisor` control loop, child registry, reaper
//! - `bridge` - messaging bridge to the application manager (AACM)
//! - `monitor` - periodic CPU/memory sampling of the fleet
//! - `config` - TOML configuration
//! - `state` - pid file and registry snapshot
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         barsm daemon                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────────┐ commands  ┌──────────────────────────┐ │
//! │  │ MessagingBridge  │──────────▶│    ProcessSupervisor     │ │
//! │  │ (TCP+UDP to AACM)│◀──────────│  (owns ChildRegistry)    │ │
//! │  └──────────────────┘  events   └────────────┬─────────────┘ │
//! │                                     ChildExit │              │
//! │  ┌──────────────────┐ snapshot  ┌────────────┴─────────────┐ │
//! │  │   FleetMonitor   │──────────▶│     Reaper (JoinSet)     │ │
//! │  └──────────────────┘           └──────────────────────────┘ │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod bridge;
pub mod config;
pub mod monitor;
pub mod state;
pub mod supervisor;

pub use bridge::{spawn_bridge, BridgeError, SupervisorMessagingBridge, SUPERVISOR_NAME};
pub use config::{ConfigError, LaunchPolicy, MonitorThresholds, SupervisorConfig};
pub use monitor::{spawn_monitor_task, ChildMetrics, FleetMonitor};
pub use state::{RegistrySnapshot, StateError, StateStore};
pub use supervisor::{
    CheckReport, ChildExit, ChildRegistry, DirectoryResult, ProcessSupervisor, SupervisorCommand,
    SupervisorError, SupervisorEvent, SupervisorHandle,
};
