//! FDL Core - Shared domain types for the FDL/SIMM protocol and BARSM
//!
//! This crate provides the types shared between the wire protocol,
//! the application runtime and the supervisor daemon: application
//! identity, measurement-point catalogs, subscriptions and topics, the
//! publish planner, and supervised child records.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod app;
pub mod catalog;
pub mod child;
pub mod error;
pub mod subscription;
pub mod table;

// Re-exports for convenience
pub use app::{AppIdentity, AppName, HostOs};
pub use catalog::{
    mp, Catalog, CatalogEntry, MpId, MpKind, FDL_CATALOG, MINIMUM_PERIOD_MS, SIMM_CATALOG,
    TIMESTAMP_BURST_LEN,
};
pub use child::{ChildProcess, ChildRole, LivenessState};
pub use error::{DomainError, DomainResult};
pub use subscription::{
    is_schedulable, PointRequest, Subscription, SubscriptionRequest, Topic, TopicId,
    INVALID_TOPIC_ID, MAX_PUBLISH_SIZE, TOPIC_ID_BASE,
};
pub use table::{publish_manager, variance_of_periods, SubscriptionTable, MAX_TOPICS};
