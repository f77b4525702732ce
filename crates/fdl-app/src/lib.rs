//! FDL App - Publisher and subscriber runtimes
//!
//! This library runs one application on top of a [`fdl_protocol::ProtocolSession`]:
//!
//! 1. **Publisher**: serves a measurement-point catalog, answering SUBSCRIBE
//!    requests and publishing ready topics on every tick
//! 2. **Subscriber**: subscribes to a peer's catalog and receives its PUBLISH datagrams
//! 3. **Sampler**: keeps the shared sample store fresh for the publisher
//!
//! All tasks respect a shared `CancellationToken` for graceful shutdown.

pub mod client;
pub mod config;
pub mod error;
pub mod publisher;
pub mod samples;
pub mod subscriber;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use publisher::Publisher;
pub use samples::{run_sampler, Sample, SampleSource, SampleStore, SharedSampleStore, SyntheticSource};
pub use subscriber::Subscriber;
