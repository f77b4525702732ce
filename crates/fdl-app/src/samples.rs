//! Latest sampled values, shared between the sampler and the publisher.
//!
//! The publisher holds the store's lock for a whole publish tick, so a
//! PUBLISH never mixes values from two sampling passes.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fdl_core::{Catalog, CatalogEntry, MpId, MpKind, Subscription, TIMESTAMP_BURST_LEN};
use fdl_protocol::PointValues;

/// How many past values are kept per logical point.
pub const HISTORY_LEN: usize = 60;

/// One reading for one point.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    /// Raw 32-bit value of a logical point.
    Value(u32),
    /// Stamps captured since the previous pass.
    Burst(Vec<u32>),
}

/// Produces readings for catalog points.
pub trait SampleSource: Send + 'static {
    fn read(&mut self, entry: &CatalogEntry) -> Sample;
}

/// Per-point values, most recent last.
#[derive(Debug, Default)]
pub struct SampleStore {
    history: HashMap<MpId, VecDeque<u32>>,
    bursts: HashMap<MpId, Vec<u32>>,
    passes: u64,
}

pub type SharedSampleStore = Arc<Mutex<SampleStore>>;

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSampleStore {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn record(&mut self, mp: MpId, sample: Sample) {
        match sample {
            Sample::Value(value) => {
                let history = self.history.entry(mp).or_default();
                if history.len() == HISTORY_LEN {
                    history.pop_front();
                }
                history.push_back(value);
            }
            Sample::Burst(stamps) => {
                self.bursts.insert(mp, stamps);
            }
        }
    }

    /// Reads every catalog point from `source` once.
    pub fn refresh(&mut self, catalog: &Catalog, source: &mut dyn SampleSource) {
        for entry in catalog.entries {
            self.record(entry.id, source.read(entry));
        }
        self.passes = self.passes.saturating_add(1);
    }

    /// Completed refresh passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Values to publish for one subscription.
    ///
    /// Logical points get exactly `requested_sample_count` values, the
    /// newest last, zero-filled at the front while history is short.
    pub fn values_for(&self, subscription: &Subscription) -> PointValues {
        let mp = subscription.measurement_point_id;
        match subscription.kind {
            MpKind::Timestamp => PointValues::stamps(self.bursts.get(&mp).map(Vec::as_slice).unwrap_or_default()),
            MpKind::Logical => {
                let wanted = subscription.requested_sample_count as usize;
                let history = self.history.get(&mp);
                let available = history.map_or(0, VecDeque::len);
                let mut values = vec![0; wanted.saturating_sub(available)];
                if let Some(history) = history {
                    values.extend(history.iter().skip(available.saturating_sub(wanted)));
                }
                PointValues::Samples(values)
            }
        }
    }
}

/// Deterministic stand-in for the sensor layer.
///
/// Logical points follow a slow sine wave, one phase step per pass, as
/// `f32` bits. Timestamp points get a full burst of wall-clock seconds or
/// nanoseconds.
#[derive(Debug, Default)]
pub struct SyntheticSource {
    step: u32,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleSource for SyntheticSource {
    fn read(&mut self, entry: &CatalogEntry) -> Sample {
        self.step = self.step.wrapping_add(1);
        match entry.kind {
            MpKind::Logical => {
                let phase = (self.step % 360) as f32 / 360.0 * TAU;
                let offset = (entry.id % 100) as f32;
                Sample::Value((offset + phase.sin()).to_bits())
            }
            MpKind::Timestamp => {
                let now = Utc::now();
                let nsec_point = entry.name.contains("NSEC");
                let burst = (0..TIMESTAMP_BURST_LEN as u32)
                    .map(|i| {
                        if nsec_point {
                            now.timestamp_subsec_nanos().saturating_add(i).max(1)
                        } else {
                            u32::try_from(now.timestamp()).unwrap_or(u32::MAX)
                        }
                    })
                    .collect();
                Sample::Burst(burst)
            }
        }
    }
}

/// Refreshes `store` from `source` every `period` until cancelled.
pub async fn run_sampler<S: SampleSource>(
    store: SharedSampleStore,
    catalog: &'static Catalog,
    mut source: S,
    period: Duration,
    cancel_token: CancellationToken,
) {
    info!(catalog = catalog.family, period = ?period, "Sampler started");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                info!("Sampler shutting down");
                return;
            }

            _ = ticker.tick() => {
                let mut store = store.lock().await;
                store.refresh(catalog, &mut source);
                debug!(passes = store.passes(), "Samples refreshed");
            }
        }
    }
}
