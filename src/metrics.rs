use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram},
    Key, KeyValue, StringValue, Value,
};

/// Central metrics singleton for pool metrics.
pub(crate) static POOL_METRICS: LazyLock<Arc<Metrics>> = LazyLock::new(|| Arc::new(Metrics::new()));

const KEY_POOL_NAME: Key = Key::from_static_str("pulsepool.pool.name");
const KEY_STATE: Key = Key::from_static_str("pulsepool.item.state");

/// Storage for pool metrics.
pub(crate) struct Metrics {
    /// The number of items that are currently in state described by the state attribute.
    item_count: Gauge<u64>,
    /// The maximum number of items allowed.
    item_max: Gauge<u64>,
    /// The minimum number of items to keep.
    item_min: Gauge<u64>,
    /// The number of acquisitions waiting for an item.
    pending: Gauge<u64>,
    /// The time it took to obtain an item from the pool.
    wait_time: Histogram<f64>,
    /// The time between borrowing an item and returning it to the pool.
    use_time: Histogram<f64>,
    /// The number of acquisitions that timed out.
    timeouts: Counter<u64>,
}

impl Metrics {
    /// Create new storage for pool metrics.
    ///
    /// You probably don't need this, as all pools use a central metrics singleton for storage.
    pub(crate) fn new() -> Self {
        let meter = global::meter("pulsepool");
        // pulsepool.pool.name (string)
        // pulsepool.item.state (total / idle / used / creating / verifying / disposing)
        let item_count = meter
            .u64_gauge("pulsepool.item.count")
            .with_description(
                "The number of items that are currently in state described by the state attribute.",
            )
            .build();
        let item_max = meter
            .u64_gauge("pulsepool.item.max")
            .with_description("The maximum number of items allowed.")
            .build();
        let item_min = meter
            .u64_gauge("pulsepool.item.min")
            .with_description("The minimum number of items to keep.")
            .build();
        let pending = meter
            .u64_gauge("pulsepool.pending_requests")
            .with_description("The number of acquisitions waiting for an item.")
            .build();
        let wait_time = meter
            .f64_histogram("pulsepool.wait_time")
            .with_unit("s")
            .with_description("The time it took to obtain an item from the pool.")
            .build();
        let use_time = meter
            .f64_histogram("pulsepool.use_time")
            .with_unit("s")
            .with_description("The time between borrowing an item and returning it to the pool.")
            .build();
        let timeouts = meter
            .u64_counter("pulsepool.timeouts")
            .with_description("The number of acquisitions that timed out.")
            .build();
        Metrics {
            item_count,
            item_max,
            item_min,
            pending,
            wait_time,
            use_time,
            timeouts,
        }
    }

    pub(crate) fn record_status(&self, label: &[KeyValue; 1], status: &PoolStatus) {
        self.item_max.record(status.max_size as u64, label);
        self.item_min.record(status.min_size as u64, label);
        self.pending.record(status.waiting as u64, label);
        for (state, value) in status.item_states() {
            self.item_count
                .record(value as u64, &status_kv(label[0].clone(), state));
        }
    }

    pub(crate) fn record_wait(&self, label: &[KeyValue; 1], wait: Duration) {
        self.wait_time.record(wait.as_secs_f64(), label);
    }

    pub(crate) fn record_use(&self, label: &[KeyValue; 1], used: Duration) {
        self.use_time.record(used.as_secs_f64(), label);
    }

    pub(crate) fn record_timeout(&self, label: &[KeyValue; 1]) {
        self.timeouts.add(1, label);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

pub(crate) fn pool_kv(name: &str) -> [KeyValue; 1] {
    [KeyValue::new(KEY_POOL_NAME, name.to_string())]
}

fn status_kv(name: KeyValue, status: &'static str) -> [KeyValue; 2] {
    [
        name,
        KeyValue::new(KEY_STATE, Value::String(StringValue::from(status))),
    ]
}

/// Snapshot of pool counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum total number of items in the pool.
    pub max_size: usize,
    /// Minimum total number of items the pool tries to keep.
    pub min_size: usize,
    /// Current total number of items, in any state.
    pub size: usize,
    /// Items sitting in the pool, ready to be verified and handed out.
    pub idle: usize,
    /// Items checked out by callers.
    pub in_use: usize,
    /// Items being created.
    pub creating: usize,
    /// Items being verified.
    pub verifying: usize,
    /// Items being disposed of.
    pub disposing: usize,
    /// Pending acquisitions.
    pub waiting: usize,
}

impl PoolStatus {
    /// Item counts keyed by `pulsepool.item.state` attribute value.
    pub(crate) fn item_states(&self) -> [(&'static str, usize); 6] {
        [
            ("total", self.size),
            ("idle", self.idle),
            ("used", self.in_use),
            ("creating", self.creating),
            ("verifying", self.verifying),
            ("disposing", self.disposing),
        ]
    }
}
