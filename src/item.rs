//! Pool item record and identifiers.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::SystemTime,
};

/// Unique identifier of a pool instance within the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    /// Allocate next unused pool identifier.
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Identifier of an item, unique within its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub(crate) u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Pooled value along with its lifecycle metadata.
///
/// A shared reference to this is what manager callbacks and hooks receive: it allows
/// inspecting the item, but not releasing it.
#[derive(Debug)]
pub struct PoolItem<T> {
    id: ItemId,
    pool: PoolId,
    value: T,
    created_at: SystemTime,
    last_acquired_at: Option<SystemTime>,
    last_released_at: Option<SystemTime>,
    disposed_at: Option<SystemTime>,
    uses: u64,
}

impl<T> PoolItem<T> {
    /// Wrap freshly created value.
    pub(crate) fn new(pool: PoolId, id: ItemId, value: T) -> Self {
        Self {
            id,
            pool,
            value,
            created_at: SystemTime::now(),
            last_acquired_at: None,
            last_released_at: None,
            disposed_at: None,
            uses: 0,
        }
    }

    /// Item identifier.
    #[must_use]
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Identifier of the pool this item belongs to.
    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    /// Wrapped value, as created by [`Manager::create`](crate::Manager::create).
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Initial creation time of this item.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Last acquisition time, or `None` if the item was never handed out.
    #[must_use]
    pub fn last_acquired_at(&self) -> Option<SystemTime> {
        self.last_acquired_at
    }

    /// Last release time, or `None` if the item was never returned to the pool.
    #[must_use]
    pub fn last_released_at(&self) -> Option<SystemTime> {
        self.last_released_at
    }

    /// Disposal time.
    ///
    /// Only set when the item is seen by the disposal hook.
    #[must_use]
    pub fn disposed_at(&self) -> Option<SystemTime> {
        self.disposed_at
    }

    /// Number of completed acquire/release cycles.
    ///
    /// Zero on the first acquisition.
    #[must_use]
    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub(crate) fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub(crate) fn mark_acquired(&mut self) {
        self.last_acquired_at = Some(SystemTime::now());
    }

    pub(crate) fn mark_released(&mut self) {
        self.uses += 1;
        self.last_released_at = Some(SystemTime::now());
    }

    pub(crate) fn mark_disposed(&mut self) {
        self.disposed_at = Some(SystemTime::now());
    }
}
