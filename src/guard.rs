//! Checked out pool items.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::Arc,
    time::Instant,
};

use crate::{
    error::Error,
    item::{PoolId, PoolItem},
    manager::Manager,
    pool::Inner,
};

/// Release state of a checked out item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseState {
    /// Item is held by the caller.
    CheckedOut,
    /// Item was returned to the pool.
    Released,
    /// Item was handed over for disposal.
    Disposed,
}

/// Item checked out from a [`Pool`](crate::Pool).
///
/// Dereferences to the pooled value. The item goes back to the pool when released explicitly,
/// or when this guard is dropped.
///
/// A released or discarded guard no longer holds the item: dereferencing it, or calling
/// [`Self::item`], panics. Use [`Self::try_item`] or [`Self::state`] to check first.
pub struct Pooled<M: Manager> {
    /// Originating pool.
    pool: Arc<Inner<M>>,
    /// Present while checked out.
    item: Option<PoolItem<M::Resource>>,
    state: ReleaseState,
    /// Checkout time.
    // This is different from time used in wait_time metric.
    time: Instant,
}

impl<M: Manager> Pooled<M> {
    pub(crate) fn new(pool: Arc<Inner<M>>, item: PoolItem<M::Resource>) -> Self {
        Self {
            pool,
            item: Some(item),
            state: ReleaseState::CheckedOut,
            time: Instant::now(),
        }
    }

    /// Current release state.
    #[must_use]
    pub fn state(&self) -> ReleaseState {
        self.state
    }

    /// Identifier of the originating pool.
    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        self.pool.id
    }

    /// Item metadata, or `None` if the item was already released.
    #[must_use]
    pub fn try_item(&self) -> Option<&PoolItem<M::Resource>> {
        self.item.as_ref()
    }

    /// Item metadata.
    ///
    /// # Panics
    ///
    /// Panics if the item was already released.
    #[must_use]
    pub fn item(&self) -> &PoolItem<M::Resource> {
        self.item
            .as_ref()
            .expect("pool item accessed after release")
    }

    /// Return the item to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DoubleRelease`] if the item was already released or discarded.
    pub fn release(&mut self) -> Result<(), Error<M::Error>> {
        self.check_in(false)
    }

    /// Dispose of the item instead of returning it to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DoubleRelease`] if the item was already released or discarded.
    pub fn discard(&mut self) -> Result<(), Error<M::Error>> {
        self.check_in(true)
    }

    fn check_in(&mut self, discard: bool) -> Result<(), Error<M::Error>> {
        if self.state != ReleaseState::CheckedOut {
            return Err(Error::DoubleRelease);
        }
        let item = self.item.take().ok_or(Error::DoubleRelease)?;
        self.state = if discard {
            ReleaseState::Disposed
        } else {
            ReleaseState::Released
        };
        // Record time spent outside the pool.
        self.pool.record_use(self.time.elapsed());
        self.pool.check_in(item, discard);
        Ok(())
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        self.item().value()
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.item
            .as_mut()
            .expect("pool item accessed after release")
            .value_mut()
    }
}

impl<M: Manager> fmt::Debug for Pooled<M>
where
    M::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.pool.id)
            .field("state", &self.state)
            .field("item", &self.item)
            .finish()
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if self.state == ReleaseState::CheckedOut {
            let _ = self.check_in(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Manager, Pool, PoolConfig, ReleaseState};

    struct Numbers;

    #[async_trait::async_trait]
    impl Manager for Numbers {
        type Resource = u32;
        type Error = std::io::Error;

        async fn create(&self) -> Result<u32, std::io::Error> {
            Ok(7)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn released_guard_is_empty() {
        let pool = Pool::new(Numbers, PoolConfig::new(1)).unwrap();
        let mut item = pool.acquire().await.unwrap();
        assert_eq!(*item, 7);
        *item += 1;
        assert_eq!(item.try_item().map(|i| *i.value()), Some(8));
        item.release().unwrap();
        assert_eq!(item.state(), ReleaseState::Released);
        assert!(item.try_item().is_none());
    }

    #[tokio::test(start_paused = true)]
    #[should_panic(expected = "pool item accessed after release")]
    async fn deref_after_release_panics() {
        let pool = Pool::new(Numbers, PoolConfig::new(1)).unwrap();
        let mut item = pool.acquire().await.unwrap();
        pool.release(&mut item).unwrap();
        assert_eq!(*item, 7);
    }
}
