//! Item lifecycle management.

use crate::item::PoolItem;

/// Creates, verifies and disposes of pool items.
///
/// The pool awaits all of these operations in background tasks. Any of them may take arbitrary
/// time, and any of them may fail: failures are reported to the pool's error hook, and never
/// poison the pool's internal state.
#[async_trait::async_trait]
pub trait Manager: Send + Sync + 'static {
    /// Item type managed by this pool.
    type Resource: Send + Sync + 'static;
    /// Error type for lifecycle operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new item.
    ///
    /// If you need creation timeouts, implement them here.
    ///
    /// # Errors
    ///
    /// A failed creation releases the capacity it reserved. The pool will try again if there is
    /// still demand, or will hand the error to a waiter, depending on
    /// [`CreateErrorPolicy`](crate::CreateErrorPolicy).
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Check that an item is still valid for use.
    ///
    /// Called before every hand-out of an item. Default implementation considers all items
    /// valid.
    ///
    /// # Errors
    ///
    /// Errors are treated the same as returning `Ok(false)`: the item gets disposed of.
    async fn verify(&self, _item: &PoolItem<Self::Resource>) -> Result<bool, Self::Error> {
        Ok(true)
    }

    /// Dispose of an item.
    ///
    /// Capacity is returned to the pool only after this call finishes. Default implementation
    /// just drops the item.
    ///
    /// # Errors
    ///
    /// Errors are reported, but the item is considered disposed of anyway.
    async fn dispose(&self, _item: &PoolItem<Self::Resource>) -> Result<(), Self::Error> {
        Ok(())
    }
}
