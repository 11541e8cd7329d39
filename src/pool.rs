//! Resource pool.

use std::{
    fmt,
    future::Future,
    ops::Deref,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{oneshot, watch},
};
use tracing::{debug, debug_span, trace, trace_span, Instrument};

use crate::{
    config::{CreateErrorPolicy, PoolConfig},
    error::{ConfigError, Error, RunError},
    guard::{Pooled, ReleaseState},
    hooks::{Hooks, Phase},
    item::{ItemId, PoolId, PoolItem},
    manager::Manager,
    metrics::{pool_kv, Metrics, PoolStatus, POOL_METRICS},
    state::{Delivery, Lifecycle, State, Work},
};

type ManagerState<M> = State<<M as Manager>::Resource, <M as Manager>::Error>;

/// Shared pool internals.
pub(crate) struct Inner<M: Manager> {
    pub(crate) id: PoolId,
    config: PoolConfig,
    manager: M,
    hooks: Hooks<M::Resource, M::Error>,
    /// Runtime used to run all background work.
    handle: Handle,
    /// Premade label used to record metrics.
    label: [KeyValue; 1],
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
    state: Mutex<ManagerState<M>>,
    /// Flipped to `true` once the pool is disposed.
    disposed: watch::Sender<bool>,
}

impl<M: Manager> Inner<M> {
    fn name(&self) -> &str {
        self.config.label()
    }

    /// Start background work returned from a bookkeeping step.
    ///
    /// Must be called with the state lock released.
    fn execute(self: &Arc<Self>, work: Vec<Work<M::Resource>>) {
        for job in work {
            match job {
                Work::Create => {
                    let span = trace_span!("pool_create", pool = self.name());
                    self.handle
                        .spawn(self.clone().create_item().instrument(span));
                }
                Work::Verify(item) => {
                    let span = trace_span!("pool_verify", pool = self.name(), item = %item.id());
                    self.handle
                        .spawn(self.clone().verify_item(item).instrument(span));
                }
                Work::Dispose(item) => {
                    let span = trace_span!("pool_dispose", pool = self.name(), item = %item.id());
                    self.handle
                        .spawn(self.clone().dispose_item(item).instrument(span));
                }
            }
        }
    }

    /// Restore invariants after a state change.
    ///
    /// Runs the pulse, finishes pool disposal once nothing is left, and updates metrics.
    fn settle(&self, state: &mut ManagerState<M>, work: &mut Vec<Work<M::Resource>>) {
        state.pulse(self.config.min, self.config.max, work);
        if state.lifecycle == Lifecycle::Disposing && state.size == 0 {
            state.lifecycle = Lifecycle::Disposed;
            // Nothing can serve these anymore.
            state.reject_waiters(|| Error::Disposing);
            self.disposed.send_replace(true);
            debug!(pool = self.name(), "pool disposed");
        }
        self.metrics
            .record_status(&self.label, &state.status(self.config.min, self.config.max));
    }

    /// Put an item into the idle stack, arming its expiry timer.
    fn push_idle(self: &Arc<Self>, state: &mut ManagerState<M>, item: PoolItem<M::Resource>) {
        let timer = self.config.idle_timeout.map(|timeout| {
            let weak = Arc::downgrade(self);
            let id = item.id();
            let span = trace_span!("pool_idle_timer", pool = self.name(), item = %id);
            self.handle.spawn(
                async move {
                    tokio::time::sleep(timeout).await;
                    expire_idle(weak, id);
                }
                .instrument(span),
            )
        });
        trace!(item = %item.id(), "item is idle");
        state.push_idle(item, timer);
    }

    /// Route an available item, putting it into the idle stack if there is nothing else to do.
    fn route(
        self: &Arc<Self>,
        state: &mut ManagerState<M>,
        item: PoolItem<M::Resource>,
        work: &mut Vec<Work<M::Resource>>,
    ) {
        if let Some(item) = state.route(item, work) {
            self.push_idle(state, item);
        }
    }

    /// Background task creating a single item.
    async fn create_item(self: Arc<Self>) {
        let result = self.manager.create().await;
        let mut work = Vec::new();
        match result {
            Ok(value) => {
                let mut state = self.state.lock();
                state.creating -= 1;
                let id = state.next_item_id();
                debug!(item = %id, "item created");
                let item = PoolItem::new(self.id, id, value);
                self.route(&mut state, item, &mut work);
                self.settle(&mut state, &mut work);
            }
            Err(err) => {
                self.hooks.error(Phase::Create, &err);
                let mut state = self.state.lock();
                state.creating -= 1;
                state.size -= 1;
                if self.config.create_error == CreateErrorPolicy::FailWaiter {
                    state.fail_uncovered_waiter(Error::Create(err));
                }
                self.settle(&mut state, &mut work);
            }
        }
        self.execute(work);
    }

    /// Background task verifying an item before handing it out.
    async fn verify_item(self: Arc<Self>, item: PoolItem<M::Resource>) {
        let valid = match self.manager.verify(&item).await {
            Ok(valid) => valid,
            Err(err) => {
                self.hooks.error(Phase::Verify, &err);
                false
            }
        };
        let mut work = Vec::new();
        {
            let mut state = self.state.lock();
            state.verifying -= 1;
            if valid {
                trace!("item verified");
                if let Some(item) = state.deliver(item) {
                    if state.is_active() {
                        self.push_idle(&mut state, item);
                    } else {
                        state.start_dispose(item, &mut work);
                    }
                }
            } else {
                debug!("item failed verification");
                state.start_dispose(item, &mut work);
            }
            self.settle(&mut state, &mut work);
        }
        self.execute(work);
    }

    /// Background task disposing of an item.
    async fn dispose_item(self: Arc<Self>, mut item: PoolItem<M::Resource>) {
        if let Err(err) = self.manager.dispose(&item).await {
            self.hooks.error(Phase::Dispose, &err);
        }
        item.mark_disposed();
        let mut work = Vec::new();
        {
            let mut state = self.state.lock();
            state.disposing -= 1;
            state.size -= 1;
            self.settle(&mut state, &mut work);
        }
        debug!("item disposed");
        self.hooks.disposed(&item);
        drop(item);
        self.execute(work);
    }

    /// Return checked out item to the pool.
    pub(crate) fn check_in(self: &Arc<Self>, mut item: PoolItem<M::Resource>, discard: bool) {
        item.mark_released();
        self.hooks.released(&item);
        let mut work = Vec::new();
        {
            let mut state = self.state.lock();
            state.checked_out -= 1;
            if discard {
                state.start_dispose(item, &mut work);
            } else {
                self.route(&mut state, item, &mut work);
            }
            self.settle(&mut state, &mut work);
        }
        self.execute(work);
    }

    pub(crate) fn record_use(&self, used: Duration) {
        self.metrics.record_use(&self.label, used);
    }

    /// Register new acquisition and run the pulse.
    fn enqueue(
        self: &Arc<Self>,
    ) -> Result<(u64, oneshot::Receiver<Delivery<M::Resource, M::Error>>), Error<M::Error>> {
        let (tx, rx) = oneshot::channel();
        let mut work = Vec::new();
        let id = {
            let mut state = self.state.lock();
            if !state.is_active() {
                return Err(Error::Closed);
            }
            let id = state.enqueue(tx);
            self.settle(&mut state, &mut work);
            id
        };
        self.execute(work);
        Ok((id, rx))
    }

    /// Handle acquisition timer expiry.
    ///
    /// Returns `None` if the acquisition was removed from the queue, or the outcome it was
    /// given just before the timer fired.
    fn expire_waiter(
        &self,
        id: u64,
        rx: &mut oneshot::Receiver<Delivery<M::Resource, M::Error>>,
    ) -> Option<Delivery<M::Resource, M::Error>> {
        let mut state = self.state.lock();
        if state.remove_waiter(id) {
            self.metrics
                .record_status(&self.label, &state.status(self.config.min, self.config.max));
            return None;
        }
        drop(state);
        Some(rx.try_recv().unwrap_or(Err(Error::Closed)))
    }

    /// Clean up after an acquisition that was dropped before completing.
    fn abandon_waiter(
        self: &Arc<Self>,
        id: u64,
        rx: &mut oneshot::Receiver<Delivery<M::Resource, M::Error>>,
    ) {
        let mut work = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.remove_waiter(id) {
                rx.close();
                if let Ok(Ok(item)) = rx.try_recv() {
                    // Item was already handed over, take it back.
                    trace!(item = %item.id(), "reclaiming item from abandoned acquisition");
                    state.checked_out -= 1;
                    self.route(&mut state, item, &mut work);
                }
            }
            self.settle(&mut state, &mut work);
        }
        self.execute(work);
    }

    /// Begin pool disposal.
    fn begin_dispose(self: &Arc<Self>, reject_waiting: bool) -> watch::Receiver<bool> {
        let mut work = Vec::new();
        {
            let mut state = self.state.lock();
            if state.lifecycle == Lifecycle::Active {
                debug!(pool = self.name(), "disposing pool");
                state.lifecycle = Lifecycle::Disposing;
            }
            if state.lifecycle == Lifecycle::Disposing {
                for item in state.drain_idle() {
                    state.start_dispose(item, &mut work);
                }
                if reject_waiting {
                    state.reject_waiters(|| Error::Disposing);
                }
                self.settle(&mut state, &mut work);
            }
        }
        self.execute(work);
        self.disposed.subscribe()
    }
}

/// Idle timer expiry: dispose of the item unless that would shrink the pool below minimum.
///
/// Items already on their way out are not counted. The minimum is still approximate, as a
/// failing verification may dispose of another item right after.
fn expire_idle<M: Manager>(weak: Weak<Inner<M>>, id: ItemId) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut work = Vec::new();
    {
        let mut state = inner.state.lock();
        if !state.is_active() || state.size - state.disposing <= inner.config.min {
            return;
        }
        let Some(item) = state.take_idle(id) else {
            return;
        };
        debug!(item = %id, "idle item expired");
        state.start_dispose(item, &mut work);
        inner.settle(&mut state, &mut work);
    }
    inner.execute(work);
}

/// Pending acquisition.
///
/// Removes itself from the waiter queue when dropped unfinished.
struct PendingAcquire<'a, M: Manager> {
    inner: &'a Arc<Inner<M>>,
    id: u64,
    rx: oneshot::Receiver<Delivery<M::Resource, M::Error>>,
    settled: bool,
}

impl<M: Manager> PendingAcquire<'_, M> {
    async fn wait(&mut self, timeout: Option<Duration>) -> Delivery<M::Resource, M::Error> {
        let delivery = match timeout {
            None => (&mut self.rx).await.unwrap_or(Err(Error::Closed)),
            Some(timeout) => match tokio::time::timeout(timeout, &mut self.rx).await {
                Ok(received) => received.unwrap_or(Err(Error::Closed)),
                Err(_) => match self.inner.expire_waiter(self.id, &mut self.rx) {
                    Some(delivery) => delivery,
                    None => {
                        self.settled = true;
                        debug!(?timeout, "acquisition timed out");
                        self.inner.metrics.record_timeout(&self.inner.label);
                        self.inner.hooks.timed_out(timeout);
                        return Err(Error::Timeout(timeout));
                    }
                },
            },
        };
        self.settled = true;
        delivery
    }
}

impl<M: Manager> Drop for PendingAcquire<'_, M> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.abandon_waiter(self.id, &mut self.rx);
        }
    }
}

/// Options for scoped acquisitions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct RunOptions {
    /// Acquisition timeout. Pool default is used if not set.
    pub timeout: Option<Duration>,
    /// Dispose of the item instead of releasing it if the callback returns an error.
    pub dispose_on_error: bool,
}

impl RunOptions {
    /// Set acquisition timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Dispose of the item if the callback returns an error.
    #[must_use]
    pub fn dispose_on_error(mut self) -> Self {
        self.dispose_on_error = true;
        self
    }
}

/// Asynchronous resource pool.
///
/// Cloning is cheap, as all clones refer to the same pool.
pub struct Pool<M: Manager> {
    inner: Arc<Inner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name())
            .field("status", &self.status())
            .finish()
    }
}

impl<M: Manager> Pool<M> {
    /// Create pool with provided configuration and no hooks.
    ///
    /// # Errors
    ///
    /// Returns `Err` if configuration is inconsistent, or if called outside of a Tokio runtime.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, ConfigError> {
        PoolBuilder::new(manager).config(config).build()
    }

    /// Create builder for a pool.
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder::new(manager)
    }

    /// Pool identifier.
    #[must_use]
    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Item manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Current pool size, counting items checked out, idle, and in creation, verification or
    /// disposal.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.lock().size
    }

    /// Number of pending acquisitions.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiting_len()
    }

    /// Number of idle items.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.inner.state.lock().idle_len()
    }

    /// Snapshot of all pool counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner
            .state
            .lock()
            .status(self.inner.config.min, self.inner.config.max)
    }

    /// Whether pool disposal is in progress.
    #[must_use]
    pub fn is_disposing(&self) -> bool {
        self.inner.state.lock().lifecycle == Lifecycle::Disposing
    }

    /// Whether pool disposal has completed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().lifecycle == Lifecycle::Disposed
    }

    /// Acquire an item, waiting no longer than the configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::acquire_timeout`].
    pub async fn acquire(&self) -> Result<Pooled<M>, Error<M::Error>> {
        self.acquire_inner(self.inner.config.acquire_timeout).await
    }

    /// Acquire an item, waiting for a bounded time.
    ///
    /// Acquisitions are fulfilled strictly in order of submission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no item became available in time, [`Error::Closed`] if the
    /// pool is being disposed of, [`Error::Disposing`] if the pool was disposed of while waiting,
    /// or [`Error::Create`] if item creation failed and the pool is configured to report that.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Pooled<M>, Error<M::Error>> {
        self.acquire_inner(Some(timeout)).await
    }

    async fn acquire_inner(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Pooled<M>, Error<M::Error>> {
        let now = Instant::now();
        let span = debug_span!("pool_acquire", pool = self.inner.name());
        async {
            let (id, rx) = self.inner.enqueue()?;
            let mut pending = PendingAcquire {
                inner: &self.inner,
                id,
                rx,
                settled: false,
            };
            let mut item = pending.wait(timeout).await?;
            item.mark_acquired();
            self.inner.hooks.acquired(&item);
            self.inner.metrics.record_wait(&self.inner.label, now.elapsed());
            trace!(item = %item.id(), "item acquired");
            Ok(Pooled::new(self.inner.clone(), item))
        }
        .instrument(span)
        .await
    }

    /// Return item to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ForeignItem`] if the item belongs to a different pool, or
    /// [`Error::DoubleRelease`] if it was already released.
    pub fn release(&self, item: &mut Pooled<M>) -> Result<(), Error<M::Error>> {
        self.check_owner(item)?;
        item.release()
    }

    /// Dispose of an item instead of returning it to the pool.
    ///
    /// # Errors
    ///
    /// See [`Self::release`].
    pub fn discard(&self, item: &mut Pooled<M>) -> Result<(), Error<M::Error>> {
        self.check_owner(item)?;
        item.discard()
    }

    fn check_owner(&self, item: &Pooled<M>) -> Result<(), Error<M::Error>> {
        if item.pool_id() == self.inner.id {
            Ok(())
        } else {
            Err(Error::ForeignItem)
        }
    }

    /// Dispose of the pool.
    ///
    /// Disposal begins immediately: idle items are disposed of, and no new acquisitions are
    /// accepted. Items still checked out are disposed of as they are released. The returned
    /// future resolves once every item is gone.
    ///
    /// Pending acquisitions are rejected with [`Error::Disposing`] if `reject_waiting` is set.
    /// Otherwise they may still be fulfilled while disposal is in progress.
    ///
    /// Calling this more than once is harmless.
    pub fn dispose(&self, reject_waiting: bool) -> impl Future<Output = ()> + Send + 'static {
        let mut disposed = self.inner.begin_dispose(reject_waiting);
        async move {
            // Sender lives as long as the pool internals do.
            let _ = disposed.wait_for(|done| *done).await;
        }
    }

    /// Run a callback with an acquired value, then return it to the pool.
    ///
    /// The item is released exactly once, whether the callback succeeds, fails, or its future is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Acquire`] if acquisition failed, or [`RunError::Callback`] with the
    /// callback's own error.
    pub async fn run<F, U, X>(&self, opts: RunOptions, f: F) -> Result<U, RunError<M::Error, X>>
    where
        F: for<'a> FnOnce(&'a mut M::Resource) -> BoxFuture<'a, Result<U, X>>,
    {
        let mut item = self.acquire_for(&opts).await?;
        let result = f(&mut *item).await;
        finish_run(&mut item, &opts, result)
    }

    /// Run a callback with an acquired item wrapper, then return it to the pool.
    ///
    /// Unlike [`Self::run`], the callback gets access to item metadata. It is allowed to release
    /// or discard the item itself.
    ///
    /// # Errors
    ///
    /// See [`Self::run`].
    pub async fn run_wrapped<F, U, X>(
        &self,
        opts: RunOptions,
        f: F,
    ) -> Result<U, RunError<M::Error, X>>
    where
        F: for<'a> FnOnce(&'a mut Pooled<M>) -> BoxFuture<'a, Result<U, X>>,
    {
        let mut item = self.acquire_for(&opts).await?;
        let result = f(&mut item).await;
        finish_run(&mut item, &opts, result)
    }

    async fn acquire_for(&self, opts: &RunOptions) -> Result<Pooled<M>, Error<M::Error>> {
        self.acquire_inner(opts.timeout.or(self.inner.config.acquire_timeout))
            .await
    }
}

fn finish_run<M: Manager, U, X>(
    item: &mut Pooled<M>,
    opts: &RunOptions,
    result: Result<U, X>,
) -> Result<U, RunError<M::Error, X>> {
    if item.state() == ReleaseState::CheckedOut {
        if result.is_err() && opts.dispose_on_error {
            item.discard()?;
        } else {
            item.release()?;
        }
    }
    result.map_err(RunError::Callback)
}

/// Pool builder.
#[must_use]
pub struct PoolBuilder<M: Manager> {
    manager: M,
    config: PoolConfig,
    hooks: Hooks<M::Resource, M::Error>,
}

impl<M: Manager> PoolBuilder<M> {
    /// Create pool builder with default configuration.
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            config: PoolConfig::default(),
            hooks: Hooks::default(),
        }
    }

    /// Set pool configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set callback called just before an item is handed out.
    pub fn on_acquire<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PoolItem<M::Resource>) + Send + Sync + 'static,
    {
        self.hooks.on_acquire = Some(Box::new(hook));
        self
    }

    /// Set callback called when an item is returned to the pool.
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PoolItem<M::Resource>) + Send + Sync + 'static,
    {
        self.hooks.on_release = Some(Box::new(hook));
        self
    }

    /// Set callback called after an item is disposed of.
    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: Fn(&PoolItem<M::Resource>) + Send + Sync + 'static,
    {
        self.hooks.on_dispose = Some(Box::new(hook));
        self
    }

    /// Set callback called when an acquisition times out.
    pub fn on_timeout<F>(mut self, hook: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.hooks.on_timeout = Some(Box::new(hook));
        self
    }

    /// Set callback called when item creation, verification or disposal fails.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(Phase, &M::Error) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(Box::new(hook));
        self
    }

    /// Build the pool, and start creating items up to the minimum pool size.
    ///
    /// # Errors
    ///
    /// Returns `Err` if configuration is inconsistent, or if called outside of a Tokio runtime.
    pub fn build(self) -> Result<Pool<M>, ConfigError> {
        self.config.validate()?;
        let handle = Handle::try_current()?;
        let label = pool_kv(self.config.label());
        let (disposed, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            id: PoolId::next(),
            config: self.config,
            manager: self.manager,
            hooks: self.hooks,
            handle,
            label,
            metrics: POOL_METRICS.deref().clone(),
            state: Mutex::new(State::default()),
            disposed,
        });
        let mut work = Vec::new();
        {
            let mut state = inner.state.lock();
            inner.settle(&mut state, &mut work);
        }
        inner.execute(work);
        debug!(pool = inner.name(), id = %inner.id, "pool created");
        Ok(Pool { inner })
    }
}
