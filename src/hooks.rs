//! Observability hooks.

use std::{fmt, time::Duration};

use crate::item::PoolItem;

/// Item lifecycle phase in which an error happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Phase {
    /// [`Manager::create`](crate::Manager::create) failed.
    Create,
    /// [`Manager::verify`](crate::Manager::verify) failed.
    Verify,
    /// [`Manager::dispose`](crate::Manager::dispose) failed.
    Dispose,
}

impl Phase {
    /// Phase name, as used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Verify => "verify",
            Self::Dispose => "dispose",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ItemHook<T> = Box<dyn Fn(&PoolItem<T>) + Send + Sync>;
type TimeoutHook = Box<dyn Fn(Duration) + Send + Sync>;
type ErrorHook<E> = Box<dyn Fn(Phase, &E) + Send + Sync>;

/// User-supplied callbacks.
///
/// Hooks are never called while pool state is locked, so they may inspect the pool. They must
/// not panic.
pub(crate) struct Hooks<T, E> {
    pub(crate) on_acquire: Option<ItemHook<T>>,
    pub(crate) on_release: Option<ItemHook<T>>,
    pub(crate) on_dispose: Option<ItemHook<T>>,
    pub(crate) on_timeout: Option<TimeoutHook>,
    pub(crate) on_error: Option<ErrorHook<E>>,
}

impl<T, E> Default for Hooks<T, E> {
    fn default() -> Self {
        Self {
            on_acquire: None,
            on_release: None,
            on_dispose: None,
            on_timeout: None,
            on_error: None,
        }
    }
}

impl<T, E: fmt::Display> Hooks<T, E> {
    pub(crate) fn acquired(&self, item: &PoolItem<T>) {
        if let Some(hook) = &self.on_acquire {
            hook(item);
        }
    }

    pub(crate) fn released(&self, item: &PoolItem<T>) {
        if let Some(hook) = &self.on_release {
            hook(item);
        }
    }

    pub(crate) fn disposed(&self, item: &PoolItem<T>) {
        if let Some(hook) = &self.on_dispose {
            hook(item);
        }
    }

    pub(crate) fn timed_out(&self, timeout: Duration) {
        if let Some(hook) = &self.on_timeout {
            hook(timeout);
        }
    }

    /// Report lifecycle error.
    ///
    /// Errors are always logged, whether a hook is installed or not.
    pub(crate) fn error(&self, phase: Phase, err: &E) {
        tracing::warn!(phase = phase.as_str(), "pool item {phase} failed: {err}");
        if let Some(hook) = &self.on_error {
            hook(phase, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::item::{ItemId, PoolId};

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Create.to_string(), "create");
        assert_eq!(Phase::Verify.as_str(), "verify");
        assert_eq!(Phase::Dispose.as_str(), "dispose");
    }

    #[test]
    fn missing_hooks_are_noop() {
        let hooks: Hooks<u32, std::io::Error> = Hooks::default();
        let item = PoolItem::new(PoolId::next(), ItemId(0), 1);
        hooks.acquired(&item);
        hooks.released(&item);
        hooks.disposed(&item);
        hooks.timed_out(Duration::from_secs(1));
        hooks.error(Phase::Create, &std::io::Error::other("boom"));
    }

    #[test]
    fn hooks_are_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut hooks: Hooks<u32, std::io::Error> = Hooks::default();
        let counter = calls.clone();
        hooks.on_release = Some(Box::new(move |item| {
            assert_eq!(*item.value(), 5);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = calls.clone();
        hooks.on_error = Some(Box::new(move |phase, _| {
            assert_eq!(phase, Phase::Dispose);
            counter.fetch_add(10, Ordering::SeqCst);
        }));
        let item = PoolItem::new(PoolId::next(), ItemId(0), 5);
        hooks.released(&item);
        hooks.acquired(&item);
        hooks.error(Phase::Dispose, &std::io::Error::other("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }
}
