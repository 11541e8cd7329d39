//! Internal pool bookkeeping.
//!
//! Everything here runs with the pool state locked, and never awaits. Work that has to call
//! into the [`Manager`](crate::Manager) is returned as a list of [`Work`] items to be started
//! after the lock is released.

use std::{collections::VecDeque, iter};

use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    error::Error,
    item::{ItemId, PoolItem},
    metrics::PoolStatus,
};

/// Outcome delivered to a pending acquisition.
pub(crate) type Delivery<T, E> = Result<PoolItem<T>, Error<E>>;

/// Pool lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Active,
    Disposing,
    /// Terminal.
    Disposed,
}

/// Background work to start once the state lock is released.
pub(crate) enum Work<T> {
    /// Create a new item. Capacity is already reserved.
    Create,
    /// Verify an item, then hand it to the oldest waiter.
    Verify(PoolItem<T>),
    /// Dispose of an item, then return its capacity.
    Dispose(PoolItem<T>),
}

/// Pending acquisition.
struct Waiter<T, E> {
    id: u64,
    tx: oneshot::Sender<Delivery<T, E>>,
}

/// Item sitting in the idle stack.
struct IdleItem<T> {
    item: PoolItem<T>,
    /// Idle expiry timer, if configured.
    timer: Option<JoinHandle<()>>,
}

impl<T> IdleItem<T> {
    /// Take the item out, cancelling its expiry timer.
    fn into_item(self) -> PoolItem<T> {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.item
    }
}

/// Mutable pool state.
pub(crate) struct State<T, E> {
    pub(crate) lifecycle: Lifecycle,
    /// All items counted against maximum pool size, in any state.
    pub(crate) size: usize,
    pub(crate) creating: usize,
    pub(crate) verifying: usize,
    pub(crate) disposing: usize,
    pub(crate) checked_out: usize,
    /// Most recently released item is at the end.
    idle: Vec<IdleItem<T>>,
    /// Oldest acquisition is at the front.
    waiters: VecDeque<Waiter<T, E>>,
    next_waiter_id: u64,
    next_item_id: u64,
}

impl<T, E> Default for State<T, E> {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Active,
            size: 0,
            creating: 0,
            verifying: 0,
            disposing: 0,
            checked_out: 0,
            idle: Vec::new(),
            waiters: VecDeque::new(),
            next_waiter_id: 0,
            next_item_id: 0,
        }
    }
}

impl<T, E> State<T, E> {
    pub(crate) fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    pub(crate) fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub(crate) fn waiting_len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn next_item_id(&mut self) -> ItemId {
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;
        id
    }

    /// Append new acquisition to the end of the waiter queue.
    pub(crate) fn enqueue(&mut self, tx: oneshot::Sender<Delivery<T, E>>) -> u64 {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        self.waiters.push_back(Waiter { id, tx });
        id
    }

    /// Remove acquisition from the waiter queue.
    ///
    /// Returns `false` if it was already fulfilled or rejected.
    pub(crate) fn remove_waiter(&mut self, id: u64) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Hand verified item to the oldest waiter.
    ///
    /// Returns the item back if nobody is waiting for it.
    pub(crate) fn deliver(&mut self, mut item: PoolItem<T>) -> Option<PoolItem<T>> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.tx.send(Ok(item)) {
                Ok(()) => {
                    self.checked_out += 1;
                    return None;
                }
                // Receiver is gone, try the next waiter.
                Err(Ok(returned)) => item = returned,
                // The value sent above is always `Ok`, so it comes back as `Ok` too.
                Err(Err(_)) => unreachable!("only items are sent by deliver"),
            }
        }
        Some(item)
    }

    /// Reject every queued acquisition.
    pub(crate) fn reject_waiters(&mut self, err: impl Fn() -> Error<E>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.tx.send(Err(err()));
        }
    }

    /// Reject the oldest acquisition, if there is demand not covered by in-flight work.
    pub(crate) fn fail_uncovered_waiter(&mut self, err: Error<E>) -> bool {
        if self.waiters.len() <= self.verifying + self.creating {
            return false;
        }
        match self.waiters.pop_front() {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    pub(crate) fn start_verify(&mut self, item: PoolItem<T>, work: &mut Vec<Work<T>>) {
        self.verifying += 1;
        work.push(Work::Verify(item));
    }

    pub(crate) fn start_dispose(&mut self, item: PoolItem<T>, work: &mut Vec<Work<T>>) {
        self.disposing += 1;
        work.push(Work::Dispose(item));
    }

    /// Route an item that has just become available (created, released or reclaimed).
    ///
    /// Unmet demand gets the item verified right away, bypassing the idle stack. Returns the item
    /// back if it should be put into the idle stack.
    pub(crate) fn route(&mut self, item: PoolItem<T>, work: &mut Vec<Work<T>>) -> Option<PoolItem<T>> {
        if self.waiters.len() > self.verifying {
            self.start_verify(item, work);
            None
        } else if !self.is_active() {
            self.start_dispose(item, work);
            None
        } else {
            Some(item)
        }
    }

    pub(crate) fn push_idle(&mut self, item: PoolItem<T>, timer: Option<JoinHandle<()>>) {
        self.idle.push(IdleItem { item, timer });
    }

    /// Remove specific item from the idle stack, without touching its timer.
    pub(crate) fn take_idle(&mut self, id: ItemId) -> Option<PoolItem<T>> {
        let idx = self.idle.iter().position(|idle| idle.item.id() == id)?;
        Some(self.idle.remove(idx).item)
    }

    /// Remove all items from the idle stack, most recently released first.
    pub(crate) fn drain_idle(&mut self) -> Vec<PoolItem<T>> {
        self.idle.drain(..).rev().map(IdleItem::into_item).collect()
    }

    /// Reconcile demand against supply.
    ///
    /// Pops idle items for waiters not yet served by an in-flight verification, then reserves
    /// capacity and schedules creation for whatever demand is left, or for reaching the minimum
    /// pool size.
    pub(crate) fn pulse(&mut self, min: usize, max: usize, work: &mut Vec<Work<T>>) {
        while self.waiters.len() > self.verifying {
            let Some(idle) = self.idle.pop() else {
                break;
            };
            self.start_verify(idle.into_item(), work);
        }
        let unmet = self
            .waiters
            .len()
            .saturating_sub(self.verifying + self.creating);
        let floor = if self.is_active() {
            min.saturating_sub(self.size)
        } else {
            0
        };
        let create = unmet.max(floor).min(max.saturating_sub(self.size));
        self.size += create;
        self.creating += create;
        work.extend(iter::repeat_with(|| Work::Create).take(create));
        debug_assert_eq!(
            self.size,
            self.idle.len() + self.creating + self.verifying + self.disposing + self.checked_out,
            "pool size accounting mismatch"
        );
    }

    pub(crate) fn status(&self, min: usize, max: usize) -> PoolStatus {
        PoolStatus {
            max_size: max,
            min_size: min,
            size: self.size,
            idle: self.idle.len(),
            in_use: self.checked_out,
            creating: self.creating,
            verifying: self.verifying,
            disposing: self.disposing,
            waiting: self.waiters.len(),
        }
    }
}
