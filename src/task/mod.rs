use std::ops::Deref;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::task::Waker;
use std::time::Duration;

use arrayvec::ArrayString;
use log::error;

use crate::bittree::BitTree;
use crate::cache::Volume;
use crate::config::{TaskInfo, MAX_NAME};
use crate::index::ItemIndex;

/// The filesystem a task is registered against, and the directory that
/// roots its path resolver.
pub(crate) struct Scope {
    pub volume: Arc<Volume>,
    pub parent: Option<u64>,
}

/// A registered subscriber.
///
/// Both trees sit behind their own short-held locks: the item index is
/// touched by the dispatcher and by fetch, the progress bitmap only by
/// consumer mark/unmark/check calls.
pub(crate) struct Task {
    pub id: u8,
    pub name: ArrayString<MAX_NAME>,
    /// Interest mask as registered, compound bits included.
    pub mask: u8,
    /// Leaf event bits the dispatcher matches against.
    pub interest: u8,
    pub granularity: u32,
    pub scope: Scope,
    pub latch: Latch,
    pub bittree: Mutex<BitTree>,
    pub index: Mutex<ItemIndex>,
    /// Parked event-stream waker, kicked by the dispatcher.
    pub waker: Mutex<Option<Waker>>,
    /// Whether an event stream is currently attached.
    pub streaming: AtomicBool,
}

impl Task {
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name.to_string(),
            granularity: self.granularity,
            mask: self.mask,
        }
    }

    /// Hands the parked waker (if any) to the caller to wake.
    pub fn take_waker(&self) -> Option<Waker> {
        self.waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A latched reference to a live task.
///
/// Holding one keeps deregistration from completing; the latch releases
/// on drop.
pub(crate) struct TaskRef {
    task: Arc<Task>,
}

impl TaskRef {
    /// Latches `task`. Must be called while the task is still reachable
    /// from the registry list.
    pub fn latch(task: &Arc<Task>) -> Self {
        task.latch.acquire();
        TaskRef {
            task: Arc::clone(task),
        }
    }
}

impl Deref for TaskRef {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.task
    }
}

impl Drop for TaskRef {
    fn drop(&mut self) {
        self.task.latch.release();
    }
}

/// Reader latch with a wait-for-zero primitive.
///
/// This is not shared ownership: readers take it only for the duration
/// of one operation, and deregistration waits until every reader has let
/// go before tearing the task down.
pub(crate) struct Latch {
    count: Mutex<usize>,
    drained: Condvar,
}

const DRAIN_WARN: Duration = Duration::from_secs(5);

impl Latch {
    pub fn new() -> Self {
        Latch {
            count: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count -= 1;
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    /// Blocks until no reader holds the latch. A quiesce that takes
    /// suspiciously long is reported but never gives up; surfacing it as
    /// a recoverable error would leave the task half-dead.
    pub fn wait_drain(&self, id: u8) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let mut warned = false;
        while *count > 0 {
            let (guard, timeout) = self
                .drained
                .wait_timeout(count, DRAIN_WARN)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
            if timeout.timed_out() && !warned {
                error!("task {id}: quiesce overdue, {} readers still latched", *count);
                warned = true;
            }
        }
    }
}
