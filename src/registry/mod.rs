
mod hook;
mod path;
mod scan;
mod stream;

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use arrayvec::ArrayString;
use log::{debug, info};

pub use stream::EventStream;

use crate::bittree::BitTree;
use crate::config::{
    Event, Interest, RegisterOpts, TaskInfo, DEFAULT_GRANULARITY, MAX_BATCH, MAX_NAME, MAX_TASKS,
};
use crate::error::{Error, Result};
use crate::index::ItemIndex;
use crate::task::{Latch, Scope, Task, TaskRef};

// Framework status, transitioned with compare-and-swap so concurrent
// bootstrap or shutdown attempts cannot interleave.
const OFF: u8 = 0;
const INIT: u8 = 1;
const ON: u8 = 2;
const CLEAN: u8 = 3;

/// The page-event notification framework.
///
/// Holds the registry of subscribed tasks and routes page lifecycle
/// events into their pending-event indexes. Consumers drive it through
/// [`register`][Self::register] / [`fetch`][Self::fetch] /
/// [`mark`][Self::mark] / [`check`][Self::check]; cache sites feed it
/// through [`hook`][Self::hook].
///
/// All state is process-lifetime; nothing persists across restarts.
pub struct Framework {
    status: AtomicU8,
    max_tasks: AtomicUsize,
    /// Registered tasks, sorted by id. Readers latch a task before
    /// dropping the list lock; writers wait for latched readers to
    /// drain before freeing anything.
    tasks: RwLock<Vec<Arc<Task>>>,
    /// Serializes deregistration against bootstrap/shutdown.
    teardown: Mutex<()>,
    /// Events the dispatcher had to skip.
    dropped: AtomicU64,
}

impl Framework {
    /// Creates a framework in the off state; call
    /// [`bootstrap`][Self::bootstrap] before registering tasks.
    pub fn new() -> Self {
        Framework {
            status: AtomicU8::new(OFF),
            max_tasks: AtomicUsize::new(MAX_TASKS),
            tasks: RwLock::new(Vec::new()),
            teardown: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Whether events are currently accepted and consumer calls allowed.
    pub fn online(&self) -> bool {
        self.status.load(Ordering::Acquire) == ON
    }

    /// Turns the framework on, allowing up to `max_tasks` concurrent
    /// tasks (capped at [`MAX_TASKS`]).
    ///
    /// Bootstrapping twice is [`Error::AlreadyExists`].
    pub fn bootstrap(&self, max_tasks: usize) -> Result<()> {
        if max_tasks == 0 {
            return Err(Error::InvalidArgument("max_tasks must be positive"));
        }

        if self
            .status
            .compare_exchange(OFF, INIT, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyExists);
        }

        self.max_tasks
            .store(max_tasks.min(MAX_TASKS), Ordering::Release);
        self.status.store(ON, Ordering::Release);
        info!("framework enabled, task cap {}", max_tasks.min(MAX_TASKS));
        Ok(())
    }

    /// Turns the framework off, deregistering every remaining task.
    ///
    /// Shutting down while off is [`Error::NotInitialized`].
    pub fn shutdown(&self) -> Result<()> {
        if self
            .status
            .compare_exchange(ON, CLEAN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::NotInitialized);
        }

        let _teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            let task = {
                let mut tasks = self.write_tasks();
                if tasks.is_empty() {
                    break;
                }
                tasks.remove(0)
            };
            if let Some(w) = task.take_waker() {
                w.wake();
            }
            task.latch.wait_drain(task.id);
            // A stream may have parked itself during the drain; it can
            // no longer see the task, so send it off.
            if let Some(w) = task.take_waker() {
                w.wake();
            }
        }

        self.status.store(OFF, Ordering::Release);
        info!("framework disabled");
        Ok(())
    }

    /// Registers a task and returns its id.
    ///
    /// The id is the smallest positive integer no live task holds. Before
    /// returning, the task's index is seeded with every page already
    /// cached in its scope, so freshly registered tasks see pages that
    /// were hot before they existed.
    pub fn register(&self, opts: RegisterOpts) -> Result<u8> {
        if !self.online() {
            return Err(Error::NotInitialized);
        }

        let name = ArrayString::<MAX_NAME>::from(opts.name.as_str())
            .map_err(|_| Error::InvalidArgument("task name too long"))?;
        let interest = opts.interest.resolve()?;
        let mask = opts.interest.as_mask();
        let granularity = if opts.granularity == 0 {
            DEFAULT_GRANULARITY
        } else {
            opts.granularity
        };
        let compound = mask & (Interest::EXISTS | Interest::MODIFIED);

        let task = {
            let mut tasks = self.write_tasks();

            if tasks.iter().any(|t| t.name.as_str() == opts.name) {
                return Err(Error::AlreadyExists);
            }
            if tasks.len() >= self.max_tasks.load(Ordering::Acquire) {
                return Err(Error::Exhausted);
            }

            // The list is sorted by id, so the smallest free id is the
            // first gap.
            let mut id: u8 = 1;
            let mut pos = 0;
            for (i, cur) in tasks.iter().enumerate() {
                if cur.id == id {
                    id += 1;
                    pos = i + 1;
                } else {
                    break;
                }
            }

            let task = Arc::new(Task {
                id,
                name,
                mask,
                interest,
                granularity,
                scope: Scope {
                    volume: opts.volume,
                    parent: opts.parent,
                },
                latch: Latch::new(),
                bittree: Mutex::new(BitTree::new(granularity)),
                index: Mutex::new(ItemIndex::new(interest, compound)),
                waker: Mutex::new(None),
                streaming: Default::default(),
            });
            tasks.insert(pos, Arc::clone(&task));
            task
        };

        // The task is already receiving events; backfill what it missed.
        self.startup_scan(&task);

        info!("task {} ({}) registered, mask {:#04x}", task.id, task.name, mask);
        Ok(task.id)
    }

    /// Deregisters a task: unlinks it, waits for in-flight readers to
    /// drain, then destroys its trees.
    ///
    /// Unknown ids (including already-deregistered ones) are
    /// [`Error::NotFound`].
    pub fn deregister(&self, id: u8) -> Result<()> {
        let _teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let task = {
            let mut tasks = self.write_tasks();
            let pos = tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or(Error::NotFound)?;
            tasks.remove(pos)
        };

        // New dispatcher and consumer calls can no longer see the task;
        // wake any parked stream so it observes the unlink, then wait
        // out whoever is mid-operation.
        if let Some(w) = task.take_waker() {
            w.wake();
        }
        task.latch.wait_drain(id);
        // A stream may have parked itself during the drain; it can no
        // longer see the task, so send it off.
        if let Some(w) = task.take_waker() {
            w.wake();
        }

        info!("task {id} deregistered");
        Ok(())
    }

    /// Removes and returns up to `max` pending events, ascending by
    /// ⟨inode, page index⟩. An empty batch is not an error.
    pub fn fetch(&self, id: u8, max: usize) -> Result<Vec<Event>> {
        if max > MAX_BATCH {
            return Err(Error::InvalidArgument("fetch batch over the cap"));
        }

        let task = self.find(id)?;
        let mut index = task.index.lock().unwrap_or_else(PoisonError::into_inner);

        let mut events = Vec::with_capacity(max.min(index.len()));
        while events.len() < max {
            match index.pop_first() {
                Some(e) => events.push(e),
                None => break,
            }
        }
        Ok(events)
    }

    /// Marks units `[idx, idx + count)` as processed.
    pub fn mark(&self, id: u8, idx: u64, count: u64) -> Result<()> {
        if !self.online() {
            return Err(Error::NotInitialized);
        }
        let task = self.find(id)?;
        let mut tree = task.bittree.lock().unwrap_or_else(PoisonError::into_inner);
        tree.set_range(idx, count)
    }

    /// Reverts [`mark`][Self::mark] over the given range.
    pub fn unmark(&self, id: u8, idx: u64, count: u64) -> Result<()> {
        if !self.online() {
            return Err(Error::NotInitialized);
        }
        let task = self.find(id)?;
        let mut tree = task.bittree.lock().unwrap_or_else(PoisonError::into_inner);
        tree.clear_range(idx, count)
    }

    /// Whether every unit in `[idx, idx + count)` has been marked.
    pub fn check(&self, id: u8, idx: u64, count: u64) -> Result<bool> {
        if !self.online() {
            return Err(Error::NotInitialized);
        }
        let task = self.find(id)?;
        let tree = task.bittree.lock().unwrap_or_else(PoisonError::into_inner);
        tree.check_range(idx, count)
    }

    /// Describes every registered task.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.read_tasks().iter().map(|t| t.info()).collect()
    }

    /// Number of events the dispatcher skipped (framework offline or
    /// unsupported file kind). Lossy behavior is the design; this is the
    /// only record of it.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Renders a task's progress bitmap, one line per leaf.
    pub fn dump_bittree(&self, id: u8) -> Result<String> {
        let task = self.find(id)?;
        let tree = task.bittree.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tree.dump())
    }

    /// Renders a task's pending-event index, one line per entry.
    pub fn dump_index(&self, id: u8) -> Result<String> {
        let task = self.find(id)?;
        let index = task.index.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(index.dump())
    }

    /// Looks a task up by id and latches it for the caller's operation.
    pub(crate) fn find(&self, id: u8) -> Result<TaskRef> {
        let tasks = self.read_tasks();
        tasks
            .iter()
            .find(|t| t.id == id)
            .map(TaskRef::latch)
            .ok_or(Error::NotFound)
    }

    pub(crate) fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        debug!("dispatcher skipped an event");
    }

    fn read_tasks(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Task>>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tasks(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Task>>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Framework {
    fn default() -> Self {
        Self::new()
    }
}
