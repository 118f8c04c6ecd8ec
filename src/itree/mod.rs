#[cfg(test)]
mod test;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Result;

use crate::config::{Event, EventKind, MAX_BATCH};
use crate::registry::Framework;

/// Where a consumer's events come from.
///
/// The inode tree does not care whether the framework lives in the same
/// process or behind a control-plane connection; both
/// [`&Framework`](crate::registry::Framework) and
/// [`ctl::Client`](crate::ctl::Client) implement this.
pub trait EventSource {
    /// Removes and returns up to `max` pending events for task `id`.
    fn fetch_events(&mut self, id: u8, max: usize) -> Result<Vec<Event>>;

    /// Whether the unit range `[idx, idx + count)` is already processed.
    fn check_done(&mut self, id: u8, idx: u64, count: u64) -> Result<bool>;

    /// Path of `ino` relative to the task's parent, `None` if
    /// unreachable.
    fn lookup_path(&mut self, id: u8, ino: u64) -> Result<Option<String>>;
}

impl EventSource for &Framework {
    fn fetch_events(&mut self, id: u8, max: usize) -> Result<Vec<Event>> {
        (*self).fetch(id, max).map_err(Into::into)
    }

    fn check_done(&mut self, id: u8, idx: u64, count: u64) -> Result<bool> {
        (*self).check(id, idx, count).map_err(Into::into)
    }

    fn lookup_path(&mut self, id: u8, ino: u64) -> Result<Option<String>> {
        (*self).get_path(id, ino).map_err(Into::into)
    }
}

/// A victim candidate produced by [`InodeTree::fetch_hot`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hot {
    pub ino: u64,
    /// Pages believed cached when the inode was picked.
    pub pages: i64,
    /// Path relative to the task's parent directory.
    pub path: String,
}

/// Consumer-side heat map over fetched page events.
///
/// Collapses add/remove events into one signed page counter per inode
/// and keeps the counters sorted, so the consumer can always grab the
/// inode with the most cached pages next instead of following its
/// natural traversal order.
///
/// The counter is a running delta, not ground truth: a consumer that
/// starts observing mid-lifetime will see removals for pages it never
/// saw added, and the counter goes negative. That is harmless; such
/// inodes simply sort cold.
///
/// Internally two orderings index the same node set, one by inode
/// number for updates, one by ⟨count, inode⟩ for victim selection; every
/// mutation maintains both.
#[derive(Debug, Default)]
pub struct InodeTree {
    inodes: BTreeMap<u64, i64>,
    sorted: BTreeSet<(i64, u64)>,
}

impl InodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains every pending event from `src` and folds the add/remove
    /// deltas into the tree. Other event kinds are ignored here; they
    /// say nothing about residency.
    pub fn update<S: EventSource>(&mut self, src: &mut S, id: u8) -> Result<()> {
        loop {
            let batch = src.fetch_events(id, MAX_BATCH)?;
            if batch.is_empty() {
                return Ok(());
            }

            // Batches arrive ordered by inode, so deltas accumulate per
            // inode and flush at each boundary.
            let mut last: Option<u64> = None;
            let mut count = 0i64;
            for e in &batch {
                let delta = if e.has(EventKind::Added) {
                    1
                } else if e.has(EventKind::Removed) {
                    -1
                } else {
                    continue;
                };

                if last != Some(e.ino) {
                    if let Some(ino) = last {
                        self.insert_or_update(ino, count);
                    }
                    last = Some(e.ino);
                    count = 0;
                }
                count += delta;
            }
            if let Some(ino) = last {
                self.insert_or_update(ino, count);
            }

            if batch.len() < MAX_BATCH {
                return Ok(());
            }
        }
    }

    /// Applies a signed page-count delta to one inode, re-sorting it, and
    /// dropping it entirely if the counter reaches zero.
    pub fn insert_or_update(&mut self, ino: u64, delta: i64) {
        if delta == 0 {
            return;
        }

        match self.inodes.entry(ino) {
            Entry::Occupied(mut entry) => {
                let old = *entry.get();
                self.sorted.remove(&(old, ino));
                let new = old + delta;
                if new == 0 {
                    entry.remove();
                } else {
                    *entry.get_mut() = new;
                    self.sorted.insert((new, ino));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(delta);
                self.sorted.insert((delta, ino));
            }
        }

        debug_assert!(self.consistent());
    }

    /// Pops the hottest inode that is still worth processing.
    ///
    /// Inodes the task already marked done, and inodes the resolver
    /// cannot place under the task's parent, are discarded and the next
    /// hottest tried, until a victim emerges or the tree runs dry.
    pub fn fetch_hot<S: EventSource>(&mut self, src: &mut S, id: u8) -> Result<Option<Hot>> {
        loop {
            let Some(&(pages, ino)) = self.sorted.last() else {
                return Ok(None);
            };
            self.sorted.remove(&(pages, ino));
            self.inodes.remove(&ino);

            if src.check_done(id, ino, 1)? {
                continue;
            }

            match src.lookup_path(id, ino) {
                Ok(Some(path)) if !path.is_empty() => {
                    return Ok(Some(Hot { ino, pages, path }))
                }
                // Unreachable or unknown inodes are skipped, not fatal.
                Ok(_) | Err(_) => continue,
            }
        }
    }

    /// Drops every node from both orderings.
    pub fn teardown(&mut self) {
        self.inodes.clear();
        self.sorted.clear();
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }

    /// The two orderings always index exactly the same node set.
    fn consistent(&self) -> bool {
        self.inodes.len() == self.sorted.len()
            && self
                .inodes
                .iter()
                .all(|(&ino, &count)| self.sorted.contains(&(count, ino)))
    }
}
