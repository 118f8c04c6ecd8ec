use std::sync::{Arc, PoisonError};

use log::trace;

use super::Framework;
use crate::cache::{FileKind, PageHandle};
use crate::config::EventKind;

impl Framework {
    /// Ingests one page lifecycle event.
    ///
    /// Called from the cache sites on every insertion, eviction,
    /// dirtying, and writeback. For each task whose interest, scope, and
    /// file-kind filters the event passes, the event is folded into that
    /// task's pending index under the collapsing rules.
    ///
    /// There is no error channel here: an event that cannot be recorded
    /// is skipped and counted, never propagated. The dispatcher takes
    /// only per-entry locks and never suspends.
    pub fn hook(&self, kind: EventKind, page: &PageHandle) {
        if !self.online() {
            self.count_drop();
            return;
        }

        // Pages of special files are of no interest to any task.
        if page.kind() == FileKind::Special {
            self.count_drop();
            return;
        }

        let tasks = self.read_tasks();
        for task in tasks.iter() {
            if task.interest & kind.bit() == 0 {
                continue;
            }
            if !Arc::ptr_eq(&task.scope.volume, page.volume()) {
                continue;
            }

            trace!(
                "task {}: {:?} ino {} idx {}",
                task.id,
                kind,
                page.ino(),
                page.index()
            );

            task.index
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(page.ino(), page.index(), kind.bit());

            if let Some(w) = task.take_waker() {
                w.wake();
            }
        }
    }
}
