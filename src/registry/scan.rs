use std::sync::PoisonError;

use log::debug;

use super::Framework;
use crate::cache::FileKind;
use crate::config::Interest;
use crate::task::Task;

impl Framework {
    /// Seeds a newly registered task's index from the pages already
    /// cached in its scope.
    ///
    /// Every resident page becomes an `ADDED` entry (plus `DIRTY` where
    /// the page is dirty), filtered through the task's interest exactly
    /// as the dispatcher would have done had the task been watching when
    /// the page came in.
    pub(super) fn startup_scan(&self, task: &Task) {
        debug!("task {}: page cache scan started", task.id);

        let mut seeded = 0u64;
        task.scope.volume.scan_pages(|ino, kind, index, dirty| {
            if kind == FileKind::Special {
                return;
            }

            let mut bits = Interest::ADDED;
            if dirty {
                bits |= Interest::DIRTY;
            }

            task.index
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .seed(ino, index, bits);
            seeded += 1;
        });

        debug!("task {}: page cache scan finished, {seeded} pages", task.id);
    }
}
