#[cfg(test)]
mod test;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::config::{Event, Interest};

/// Per-task pending-event store, ordered by ⟨inode, page index⟩.
///
/// One entry per pair, carrying the union of the event bits seen since
/// the pair was last fetched. Tasks that subscribed to a compound kind
/// get state collapsing on top of the union:
///
/// ```text
///              fetch, ADDED   +------------+    ADDED     +-------+
///  +---------+ <------------- |  residency | -----------> | page  |
///  | page    | -------------> | unchanged  | <----------- | added |
///  | removed |    REMOVED     +------------+ fetch, REM   +-------+
///  +---------+
/// ```
///
/// A task watching residency (`exists`) is told about a page only when
/// its presence actually differs from the last fetch; a page added and
/// evicted in between silently disappears from the index. The same
/// cancellation applies to dirty/flush for `modified` tasks, and the two
/// pairs cancel independently of each other. Tasks that subscribed to
/// explicit leaf kinds accumulate bits without cancellation.
///
/// This is what keeps the index bounded: no matter how turbulent the
/// workload, there is at most one entry per cached-page slot the task
/// has not yet consumed.
pub(crate) struct ItemIndex {
    /// Leaf event bits the task subscribed to, compounds resolved.
    interest: u8,
    /// Compound bits as registered, driving cancellation.
    compound: u8,
    items: BTreeMap<(u64, u64), u8>,
}

impl ItemIndex {
    pub fn new(interest: u8, compound: u8) -> Self {
        ItemIndex {
            interest,
            compound,
            items: BTreeMap::new(),
        }
    }

    /// Folds freshly observed event bits into the entry for
    /// ⟨`ino`, `idx`⟩, creating or cancelling it as the rules dictate.
    pub fn record(&mut self, ino: u64, idx: u64, bits: u8) {
        let bits = bits & self.interest;
        if bits == 0 {
            return;
        }

        match self.items.entry((ino, idx)) {
            Entry::Vacant(entry) => {
                entry.insert(bits);
            }
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                *state |= bits;

                // Negate event pairs that cancelled out since the last
                // fetch. The two pairs cancel independently.
                if self.compound & Interest::EXISTS != 0
                    && *state & (Interest::ADDED | Interest::REMOVED)
                        == Interest::ADDED | Interest::REMOVED
                {
                    *state &= !(Interest::ADDED | Interest::REMOVED);
                }
                if self.compound & Interest::MODIFIED != 0
                    && *state & (Interest::DIRTY | Interest::FLUSHED)
                        == Interest::DIRTY | Interest::FLUSHED
                {
                    *state &= !(Interest::DIRTY | Interest::FLUSHED);
                }

                if *entry.get() == 0 {
                    entry.remove();
                }
            }
        }
    }

    /// Overwrites the entry for ⟨`ino`, `idx`⟩ with exactly `bits`, as
    /// the startup scan does; an interest-filtered result of zero drops
    /// any stale entry.
    pub fn seed(&mut self, ino: u64, idx: u64, bits: u8) {
        let bits = bits & self.interest;
        if bits == 0 {
            self.items.remove(&(ino, idx));
        } else {
            self.items.insert((ino, idx), bits);
        }
    }

    /// Removes and returns the lowest ⟨inode, index⟩ entry.
    pub fn pop_first(&mut self) -> Option<Event> {
        self.items.pop_first().map(|((ino, index), state)| Event {
            ino,
            index,
            state,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (&(ino, idx), &state) in &self.items {
            let _ = writeln!(out, "ino {ino} idx {idx} state {state:#04x}");
        }
        out
    }
}
