
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::Volume;
use crate::error::{Error, Result};

/// Maximum task name length, in bytes.
pub const MAX_NAME: usize = 128;

/// Maximum relative path length the resolver will return, in bytes.
pub const MAX_PATH: usize = 1024;

/// Maximum number of events a single fetch may request.
pub const MAX_BATCH: usize = 512;

/// Hard cap on simultaneously registered tasks.
pub const MAX_TASKS: usize = 15;

/// Byte length of one progress-bitmap leaf (262144 bits).
pub const LEAF_BYTES: usize = 32768;

/// Units covered by one progress bit when registration passes zero.
pub const DEFAULT_GRANULARITY: u32 = 4096;

/// Leaf page event kinds, as reported by the cache sites.
///
/// `Added` and `Removed` fire when a page descriptor enters or is about
/// to leave a file's cache. `Dirty` fires when a page is marked dirty,
/// `Flushed` when it is marked for writeback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Added,
    Removed,
    Dirty,
    Flushed,
}

impl EventKind {
    pub(crate) fn bit(self) -> u8 {
        match self {
            EventKind::Added => Interest::ADDED,
            EventKind::Removed => Interest::REMOVED,
            EventKind::Dirty => Interest::DIRTY,
            EventKind::Flushed => Interest::FLUSHED,
        }
    }
}

/// Event kinds a task subscribes to.
///
/// The four leaf kinds record every matching event verbatim. The two
/// compound kinds trade fidelity for boundedness: `exists` subscribes to
/// add/remove and cancels the pair whenever both have been seen since the
/// last fetch, `modified` does the same for dirty/flush. A compound kind
/// cannot be combined with the leaf kinds it implies.
///
/// The default selects nothing; such a task is accepted and its index
/// simply stays empty.
#[derive(Clone, Debug, Default)]
pub struct Interest {
    /// Page descriptor insertions.
    pub added: bool,

    /// Page descriptor removals.
    pub removed: bool,

    /// Pages marked dirty.
    pub dirty: bool,

    /// Pages marked for writeback.
    pub flushed: bool,

    /// Dirty/flush state changes since the last fetch.
    pub modified: bool,

    /// Residency changes since the last fetch.
    pub exists: bool,
}

impl Interest {
    pub const ADDED: u8 = 1 << 0;
    pub const REMOVED: u8 = 1 << 1;
    pub const DIRTY: u8 = 1 << 2;
    pub const FLUSHED: u8 = 1 << 3;
    pub const MODIFIED: u8 = 1 << 4;
    pub const EXISTS: u8 = 1 << 5;

    const ALL: u8 = Self::ADDED
        | Self::REMOVED
        | Self::DIRTY
        | Self::FLUSHED
        | Self::MODIFIED
        | Self::EXISTS;

    /// Returns the wire representation of this selection.
    pub fn as_mask(&self) -> u8 {
        let mut val = 0;
        macro_rules! when {
            ($field:ident, $flag:ident) => {
                if self.$field {
                    val |= Self::$flag;
                }
            };
        }
        when!(added, ADDED);
        when!(removed, REMOVED);
        when!(dirty, DIRTY);
        when!(flushed, FLUSHED);
        when!(modified, MODIFIED);
        when!(exists, EXISTS);
        val
    }

    /// Builds a selection from its wire representation.
    pub fn from_mask(mask: u8) -> Result<Self> {
        if mask & !Self::ALL != 0 {
            return Err(Error::InvalidArgument("unknown event mask bits"));
        }
        Ok(Interest {
            added: mask & Self::ADDED != 0,
            removed: mask & Self::REMOVED != 0,
            dirty: mask & Self::DIRTY != 0,
            flushed: mask & Self::FLUSHED != 0,
            modified: mask & Self::MODIFIED != 0,
            exists: mask & Self::EXISTS != 0,
        })
    }

    /// Validates the selection and resolves compound kinds into the leaf
    /// bits the dispatcher matches events against.
    pub(crate) fn resolve(&self) -> Result<u8> {
        if self.exists && (self.added || self.removed) {
            return Err(Error::InvalidArgument(
                "exists excludes explicit added/removed",
            ));
        }
        if self.modified && (self.dirty || self.flushed) {
            return Err(Error::InvalidArgument(
                "modified excludes explicit dirty/flushed",
            ));
        }

        let mut mask = self.as_mask() & !(Self::MODIFIED | Self::EXISTS);
        if self.exists {
            mask |= Self::ADDED | Self::REMOVED;
        }
        if self.modified {
            mask |= Self::DIRTY | Self::FLUSHED;
        }
        Ok(mask)
    }
}

/// One pending page event, as returned by fetch.
///
/// `state` is the collapsed union of the event bits observed for this
/// ⟨inode, page index⟩ pair since the task's last fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub ino: u64,
    pub index: u64,
    pub state: u8,
}

impl Event {
    /// Whether the collapsed state contains the given event kind.
    pub fn has(&self, kind: EventKind) -> bool {
        self.state & kind.bit() != 0
    }
}

/// Task registration parameters.
#[derive(Clone)]
pub struct RegisterOpts {
    /// Human-readable task name, at most [`MAX_NAME`] bytes, unique among
    /// live tasks.
    pub name: String,

    /// Event kinds the task wants to observe.
    pub interest: Interest,

    /// Underlying units one progress bit covers (bytes for block-oriented
    /// tasks, 1 for inode-oriented tasks). Zero selects
    /// [`DEFAULT_GRANULARITY`].
    pub granularity: u32,

    /// The filesystem whose page events are of interest; events from
    /// other volumes never reach this task.
    pub volume: Arc<Volume>,

    /// Directory rooting the path resolver. Tasks registered without one
    /// cannot use `get_path`.
    pub parent: Option<u64>,
}

/// Description of a registered task, as reported by task listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: u8,
    pub name: String,
    pub granularity: u32,
    pub mask: u8,
}
