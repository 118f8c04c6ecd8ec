//! Page-cache event notification for opportunistic storage maintenance.
//!
//! Long-running maintenance tasks (defragmentation, incremental backup,
//! log-structured garbage collection) normally process files in their own
//! natural order, paying a cache miss for almost every object they touch.
//! This crate lets such tasks subscribe to the lifecycle of cached pages
//! and process whatever is *already hot* first: a registered task receives
//! a bounded, collapsing stream of `ADDED` / `REMOVED` / `DIRTY` /
//! `FLUSHED` page events for its filesystem, keeps a sparse progress
//! bitmap of the work it has finished, and lets the remaining traversal
//! skip everything the opportunistic pass already covered.
//!
//! ## Example
//!
//! Register a task over a volume, observe a page insertion, and drain the
//! event it produced.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use page_events::cache::{Volume, ROOT_INO};
//! use page_events::config::{EventKind, Interest, RegisterOpts};
//! use page_events::registry::Framework;
//!
//! let fw = Arc::new(Framework::new());
//! fw.bootstrap(4).unwrap();
//!
//! let vol = Volume::new("scratch");
//! let ino = vol.create(ROOT_INO, "db.log").unwrap();
//!
//! let mut interest = Interest::default();
//! interest.exists = true; // watch page residency, collapsing add/remove
//!
//! let id = fw
//!     .register(RegisterOpts {
//!         name: "backup".into(),
//!         interest,
//!         granularity: 1,
//!         volume: vol.clone(),
//!         parent: Some(ROOT_INO),
//!     })
//!     .unwrap();
//!
//! // A page enters the cache; the cache site reports it.
//! let page = vol.insert_page(ino, 0).unwrap();
//! fw.hook(EventKind::Added, &page);
//!
//! let events = fw.fetch(id, 10).unwrap();
//! assert_eq!(events.len(), 1);
//! assert_eq!((events[0].ino, events[0].index), (ino, 0));
//!
//! fw.deregister(id).unwrap();
//! fw.shutdown().unwrap();
//! ```
//!
//! ## Delivery model
//!
//! Event delivery is deliberately lossy-but-correct: redundant events
//! collapse instead of queueing (a page that was added and then evicted
//! between two fetches simply disappears from the index of a task that
//! watches residency), so the pending-event index stays bounded no matter
//! how turbulent the workload is. The only ordering guarantee is per
//! ⟨inode, page index⟩; consumers that need a global view build it on
//! their side, e.g. with [`itree::InodeTree`].

pub mod cache;
pub mod config;
pub mod ctl;
pub mod itree;
pub mod registry;

mod bitmap;
mod bittree;
mod error;
mod index;
mod task;

pub use error::{Error, Result};
