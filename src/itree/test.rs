use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use super::{EventSource, InodeTree};
use crate::cache::{Volume, ROOT_INO};
use crate::config::{Event, EventKind, Interest, RegisterOpts, MAX_TASKS};
use crate::registry::Framework;

/// Canned event source: scripted batches, a done-set, and a path table
/// (inodes absent from the table resolve as unreachable).
#[derive(Default)]
struct Stub {
    batches: Vec<Vec<Event>>,
    done: Vec<u64>,
    paths: HashMap<u64, String>,
}

impl EventSource for Stub {
    fn fetch_events(&mut self, _id: u8, _max: usize) -> io::Result<Vec<Event>> {
        Ok(if self.batches.is_empty() {
            Vec::new()
        } else {
            self.batches.remove(0)
        })
    }

    fn check_done(&mut self, _id: u8, idx: u64, _count: u64) -> io::Result<bool> {
        Ok(self.done.contains(&idx))
    }

    fn lookup_path(&mut self, _id: u8, ino: u64) -> io::Result<Option<String>> {
        Ok(self.paths.get(&ino).cloned())
    }
}

fn added(ino: u64, index: u64) -> Event {
    Event {
        ino,
        index,
        state: Interest::ADDED,
    }
}

fn removed(ino: u64, index: u64) -> Event {
    Event {
        ino,
        index,
        state: Interest::REMOVED,
    }
}

#[test]
fn test_hottest_inode_first() {
    let mut src = Stub::default();
    for ino in [11u64, 12, 13, 14] {
        src.paths.insert(ino, format!("f{ino}"));
    }
    src.batches = vec![vec![
        added(11, 0),
        added(11, 1),
        added(11, 2),
        added(12, 0),
        added(13, 0),
        added(13, 1),
        added(13, 2),
        added(13, 3),
        added(13, 4),
        added(13, 5),
        added(13, 6),
        added(13, 7),
        added(13, 8),
        added(13, 9),
        added(14, 0),
        added(14, 1),
    ]];

    let mut tree = InodeTree::new();
    tree.update(&mut src, 1).unwrap();
    assert_eq!(tree.len(), 4);

    let order: Vec<_> = std::iter::from_fn(|| tree.fetch_hot(&mut src, 1).unwrap())
        .map(|hot| (hot.ino, hot.pages))
        .collect();
    assert_eq!(order, vec![(13, 10), (11, 3), (14, 2), (12, 1)]);
    assert!(tree.is_empty());
}

#[test]
fn test_update_collapses_to_deltas() {
    let mut src = Stub::default();
    // Three pages in, one out: net +2.
    src.batches = vec![vec![
        added(5, 0),
        added(5, 1),
        added(5, 2),
        removed(5, 7),
    ]];

    let mut tree = InodeTree::new();
    tree.update(&mut src, 1).unwrap();
    assert_eq!(tree.len(), 1);

    // A net-zero inode vanishes again.
    src.batches = vec![vec![removed(5, 0), removed(5, 1)]];
    tree.update(&mut src, 1).unwrap();
    assert!(tree.is_empty());
}

#[test]
fn test_negative_counts_are_benign() {
    // Removals for pages we never saw added: the consumer started
    // observing mid-lifetime.
    let mut src = Stub::default();
    src.paths.insert(3, "cold".into());
    src.paths.insert(4, "hot".into());
    src.batches = vec![vec![removed(3, 0), removed(3, 1), added(4, 0)]];

    let mut tree = InodeTree::new();
    tree.update(&mut src, 1).unwrap();

    let first = tree.fetch_hot(&mut src, 1).unwrap().unwrap();
    assert_eq!((first.ino, first.pages), (4, 1));
    let second = tree.fetch_hot(&mut src, 1).unwrap().unwrap();
    assert_eq!((second.ino, second.pages), (3, -2));
}

#[test]
fn test_fetch_hot_skips_done_and_unreachable() {
    let mut src = Stub::default();
    src.paths.insert(21, "a".into());
    // 23 is marked done, 22 has no path under the parent.
    src.done = vec![23];
    src.batches = vec![vec![
        added(21, 0),
        added(22, 0),
        added(22, 1),
        added(23, 0),
        added(23, 1),
        added(23, 2),
    ]];

    let mut tree = InodeTree::new();
    tree.update(&mut src, 1).unwrap();

    let hot = tree.fetch_hot(&mut src, 1).unwrap().unwrap();
    assert_eq!((hot.ino, hot.path.as_str()), (21, "a"));
    assert!(tree.fetch_hot(&mut src, 1).unwrap().is_none());
    assert!(tree.is_empty());
}

#[test]
fn test_mixed_event_counts_as_added() {
    // An explicit-mode task can deliver ADDED|REMOVED in one event; the
    // heat delta counts it as an addition.
    let mut src = Stub::default();
    src.batches = vec![vec![Event {
        ino: 9,
        index: 0,
        state: Interest::ADDED | Interest::REMOVED,
    }]];

    let mut tree = InodeTree::new();
    tree.update(&mut src, 1).unwrap();
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_dirty_events_do_not_touch_heat() {
    let mut src = Stub::default();
    src.batches = vec![vec![Event {
        ino: 9,
        index: 0,
        state: Interest::DIRTY,
    }]];

    let mut tree = InodeTree::new();
    tree.update(&mut src, 1).unwrap();
    assert!(tree.is_empty());
}

#[test]
fn test_teardown() {
    let mut tree = InodeTree::new();
    tree.insert_or_update(1, 5);
    tree.insert_or_update(2, 3);
    tree.teardown();
    assert!(tree.is_empty());
}

#[test]
fn test_update_against_framework() {
    let fw = Arc::new(Framework::new());
    fw.bootstrap(MAX_TASKS).unwrap();

    let vol = Volume::new("v");
    let data = vol.mkdir(ROOT_INO, "data").unwrap();
    let hot = vol.create(data, "hot").unwrap();
    let cold = vol.create(data, "cold").unwrap();

    let mut interest = Interest::default();
    interest.exists = true;
    let id = fw
        .register(RegisterOpts {
            name: "gc".into(),
            interest,
            granularity: 1,
            volume: Arc::clone(&vol),
            parent: Some(data),
        })
        .unwrap();

    for i in 0..4 {
        let page = vol.insert_page(hot, i).unwrap();
        fw.hook(EventKind::Added, &page);
    }
    let page = vol.insert_page(cold, 0).unwrap();
    fw.hook(EventKind::Added, &page);

    let mut tree = InodeTree::new();
    let mut src = &*fw;
    tree.update(&mut src, id).unwrap();

    let first = tree.fetch_hot(&mut src, id).unwrap().unwrap();
    assert_eq!((first.ino, first.path.as_str()), (hot, "hot"));

    // Mark the cold inode processed; it no longer comes up as a victim.
    fw.mark(id, cold, 1).unwrap();
    assert!(tree.fetch_hot(&mut src, id).unwrap().is_none());
}
