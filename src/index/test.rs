use super::ItemIndex;
use crate::config::Interest;

const ALL_LEAVES: u8 = Interest::ADDED | Interest::REMOVED | Interest::DIRTY | Interest::FLUSHED;

#[test]
fn test_explicit_interest_unions_without_cancelling() {
    let mut index = ItemIndex::new(ALL_LEAVES, 0);

    index.record(7, 3, Interest::ADDED);
    index.record(7, 3, Interest::DIRTY);
    index.record(7, 3, Interest::REMOVED);

    assert_eq!(index.len(), 1);
    let ev = index.pop_first().unwrap();
    assert_eq!(
        ev.state,
        Interest::ADDED | Interest::DIRTY | Interest::REMOVED
    );
}

#[test]
fn test_exists_cancels_added_removed() {
    let mut index = ItemIndex::new(
        Interest::ADDED | Interest::REMOVED,
        Interest::EXISTS,
    );

    index.record(7, 3, Interest::ADDED);
    index.record(7, 3, Interest::REMOVED);
    assert_eq!(index.len(), 0);

    // An odd number of transitions survives.
    index.record(7, 3, Interest::ADDED);
    index.record(7, 3, Interest::REMOVED);
    index.record(7, 3, Interest::ADDED);
    assert_eq!(index.len(), 1);
    assert_eq!(index.pop_first().unwrap().state, Interest::ADDED);
}

#[test]
fn test_modified_cancels_dirty_flushed() {
    let mut index = ItemIndex::new(
        Interest::DIRTY | Interest::FLUSHED,
        Interest::MODIFIED,
    );

    index.record(9, 0, Interest::DIRTY);
    index.record(9, 0, Interest::FLUSHED);
    assert_eq!(index.len(), 0);
}

#[test]
fn test_pairs_cancel_independently() {
    let mut index = ItemIndex::new(ALL_LEAVES, Interest::EXISTS | Interest::MODIFIED);

    index.record(5, 1, Interest::ADDED);
    index.record(5, 1, Interest::DIRTY);
    index.record(5, 1, Interest::REMOVED);

    // Residency cancelled; the dirty observation is untouched.
    assert_eq!(index.len(), 1);
    assert_eq!(index.pop_first().unwrap().state, Interest::DIRTY);
}

#[test]
fn test_interest_filters_recorded_bits() {
    let mut index = ItemIndex::new(Interest::ADDED, 0);

    index.record(1, 0, Interest::REMOVED);
    index.record(1, 0, Interest::DIRTY);
    assert_eq!(index.len(), 0);

    index.record(1, 0, Interest::ADDED | Interest::DIRTY);
    assert_eq!(index.pop_first().unwrap().state, Interest::ADDED);
}

#[test]
fn test_zero_interest_stays_empty() {
    let mut index = ItemIndex::new(0, 0);
    index.record(1, 0, ALL_LEAVES);
    assert_eq!(index.len(), 0);
    assert!(index.pop_first().is_none());
}

#[test]
fn test_seed_replaces_state() {
    let mut index = ItemIndex::new(ALL_LEAVES, 0);

    index.record(2, 4, Interest::REMOVED);
    index.seed(2, 4, Interest::ADDED | Interest::DIRTY);
    assert_eq!(
        index.pop_first().unwrap().state,
        Interest::ADDED | Interest::DIRTY
    );

    // Seeding nothing of interest drops a stale entry.
    let mut index = ItemIndex::new(Interest::ADDED, 0);
    index.record(2, 4, Interest::ADDED);
    index.seed(2, 4, Interest::DIRTY);
    assert_eq!(index.len(), 0);
}

#[test]
fn test_pop_first_is_ordered() {
    let mut index = ItemIndex::new(ALL_LEAVES, 0);

    index.record(9, 0, Interest::ADDED);
    index.record(2, 5, Interest::ADDED);
    index.record(2, 1, Interest::ADDED);
    index.record(9, 7, Interest::ADDED);

    let order: Vec<_> = std::iter::from_fn(|| index.pop_first())
        .map(|e| (e.ino, e.index))
        .collect();
    assert_eq!(order, vec![(2, 1), (2, 5), (9, 0), (9, 7)]);
}

#[test]
fn test_dump_lists_entries() {
    let mut index = ItemIndex::new(ALL_LEAVES, 0);
    index.record(3, 8, Interest::ADDED);
    assert_eq!(index.dump(), "ino 3 idx 8 state 0x01\n");
}
