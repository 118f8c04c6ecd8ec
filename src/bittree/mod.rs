
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::bitmap::{Bitmap, Coverage};
use crate::config::LEAF_BYTES;
use crate::error::{Error, Result};

/// Sparse progress bitmap.
///
/// An ordered map from bucket base (a multiple of the bucket span) to a
/// fixed-size bitmap leaf. Leaves appear when the first bit in their span
/// is set and are discarded the moment their last bit clears, so an idle
/// tree costs nothing. A set bit means the owning task has declared the
/// covered units done.
pub(crate) struct BitTree {
    gran: u64,
    leaves: BTreeMap<u64, Bitmap>,
}

impl BitTree {
    pub fn new(granularity: u32) -> Self {
        BitTree {
            gran: u64::from(granularity),
            leaves: BTreeMap::new(),
        }
    }

    /// Units covered by one leaf.
    fn span(&self) -> u64 {
        (LEAF_BYTES * 8) as u64 * self.gran
    }

    fn range_end(idx: u64, count: u64) -> Result<u64> {
        idx.checked_add(count)
            .ok_or(Error::InvalidArgument("unit range overflows"))
    }

    /// Marks units `[idx, idx + count)` done, inserting leaves as needed.
    pub fn set_range(&mut self, idx: u64, count: u64) -> Result<()> {
        let end = Self::range_end(idx, count)?;

        let mut cur = idx;
        while cur < end {
            let base = cur - cur % self.span();
            let win = end.min(base + self.span());
            self.leaves
                .entry(base)
                .or_insert_with(|| Bitmap::new(LEAF_BYTES))
                .set(base, self.gran, cur, win)?;
            cur = win;
        }
        Ok(())
    }

    /// Clears units `[idx, idx + count)`, disposing of leaves that end up
    /// empty.
    pub fn clear_range(&mut self, idx: u64, count: u64) -> Result<()> {
        let end = Self::range_end(idx, count)?;

        let mut cur = idx;
        while cur < end {
            let base = cur - cur % self.span();
            let win = end.min(base + self.span());
            if let Some(leaf) = self.leaves.get_mut(&base) {
                leaf.clear(base, self.gran, cur, win)?;
                if leaf.is_empty() {
                    self.leaves.remove(&base);
                }
            }
            cur = win;
        }
        Ok(())
    }

    /// Whether every unit in `[idx, idx + count)` is marked done. A
    /// missing leaf or a mixed window answers no immediately.
    pub fn check_range(&self, idx: u64, count: u64) -> Result<bool> {
        let end = Self::range_end(idx, count)?;

        let mut cur = idx;
        while cur < end {
            let base = cur - cur % self.span();
            let win = end.min(base + self.span());
            match self.leaves.get(&base) {
                None => return Ok(false),
                Some(leaf) => {
                    if leaf.check(base, self.gran, cur, win)? != Coverage::Full {
                        return Ok(false);
                    }
                }
            }
            cur = win;
        }
        Ok(true)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (base, leaf) in &self.leaves {
            let _ = writeln!(
                out,
                "leaf {}: {} of {} bits set",
                base,
                leaf.ones(),
                leaf.bits()
            );
        }
        out
    }
}
