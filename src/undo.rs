//! Reversible merges.
//!
//! An [`UndoLog`] is captured before a merge. It remembers the blocks the
//! merge could touch and the column runs it actually unioned, which is
//! enough to rebuild the pre-merge equivalence for any sub-range of the
//! pinch while keeping the rest of the merge in place.

use crate::merge_graph::{BlockId, MergeGraph, SegmentFilter, ThreadName};
use crate::pinch::Pinch;
use anyhow::{bail, Result};
use indexmap::IndexSet;

#[derive(Debug, Clone)]
struct SnapshotBlock {
    length: i64,
    /// (thread, start, forward) of each member
    members: Vec<(ThreadName, i64, bool)>,
}

/// Record needed to reverse part of one merge
#[derive(Debug, Clone)]
pub struct UndoLog {
    pinch: Pinch,
    epoch: u64,
    snapshot: Vec<SnapshotBlock>,
    applied: Vec<(i64, i64)>,
    undone: Vec<(i64, i64)>,
}

impl UndoLog {
    pub fn pinch(&self) -> &Pinch {
        &self.pinch
    }

    /// Column ranges reversed so far
    pub fn undone(&self) -> &[(i64, i64)] {
        &self.undone
    }

    /// Column ranges that are merged and not yet undone
    pub fn remaining(&self) -> Vec<(i64, i64)> {
        self.applied
            .iter()
            .flat_map(|&range| subtract_ranges(range, &self.undone))
            .collect()
    }
}

/// `range` minus every range in `removed`, as sorted disjoint pieces
fn subtract_ranges(range: (i64, i64), removed: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut pieces = vec![range];
    for &(offset, length) in removed {
        let (cut_start, cut_end) = (offset, offset + length);
        let mut next = Vec::with_capacity(pieces.len() + 1);
        for (start, len) in pieces {
            let end = start + len;
            if cut_end <= start || cut_start >= end {
                next.push((start, len));
                continue;
            }
            if cut_start > start {
                next.push((start, cut_start - start));
            }
            if cut_end < end {
                next.push((cut_end, end - cut_end));
            }
        }
        pieces = next;
    }
    pieces
}

impl MergeGraph {
    /// Capture the state a later partial undo of `pinch` needs. Must be
    /// taken immediately before the merge.
    pub fn prepare_undo(&self, pinch: &Pinch) -> Result<UndoLog> {
        let mut touched = IndexSet::new();
        for (name, start) in [(pinch.name1, pinch.start1), (pinch.name2, pinch.start2)] {
            if pinch.length <= 0 {
                break;
            }
            let mut position = start;
            while position < start + pinch.length {
                let id = self.segment_at(name, position)?;
                let segment = self.segment(id);
                if let Some(block) = segment.block {
                    touched.insert(block);
                }
                position = segment.end();
            }
        }
        let snapshot = touched
            .into_iter()
            .map(|block| SnapshotBlock {
                length: self.block_length(block),
                members: self
                    .block_segments(block)
                    .iter()
                    .map(|&s| {
                        let segment = self.segment(s);
                        (segment.thread, segment.start, segment.forward)
                    })
                    .collect(),
            })
            .collect();
        Ok(UndoLog {
            pinch: *pinch,
            epoch: self.epoch(),
            snapshot,
            applied: vec![(0, pinch.length.max(0))],
            undone: Vec::new(),
        })
    }

    /// Merge `pinch`, recording in `undo` exactly which columns were united
    pub fn merge_recorded(
        &mut self,
        pinch: &Pinch,
        filter: Option<&SegmentFilter>,
        undo: &mut UndoLog,
    ) -> Result<()> {
        if undo.pinch != *pinch || undo.epoch != self.epoch() {
            bail!("Undo log was not prepared for this merge");
        }
        let mut applied = Vec::new();
        self.apply_pinch(pinch, filter, Some(&mut applied))?;
        undo.applied = applied;
        self.bump_epoch();
        Ok(())
    }

    /// Reverse columns `[offset, offset + length)` of the logged merge.
    ///
    /// Only valid while the logged merge is the most recent one. Every
    /// block touching the range is dissolved and the pre-merge blocks plus
    /// the surviving part of the merge are pinched back in.
    pub fn partial_undo(&mut self, undo: &mut UndoLog, offset: i64, length: i64) -> Result<()> {
        if self.epoch() != undo.epoch + 1 {
            bail!(
                "Undo log is stale: prepared at epoch {}, graph is at {}",
                undo.epoch,
                self.epoch()
            );
        }
        if length <= 0 {
            return Ok(());
        }
        let pinch = undo.pinch;
        if offset < 0 || offset + length > pinch.length {
            bail!(
                "Undo range [{}, {}) exceeds pinch length {}",
                offset,
                offset + length,
                pinch.length
            );
        }
        let range = pinch.sub_pinch(offset, length);
        self.split(range.name1, range.start1)?;
        self.split(range.name1, range.end1())?;
        self.split(range.name2, range.start2)?;
        self.split(range.name2, range.end2())?;

        let mut doomed: IndexSet<BlockId> = IndexSet::new();
        for (name, start) in [(range.name1, range.start1), (range.name2, range.start2)] {
            let mut position = start;
            while position < start + length {
                let id = self.segment_at(name, position)?;
                let segment = self.segment(id);
                if let Some(block) = segment.block {
                    doomed.insert(block);
                }
                position = segment.end();
            }
        }
        for block in doomed {
            self.destroy_block(block);
        }
        undo.undone.push((offset, length));

        for block in &undo.snapshot {
            let Some(&(name1, start1, forward1)) = block.members.first() else {
                continue;
            };
            for &(name2, start2, forward2) in &block.members[1..] {
                let restore = Pinch::new(name1, name2, start1, start2, block.length, forward1 == forward2);
                self.apply_pinch(&restore, None, None)?;
            }
        }
        for (start, len) in undo.remaining() {
            self.apply_pinch(&pinch.sub_pinch(start, len), None, None)?;
        }
        Ok(())
    }

    /// A column range of the logged merge, not yet undone, that lies under
    /// one of `block`'s segments. None if the block is unrelated to the merge.
    pub fn find_offset_for_block(&self, undo: &UndoLog, block: BlockId) -> Option<(i64, i64)> {
        let pinch = &undo.pinch;
        for &member in self.block_segments(block) {
            let segment = self.segment(member);
            let mut columns = Vec::with_capacity(2);
            if segment.thread == pinch.name1 {
                let start = segment.start.max(pinch.start1);
                let end = segment.end().min(pinch.end1());
                if start < end {
                    columns.push((start - pinch.start1, end - start));
                }
            }
            if segment.thread == pinch.name2 {
                let start = segment.start.max(pinch.start2);
                let end = segment.end().min(pinch.end2());
                if start < end {
                    let offset = if pinch.strand {
                        start - pinch.start2
                    } else {
                        pinch.end2() - end
                    };
                    columns.push((offset, end - start));
                }
            }
            for range in columns {
                if let Some(&piece) = subtract_ranges(range, &undo.undone).first() {
                    return Some(piece);
                }
            }
        }
        None
    }
}
