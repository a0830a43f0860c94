use crate::pinch::Pinch;
use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::collections::BTreeMap;

/// Integer name of a thread (one input sequence)
pub type ThreadName = i64;

/// Handle to a segment. Handles are recycled once a segment is absorbed by
/// a join, so they are only meaningful between graph mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(u32);

/// Handle to a block. Same lifetime rules as [`SegmentId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

/// Predicate consulted before two equal-length segments are pinched
pub type SegmentFilter = dyn Fn(&MergeGraph, SegmentId, SegmentId) -> bool + Send + Sync;

#[derive(Debug, Clone)]
pub struct Thread {
    name: ThreadName,
    start: i64,
    length: i64,
    /// Segment start position -> segment
    segments: BTreeMap<i64, SegmentId>,
}

impl Thread {
    pub fn name(&self) -> ThreadName {
        self.name
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn end(&self) -> i64 {
        self.start + self.length
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

/// A maximal run of a thread whose positions share one block membership
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub thread: ThreadName,
    pub start: i64,
    pub length: i64,
    pub block: Option<BlockId>,
    /// Orientation relative to the block's column order
    pub forward: bool,
    live: bool,
}

impl Segment {
    pub fn end(&self) -> i64 {
        self.start + self.length
    }

    pub fn contains(&self, position: i64) -> bool {
        position >= self.start && position < self.end()
    }
}

#[derive(Debug, Clone, Default)]
struct Block {
    length: i64,
    members: Vec<SegmentId>,
    live: bool,
}

/// Equivalence structure over thread positions: segments grouped into
/// blocks of aligned columns.
#[derive(Debug, Clone, Default)]
pub struct MergeGraph {
    threads: IndexMap<ThreadName, Thread>,
    segments: Vec<Segment>,
    free_segments: Vec<SegmentId>,
    blocks: Vec<Block>,
    free_blocks: Vec<BlockId>,
    epoch: u64,
}

impl MergeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(name, start, length)` triples
    pub fn from_threads<I>(threads: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ThreadName, i64, i64)>,
    {
        let mut graph = MergeGraph::new();
        for (name, start, length) in threads {
            graph.add_thread(name, start, length)?;
        }
        Ok(graph)
    }

    /// Add a thread covered by a single unaligned segment
    pub fn add_thread(&mut self, name: ThreadName, start: i64, length: i64) -> Result<()> {
        if length < 1 {
            bail!("Thread {} must have positive length, got {}", name, length);
        }
        if self.threads.contains_key(&name) {
            bail!("Thread {} already exists", name);
        }
        let id = self.alloc_segment(Segment {
            thread: name,
            start,
            length,
            block: None,
            forward: true,
            live: true,
        });
        let mut segments = BTreeMap::new();
        segments.insert(start, id);
        self.threads.insert(
            name,
            Thread {
                name,
                start,
                length,
                segments,
            },
        );
        Ok(())
    }

    /// Number of successful public merges applied so far
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn thread(&self, name: ThreadName) -> Result<&Thread> {
        match self.threads.get(&name) {
            Some(thread) => Ok(thread),
            None => bail!("Unknown thread {}", name),
        }
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.threads.values()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn segment(&self, id: SegmentId) -> &Segment {
        &self.segments[id.0 as usize]
    }

    /// Segments of a thread in position order
    pub fn thread_segments(&self, name: ThreadName) -> Result<Vec<SegmentId>> {
        Ok(self.thread(name)?.segments.values().copied().collect())
    }

    pub fn segment_at(&self, name: ThreadName, position: i64) -> Result<SegmentId> {
        let thread = self.thread(name)?;
        if position < thread.start || position >= thread.end() {
            bail!(
                "Position {} is outside thread {} [{}, {})",
                position,
                name,
                thread.start,
                thread.end()
            );
        }
        match thread.segments.range(..=position).next_back() {
            Some((_, &id)) => Ok(id),
            None => bail!("Thread {} has no segment covering {}", name, position),
        }
    }

    /// The segment following `id` on its thread
    pub fn next_segment(&self, id: SegmentId) -> Option<SegmentId> {
        let segment = self.segment(id);
        let thread = self.threads.get(&segment.thread)?;
        thread.segments.get(&segment.end()).copied()
    }

    /// The segment preceding `id` on its thread
    pub fn previous_segment(&self, id: SegmentId) -> Option<SegmentId> {
        let segment = self.segment(id);
        let thread = self.threads.get(&segment.thread)?;
        thread
            .segments
            .range(..segment.start)
            .next_back()
            .map(|(_, &id)| id)
    }

    /// First or last segment of its thread
    pub fn is_stub(&self, id: SegmentId) -> bool {
        let segment = self.segment(id);
        match self.threads.get(&segment.thread) {
            Some(thread) => segment.start == thread.start || segment.end() == thread.end(),
            None => false,
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.live)
            .map(|(i, _)| BlockId(i as u32))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.live).count()
    }

    pub fn block_degree(&self, block: BlockId) -> usize {
        self.blocks[block.0 as usize].members.len()
    }

    pub fn block_length(&self, block: BlockId) -> i64 {
        self.blocks[block.0 as usize].length
    }

    pub fn block_segments(&self, block: BlockId) -> &[SegmentId] {
        &self.blocks[block.0 as usize].members
    }

    /// True if any member of the block is a thread's first or last segment
    pub fn block_has_stub(&self, block: BlockId) -> bool {
        self.block_segments(block).iter().any(|&s| self.is_stub(s))
    }

    pub fn segment_count(&self) -> usize {
        self.threads.values().map(|t| t.segments.len()).sum()
    }

    /// Make `position` the start of a segment. Splitting an aligned segment
    /// splits its whole block, so every member gains the matching boundary.
    pub fn split(&mut self, name: ThreadName, position: i64) -> Result<()> {
        let thread = self.thread(name)?;
        if position < thread.start || position > thread.end() {
            bail!(
                "Split position {} is outside thread {} [{}, {}]",
                position,
                name,
                thread.start,
                thread.end()
            );
        }
        if position == thread.start || position == thread.end() {
            return Ok(());
        }
        let id = self.segment_at(name, position)?;
        let segment = *self.segment(id);
        if segment.start == position {
            return Ok(());
        }
        let offset = position - segment.start;
        match segment.block {
            None => {
                self.split_segment(id, offset);
            }
            Some(block) => {
                let column = if segment.forward {
                    offset
                } else {
                    segment.length - offset
                };
                self.split_block(block, column);
            }
        }
        Ok(())
    }

    /// Merge the columns described by `pinch`
    pub fn merge(&mut self, pinch: &Pinch) -> Result<()> {
        self.apply_pinch(pinch, None, None)?;
        self.epoch += 1;
        Ok(())
    }

    /// Merge the columns described by `pinch`, skipping segment pairs the
    /// filter rejects
    pub fn filtered_merge(&mut self, pinch: &Pinch, filter: &SegmentFilter) -> Result<()> {
        self.apply_pinch(pinch, Some(filter), None)?;
        self.epoch += 1;
        Ok(())
    }

    pub(crate) fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    /// Shared merge loop. Column runs that were actually unioned are
    /// appended to `applied` as `(offset, length)` pairs.
    pub(crate) fn apply_pinch(
        &mut self,
        pinch: &Pinch,
        filter: Option<&SegmentFilter>,
        mut applied: Option<&mut Vec<(i64, i64)>>,
    ) -> Result<()> {
        if pinch.length < 0 {
            bail!("Pinch has negative length {}", pinch.length);
        }
        self.thread(pinch.name1)?;
        self.thread(pinch.name2)?;
        if pinch.length == 0 {
            return Ok(());
        }
        self.check_interval(pinch.name1, pinch.start1, pinch.length)?;
        self.check_interval(pinch.name2, pinch.start2, pinch.length)?;

        self.split(pinch.name1, pinch.start1)?;
        self.split(pinch.name1, pinch.end1())?;
        self.split(pinch.name2, pinch.start2)?;
        self.split(pinch.name2, pinch.end2())?;

        let mut offset = 0;
        while offset < pinch.length {
            let p1 = pinch.start1 + offset;
            // Reverse pinches walk thread 2 backwards from the interval end
            let e2 = pinch.end2() - offset;
            let p2 = pinch.start2 + offset;
            loop {
                let a = self.segment_at(pinch.name1, p1)?;
                let b = if pinch.strand {
                    self.segment_at(pinch.name2, p2)?
                } else {
                    self.segment_at(pinch.name2, e2 - 1)?
                };
                let sa = *self.segment(a);
                let sb = *self.segment(b);
                let len_a = sa.end() - p1;
                let len_b = if pinch.strand {
                    sb.end() - p2
                } else {
                    e2 - sb.start
                };
                let run = len_a.min(len_b).min(pinch.length - offset);
                if a == b && !pinch.strand && run > 1 {
                    // Palindromic self pinch: separate the two halves first
                    self.split(pinch.name1, p1 + run / 2)?;
                    continue;
                }
                if run < len_a {
                    self.split(pinch.name1, p1 + run)?;
                    continue;
                }
                if run < len_b {
                    if pinch.strand {
                        self.split(pinch.name2, p2 + run)?;
                    } else {
                        self.split(pinch.name2, e2 - run)?;
                    }
                    continue;
                }
                debug_assert_eq!(sa.start, p1);
                let accepted = match filter {
                    Some(filter) => filter(self, a, b),
                    None => true,
                };
                if accepted {
                    self.pinch_segments(a, b, pinch.strand);
                    if let Some(applied) = applied.as_deref_mut() {
                        match applied.last_mut() {
                            Some(last) if last.0 + last.1 == offset => last.1 += run,
                            _ => applied.push((offset, run)),
                        }
                    }
                }
                offset += run;
                break;
            }
        }
        Ok(())
    }

    /// Union two equal-length segments into one block
    fn pinch_segments(&mut self, a: SegmentId, b: SegmentId, strand: bool) {
        if a == b {
            return;
        }
        let sa = *self.segment(a);
        let sb = *self.segment(b);
        debug_assert_eq!(sa.length, sb.length);
        match (sa.block, sb.block) {
            (None, None) => {
                let block = self.alloc_block(sa.length, vec![a, b]);
                self.set_membership(a, Some(block), true);
                self.set_membership(b, Some(block), strand);
            }
            (Some(block), None) => {
                self.blocks[block.0 as usize].members.push(b);
                self.set_membership(b, Some(block), sa.forward == strand);
            }
            (None, Some(block)) => {
                self.blocks[block.0 as usize].members.push(a);
                self.set_membership(a, Some(block), sb.forward == strand);
            }
            (Some(block_a), Some(block_b)) => {
                if block_a == block_b {
                    // Already aligned, or a self-inverting column pairing
                    return;
                }
                let flip = sb.forward != (sa.forward == strand);
                let (keep, absorb) = if self.block_degree(block_a) >= self.block_degree(block_b) {
                    (block_a, block_b)
                } else {
                    (block_b, block_a)
                };
                let moved = std::mem::take(&mut self.blocks[absorb.0 as usize].members);
                for &member in &moved {
                    let forward = self.segment(member).forward ^ flip;
                    self.set_membership(member, Some(keep), forward);
                }
                self.blocks[keep.0 as usize].members.extend(moved);
                self.free_block(absorb);
            }
        }
    }

    /// Split every member of `block` so that block columns `[0, column)`
    /// stay in `block` and `[column, length)` move to a new block
    fn split_block(&mut self, block: BlockId, column: i64) {
        let length = self.block_length(block);
        debug_assert!(column > 0 && column < length);
        let members = std::mem::take(&mut self.blocks[block.0 as usize].members);
        self.blocks[block.0 as usize].length = column;
        let right = self.alloc_block(length - column, Vec::new());
        let mut left_members = Vec::with_capacity(members.len());
        let mut right_members = Vec::with_capacity(members.len());
        for member in members {
            let forward = self.segment(member).forward;
            if forward {
                let piece = self.split_segment(member, column);
                left_members.push(member);
                right_members.push(piece);
                self.set_membership(piece, Some(right), true);
            } else {
                // The lower thread half holds the higher block columns
                let piece = self.split_segment(member, length - column);
                right_members.push(member);
                left_members.push(piece);
                self.set_membership(member, Some(right), false);
                self.set_membership(piece, Some(block), false);
            }
        }
        self.blocks[block.0 as usize].members = left_members;
        self.blocks[right.0 as usize].members = right_members;
    }

    /// Cut a segment at `offset`, returning the new right-hand piece. The
    /// piece inherits the segment's block fields; callers fix membership.
    fn split_segment(&mut self, id: SegmentId, offset: i64) -> SegmentId {
        let segment = *self.segment(id);
        debug_assert!(offset > 0 && offset < segment.length);
        let piece = self.alloc_segment(Segment {
            start: segment.start + offset,
            length: segment.length - offset,
            ..segment
        });
        self.segments[id.0 as usize].length = offset;
        if let Some(thread) = self.threads.get_mut(&segment.thread) {
            thread.segments.insert(segment.start + offset, piece);
        }
        piece
    }

    /// Dissolve a block, leaving its segments unaligned
    pub fn destroy_block(&mut self, block: BlockId) {
        let members = std::mem::take(&mut self.blocks[block.0 as usize].members);
        for member in members {
            self.set_membership(member, None, true);
        }
        self.free_block(block);
    }

    /// Remove boundaries that carry no information, then make sure every
    /// thread's first and last position sit in their own segments.
    pub fn join_trivial_boundaries(&mut self) {
        let names: Vec<ThreadName> = self.threads.keys().copied().collect();
        for name in names {
            let Some(thread) = self.threads.get(&name) else {
                continue;
            };
            let end = thread.end();
            let mut position = thread.start;
            loop {
                let Some(left) = self.segment_starting_at(name, position) else {
                    break;
                };
                let boundary = self.segment(left).end();
                if boundary >= end {
                    break;
                }
                let Some(right) = self.segment_starting_at(name, boundary) else {
                    break;
                };
                if !self.join_if_trivial(left, right) {
                    position = boundary;
                }
            }
        }
        self.ensure_ends_are_distinct();
    }

    fn segment_starting_at(&self, name: ThreadName, position: i64) -> Option<SegmentId> {
        self.threads.get(&name)?.segments.get(&position).copied()
    }

    /// Join the adjacent segments `left` and `right` if their boundary is
    /// trivial. Returns true when a join happened.
    fn join_if_trivial(&mut self, left: SegmentId, right: SegmentId) -> bool {
        let sl = *self.segment(left);
        let sr = *self.segment(right);
        match (sl.block, sr.block) {
            (None, None) => {
                self.absorb_right(left, right);
                true
            }
            (Some(bl), Some(br)) => {
                if bl == br || sl.forward != sr.forward {
                    return false;
                }
                let (first, second) = if sl.forward { (bl, br) } else { (br, bl) };
                let Some(partners) = self.block_successors(first, second) else {
                    return false;
                };
                let first_length = self.block_length(first);
                let second_length = self.block_length(second);
                let members = std::mem::take(&mut self.blocks[first.0 as usize].members);
                let mut joined = Vec::with_capacity(members.len());
                for (member, partner) in members.into_iter().zip(partners) {
                    if self.segment(member).forward {
                        self.absorb_right(member, partner);
                        joined.push(member);
                    } else {
                        self.absorb_right(partner, member);
                        self.set_membership(partner, Some(first), false);
                        joined.push(partner);
                    }
                }
                self.blocks[second.0 as usize].members.clear();
                self.free_block(second);
                let block = &mut self.blocks[first.0 as usize];
                block.length = first_length + second_length;
                block.members = joined;
                true
            }
            _ => false,
        }
    }

    /// For every member of `first`, the segment continuing it into `second`
    /// in column order. None unless this pairs the two blocks one to one.
    fn block_successors(&self, first: BlockId, second: BlockId) -> Option<Vec<SegmentId>> {
        if self.block_degree(first) != self.block_degree(second) {
            return None;
        }
        let mut partners = Vec::with_capacity(self.block_degree(first));
        for &member in self.block_segments(first) {
            let forward = self.segment(member).forward;
            let partner = if forward {
                self.next_segment(member)?
            } else {
                self.previous_segment(member)?
            };
            let sp = self.segment(partner);
            if sp.block != Some(second) || sp.forward != forward {
                return None;
            }
            partners.push(partner);
        }
        Some(partners)
    }

    /// Extend `left` over its right neighbour `right`, releasing `right`
    fn absorb_right(&mut self, left: SegmentId, right: SegmentId) {
        let sr = *self.segment(right);
        debug_assert_eq!(self.segment(left).end(), sr.start);
        self.segments[left.0 as usize].length += sr.length;
        if let Some(thread) = self.threads.get_mut(&sr.thread) {
            thread.segments.remove(&sr.start);
        }
        self.free_segment(right);
    }

    fn ensure_ends_are_distinct(&mut self) {
        let bounds: Vec<(ThreadName, i64, i64)> = self
            .threads
            .values()
            .filter(|t| t.length >= 2)
            .map(|t| (t.name, t.start, t.end()))
            .collect();
        for (name, start, end) in bounds {
            // Both positions lie inside the thread
            let _ = self.split(name, start + 1);
            let _ = self.split(name, end - 1);
        }
    }

    /// Verify the structural invariants of the graph
    pub fn check(&self) -> Result<()> {
        for thread in self.threads.values() {
            let mut expected = thread.start;
            for (&start, &id) in &thread.segments {
                let segment = self.segment(id);
                if !segment.live || segment.thread != thread.name {
                    bail!("Thread {} indexes a stale segment at {}", thread.name, start);
                }
                if segment.start != start || start != expected {
                    bail!(
                        "Thread {} segments are not contiguous at {} (expected {})",
                        thread.name,
                        start,
                        expected
                    );
                }
                if segment.length < 1 {
                    bail!("Empty segment on thread {} at {}", thread.name, start);
                }
                if let Some(block) = segment.block {
                    let b = &self.blocks[block.0 as usize];
                    if !b.live || !b.members.contains(&id) {
                        bail!("Segment {}:{} is missing from its block", thread.name, start);
                    }
                }
                expected = segment.end();
            }
            if expected != thread.end() {
                bail!("Thread {} segments end at {}, not {}", thread.name, expected, thread.end());
            }
        }
        for block in self.blocks() {
            let b = &self.blocks[block.0 as usize];
            if b.members.is_empty() {
                bail!("Block {:?} has no segments", block);
            }
            for &member in &b.members {
                let segment = self.segment(member);
                if !segment.live || segment.block != Some(block) {
                    bail!("Block {:?} lists a segment it does not own", block);
                }
                if segment.length != b.length {
                    bail!(
                        "Segment length {} differs from block length {}",
                        segment.length,
                        b.length
                    );
                }
            }
        }
        Ok(())
    }

    fn check_interval(&self, name: ThreadName, start: i64, length: i64) -> Result<()> {
        let thread = self.thread(name)?;
        if start < thread.start || start + length > thread.end() {
            bail!(
                "Interval [{}, {}) is outside thread {} [{}, {})",
                start,
                start + length,
                name,
                thread.start,
                thread.end()
            );
        }
        Ok(())
    }

    fn set_membership(&mut self, id: SegmentId, block: Option<BlockId>, forward: bool) {
        let segment = &mut self.segments[id.0 as usize];
        segment.block = block;
        segment.forward = forward;
    }

    fn alloc_segment(&mut self, segment: Segment) -> SegmentId {
        match self.free_segments.pop() {
            Some(id) => {
                self.segments[id.0 as usize] = segment;
                id
            }
            None => {
                self.segments.push(segment);
                SegmentId((self.segments.len() - 1) as u32)
            }
        }
    }

    fn free_segment(&mut self, id: SegmentId) {
        let segment = &mut self.segments[id.0 as usize];
        segment.live = false;
        segment.block = None;
        self.free_segments.push(id);
    }

    fn alloc_block(&mut self, length: i64, members: Vec<SegmentId>) -> BlockId {
        let block = Block {
            length,
            members,
            live: true,
        };
        match self.free_blocks.pop() {
            Some(id) => {
                self.blocks[id.0 as usize] = block;
                id
            }
            None => {
                self.blocks.push(block);
                BlockId((self.blocks.len() - 1) as u32)
            }
        }
    }

    fn free_block(&mut self, id: BlockId) {
        let block = &mut self.blocks[id.0 as usize];
        block.live = false;
        block.members.clear();
        self.free_blocks.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_threads() -> MergeGraph {
        MergeGraph::from_threads([(0, 0, 100), (1, 0, 100), (2, 0, 100)]).unwrap()
    }

    fn aligned(graph: &MergeGraph, a: (ThreadName, i64), b: (ThreadName, i64)) -> bool {
        let sa = graph.segment(graph.segment_at(a.0, a.1).unwrap());
        let sb = graph.segment(graph.segment_at(b.0, b.1).unwrap());
        if sa.block.is_none() || sa.block != sb.block {
            return false;
        }
        let col_a = if sa.forward { a.1 - sa.start } else { sa.end() - 1 - a.1 };
        let col_b = if sb.forward { b.1 - sb.start } else { sb.end() - 1 - b.1 };
        col_a == col_b
    }

    #[test]
    fn test_split_is_idempotent() {
        let mut graph = three_threads();
        graph.split(0, 40).unwrap();
        graph.split(0, 40).unwrap();
        graph.split(0, 0).unwrap();
        graph.split(0, 100).unwrap();
        assert_eq!(graph.thread(0).unwrap().segment_count(), 2);
        assert!(graph.split(0, 101).is_err());
        graph.check().unwrap();
    }

    #[test]
    fn test_forward_merge() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 10, 10, 20, true)).unwrap();
        graph.check().unwrap();

        let id = graph.segment_at(0, 15).unwrap();
        let block = graph.segment(id).block.unwrap();
        assert_eq!(graph.block_degree(block), 2);
        assert_eq!(graph.block_length(block), 20);
        assert!(aligned(&graph, (0, 12), (1, 12)));
        assert!(!aligned(&graph, (0, 9), (1, 9)));
        assert_eq!(graph.epoch(), 1);
    }

    #[test]
    fn test_reverse_merge_pairs_opposite_ends() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 0, 50, 10, false)).unwrap();
        graph.check().unwrap();
        for i in 0..10 {
            assert!(aligned(&graph, (0, i), (1, 59 - i)));
        }
    }

    #[test]
    fn test_split_propagates_through_block() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 10, 40, 20, false)).unwrap();
        graph.split(0, 15).unwrap();
        graph.check().unwrap();
        // Column 5 of the pinch pairs thread 0 position 15 with 40 + 19 - 5
        assert_eq!(graph.segment(graph.segment_at(1, 54).unwrap()).end(), 55);
        assert!(aligned(&graph, (0, 15), (1, 54)));
        assert!(aligned(&graph, (0, 14), (1, 55)));
    }

    #[test]
    fn test_transitive_merge_flips_orientation() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 0, 0, 10, true)).unwrap();
        graph.merge(&Pinch::new(2, 1, 0, 0, 10, false)).unwrap();
        graph.merge(&Pinch::new(0, 2, 20, 20, 10, true)).unwrap();
        graph.merge(&Pinch::new(0, 0, 0, 20, 10, true)).unwrap();
        graph.check().unwrap();
        let block = graph.segment(graph.segment_at(0, 0).unwrap()).block.unwrap();
        assert_eq!(graph.block_degree(block), 5);
        assert!(aligned(&graph, (2, 9), (0, 0)));
        assert!(aligned(&graph, (2, 29), (0, 9)));
    }

    #[test]
    fn test_palindromic_self_pinch() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 0, 10, 10, 6, false)).unwrap();
        graph.check().unwrap();
        assert!(aligned(&graph, (0, 10), (0, 15)));
        assert!(aligned(&graph, (0, 12), (0, 13)));
    }

    #[test]
    fn test_zero_length_and_invalid_pinches() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 10, 10, 0, true)).unwrap();
        assert_eq!(graph.block_count(), 0);
        assert!(graph.merge(&Pinch::new(0, 1, 95, 10, 10, true)).is_err());
        assert!(graph.merge(&Pinch::new(0, 7, 0, 0, 10, true)).is_err());
        assert!(graph.merge(&Pinch::new(0, 7, 0, 0, 0, true)).is_err());
        assert!(graph.merge(&Pinch::new(9, 1, 0, 0, 0, false)).is_err());
        assert_eq!(graph.epoch(), 1);
    }

    #[test]
    fn test_filter_rejects_pairs() {
        let mut graph = three_threads();
        let filter = |_: &MergeGraph, _: SegmentId, _: SegmentId| false;
        graph.filtered_merge(&Pinch::new(0, 1, 0, 0, 10, true), &filter).unwrap();
        assert_eq!(graph.block_count(), 0);
        assert_eq!(graph.epoch(), 1);
    }

    #[test]
    fn test_join_trivial_boundaries() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 10, 10, 10, true)).unwrap();
        graph.merge(&Pinch::new(0, 1, 20, 20, 10, true)).unwrap();
        graph.split(2, 50).unwrap();
        graph.join_trivial_boundaries();
        graph.check().unwrap();

        let id = graph.segment_at(0, 10).unwrap();
        assert_eq!(graph.segment(id).length, 20);
        assert_eq!(graph.block_count(), 1);
        // Thread 2 only keeps its end boundaries
        let starts: Vec<i64> = graph
            .thread_segments(2)
            .unwrap()
            .into_iter()
            .map(|s| graph.segment(s).start)
            .collect();
        assert_eq!(starts, vec![0, 1, 99]);
    }

    #[test]
    fn test_join_reverse_members() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 10, 60, 10, false)).unwrap();
        graph.merge(&Pinch::new(0, 1, 20, 50, 10, false)).unwrap();
        graph.join_trivial_boundaries();
        graph.check().unwrap();
        let block = graph.segment(graph.segment_at(1, 55).unwrap()).block.unwrap();
        assert_eq!(graph.block_length(block), 20);
        for i in 0..20 {
            assert!(aligned(&graph, (0, 10 + i), (1, 69 - i)));
        }
    }

    #[test]
    fn test_destroy_block() {
        let mut graph = three_threads();
        graph.merge(&Pinch::new(0, 1, 10, 10, 10, true)).unwrap();
        let block = graph.segment(graph.segment_at(0, 10).unwrap()).block.unwrap();
        graph.destroy_block(block);
        graph.check().unwrap();
        assert_eq!(graph.block_count(), 0);
        assert!(graph.segment(graph.segment_at(1, 10).unwrap()).block.is_none());
    }
}
