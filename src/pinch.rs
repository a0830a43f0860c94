use crate::merge_graph::ThreadName;
use std::collections::{HashMap, VecDeque};

/// A request to merge `length` consecutive columns of two threads.
///
/// Column `i` of the pinch pairs position `start1 + i` on `name1` with
/// position `start2 + i` on `name2` when `strand` is true, and with
/// `start2 + length - 1 - i` when it is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pinch {
    pub name1: ThreadName,
    pub name2: ThreadName,
    pub start1: i64,
    pub start2: i64,
    pub length: i64,
    pub strand: bool,
}

impl Pinch {
    pub fn new(
        name1: ThreadName,
        name2: ThreadName,
        start1: i64,
        start2: i64,
        length: i64,
        strand: bool,
    ) -> Self {
        Pinch {
            name1,
            name2,
            start1,
            start2,
            length,
            strand,
        }
    }

    pub fn end1(&self) -> i64 {
        self.start1 + self.length
    }

    pub fn end2(&self) -> i64 {
        self.start2 + self.length
    }

    /// Position on the second thread paired with column `offset`
    pub fn position2(&self, offset: i64) -> i64 {
        if self.strand {
            self.start2 + offset
        } else {
            self.start2 + self.length - 1 - offset
        }
    }

    /// The pinch restricted to columns `[offset, offset + length)`
    pub fn sub_pinch(&self, offset: i64, length: i64) -> Pinch {
        let start2 = if self.strand {
            self.start2 + offset
        } else {
            self.start2 + self.length - offset - length
        };
        Pinch {
            start1: self.start1 + offset,
            start2,
            length,
            ..*self
        }
    }

    /// Remove `trim` columns from both ends. Pinches too short to survive
    /// the trim are dropped.
    pub fn trimmed(&self, trim: i64) -> Option<Pinch> {
        if trim <= 0 {
            return Some(*self);
        }
        if self.length <= 2 * trim {
            return None;
        }
        Some(self.sub_pinch(trim, self.length - 2 * trim))
    }
}

/// A restartable stream of pinches. Each annealing round calls `reset`
/// before draining the source.
pub trait PinchSource {
    fn reset(&mut self);
    fn next_pinch(&mut self) -> Option<Pinch>;
}

/// Pinch source over an owned list
#[derive(Debug, Clone, Default)]
pub struct VecPinchSource {
    pinches: Vec<Pinch>,
    cursor: usize,
}

impl VecPinchSource {
    pub fn new(pinches: Vec<Pinch>) -> Self {
        VecPinchSource { pinches, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.pinches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinches.is_empty()
    }
}

impl PinchSource for VecPinchSource {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn next_pinch(&mut self) -> Option<Pinch> {
        let pinch = self.pinches.get(self.cursor).copied();
        if pinch.is_some() {
            self.cursor += 1;
        }
        pinch
    }
}

/// Single aligned position pair, as produced by a pairwise aligner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedPair {
    pub name1: ThreadName,
    pub position1: i64,
    pub forward1: bool,
    pub name2: ThreadName,
    pub position2: i64,
    pub forward2: bool,
}

/// Source turning aligned pairs into one-column pinches
#[derive(Debug, Clone, Default)]
pub struct AlignedPairSource {
    pairs: Vec<AlignedPair>,
    cursor: usize,
}

impl AlignedPairSource {
    pub fn new(pairs: Vec<AlignedPair>) -> Self {
        AlignedPairSource { pairs, cursor: 0 }
    }
}

impl PinchSource for AlignedPairSource {
    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn next_pinch(&mut self) -> Option<Pinch> {
        let pair = self.pairs.get(self.cursor)?;
        self.cursor += 1;
        Some(Pinch::new(
            pair.name1,
            pair.name2,
            pair.position1,
            pair.position2,
            1,
            pair.forward1 == pair.forward2,
        ))
    }
}

/// Gapless multiple alignment block: every row covers `length` columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedBlock {
    pub length: i64,
    /// (thread, start, forward) per row
    pub rows: Vec<(ThreadName, i64, bool)>,
}

/// Source pinching the first row of each block against every other row
#[derive(Debug, Clone, Default)]
pub struct AlignedBlockSource {
    blocks: Vec<AlignedBlock>,
    block: usize,
    row: usize,
}

impl AlignedBlockSource {
    pub fn new(blocks: Vec<AlignedBlock>) -> Self {
        AlignedBlockSource {
            blocks,
            block: 0,
            row: 1,
        }
    }
}

impl PinchSource for AlignedBlockSource {
    fn reset(&mut self) {
        self.block = 0;
        self.row = 1;
    }

    fn next_pinch(&mut self) -> Option<Pinch> {
        loop {
            let block = self.blocks.get(self.block)?;
            if self.row >= block.rows.len() {
                self.block += 1;
                self.row = 1;
                continue;
            }
            let (name1, start1, forward1) = block.rows[0];
            let (name2, start2, forward2) = block.rows[self.row];
            self.row += 1;
            return Some(Pinch::new(
                name1,
                name2,
                start1,
                start2,
                block.length,
                forward1 == forward2,
            ));
        }
    }
}

/// Masked (soft-masked or N) intervals per thread, sorted and disjoint
#[derive(Debug, Clone, Default)]
pub struct RepeatMask {
    intervals: HashMap<ThreadName, Vec<(i64, i64)>>,
}

impl RepeatMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record masked runs of `sequence`, whose first base sits at `offset`
    pub fn add_sequence(&mut self, name: ThreadName, offset: i64, sequence: &[u8]) {
        let mut runs = Vec::new();
        let mut run_start: Option<usize> = None;
        for (i, &base) in sequence.iter().enumerate() {
            let masked = base.is_ascii_lowercase() || base == b'N' || base == b'n';
            match (masked, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(s)) => {
                    runs.push((offset + s as i64, offset + i as i64));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            runs.push((offset + s as i64, offset + sequence.len() as i64));
        }
        if !runs.is_empty() {
            self.intervals.insert(name, runs);
        }
    }

    pub fn is_masked(&self, name: ThreadName, position: i64) -> bool {
        self.intervals.get(&name).is_some_and(|runs| {
            let i = runs.partition_point(|&(_, end)| end <= position);
            i < runs.len() && runs[i].0 <= position
        })
    }

    /// Split a pinch into the maximal sub-pinches whose columns are
    /// unmasked on both threads
    pub fn unmasked_pieces(&self, pinch: &Pinch) -> Vec<Pinch> {
        if !self.intervals.contains_key(&pinch.name1) && !self.intervals.contains_key(&pinch.name2)
        {
            return vec![*pinch];
        }
        let mut pieces = Vec::new();
        let mut run_start: Option<i64> = None;
        for offset in 0..pinch.length {
            let masked = self.is_masked(pinch.name1, pinch.start1 + offset)
                || self.is_masked(pinch.name2, pinch.position2(offset));
            match (masked, run_start) {
                (false, None) => run_start = Some(offset),
                (true, Some(s)) => {
                    pieces.push(pinch.sub_pinch(s, offset - s));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            pieces.push(pinch.sub_pinch(s, pinch.length - s));
        }
        pieces
    }
}

/// Per-round view of a pinch source: trims each pinch and, unless repeats
/// are being aligned, drops masked columns.
pub struct RoundSource<'a> {
    inner: &'a mut dyn PinchSource,
    trim: i64,
    mask: Option<&'a RepeatMask>,
    pending: VecDeque<Pinch>,
}

impl<'a> RoundSource<'a> {
    pub fn new(inner: &'a mut dyn PinchSource, trim: i64, mask: Option<&'a RepeatMask>) -> Self {
        RoundSource {
            inner,
            trim,
            mask,
            pending: VecDeque::new(),
        }
    }
}

impl PinchSource for RoundSource<'_> {
    fn reset(&mut self) {
        self.inner.reset();
        self.pending.clear();
    }

    fn next_pinch(&mut self) -> Option<Pinch> {
        loop {
            if let Some(pinch) = self.pending.pop_front() {
                return Some(pinch);
            }
            let pinch = self.inner.next_pinch()?;
            let Some(trimmed) = pinch.trimmed(self.trim) else {
                continue;
            };
            match self.mask {
                Some(mask) => self.pending.extend(mask.unmasked_pieces(&trimmed)),
                None => return Some(trimmed),
            }
        }
    }
}
