//! Block-end adjacency view of a merge graph.
//!
//! Every block, and every unaligned segment acting as a degree-1 block, is an
//! *element* with a left and a right end. Thread adjacencies connect the
//! 3' end of one segment to the 5' end of the next. Derivations work on an
//! immutable [`GraphSnapshot`] taken before they start.

use crate::merge_graph::{BlockId, MergeGraph, SegmentId, ThreadName};
use crate::union_find::UnionFind;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    Block(BlockId),
    /// Unaligned segment
    Segment(SegmentId),
}

/// Which degree-1 elements are collapsed into their adjacency component
#[derive(Debug, Clone, Copy)]
pub enum PassThrough<'a> {
    /// Every non-stub degree-1 element
    Degree1,
    /// None at all
    Nothing,
    /// Degree-1 elements except those whose first position is listed
    Selected(&'a HashSet<(ThreadName, i64)>),
}

/// Immutable snapshot of elements and adjacencies.
///
/// Vertex `2 * e` is the left end of element `e`, `2 * e + 1` its right end.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    elements: Vec<Element>,
    lengths: Vec<i64>,
    degrees: Vec<usize>,
    stubs: Vec<bool>,
    /// First position (thread, start) of the element's first segment
    anchors: Vec<(ThreadName, i64)>,
    index: HashMap<Element, usize>,
    adjacencies: Vec<Vec<usize>>,
    thread_ends: Vec<usize>,
}

pub fn left(element: usize) -> usize {
    2 * element
}

pub fn right(element: usize) -> usize {
    2 * element + 1
}

pub fn element_of(vertex: usize) -> usize {
    vertex / 2
}

impl GraphSnapshot {
    pub fn new(graph: &MergeGraph) -> Self {
        let mut snapshot = GraphSnapshot::default();
        for block in graph.blocks() {
            let members = graph.block_segments(block);
            let anchor = members
                .iter()
                .map(|&s| {
                    let segment = graph.segment(s);
                    (segment.thread, segment.start)
                })
                .min()
                .unwrap_or((0, 0));
            snapshot.push(
                Element::Block(block),
                graph.block_length(block),
                members.len(),
                graph.block_has_stub(block),
                anchor,
            );
        }
        for thread in graph.threads() {
            for id in graph.thread_segments(thread.name()).unwrap_or_default() {
                let segment = graph.segment(id);
                if segment.block.is_none() {
                    snapshot.push(
                        Element::Segment(id),
                        segment.length,
                        1,
                        graph.is_stub(id),
                        (segment.thread, segment.start),
                    );
                }
            }
        }
        snapshot.adjacencies = vec![Vec::new(); 2 * snapshot.elements.len()];

        for thread in graph.threads() {
            let segments = graph.thread_segments(thread.name()).unwrap_or_default();
            let Some((&first, &last)) = segments.first().zip(segments.last()) else {
                continue;
            };
            snapshot.thread_ends.push(snapshot.five_prime(graph, first));
            snapshot.thread_ends.push(snapshot.three_prime(graph, last));
            for pair in segments.windows(2) {
                let from = snapshot.three_prime(graph, pair[0]);
                let to = snapshot.five_prime(graph, pair[1]);
                snapshot.adjacencies[from].push(to);
                snapshot.adjacencies[to].push(from);
            }
        }
        snapshot
    }

    fn push(&mut self, element: Element, length: i64, degree: usize, stub: bool, anchor: (ThreadName, i64)) {
        self.index.insert(element, self.elements.len());
        self.elements.push(element);
        self.lengths.push(length);
        self.degrees.push(degree);
        self.stubs.push(stub);
        self.anchors.push(anchor);
    }

    /// Element index holding a segment
    pub fn element_of_segment(&self, graph: &MergeGraph, id: SegmentId) -> Option<usize> {
        let key = match graph.segment(id).block {
            Some(block) => Element::Block(block),
            None => Element::Segment(id),
        };
        self.index.get(&key).copied()
    }

    fn five_prime(&self, graph: &MergeGraph, id: SegmentId) -> usize {
        let element = self.element_of_segment(graph, id).unwrap_or(0);
        if graph.segment(id).forward {
            left(element)
        } else {
            right(element)
        }
    }

    fn three_prime(&self, graph: &MergeGraph, id: SegmentId) -> usize {
        let element = self.element_of_segment(graph, id).unwrap_or(0);
        if graph.segment(id).forward {
            right(element)
        } else {
            left(element)
        }
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn vertex_count(&self) -> usize {
        2 * self.elements.len()
    }

    pub fn element_index(&self, element: Element) -> Option<usize> {
        self.index.get(&element).copied()
    }

    pub fn element(&self, index: usize) -> Element {
        self.elements[index]
    }

    pub fn length(&self, index: usize) -> i64 {
        self.lengths[index]
    }

    pub fn degree(&self, index: usize) -> usize {
        self.degrees[index]
    }

    pub fn is_stub(&self, index: usize) -> bool {
        self.stubs[index]
    }

    pub fn anchor(&self, index: usize) -> (ThreadName, i64) {
        self.anchors[index]
    }

    /// Vertices joined to `vertex` by a thread adjacency
    pub fn adjacent(&self, vertex: usize) -> &[usize] {
        &self.adjacencies[vertex]
    }

    /// Outer ends of every thread: 5' of the first segment, 3' of the last
    pub fn thread_ends(&self) -> &[usize] {
        &self.thread_ends
    }

    pub fn passes_through(&self, index: usize, pass: PassThrough) -> bool {
        if self.degrees[index] != 1 || self.stubs[index] {
            return false;
        }
        match pass {
            PassThrough::Degree1 => true,
            PassThrough::Nothing => false,
            PassThrough::Selected(keep) => !keep.contains(&self.anchors[index]),
        }
    }

    /// Union-find over vertices joining thread adjacencies and the two ends
    /// of every pass-through element
    pub fn adjacency_union_find(&self, pass: PassThrough) -> UnionFind {
        let mut uf = UnionFind::new(self.vertex_count());
        for (vertex, targets) in self.adjacencies.iter().enumerate() {
            for &target in targets {
                uf.union(vertex, target);
            }
        }
        for element in 0..self.element_count() {
            if self.passes_through(element, pass) {
                uf.union(left(element), right(element));
            }
        }
        uf
    }

    /// Dense adjacency component label of every vertex
    pub fn adjacency_components(&self, pass: PassThrough) -> (Vec<usize>, usize) {
        self.adjacency_union_find(pass).labels()
    }
}

/// Per-thread runs of segments sharing an adjacency component label
#[derive(Debug, Clone, Default)]
pub struct LabelIntervals {
    /// thread -> run start -> (run end, label)
    runs: HashMap<ThreadName, BTreeMap<i64, (i64, usize)>>,
}

impl LabelIntervals {
    /// Label every segment with the adjacency component of its element's
    /// left end, coalescing equal neighbours
    pub fn new(graph: &MergeGraph, pass: PassThrough) -> Self {
        let snapshot = GraphSnapshot::new(graph);
        let (labels, _) = snapshot.adjacency_components(pass);
        let mut runs = HashMap::new();
        for thread in graph.threads() {
            let mut thread_runs: BTreeMap<i64, (i64, usize)> = BTreeMap::new();
            let mut current: Option<(i64, i64, usize)> = None;
            for id in graph.thread_segments(thread.name()).unwrap_or_default() {
                let segment = graph.segment(id);
                let element = snapshot.element_of_segment(graph, id).unwrap_or(0);
                let label = labels[left(element)];
                current = match current {
                    Some((start, _, l)) if l == label => Some((start, segment.end(), l)),
                    Some((start, end, l)) => {
                        thread_runs.insert(start, (end, l));
                        Some((segment.start, segment.end(), label))
                    }
                    None => Some((segment.start, segment.end(), label)),
                };
            }
            if let Some((start, end, label)) = current {
                thread_runs.insert(start, (end, label));
            }
            runs.insert(thread.name(), thread_runs);
        }
        LabelIntervals { runs }
    }

    /// The run `(start, end, label)` covering a position
    pub fn run_at(&self, name: ThreadName, position: i64) -> Option<(i64, i64, usize)> {
        let (&start, &(end, label)) = self.runs.get(&name)?.range(..=position).next_back()?;
        (position < end).then_some((start, end, label))
    }
}
