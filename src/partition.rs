//! Breaking up oversized adjacency components.
//!
//! Highly repetitive input can produce adjacency components that are far
//! larger than the rest of the graph. Each such component is reduced to a
//! weighted graph over its branch vertices and cut greedily; cut edges made
//! of unaligned segments are split at their midpoint, and the midpoint
//! columns are kept out of the final pass-through collapse.

use crate::adjacency::{element_of, left, right, Element, GraphSnapshot, PassThrough};
use crate::merge_graph::{MergeGraph, ThreadName};
use crate::union_find::UnionFind;
use anyhow::Result;
use indexmap::IndexMap;
use log::{debug, info};
use std::collections::{HashMap, HashSet};

/// Weight of an edge the greedy breakup may never remove
pub const UNSPLITTABLE: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedEdge {
    pub from: usize,
    pub to: usize,
    pub weight: u64,
}

/// Greedily grow components from the heaviest edges while they stay within
/// `max_component_size` vertices. Unsplittable edges are always kept.
/// Returns the indices of edges joining different final components.
pub fn breakup_component_greedily(node_count: usize, edges: &[WeightedEdge], max_component_size: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..edges.len()).collect();
    order.sort_by(|&a, &b| edges[b].weight.cmp(&edges[a].weight).then(a.cmp(&b)));

    let mut uf = UnionFind::new(node_count);
    for &e in order.iter().filter(|&&e| edges[e].weight == UNSPLITTABLE) {
        uf.union(edges[e].from, edges[e].to);
    }
    for &e in order.iter().filter(|&&e| edges[e].weight != UNSPLITTABLE) {
        let (from, to) = (edges[e].from, edges[e].to);
        if uf.connected(from, to) {
            continue;
        }
        if uf.set_size(from) + uf.set_size(to) <= max_component_size {
            uf.union(from, to);
        }
    }
    (0..edges.len())
        .filter(|&e| !uf.connected(edges[e].from, edges[e].to))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub components: usize,
    pub oversized: usize,
    pub edges_removed: usize,
    pub columns_marked: usize,
}

#[derive(Default)]
struct EdgeGroup {
    splittable: Vec<usize>,
    unsplittable: bool,
}

/// Branch vertex reached by leaving `start` through pass-through elements,
/// with the elements crossed on the way
fn hop(snapshot: &GraphSnapshot, start: usize, via: usize) -> (usize, Vec<usize>) {
    let mut crossed = Vec::new();
    let mut vertex = via;
    let mut seen = HashSet::new();
    while snapshot.passes_through(element_of(vertex), PassThrough::Degree1) && seen.insert(vertex) {
        let element = element_of(vertex);
        crossed.push(element);
        let far = if vertex == left(element) { right(element) } else { left(element) };
        match snapshot.adjacent(far).first() {
            Some(&next) => vertex = next,
            None => return (start, crossed),
        }
    }
    (vertex, crossed)
}

/// Split oversized adjacency components and return the midpoint columns
/// that must not be passed through by the final derivation
pub fn partition_components(graph: &mut MergeGraph, size_ratio: f64) -> Result<(HashSet<(ThreadName, i64)>, PartitionReport)> {
    let snapshot = GraphSnapshot::new(graph);
    let mut report = PartitionReport::default();
    let mut selected = HashSet::new();
    let vertex_count = snapshot.vertex_count();
    if vertex_count == 0 {
        return Ok((selected, report));
    }

    let mut uf = snapshot.adjacency_union_find(PassThrough::Degree1);
    let ends = snapshot.thread_ends();
    for &end in ends {
        uf.union(ends[0], end);
    }
    let (labels, component_count) = uf.labels();
    let sink = ends.first().map(|&v| labels[v]);
    report.components = component_count;

    let budget = ((size_ratio * (vertex_count as f64).ln()).ceil() as usize).max(1);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); component_count];
    for (vertex, &label) in labels.iter().enumerate() {
        members[label].push(vertex);
    }

    let mut midpoints = Vec::new();
    for (label, vertices) in members.iter().enumerate() {
        if Some(label) == sink || vertices.len() <= budget {
            continue;
        }
        report.oversized += 1;

        let branch: Vec<usize> = vertices
            .iter()
            .copied()
            .filter(|&v| !snapshot.passes_through(element_of(v), PassThrough::Degree1))
            .collect();
        let local: HashMap<usize, usize> = branch.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        let mut groups: IndexMap<(usize, usize), EdgeGroup> = IndexMap::new();
        for &vertex in &branch {
            for &via in snapshot.adjacent(vertex) {
                let (target, crossed) = hop(&snapshot, vertex, via);
                if vertex >= target || !local.contains_key(&target) {
                    continue;
                }
                let group = groups.entry((vertex, target)).or_default();
                match crossed.first() {
                    Some(&element) => group.splittable.push(element),
                    None => group.unsplittable = true,
                }
            }
        }

        let edges: Vec<WeightedEdge> = groups
            .iter()
            .map(|(&(from, to), group)| WeightedEdge {
                from: local[&from],
                to: local[&to],
                weight: if group.unsplittable {
                    UNSPLITTABLE
                } else {
                    group.splittable.len() as u64
                },
            })
            .collect();
        let removed = breakup_component_greedily(branch.len(), &edges, budget);
        report.edges_removed += removed.len();
        for e in removed {
            let Some((_, group)) = groups.get_index(e) else {
                continue;
            };
            for &element in &group.splittable {
                if let Element::Segment(id) = snapshot.element(element) {
                    let segment = graph.segment(id);
                    midpoints.push((segment.thread, segment.start + (segment.length - 1) / 2));
                }
            }
        }
        debug!(
            "Adjacency component {} has {} vertices (budget {}), {} branch vertices",
            label,
            vertices.len(),
            budget,
            branch.len()
        );
    }

    for &(thread, midpoint) in &midpoints {
        graph.split(thread, midpoint)?;
        graph.split(thread, midpoint + 1)?;
        selected.insert((thread, midpoint));
    }
    report.columns_marked = selected.len();
    if report.oversized > 0 {
        info!(
            "Partitioned {} oversized adjacency components, marked {} columns",
            report.oversized, report.columns_marked
        );
    }
    Ok((selected, report))
}
