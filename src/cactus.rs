//! Cactus derivation.
//!
//! Adjacency components become the nodes of a multigraph whose edges are
//! the blocks. Stems of bridges are closed into cycles, leaving a
//! 2-edge-connected graph; its 2-edge cuts are then grouped into chains and
//! its 3-edge-connected components into nets.
//!
//! Cut classes are found by XOR labelling: every non-tree edge of a DFS
//! tree draws a random label and every tree edge takes the XOR of the
//! labels crossing it. Two edges form a cut pair exactly when their labels
//! are equal.

use crate::adjacency::{left, right, Element, GraphSnapshot, PassThrough};
use crate::merge_graph::{BlockId, MergeGraph};
use crate::union_find::UnionFind;
use anyhow::{bail, Result};
use indexmap::IndexMap;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

const CYCLE_LABEL_SEED: u64 = 0x6361_6374_7573;

#[derive(Debug, Clone, Copy)]
pub struct CactusOptions<'a> {
    pub pass_through: PassThrough<'a>,
    /// Put every thread end in the sink component. Otherwise only one end
    /// per connected component is attached.
    pub attach_ends: bool,
}

impl Default for CactusOptions<'_> {
    fn default() -> Self {
        CactusOptions {
            pass_through: PassThrough::Degree1,
            attach_ends: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLink {
    pub element: Element,
    /// Traversed from left end to right end
    pub forward: bool,
    pub length: i64,
    pub degree: usize,
    pub stub: bool,
}

/// A cycle of the cactus. Link `i` runs from `nodes[i]` to
/// `nodes[(i + 1) % len]`.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    pub links: Vec<ChainLink>,
    pub nodes: Vec<usize>,
}

impl Chain {
    /// Summed length of the non-stub links
    pub fn base_length(&self) -> i64 {
        self.links.iter().filter(|l| !l.stub).map(|l| l.length).sum()
    }

    pub fn max_degree(&self) -> usize {
        self.links
            .iter()
            .filter(|l| !l.stub)
            .map(|l| l.degree)
            .max()
            .unwrap_or(0)
    }

    /// Chains without an aligned non-stub block carry no alignment
    pub fn is_trivial(&self) -> bool {
        self.max_degree() <= 1 || self.base_length() == 0
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.links.iter().filter_map(|l| match l.element {
            Element::Block(block) => Some(block),
            Element::Segment(_) => None,
        })
    }
}

/// A net: a 3-edge-connected group of adjacency components
#[derive(Debug, Clone, Default)]
pub struct CactusNode {
    pub components: Vec<usize>,
    pub chains: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct CactusGraph {
    snapshot: GraphSnapshot,
    components: Vec<usize>,
    nodes: Vec<CactusNode>,
    chains: Vec<Chain>,
    sink: usize,
    sink_component: usize,
    element_chain: Vec<Option<usize>>,
}

struct SpanningForest {
    parent_edge: Vec<Option<usize>>,
    depth: Vec<usize>,
    order: Vec<usize>,
    disc: Vec<usize>,
    low: Vec<usize>,
}

fn other_end(edge: (usize, usize), node: usize) -> usize {
    if edge.0 == node {
        edge.1
    } else {
        edge.0
    }
}

/// Iterative DFS forest with discovery times and low-links, rooted at
/// `root` first
fn spanning_forest(node_count: usize, edges: &[(usize, usize)], root: usize) -> SpanningForest {
    let mut incident = vec![Vec::new(); node_count];
    for (e, &(u, v)) in edges.iter().enumerate() {
        incident[u].push((v, e));
        if u != v {
            incident[v].push((u, e));
        }
    }
    let unvisited = usize::MAX;
    let mut forest = SpanningForest {
        parent_edge: vec![None; node_count],
        depth: vec![0; node_count],
        order: Vec::with_capacity(node_count),
        disc: vec![unvisited; node_count],
        low: vec![0; node_count],
    };
    for start in std::iter::once(root).chain(0..node_count) {
        if start >= node_count || forest.disc[start] != unvisited {
            continue;
        }
        forest.disc[start] = forest.order.len();
        forest.low[start] = forest.disc[start];
        forest.order.push(start);
        let mut stack = vec![(start, 0usize)];
        while let Some(top) = stack.last_mut() {
            let v = top.0;
            if let Some(&(w, e)) = incident[v].get(top.1) {
                top.1 += 1;
                if forest.parent_edge[v] == Some(e) {
                    continue;
                }
                if forest.disc[w] == unvisited {
                    forest.disc[w] = forest.order.len();
                    forest.low[w] = forest.disc[w];
                    forest.order.push(w);
                    forest.parent_edge[w] = Some(e);
                    forest.depth[w] = forest.depth[v] + 1;
                    stack.push((w, 0));
                } else {
                    forest.low[v] = forest.low[v].min(forest.disc[w]);
                }
            } else {
                stack.pop();
                if let Some(&(u, _)) = stack.last() {
                    forest.low[u] = forest.low[u].min(forest.low[v]);
                }
            }
        }
    }
    forest
}

/// Identify the two ends of every maximal bridge path, turning each stem
/// into a cycle. Returns the merged node labelling.
fn circularise_stems(node_count: usize, edges: &[(usize, usize)], sink: usize) -> (Vec<usize>, usize) {
    let forest = spanning_forest(node_count, edges, sink);
    let mut bridges: Vec<Vec<(usize, usize)>> = vec![Vec::new(); node_count];
    for w in 0..node_count {
        if let Some(e) = forest.parent_edge[w] {
            let u = other_end(edges[e], w);
            if forest.low[w] > forest.disc[u] {
                bridges[u].push((w, e));
                bridges[w].push((u, e));
            }
        }
    }
    let is_anchor = |v: usize| v == sink || bridges[v].len() != 2;
    let mut uf = UnionFind::new(node_count);
    let mut walked = vec![false; edges.len()];
    for u in 0..node_count {
        if !is_anchor(u) {
            continue;
        }
        for &(first, e) in &bridges[u] {
            if walked[e] {
                continue;
            }
            walked[e] = true;
            let (mut previous, mut current) = (e, first);
            while !is_anchor(current) {
                let Some(&(next, next_edge)) = bridges[current].iter().find(|&&(_, f)| f != previous)
                else {
                    break;
                };
                walked[next_edge] = true;
                previous = next_edge;
                current = next;
            }
            uf.union(u, current);
        }
    }
    uf.labels()
}

/// XOR cycle-space label of every edge
fn cycle_labels(edges: &[(usize, usize)], forest: &SpanningForest) -> Result<Vec<u128>> {
    let mut rng = StdRng::seed_from_u64(CYCLE_LABEL_SEED);
    let mut is_tree = vec![false; edges.len()];
    for &e in forest.parent_edge.iter().flatten() {
        is_tree[e] = true;
    }
    let mut labels = vec![0u128; edges.len()];
    let mut accumulated = vec![0u128; forest.disc.len()];
    for (e, &(u, v)) in edges.iter().enumerate() {
        if !is_tree[e] {
            let label = rng.gen::<u128>().max(1);
            labels[e] = label;
            accumulated[u] ^= label;
            accumulated[v] ^= label;
        }
    }
    for &v in forest.order.iter().rev() {
        if let Some(e) = forest.parent_edge[v] {
            let label = accumulated[v];
            if label == 0 && cfg!(debug_assertions) {
                bail!("Edge {} is still a bridge after stem circularisation", e);
            }
            labels[e] = label;
            accumulated[other_end(edges[e], v)] ^= label;
        }
    }
    Ok(labels)
}

impl CactusGraph {
    /// Derive the cactus structure of the current graph
    pub fn derive(graph: &MergeGraph, options: CactusOptions) -> Result<CactusGraph> {
        let snapshot = GraphSnapshot::new(graph);
        let ends = snapshot.thread_ends().to_vec();
        let Some(&anchor) = ends.first() else {
            return Ok(CactusGraph::default());
        };

        let mut uf = snapshot.adjacency_union_find(options.pass_through);
        if options.attach_ends {
            for &end in &ends {
                uf.union(anchor, end);
            }
        } else {
            let mut connectivity = snapshot.adjacency_union_find(options.pass_through);
            for element in 0..snapshot.element_count() {
                connectivity.union(left(element), right(element));
            }
            let mut attached = HashSet::new();
            for &end in &ends {
                if attached.insert(connectivity.find(end)) {
                    uf.union(anchor, end);
                }
            }
        }
        let (components, component_count) = uf.labels();
        let sink_component = components[anchor];

        let mut edge_elements = Vec::new();
        let mut component_edges = Vec::new();
        for element in 0..snapshot.element_count() {
            if !snapshot.passes_through(element, options.pass_through) {
                edge_elements.push(element);
                component_edges.push((components[left(element)], components[right(element)]));
            }
        }

        let (merged, merged_count) = circularise_stems(component_count, &component_edges, sink_component);
        let edges: Vec<(usize, usize)> = component_edges
            .iter()
            .map(|&(u, v)| (merged[u], merged[v]))
            .collect();
        let root = merged[sink_component];
        let forest = spanning_forest(merged_count, &edges, root);
        let labels = cycle_labels(&edges, &forest)?;

        let mut tree_child = vec![None; edges.len()];
        for (v, parent_edge) in forest.parent_edge.iter().enumerate() {
            if let Some(e) = *parent_edge {
                tree_child[e] = Some(v);
            }
        }

        let mut classes: IndexMap<u128, Vec<usize>> = IndexMap::new();
        for (e, &label) in labels.iter().enumerate() {
            classes.entry(label).or_default().push(e);
        }

        // Nets: singleton classes join their endpoints; a class of tree
        // edges only closes through a virtual edge from its top to its bottom.
        let mut nets = UnionFind::new(merged_count);
        let mut ordered_classes = Vec::with_capacity(classes.len());
        for (_, members) in classes {
            let (mut cycle, rest): (Vec<usize>, Vec<usize>) =
                members.into_iter().partition(|&e| tree_child[e].is_some());
            cycle.sort_by_key(|&e| tree_child[e].map_or(0, |c| forest.depth[c]));
            if cycle.len() + rest.len() == 1 {
                let e = cycle.first().or(rest.first()).copied().unwrap_or(0);
                nets.union(edges[e].0, edges[e].1);
            } else if rest.is_empty() {
                if let (Some(top), Some(bottom)) = (
                    cycle.first().and_then(|&e| tree_child[e]),
                    cycle.last().and_then(|&e| tree_child[e]),
                ) {
                    let top_parent = forest.parent_edge[top].map_or(top, |e| other_end(edges[e], top));
                    nets.union(top_parent, bottom);
                }
            }
            cycle.extend(rest);
            ordered_classes.push(cycle);
        }
        let (net_of, net_count) = nets.labels();

        let mut chains = Vec::with_capacity(ordered_classes.len());
        let mut element_chain = vec![None; snapshot.element_count()];
        for class in ordered_classes {
            let Some(&first) = class.first() else {
                continue;
            };
            let mut from = match tree_child[first] {
                Some(child) => {
                    let parent = forest.parent_edge[child].map_or(child, |e| other_end(edges[e], child));
                    net_of[parent]
                }
                None => net_of[edges[first].0],
            };
            let mut chain = Chain::default();
            for e in class {
                let element = edge_elements[e];
                let left_node = merged[components[left(element)]];
                let right_node = merged[components[right(element)]];
                let (forward, to) = match tree_child[e] {
                    Some(child) => {
                        if cfg!(debug_assertions) {
                            let parent = other_end(edges[e], child);
                            if net_of[parent] != from {
                                bail!("Chain of element {} is not a cycle", element);
                            }
                        }
                        (left_node != child, net_of[child])
                    }
                    None => {
                        if net_of[left_node] == from {
                            (true, net_of[right_node])
                        } else {
                            (false, net_of[left_node])
                        }
                    }
                };
                chain.nodes.push(from);
                chain.links.push(ChainLink {
                    element: snapshot.element(element),
                    forward,
                    length: snapshot.length(element),
                    degree: snapshot.degree(element),
                    stub: snapshot.is_stub(element),
                });
                element_chain[element] = Some(chains.len());
                from = to;
            }
            if cfg!(debug_assertions) && chain.nodes.first() != Some(&from) {
                bail!("Chain {} does not close", chains.len());
            }
            chains.push(chain);
        }

        let mut nodes = vec![CactusNode::default(); net_count];
        for component in 0..component_count {
            nodes[net_of[merged[component]]].components.push(component);
        }
        for (index, chain) in chains.iter().enumerate() {
            for &node in &chain.nodes {
                if nodes[node].chains.last() != Some(&index) {
                    nodes[node].chains.push(index);
                }
            }
        }

        debug!(
            "Derived cactus: {} adjacency components, {} nets, {} chains",
            component_count,
            net_count,
            chains.len()
        );

        Ok(CactusGraph {
            snapshot,
            components,
            nodes,
            chains,
            sink: net_of[root],
            sink_component,
            element_chain,
        })
    }

    pub fn snapshot(&self) -> &GraphSnapshot {
        &self.snapshot
    }

    /// Adjacency component of every snapshot vertex
    pub fn components(&self) -> &[usize] {
        &self.components
    }

    pub fn nodes(&self) -> &[CactusNode] {
        &self.nodes
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// Net containing the sink component
    pub fn sink(&self) -> usize {
        self.sink
    }

    /// Block ends in the sink adjacency component, where stubs terminate
    pub fn dead_end_vertices(&self) -> Vec<usize> {
        self.components
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == self.sink_component)
            .map(|(v, _)| v)
            .collect()
    }

    pub fn chain_of(&self, element: Element) -> Option<&Chain> {
        let index = self.snapshot.element_index(element)?;
        let chain = self.element_chain.get(index).copied().flatten()?;
        self.chains.get(chain)
    }

    pub fn chain_index_of_block(&self, block: BlockId) -> Option<usize> {
        let index = self.snapshot.element_index(Element::Block(block))?;
        self.element_chain.get(index).copied().flatten()
    }

    pub fn chain_length_of_block(&self, block: BlockId) -> Option<i64> {
        self.chain_of(Element::Block(block)).map(Chain::base_length)
    }

    /// Shortest base length over non-trivial chains
    pub fn minimum_chain_length(&self) -> Option<i64> {
        self.chains
            .iter()
            .filter(|c| !c.is_trivial())
            .map(Chain::base_length)
            .min()
    }

    /// Non-stub blocks of non-trivial chains shorter than `length`
    pub fn blocks_in_chains_shorter_than(&self, length: i64) -> Vec<BlockId> {
        self.chains
            .iter()
            .filter(|c| !c.is_trivial() && c.base_length() < length)
            .flat_map(|c| {
                c.links.iter().filter(|l| !l.stub).filter_map(|l| match l.element {
                    Element::Block(block) => Some(block),
                    Element::Segment(_) => None,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinch::Pinch;

    fn two_blocks() -> MergeGraph {
        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100)]).unwrap();
        graph.merge(&Pinch::new(0, 1, 10, 10, 20, true)).unwrap();
        graph.merge(&Pinch::new(0, 1, 50, 50, 20, true)).unwrap();
        graph.join_trivial_boundaries();
        graph
    }

    #[test]
    fn test_spanning_forest_low_links() {
        // Triangle 0-1-2 with a pendant edge 2-3
        let edges = vec![(0, 1), (1, 2), (2, 0), (2, 3)];
        let forest = spanning_forest(4, &edges, 0);
        assert_eq!(forest.order[0], 0);
        let bridges: Vec<usize> = (0..4)
            .filter_map(|w| {
                let e = forest.parent_edge[w]?;
                let u = other_end(edges[e], w);
                (forest.low[w] > forest.disc[u]).then_some(e)
            })
            .collect();
        assert_eq!(bridges, vec![3]);
    }

    #[test]
    fn test_stem_becomes_one_chain() {
        let graph = two_blocks();
        for attach_ends in [false, true] {
            let options = CactusOptions {
                attach_ends,
                ..Default::default()
            };
            let cactus = CactusGraph::derive(&graph, options).unwrap();
            let x = graph.segment(graph.segment_at(0, 10).unwrap()).block.unwrap();
            let y = graph.segment(graph.segment_at(0, 50).unwrap()).block.unwrap();
            assert_eq!(cactus.chain_index_of_block(x), cactus.chain_index_of_block(y));
            assert_eq!(cactus.chain_length_of_block(x), Some(40));
            assert_eq!(cactus.minimum_chain_length(), Some(40));
        }
    }

    #[test]
    fn test_parallel_paths_split_chains() {
        // Thread 2 only shares the first block, so the two blocks no longer
        // form a 2-edge cut together
        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100), (2, 0, 40)]).unwrap();
        graph.merge(&Pinch::new(0, 1, 10, 10, 20, true)).unwrap();
        graph.merge(&Pinch::new(0, 1, 50, 50, 20, true)).unwrap();
        graph.merge(&Pinch::new(0, 2, 10, 10, 20, true)).unwrap();
        graph.join_trivial_boundaries();
        let cactus = CactusGraph::derive(&graph, CactusOptions::default()).unwrap();
        for chain in cactus.chains() {
            assert_eq!(chain.links.len(), chain.nodes.len());
        }
        assert!(cactus.minimum_chain_length().is_some());
        assert!(cactus.sink() < cactus.nodes().len());
        assert!(!cactus.dead_end_vertices().is_empty());
    }

    #[test]
    fn test_short_chain_blocks() {
        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100)]).unwrap();
        graph.merge(&Pinch::new(0, 1, 10, 10, 5, true)).unwrap();
        graph.join_trivial_boundaries();
        let cactus = CactusGraph::derive(&graph, CactusOptions::default()).unwrap();
        assert_eq!(cactus.minimum_chain_length(), Some(5));
        assert_eq!(cactus.blocks_in_chains_shorter_than(6).len(), 1);
        assert!(cactus.blocks_in_chains_shorter_than(5).is_empty());
    }

    #[test]
    fn test_empty_graph() {
        let graph = MergeGraph::new();
        let cactus = CactusGraph::derive(&graph, CactusOptions::default()).unwrap();
        assert!(cactus.chains().is_empty());
        assert_eq!(cactus.minimum_chain_length(), None);
    }
}
