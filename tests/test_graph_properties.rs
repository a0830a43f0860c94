/// Property-based tests for the merge graph, its undo log and the
/// derived cactus structure
///
/// Uses proptest to drive random pinch sequences over a few threads and
/// verifies the invariants that must ALWAYS hold afterwards.
mod test_utils;

use cactus_caf::adjacency::{left, right, PassThrough};
use cactus_caf::cactus::{CactusGraph, CactusOptions};
use cactus_caf::merge_graph::MergeGraph;
use cactus_caf::pinch::Pinch;
use cactus_caf::quality::{QualityThresholds, SpeciesTable};
use cactus_caf::refine::refine;
use cactus_caf::union_find::UnionFind;
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use test_utils::{position_pairs, threads};

const THREADS: i64 = 3;
const LENGTH: i64 = 60;

fn arb_pinch() -> impl Strategy<Value = Pinch> {
    (0..THREADS, 1..THREADS, 1i64..20, any::<bool>()).prop_flat_map(|(name1, shift, length, strand)| {
        let name2 = (name1 + shift) % THREADS;
        (0..=LENGTH - length, 0..=LENGTH - length)
            .prop_map(move |(start1, start2)| Pinch::new(name1, name2, start1, start2, length, strand))
    })
}

/// Tandem and palindromic pinches of a thread against itself
fn arb_self_pinch() -> impl Strategy<Value = Pinch> {
    (0..THREADS, 1i64..20, any::<bool>()).prop_flat_map(|(name, length, strand)| {
        (0..=LENGTH - length, 0..=LENGTH - length)
            .prop_map(move |(start1, start2)| Pinch::new(name, name, start1, start2, length, strand))
    })
}

fn arb_any_pinch() -> impl Strategy<Value = Pinch> {
    prop_oneof![arb_pinch(), arb_self_pinch()]
}

/// Forward pinches pairing equal positions of two threads
fn arb_column_pinch() -> impl Strategy<Value = Pinch> {
    (0..THREADS, 1..THREADS, 1i64..20).prop_flat_map(|(name1, shift, length)| {
        let name2 = (name1 + shift) % THREADS;
        (0..=LENGTH - length).prop_map(move |start| Pinch::new(name1, name2, start, start, length, true))
    })
}

fn apply_all(graph: &mut MergeGraph, pinches: &[Pinch]) {
    for pinch in pinches {
        graph.merge(pinch).unwrap();
    }
}

/// Property: the graph stays a valid partition after any pinch sequence
#[test]
fn prop_merges_keep_partition_valid() {
    proptest!(|(pinches in prop::collection::vec(arb_pinch(), 0..8))| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        prop_assert!(graph.check().is_ok());

        let pairs = position_pairs(&graph);
        graph.join_trivial_boundaries();
        prop_assert!(graph.check().is_ok());
        prop_assert_eq!(position_pairs(&graph), pairs);

        let total: i64 = graph
            .threads()
            .map(|t| {
                graph
                    .thread_segments(t.name())
                    .unwrap()
                    .iter()
                    .map(|&s| graph.segment(s).length)
                    .sum::<i64>()
            })
            .sum();
        prop_assert_eq!(total, THREADS * LENGTH);
    });
}

/// Property: the first pinch on fresh threads aligns every column pair
#[test]
fn prop_single_pinch_aligns_columns() {
    proptest!(|(pinch in arb_pinch())| {
        let mut graph = threads(THREADS, LENGTH);
        graph.merge(&pinch).unwrap();
        let pairs = position_pairs(&graph);
        prop_assert_eq!(pairs.len() as i64, pinch.length);
        for offset in 0..pinch.length {
            let a = (pinch.name1, pinch.start1 + offset);
            let b = (pinch.name2, pinch.position2(offset));
            let pair = if a < b { (a, b) } else { (b, a) };
            prop_assert!(pairs.binary_search(&pair).is_ok(), "{:?} not aligned", pair);
        }
    });
}

/// Property: undoing a whole merge restores the previous alignment
#[test]
fn prop_full_undo_restores_alignment() {
    proptest!(|(
        history in prop::collection::vec(arb_pinch(), 0..5),
        last in arb_pinch()
    )| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &history);
        let before = position_pairs(&graph);

        let mut undo = graph.prepare_undo(&last).unwrap();
        graph.merge_recorded(&last, None, &mut undo).unwrap();
        graph.partial_undo(&mut undo, 0, last.length).unwrap();

        prop_assert!(graph.check().is_ok());
        prop_assert_eq!(position_pairs(&graph), before);
    });
}

/// Property: every aligned block lies in exactly one closed chain
#[test]
fn prop_cactus_chains_cover_blocks() {
    proptest!(|(pinches in prop::collection::vec(arb_pinch(), 0..8), attach_ends in any::<bool>())| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        graph.join_trivial_boundaries();

        let options = CactusOptions { pass_through: PassThrough::Degree1, attach_ends };
        let cactus = CactusGraph::derive(&graph, options).unwrap();
        for block in graph.blocks() {
            let chain = cactus.chain_index_of_block(block);
            prop_assert!(chain.is_some());
            let members = cactus.chains()[chain.unwrap()].blocks().filter(|&b| b == block).count();
            prop_assert_eq!(members, 1);
        }
        for chain in cactus.chains() {
            prop_assert_eq!(chain.links.len(), chain.nodes.len());
            prop_assert!(chain.nodes.iter().all(|&n| n < cactus.nodes().len()));
        }
        if let Some(minimum) = cactus.minimum_chain_length() {
            prop_assert!(minimum > 0);
            prop_assert!(cactus.blocks_in_chains_shorter_than(minimum).is_empty());
        }

        let unpassed = CactusGraph::derive(&graph, CactusOptions { pass_through: PassThrough::Nothing, attach_ends: true });
        prop_assert!(unpassed.is_ok());
    });
}

/// Property: pinches of a thread against itself keep the graph valid and
/// derivable
#[test]
fn prop_self_pinches_keep_partition_valid() {
    proptest!(ProptestConfig::with_cases(2000), |(pinches in prop::collection::vec(arb_any_pinch(), 1..8))| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        prop_assert!(graph.check().is_ok());

        let pairs = position_pairs(&graph);
        graph.join_trivial_boundaries();
        prop_assert!(graph.check().is_ok());
        prop_assert_eq!(position_pairs(&graph), pairs);

        for attach_ends in [false, true] {
            let options = CactusOptions { pass_through: PassThrough::Degree1, attach_ends };
            let cactus = CactusGraph::derive(&graph, options);
            prop_assert!(cactus.is_ok());
            let cactus = cactus.unwrap();
            for block in graph.blocks() {
                prop_assert!(cactus.chain_index_of_block(block).is_some());
            }
        }
    });
}

/// Property: pinching the same intervals a second time changes nothing
#[test]
fn prop_repeated_pinches_are_idempotent() {
    proptest!(|(pinches in prop::collection::vec(arb_any_pinch(), 1..8))| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        let once = position_pairs(&graph);

        apply_all(&mut graph, &pinches);
        prop_assert!(graph.check().is_ok());
        prop_assert_eq!(position_pairs(&graph), once);
    });
}

/// Property: pinches that pair equal positions produce exactly the
/// transitive closure a union-find over positions computes
#[test]
fn prop_forward_columns_match_union_find() {
    proptest!(|(pinches in prop::collection::vec(arb_column_pinch(), 0..10))| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        graph.join_trivial_boundaries();

        let index = |thread: i64, position: i64| (thread * LENGTH + position) as usize;
        let mut uf = UnionFind::new((THREADS * LENGTH) as usize);
        for pinch in &pinches {
            for offset in 0..pinch.length {
                uf.union(index(pinch.name1, pinch.start1 + offset), index(pinch.name2, pinch.start2 + offset));
            }
        }
        let (labels, count) = uf.labels();
        let mut sets: Vec<Vec<(i64, i64)>> = vec![Vec::new(); count];
        for thread in 0..THREADS {
            for position in 0..LENGTH {
                sets[labels[index(thread, position)]].push((thread, position));
            }
        }
        let mut expected = Vec::new();
        for set in &sets {
            for i in 0..set.len() {
                for j in i + 1..set.len() {
                    expected.push((set[i], set[j]));
                }
            }
        }
        expected.sort();
        prop_assert_eq!(position_pairs(&graph), expected);
    });
}

/// Property: a partial undo keeps every earlier alignment and only removes
/// pairs the undone merge introduced
#[test]
fn prop_partial_undo_stays_between_states() {
    proptest!(|(
        history in prop::collection::vec(arb_pinch(), 0..5),
        last in arb_pinch(),
        a in 0i64..20,
        b in 0i64..20
    )| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &history);
        let before: HashSet<_> = position_pairs(&graph).into_iter().collect();

        let mut undo = graph.prepare_undo(&last).unwrap();
        graph.merge_recorded(&last, None, &mut undo).unwrap();
        let merged: HashSet<_> = position_pairs(&graph).into_iter().collect();

        let offset = a % last.length;
        let length = 1 + b % (last.length - offset);
        graph.partial_undo(&mut undo, offset, length).unwrap();
        prop_assert!(graph.check().is_ok());

        let after: HashSet<_> = position_pairs(&graph).into_iter().collect();
        prop_assert!(before.is_subset(&after));
        prop_assert!(after.is_subset(&merged));
    });
}

/// Property: refinement only ever removes aligned pairs
#[test]
fn prop_refine_only_removes_pairs() {
    proptest!(|(pinches in prop::collection::vec(arb_any_pinch(), 0..8), target in 0i64..30)| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        graph.join_trivial_boundaries();
        let before: HashSet<_> = position_pairs(&graph).into_iter().collect();

        let report = refine(&mut graph, &QualityThresholds::default(), target, &[], &SpeciesTable::new());
        prop_assert!(report.is_ok());
        prop_assert!(graph.check().is_ok());

        let after: HashSet<_> = position_pairs(&graph).into_iter().collect();
        prop_assert!(after.is_subset(&before));
    });
}

/// Property: every cactus edge runs between the nets its chain lists, and
/// every chain closes on itself, so no cactus edge is a bridge
#[test]
fn prop_cactus_edges_lie_on_closed_chains() {
    proptest!(|(pinches in prop::collection::vec(arb_any_pinch(), 0..8), attach_ends in any::<bool>())| {
        let mut graph = threads(THREADS, LENGTH);
        apply_all(&mut graph, &pinches);
        graph.join_trivial_boundaries();

        let options = CactusOptions { pass_through: PassThrough::Degree1, attach_ends };
        let cactus = CactusGraph::derive(&graph, options).unwrap();
        let snapshot = cactus.snapshot();
        let net_of_component: HashMap<usize, usize> = cactus
            .nodes()
            .iter()
            .enumerate()
            .flat_map(|(net, node)| node.components.iter().map(move |&c| (c, net)))
            .collect();
        let net_of_vertex = |vertex: usize| net_of_component[&cactus.components()[vertex]];

        let mut links = 0;
        for chain in cactus.chains() {
            let n = chain.links.len();
            prop_assert!(n > 0);
            for (i, link) in chain.links.iter().enumerate() {
                let element = snapshot.element_index(link.element);
                prop_assert!(element.is_some());
                let element = element.unwrap();
                let (l, r) = (net_of_vertex(left(element)), net_of_vertex(right(element)));
                let (from, to) = (chain.nodes[i], chain.nodes[(i + 1) % n]);
                if link.forward {
                    prop_assert_eq!((l, r), (from, to));
                } else {
                    prop_assert_eq!((r, l), (from, to));
                }
            }
            links += n;
        }
        let edges = (0..snapshot.element_count())
            .filter(|&e| !snapshot.passes_through(e, PassThrough::Degree1))
            .count();
        prop_assert_eq!(links, edges);
    });
}
