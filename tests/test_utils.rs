//! Utility functions for testing
#![allow(dead_code)]
use cactus_caf::merge_graph::MergeGraph;
use cactus_caf::pinch::Pinch;
use std::fs;
use std::path::Path;

/// Generate a random DNA sequence of given length
pub fn generate_dna_sequence(length: usize) -> String {
    use rand::{thread_rng, Rng};
    let bases = ['A', 'C', 'G', 'T'];
    let mut rng = thread_rng();

    (0..length)
        .map(|_| bases[rng.gen_range(0..4)])
        .collect()
}

/// Generate a FASTA file with specified sequences
pub fn create_fasta_file(path: &Path, sequences: &[(&str, &str)]) {
    let mut content = String::new();
    for (name, seq) in sequences {
        content.push_str(&format!(">{name}\n{seq}\n"));
    }
    fs::write(path, content).expect("Failed to write FASTA file");
}

/// One PAF line with a CIGAR tag
pub fn paf_line(
    query: (&str, i64, i64, i64),
    forward: bool,
    target: (&str, i64, i64, i64),
    cigar: &str,
) -> String {
    let (query_name, query_len, query_start, query_end) = query;
    let (target_name, target_len, target_start, target_end) = target;
    let block = (target_end - target_start).max(query_end - query_start);
    format!(
        "{query_name}\t{query_len}\t{query_start}\t{query_end}\t{}\t{target_name}\t{target_len}\t{target_start}\t{target_end}\t{block}\t{block}\t60\tcg:Z:{cigar}\n",
        if forward { '+' } else { '-' }
    )
}

/// Graph of `count` threads named 0.. with the same length
pub fn threads(count: i64, length: i64) -> MergeGraph {
    MergeGraph::from_threads((0..count).map(|name| (name, 0, length))).expect("valid threads")
}

/// Apply pinches and drop trivial boundaries
pub fn pinched(mut graph: MergeGraph, pinches: &[Pinch]) -> MergeGraph {
    for pinch in pinches {
        graph.merge(pinch).expect("pinch within threads");
    }
    graph.join_trivial_boundaries();
    graph
}

/// Every pair of aligned positions, sorted. Independent of how threads are
/// cut into segments.
pub fn position_pairs(graph: &MergeGraph) -> Vec<((i64, i64), (i64, i64))> {
    let mut pairs = Vec::new();
    for block in graph.blocks() {
        let members = graph.block_segments(block);
        for column in 0..graph.block_length(block) {
            let mut positions: Vec<(i64, i64)> = members
                .iter()
                .map(|&s| {
                    let seg = graph.segment(s);
                    let pos = if seg.forward {
                        seg.start + column
                    } else {
                        seg.end() - 1 - column
                    };
                    (seg.thread, pos)
                })
                .collect();
            positions.sort();
            for i in 0..positions.len() {
                for j in i + 1..positions.len() {
                    pairs.push((positions[i], positions[j]));
                }
            }
        }
    }
    pairs.sort();
    pairs
}

/// Block holding a position, if it is aligned
pub fn block_at(graph: &MergeGraph, thread: i64, position: i64) -> Option<cactus_caf::merge_graph::BlockId> {
    let id = graph.segment_at(thread, position).expect("position within thread");
    graph.segment(id).block
}
