use crate::cactus::{CactusGraph, CactusOptions};
use crate::merge_graph::{BlockId, MergeGraph, SegmentFilter};
use crate::pinch::PinchSource;
use crate::quality::{BlockQuality, QualityThresholds};
use anyhow::Result;
use log::{debug, info, warn};

/// Extra deannealing rounds allowed past the configured schedule
const DEANNEALING_SLACK_ROUNDS: usize = 10;

/// Cactus view used throughout refinement
pub fn derive(graph: &MergeGraph) -> Result<CactusGraph> {
    CactusGraph::derive(graph, CactusOptions::default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub removal_threshold: i64,
    pub blocks_undone: usize,
    pub minimum_chain_length: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefineReport {
    pub rounds: Vec<RoundReport>,
    pub minimum_chain_length: Option<i64>,
    pub reached_target: bool,
}

/// Undo every aligned non-stub block that fails the thresholds, then
/// drop the trivial boundaries this leaves. Returns the undone count.
pub fn deanneal(
    graph: &mut MergeGraph,
    cactus: &CactusGraph,
    thresholds: &QualityThresholds,
    quality: &dyn BlockQuality,
) -> Result<usize> {
    let mut doomed: Vec<BlockId> = Vec::new();
    for block in graph.blocks() {
        if graph.block_degree(block) < 2 || graph.block_has_stub(block) {
            continue;
        }
        let Some(chain_length) = cactus.chain_length_of_block(block) else {
            continue;
        };
        let profile = quality.profile(graph, block);
        if !thresholds.accepts(&profile, chain_length) {
            doomed.push(block);
        }
    }
    for &block in &doomed {
        graph.destroy_block(block);
    }
    graph.join_trivial_boundaries();
    debug!(
        "Deannealed {} blocks (chain floor {}), {} blocks remain",
        doomed.len(),
        thresholds.chain_length_removal,
        graph.block_count()
    );
    Ok(doomed.len())
}

/// Remove blocks until the shortest non-trivial chain reaches
/// `minimum_chain_length` or the round budget runs out
pub fn refine(
    graph: &mut MergeGraph,
    thresholds: &QualityThresholds,
    minimum_chain_length: i64,
    deannealing_rounds: &[i64],
    quality: &dyn BlockQuality,
) -> Result<RefineReport> {
    let mut report = RefineReport::default();
    let mut cactus = derive(graph)?;

    if thresholds.is_active() {
        let undone = deanneal(graph, &cactus, &thresholds.with_chain_length_removal(0), quality)?;
        cactus = derive(graph)?;
        report.rounds.push(RoundReport {
            removal_threshold: 0,
            blocks_undone: undone,
            minimum_chain_length: cactus.minimum_chain_length(),
        });
    }

    let mut current = cactus.minimum_chain_length();
    let mut round = 0;
    while current.is_some_and(|m| m < minimum_chain_length)
        && round <= deannealing_rounds.len() + DEANNEALING_SLACK_ROUNDS
    {
        let mut removal = minimum_chain_length - 1;
        if let Some(&scheduled) = deannealing_rounds.get(round) {
            removal = removal.min(scheduled);
        }
        round += 1;
        if current.is_some_and(|m| m > removal) {
            continue;
        }
        let undone = deanneal(graph, &cactus, &thresholds.with_chain_length_removal(removal), quality)?;
        cactus = derive(graph)?;
        current = cactus.minimum_chain_length();
        report.rounds.push(RoundReport {
            removal_threshold: removal,
            blocks_undone: undone,
            minimum_chain_length: current,
        });
    }

    report.minimum_chain_length = current;
    report.reached_target = current.map_or(true, |m| m >= minimum_chain_length);
    if !report.reached_target {
        warn!(
            "Shortest chain is {} after {} deannealing rounds, below the target {}",
            current.unwrap_or(0),
            report.rounds.len(),
            minimum_chain_length
        );
    }
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmallChainReport {
    pub pinches: usize,
    pub partial_undos: usize,
    /// Pinches whose short chains could not be traced back to them
    pub dead_ends: usize,
}

/// Apply pinches one at a time, undoing the parts of each that leave chains
/// shorter than `minimum_chain_length`
pub fn anneal_preventing_small_chains(
    graph: &mut MergeGraph,
    source: &mut dyn PinchSource,
    filter: Option<&SegmentFilter>,
    minimum_chain_length: i64,
) -> Result<SmallChainReport> {
    let mut report = SmallChainReport::default();
    source.reset();
    while let Some(pinch) = source.next_pinch() {
        report.pinches += 1;
        let mut undo = graph.prepare_undo(&pinch)?;
        graph.merge_recorded(&pinch, filter, &mut undo)?;
        let mut snarled = derive(graph)?.blocks_in_chains_shorter_than(minimum_chain_length);
        while !snarled.is_empty() {
            let mut best: Option<(usize, (i64, i64))> = None;
            for &block in &snarled {
                let degree = graph.block_degree(block);
                if best.is_some_and(|(d, _)| d >= degree) {
                    continue;
                }
                if let Some(range) = graph.find_offset_for_block(&undo, block) {
                    best = Some((degree, range));
                }
            }
            let Some((_, (offset, length))) = best else {
                report.dead_ends += 1;
                break;
            };
            graph.partial_undo(&mut undo, offset, length)?;
            report.partial_undos += 1;
            snarled = derive(graph)?.blocks_in_chains_shorter_than(minimum_chain_length);
        }
    }
    graph.join_trivial_boundaries();
    info!(
        "Applied {} pinches with {} partial undos ({} accepted short chains)",
        report.pinches, report.partial_undos, report.dead_ends
    );
    Ok(report)
}

/// Shave `trim` columns off both ends of every aligned block; blocks too
/// short to survive are dissolved
pub fn trim_blocks(graph: &mut MergeGraph, trim: i64) -> Result<()> {
    if trim <= 0 {
        return Ok(());
    }
    let cuts: Vec<(i64, i64, i64)> = graph
        .blocks()
        .filter_map(|block| {
            let &first = graph.block_segments(block).first()?;
            let segment = graph.segment(first);
            Some((segment.thread, segment.start, segment.length))
        })
        .collect();
    for (thread, start, length) in cuts {
        if length > 2 * trim {
            graph.split(thread, start + trim)?;
            graph.split(thread, start + length - trim)?;
        }
        for position in [start, start + length - 1] {
            let id = graph.segment_at(thread, position)?;
            if let Some(block) = graph.segment(id).block {
                graph.destroy_block(block);
            }
        }
    }
    graph.join_trivial_boundaries();
    Ok(())
}
