use crate::adjacency::{LabelIntervals, PassThrough};
use crate::merge_graph::{MergeGraph, SegmentFilter, SegmentId};
use crate::pinch::{Pinch, PinchSource};
use crate::quality::SpeciesTable;
use anyhow::Result;
use log::debug;
use std::collections::HashSet;
use std::sync::Arc;

fn apply(graph: &mut MergeGraph, pinch: &Pinch, filter: Option<&SegmentFilter>) -> Result<()> {
    match filter {
        Some(filter) => graph.filtered_merge(pinch, filter),
        None => graph.merge(pinch),
    }
}

/// Apply every pinch of the source from its start, then drop trivial
/// boundaries. Returns the number of pinches applied.
pub fn anneal(graph: &mut MergeGraph, source: &mut dyn PinchSource, filter: Option<&SegmentFilter>) -> Result<usize> {
    source.reset();
    let mut applied = 0;
    while let Some(pinch) = source.next_pinch() {
        apply(graph, &pinch, filter)?;
        applied += 1;
    }
    graph.join_trivial_boundaries();
    debug!("Annealed {} pinches, graph has {} blocks", applied, graph.block_count());
    Ok(applied)
}

/// Like [`anneal`], but only merges the parts of each pinch whose two sides
/// already lie in the same adjacency component
pub fn anneal_between_adjacency_components(
    graph: &mut MergeGraph,
    source: &mut dyn PinchSource,
    filter: Option<&SegmentFilter>,
) -> Result<usize> {
    let labels = LabelIntervals::new(graph, PassThrough::Degree1);
    source.reset();
    let mut applied = 0;
    while let Some(pinch) = source.next_pinch() {
        for piece in same_component_pieces(&labels, &pinch) {
            apply(graph, &piece, filter)?;
            applied += 1;
        }
    }
    graph.join_trivial_boundaries();
    debug!(
        "Annealed {} same-component pieces, graph has {} blocks",
        applied,
        graph.block_count()
    );
    Ok(applied)
}

/// Sub-pinches whose paired positions carry equal component labels
fn same_component_pieces(labels: &LabelIntervals, pinch: &Pinch) -> Vec<Pinch> {
    let mut pieces = Vec::new();
    let mut current: Option<(i64, i64)> = None;
    let mut offset = 0;
    while offset < pinch.length {
        let p1 = pinch.start1 + offset;
        let p2 = pinch.position2(offset);
        let (Some((_, end1, label1)), Some((start2, end2, label2))) =
            (labels.run_at(pinch.name1, p1), labels.run_at(pinch.name2, p2))
        else {
            break;
        };
        // Columns left before either side leaves its current run
        let run1 = end1 - p1;
        let run2 = if pinch.strand { end2 - p2 } else { p2 - start2 + 1 };
        let run = run1.min(run2).min(pinch.length - offset);
        if label1 == label2 {
            current = match current {
                Some((start, length)) => Some((start, length + run)),
                None => Some((offset, run)),
            };
        } else if let Some((start, length)) = current.take() {
            pieces.push(pinch.sub_pinch(start, length));
        }
        offset += run;
    }
    if let Some((start, length)) = current {
        pieces.push(pinch.sub_pinch(start, length));
    }
    pieces
}

/// Reject pairs whose union would hold two segments of one species
pub fn single_copy_species(species: Arc<SpeciesTable>) -> Box<SegmentFilter> {
    Box::new(move |graph: &MergeGraph, a: SegmentId, b: SegmentId| {
        let side = |s: SegmentId| -> Vec<i64> {
            match graph.segment(s).block {
                Some(block) => graph
                    .block_segments(block)
                    .iter()
                    .map(|&m| graph.segment(m).thread)
                    .collect(),
                None => vec![graph.segment(s).thread],
            }
        };
        let (sa, sb) = (graph.segment(a), graph.segment(b));
        if sa.block.is_some() && sa.block == sb.block {
            return true;
        }
        let left = side(a);
        let right = side(b);
        !left
            .iter()
            .any(|&x| right.iter().any(|&y| species.shares_species(x, y)))
    })
}

/// Reject pairs whose union would hold two segments of one thread
pub fn no_same_thread() -> Box<SegmentFilter> {
    Box::new(|graph: &MergeGraph, a: SegmentId, b: SegmentId| {
        let threads = |s: SegmentId| -> HashSet<i64> {
            match graph.segment(s).block {
                Some(block) => graph
                    .block_segments(block)
                    .iter()
                    .map(|&m| graph.segment(m).thread)
                    .collect(),
                None => HashSet::from([graph.segment(s).thread]),
            }
        };
        let (sa, sb) = (graph.segment(a), graph.segment(b));
        if sa.block.is_some() && sa.block == sb.block {
            return true;
        }
        threads(a).is_disjoint(&threads(b))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinch::VecPinchSource;

    #[test]
    fn test_anneal_resets_source() {
        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100)]).unwrap();
        let mut source = VecPinchSource::new(vec![Pinch::new(0, 1, 10, 10, 20, true)]);
        assert_eq!(anneal(&mut graph, &mut source, None).unwrap(), 1);
        assert_eq!(anneal(&mut graph, &mut source, None).unwrap(), 1);
        graph.check().unwrap();
        assert_eq!(graph.block_count(), 1);
    }

    #[test]
    fn test_between_components_skips_bridging_pieces() {
        // Thread 2 is its own component, so nothing may join it
        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100), (2, 0, 100)]).unwrap();
        let mut first = VecPinchSource::new(vec![
            Pinch::new(0, 1, 10, 10, 20, true),
            Pinch::new(0, 1, 60, 60, 20, true),
        ]);
        anneal(&mut graph, &mut first, None).unwrap();

        let mut second = VecPinchSource::new(vec![
            Pinch::new(0, 1, 40, 40, 10, true),
            Pinch::new(0, 2, 40, 40, 10, true),
        ]);
        anneal_between_adjacency_components(&mut graph, &mut second, None).unwrap();
        graph.check().unwrap();

        let a = graph.segment(graph.segment_at(0, 45).unwrap()).block;
        let b = graph.segment(graph.segment_at(1, 45).unwrap()).block;
        assert!(a.is_some());
        assert_eq!(a, b);
        assert!(graph.segment(graph.segment_at(2, 45).unwrap()).block.is_none());
    }

    #[test]
    fn test_no_same_thread_filter() {
        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100)]).unwrap();
        let filter = no_same_thread();
        graph.filtered_merge(&Pinch::new(0, 1, 0, 0, 10, true), filter.as_ref()).unwrap();
        graph.filtered_merge(&Pinch::new(0, 0, 0, 50, 10, true), filter.as_ref()).unwrap();
        graph.check().unwrap();
        let block = graph.segment(graph.segment_at(0, 0).unwrap()).block.unwrap();
        assert_eq!(graph.block_degree(block), 2);
        assert!(graph.segment(graph.segment_at(0, 55).unwrap()).block.is_none());
    }

    #[test]
    fn test_single_copy_species_filter() {
        let mut table = SpeciesTable::new();
        let human = table.add_species("human", false);
        table.assign(0, human).unwrap();
        table.assign(1, human).unwrap();
        let filter = single_copy_species(Arc::new(table));

        let mut graph = MergeGraph::from_threads([(0, 0, 100), (1, 0, 100), (2, 0, 100)]).unwrap();
        graph.filtered_merge(&Pinch::new(0, 1, 0, 0, 10, true), filter.as_ref()).unwrap();
        graph.filtered_merge(&Pinch::new(0, 2, 0, 0, 10, true), filter.as_ref()).unwrap();
        let block = graph.segment(graph.segment_at(0, 0).unwrap()).block.unwrap();
        assert_eq!(graph.block_degree(block), 2);
        assert!(graph.segment(graph.segment_at(1, 0).unwrap()).block.is_none());
    }
}
