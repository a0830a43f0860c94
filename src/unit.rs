//! Independent alignment units and the per-unit core pipeline.
//!
//! A unit owns its sequences, species table and pinches. Each sequence of
//! length `L` becomes a thread spanning `[-1, L + 1)`, so sequence
//! coordinates are thread coordinates and the two one-base caps at `-1`
//! and `L` are the thread's stubs.

use crate::anneal::{anneal, anneal_between_adjacency_components, no_same_thread, single_copy_species};
use crate::adjacency::PassThrough;
use crate::cactus::{CactusGraph, CactusOptions};
use crate::config::{required_count, CoreConfig, MergeFilter};
use crate::merge_graph::{MergeGraph, SegmentFilter, ThreadName};
use crate::partition::partition_components;
use crate::pinch::{Pinch, RepeatMask, RoundSource, VecPinchSource};
use crate::quality::{QualityThresholds, SpeciesTable};
use crate::refine::{anneal_preventing_small_chains, refine, trim_blocks};
use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type UnitId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSequence {
    pub name: String,
    pub length: i64,
    pub sequence: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct Unit {
    pub id: UnitId,
    pub sequences: Vec<UnitSequence>,
    pub pinches: Vec<Pinch>,
    pub species: SpeciesTable,
}

impl Unit {
    pub fn new(id: UnitId) -> Self {
        Unit {
            id,
            ..Default::default()
        }
    }

    /// Register a sequence, returning its thread name
    pub fn add_sequence(&mut self, name: &str, length: i64, sequence: Option<Vec<u8>>) -> Result<ThreadName> {
        if length < 1 {
            bail!("Sequence {} must have positive length, got {}", name, length);
        }
        if let Some(bases) = &sequence {
            if bases.len() as i64 != length {
                bail!(
                    "Sequence {} has {} bases but length {}",
                    name,
                    bases.len(),
                    length
                );
            }
        }
        self.sequences.push(UnitSequence {
            name: name.to_string(),
            length,
            sequence,
        });
        Ok((self.sequences.len() - 1) as ThreadName)
    }

    pub fn add_pinch(&mut self, pinch: Pinch) -> Result<()> {
        for (name, start) in [(pinch.name1, pinch.start1), (pinch.name2, pinch.start2)] {
            let sequence = self
                .sequences
                .get(name as usize)
                .ok_or_else(|| anyhow!("Unit {} has no sequence {}", self.id, name))?;
            if pinch.length < 0 || start < 0 || start + pinch.length > sequence.length {
                bail!(
                    "Pinch [{}, {}) falls outside sequence {} of length {}",
                    start,
                    start + pinch.length,
                    sequence.name,
                    sequence.length
                );
            }
        }
        self.pinches.push(pinch);
        Ok(())
    }

    fn build_graph(&self) -> Result<MergeGraph> {
        MergeGraph::from_threads(
            self.sequences
                .iter()
                .enumerate()
                .map(|(i, s)| (i as ThreadName, -1, s.length + 2)),
        )
    }

    fn repeat_mask(&self) -> RepeatMask {
        let mut mask = RepeatMask::new();
        for (i, s) in self.sequences.iter().enumerate() {
            if let Some(bases) = &s.sequence {
                mask.add_sequence(i as ThreadName, 0, bases);
            }
        }
        mask
    }

    fn thresholds(&self, config: &CoreConfig) -> QualityThresholds {
        // Sequences without a species are their own ingroup species
        let unassigned = (0..self.sequences.len())
            .filter(|&i| self.species.species_of(i as ThreadName).is_none())
            .count();
        let ingroups = self.species.ingroup_count() + unassigned;
        let outgroups = self.species.outgroup_count();
        QualityThresholds {
            minimum_tree_coverage: config.minimum_tree_coverage,
            minimum_degree: config.minimum_degree,
            chain_length_removal: 0,
            required_ingroup_species: required_count(config.required_ingroup_fraction, ingroups),
            required_outgroup_species: required_count(config.required_outgroup_fraction, outgroups),
            required_all_species: required_count(config.required_all_fraction, ingroups + outgroups),
            single_copy_ingroup: config.single_copy_ingroup,
            single_copy_outgroup: config.single_copy_outgroup,
        }
    }

    fn merge_filter(&self, config: &CoreConfig) -> Option<Box<SegmentFilter>> {
        match config.merge_filter {
            MergeFilter::None => None,
            MergeFilter::SingleCopySpecies => Some(single_copy_species(Arc::new(self.species.clone()))),
            MergeFilter::NoSameThread => Some(no_same_thread()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedSegment {
    pub sequence: String,
    pub start: i64,
    pub end: i64,
    pub forward: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: usize,
    pub length: i64,
    pub chain: Option<usize>,
    pub segments: Vec<AlignedSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRecord {
    pub id: usize,
    pub blocks: Vec<usize>,
    pub base_length: i64,
}

/// Final block and chain assignment of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitAlignment {
    pub unit: UnitId,
    pub blocks: Vec<BlockRecord>,
    pub chains: Vec<ChainRecord>,
    pub minimum_chain_length: Option<i64>,
}

impl UnitAlignment {
    fn collect(unit: &Unit, graph: &MergeGraph, cactus: &CactusGraph) -> UnitAlignment {
        let mut blocks: Vec<_> = graph
            .blocks()
            .map(|block| {
                let mut segments: Vec<(ThreadName, i64, i64, bool)> = graph
                    .block_segments(block)
                    .iter()
                    .map(|&s| {
                        let segment = graph.segment(s);
                        (segment.thread, segment.start, segment.end(), segment.forward)
                    })
                    .collect();
                segments.sort();
                (block, segments)
            })
            .collect();
        blocks.sort_by(|a, b| a.1.cmp(&b.1));

        let mut block_ids = HashMap::new();
        let mut records = Vec::with_capacity(blocks.len());
        for (id, (block, segments)) in blocks.into_iter().enumerate() {
            block_ids.insert(block, id);
            records.push(BlockRecord {
                id,
                length: graph.block_length(block),
                chain: None,
                segments: segments
                    .into_iter()
                    .map(|(thread, start, end, forward)| AlignedSegment {
                        sequence: unit.sequences[thread as usize].name.clone(),
                        start,
                        end,
                        forward,
                    })
                    .collect(),
            });
        }

        let mut chains = Vec::new();
        for chain in cactus.chains() {
            let members: Vec<usize> = chain
                .blocks()
                .filter_map(|block| block_ids.get(&block).copied())
                .collect();
            if members.is_empty() {
                continue;
            }
            let id = chains.len();
            for &block in &members {
                records[block].chain = Some(id);
            }
            chains.push(ChainRecord {
                id,
                blocks: members,
                base_length: chain.base_length(),
            });
        }

        UnitAlignment {
            unit: unit.id,
            blocks: records,
            chains,
            minimum_chain_length: cactus.minimum_chain_length(),
        }
    }
}

/// Run the annealing, refinement and partitioning pipeline on one unit
pub fn process_unit(unit: &Unit, config: &CoreConfig) -> Result<UnitAlignment> {
    config.validate()?;
    let mut graph = unit.build_graph()?;
    let thresholds = unit.thresholds(config);
    let mask = unit.repeat_mask();
    let filter = unit.merge_filter(config);
    let filter = filter.as_deref();
    let mut source = VecPinchSource::new(unit.pinches.clone());

    for (round, &minimum_chain_length) in config.annealing_rounds.iter().enumerate() {
        let align_repeats = round >= config.align_repeats_at_round;
        let mut round_source = RoundSource::new(
            &mut source,
            config.trim_for_round(round),
            (!align_repeats).then_some(&mask),
        );
        if config.prevent_small_chains {
            anneal_preventing_small_chains(&mut graph, &mut round_source, filter, minimum_chain_length)?;
        } else if round == 0 {
            anneal(&mut graph, &mut round_source, filter)?;
        } else {
            anneal_between_adjacency_components(&mut graph, &mut round_source, filter)?;
        }
        let report = refine(
            &mut graph,
            &thresholds,
            minimum_chain_length,
            &config.deannealing_rounds,
            &unit.species,
        )?;
        trim_blocks(&mut graph, config.block_trim)?;
        debug!(
            "Unit {} round {}: {} blocks, shortest chain {:?} after {} deannealing rounds",
            unit.id,
            round,
            graph.block_count(),
            report.minimum_chain_length,
            report.rounds.len()
        );
    }

    let cactus = if config.minimum_degree > 1 {
        let (selected, _) = partition_components(&mut graph, config.max_adjacency_component_size_ratio)?;
        CactusGraph::derive(
            &graph,
            CactusOptions {
                pass_through: PassThrough::Selected(&selected),
                attach_ends: true,
            },
        )?
    } else {
        CactusGraph::derive(
            &graph,
            CactusOptions {
                pass_through: PassThrough::Nothing,
                attach_ends: true,
            },
        )?
    };
    if cfg!(debug_assertions) {
        graph.check().with_context(|| format!("Unit {} failed the graph check", unit.id))?;
    }
    Ok(UnitAlignment::collect(unit, &graph, &cactus))
}

/// Process units in parallel on the global rayon pool, in input order
pub fn run_units(units: &[Unit], config: &CoreConfig) -> Result<Vec<UnitAlignment>> {
    let alignments: Vec<UnitAlignment> = units
        .par_iter()
        .map(|unit| process_unit(unit, config))
        .collect::<Result<_>>()?;
    info!(
        "Processed {} units into {} blocks",
        alignments.len(),
        alignments.iter().map(|a| a.blocks.len()).sum::<usize>()
    );
    Ok(alignments)
}

/// Where units come from and where their results go
pub trait UnitStore: Sync {
    fn unit_ids(&self) -> Vec<UnitId>;
    fn load(&self, id: UnitId) -> Result<Unit>;
    fn store(&self, alignment: UnitAlignment) -> Result<()>;
}

/// Process every unit of a store, returning how many were written
pub fn run_store(store: &dyn UnitStore, config: &CoreConfig) -> Result<usize> {
    let ids = store.unit_ids();
    ids.par_iter().try_for_each(|&id| -> Result<()> {
        let unit = store.load(id)?;
        let alignment = process_unit(&unit, config)?;
        store.store(alignment)
    })?;
    Ok(ids.len())
}

#[derive(Debug, Default)]
pub struct MemoryUnitStore {
    units: IndexMap<UnitId, Unit>,
    results: Mutex<Vec<UnitAlignment>>,
}

impl MemoryUnitStore {
    pub fn new(units: Vec<Unit>) -> Self {
        MemoryUnitStore {
            units: units.into_iter().map(|u| (u.id, u)).collect(),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Stored results ordered by unit
    pub fn into_results(self) -> Result<Vec<UnitAlignment>> {
        let mut results = self
            .results
            .into_inner()
            .map_err(|_| anyhow!("Result store lock poisoned"))?;
        results.sort_by_key(|a| a.unit);
        Ok(results)
    }
}

impl UnitStore for MemoryUnitStore {
    fn unit_ids(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }

    fn load(&self, id: UnitId) -> Result<Unit> {
        self.units
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown unit {}", id))
    }

    fn store(&self, alignment: UnitAlignment) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow!("Result store lock poisoned"))?
            .push(alignment);
        Ok(())
    }
}
