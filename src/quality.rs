use crate::merge_graph::{BlockId, MergeGraph, ThreadName};
use anyhow::{bail, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    pub name: String,
    pub outgroup: bool,
}

/// Rooted species tree with branch lengths. Leaves name species.
#[derive(Debug, Clone, Default)]
pub struct EventTree {
    parents: Vec<Option<usize>>,
    branch_lengths: Vec<f64>,
    leaves: HashMap<String, usize>,
}

impl EventTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node below `parent` and return its index. The first node
    /// added is the root.
    pub fn add_node(&mut self, parent: Option<usize>, branch_length: f64, species: Option<&str>) -> Result<usize> {
        if let Some(p) = parent {
            if p >= self.parents.len() {
                bail!("Unknown parent node {}", p);
            }
        }
        if branch_length < 0.0 {
            bail!("Negative branch length {}", branch_length);
        }
        let index = self.parents.len();
        self.parents.push(parent);
        self.branch_lengths.push(branch_length);
        if let Some(name) = species {
            self.leaves.insert(name.to_string(), index);
        }
        Ok(index)
    }

    pub fn total_branch_length(&self) -> f64 {
        self.branch_lengths
            .iter()
            .zip(&self.parents)
            .filter(|(_, p)| p.is_some())
            .map(|(l, _)| l)
            .sum()
    }

    /// Fraction of the tree's branch length spanned by the given species
    pub fn coverage<'a, I>(&self, species: I) -> f64
    where
        I: IntoIterator<Item = &'a str>,
    {
        let present: Vec<usize> = species
            .into_iter()
            .filter_map(|s| self.leaves.get(s).copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let total = self.total_branch_length();
        if present.len() < 2 || total <= 0.0 {
            return 0.0;
        }
        let mut below = vec![0usize; self.parents.len()];
        for &leaf in &present {
            let mut node = Some(leaf);
            while let Some(n) = node {
                below[n] += 1;
                node = self.parents[n];
            }
        }
        // A branch is spanned when present leaves sit on both of its sides
        let spanned: f64 = (0..self.parents.len())
            .filter(|&n| self.parents[n].is_some() && below[n] > 0 && below[n] < present.len())
            .map(|n| self.branch_lengths[n])
            .sum();
        spanned / total
    }
}

/// Species membership of each thread
#[derive(Debug, Clone, Default)]
pub struct SpeciesTable {
    species: IndexMap<String, Species>,
    thread_species: HashMap<ThreadName, usize>,
    tree: Option<EventTree>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SpeciesKey {
    Named(usize),
    /// Threads without a species count as their own ingroup species
    Thread(ThreadName),
}

/// Species composition of one block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockProfile {
    pub degree: usize,
    pub ingroup_species: usize,
    pub outgroup_species: usize,
    pub all_species: usize,
    pub ingroup_single_copy: bool,
    pub outgroup_single_copy: bool,
    pub tree_coverage: f64,
}

/// Supplies per-block quality information to refinement
pub trait BlockQuality: Sync {
    fn profile(&self, graph: &MergeGraph, block: BlockId) -> BlockProfile;
}

impl SpeciesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tree(&mut self, tree: EventTree) {
        self.tree = Some(tree);
    }

    pub fn add_species(&mut self, name: &str, outgroup: bool) -> usize {
        let entry = self.species.entry(name.to_string());
        let index = entry.index();
        entry.or_insert_with(|| Species {
            name: name.to_string(),
            outgroup,
        });
        index
    }

    pub fn assign(&mut self, thread: ThreadName, species: usize) -> Result<()> {
        if species >= self.species.len() {
            bail!("Unknown species index {}", species);
        }
        self.thread_species.insert(thread, species);
        Ok(())
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }

    pub fn ingroup_count(&self) -> usize {
        self.species.values().filter(|s| !s.outgroup).count()
    }

    pub fn outgroup_count(&self) -> usize {
        self.species.values().filter(|s| s.outgroup).count()
    }

    pub fn species_of(&self, thread: ThreadName) -> Option<&Species> {
        let index = *self.thread_species.get(&thread)?;
        self.species.get_index(index).map(|(_, s)| s)
    }

    fn key(&self, thread: ThreadName) -> (SpeciesKey, bool) {
        match self.thread_species.get(&thread) {
            Some(&index) => {
                let outgroup = self.species.get_index(index).is_some_and(|(_, s)| s.outgroup);
                (SpeciesKey::Named(index), outgroup)
            }
            None => (SpeciesKey::Thread(thread), false),
        }
    }

    /// True if the threads share a species (or are the same unassigned thread)
    pub fn shares_species(&self, a: ThreadName, b: ThreadName) -> bool {
        self.key(a).0 == self.key(b).0
    }

    fn profile_threads<I: IntoIterator<Item = ThreadName>>(&self, threads: I) -> BlockProfile {
        let mut counts: IndexMap<SpeciesKey, (usize, bool)> = IndexMap::new();
        let mut degree = 0;
        for thread in threads {
            degree += 1;
            let (key, outgroup) = self.key(thread);
            counts.entry(key).or_insert((0, outgroup)).0 += 1;
        }
        let ingroup_species = counts.values().filter(|(_, o)| !o).count();
        let outgroup_species = counts.values().filter(|(_, o)| *o).count();
        let ingroup_single_copy = counts.values().filter(|(_, o)| !o).all(|(c, _)| *c == 1);
        let outgroup_single_copy = counts.values().filter(|(_, o)| *o).all(|(c, _)| *c == 1);

        let tree_coverage = match &self.tree {
            Some(tree) => tree.coverage(counts.keys().filter_map(|k| match k {
                SpeciesKey::Named(i) => self.species.get_index(*i).map(|(name, _)| name.as_str()),
                SpeciesKey::Thread(_) => None,
            })),
            None if self.species.is_empty() => 0.0,
            None => {
                let named = counts.keys().filter(|k| matches!(k, SpeciesKey::Named(_))).count();
                named as f64 / self.species.len() as f64
            }
        };

        BlockProfile {
            degree,
            ingroup_species,
            outgroup_species,
            all_species: counts.len(),
            ingroup_single_copy,
            outgroup_single_copy,
            tree_coverage,
        }
    }
}

impl BlockQuality for SpeciesTable {
    fn profile(&self, graph: &MergeGraph, block: BlockId) -> BlockProfile {
        self.profile_threads(
            graph
                .block_segments(block)
                .iter()
                .map(|&s| graph.segment(s).thread),
        )
    }
}

/// Thresholds a block must meet to survive deannealing
#[derive(Debug, Clone, PartialEq)]
pub struct QualityThresholds {
    pub minimum_tree_coverage: f64,
    pub minimum_degree: usize,
    /// Blocks in chains with base length at or below this are removed
    pub chain_length_removal: i64,
    pub required_ingroup_species: usize,
    pub required_outgroup_species: usize,
    pub required_all_species: usize,
    pub single_copy_ingroup: bool,
    pub single_copy_outgroup: bool,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            minimum_tree_coverage: 0.0,
            minimum_degree: 2,
            chain_length_removal: 0,
            required_ingroup_species: 0,
            required_outgroup_species: 0,
            required_all_species: 0,
            single_copy_ingroup: false,
            single_copy_outgroup: false,
        }
    }
}

impl QualityThresholds {
    /// Whether any threshold beyond plain degree-2 alignment is set
    pub fn is_active(&self) -> bool {
        self.minimum_tree_coverage > 0.0
            || self.minimum_degree > 2
            || self.required_ingroup_species > 0
            || self.required_outgroup_species > 0
            || self.required_all_species > 0
            || self.single_copy_ingroup
            || self.single_copy_outgroup
    }

    /// The same thresholds with a different chain-length removal floor
    pub fn with_chain_length_removal(&self, removal: i64) -> Self {
        QualityThresholds {
            chain_length_removal: removal,
            ..self.clone()
        }
    }

    pub fn accepts(&self, profile: &BlockProfile, chain_length: i64) -> bool {
        profile.degree >= self.minimum_degree
            && chain_length > self.chain_length_removal
            && profile.tree_coverage >= self.minimum_tree_coverage
            && profile.ingroup_species >= self.required_ingroup_species
            && profile.outgroup_species >= self.required_outgroup_species
            && profile.all_species >= self.required_all_species
            && (!self.single_copy_ingroup || profile.ingroup_single_copy)
            && (!self.single_copy_outgroup || profile.outgroup_single_copy)
    }
}
