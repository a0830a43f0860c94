use anyhow::{bail, Result};

/// Predicate applied to every segment pair before it is pinched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeFilter {
    #[default]
    None,
    /// Never put two segments of one species in a block
    SingleCopySpecies,
    /// Never put two segments of one thread in a block
    NoSameThread,
}

impl std::str::FromStr for MergeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(MergeFilter::None),
            "single-copy" | "single-copy-species" => Ok(MergeFilter::SingleCopySpecies),
            "no-same-thread" => Ok(MergeFilter::NoSameThread),
            other => Err(format!(
                "Unknown merge filter '{other}'. Use none, single-copy or no-same-thread"
            )),
        }
    }
}

/// Parameters of the per-unit core pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub annealing_rounds: Vec<i64>,      // --annealing-rounds: minimum chain length per round
    pub deannealing_rounds: Vec<i64>,    // --deannealing-rounds: removal threshold schedule
    pub trim: Vec<i64>,                  // --trim: per-round pinch trim
    pub align_repeats_at_round: usize,   // --align-repeats-at-round
    pub minimum_tree_coverage: f64,      // --minimum-tree-coverage
    pub block_trim: i64,                 // --block-trim
    pub minimum_degree: usize,           // --minimum-degree
    pub required_ingroup_fraction: f64,  // --required-ingroup-fraction
    pub required_outgroup_fraction: f64, // --required-outgroup-fraction
    pub required_all_fraction: f64,      // --required-all-fraction
    pub single_copy_ingroup: bool,       // --single-copy-ingroup
    pub single_copy_outgroup: bool,      // --single-copy-outgroup
    pub max_adjacency_component_size_ratio: f64, // --max-adjacency-component-size-ratio
    pub prevent_small_chains: bool,      // --prevent-small-chains
    pub merge_filter: MergeFilter,       // --merge-filter
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            annealing_rounds: vec![0],
            deannealing_rounds: Vec::new(),
            trim: Vec::new(),
            align_repeats_at_round: 0,
            minimum_tree_coverage: 0.0,
            block_trim: 0,
            minimum_degree: 2,
            required_ingroup_fraction: 0.0,
            required_outgroup_fraction: 0.0,
            required_all_fraction: 0.0,
            single_copy_ingroup: false,
            single_copy_outgroup: false,
            max_adjacency_component_size_ratio: 10.0,
            prevent_small_chains: false,
            merge_filter: MergeFilter::None,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.annealing_rounds.iter().any(|&r| r < 0) {
            bail!("Annealing rounds must be non-negative: {:?}", self.annealing_rounds);
        }
        if self.deannealing_rounds.iter().any(|&r| r < 0) {
            bail!("Deannealing rounds must be non-negative: {:?}", self.deannealing_rounds);
        }
        if self.trim.iter().any(|&t| t < 0) {
            bail!("Trim values must be non-negative: {:?}", self.trim);
        }
        if self.block_trim < 0 {
            bail!("Block trim must be non-negative, got {}", self.block_trim);
        }
        if !(0.0..=1.0).contains(&self.minimum_tree_coverage) {
            bail!("Minimum tree coverage must be in [0, 1], got {}", self.minimum_tree_coverage);
        }
        for (name, fraction) in [
            ("ingroup", self.required_ingroup_fraction),
            ("outgroup", self.required_outgroup_fraction),
            ("all", self.required_all_fraction),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                bail!("Required {} fraction must be in [0, 1], got {}", name, fraction);
            }
        }
        if self.max_adjacency_component_size_ratio <= 0.0 {
            bail!(
                "Adjacency component size ratio must be positive, got {}",
                self.max_adjacency_component_size_ratio
            );
        }
        Ok(())
    }

    /// Trim applied to pinches in a given round
    pub fn trim_for_round(&self, round: usize) -> i64 {
        self.trim.get(round).copied().unwrap_or(0)
    }
}

/// Number of species a fraction requires, truncated toward zero
pub fn required_count(fraction: f64, available: usize) -> usize {
    (fraction * available as f64) as usize
}

/// Parse numbers with optional metric suffix (k/K, m/M, g/G)
pub fn parse_metric_number(s: &str) -> Result<i64, String> {
    if s.is_empty() {
        return Err("Empty string".to_string());
    }

    let (num_part, suffix) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&s[..s.len() - c.len_utf8()], Some(c)),
        _ => (s, None),
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('g') | Some('G') => 1_000_000_000.0,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;

    if result < 0.0 || result > i64::MAX as f64 {
        return Err(format!("Value {result} is out of range"));
    }

    Ok(result.round() as i64)
}

/// Parse a comma or space separated round schedule, e.g. "0,2,32,1k"
pub fn parse_round_schedule(s: &str) -> Result<Vec<i64>, String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(parse_metric_number)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric_number() {
        assert_eq!(parse_metric_number("32"), Ok(32));
        assert_eq!(parse_metric_number("1k"), Ok(1000));
        assert_eq!(parse_metric_number("1.5K"), Ok(1500));
        assert_eq!(parse_metric_number("2m"), Ok(2_000_000));
        assert!(parse_metric_number("").is_err());
        assert!(parse_metric_number("5x").is_err());
        assert!(parse_metric_number("-3").is_err());
    }

    #[test]
    fn test_parse_round_schedule() {
        assert_eq!(parse_round_schedule("0,2, 32 1k"), Ok(vec![0, 2, 32, 1000]));
        assert_eq!(parse_round_schedule(""), Ok(vec![]));
        assert!(parse_round_schedule("1,abc").is_err());
    }

    #[test]
    fn test_validate() {
        let config = CoreConfig::default();
        config.validate().unwrap();
        assert_eq!(config.trim_for_round(3), 0);

        let bad = CoreConfig {
            required_outgroup_fraction: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_merge_filter_names() {
        assert_eq!("none".parse::<MergeFilter>(), Ok(MergeFilter::None));
        assert_eq!("Single-Copy".parse::<MergeFilter>(), Ok(MergeFilter::SingleCopySpecies));
        assert_eq!("no-same-thread".parse::<MergeFilter>(), Ok(MergeFilter::NoSameThread));
        assert!("everything".parse::<MergeFilter>().is_err());
    }

    #[test]
    fn test_required_count() {
        assert_eq!(required_count(0.0, 5), 0);
        assert_eq!(required_count(0.5, 5), 2);
        assert_eq!(required_count(0.6, 2), 1);
        assert_eq!(required_count(1.0, 4), 4);
    }
}
