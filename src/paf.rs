//! PAF alignment input.
//!
//! Records are read from plain or bgzip-compressed PAF, grouped into
//! independent units by the connected components of the alignment graph,
//! and their CIGAR match runs become pinches.

use crate::merge_graph::ThreadName;
use crate::pinch::Pinch;
use crate::union_find::UnionFind;
use crate::unit::{Unit, UnitId};
use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use noodles::bgzf;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Open a file and auto-detect bgzip compression, returning a boxed BufRead
pub fn open_paf_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz" || ext == "bgz")
        .unwrap_or(false);

    if is_compressed {
        Ok(Box::new(BufReader::new(bgzf::io::reader::Reader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PafRecord {
    pub query_name: String,
    pub query_len: i64,
    pub query_start: i64,
    pub query_end: i64,
    pub forward: bool,
    pub target_name: String,
    pub target_len: i64,
    pub target_start: i64,
    pub target_end: i64,
    pub cigar: Option<String>,
}

pub fn parse_paf_line(line: &str) -> Result<PafRecord> {
    let fields: Vec<&str> = line.trim_end().split('\t').collect();

    if fields.len() < 12 {
        bail!("PAF line has fewer than 12 required fields");
    }

    let forward = match fields[4] {
        "+" => true,
        "-" => false,
        other => bail!("Invalid PAF strand '{}'", other),
    };

    let record = PafRecord {
        query_name: fields[0].to_string(),
        query_len: fields[1].parse()?,
        query_start: fields[2].parse()?,
        query_end: fields[3].parse()?,
        forward,
        target_name: fields[5].to_string(),
        target_len: fields[6].parse()?,
        target_start: fields[7].parse()?,
        target_end: fields[8].parse()?,
        cigar: fields[12..]
            .iter()
            .find_map(|f| f.strip_prefix("cg:Z:"))
            .map(str::to_string),
    };

    if record.query_start < 0 || record.query_start > record.query_end || record.query_end > record.query_len {
        bail!(
            "Query interval [{}, {}) outside {} of length {}",
            record.query_start,
            record.query_end,
            record.query_name,
            record.query_len
        );
    }
    if record.target_start < 0 || record.target_start > record.target_end || record.target_end > record.target_len {
        bail!(
            "Target interval [{}, {}) outside {} of length {}",
            record.target_start,
            record.target_end,
            record.target_name,
            record.target_len
        );
    }
    Ok(record)
}

/// Parse a CIGAR string into (length, operation) pairs
pub fn parse_cigar(cigar: &str) -> Result<Vec<(i64, char)>> {
    let mut ops = Vec::new();
    let mut num_str = String::new();
    for ch in cigar.chars() {
        if ch.is_ascii_digit() {
            num_str.push(ch);
        } else {
            let count: i64 = num_str
                .parse()
                .map_err(|_| anyhow!("Invalid number in CIGAR: '{}'", num_str))?;
            num_str.clear();
            ops.push((count, ch));
        }
    }
    if !num_str.is_empty() {
        bail!("CIGAR ends without an operation: '{}'", cigar);
    }
    Ok(ops)
}

/// Gapless runs of an alignment as (target offset, query offset, length)
/// in forward coordinates of each sequence. `M`, `=` and `X` runs are
/// aligned; mismatches still pair their bases.
pub fn match_runs(record: &PafRecord) -> Result<Vec<(i64, i64, i64)>> {
    let target_span = record.target_end - record.target_start;
    let query_span = record.query_end - record.query_start;
    let ops = match &record.cigar {
        Some(cigar) => parse_cigar(cigar)?,
        None if target_span == query_span => vec![(target_span, 'M')],
        None => bail!(
            "Alignment of {} to {} has no CIGAR and unequal spans",
            record.query_name,
            record.target_name
        ),
    };

    let mut runs: Vec<(i64, i64, i64)> = Vec::new();
    let mut target = record.target_start;
    let mut query = 0;
    for (count, op) in ops {
        match op {
            'M' | '=' | 'X' => {
                let query_start = if record.forward {
                    record.query_start + query
                } else {
                    record.query_end - query - count
                };
                // Adjacent =/X runs form one gapless pinch
                match runs.last_mut() {
                    Some(last)
                        if last.0 + last.2 == target
                            && if record.forward {
                                last.1 + last.2 == query_start
                            } else {
                                query_start + count == last.1
                            } =>
                    {
                        last.2 += count;
                        last.1 = last.1.min(query_start);
                    }
                    _ => runs.push((target, query_start, count)),
                }
                target += count;
                query += count;
            }
            'I' => query += count,
            'D' | 'N' => target += count,
            'S' | 'H' | 'P' => {}
            other => bail!("Unsupported CIGAR operation '{}'", other),
        }
    }
    if target != record.target_end || query != query_span {
        bail!(
            "CIGAR of {} to {} covers {}x{} bases, expected {}x{}",
            record.query_name,
            record.target_name,
            target - record.target_start,
            query,
            target_span,
            query_span
        );
    }
    Ok(runs)
}

/// Species of a PanSN name (`sample#haplotype#contig`), if it has one
pub fn pansn_species(name: &str) -> Option<&str> {
    let (sample, rest) = name.split_once('#')?;
    (!sample.is_empty() && !rest.is_empty()).then_some(sample)
}

/// Options controlling how PAF records become units
#[derive(Debug, Clone, Default)]
pub struct UnitBuilder {
    /// Species treated as outgroups
    pub outgroups: HashSet<String>,
    /// Alignments shorter than this are ignored
    pub minimum_alignment_length: i64,
    /// Sequences attached for repeat masking, keyed by name
    pub sequences: HashMap<String, Vec<u8>>,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every record and group the aligned sequences into units
    pub fn read_units<R: BufRead>(&self, reader: R) -> Result<Vec<Unit>> {
        let mut records = Vec::new();
        for (line_number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let record = parse_paf_line(&line).with_context(|| format!("PAF line {}", line_number + 1))?;
            if (record.target_end - record.target_start) < self.minimum_alignment_length {
                continue;
            }
            records.push(record);
        }
        self.build_units(&records)
    }

    pub fn build_units(&self, records: &[PafRecord]) -> Result<Vec<Unit>> {
        let mut names: IndexMap<String, i64> = IndexMap::new();
        for record in records {
            for (name, length) in [
                (&record.target_name, record.target_len),
                (&record.query_name, record.query_len),
            ] {
                let known = *names.entry(name.clone()).or_insert(length);
                if known != length {
                    bail!(
                        "Sequence {} has conflicting lengths {} and {}",
                        name,
                        known,
                        length
                    );
                }
            }
        }

        let index = |name: &str| names.get_index_of(name).ok_or_else(|| anyhow!("Unknown sequence {}", name));
        let mut uf = UnionFind::new(names.len());
        for record in records {
            uf.union(index(&record.target_name)?, index(&record.query_name)?);
        }

        // Units are numbered by their first sequence
        let mut unit_of_root: HashMap<usize, UnitId> = HashMap::new();
        let mut units: Vec<Unit> = Vec::new();
        let mut thread_of: Vec<ThreadName> = vec![0; names.len()];
        for (i, (name, &length)) in names.iter().enumerate() {
            let root = uf.find(i);
            let unit_id = *unit_of_root.entry(root).or_insert_with(|| {
                units.push(Unit::new(units.len()));
                units.len() - 1
            });
            let unit = &mut units[unit_id];
            let sequence = self.sequences.get(name).cloned();
            if let Some(bases) = &sequence {
                if bases.len() as i64 != length {
                    bail!(
                        "FASTA sequence {} has {} bases but PAF length {}",
                        name,
                        bases.len(),
                        length
                    );
                }
            }
            let thread = unit.add_sequence(name, length, sequence)?;
            thread_of[i] = thread;
            if let Some(species) = pansn_species(name) {
                let species_index = unit
                    .species
                    .add_species(species, self.outgroups.contains(species));
                unit.species.assign(thread, species_index)?;
            }
        }

        let mut pinch_count = 0;
        for record in records {
            let target = index(&record.target_name)?;
            let query = index(&record.query_name)?;
            let unit = &mut units[unit_of_root[&uf.find(target)]];
            for (target_start, query_start, length) in match_runs(record)? {
                if target == query && target_start == query_start && record.forward {
                    continue;
                }
                unit.add_pinch(Pinch::new(
                    thread_of[target],
                    thread_of[query],
                    target_start,
                    query_start,
                    length,
                    record.forward,
                ))?;
                pinch_count += 1;
            }
        }

        if records.is_empty() {
            warn!("No alignments retained");
        }
        info!(
            "Read {} alignments over {} sequences into {} units ({} pinches)",
            records.len(),
            names.len(),
            units.len(),
            pinch_count
        );
        for unit in &units {
            debug!(
                "Unit {}: {} sequences, {} pinches",
                unit.id,
                unit.sequences.len(),
                unit.pinches.len()
            );
        }
        Ok(units)
    }
}

/// Read FASTA sequences (plain or bgzip), keyed by the first word of
/// each header
pub fn read_fasta_sequences<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Vec<u8>>> {
    let path = path.as_ref();
    let reader = open_paf_input(path)?;
    let mut sequences = HashMap::new();
    let mut current: Option<(String, Vec<u8>)> = None;

    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read FASTA: {}", path.display()))?;
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('>') {
            if let Some((name, bases)) = current.take() {
                sequences.insert(name, bases);
            }
            let name = header.split_whitespace().next().unwrap_or("").to_string();
            current = Some((name, Vec::new()));
        } else if !trimmed.is_empty() {
            match current.as_mut() {
                Some((_, bases)) => bases.extend_from_slice(trimmed.as_bytes()),
                None => bail!("FASTA {} has sequence before the first header", path.display()),
            }
        }
    }
    if let Some((name, bases)) = current {
        sequences.insert(name, bases);
    }
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(forward: bool, cigar: Option<&str>) -> PafRecord {
        PafRecord {
            query_name: "q".into(),
            query_len: 100,
            query_start: 10,
            query_end: 30,
            forward,
            target_name: "t".into(),
            target_len: 100,
            target_start: 50,
            target_end: 70,
            cigar: cigar.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_paf_line() {
        let line = "q\t100\t10\t30\t-\tt\t100\t50\t70\t20\t20\t60\tNM:i:0\tcg:Z:20M";
        let r = parse_paf_line(line).unwrap();
        assert_eq!(r, record(false, Some("20M")));
        assert!(parse_paf_line("q\t100\t10").is_err());
        assert!(parse_paf_line("q\t100\t10\t300\t+\tt\t100\t50\t70\t20\t20\t60").is_err());
    }

    #[test]
    fn test_match_runs_forward() {
        let r = record(true, Some("5=3I4X2D8M"));
        let r = PafRecord { target_end: 69, ..r };
        assert_eq!(match_runs(&r).unwrap(), vec![(50, 10, 5), (55, 18, 4), (61, 22, 8)]);
    }

    #[test]
    fn test_match_runs_reverse() {
        let r = PafRecord {
            target_end: 66,
            query_start: 15,
            ..record(false, Some("5M1I3=2D6X"))
        };
        // Query walks backwards from its end
        assert_eq!(match_runs(&r).unwrap(), vec![(50, 25, 5), (55, 21, 3), (60, 15, 6)]);
    }

    #[test]
    fn test_match_runs_join_adjacent_operations() {
        let forward = PafRecord {
            target_end: 60,
            query_end: 20,
            ..record(true, Some("5=5X"))
        };
        assert_eq!(match_runs(&forward).unwrap(), vec![(50, 10, 10)]);
        let reverse = PafRecord { forward: false, ..forward };
        assert_eq!(match_runs(&reverse).unwrap(), vec![(50, 10, 10)]);
        let bad = PafRecord { cigar: Some("5=4X".into()), ..reverse };
        assert!(match_runs(&bad).is_err());
    }

    #[test]
    fn test_pansn_species() {
        assert_eq!(pansn_species("human#1#chr1"), Some("human"));
        assert_eq!(pansn_species("chr1"), None);
        assert_eq!(pansn_species("#x"), None);
    }

    #[test]
    fn test_units_follow_components() {
        let records = vec![
            PafRecord { target_name: "a".into(), query_name: "b".into(), ..record(true, None) },
            PafRecord { target_name: "c".into(), query_name: "d".into(), ..record(true, None) },
            PafRecord { target_name: "b".into(), query_name: "e".into(), ..record(true, None) },
        ];
        let units = UnitBuilder::new().build_units(&records).unwrap();
        assert_eq!(units.len(), 2);
        let names: Vec<_> = units[0].sequences.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "e"]);
        assert_eq!(units[0].pinches.len(), 2);
        assert_eq!(units[1].pinches, vec![Pinch::new(0, 1, 50, 10, 20, true)]);
    }
}
