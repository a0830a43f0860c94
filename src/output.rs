use crate::unit::UnitAlignment;
use anyhow::Result;
use std::io::Write;

pub const HEADER: &str = "#unit\tblock\tchain\tlength\tdegree\tsequence\tstart\tend\tstrand";

/// Write one line per aligned segment of every block of degree at least
/// `minimum_degree`. Blocks outside any chain get `*` as chain.
pub fn write_alignments<W: Write>(writer: &mut W, alignments: &[UnitAlignment], minimum_degree: usize) -> Result<usize> {
    writeln!(writer, "{HEADER}")?;
    let mut lines = 0;
    for alignment in alignments {
        for block in &alignment.blocks {
            if block.segments.len() < minimum_degree {
                continue;
            }
            let chain = block
                .chain
                .map_or_else(|| "*".to_string(), |c| c.to_string());
            for segment in &block.segments {
                writeln!(
                    writer,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    alignment.unit,
                    block.id,
                    chain,
                    block.length,
                    block.segments.len(),
                    segment.sequence,
                    segment.start,
                    segment.end,
                    if segment.forward { '+' } else { '-' }
                )?;
                lines += 1;
            }
        }
    }
    writer.flush()?;
    Ok(lines)
}

/// Per-unit chain summary: unit, chain, blocks, base length
pub fn write_chain_summary<W: Write>(writer: &mut W, alignments: &[UnitAlignment]) -> Result<()> {
    writeln!(writer, "#unit\tchain\tblocks\tbase_length")?;
    for alignment in alignments {
        for chain in &alignment.chains {
            let blocks: Vec<String> = chain.blocks.iter().map(|b| b.to_string()).collect();
            writeln!(
                writer,
                "{}\t{}\t{}\t{}",
                alignment.unit,
                chain.id,
                blocks.join(","),
                chain.base_length
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{AlignedSegment, BlockRecord, ChainRecord};
    use pretty_assertions::assert_eq;

    fn alignment() -> UnitAlignment {
        UnitAlignment {
            unit: 3,
            blocks: vec![
                BlockRecord {
                    id: 0,
                    length: 5,
                    chain: Some(0),
                    segments: vec![
                        AlignedSegment { sequence: "a".into(), start: 0, end: 5, forward: true },
                        AlignedSegment { sequence: "b".into(), start: 7, end: 12, forward: false },
                    ],
                },
                BlockRecord {
                    id: 1,
                    length: 2,
                    chain: None,
                    segments: vec![AlignedSegment { sequence: "a".into(), start: 9, end: 11, forward: true }],
                },
            ],
            chains: vec![ChainRecord { id: 0, blocks: vec![0], base_length: 5 }],
            minimum_chain_length: Some(5),
        }
    }

    #[test]
    fn test_write_alignments() {
        let mut out = Vec::new();
        let lines = write_alignments(&mut out, &[alignment()], 1).unwrap();
        assert_eq!(lines, 3);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            format!("{HEADER}\n3\t0\t0\t5\t2\ta\t0\t5\t+\n3\t0\t0\t5\t2\tb\t7\t12\t-\n3\t1\t*\t2\t1\ta\t9\t11\t+\n")
        );

        let mut out = Vec::new();
        assert_eq!(write_alignments(&mut out, &[alignment()], 2).unwrap(), 2);
    }

    #[test]
    fn test_write_chain_summary() {
        let mut out = Vec::new();
        write_chain_summary(&mut out, &[alignment()]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "#unit\tchain\tblocks\tbase_length\n3\t0\t0\t5\n");
    }
}
