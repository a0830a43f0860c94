use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::time::Instant;

use cactus_caf::config::{parse_metric_number, parse_round_schedule, CoreConfig, MergeFilter};
use cactus_caf::output::{write_alignments, write_chain_summary};
use cactus_caf::paf::{open_paf_input, read_fasta_sequences, UnitBuilder};
use cactus_caf::unit::run_units;

/// cactus-caf - Build cactus alignment blocks from pairwise alignments
///
/// Reads PAF, pinches the aligned columns of each connected group of
/// sequences together and refines the resulting blocks until their
/// chains are long enough.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Input PAF file, plain or bgzip (stdin if not specified)
    #[clap(short = 'i', long = "input")]
    input: Option<String>,

    /// Output block table (stdout if not specified)
    #[clap(short = 'o', long = "output")]
    output: Option<String>,

    /// Write a chain summary table here
    #[clap(long = "chains")]
    chains: Option<String>,

    /// FASTA with the aligned sequences; enables repeat masking
    #[clap(short = 's', long = "sequences")]
    sequences: Option<String>,

    /// Comma separated species (PanSN sample names) treated as outgroups
    #[clap(long = "outgroups", default_value = "")]
    outgroups: String,

    /// Ignore alignments shorter than this on the target
    #[clap(short = 'l', long = "min-alignment-length", default_value = "0", value_parser = parse_metric_number)]
    min_alignment_length: i64,

    /// Minimum chain length for each annealing round, e.g. "0,2,32,1k"
    #[clap(short = 'a', long = "annealing-rounds", default_value = "0")]
    annealing_rounds: String,

    /// Chain length removal schedule used while deannealing
    #[clap(short = 'd', long = "deannealing-rounds", default_value = "")]
    deannealing_rounds: String,

    /// Columns trimmed from each end of every pinch, per round
    #[clap(long = "trim", default_value = "")]
    trim: String,

    /// First round in which soft-masked repeats are aligned
    #[clap(long = "align-repeats-at-round", default_value = "0")]
    align_repeats_at_round: usize,

    /// Minimum fraction of the species tree a block must cover
    #[clap(long = "minimum-tree-coverage", default_value = "0.0")]
    minimum_tree_coverage: f64,

    /// Columns trimmed from each end of every final block
    #[clap(short = 'b', long = "block-trim", default_value = "0", value_parser = parse_metric_number)]
    block_trim: i64,

    /// Minimum number of segments in an aligned block
    #[clap(short = 'm', long = "minimum-degree", default_value = "2")]
    minimum_degree: usize,

    /// Fraction of ingroup species every block must contain
    #[clap(long = "required-ingroup-fraction", default_value = "0.0")]
    required_ingroup_fraction: f64,

    /// Fraction of outgroup species every block must contain
    #[clap(long = "required-outgroup-fraction", default_value = "0.0")]
    required_outgroup_fraction: f64,

    /// Fraction of all species every block must contain
    #[clap(long = "required-all-fraction", default_value = "0.0")]
    required_all_fraction: f64,

    /// Reject blocks with two copies of an ingroup species
    #[clap(long = "single-copy-ingroup")]
    single_copy_ingroup: bool,

    /// Reject blocks with two copies of an outgroup species
    #[clap(long = "single-copy-outgroup")]
    single_copy_outgroup: bool,

    /// Adjacency components above ratio * ln(vertices) are broken up
    #[clap(long = "max-adjacency-component-size-ratio", default_value = "10.0")]
    max_adjacency_component_size_ratio: f64,

    /// Undo the parts of each pinch that create short chains
    #[clap(long = "prevent-small-chains")]
    prevent_small_chains: bool,

    /// Merge filter: "none", "single-copy" or "no-same-thread"
    #[clap(long = "merge-filter", default_value = "none")]
    merge_filter: MergeFilter,

    /// Quiet mode (warnings and errors only)
    #[clap(long = "quiet")]
    quiet: bool,

    /// Verbose mode (per-round debug output)
    #[clap(short = 'v', long = "verbose", conflicts_with = "quiet")]
    verbose: bool,

    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "8")]
    threads: usize,
}

impl Args {
    fn core_config(&self) -> Result<CoreConfig> {
        let schedule = |name: &str, value: &str| {
            parse_round_schedule(value).map_err(|e| anyhow!("Invalid {}: {}", name, e))
        };
        let config = CoreConfig {
            annealing_rounds: schedule("--annealing-rounds", &self.annealing_rounds)?,
            deannealing_rounds: schedule("--deannealing-rounds", &self.deannealing_rounds)?,
            trim: schedule("--trim", &self.trim)?,
            align_repeats_at_round: self.align_repeats_at_round,
            minimum_tree_coverage: self.minimum_tree_coverage,
            block_trim: self.block_trim,
            minimum_degree: self.minimum_degree,
            required_ingroup_fraction: self.required_ingroup_fraction,
            required_outgroup_fraction: self.required_outgroup_fraction,
            required_all_fraction: self.required_all_fraction,
            single_copy_ingroup: self.single_copy_ingroup,
            single_copy_outgroup: self.single_copy_outgroup,
            max_adjacency_component_size_ratio: self.max_adjacency_component_size_ratio,
            prevent_small_chains: self.prevent_small_chains,
            merge_filter: self.merge_filter,
        };
        config.validate()?;
        Ok(config)
    }

    fn unit_builder(&self) -> Result<UnitBuilder> {
        let mut builder = UnitBuilder::new();
        builder.minimum_alignment_length = self.min_alignment_length;
        builder.outgroups = self
            .outgroups
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if let Some(path) = &self.sequences {
            builder.sequences = read_fasta_sequences(path)?;
            info!("Loaded {} sequences from {}", builder.sequences.len(), path);
        }
        Ok(builder)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // If no input specified and no stdin, print help
    if args.input.is_none() {
        use std::io::IsTerminal;
        if io::stdin().is_terminal() {
            use clap::CommandFactory;
            Args::command().print_help()?;
            std::process::exit(0);
        }
    }

    // Set up rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()?;

    let config = args.core_config()?;
    let builder = args.unit_builder()?;
    let start = Instant::now();

    let units = match &args.input {
        Some(path) => builder
            .read_units(open_paf_input(path)?)
            .with_context(|| format!("Failed to read PAF: {}", path))?,
        None => builder.read_units(BufReader::new(io::stdin().lock()))?,
    };

    let alignments = run_units(&units, &config)?;

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    let lines = write_alignments(&mut output, &alignments, config.minimum_degree)?;
    output.flush()?;

    if let Some(path) = &args.chains {
        let mut chains = BufWriter::new(File::create(path).with_context(|| format!("Failed to create {}", path))?);
        write_chain_summary(&mut chains, &alignments)?;
        chains.flush()?;
    }

    info!(
        "Wrote {} aligned segments from {} units in {:.2}s",
        lines,
        alignments.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
