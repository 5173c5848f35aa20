//! Entity Linker CLI
//!
//! Finds the most similar entity pairs in an embedding matrix.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use entity_linker::config::{expand_path, LinkerConfig};
use entity_linker::export::pairs::OutputFormat;
use entity_linker::index::cache::{read_header, CachePolicy};
use entity_linker::index::metric::Metric;
use entity_linker::linker::collector::DedupMode;
use entity_linker::telemetry::{init_tracing, LogFormat};
use entity_linker::{LinkInputs, Linker};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Entity Linker - approximate nearest-neighbor entity linking
#[derive(Parser)]
#[command(name = "linker")]
#[command(about = "Find and store the top similar entity pairs based on their embeddings", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (.yaml, .yml or .json)
    #[arg(long, env = "LINKER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log format: text or json (overrides config)
    #[arg(long, value_parser = parse_enum::<LogFormat>, global = true)]
    log_format: Option<LogFormat>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link entities and write similar pairs
    Link {
        #[command(flatten)]
        inputs: InputArgs,

        /// Output file for similar pairs
        #[arg(long, env = "LINKER_OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Also write every valid pair to this file
        #[arg(long)]
        all_pairs: Option<PathBuf>,

        /// Skip the top-N output (requires --all-pairs)
        #[arg(long)]
        no_top_n: bool,

        /// Output encoding: tsv or quoted_tsv
        #[arg(long, value_parser = parse_enum::<OutputFormat>)]
        format: Option<OutputFormat>,

        /// Pair folding: ordered or union
        #[arg(long, value_parser = parse_enum::<DedupMode>)]
        dedup: Option<DedupMode>,
    },

    /// Measure recall@k of the index against an exact scan
    Recall {
        #[command(flatten)]
        inputs: InputArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        /// Number of sampled query rows
        #[arg(long, default_value = "1000")]
        queries: usize,

        /// Sampling seed
        #[arg(long, default_value = "42")]
        sample_seed: u64,
    },

    /// Print the header of an index cache file
    InspectCache {
        /// Cache file
        path: PathBuf,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Entity-to-index mapping (.csv, .tsv, .json, .bin)
    #[arg(long, env = "LINKER_MAPPING")]
    mapping: PathBuf,

    /// Entity embeddings (.npy)
    #[arg(long, env = "LINKER_EMBEDDINGS")]
    embeddings: PathBuf,
}

#[derive(Args)]
struct TuningArgs {
    /// Minimum similarity for the top-N output
    #[arg(long)]
    threshold: Option<f32>,

    /// Nearest neighbors retrieved per entity
    #[arg(long)]
    k: Option<usize>,

    /// Number of top similar pairs to output
    #[arg(long)]
    top_n: Option<usize>,

    /// Worker threads (0 = one per core)
    #[arg(long, env = "LINKER_THREADS")]
    threads: Option<usize>,

    /// Graph degree
    #[arg(long)]
    m: Option<usize>,

    /// Construction search breadth
    #[arg(long)]
    ef_construction: Option<usize>,

    /// Query search breadth
    #[arg(long)]
    ef_search: Option<usize>,

    /// Similarity metric: inner_product or cosine
    #[arg(long, value_parser = parse_enum::<Metric>)]
    metric: Option<Metric>,

    /// Index cache file
    #[arg(long, env = "LINKER_CACHE")]
    cache: Option<PathBuf>,

    /// Build the index without reading or writing a cache
    #[arg(long, conflicts_with = "cache")]
    no_cache: bool,

    /// Cache mismatch policy: validate, strict or trust
    #[arg(long, value_parser = parse_enum::<CachePolicy>)]
    cache_policy: Option<CachePolicy>,
}

impl TuningArgs {
    fn apply(self, config: &mut LinkerConfig) {
        if let Some(v) = self.threshold {
            config.threshold = v;
        }
        if let Some(v) = self.k {
            config.k = v;
        }
        if let Some(v) = self.top_n {
            config.top_n = v;
        }
        if let Some(v) = self.threads {
            config.threads = v;
        }
        if let Some(v) = self.m {
            config.index.m = v;
        }
        if let Some(v) = self.ef_construction {
            config.index.ef_construction = v;
        }
        if let Some(v) = self.ef_search {
            config.index.ef_search = v;
        }
        if let Some(v) = self.metric {
            config.index.metric = v;
        }
        if self.no_cache {
            config.cache.path = None;
        } else if let Some(path) = self.cache {
            config.cache.path = Some(path);
        }
        if let Some(v) = self.cache_policy {
            config.cache.policy = v;
        }
    }
}

/// Parse a snake_case enum value through its serde representation.
fn parse_enum<T: DeserializeOwned>(value: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|e| e.to_string())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let path = expand_path(path)?;
            LinkerConfig::from_file(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => LinkerConfig::default(),
    };

    let log_format = cli.log_format.unwrap_or(config.log_format);
    init_tracing(log_format, &cli.log_level)?;

    match cli.command {
        Commands::Link {
            inputs,
            output,
            tuning,
            all_pairs,
            no_top_n,
            format,
            dedup,
        } => {
            tuning.apply(&mut config);
            if let Some(path) = all_pairs {
                config.output.all_pairs_path = Some(path);
            }
            if no_top_n {
                config.output.write_top_n = false;
            }
            if let Some(v) = format {
                config.output.format = v;
            }
            if let Some(v) = dedup {
                config.dedup = v;
            }
            cmd_link(config, &inputs, &output)?;
        }
        Commands::Recall {
            inputs,
            tuning,
            queries,
            sample_seed,
        } => {
            tuning.apply(&mut config);
            cmd_recall(config, &inputs, queries, sample_seed)?;
        }
        Commands::InspectCache { path } => {
            cmd_inspect_cache(&expand_path(&path)?)?;
        }
    }

    Ok(())
}

fn cmd_link(mut config: LinkerConfig, inputs: &InputArgs, output: &Path) -> anyhow::Result<()> {
    config.expand_paths()?;
    let linker = Linker::new(config).context("Invalid linker configuration")?;

    let inputs = LinkInputs {
        mapping_path: expand_path(&inputs.mapping)?,
        embeddings_path: expand_path(&inputs.embeddings)?,
        output_path: expand_path(output)?,
    };
    let report = linker
        .run(&inputs)
        .with_context(|| format!("Linking {} failed", inputs.embeddings_path.display()))?;

    println!("✓ Linked {} entities ({} dims)", report.entities, report.dim);
    println!("  Index: {}", report.cache.as_str());
    println!("  Valid pairs: {}", report.considered);
    if let Some(path) = &report.output_path {
        println!("  Top pairs: {} -> {}", report.top_pairs, path.display());
    }
    if let (Some(n), Some(path)) = (report.all_pairs, &report.all_pairs_path) {
        println!("  All pairs: {} -> {}", n, path.display());
    }
    println!("  Time: {} ms", report.duration_ms);
    Ok(())
}

fn cmd_recall(
    mut config: LinkerConfig,
    inputs: &InputArgs,
    queries: usize,
    seed: u64,
) -> anyhow::Result<()> {
    config.expand_paths()?;
    let linker = Linker::new(config).context("Invalid linker configuration")?;

    let report = linker
        .recall(&expand_path(&inputs.mapping)?, &expand_path(&inputs.embeddings)?, queries, seed)
        .context("Recall measurement failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_inspect_cache(path: &Path) -> anyhow::Result<()> {
    let header = read_header(path).with_context(|| format!("Cannot read cache {}", path.display()))?;

    println!("Index cache: {}", path.display());
    println!("  Version: {}", header.version);
    println!("  Built at: {}", header.built_at.to_rfc3339());
    println!("  Vectors: {}", header.signature.num_vectors);
    println!("  Dimension: {}", header.signature.dim);
    println!("  Metric: {}", header.metric.as_str());
    println!("  M: {}", header.m);
    println!("  ef_construction: {}", header.ef_construction);
    println!("  Max layers: {}", header.max_layers);
    println!("  Seed: {}", header.seed);
    println!("  Payload: {} bytes", header.payload_len);
    println!("  Signature: {}", header.signature);
    Ok(())
}
