use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

use neardup::{
    BatchOutcome, DedupConfig, DedupEngine, MetadataMap, SignalSet, StageCounts, Strategy,
};

#[derive(Parser, Debug)]
#[command(name = "neardup", version, about = "Find and cull near-duplicate photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find near-duplicates and report the decisions
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,

        #[command(flatten)]
        opts: EngineOpts,

        /// Write a JSON decision report to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Move near-duplicates into `<dir>/duplicates`
    Cull {
        /// Directory to cull
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,

        #[command(flatten)]
        opts: EngineOpts,

        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,

        /// Directory to move duplicates into (default: `<dir>/duplicates`)
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct EngineOpts {
    /// Cluster-resolution strategy
    #[arg(long, value_enum, default_value = "clustering")]
    strategy: StrategyArg,

    /// Compare every pair instead of adjacent pairs only
    #[arg(long)]
    full_scan: bool,

    /// Include the 64-bit pHash signal set
    #[arg(long)]
    with_phash: bool,

    /// ONNX encoder model; enables the semantic signal
    #[arg(long, value_name = "FILE")]
    semantic_model: Option<PathBuf>,

    /// Extraction worker threads
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// JSON config file overriding all of the above
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Sequential,
    Clustering,
    Cascading,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sequential => Strategy::Sequential,
            StrategyArg::Clustering => Strategy::Clustering,
            StrategyArg::Cascading => Strategy::Cascading,
        }
    }
}

/// Everything a scan produced, serialized verbatim as the report.
#[derive(Serialize)]
struct Report<'a> {
    generated_at: String,
    strategy: Strategy,
    scanned: usize,
    kept: Vec<&'a PathBuf>,
    removed: Vec<&'a PathBuf>,
    unreadable: &'a [PathBuf],
    stage_exits: StageCounts,
    decisions: &'a [neardup::DecisionRecord],
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("neardup=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan { path, opts, report } => {
            println!("▶ Scanning for near-duplicates in: {}", path.display());
            let (images, outcome, strategy) = run_engine(&path, &opts)?;
            let removed = removed_paths(&images, &outcome);

            if removed.is_empty() {
                println!("No near-duplicates found.");
            } else {
                println!("Found {} near-duplicate(s):", removed.len());
                for path in &removed {
                    println!("   ▶ {}", path.display());
                }
            }
            for path in &outcome.unreadable {
                eprintln!("⚠️  Unreadable, skipped: {}", path.display());
            }

            if let Some(report_path) = report {
                write_report(&report_path, &images, &outcome, strategy)?;
                println!("✅ Wrote report to {}", report_path.display());
            }
        }

        Commands::Cull {
            path,
            opts,
            dry_run,
            target_dir,
        } => {
            println!("▶ Culling near-duplicates in: {}", path.display());
            let (images, outcome, _) = run_engine(&path, &opts)?;
            let removed = removed_paths(&images, &outcome);
            if removed.is_empty() {
                println!("No near-duplicates found.");
                return Ok(());
            }

            let dup_dir = target_dir.unwrap_or_else(|| path.join("duplicates"));
            if !dry_run {
                fs::create_dir_all(&dup_dir)
                    .with_context(|| format!("Failed to create directory {:?}", dup_dir))?;
            }

            let history_file = path.join(".history.jsonl");
            let mut history_out = if dry_run {
                None
            } else {
                Some(
                    OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&history_file)
                        .with_context(|| {
                            format!("Failed to open history file {:?}", history_file)
                        })?,
                )
            };

            let mut culled = Vec::new();
            for dup in &removed {
                culled.push(dup.to_string_lossy().into_owned());
                if dry_run {
                    println!(
                        "   📦 [dry-run] MOVE {} → {}",
                        dup.display(),
                        dup_dir.display()
                    );
                    continue;
                }
                let file_name = dup
                    .file_name()
                    .with_context(|| format!("No file name in {:?}", dup))?;
                let dest = dup_dir.join(file_name);
                fs::rename(dup, &dest)
                    .with_context(|| format!("Failed to move {:?} → {:?}", dup, dest))?;
                println!("   📦 Moved {} → {}", dup.display(), dest.display());
            }

            if let Some(out) = history_out.as_mut() {
                let record = serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "culled": culled,
                    "action": "moved",
                });
                writeln!(out, "{}", record)?;
                println!("✅ Recorded cull history in {}", history_file.display());
            } else {
                println!("\n⚠️  Dry-run only; no files were changed.");
            }
        }
    }

    Ok(())
}

fn run_engine(dir: &Path, opts: &EngineOpts) -> Result<(Vec<PathBuf>, BatchOutcome, Strategy)> {
    let images = scan_directory(dir)?;
    println!("▶ Evaluating {} images…", images.len());

    let config = build_config(opts)?;
    let strategy = Strategy::from(opts.strategy);
    let engine = DedupEngine::new(config).context("Failed to build engine")?;

    // Each file is its own group; grouping by burst/series is the caller's
    // concern when using the library directly.
    let groups: Vec<Vec<PathBuf>> = images.iter().cloned().map(|p| vec![p]).collect();
    let outcome = engine
        .run(&groups, &MetadataMap::new(), strategy)
        .context("Deduplication failed")?;
    Ok((images, outcome, strategy))
}

fn build_config(opts: &EngineOpts) -> Result<DedupConfig> {
    if let Some(config_path) = &opts.config {
        let text = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config {:?}", config_path))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Invalid config {:?}", config_path));
    }

    let set = if opts.with_phash {
        SignalSet::WithPhash
    } else {
        SignalSet::Base
    };
    let mut config = if matches!(opts.strategy, StrategyArg::Cascading) {
        DedupConfig::cascading()
    } else {
        DedupConfig::new(set)
    };
    config.full_scan = opts.full_scan;
    if let Some(model) = &opts.semantic_model {
        config.use_semantic = true;
        config.encoder_model = Some(model.clone());
    }
    if let Some(workers) = opts.workers {
        config.max_workers = workers;
    }
    Ok(config)
}

/// Surviving groups are singletons here, so the removed set is everything
/// discovered that no surviving group contains.
fn removed_paths<'a>(images: &'a [PathBuf], outcome: &BatchOutcome) -> Vec<&'a PathBuf> {
    images
        .iter()
        .filter(|p| !outcome.groups.iter().any(|g| g.contains(p)))
        .filter(|p| !outcome.unreadable.contains(p))
        .collect()
}

fn write_report(
    report_path: &Path,
    images: &[PathBuf],
    outcome: &BatchOutcome,
    strategy: Strategy,
) -> Result<()> {
    let report = Report {
        generated_at: Utc::now().to_rfc3339(),
        strategy,
        scanned: images.len(),
        kept: outcome.groups.iter().flatten().collect(),
        removed: removed_paths(images, outcome),
        unreadable: &outcome.unreadable,
        stage_exits: outcome.stage_exits,
        decisions: &outcome.decisions,
    };
    let json = serde_json::to_string_pretty(&report)?;
    fs::write(report_path, json)
        .with_context(|| format!("Failed to write report {:?}", report_path))?;
    Ok(())
}

/// Recursively walk `dir`, returning a Vec of image file paths.
fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Scanning for images…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let allowed_exts = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.is_file() {
            if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                if allowed_exts.contains(&ext.to_lowercase().as_str()) {
                    images.push(path.to_path_buf());
                }
            }
        }
        spinner.tick();
    }
    spinner.finish_with_message("Scan complete");
    images.sort();
    Ok(images)
}
