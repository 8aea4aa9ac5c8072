//! Inspect saved frame indexes without loading an embedding model.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use vidsearch::{EngineConfig, FrameIndex, SearchHit};

#[derive(Parser)]
#[command(name = "vidsearch-cli", version, about = "Inspect vidsearch index files")]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show dimension, frame count and covered time span
    Inspect {
        /// Index file (defaults to VIDSEARCH_INDEX_PATH)
        index: Option<PathBuf>,
        /// Also list every frame
        #[arg(long)]
        frames: bool,
    },
    /// Rank frames by similarity to one indexed frame
    Similar {
        index: Option<PathBuf>,
        /// Frame id to compare against
        #[arg(long)]
        frame: u64,
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[derive(Serialize)]
struct Summary {
    path: String,
    dimension: usize,
    frame_count: usize,
    first_timestamp_sec: Option<f64>,
    last_timestamp_sec: Option<f64>,
}

fn main() -> Result<()> {
    let config = EngineConfig::from_env();
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Inspect { index, frames } => {
            let path = index.unwrap_or_else(|| config.index_path.clone());
            inspect(path, frames, cli.json)
        }
        Command::Similar { index, frame, top_k } => {
            let path = index.unwrap_or_else(|| config.index_path.clone());
            similar(path, frame, top_k.unwrap_or(config.default_top_k), cli.json)
        }
    }
}

fn open(path: &Path) -> Result<FrameIndex> {
    FrameIndex::load(path).with_context(|| format!("failed to load {}", path.display()))
}

fn inspect(path: PathBuf, list_frames: bool, json: bool) -> Result<()> {
    let index = open(&path)?;
    let summary = Summary {
        path: path.display().to_string(),
        dimension: index.dimension(),
        frame_count: index.count(),
        first_timestamp_sec: index.frames().next().map(|f| f.timestamp_sec),
        last_timestamp_sec: index.frames().last().map(|f| f.timestamp_sec),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if list_frames {
            let frames: Vec<_> = index.frames().collect();
            println!("{}", serde_json::to_string_pretty(&frames)?);
        }
        return Ok(());
    }

    println!("index:      {}", summary.path);
    println!("dimension:  {}", summary.dimension);
    println!("frames:     {}", summary.frame_count);
    match (summary.first_timestamp_sec, summary.last_timestamp_sec) {
        (Some(first), Some(last)) => println!("time span:  {:.3}s - {:.3}s", first, last),
        _ => println!("time span:  (empty)"),
    }
    if list_frames {
        for frame in index.frames() {
            println!("{:>8}  {:>10.3}s  {}", frame.id, frame.timestamp_sec, frame.source_path);
        }
    }
    Ok(())
}

fn similar(path: PathBuf, frame_id: u64, top_k: usize, json: bool) -> Result<()> {
    let index = open(&path)?;
    let position = index
        .position_of(frame_id)
        .with_context(|| format!("frame {} is not in {}", frame_id, path.display()))?;
    let hits: Vec<SearchHit> = index
        .similar_to(position, top_k)?
        .into_iter()
        .map(SearchHit::from)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    for hit in &hits {
        println!(
            "#{:<3} score {:.4}  frame {:>6}  {:>10.3}s  {}",
            hit.rank, hit.score, hit.frame_id, hit.timestamp_sec, hit.source_path
        );
    }
    Ok(())
}
