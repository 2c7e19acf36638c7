//! Command-line host for the waveform extraction engine.
//!
//! Prints results and event records as JSON lines on stdout; logs go to
//! stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use waveform_extractor::{
    clear_all_waveform_cache, clear_cache, extract_waveform, extract_waveform_data_only,
    extract_waveform_data_only_to_stream, extract_waveform_to_stream, EngineConfig, EngineState,
    ExtractRequest, ReductionMethod,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum MethodArg {
    /// Mean absolute magnitude per window
    Average,
    /// Maximum absolute magnitude per window
    Peak,
}

impl From<MethodArg> for ReductionMethod {
    fn from(v: MethodArg) -> Self {
        match v {
            MethodArg::Average => ReductionMethod::Average,
            MethodArg::Peak => ReductionMethod::Peak,
        }
    }
}

#[derive(Parser)]
#[command(name = "waveform-extractor")]
#[command(author, version, about = "Extract and cache audio waveforms", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the waveform of an audio file or URL
    Extract {
        /// Local path, file:// or http(s):// URL
        path: String,

        /// Recompute even if a cached result exists
        #[arg(long, default_value_t = false)]
        no_cache: bool,

        /// Explicit cache key instead of one derived from the path
        #[arg(long)]
        cache_key: Option<String>,

        /// Amplitudes per second of audio (default: decoder native blocks)
        #[arg(long)]
        samples_per_second: Option<u32>,

        #[arg(long, value_enum)]
        method: Option<MethodArg>,

        /// Replace the decoded duration in the result (milliseconds)
        #[arg(long)]
        duration_ms: Option<u64>,

        /// Only print the amplitude sequence
        #[arg(long, default_value_t = false)]
        data_only: bool,

        /// Print start/progress/done event records
        #[arg(long, default_value_t = false)]
        progress: bool,
    },

    /// Evict one cached waveform
    ClearCache {
        #[arg(long, conflicts_with = "audio_path")]
        cache_key: Option<String>,

        #[arg(long)]
        audio_path: Option<String>,
    },

    /// Evict every cached waveform
    ClearAll,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::from_env(),
    };
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    waveform_extractor::init_tracing();

    let cli = Cli::parse();
    let state = EngineState::new(load_config(&cli)?).context("Failed to start engine")?;

    let outcome = run(&state, cli.command).await;
    state.shutdown();
    outcome
}

async fn run(state: &EngineState, command: Commands) -> Result<()> {
    match command {
        Commands::Extract {
            path,
            no_cache,
            cache_key,
            samples_per_second,
            method,
            duration_ms,
            data_only,
            progress,
        } => {
            let request = ExtractRequest {
                path,
                use_cache: !no_cache,
                cache_key,
                samples_per_second,
                method: method.map(ReductionMethod::from),
                duration_ms,
            };

            if progress {
                let mut stream = if data_only {
                    extract_waveform_data_only_to_stream(state, request)?
                } else {
                    extract_waveform_to_stream(state, request)?
                };
                let mut failed = false;
                while let Some(record) = stream.next_event().await {
                    failed |= record.error.is_some();
                    print_json(&record)?;
                }
                if failed {
                    anyhow::bail!("Extraction failed");
                }
            } else if data_only {
                print_json(&extract_waveform_data_only(state, request).await?)?;
            } else {
                print_json(&extract_waveform(state, request).await?)?;
            }
        }
        Commands::ClearCache {
            cache_key,
            audio_path,
        } => {
            let removed = clear_cache(state, cache_key.as_deref(), audio_path.as_deref())?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
        Commands::ClearAll => {
            let removed = clear_all_waveform_cache(state)?;
            print_json(&serde_json::json!({ "removed": removed }))?;
        }
    }
    Ok(())
}
