//! CLI entry point for clipdeck
//!
//! Exports clips, extracts waveforms, purges caches and runs the local
//! media server.

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use clipdeck_pipeline::{
    run_startup_checks, CancellationToken, Config, ExportOptions, Pipeline, ProgressEvent,
    SaveLocationPrompt,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// clipdeck - clip export and waveform pipeline around ffmpeg
#[derive(Parser, Debug)]
#[command(name = "clipdeck")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file. Without it, defaults plus
    /// CLIPDECK_* environment variables are used.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Skip startup checks (ffmpeg version, cache directories)
    #[arg(long, default_value = "false", global = true)]
    skip_checks: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a clip of a source video
    Export {
        source: PathBuf,

        /// Clip start in seconds
        #[arg(long, default_value = "0")]
        start: f64,

        /// Clip end in seconds; may be omitted when --options is given
        #[arg(long, required_unless_present = "options")]
        end: Option<f64>,

        /// Output container (mp4, mov, m4v, mkv, webm, gif)
        #[arg(short, long, default_value = "mp4")]
        format: String,

        /// Full export options as JSON; overrides --start, --end and --format
        #[arg(long)]
        options: Option<String>,

        /// Write to this path instead of the export cache
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the audio waveform of a source
    Waveform {
        /// Path or clipdeck-media:// URL
        source: String,

        #[arg(short, long, default_value = "1000")]
        samples: usize,

        #[arg(short, long, default_value = "0")]
        track: u32,

        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Remove cached waveforms, or the cached exports of one source
    PurgeCache {
        #[arg(long)]
        exports_for: Option<PathBuf>,
    },

    /// Serve local media over HTTP with range support
    Serve,
}

/// Save location fixed on the command line
struct FixedLocation(PathBuf);

#[async_trait]
impl SaveLocationPrompt for FixedLocation {
    async fn choose(&self, _source: &Path, _suggested_name: &str) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    }
    .map_err(|e| format!("Failed to load config: {}", e))
}

fn export_options(
    start: f64,
    end: Option<f64>,
    format: String,
    json: Option<&str>,
) -> Result<ExportOptions, String> {
    match (json, end) {
        (Some(json), _) => {
            serde_json::from_str(json).map_err(|e| format!("Invalid export options: {}", e))
        }
        (None, Some(end)) => Ok(ExportOptions::new(start, end, format)),
        (None, None) => Err("--end is required without --options".to_string()),
    }
}

async fn print_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        eprint!(
            "\rExporting {:>5.1}% ({:.1}s / {:.1}s)",
            event.progress * 100.0,
            event.current_time_seconds,
            event.total_duration_seconds
        );
    }
    eprintln!();
}

async fn run(args: Args, config: Config) -> Result<(), String> {
    match args.command {
        Command::Export {
            source,
            start,
            end,
            format,
            options,
            output,
        } => {
            let mut options = export_options(start, end, format, options.as_deref())?;
            let mut pipeline = Pipeline::new(config);
            if let Some(output) = output {
                options.choose_export_location_interactively = true;
                pipeline = pipeline.with_save_prompt(Arc::new(FixedLocation(output)));
            }

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling export");
                    ctrl_c.cancel();
                }
            });

            let (tx, rx) = mpsc::channel(64);
            let printer = tokio::spawn(print_progress(rx));
            let result = pipeline
                .export_with_cancel(&source, &options, Some(tx), &cancel)
                .await;
            let _ = printer.await;

            let json = serde_json::to_string_pretty(&result)
                .map_err(|e| format!("Cannot print result: {}", e))?;
            println!("{}", json);
            if result.success {
                Ok(())
            } else {
                Err(result.message.unwrap_or_else(|| "Export failed".to_string()))
            }
        }
        Command::Waveform {
            source,
            samples,
            track,
            json,
        } => {
            let pipeline = Pipeline::new(config);
            let values = pipeline
                .waveform(&source, samples, track)
                .await
                .ok_or_else(|| format!("No waveform available for {}", source))?;
            if json {
                let json = serde_json::to_string(&values)
                    .map_err(|e| format!("Cannot print waveform: {}", e))?;
                println!("{}", json);
            } else {
                for value in values {
                    println!("{:.4}", value);
                }
            }
            Ok(())
        }
        Command::PurgeCache { exports_for } => {
            let pipeline = Pipeline::new(config);
            match exports_for {
                Some(source) => {
                    let removed = pipeline
                        .purge_exports_for(&source)
                        .map_err(|e| e.to_string())?;
                    println!(
                        "{} exports for {}",
                        if removed { "Removed" } else { "No cached" },
                        source.display()
                    );
                }
                None => {
                    let removed = pipeline.purge_waveform_cache().map_err(|e| e.to_string())?;
                    println!("Removed {} cached waveforms", removed);
                }
            }
            Ok(())
        }
        Command::Serve => {
            let pipeline = Pipeline::new(config);
            info!(bind = %pipeline.config().server.bind, "Starting media server");
            pipeline
                .serve()
                .await
                .map_err(|e| format!("Media server error: {}", e))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else if let Err(e) = run_startup_checks(&config) {
        eprintln!("Startup checks failed: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
