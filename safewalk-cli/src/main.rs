// SafeWalk Command Line Interface
// Runs the obstacle pipeline against synthetic capture and inspects configuration

mod console;
mod synthetic;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use console::StatusLine;
use safewalk_core::SafewalkConfig;
use safewalk_eye::{ObjectRecognizer, PipelineCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use synthetic::{ScriptedBackend, SyntheticCapture};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "safewalk")]
#[command(about = "SafeWalk obstacle awareness pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline on synthetic capture
    Run {
        /// Configuration file (JSON, TOML or YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Seconds to run before stopping
        #[arg(long, short, default_value = "10")]
        duration: u64,

        /// Status refresh interval in milliseconds
        #[arg(long, default_value = "250")]
        refresh_ms: u64,

        /// Print status lines as JSON
        #[arg(long)]
        json: bool,

        /// Simulated recognition latency in milliseconds
        #[arg(long, default_value = "40")]
        latency_ms: u64,

        /// Run without a recognition model
        #[arg(long)]
        no_model: bool,

        /// Simulate a capture setup failure (camera, input, output, configure, or any text)
        #[arg(long, default_value = "none")]
        fail_setup: String,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show {
        /// Configuration file to load before environment overrides
        #[arg(long, short)]
        config: Option<PathBuf>,

        #[arg(long, short, value_enum, default_value = "toml")]
        format: OutputFormat,
    },

    /// Check a configuration file
    Validate { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Toml,
    Json,
    Yaml,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// File (or defaults), then `SAFEWALK_*` overrides, then validation.
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SafewalkConfig> {
    let mut config = match path {
        Some(path) => SafewalkConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SafewalkConfig::default(),
    };
    config.apply_env();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.json_logs);

    match cli.command {
        Commands::Run {
            config,
            duration,
            refresh_ms,
            json,
            latency_ms,
            no_model,
            fail_setup,
        } => {
            let config = load_config(config.as_ref())?;
            let recognizer = if no_model {
                ObjectRecognizer::unavailable()
            } else {
                ObjectRecognizer::new(Arc::new(ScriptedBackend::new(Duration::from_millis(latency_ms))))
            };
            let source = match synthetic::parse_failure(&fail_setup) {
                Some(error) => SyntheticCapture::failing(error),
                None => SyntheticCapture::new(),
            };
            run_pipeline(
                config,
                recognizer,
                Arc::new(source),
                Duration::from_secs(duration),
                Duration::from_millis(refresh_ms.max(10)),
                json,
            )
            .await?;
        }
        Commands::Config(ConfigCommands::Show { config, format }) => {
            let config = load_config(config.as_ref())?;
            let rendered = match format {
                OutputFormat::Toml => toml::to_string_pretty(&config)?,
                OutputFormat::Json => serde_json::to_string_pretty(&config)?,
                OutputFormat::Yaml => serde_yaml::to_string(&config)?,
            };
            println!("{}", rendered.trim_end());
        }
        Commands::Config(ConfigCommands::Validate { file }) => {
            load_config(Some(&file))?;
            println!("{}: ok", file.display());
        }
    }

    Ok(())
}

async fn run_pipeline(
    config: SafewalkConfig,
    recognizer: ObjectRecognizer,
    source: Arc<SyntheticCapture>,
    duration: Duration,
    refresh: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let threshold = config.warning.threshold_m;
    let pipeline = PipelineCoordinator::with_current_runtime(config, recognizer)?;
    pipeline.attach_source(source);

    if let Err(error) = pipeline.start() {
        let message = pipeline
            .take_error_message()
            .unwrap_or_else(|| error.user_message());
        eprintln!("{}", message);
        anyhow::bail!("pipeline failed to start: {}", error);
    }

    let mut ticker = tokio::time::interval(refresh);
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let line = StatusLine::from_snapshot(&pipeline.state().snapshot(), threshold);
                if json {
                    println!("{}", serde_json::to_string(&line)?);
                } else {
                    println!("{}", line.render());
                }
            }
        }
    }

    // Stopping joins capture threads; keep that off the async workers
    let stopper = pipeline.clone();
    if !tokio::task::spawn_blocking(move || stopper.stop()).await? {
        warn!("Pipeline was already stopped");
    }

    let stats = pipeline.stats();
    info!(
        depth = stats.depth_published,
        color = stats.color_published,
        recognitions = stats.recognitions_applied,
        "Run finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
