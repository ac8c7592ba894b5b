use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use wf_config::{EngineConfig, HumanDuration, TaskDef};
use wf_runtime::lifecycle::{TaskMaster, wait_for_signal};
use wf_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "wfengine", about = "Streaming task execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine
    Run {
        /// Path to the engine config file
        #[arg(short, long)]
        config: PathBuf,
        /// Directory of task definition files (one JSON document per task)
        #[arg(long)]
        tasks_dir: PathBuf,
        /// Enable runtime metrics and periodic snapshot output
        #[arg(long)]
        metrics: bool,
        /// Override metrics report interval (e.g. "2s", "30s", "1m")
        #[arg(long)]
        metrics_interval: Option<String>,
        /// Override metrics listen address for /metrics endpoint
        #[arg(long)]
        metrics_listen: Option<String>,
    },
}

/// Load every `*.json` task definition under `dir`, sorted by file name so
/// startup order is deterministic across runs.
fn load_task_defs(dir: &Path) -> Result<Vec<TaskDef>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading tasks dir '{}'", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading task file '{}'", path.display()))?;
            serde_json::from_str::<TaskDef>(&content)
                .with_context(|| format!("parsing task file '{}'", path.display()))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, tasks_dir, metrics, metrics_interval, metrics_listen } => {
            let config_path = config
                .canonicalize()
                .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
            let mut engine_config = EngineConfig::load(&config_path)?;
            if metrics || metrics_interval.is_some() || metrics_listen.is_some() {
                engine_config.metrics.enabled = true;
            }
            if let Some(interval) = metrics_interval {
                engine_config.metrics.report_interval = HumanDuration::from_str(&interval)
                    .map_err(|e| anyhow::anyhow!("invalid --metrics-interval '{interval}': {e}"))?;
            }
            if let Some(listen) = metrics_listen {
                engine_config.metrics.prometheus_listen = listen;
            }
            let metrics_enabled = engine_config.metrics.enabled;
            let metrics_interval = engine_config.metrics.report_interval;
            let metrics_listen = engine_config.metrics.prometheus_listen.clone();
            let base_dir = config_path.parent().expect("config path must have a parent directory");

            let _guard = init_tracing(&engine_config.logging, base_dir)?;

            let task_defs = load_task_defs(&tasks_dir)?;

            let master = TaskMaster::start(engine_config, task_defs)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            tracing::info!(domain = "sys", listen = %master.listen_addr(), "engine started");
            if metrics_enabled {
                tracing::info!(
                    domain = "res",
                    interval = %metrics_interval,
                    listen = %metrics_listen,
                    "runtime metrics enabled"
                );
            }

            wait_for_signal(master.cancel_token()).await;
            master.shutdown();
            master.wait().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        }
    }

    Ok(())
}
