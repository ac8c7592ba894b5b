use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::ingest::IngestConfig;
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::process::ProcessConfig;
use crate::snapshot::SnapshotConfig;

/// Top-level process configuration, read from `wfusion.toml` (spec.md §6:
/// "one configuration document enumerating the recognized options").
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub process: ProcessConfig,
    pub ingest: IngestConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for EngineConfig {
    type Err = anyhow::Error;

    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &EngineConfig) -> anyhow::Result<()> {
    if config.ingest.http_listen.is_empty() {
        anyhow::bail!("ingest.http_listen must not be empty");
    }
    if config.ingest.task_fork_capacity == 0 {
        anyhow::bail!("ingest.task_fork_capacity must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_TOML: &str = r#"
[process]
data_dir = "/var/lib/wfusion"
pid_file = "/var/run/wfusion.pid"

[ingest]
http_listen = "127.0.0.1:9800"
udp_listen = "127.0.0.1:9801"

[logging]
level = "info"

[metrics]
enabled = true
report_interval = "5s"
prometheus_listen = "127.0.0.1:9901"

[snapshot]
interval = "30s"

[snapshot.backend]
kind = "file"
dir = "/var/lib/wfusion/snapshots"
"#;

    #[test]
    fn load_full_toml() {
        let cfg: EngineConfig = FULL_TOML.parse().unwrap();
        assert_eq!(cfg.ingest.http_listen, "127.0.0.1:9800");
        assert_eq!(cfg.ingest.udp_listen.as_deref(), Some("127.0.0.1:9801"));
        assert!(cfg.metrics.enabled);
        match cfg.snapshot.backend {
            crate::snapshot::SnapshotBackend::File { ref dir } => {
                assert_eq!(dir, Path::new("/var/lib/wfusion/snapshots"));
            }
            crate::snapshot::SnapshotBackend::Memory => panic!("expected file backend"),
        }
    }

    #[test]
    fn reject_empty_http_listen() {
        let toml = FULL_TOML.replace(
            r#"http_listen = "127.0.0.1:9800""#,
            r#"http_listen = """#,
        );
        assert!(toml.parse::<EngineConfig>().is_err());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let toml = r#"
[process]
data_dir = "/tmp/wf"

[ingest]
http_listen = "127.0.0.1:9800"
"#;
        let cfg: EngineConfig = toml.parse().unwrap();
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.logging.level, "info");
        assert!(matches!(
            cfg.snapshot.backend,
            crate::snapshot::SnapshotBackend::Memory
        ));
    }
}
