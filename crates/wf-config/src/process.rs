use std::path::PathBuf;

use serde::Deserialize;

/// Process layout (spec.md §6): one persistent data directory, one pid
/// file. The log file lives under `LoggingConfig`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessConfig {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}
