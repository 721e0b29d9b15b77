//! Runtime configuration.
//!
//! `Config` carries the resource limits and worker sizing the subsystems are
//! constructed with; `Settings` is the small JSON file pointing at the
//! external analysis/embedding endpoints. Every field is typed and has a
//! documented default - options never travel as open-ended maps.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.local/share/saga)
    pub data_dir: PathBuf,
    /// Settings file location
    pub settings_file: PathBuf,

    /// Largest single upload chunk accepted (bytes). Default 8 MiB.
    pub max_chunk_bytes: usize,
    /// Largest assembled upload accepted (bytes). Default 512 MiB.
    pub max_upload_bytes: usize,
    /// An upload session with no new chunk for this long is purged.
    pub upload_idle_timeout: Duration,
    /// How long a purged upload id is remembered so late chunks get
    /// `UploadNotFound` instead of silently opening a fresh session.
    pub upload_tombstone_retention: Duration,
    /// Interval of the background session sweeper.
    pub upload_sweep_interval: Duration,

    /// Number of concurrent job workers.
    pub worker_count: usize,
    /// Retry budget applied when the caller does not override it.
    pub default_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("saga");

        Self {
            settings_file: data_dir.join("settings.json"),
            data_dir,
            max_chunk_bytes: 8 * 1024 * 1024,
            max_upload_bytes: 512 * 1024 * 1024,
            upload_idle_timeout: Duration::from_secs(30 * 60),
            upload_tombstone_retention: Duration::from_secs(2 * 60 * 60),
            upload_sweep_interval: Duration::from_secs(60),
            worker_count: 2,
            default_max_retries: 2,
        }
    }
}

impl Config {
    /// Load configuration or use defaults.
    pub fn load_or_default() -> Self {
        Self::default()
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

/// External capability endpoints, persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Embedding endpoint (Ollama-style `/api/embed`). None = mock embedder.
    pub embedding_endpoint: Option<String>,
    /// Embedding model identifier.
    pub embedding_model_id: Option<String>,
    /// Vector dimensions the configured model produces.
    pub embedding_dimensions: Option<usize>,
    /// Analysis endpoint. None = no-op analyzer.
    pub analysis_endpoint: Option<String>,
}

impl Settings {
    /// Load settings from the given file, falling back to defaults if the
    /// file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "Malformed settings, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist settings to the given file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
