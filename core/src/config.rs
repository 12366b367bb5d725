use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::network::protocol::MAX_CONTENT_LENGTH;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests executing at once
    pub worker_threads: usize,
    /// Requests allowed to wait for a worker before new ones are turned away
    pub work_queue_size: usize,
    /// Largest accepted request content, in bytes
    pub max_content_length: usize,
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6969,
            worker_threads: 4,
            work_queue_size: 16,
            max_content_length: MAX_CONTENT_LENGTH,
            read_timeout_secs: 30,
        }
    }
}

/// Where table bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMedium {
    #[default]
    Disk,
    Memory,
}

/// Storage engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory path for storing database files
    pub data_dir: String,
    /// Maximum children per B+ tree internal node
    pub tree_order: usize,
    pub medium: StorageMedium,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            tree_order: 10,
            medium: StorageMedium::Disk,
        }
    }
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            medium: StorageMedium::Memory,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Reads the TOML file named by `PINEDB_CONFIG`, else `--config`/`-c`, else
    /// `path`. A missing file yields defaults. `PINEDB_*` variables win over
    /// file values.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let args: Vec<String> = env::args().skip(1).collect();
        let source = config_source(env::var_os("PINEDB_CONFIG"), &args, path.as_ref());

        let mut config = Self::read_file(&source)?;
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(toml::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Applies `PINEDB_HOST`, `PINEDB_PORT`, `PINEDB_DATA_DIR` and
    /// `PINEDB_WORKERS`. Unparsable numbers are ignored.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PINEDB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PINEDB_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = lookup("PINEDB_DATA_DIR") {
            self.storage.data_dir = dir;
        }
        if let Some(workers) = lookup("PINEDB_WORKERS").and_then(|v| v.parse().ok()) {
            self.server.worker_threads = workers;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.worker_threads == 0 {
            anyhow::bail!("server.worker_threads must be at least 1");
        }
        if self.storage.tree_order < crate::btree::MIN_ORDER {
            anyhow::bail!(
                "storage.tree_order must be at least {}, got {}",
                crate::btree::MIN_ORDER,
                self.storage.tree_order
            );
        }
        if self.server.max_content_length > u16::MAX as usize {
            anyhow::bail!(
                "server.max_content_length cannot exceed {} (u16 length prefix)",
                u16::MAX
            );
        }
        Ok(())
    }
}

fn config_source(env_path: Option<OsString>, args: &[String], fallback: &Path) -> PathBuf {
    env_path
        .map(PathBuf::from)
        .or_else(|| config_flag(args))
        .unwrap_or_else(|| fallback.to_path_buf())
}

/// Value of the first `--config`/`-c` flag, in either `flag value` or
/// `flag=value` form.
fn config_flag(args: &[String]) -> Option<PathBuf> {
    args.iter().enumerate().find_map(|(i, arg)| {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag, Some(value)),
            None => (arg.as_str(), None),
        };
        if flag != "--config" && flag != "-c" {
            return None;
        }
        inline
            .map(str::to_owned)
            .or_else(|| args.get(i + 1).cloned())
            .map(PathBuf::from)
    })
}
