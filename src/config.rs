//! Configuration for gleaner.
//!
//! Configuration sources (highest priority first):
//! 1. Command line overrides (`--output`, `--media-dir`, ...)
//! 2. Environment variables (GLEANER_HOME, GLEANER_MEDIA_DIR,
//!    GLEANER_METADATA_DIR, GLEANER_STATE_DIR, GLEANER_SOURCES)
//! 3. Config file (`--config`, else .gleaner/config.yaml)
//! 4. Defaults (~/.gleaner)
//!
//! Config file discovery:
//! - Searches current directory and parents for .gleaner/config.yaml
//! - Paths in config file are relative to the config file's directory

pub mod sources;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::RunMode;

pub use sources::{load_sources, parse_source, SourceConfig, DEFAULT_BATCH_SIZE};

/// Default cap on a crawl batch
pub const DEFAULT_MAX_BATCH_SIZE: usize = 7;

/// Default digest message size cap (10 MiB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

const LOCK_FILE: &str = "gleaner.lock";

/// Config file layout understood by this build
pub const CONFIG_VERSION: &str = "1";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    /// Glob matching the source definition files
    pub sources: Option<String>,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Harvest root (relative to config file)
    pub root: Option<String>,
    /// The following are relative to root
    pub media: Option<String>,
    pub metadata: Option<String>,
    pub state: Option<String>,
    pub database: Option<String>,
    pub outbox: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarvestConfig {
    pub max_batch_size: Option<usize>,
    pub default_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Flat-file backend on/off
    pub files: Option<bool>,
    /// SQLite file name inside the database directory; absent disables it
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DigestConfig {
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    pub subject: Option<String>,
    pub max_message_bytes: Option<usize>,
}

/// Digest settings after defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSettings {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub max_message_bytes: usize,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            from: "gleaner@localhost".to_string(),
            to: Vec::new(),
            subject: "Harvest".to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct Settings {
    /// Harvest root
    pub root: PathBuf,
    /// Downloaded media
    pub media_dir: PathBuf,
    /// YAML item records
    pub metadata_dir: PathBuf,
    /// YAML source states and the run lock
    pub state_dir: PathBuf,
    /// Rendered digest messages
    pub outbox_dir: PathBuf,
    /// Glob pattern for source definitions
    pub sources: String,
    pub max_batch_size: usize,
    pub default_mode: RunMode,
    /// Whether the flat-file backend is active
    pub files_backend: bool,
    /// SQLite database file, when the relational backend is active
    pub database: Option<PathBuf>,
    pub digest: DigestSettings,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Command line path overrides
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub root: Option<PathBuf>,
    pub media: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
    pub state: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from an explicit file, a discovered file, or defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let file = match &config_file {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };

        Self::resolve(config_file.as_deref(), file, |name| std::env::var(name).ok())
    }

    /// Resolve a parsed config file against the environment and defaults
    pub fn resolve(
        config_path: Option<&Path>,
        file: ConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        if let Some(ref version) = file.version {
            if version.trim() != CONFIG_VERSION {
                anyhow::bail!(
                    "Unsupported config version '{}' (expected '{}')",
                    version,
                    CONFIG_VERSION
                );
            }
        }

        let base_dir = match config_path {
            Some(path) => path.parent().unwrap_or(Path::new(".")).to_path_buf(),
            None => dirs::home_dir()
                .context("Failed to determine home directory")?
                .join(".gleaner"),
        };

        let root = if let Some(env_root) = env("GLEANER_HOME") {
            PathBuf::from(env_root)
        } else if let Some(ref root) = file.paths.root {
            resolve_path(&base_dir, root)
        } else {
            base_dir.clone()
        };

        let under_root = |env_name: &str, configured: &Option<String>, default: &str| {
            if let Some(value) = env(env_name) {
                PathBuf::from(value)
            } else {
                resolve_path(&root, configured.as_deref().unwrap_or(default))
            }
        };
        let media_dir = under_root("GLEANER_MEDIA_DIR", &file.paths.media, "media");
        let metadata_dir = under_root("GLEANER_METADATA_DIR", &file.paths.metadata, "metadata");
        let state_dir = under_root("GLEANER_STATE_DIR", &file.paths.state, "state");
        let database_dir = resolve_path(&root, file.paths.database.as_deref().unwrap_or("db"));
        let outbox_dir = resolve_path(&root, file.paths.outbox.as_deref().unwrap_or("outbox"));

        let sources = match env("GLEANER_SOURCES") {
            Some(pattern) => pattern,
            None => {
                let pattern = file.sources.as_deref().unwrap_or("sources.d/*.yaml");
                resolve_path(&base_dir, pattern).to_string_lossy().into_owned()
            }
        };

        let default_mode = match file.harvest.default_mode {
            Some(ref mode) => mode
                .parse()
                .map_err(|e: String| anyhow::anyhow!("harvest.default_mode: {}", e))?,
            None => RunMode::default(),
        };
        let max_batch_size = file.harvest.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE);
        if max_batch_size == 0 {
            anyhow::bail!("harvest.max_batch_size must be greater than 0");
        }

        let files_backend = file.store.files.unwrap_or(true);
        let database = file.store.database.as_deref().map(|name| database_dir.join(name));
        if !files_backend && database.is_none() {
            anyhow::bail!("No persistence backend: enable store.files or set store.database");
        }

        let defaults = DigestSettings::default();
        let digest = DigestSettings {
            from: file.digest.from.unwrap_or(defaults.from),
            to: file.digest.to,
            subject: file.digest.subject.unwrap_or(defaults.subject),
            max_message_bytes: file
                .digest
                .max_message_bytes
                .unwrap_or(defaults.max_message_bytes),
        };

        Ok(Self {
            root,
            media_dir,
            metadata_dir,
            state_dir,
            outbox_dir,
            sources,
            max_batch_size,
            default_mode,
            files_backend,
            database,
            digest,
            config_file: config_path.map(Path::to_path_buf),
        })
    }

    /// Apply command line overrides. A new root moves the directories
    /// that still sit under the old one.
    pub fn apply_overrides(&mut self, overrides: &PathOverrides) {
        if let Some(ref root) = overrides.root {
            let old_root = self.root.clone();
            let rebase = |path: &mut PathBuf| {
                if let Ok(rest) = path.strip_prefix(&old_root) {
                    *path = root.join(rest);
                }
            };
            rebase(&mut self.media_dir);
            rebase(&mut self.metadata_dir);
            rebase(&mut self.state_dir);
            rebase(&mut self.outbox_dir);
            if let Some(ref mut database) = self.database {
                rebase(database);
            }
            self.root = root.clone();
        }
        if let Some(ref media) = overrides.media {
            self.media_dir = media.clone();
        }
        if let Some(ref metadata) = overrides.metadata {
            self.metadata_dir = metadata.clone();
        }
        if let Some(ref state) = overrides.state {
            self.state_dir = state.clone();
        }
    }

    /// Path of the run lock
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE)
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".gleaner").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
