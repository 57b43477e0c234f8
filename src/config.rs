//! Configuration loading (see SPEC_FULL.md §6 "Environment / config", §A.4)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Per-filesystem overrides (`[fs.<dataset>]` sections in the config file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemSection {
    /// Only operate on snapshots whose tag starts with this prefix.
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,

    /// Compressor label used for backups of this filesystem, or `None` for no compression.
    #[serde(default = "default_compressor")]
    pub compressor: Option<String>,
}

impl Default for FilesystemSection {
    fn default() -> Self {
        Self {
            snapshot_prefix: default_snapshot_prefix(),
            compressor: default_compressor(),
        }
    }
}

/// Top-level configuration, loaded from a TOML file and/or environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named AWS credential profile to use.
    #[serde(default)]
    pub profile: Option<String>,

    /// `"aws"` for the default AWS endpoint, or a URL for an S3-compatible provider.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Destination bucket for backups.
    #[serde(default)]
    pub bucket: Option<String>,

    /// Default upload chunk size in bytes. Overridden by `--chunk-size`/`--estimated`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Default number of parallel upload workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Maximum attempts per part upload before the worker gives up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// S3 storage class applied to uploaded objects.
    #[serde(default = "default_storage_class")]
    pub s3_storage_class: String,

    /// Key prefix under which all snapshot objects live; always normalized with a trailing `/`.
    #[serde(default = "default_s3_prefix")]
    pub s3_prefix: String,

    /// Target volume-manager dataset.
    #[serde(default)]
    pub filesystem: Option<String>,

    /// Explicit credentials (optional — falls back to the named profile's chain).
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Per-dataset overrides, keyed by dataset name.
    #[serde(default, rename = "fs")]
    pub filesystems: HashMap<String, FilesystemSection>,
}

fn default_endpoint() -> String {
    "aws".to_string()
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_storage_class() -> String {
    "STANDARD_IA".to_string()
}

fn default_s3_prefix() -> String {
    "zfs3backup/".to_string()
}

fn default_snapshot_prefix() -> String {
    "zfs-auto-snap:daily".to_string()
}

fn default_compressor() -> Option<String> {
    Some("pigz1".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: None,
            endpoint: default_endpoint(),
            bucket: None,
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            s3_storage_class: default_storage_class(),
            s3_prefix: default_s3_prefix(),
            filesystem: None,
            access_key_id: None,
            secret_access_key: None,
            filesystems: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_string(),
            source: e,
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            source: e,
        })?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("PROFILE") {
            config.profile = Some(v);
        }
        if let Ok(v) = std::env::var("ENDPOINT") {
            config.endpoint = v;
        }
        if let Ok(v) = std::env::var("BUCKET") {
            config.bucket = Some(v);
        }
        if let Ok(v) = std::env::var("CHUNK_SIZE") {
            if let Ok(parsed) = crate::uploader::parse_size(&v) {
                config.chunk_size = parsed;
            }
        }
        if let Ok(v) = std::env::var("CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                config.concurrency = parsed;
            }
        }
        if let Ok(v) = std::env::var("MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                config.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("S3_STORAGE_CLASS") {
            config.s3_storage_class = v;
        }
        if let Ok(v) = std::env::var("S3_PREFIX") {
            config.s3_prefix = v;
        }
        if let Ok(v) = std::env::var("FILESYSTEM") {
            config.filesystem = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_ACCESS_KEY_ID") {
            config.access_key_id = Some(v);
        }
        if let Ok(v) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            config.secret_access_key = Some(v);
        }

        if let Some(ref fs) = config.filesystem {
            let mut section = FilesystemSection::default();
            if let Ok(v) = std::env::var("SNAPSHOT_PREFIX") {
                section.snapshot_prefix = v;
            }
            if let Ok(v) = std::env::var("COMPRESSOR") {
                section.compressor = if v.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(v)
                };
            }
            config.filesystems.insert(fs.clone(), section);
        }

        config
    }

    /// Load configuration from a file if one exists (`ZFS3BACKUP_CONFIG` or
    /// `~/.zfs3backup.cfg`), falling back to environment variables.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("ZFS3BACKUP_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        if let Some(home) = dirs_home() {
            let path = home.join(".zfs3backup.cfg");
            if path.exists() {
                if let Ok(config) = Self::from_file(&path.to_string_lossy()) {
                    return config;
                }
            }
        }

        Self::from_env()
    }

    /// The section overrides for `dataset`, or the built-in defaults if none configured.
    pub fn filesystem_section(&self, dataset: &str) -> FilesystemSection {
        self.filesystems.get(dataset).cloned().unwrap_or_default()
    }

    /// `s3_prefix` normalized to always carry a trailing `/` (§6 "Object key layout").
    pub fn normalized_s3_prefix(&self) -> String {
        let trimmed = self.s3_prefix.trim_end_matches('/');
        format!("{trimmed}/")
    }

    pub fn require_bucket(&self) -> Result<&str, ConfigError> {
        self.bucket.as_deref().ok_or(ConfigError::Missing("BUCKET"))
    }

    pub fn require_filesystem(&self) -> Result<&str, ConfigError> {
        self.filesystem
            .as_deref()
            .ok_or(ConfigError::Missing("FILESYSTEM"))
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
