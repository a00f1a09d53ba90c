//! Daemon configuration parsing.
//!
//! Parses the TOML configuration file that points the daemon at its
//! database, artifact root, and compiler binary, and tunes the
//! compilation policy.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Path to the launch-history database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory for compiled prefetch artifacts.
    #[serde(default = "default_compiled_trace_root")]
    pub compiled_trace_root: PathBuf,

    /// Path of the external compiler binary.
    #[serde(default = "default_compiler_path")]
    pub compiler_path: PathBuf,

    /// Minimum number of raw traces before an activity is compiled.
    #[serde(default = "default_min_traces")]
    pub min_traces: usize,

    /// Pass `--verbose` to the compiler.
    #[serde(default)]
    pub verbose: bool,

    /// Ask the compiler for a text rendition next to the proto output.
    #[serde(default)]
    pub output_text: bool,

    /// Optional inode-to-filename resolution cache handed to the
    /// compiler.
    #[serde(default)]
    pub inode_textcache: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/prefetchd/history.db")
}

fn default_compiled_trace_root() -> PathBuf {
    PathBuf::from("/var/lib/prefetchd/compiled")
}

fn default_compiler_path() -> PathBuf {
    PathBuf::from("/usr/libexec/prefetchd-compiler")
}

const fn default_min_traces() -> usize {
    3
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            compiled_trace_root: default_compiled_trace_root(),
            compiler_path: default_compiler_path(),
            min_traces: default_min_traces(),
            verbose: false,
            output_text: false,
            inode_textcache: None,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
