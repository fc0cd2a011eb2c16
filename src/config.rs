//! Configuration types for unarchive

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Archive extraction configuration
///
/// Every field has a default, so `ExtractionConfig::default()` (or an empty
/// JSON object) gives a working setup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum depth for nested archive extraction (default: 32)
    ///
    /// The root archive is depth 0. An archive found at a depth greater than
    /// this is reported as `NestingTooDeep` and left packed.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Cumulative extracted-bytes budget for one run (None = unlimited)
    #[serde(default)]
    pub max_total_bytes: Option<u64>,

    /// Suffix appended to an archive's stem to name its output directory
    /// (default: "_extracted")
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,

    /// RAR decoding backend selection
    #[serde(default)]
    pub rar: RarConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_total_bytes: None,
            output_suffix: default_output_suffix(),
            rar: RarConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Check the configuration for values the extractor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.output_suffix.is_empty() {
            return Err(Error::Config {
                message: "output suffix must not be empty".into(),
                key: Some("output_suffix".into()),
            });
        }

        if self.output_suffix.contains(['/', '\\']) || self.output_suffix.contains('\0') {
            return Err(Error::Config {
                message: format!(
                    "output suffix '{}' must not contain path separators",
                    self.output_suffix
                ),
                key: Some("output_suffix".into()),
            });
        }

        if self.max_total_bytes == Some(0) {
            return Err(Error::Config {
                message: "byte budget of 0 would reject every archive".into(),
                key: Some("max_total_bytes".into()),
            });
        }

        Ok(())
    }
}

/// Which RAR decoder to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RarBackendKind {
    /// Bundled decoder if compiled in, else an unrar binary from PATH, else none (default)
    #[default]
    Auto,
    /// In-process decoder (requires the `bundled-rar` feature)
    Bundled,
    /// External unrar-compatible binary
    Cli,
    /// No RAR support; RAR archives fail with `UnsupportedFormat`
    Disabled,
}

/// RAR decoding configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RarConfig {
    /// Backend selection (default: auto)
    #[serde(default)]
    pub backend: RarBackendKind,

    /// Path to unrar executable (auto-detected if None)
    #[serde(default)]
    pub unrar_path: Option<PathBuf>,

    /// Whether to search PATH for unrar if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for RarConfig {
    fn default() -> Self {
        Self {
            backend: RarBackendKind::default(),
            unrar_path: None,
            search_path: true,
        }
    }
}

fn default_max_depth() -> u32 {
    32
}

fn default_output_suffix() -> String {
    "_extracted".to_string()
}

fn default_true() -> bool {
    true
}
