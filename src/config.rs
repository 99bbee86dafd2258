//! Merge engine configuration (`docmerge.toml`).
//!
//! Defines the typed knobs for conflict resolution, auto-reconciliation, and
//! traversal limits. Every field has a default, so an empty or missing file
//! yields [`MergeConfig::default`].

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::model::Side;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level merge configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Conflict resolution settings.
    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Auto-reconciliation settings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Traversal limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

// ---------------------------------------------------------------------------
// ResolveConfig
// ---------------------------------------------------------------------------

/// Conflict resolution settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveConfig {
    /// Side whose value wins on harmless fields (default: `left`).
    #[serde(default = "default_harmless_side")]
    pub harmless_side: Side,

    /// Reject resolution maps carrying keys the run never encountered.
    #[serde(default)]
    pub strict_picks: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            harmless_side: default_harmless_side(),
            strict_picks: false,
        }
    }
}

const fn default_harmless_side() -> Side {
    Side::Left
}

// ---------------------------------------------------------------------------
// ReconcileConfig
// ---------------------------------------------------------------------------

/// Auto-reconciliation settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Separator between a duplicate name and its suffix (default: `" "`).
    #[serde(default = "default_name_separator")]
    pub name_separator: String,

    /// First numeric suffix tried when de-duplicating (default: `2`).
    #[serde(default = "default_first_suffix")]
    pub first_suffix: u32,

    /// Separator between a duplicate page path and its suffix (default: `"-"`).
    #[serde(default = "default_path_separator")]
    pub path_separator: String,

    /// Rewrite `${prefix:Name}` references when renaming (default: `true`).
    #[serde(default = "default_true")]
    pub rewrite_references: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            name_separator: default_name_separator(),
            first_suffix: default_first_suffix(),
            path_separator: default_path_separator(),
            rewrite_references: true,
        }
    }
}

impl ReconcileConfig {
    /// `base` with suffix `n`, for names.
    #[must_use]
    pub fn suffixed_name(&self, base: &str, n: u32) -> String {
        format!("{base}{}{n}", self.name_separator)
    }

    /// `base` with suffix `n`, for page paths.
    #[must_use]
    pub fn suffixed_path(&self, base: &str, n: u32) -> String {
        format!("{base}{}{n}", self.path_separator)
    }
}

fn default_name_separator() -> String {
    " ".to_owned()
}

const fn default_first_suffix() -> u32 {
    2
}

fn default_path_separator() -> String {
    "-".to_owned()
}

const fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// LimitsConfig
// ---------------------------------------------------------------------------

/// Bounds on graph walks.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum owner-chain length followed before giving up (default: 4096).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

const fn default_max_depth() -> usize {
    4096
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading or parsing a configuration file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl MergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or values that
    /// would make reconciliation ill-defined.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        cfg.check()?;
        Ok(cfg)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.reconcile.first_suffix < 2 {
            return Err(ConfigError {
                path: None,
                message: format!(
                    "reconcile.first_suffix must be at least 2, got {}",
                    self.reconcile.first_suffix
                ),
            });
        }
        if self.limits.max_depth == 0 {
            return Err(ConfigError {
                path: None,
                message: "limits.max_depth must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = MergeConfig::default();
        assert_eq!(cfg.resolve.harmless_side, Side::Left);
        assert!(!cfg.resolve.strict_picks);
        assert_eq!(cfg.reconcile.name_separator, " ");
        assert_eq!(cfg.reconcile.first_suffix, 2);
        assert_eq!(cfg.reconcile.path_separator, "-");
        assert!(cfg.reconcile.rewrite_references);
        assert_eq!(cfg.limits.max_depth, 4096);
    }

    #[test]
    fn parse_empty_string() {
        let cfg = MergeConfig::parse("").unwrap();
        assert_eq!(cfg, MergeConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[resolve]
harmless_side = "right"
strict_picks = true

[reconcile]
name_separator = "_"
first_suffix = 3
path_separator = "--"
rewrite_references = false

[limits]
max_depth = 64
"#;
        let cfg = MergeConfig::parse(toml).unwrap();
        assert_eq!(cfg.resolve.harmless_side, Side::Right);
        assert!(cfg.resolve.strict_picks);
        assert_eq!(cfg.reconcile.suffixed_name("Brand", 3), "Brand_3");
        assert_eq!(cfg.reconcile.suffixed_path("/about", 3), "/about--3");
        assert!(!cfg.reconcile.rewrite_references);
        assert_eq!(cfg.limits.max_depth, 64);
    }

    #[test]
    fn unknown_field_reports_line() {
        let err = MergeConfig::parse("[resolve]\nharmless = \"left\"\n").unwrap_err();
        assert!(err.message.contains("line 2"), "{err}");
    }

    #[test]
    fn rejects_bad_suffix() {
        let err = MergeConfig::parse("[reconcile]\nfirst_suffix = 1\n").unwrap_err();
        assert!(err.message.contains("first_suffix"));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = MergeConfig::load(&dir.path().join("docmerge.toml")).unwrap();
        assert_eq!(cfg, MergeConfig::default());
    }

    #[test]
    fn load_reads_file_and_tags_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docmerge.toml");
        std::fs::write(&path, "[limits]\nmax_depth = 8\n").unwrap();
        assert_eq!(MergeConfig::load(&path).unwrap().limits.max_depth, 8);

        std::fs::write(&path, "[limits\n").unwrap();
        let err = MergeConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().contains("docmerge.toml"));
    }

    #[test]
    fn config_error_display_without_path() {
        let err = ConfigError {
            path: None,
            message: "parse error".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("config error"));
        assert!(msg.contains("parse error"));
    }
}
