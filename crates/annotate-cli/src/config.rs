//! Config file discovery, loading, and environment variable overlay.
//!
//! Files are loaded in order (later wins):
//! 1. `~/.config/midi-annotate/config.toml` (user)
//! 2. `./midi-annotate.toml` (local override, replaced by `--config`)
//! 3. Environment variables (`MIDI_ANNOTATE_*`)
//!
//! Tables are merged key by key, so a local file only needs the values it
//! changes.

use midi_annotate::{ConversionOptions, RhythmRule};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const ENV_MAX_VOICES: &str = "MIDI_ANNOTATE_MAX_VOICES";
pub const ENV_DISABLE_CHORDS: &str = "MIDI_ANNOTATE_DISABLE_CHORDS";
pub const ENV_ORPHAN_THRESHOLD: &str = "MIDI_ANNOTATE_ORPHAN_THRESHOLD";
pub const ENV_PRIMARY: &str = "MIDI_ANNOTATE_PRIMARY";
pub const ENV_SECONDARY: &str = "MIDI_ANNOTATE_SECONDARY";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("midi-annotate/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
        warn!(path = %path.display(), "config override not found, ignoring");
    }

    let local = PathBuf::from("midi-annotate.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load options from a single TOML file.
pub fn load_from_file(path: &Path) -> Result<ConversionOptions, ConfigError> {
    let table = read_table(path)?;
    into_options(table, path)
}

/// Load options from every discovered file, then apply env overrides.
pub fn load_with_sources_from(
    config_path: Option<&Path>,
) -> Result<(ConversionOptions, ConfigSources), ConfigError> {
    let mut sources = ConfigSources::default();
    let mut merged = toml::Table::new();

    for path in discover_config_files_with_override(config_path) {
        let table = read_table(&path)?;
        // Reject a bad file by name before it disappears into the merge.
        into_options(table.clone(), &path)?;
        merge_tables(&mut merged, table);
        debug!(path = %path.display(), "loaded config file");
        sources.files.push(path);
    }

    let mut options = into_options(merged, Path::new("<merged>"))?;
    apply_env_overrides(&mut options, &mut sources);

    Ok((options, sources))
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn into_options(table: toml::Table, path: &Path) -> Result<ConversionOptions, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, recursing into nested tables.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge_tables(existing, nested);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides to options.
pub fn apply_env_overrides(options: &mut ConversionOptions, sources: &mut ConfigSources) {
    apply_overrides_from(options, sources, |key| env::var(key).ok());
}

/// Apply overrides from any key lookup. Unparseable values are skipped.
pub fn apply_overrides_from(
    options: &mut ConversionOptions,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup(ENV_MAX_VOICES) {
        match v.parse::<usize>() {
            Ok(0) => {
                options.voice_separation.max_voices = None;
                sources.env_overrides.push(ENV_MAX_VOICES.to_string());
            }
            Ok(max) => {
                options.voice_separation.max_voices = Some(max);
                sources.env_overrides.push(ENV_MAX_VOICES.to_string());
            }
            Err(_) => warn!(var = ENV_MAX_VOICES, value = %v, "ignoring invalid value"),
        }
    }

    if let Some(v) = lookup(ENV_DISABLE_CHORDS) {
        match parse_bool(&v) {
            Some(disable) => {
                options.voice_separation.disable_chords = disable;
                sources.env_overrides.push(ENV_DISABLE_CHORDS.to_string());
            }
            None => warn!(var = ENV_DISABLE_CHORDS, value = %v, "ignoring invalid value"),
        }
    }

    if let Some(v) = lookup(ENV_ORPHAN_THRESHOLD) {
        match v.parse::<f64>() {
            Ok(threshold) if threshold.is_finite() => {
                options.voice_separation.orphan_cost_threshold = threshold;
                sources.env_overrides.push(ENV_ORPHAN_THRESHOLD.to_string());
            }
            _ => warn!(var = ENV_ORPHAN_THRESHOLD, value = %v, "ignoring invalid value"),
        }
    }

    for (var, slot) in [
        (ENV_PRIMARY, &mut options.primary_rhythm),
        (ENV_SECONDARY, &mut options.secondary_rhythm),
    ] {
        if let Some(v) = lookup(var) {
            match v.parse::<RhythmRule>() {
                Ok(rule) => {
                    *slot = rule;
                    sources.env_overrides.push(var.to_string());
                }
                Err(e) => warn!(var, value = %v, error = %e, "ignoring invalid value"),
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Serialize options to a TOML string.
pub fn to_toml(options: &ConversionOptions) -> Result<String, ConfigError> {
    let body = toml::to_string_pretty(options)?;
    Ok(format!("# midi-annotate configuration\n\n{body}"))
}
