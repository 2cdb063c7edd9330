//! Layered configuration loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the user config file, if one was given and exists
//! 3. Apply `LUMEN_*` env var fallbacks for fields no file set
//! 4. Deserialize merged tree → `Config`
//! 5. Resolve the default data directory
//! 6. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge, deep_merge_tracking};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration plus where each field came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Source layer of every leaf field.
    pub field_sources: FieldSources,
    /// Files that contributed, in load order.
    pub loaded_files: Vec<String>,
}

/// Load configuration using the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file or variable is malformed, or if the
/// merged configuration fails validation.
pub fn load(user_file: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(user_file, &collect_env_vars())
}

/// Load configuration with an explicit set of environment variables.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    user_file: Option<&Path>,
    env: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    let mut merged = parse_defaults()?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    crate::merge::record_defaults(&merged, &mut field_sources);

    if let Some(path) = user_file
        && let Some(overlay) = try_load_file(path)?
    {
        deep_merge_tracking(
            &mut merged,
            &overlay,
            "",
            &ConfigLayer::File,
            &mut field_sources,
        );
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded config file");
    }

    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    let config = finish(merged, "<merged config>")?;
    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Parse one TOML document layered over the defaults. No environment
/// variables are consulted.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] or [`ConfigError::ValidationError`].
pub fn from_toml_str(content: &str) -> ConfigResult<Config> {
    let mut merged = parse_defaults()?;
    let overlay: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: "<string>".to_owned(),
        source: e,
    })?;
    deep_merge(&mut merged, &overlay);
    finish(merged, "<string>")
}

/// Load a config from a specific file path layered over the defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, unreadable, malformed,
/// or fails validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let Some(overlay) = try_load_file(path)? else {
        return Err(ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    };
    let mut merged = parse_defaults()?;
    deep_merge(&mut merged, &overlay);
    finish(merged, &path.display().to_string())
}

fn parse_defaults() -> ConfigResult<toml::Value> {
    toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })
}

fn finish(merged: toml::Value, origin: &str) -> ConfigResult<Config> {
    let mut config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: origin.to_owned(),
                source: e,
            })?;
    if config.storage.data_dir.is_none() {
        config.storage.data_dir = default_data_dir();
    }
    validate::validate(&config)?;
    Ok(config)
}

/// Platform data directory for Lumen stores, if one can be determined.
#[must_use]
pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "lumen").map(|d| d.data_dir().to_path_buf())
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Backend;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config.storage.backend, Backend::Durable);
        assert!(!config.storage.bundled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_without_file() {
        let resolved = load_with_env(None, &HashMap::new()).unwrap();
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources.get("storage.backend"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumen.toml");
        std::fs::write(
            &path,
            "[storage]\nbackend = \"memory\"\n\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let resolved = load_with_env(
            Some(&path),
            &env(&[
                ("LUMEN_BACKEND", "durable"),
                ("LUMEN_BUNDLED", "true"),
                ("LUMEN_LOG_LEVEL", "trace"),
            ]),
        )
        .unwrap();

        let config = resolved.config;
        assert_eq!(config.storage.backend, Backend::Memory);
        assert!(config.storage.bundled);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(resolved.loaded_files, [path.display().to_string()]);
    }

    #[test]
    fn test_env_data_dir() {
        let resolved =
            load_with_env(None, &env(&[("LUMEN_DATA_DIR", "/var/lib/lumen")])).unwrap();
        assert_eq!(
            resolved.config.storage.data_dir.as_deref(),
            Some(Path::new("/var/lib/lumen"))
        );
    }

    #[test]
    fn test_missing_user_file_is_skipped() {
        let resolved =
            load_with_env(Some(Path::new("/nonexistent/lumen.toml")), &HashMap::new()).unwrap();
        assert!(resolved.loaded_files.is_empty());
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/lumen.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_from_toml_str_layers_over_defaults() {
        let config = from_toml_str("[storage]\nbundled = true\n").unwrap();
        assert!(config.storage.bundled);
        assert_eq!(config.storage.backend, Backend::Durable);
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_from_toml_str_rejects_bad_backend() {
        let err = from_toml_str("[storage]\nbackend = \"indexeddb\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }
}
