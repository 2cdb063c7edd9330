//! Environment variable fallbacks.
//!
//! A `LUMEN_*` variable only fills a field that no config file set. Values
//! are parsed into the field's TOML type before they enter the merged tree.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// TOML type an environment value is parsed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvKind {
    String,
    Bool,
}

/// One environment variable and the config field it feeds.
#[derive(Debug, Clone, Copy)]
struct EnvMapping {
    var: &'static str,
    section: &'static str,
    key: &'static str,
    kind: EnvKind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var: "LUMEN_BACKEND",
        section: "storage",
        key: "backend",
        kind: EnvKind::String,
    },
    EnvMapping {
        var: "LUMEN_DATA_DIR",
        section: "storage",
        key: "data_dir",
        kind: EnvKind::String,
    },
    EnvMapping {
        var: "LUMEN_BUNDLED",
        section: "storage",
        key: "bundled",
        kind: EnvKind::Bool,
    },
    EnvMapping {
        var: "LUMEN_LOG_LEVEL",
        section: "logging",
        key: "level",
        kind: EnvKind::String,
    },
];

/// Snapshot the `LUMEN_*` variables of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("LUMEN_"))
        .collect()
}

fn parse_bool(var: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::EnvError {
            var: var.to_owned(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Fill fields that only the defaults set from `env`.
///
/// Returns how many fields were filled.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a variable cannot be parsed.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied = 0usize;
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env.get(mapping.var) else {
            continue;
        };
        let path = format!("{}.{}", mapping.section, mapping.key);
        if matches!(
            sources.get(&path),
            Some(ConfigLayer::File | ConfigLayer::Environment)
        ) {
            continue;
        }

        let value = match mapping.kind {
            EnvKind::String => toml::Value::String(raw.clone()),
            EnvKind::Bool => toml::Value::Boolean(parse_bool(mapping.var, raw)?),
        };
        let Some(root) = merged.as_table_mut() else {
            continue;
        };
        let section = root
            .entry(mapping.section)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        if let Some(table) = section.as_table_mut() {
            table.insert(mapping.key.to_owned(), value);
            sources.insert(path, ConfigLayer::Environment);
            applied = applied.saturating_add(1);
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_env_fills_default_fields() {
        let mut merged: toml::Value = toml::from_str("[storage]\nbundled = false\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("storage.bundled".to_owned(), ConfigLayer::Defaults);

        let count = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("LUMEN_BUNDLED", "yes"), ("LUMEN_LOG_LEVEL", "debug")]),
        )
        .unwrap();

        assert_eq!(count, 2);
        assert_eq!(merged["storage"]["bundled"].as_bool(), Some(true));
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(
            sources.get("storage.bundled"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn test_file_wins_over_env() {
        let mut merged: toml::Value = toml::from_str("[storage]\nbackend = \"memory\"\n").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("storage.backend".to_owned(), ConfigLayer::File);

        let count = apply_env_fallbacks(
            &mut merged,
            &mut sources,
            &env(&[("LUMEN_BACKEND", "durable")]),
        )
        .unwrap();
        assert_eq!(count, 0);
        assert_eq!(merged["storage"]["backend"].as_str(), Some("memory"));
    }

    #[test]
    fn test_bad_bool_rejected() {
        let mut merged: toml::Value = toml::from_str("").unwrap();
        let err = apply_env_fallbacks(
            &mut merged,
            &mut FieldSources::new(),
            &env(&[("LUMEN_BUNDLED", "maybe")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { ref var, .. } if var == "LUMEN_BUNDLED"));
    }
}
