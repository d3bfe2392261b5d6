//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the config file: the explicit path if given, otherwise
//!    `$DEZERO_HOME/config.toml`, otherwise `~/.dezero/config.toml`
//! 3. Apply `DEZERO_*` environment overrides
//! 4. Deserialize merged tree → `Config`
//! 5. Validate
//! 6. Return `ResolvedConfig`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves, set_path};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (64 KiB).
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

/// Environment variable naming the DeZero home directory.
pub const HOME_ENV: &str = "DEZERO_HOME";

/// Environment overrides and the dotted field each one sets.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DEZERO_LOG_LEVEL", "logging.level"),
    ("DEZERO_STORAGE_ROOT", "storage.root"),
];

/// Load the configuration with layered precedence.
///
/// `config_path` names an explicit config file, which must exist. Without
/// one, the user file under `home_override`, `$DEZERO_HOME` or
/// `~/.dezero` is merged if present.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a config file is unreadable or malformed,
/// or if the merged configuration fails validation.
pub fn load(config_path: Option<&Path>, home_override: Option<&Path>) -> ConfigResult<ResolvedConfig> {
    load_with_env(config_path, home_override, &collect_env_vars())
}

/// [`load`] with an explicit environment instead of the process one.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_with_env(
    config_path: Option<&Path>,
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", &ConfigLayer::Defaults, &mut field_sources);

    // 2. Config file.
    let file = match config_path {
        Some(path) => Some((read_file(path)?, path.to_path_buf())),
        None => {
            let path = user_config_path(home_override, env_vars)?;
            try_load_file(&path)?.map(|overlay| (overlay, path))
        },
    };
    if let Some((overlay, path)) = file {
        let layer = ConfigLayer::File(path.display().to_string());
        deep_merge_tracking(&mut merged, &overlay, "", &layer, &mut field_sources);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded config file");
    }

    // 3. Environment overrides.
    let env_count = apply_env_overrides(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment overrides");
    }

    // 4. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 5. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a single file merged over the defaults, without
/// environment overrides.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
/// validation.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    load_with_env(Some(path), None, &HashMap::new()).map(|resolved| resolved.config)
}

/// Collect the `DEZERO_*` variables from the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with("DEZERO_"))
        .collect()
}

fn apply_env_overrides(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String>,
) -> usize {
    let mut applied = 0_usize;
    for (var, field) in ENV_OVERRIDES {
        let Some(value) = env_vars.get(*var) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        set_path(merged, field, toml::Value::String(value.clone()));
        sources.insert((*field).to_owned(), ConfigLayer::Environment(var));
        applied = applied.saturating_add(1);
    }
    applied
}

fn user_config_path(
    home_override: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<PathBuf> {
    if let Some(home) = home_override {
        return Ok(home.join("config.toml"));
    }
    if let Some(home) = env_vars.get(HOME_ENV).filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home).join("config.toml"));
    }
    Ok(home_directory()?.join(".dezero").join("config.toml"))
}

/// Read and parse a file that must exist.
fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    match try_load_file(path)? {
        Some(value) => Ok(value),
        None => Err(ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        }),
    }
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

    let len = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if len > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {len} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit"
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PolicyMode;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_defaults_deserialize_to_default_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.runtime.tick_interval_ms, 1000);
        assert_eq!(config.policy.mode, PolicyMode::GrantList);
    }

    #[test]
    fn test_load_without_files() {
        let home = tempfile::tempdir().unwrap();
        let resolved = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources.get("runtime.max_payloads"),
            Some(&ConfigLayer::Defaults)
        );
    }

    #[test]
    fn test_home_file_merged() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(
            home.path().join("config.toml"),
            "[runtime]\ncpu_time_limit_ms = 5000\n[policy]\nmode = \"allow-all\"\n",
        )
        .unwrap();

        let resolved = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap();
        assert_eq!(resolved.config.runtime.cpu_time_limit_ms, 5000);
        assert_eq!(resolved.config.runtime.max_payloads, 32);
        assert_eq!(resolved.config.policy.mode, PolicyMode::AllowAll);
        assert_eq!(resolved.loaded_files.len(), 1);
    }

    #[test]
    fn test_dezero_home_env_is_used() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.toml"), "[runtime]\nmax_payloads = 3\n").unwrap();
        let vars = env(&[(HOME_ENV, home.path().to_str().unwrap())]);

        let resolved = load_with_env(None, None, &vars).unwrap();
        assert_eq!(resolved.config.runtime.max_payloads, 3);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dezero.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();
        let vars = env(&[
            ("DEZERO_LOG_LEVEL", "debug"),
            ("DEZERO_STORAGE_ROOT", "/tmp/flash"),
        ]);

        let resolved = load_with_env(Some(&path), None, &vars).unwrap();
        assert_eq!(resolved.config.logging.level, "debug");
        assert_eq!(resolved.config.storage.root, PathBuf::from("/tmp/flash"));
        assert_eq!(
            resolved.field_sources.get("logging.level"),
            Some(&ConfigLayer::Environment("DEZERO_LOG_LEVEL"))
        );
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let result = load_with_env(
            Some(Path::new("/nonexistent/dezero.toml")),
            None,
            &HashMap::new(),
        );
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_values_rejected_after_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[runtime]\ntick_interval_ms = 0\n").unwrap();
        assert!(matches!(
            load_file(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[runtime\n").unwrap();
        assert!(matches!(load_file(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(70_000) + "\"";
        std::fs::write(&path, data).unwrap();
        assert!(matches!(
            try_load_file(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
