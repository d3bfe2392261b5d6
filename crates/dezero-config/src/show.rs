//! Resolved configuration display.

use std::fmt::Write as _;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::FieldSources;
use crate::types::Config;

/// Output format for [`ResolvedConfig::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowFormat {
    /// TOML, as it would appear in a config file.
    Toml,
    /// Pretty-printed JSON.
    Json,
    /// One `field = value  # source` line per leaf.
    Sources,
}

/// A loaded configuration together with where each value came from.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The final configuration.
    pub config: Config,
    /// Source layer of each dotted field path.
    pub field_sources: FieldSources,
    /// Config files that were merged, in order.
    pub loaded_files: Vec<String>,
}

impl ResolvedConfig {
    /// Render the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::RenderError`] if serialization fails.
    pub fn render(&self, format: ShowFormat) -> ConfigResult<String> {
        match format {
            ShowFormat::Toml => toml::to_string_pretty(&self.config)
                .map_err(|e| ConfigError::RenderError(e.to_string())),
            ShowFormat::Json => serde_json::to_string_pretty(&self.config)
                .map_err(|e| ConfigError::RenderError(e.to_string())),
            ShowFormat::Sources => self.render_sources(),
        }
    }

    fn render_sources(&self) -> ConfigResult<String> {
        let tree =
            toml::Value::try_from(&self.config).map_err(|e| ConfigError::RenderError(e.to_string()))?;
        let mut out = String::new();
        for (path, layer) in &self.field_sources {
            let value = lookup(&tree, path).map_or_else(|| "<unset>".to_owned(), ToString::to_string);
            let _ = writeln!(out, "{path} = {value}  # {layer}");
        }
        Ok(out)
    }
}

fn lookup<'a>(root: &'a toml::Value, path: &str) -> Option<&'a toml::Value> {
    path.split('.').try_fold(root, |node, key| node.get(key))
}
