//! Deep merge of TOML value trees with per-field source tracking.
//!
//! The merge works on raw [`toml::Value`] trees rather than deserialized
//! structs, so a key missing from an overlay never overrides the base.

use std::collections::BTreeMap;
use std::fmt;

/// Which configuration layer a value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayer {
    /// Compiled-in defaults (`defaults.toml`).
    Defaults,
    /// A config file, by path.
    File(String),
    /// A `DEZERO_*` environment variable, by name.
    Environment(&'static str),
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::File(path) => write!(f, "file ({path})"),
            Self::Environment(var) => write!(f, "environment ({var})"),
        }
    }
}

/// Tracks which layer set each dotted field path.
pub type FieldSources = BTreeMap<String, ConfigLayer>;

/// Deep-merge `overlay` into `base`, recording which layer set each leaf.
///
/// Tables merge per key. Scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: &ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let path = join(prefix, key);
                if let Some(base_val) = base_table.get_mut(key) {
                    if overlay_val.is_table() {
                        deep_merge_tracking(base_val, overlay_val, &path, layer, sources);
                    } else {
                        *base_val = overlay_val.clone();
                        sources.insert(path, layer.clone());
                    }
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                    record_leaves(overlay_val, &path, layer, sources);
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
            sources.insert(prefix.to_owned(), layer.clone());
        },
    }
}

/// Record every leaf under `val` as set by `layer`.
pub fn record_leaves(
    val: &toml::Value,
    prefix: &str,
    layer: &ConfigLayer,
    sources: &mut FieldSources,
) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            record_leaves(child, &join(prefix, key), layer, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), layer.clone());
    }
}

/// Set the value at a dotted `path`, creating intermediate tables.
pub fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let toml::Value::Table(table) = current else {
            return;
        };
        if parts.peek().is_none() {
            table.insert(part.to_owned(), value);
            return;
        }
        current = table
            .entry(part.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_overlay_replaces_scalars_and_keeps_siblings() {
        let mut base = parse("[runtime]\ntick_interval_ms = 1000\nmax_payloads = 32\n");
        let overlay = parse("[runtime]\nmax_payloads = 4\n");
        let mut sources = FieldSources::new();
        let layer = ConfigLayer::File("dev.toml".into());

        deep_merge_tracking(&mut base, &overlay, "", &layer, &mut sources);

        assert_eq!(base["runtime"]["max_payloads"].as_integer(), Some(4));
        assert_eq!(base["runtime"]["tick_interval_ms"].as_integer(), Some(1000));
        assert_eq!(sources.get("runtime.max_payloads"), Some(&layer));
        assert!(!sources.contains_key("runtime.tick_interval_ms"));
    }

    #[test]
    fn test_arrays_are_replaced_not_appended() {
        let mut base = parse("[policy]\ngranted = [\"wifi_scan\", \"ble_scan\"]\n");
        let overlay = parse("[policy]\ngranted = [\"network\"]\n");
        let mut sources = FieldSources::new();

        deep_merge_tracking(&mut base, &overlay, "", &ConfigLayer::Defaults, &mut sources);

        let granted = base["policy"]["granted"].as_array().unwrap();
        assert_eq!(granted.len(), 1);
        assert_eq!(granted[0].as_str(), Some("network"));
    }

    #[test]
    fn test_new_section_records_all_leaves() {
        let mut base = parse("[storage]\nroot = \"a\"\n");
        let overlay = parse("[logging]\nlevel = \"debug\"\nformat = \"json\"\n");
        let mut sources = FieldSources::new();
        let layer = ConfigLayer::File("x.toml".into());

        deep_merge_tracking(&mut base, &overlay, "", &layer, &mut sources);

        assert_eq!(sources.get("logging.level"), Some(&layer));
        assert_eq!(sources.get("logging.format"), Some(&layer));
    }

    #[test]
    fn test_set_path_creates_tables() {
        let mut root = toml::Value::Table(toml::map::Map::new());
        set_path(&mut root, "logging.level", toml::Value::String("warn".into()));
        assert_eq!(root["logging"]["level"].as_str(), Some("warn"));
    }
}
