//! Bridge from `dezero_config::Config` to runtime types.

use std::str::FromStr;

use dezero_config::Config;
use dezero_telemetry::{LogConfig, LogFormat};

/// Convert the logging section to a [`LogConfig`]. Output goes to stderr so
/// stdout stays free for command responses.
pub(crate) fn to_log_config(cfg: &Config) -> LogConfig {
    let format = LogFormat::from_str(&cfg.logging.format).unwrap_or_default();
    LogConfig::new(&cfg.logging.level)
        .with_format(format)
        .with_directives(cfg.logging.directives.iter().cloned())
}

#[cfg(test)]
mod tests {
    use dezero_telemetry::LogTarget;

    use super::*;

    #[test]
    fn test_log_config_from_defaults() {
        let log = to_log_config(&Config::default());
        assert_eq!(log.level, "info");
        assert_eq!(log.format, LogFormat::Compact);
        assert_eq!(log.target, LogTarget::Stderr);
    }

    #[test]
    fn test_log_config_carries_directives() {
        let mut cfg = Config::default();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["dezero_payload=trace".into()];

        let log = to_log_config(&cfg);
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["dezero_payload=trace".to_string()]);
    }
}
