//! Configuration inspection.

use anyhow::{Result, bail};
use dezero_config::{ResolvedConfig, ShowFormat};

use crate::theme::Theme;

pub(crate) fn parse_format(name: &str) -> Result<ShowFormat> {
    Ok(match name {
        "toml" => ShowFormat::Toml,
        "json" => ShowFormat::Json,
        "sources" => ShowFormat::Sources,
        other => bail!("unknown format `{other}`, expected toml, json or sources"),
    })
}

pub(crate) fn show_config(resolved: &ResolvedConfig, format: &str) -> Result<()> {
    let format = parse_format(format)?;
    if resolved.loaded_files.is_empty() {
        eprintln!("{}", Theme::dimmed("# no config file found, using defaults"));
    } else {
        for file in &resolved.loaded_files {
            eprintln!("{}", Theme::dimmed(&format!("# loaded {file}")));
        }
    }
    print!("{}", resolved.render(format)?);
    Ok(())
}

/// Loading already validated the configuration; report what was checked.
pub(crate) fn validate_config(resolved: &ResolvedConfig) {
    let sources = if resolved.loaded_files.is_empty() {
        "defaults".to_string()
    } else {
        resolved.loaded_files.join(", ")
    };
    println!(
        "{}",
        Theme::success(&format!("Configuration is valid ({sources})"))
    );
}
