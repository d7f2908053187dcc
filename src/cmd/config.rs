//! Configuration view command — `cla-assistant config`.

use anyhow::{Context, Result};

use cla_assistant::config::ClaConfig;

/// Print the effective configuration (file + environment) as TOML.
pub fn cmd_config(config: &ClaConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{}", rendered.trim_end());

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!();
        for warning in warnings {
            println!("warning: {}", warning);
        }
    }
    Ok(())
}
