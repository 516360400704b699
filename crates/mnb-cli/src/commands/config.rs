//! Config command handlers

use anyhow::Result;

use mnb_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration with passwords redacted
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let config = config.redacted();

    match output.format {
        OutputFormat::Json => output.print_json(&config)?,
        OutputFormat::Human => print!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}
