//! `graphttl config`

use anyhow::{Context, Result};

use crate::settings::Settings;

pub fn run(settings: &Settings) -> Result<()> {
    let rendered = toml::to_string_pretty(settings).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}
