use crate::config::Settings;
use anyhow::Result;
use colored::Colorize;
use std::path::Path;

pub fn show(settings: &Settings) -> Result<()> {
    print!("{}", settings.to_toml()?);
    Ok(())
}

/// Writes the effective settings, including command line overrides.
pub fn save(settings: &Settings, path: &Path) -> Result<()> {
    settings.save(path)?;
    println!("{} {}", "✓ Settings saved to".green().bold(), path.display());
    Ok(())
}
