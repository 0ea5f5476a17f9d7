use crate::config::Settings;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use vssmigrate_core::{import_jsonl, Storage};

pub fn run(settings: &Settings, file: &Path) -> Result<()> {
    let history = &settings.history;
    if let Some(parent) = history.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let storage = Storage::new(history)
        .with_context(|| format!("Failed to open {}", history.display()))?;
    let before = storage.revision_count()?;

    println!("{}", "Importing revision log...".bold());
    println!("  {}: {}", "Source".bold(), file.display());
    println!("  {}: {}", "History".bold(), history.display());
    println!();

    let stats = import_jsonl(&storage, file)
        .with_context(|| format!("Failed to import {}", file.display()))?;

    println!("{}", "✓ Import complete".green().bold());
    println!("  {}: {}", "Revisions".bold(), stats.revisions.to_string().cyan());
    println!("  {}: {}", "With content".bold(), stats.contents);
    println!("  {}: {}", "Items".bold(), storage.item_count()?);
    if before > 0 {
        println!(
            "  {}: {}",
            "Total revisions".bold(),
            storage.revision_count()?.to_string().yellow()
        );
    }

    Ok(())
}
