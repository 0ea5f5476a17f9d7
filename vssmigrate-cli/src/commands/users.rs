use crate::config::Settings;
use anyhow::{Context, Result};
use colored::Colorize;
use vssmigrate_core::EmailMap;

/// Adds an empty entry for every unmapped author so the file can be
/// completed by hand.
pub fn run(settings: &Settings) -> Result<()> {
    let storage = super::open_history(settings)?;
    let users = storage.users()?;

    let path = &settings.emails_file;
    let mut map = EmailMap::load_or_default(path);
    let added = map.add_unmapped(&users);

    if added == 0 {
        println!("{}", "All authors are already mapped".green());
        return Ok(());
    }

    map.save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!(
        "{} {}",
        "Added unmapped authors:".bold(),
        format!("({})", added).yellow()
    );
    println!("  {}: {}", "File".bold(), path.display());
    println!("  {}: {}", "Authors".bold(), users.len());
    println!();
    println!(
        "Fill in each entry as {} before converting",
        "user = Full Name <email>".cyan()
    );

    Ok(())
}
