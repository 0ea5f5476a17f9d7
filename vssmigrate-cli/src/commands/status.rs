use crate::config::Settings;
use anyhow::Result;
use colored::Colorize;
use vssmigrate_core::TaskQueue;

pub fn run(settings: &Settings) -> Result<()> {
    let background = TaskQueue::new("background");
    let cursor = super::lookup_cursor(&background, settings.wrapper()?)?;
    background.wait_idle();

    if super::report_errors(&background) > 0 {
        anyhow::bail!("Failed to read the target repository");
    }

    println!("{}", "Target Repository".bold().cyan());
    println!("  {}: {}", "Directory".bold(), settings.out_directory.display());
    println!("  {}: {:?}", "Kind".bold(), settings.vcs);
    println!();

    match cursor.try_recv().ok().flatten() {
        Some(last) => {
            println!(
                "  {}: {}",
                "Last commit".bold(),
                last.format("%Y-%m-%d %H:%M:%S UTC").to_string().green()
            );
            println!();
            println!(
                "Run {} to resume after this commit",
                "vssmigrate convert".cyan()
            );
        }
        None => {
            println!("{}", "No commits yet; a conversion starts from scratch".yellow());
        }
    }

    Ok(())
}
