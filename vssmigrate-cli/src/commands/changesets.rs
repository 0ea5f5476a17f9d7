use crate::config::Settings;
use anyhow::Result;
use colored::Colorize;

pub fn run(settings: &Settings, limit: Option<usize>) -> Result<()> {
    let storage = super::open_history(settings)?;
    let builder = settings.changeset_builder()?;
    let changesets = builder.build_from(&storage)?;

    if changesets.is_empty() {
        println!("{}", "No revisions in history".yellow());
        return Ok(());
    }

    println!("{}", "Changesets".bold().cyan());
    println!();

    let to_show = limit.unwrap_or(changesets.len()).min(changesets.len());

    for (i, changeset) in changesets.iter().take(to_show).enumerate() {
        println!(
            "{} {}",
            "changeset".yellow().bold(),
            (i + 1).to_string().yellow()
        );
        println!("{}: {}", "Author".bold(), changeset.user);
        println!(
            "{}: {}",
            "Date".bold(),
            changeset.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(comment) = &changeset.comment {
            println!();
            for line in comment.lines() {
                println!("    {}", line);
            }
        }
        println!();

        for revision in changeset.revisions.iter().take(5) {
            let action = &revision.action;
            let detail = match (&action.secondary, &action.label) {
                (_, Some(label)) => format!(" \"{}\"", label),
                (Some(secondary), None) => format!(" -> {}", secondary),
                (None, None) => String::new(),
            };
            println!(
                "      {} {}{}",
                action.kind.to_string().cyan(),
                action.target.path,
                detail.dimmed()
            );
        }
        if changeset.len() > 5 {
            println!(
                "      {} and {} more...",
                "...".dimmed(),
                (changeset.len() - 5).to_string().dimmed()
            );
        }

        println!();
    }

    if changesets.len() > to_show {
        println!(
            "{}",
            format!("... and {} more changesets", changesets.len() - to_show).dimmed()
        );
        println!("Use {} to see more", "--limit N".cyan());
    }

    Ok(())
}
