use crate::config::Settings;
use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{info, warn};
use vssmigrate_core::{EmailMap, TaskQueue};
use vssmigrate_vcs::VcsExporter;

pub async fn run(settings: &Settings, assume_yes: bool) -> Result<()> {
    let out = &settings.out_directory;
    if settings.reset_repo && out.exists() && !assume_yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete everything in {} and start over?", out.display()))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Conversion cancelled".yellow());
            return Ok(());
        }
    }

    let builder = settings.changeset_builder()?;
    let history = super::open_history(settings)?;
    let emails = EmailMap::load_or_default(&settings.emails_file);

    println!("{}", "Converting history...".bold().cyan());
    println!("  {}: {}", "History".bold(), settings.history.display());
    println!("  {}: {}", "Target".bold(), out.display());
    println!("  {}: {:?}", "Kind".bold(), settings.vcs);
    println!();

    let work = TaskQueue::new("work");
    let background = TaskQueue::new("background");

    let changesets = builder.build_changesets(&work, history)?;
    let cursor = if settings.reset_repo {
        None
    } else {
        Some(super::lookup_cursor(&background, settings.wrapper()?)?)
    };

    let spinner = spinner();
    let interrupted = drive(&[&work, &background], &spinner).await;
    spinner.finish_and_clear();

    let failures = super::report_errors(&work) + super::report_errors(&background);
    if interrupted {
        anyhow::bail!("Conversion interrupted");
    }
    if failures > 0 {
        anyhow::bail!("Failed to prepare the conversion");
    }

    let resume_after = cursor.and_then(|rx| rx.try_recv().ok()).flatten();
    println!(
        "  {}: {}",
        "Changesets".bold(),
        changesets.len().to_string().cyan()
    );
    if let Some(last) = resume_after {
        println!(
            "  {}: {}",
            "Resuming after".bold(),
            last.format("%Y-%m-%d %H:%M:%S UTC").to_string().yellow()
        );
    }
    println!();

    let exporter = VcsExporter::new(
        settings.wrapper()?,
        Box::new(super::open_history(settings)?),
        emails,
        settings.export_options(resume_after),
    );
    let stats = exporter.export_to_vcs(&work, changesets)?;

    let spinner = self::spinner();
    let interrupted = drive(&[&work], &spinner).await;
    spinner.finish_and_clear();

    if super::report_errors(&work) > 0 {
        anyhow::bail!("Conversion failed");
    }
    if interrupted {
        anyhow::bail!("Conversion interrupted");
    }

    let Ok(stats) = stats.try_recv() else {
        anyhow::bail!("Conversion finished without a result");
    };
    info!(elapsed_ms = work.active_time().as_millis() as u64, "Conversion complete");

    println!("{}", "✓ Conversion complete".green().bold());
    println!("  {}: {}", "Committed".bold(), stats.committed.to_string().cyan());
    println!("  {}: {}", "Tagged".bold(), stats.tagged);
    if stats.skipped > 0 {
        println!("  {}: {}", "Already converted".bold(), stats.skipped);
    }
    if stats.failed > 0 {
        println!(
            "  {}: {}",
            "Skipped after errors".bold(),
            stats.failed.to_string().red()
        );
    }
    println!(
        "  {}: {:.1}s",
        "Elapsed".bold(),
        (work.active_time() + background.active_time()).as_secs_f64()
    );

    Ok(())
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Polls until every queue is idle, showing the first queue's status.
/// Ctrl-C aborts all queues; the step in progress is allowed to finish.
/// Returns whether the run was interrupted.
async fn drive(queues: &[&TaskQueue], spinner: &ProgressBar) -> bool {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut listening = true;
    let mut interrupted = false;

    loop {
        if queues.iter().all(|q| q.is_idle()) {
            return interrupted;
        }
        tokio::select! {
            result = &mut ctrl_c, if listening => {
                listening = false;
                match result {
                    Ok(()) => {
                        interrupted = true;
                        for queue in queues {
                            queue.abort();
                        }
                        spinner.set_message("Aborting after the current step...");
                    }
                    Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                if !interrupted {
                    if let Some(status) = queues.first().and_then(|q| q.last_status()) {
                        spinner.set_message(status);
                    }
                }
            }
        }
    }
}
