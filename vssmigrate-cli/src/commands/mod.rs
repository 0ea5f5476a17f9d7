pub mod changesets;
pub mod convert;
pub mod import;
pub mod settings;
pub mod status;
pub mod users;

use crate::config::Settings;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use std::sync::mpsc::{self, Receiver};
use vssmigrate_core::{Storage, TaskQueue};
use vssmigrate_vcs::VcsWrapper;

/// Opens the history database, which must already have been imported.
pub fn open_history(settings: &Settings) -> Result<Storage> {
    let path = &settings.history;
    if !path.exists() {
        anyhow::bail!(
            "History database {} not found. Run 'vssmigrate import <FILE>' first.",
            path.display()
        );
    }
    Storage::new(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Looks up the target repository's newest commit on `queue`.
pub fn lookup_cursor(
    queue: &TaskQueue,
    mut wrapper: Box<dyn VcsWrapper>,
) -> Result<Receiver<Option<DateTime<Utc>>>> {
    let (tx, rx) = mpsc::channel();
    queue.enqueue(move |ctx| {
        ctx.set_status("Reading last commit");
        let last = wrapper.last_commit()?;
        let _ = tx.send(last);
        Ok(())
    })?;
    Ok(rx)
}

/// Prints and counts the errors recorded on `queue`.
pub fn report_errors(queue: &TaskQueue) -> usize {
    let Some(errors) = queue.fetch_errors() else {
        return 0;
    };
    println!("{}", format!("Errors on the {} queue:", queue.name()).red().bold());
    for error in &errors {
        println!("  {} {}", "✗".red(), error);
    }
    errors.len()
}
