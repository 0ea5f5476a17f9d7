use crate::error::{Error, Result};
use crate::models::Revision;
use crate::storage::Storage;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

/// One line of a JSON Lines revision log.
#[derive(Debug, Deserialize)]
struct RevisionRecord {
    #[serde(flatten)]
    revision: Revision,
    /// Inline file content.
    #[serde(default)]
    content: Option<String>,
    /// Content file, relative to the log file.
    #[serde(default)]
    content_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub revisions: usize,
    pub contents: usize,
}

/// Loads a revision log into `storage`. The whole file is parsed before
/// anything is written, so a malformed line leaves the store untouched.
pub fn import_jsonl<P: AsRef<Path>>(storage: &Storage, path: P) -> Result<ImportStats> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let stats = import_records(storage, BufReader::new(file), base)?;
    info!(
        path = %path.display(),
        revisions = stats.revisions,
        contents = stats.contents,
        "Imported revision log"
    );
    Ok(stats)
}

pub fn import_records<R: BufRead>(storage: &Storage, reader: R, base: &Path) -> Result<ImportStats> {
    let mut records = Vec::new();
    let mut stats = ImportStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: RevisionRecord = serde_json::from_str(line)
            .map_err(|e| Error::InvalidSource(format!("line {}: {}", line_no, e)))?;
        let content = match (record.content, record.content_file) {
            (Some(text), _) => Some(text.into_bytes()),
            (None, Some(file)) => {
                let full = base.join(&file);
                let data = std::fs::read(&full).map_err(|e| {
                    Error::InvalidSource(format!("line {}: {}: {}", line_no, full.display(), e))
                })?;
                Some(data)
            }
            (None, None) => None,
        };
        if content.is_some() {
            stats.contents += 1;
        }
        records.push((record.revision, content));
    }

    storage.insert_batch(&records)?;
    stats.revisions = records.len();
    Ok(stats)
}
