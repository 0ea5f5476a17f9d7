use crate::wrapper::VcsWrapper;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::time::Instant;
use tracing::{debug, info, warn};
use vssmigrate_core::{
    ActionType, Changeset, ChangesetList, CommentBuilder, ContentSource, EmailMap, Error, Identity,
    Item, Result, Revision, TaskContext, TaskQueue,
};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub email_domain: String,
    pub default_comment: String,
    pub try_generate_comment: bool,
    pub ignore_errors: bool,
    pub reset_repo: bool,
    /// Prefix stripped from every source path, e.g. `$/Product`.
    pub remove_path: Option<String>,
    pub folder_before_label: bool,
    pub resume_after: Option<DateTime<Utc>>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            email_domain: "localhost".to_string(),
            default_comment: String::new(),
            try_generate_comment: true,
            ignore_errors: false,
            reset_repo: false,
            remove_path: None,
            folder_before_label: false,
            resume_after: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub committed: usize,
    /// Changesets at or before the resume cursor.
    pub skipped: usize,
    pub failed: usize,
    pub tagged: usize,
}

struct PendingTag {
    name: String,
    tagger: Identity,
    comment: String,
}

/// Replays changesets against a [`VcsWrapper`].
pub struct VcsExporter {
    wrapper: Box<dyn VcsWrapper>,
    contents: Box<dyn ContentSource>,
    emails: EmailMap,
    options: ExportOptions,
}

impl VcsExporter {
    pub fn new(
        wrapper: Box<dyn VcsWrapper>,
        contents: Box<dyn ContentSource>,
        emails: EmailMap,
        options: ExportOptions,
    ) -> Self {
        Self {
            wrapper,
            contents,
            emails,
            options,
        }
    }

    /// Exports every changeset in order. Stops between changesets when the
    /// task is aborted.
    pub fn export(&mut self, changesets: &[Changeset], ctx: &TaskContext) -> Result<ExportStats> {
        let started = Instant::now();
        let mut stats = ExportStats::default();

        if self.options.reset_repo {
            self.wrapper.init(true)?;
            self.wrapper.configure(true)?;
            if let Some(first) = changesets.first() {
                self.wrapper.bootstrap(first.timestamp - Duration::seconds(1))?;
            }
        } else {
            self.wrapper.init(false)?;
            self.wrapper.configure(false)?;
        }

        let total = changesets.len();
        for (i, changeset) in changesets.iter().enumerate() {
            if ctx.is_aborting() {
                warn!(changeset = i, "Export aborted");
                return Err(Error::Aborted);
            }
            if let Some(cursor) = self.options.resume_after {
                if changeset.timestamp <= cursor {
                    stats.skipped += 1;
                    continue;
                }
            }
            ctx.set_status(format!("Exporting changeset {} of {}", i + 1, total));

            match self.replay(changeset) {
                Ok((committed, tags)) => {
                    if committed {
                        stats.committed += 1;
                    }
                    stats.tagged += tags;
                }
                Err(e) if self.options.ignore_errors => {
                    warn!(
                        changeset = i,
                        user = %changeset.user,
                        timestamp = %changeset.timestamp,
                        error = %e,
                        "Skipping failed changeset"
                    );
                    self.wrapper.discard_pending()?;
                    stats.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            committed = stats.committed,
            skipped = stats.skipped,
            failed = stats.failed,
            tagged = stats.tagged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Export finished"
        );
        Ok(stats)
    }

    /// Enqueues the whole export as one work item. The statistics are sent
    /// on the returned channel once it succeeds.
    pub fn export_to_vcs(
        mut self,
        queue: &TaskQueue,
        changesets: ChangesetList,
    ) -> Result<Receiver<ExportStats>> {
        let (tx, rx) = mpsc::channel();
        queue.enqueue(move |ctx| {
            let snapshot = changesets.snapshot();
            let stats = self.export(&snapshot, ctx)?;
            // the receiver may have been dropped
            let _ = tx.send(stats);
            Ok(())
        })?;
        Ok(rx)
    }

    fn replay(&mut self, changeset: &Changeset) -> Result<(bool, usize)> {
        let mut tags = Vec::new();
        for revision in &changeset.revisions {
            self.apply(revision, &mut tags)?;
        }

        let committed = if self.wrapper.needs_commit()? {
            let author = self
                .emails
                .resolve(&changeset.user, &self.options.email_domain);
            let comment = self.comment_for(changeset);
            self.wrapper.commit(&author, &comment, changeset.timestamp)?
        } else {
            false
        };

        let tagged = tags.len();
        for tag in tags {
            debug!(tag = %tag.name, "Tagging");
            self.wrapper
                .tag(&tag.name, &tag.tagger, &tag.comment, changeset.timestamp)?;
        }
        Ok((committed, tagged))
    }

    fn apply(&mut self, revision: &Revision, tags: &mut Vec<PendingTag>) -> Result<()> {
        let action = &revision.action;
        let target = &action.target;
        debug!(action = %action.kind, path = %target.path, "Applying");

        match action.kind {
            ActionType::Label => {
                if let Some(label) = action.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                    tags.push(PendingTag {
                        name: self.tag_name(target, label),
                        tagger: self.emails.resolve(&revision.user, &self.options.email_domain),
                        comment: revision.trimmed_comment().unwrap_or_default().to_string(),
                    });
                }
            }
            ActionType::Add | ActionType::Recover | ActionType::Restore | ActionType::Share => {
                let path = self.local_path(&target.path)?;
                if target.is_project {
                    fs::create_dir_all(&path)?;
                    self.wrapper.add_dir(&path)?;
                } else {
                    self.write_file(revision, &path, true)?;
                    self.wrapper.add(&path)?;
                }
            }
            ActionType::Edit => {
                let path = self.local_path(&target.path)?;
                if self.write_file(revision, &path, false)? {
                    self.wrapper.add(&path)?;
                }
            }
            ActionType::Delete | ActionType::Destroy => {
                let path = self.local_path(&target.path)?;
                if !path.exists() {
                    warn!(path = %path.display(), "Removed path not in working tree");
                } else if target.is_project {
                    self.wrapper.remove_dir(&path, true)?;
                } else {
                    self.wrapper.remove_file(&path)?;
                }
            }
            ActionType::Rename | ActionType::MoveTo => {
                let Some(secondary) = action.secondary.as_deref() else {
                    warn!(path = %target.path, "Move without destination");
                    return Ok(());
                };
                let src = self.local_path(&target.path)?;
                let dst = self.local_path(secondary)?;
                if src == dst {
                    return Ok(());
                }
                if !src.exists() {
                    warn!(path = %src.display(), "Moved path not in working tree");
                } else if target.is_project && is_empty_dir(&src)? {
                    self.wrapper.move_empty_dir(&src, &dst)?;
                } else {
                    self.wrapper.move_path(&src, &dst)?;
                }
            }
            ActionType::MoveFrom | ActionType::Branch => {}
        }
        Ok(())
    }

    /// Writes the revision's content. Returns whether the file changed.
    fn write_file(&self, revision: &Revision, path: &Path, create_empty: bool) -> Result<bool> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match self.contents.file_content(revision)? {
            Some(data) => {
                fs::write(path, data)?;
                Ok(true)
            }
            None if create_empty => {
                if !path.exists() {
                    fs::write(path, b"")?;
                }
                Ok(true)
            }
            None => {
                warn!(path = %path.display(), version = revision.version, "No content for revision");
                Ok(false)
            }
        }
    }

    fn comment_for(&self, changeset: &Changeset) -> String {
        if let Some(comment) = changeset.comment.as_deref().filter(|c| !c.trim().is_empty()) {
            return comment.to_string();
        }
        if self.options.try_generate_comment {
            if let Some(generated) = CommentBuilder::comment_for(Some(changeset)) {
                return generated;
            }
        }
        self.options.default_comment.clone()
    }

    fn tag_name(&self, target: &Item, label: &str) -> String {
        if !self.options.folder_before_label {
            return label.to_string();
        }
        let components: Vec<&str> = source_components(&target.path).collect();
        let folder = if target.is_project {
            components.last()
        } else {
            components.len().checked_sub(2).and_then(|i| components.get(i))
        };
        match folder {
            Some(folder) => format!("{}/{}", folder, label),
            None => label.to_string(),
        }
    }

    /// Maps a source path such as `$/Product/src/main.c` into the working
    /// tree, after stripping the configured prefix.
    pub fn local_path(&self, source: &str) -> Result<PathBuf> {
        let mut rest = source;
        if let Some(prefix) = self.options.remove_path.as_deref().filter(|p| !p.is_empty()) {
            rest = strip_source_prefix(rest, prefix).unwrap_or(rest);
        }

        let mut path = self.wrapper.work_dir().to_path_buf();
        for part in source_components(rest) {
            if part == ".." || part == "." {
                return Err(Error::InvalidPath(source.to_string()));
            }
            path.push(part);
        }
        Ok(path)
    }
}

fn source_components(path: &str) -> impl Iterator<Item = &str> {
    path.trim_start_matches('$')
        .split(['/', '\\'])
        .filter(|p| !p.is_empty())
}

/// Case-insensitive prefix match on a component boundary.
fn strip_source_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches(['/', '\\']);
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = &path[prefix.len()..];
    if rest.is_empty() || rest.starts_with(['/', '\\']) {
        Some(rest)
    } else {
        None
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(path.is_dir() && fs::read_dir(path)?.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime, TimeZone};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use crate::git::{GitWrapper, GIT_META_DIR};
    use crate::wrapper::testing::FakeRunner;
    use vssmigrate_core::{Action, ChangesetBuilder, MemorySource, SourceZone};

    /// Records capability calls with paths relative to the work dir.
    struct RecordingWrapper {
        work_dir: PathBuf,
        calls: Arc<Mutex<Vec<String>>>,
        pending: bool,
        fail_on: Option<String>,
        abort_on_commit: Option<TaskQueue>,
    }

    impl RecordingWrapper {
        fn new(work_dir: &Path) -> (Self, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    work_dir: work_dir.to_path_buf(),
                    calls: Arc::clone(&calls),
                    pending: false,
                    fail_on: None,
                    abort_on_commit: None,
                },
                calls,
            )
        }

        fn record(&mut self, call: String) -> Result<()> {
            if let Some(needle) = &self.fail_on {
                if call.contains(needle.as_str()) {
                    return Err(Error::Command {
                        command: call,
                        code: 1,
                        stderr: "rejected".to_string(),
                    });
                }
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn rel(&self, path: &Path) -> String {
            path.strip_prefix(&self.work_dir)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        }
    }

    impl VcsWrapper for RecordingWrapper {
        fn work_dir(&self) -> &Path {
            &self.work_dir
        }

        fn init(&mut self, reset: bool) -> Result<()> {
            self.record(format!("init {}", reset))
        }

        fn configure(&mut self, new_repo: bool) -> Result<()> {
            self.record(format!("configure {}", new_repo))
        }

        fn bootstrap(&mut self, when: DateTime<Utc>) -> Result<()> {
            self.record(format!("bootstrap {}", when.format("%H:%M:%S")))
        }

        fn add(&mut self, path: &Path) -> Result<()> {
            self.pending = true;
            let call = format!("add {}", self.rel(path));
            self.record(call)
        }

        fn add_dir(&mut self, path: &Path) -> Result<()> {
            self.pending = true;
            let call = format!("add_dir {}", self.rel(path));
            self.record(call)
        }

        fn remove_file(&mut self, path: &Path) -> Result<()> {
            self.pending = true;
            fs::remove_file(path)?;
            let call = format!("remove_file {}", self.rel(path));
            self.record(call)
        }

        fn remove_dir(&mut self, path: &Path, recursive: bool) -> Result<()> {
            self.pending = true;
            fs::remove_dir_all(path)?;
            let call = format!("remove_dir {} {}", self.rel(path), recursive);
            self.record(call)
        }

        fn move_path(&mut self, src: &Path, dst: &Path) -> Result<()> {
            self.pending = true;
            fs::rename(src, dst)?;
            let call = format!("move {} {}", self.rel(src), self.rel(dst));
            self.record(call)
        }

        fn move_empty_dir(&mut self, src: &Path, dst: &Path) -> Result<()> {
            fs::rename(src, dst)?;
            let call = format!("move_empty_dir {} {}", self.rel(src), self.rel(dst));
            self.record(call)
        }

        fn needs_commit(&mut self) -> Result<bool> {
            Ok(self.pending)
        }

        fn commit(&mut self, author: &Identity, comment: &str, when: DateTime<Utc>) -> Result<bool> {
            self.pending = false;
            self.record(format!("commit {} [{}] {}", author, comment, when.format("%H:%M:%S")))?;
            if let Some(queue) = &self.abort_on_commit {
                queue.abort();
            }
            Ok(true)
        }

        fn discard_pending(&mut self) -> Result<()> {
            self.pending = false;
            self.record("discard".to_string())
        }

        fn tag(&mut self, name: &str, tagger: &Identity, comment: &str, when: DateTime<Utc>) -> Result<()> {
            self.record(format!("tag {} {} [{}] {}", name, tagger.name, comment, when.format("%H:%M:%S")))
        }

        fn last_commit(&mut self) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    fn at(seconds: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2002, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + Duration::seconds(seconds)
    }

    fn utc(seconds: i64) -> DateTime<Utc> {
        Utc.from_utc_datetime(&at(seconds))
    }

    fn project() -> Item {
        Item::project("AAAA", "$/Product")
    }

    fn file(name: &str) -> Item {
        Item::file(name.to_uppercase(), format!("$/Product/{}", name))
    }

    fn history() -> MemorySource {
        let mut source = MemorySource::new();
        source.push_with_content(
            Revision::new(at(0), "amy", project(), Action::new(ActionType::Add, file("a.txt")))
                .with_comment("initial"),
            "alpha",
        );
        source.push_with_content(
            Revision::new(at(2), "amy", project(), Action::new(ActionType::Add, file("b.txt")))
                .with_version(2)
                .with_comment("initial"),
            "beta",
        );
        source.push_with_content(
            Revision::new(at(100), "rory", file("a.txt"), Action::new(ActionType::Edit, file("a.txt")))
                .with_version(2),
            "alpha 2",
        );
        source.push(
            Revision::new(
                at(200),
                "amy",
                project(),
                Action::new(ActionType::Rename, file("b.txt")).with_secondary("$/Product/c.txt"),
            )
            .with_version(3),
        );
        source.push(
            Revision::new(
                at(300),
                "amy",
                project(),
                Action::new(ActionType::Label, project()).with_label("Release 1"),
            )
            .with_version(4)
            .with_comment("ship it"),
        );
        source
    }

    fn changesets(source: &MemorySource) -> Vec<Changeset> {
        ChangesetBuilder::new()
            .with_zone(SourceZone::Utc)
            .build_from(source)
            .unwrap()
    }

    fn exporter(work: &Path, source: MemorySource, options: ExportOptions) -> (VcsExporter, Arc<Mutex<Vec<String>>>) {
        let (wrapper, calls) = RecordingWrapper::new(work);
        let mut emails = EmailMap::new();
        emails.insert("amy", "Amy Pond <amy@example.com>");
        let exporter = VcsExporter::new(Box::new(wrapper), Box::new(source), emails, options);
        (exporter, calls)
    }

    #[test]
    fn test_full_export_call_sequence() {
        let dir = TempDir::new().unwrap();
        let source = history();
        let list = changesets(&source);
        assert_eq!(list.len(), 4);
        let (mut exporter, calls) = exporter(dir.path(), source, ExportOptions::default());

        let stats = exporter.export(&list, &TaskContext::detached()).unwrap();

        assert_eq!(
            stats,
            ExportStats {
                committed: 3,
                skipped: 0,
                failed: 0,
                tagged: 1
            }
        );
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "init false",
                "configure false",
                "add Product/a.txt",
                "add Product/b.txt",
                "commit Amy Pond <amy@example.com> [initial] 12:00:00",
                "add Product/a.txt",
                "commit rory <rory@localhost> [] 12:01:40",
                "move Product/b.txt Product/c.txt",
                "commit Amy Pond <amy@example.com> [Rename] 12:03:20",
                "tag Release 1 Amy Pond [ship it] 12:05:00",
            ]
        );
        assert_eq!(fs::read_to_string(dir.path().join("Product/a.txt")).unwrap(), "alpha 2");
        assert!(dir.path().join("Product/c.txt").exists());
    }

    #[test]
    fn test_resume_matches_from_scratch_suffix() {
        let source = history();
        let list = changesets(&source);

        for k in 0..list.len() {
            // from-scratch run over the whole history up to k, then a resumed run
            let resumed_dir = TempDir::new().unwrap();
            let (mut first, _) = exporter(resumed_dir.path(), history(), ExportOptions::default());
            first.export(&list[..=k], &TaskContext::detached()).unwrap();

            let options = ExportOptions {
                resume_after: Some(list[k].timestamp),
                ..Default::default()
            };
            let (mut resumed, resumed_calls) = exporter(resumed_dir.path(), history(), options);
            let stats = resumed.export(&list, &TaskContext::detached()).unwrap();
            assert_eq!(stats.skipped, k + 1);

            let scratch_dir = TempDir::new().unwrap();
            let (mut warmup, _) = exporter(scratch_dir.path(), history(), ExportOptions::default());
            warmup.export(&list[..=k], &TaskContext::detached()).unwrap();
            let (mut scratch, scratch_calls) =
                exporter(scratch_dir.path(), history(), ExportOptions::default());
            scratch.export(&list[k + 1..], &TaskContext::detached()).unwrap();

            assert_eq!(*resumed_calls.lock().unwrap(), *scratch_calls.lock().unwrap());
        }
    }

    #[test]
    fn test_reset_bootstraps_before_first_changeset() {
        let dir = TempDir::new().unwrap();
        let source = history();
        let list = changesets(&source);
        let options = ExportOptions {
            reset_repo: true,
            ..Default::default()
        };
        let (mut exporter, calls) = exporter(dir.path(), source, options);

        exporter.export(&list[..1], &TaskContext::detached()).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(&calls[..3], &["init true", "configure true", "bootstrap 11:59:59"]);
    }

    #[test]
    fn test_ignore_errors_skips_failing_changeset() {
        let dir = TempDir::new().unwrap();
        let source = history();
        let list = changesets(&source);

        let (mut wrapper, calls) = RecordingWrapper::new(dir.path());
        wrapper.fail_on = Some("rory".to_string());
        let options = ExportOptions {
            ignore_errors: true,
            ..Default::default()
        };
        let mut exporter = VcsExporter::new(Box::new(wrapper), Box::new(source), EmailMap::new(), options);

        let stats = exporter.export(&list, &TaskContext::detached()).unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.committed, 2);
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"discard".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("tag Release 1")));
    }

    #[test]
    fn test_failed_changeset_batches_stay_out_of_next_commit() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(GIT_META_DIR)).unwrap();
        let mut source = MemorySource::new();
        source.push(Revision::new(at(0), "bob", project(), Action::new(ActionType::Add, file("x.txt"))));
        source.push(
            Revision::new(
                at(1),
                "bob",
                project(),
                Action::new(ActionType::Add, Item::file("BAD", "$/Product/../bad.txt")),
            )
            .with_version(2),
        );
        source.push(
            Revision::new(at(100), "carol", project(), Action::new(ActionType::Add, file("y.txt")))
                .with_version(3),
        );
        let list = changesets(&source);
        assert_eq!(list.len(), 2);

        let (runner, log) = FakeRunner::ok();
        let git = GitWrapper::new(dir.path()).with_runner(Box::new(runner));
        let options = ExportOptions {
            ignore_errors: true,
            ..Default::default()
        };
        let mut exporter = VcsExporter::new(Box::new(git), Box::new(source), EmailMap::new(), options);

        let stats = exporter.export(&list, &TaskContext::detached()).unwrap();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.failed, 1);

        let log = log.lock().unwrap();
        let args: Vec<Vec<&str>> = log
            .iter()
            .map(|i| i.args.iter().map(String::as_str).collect())
            .collect();
        let adds: Vec<&Vec<&str>> = args.iter().filter(|a| a[0] == "add").collect();
        assert_eq!(adds, vec![&vec!["add", "-f", "--", "Product/y.txt"]]);
        let reset = args.iter().position(|a| a[0] == "reset").unwrap();
        let commit = args.iter().position(|a| a[0] == "commit").unwrap();
        assert!(reset < commit);
        assert!(log[commit]
            .env
            .contains(&("GIT_AUTHOR_NAME".to_string(), "carol".to_string())));
    }

    #[test]
    fn test_sub_second_changeset_skipped_at_whole_second_cursor() {
        let dir = TempDir::new().unwrap();
        let mut source = MemorySource::new();
        source.push(Revision::new(
            at(0) + Duration::milliseconds(500),
            "amy",
            project(),
            Action::new(ActionType::Add, file("a.txt")),
        ));
        let list = changesets(&source);
        let options = ExportOptions {
            resume_after: Some(utc(0)),
            ..Default::default()
        };
        let (mut exporter, calls) = exporter(dir.path(), source, options);

        let stats = exporter.export(&list, &TaskContext::detached()).unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.committed, 0);
        assert_eq!(*calls.lock().unwrap(), vec!["init false", "configure false"]);
    }

    #[test]
    fn test_failure_aborts_without_ignore_mode() {
        let dir = TempDir::new().unwrap();
        let source = history();
        let list = changesets(&source);

        let (mut wrapper, calls) = RecordingWrapper::new(dir.path());
        wrapper.fail_on = Some("rory".to_string());
        let mut exporter =
            VcsExporter::new(Box::new(wrapper), Box::new(source), EmailMap::new(), ExportOptions::default());

        let err = exporter.export(&list, &TaskContext::detached()).unwrap_err();
        assert!(matches!(err, Error::Command { .. }));
        assert!(!calls.lock().unwrap().iter().any(|c| c.starts_with("move")));
    }

    #[test]
    fn test_comment_fallbacks() {
        let dir = TempDir::new().unwrap();
        let mut source = MemorySource::new();
        source.push(Revision::new(at(0), "amy", project(), Action::new(ActionType::Add, file("x.txt"))));
        source.push(Revision::new(at(100), "amy", file("x.txt"), Action::new(ActionType::Edit, file("x.txt"))));
        let list = changesets(&source);

        let options = ExportOptions {
            try_generate_comment: false,
            default_comment: "imported".to_string(),
            ..Default::default()
        };
        let (mut exporter, calls) = exporter(dir.path(), source, options);
        exporter.export(&list, &TaskContext::detached()).unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.contains("[imported] 12:00:00")));
        // no content for the edit leaves nothing to commit
        assert_eq!(calls.iter().filter(|c| c.starts_with("commit")).count(), 1);
    }

    #[test]
    fn test_remove_path_and_folder_labels() {
        let dir = TempDir::new().unwrap();
        let source = history();
        let list = changesets(&source);
        let options = ExportOptions {
            remove_path: Some("$/product/".to_string()),
            folder_before_label: true,
            ..Default::default()
        };
        let (mut exporter, calls) = exporter(dir.path(), source, options);

        exporter.export(&list, &TaskContext::detached()).unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[2], "add a.txt");
        assert!(calls.iter().any(|c| c.starts_with("tag Product/Release 1")));
        assert!(dir.path().join("c.txt").exists());
    }

    #[test]
    fn test_local_path_rejects_parent_components() {
        let dir = TempDir::new().unwrap();
        let (exporter, _) = exporter(dir.path(), MemorySource::new(), ExportOptions::default());
        assert!(exporter.local_path("$/a/../../etc").is_err());
        assert_eq!(exporter.local_path("$/").unwrap(), dir.path());
    }

    #[test]
    fn test_delete_and_empty_dir_moves() {
        let dir = TempDir::new().unwrap();
        let docs = Item::project("DDDD", "$/Product/docs");
        let mut source = MemorySource::new();
        source.push(Revision::new(at(0), "amy", project(), Action::new(ActionType::Add, docs.clone())));
        source.push(
            Revision::new(at(100), "amy", project(), Action::new(ActionType::Rename, docs).with_secondary("$/Product/manual"))
                .with_version(2),
        );
        source.push(
            Revision::new(at(200), "amy", project(), Action::new(ActionType::Delete, Item::project("DDDD", "$/Product/manual")))
                .with_version(3),
        );
        source.push(
            Revision::new(at(300), "amy", project(), Action::new(ActionType::Delete, file("ghost.txt")))
                .with_version(4),
        );
        let list = changesets(&source);
        let (mut exporter, calls) = exporter(dir.path(), source, ExportOptions::default());

        exporter.export(&list, &TaskContext::detached()).unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"add_dir Product/docs".to_string()));
        assert!(calls.contains(&"move_empty_dir Product/docs Product/manual".to_string()));
        assert!(calls.contains(&"remove_dir Product/manual true".to_string()));
        assert!(!calls.iter().any(|c| c.contains("ghost")));
    }

    #[test]
    fn test_queued_export_after_queued_build() {
        let dir = TempDir::new().unwrap();
        let queue = TaskQueue::new("export-test");
        let list = ChangesetBuilder::new()
            .with_zone(SourceZone::Utc)
            .build_changesets(&queue, history())
            .unwrap();
        let (exporter, calls) = exporter(dir.path(), history(), ExportOptions::default());

        let stats = exporter.export_to_vcs(&queue, list.clone()).unwrap();
        queue.wait_idle();

        assert!(queue.fetch_errors().is_none());
        assert_eq!(list.len(), 4);
        assert_eq!(stats.try_recv().unwrap().committed, 3);
        assert_eq!(calls.lock().unwrap().len(), 10);
    }

    #[test]
    fn test_abort_stops_between_changesets() {
        let dir = TempDir::new().unwrap();
        let source = history();
        let list = changesets(&source);
        let queue = TaskQueue::new("abort-test");

        let (mut wrapper, calls) = RecordingWrapper::new(dir.path());
        wrapper.abort_on_commit = Some(queue.clone());
        let exporter =
            VcsExporter::new(Box::new(wrapper), Box::new(source), EmailMap::new(), ExportOptions::default());

        let stats = exporter.export_to_vcs(&queue, ChangesetList::from(list)).unwrap();
        queue.wait_idle();

        assert!(stats.try_recv().is_err());
        let errors = queue.fetch_errors().unwrap();
        assert!(matches!(errors[0], Error::Aborted));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| c.starts_with("commit")).count(), 1);
    }
}
