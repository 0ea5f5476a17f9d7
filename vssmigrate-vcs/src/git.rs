use crate::wrapper::{
    format_git_date, relative_path, run_checked, CommandOutput, CommandRunner, Invocation,
    ProcessRunner, VcsWrapper,
};
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use vssmigrate_core::{Error, Identity, Result};

pub const GIT_META_DIR: &str = ".git";

/// Argument bytes allowed per batched `add`/`rm` invocation.
pub const DEFAULT_BATCH_BUDGET: usize = 8000;

/// Files and identity used to seed a new repository.
#[derive(Debug, Clone, Default)]
pub struct GitBootstrap {
    pub ignore_file: Option<PathBuf>,
    pub attributes_file: Option<PathBuf>,
    pub user_name: String,
    pub user_email: String,
    pub comment: String,
}

pub struct GitWrapper {
    work_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    encoding: &'static Encoding,
    force_annotated_tags: bool,
    bootstrap: Option<GitBootstrap>,
    batch_budget: usize,
    add_queue: Vec<String>,
    delete_queue: Vec<String>,
    removed_dirs: Vec<PathBuf>,
    needs_commit: bool,
}

impl GitWrapper {
    pub fn new<P: Into<PathBuf>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.into(),
            runner: Box::new(ProcessRunner),
            encoding: UTF_8,
            force_annotated_tags: true,
            bootstrap: None,
            batch_budget: DEFAULT_BATCH_BUDGET,
            add_queue: Vec::new(),
            delete_queue: Vec::new(),
            removed_dirs: Vec::new(),
            needs_commit: false,
        }
    }

    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Sets the encoding commit and tag messages are written in. Accepts any
    /// WHATWG label such as `windows-1252` or `shift_jis`.
    pub fn with_commit_encoding(mut self, label: &str) -> Result<Self> {
        self.encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
            Error::InvalidOperation(format!("unknown commit encoding: {}", label))
        })?;
        Ok(self)
    }

    pub fn with_force_annotated_tags(mut self, force: bool) -> Self {
        self.force_annotated_tags = force;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: GitBootstrap) -> Self {
        self.bootstrap = Some(bootstrap);
        self
    }

    pub fn with_batch_budget(mut self, budget: usize) -> Self {
        self.batch_budget = budget.max(1);
        self
    }

    fn invocation(&self) -> Invocation {
        Invocation::new("git", &self.work_dir)
    }

    fn git(&mut self, invocation: Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation.command_line(), "git");
        run_checked(self.runner.as_mut(), &invocation)
    }

    fn relative(&self, path: &Path) -> Result<String> {
        relative_path(&self.work_dir, path)
    }

    /// Builds the message arguments for `commit` and `tag`. A returned temp
    /// file must outlive the invocation that references it.
    fn message_args(&self, comment: &str) -> Result<(Vec<String>, Option<NamedTempFile>)> {
        if comment.contains('\n') || self.encoding != UTF_8 {
            let mut file = tempfile::Builder::new()
                .prefix("vssmigrate-msg-")
                .suffix(".txt")
                .tempfile()?;
            let (bytes, _, _) = self.encoding.encode(comment);
            file.write_all(&bytes)?;
            file.flush()?;
            let path = file.path().to_string_lossy().into_owned();
            Ok((vec!["-F".to_string(), path], Some(file)))
        } else {
            Ok((vec!["-m".to_string(), comment.to_string()], None))
        }
    }

    fn flush_adds(&mut self) -> Result<()> {
        let paths = std::mem::take(&mut self.add_queue);
        if paths.is_empty() {
            return Ok(());
        }
        for chunk in chunk_paths(&paths, self.batch_budget) {
            let invocation = self.invocation().args(["add", "-f", "--"]).args(chunk.iter().cloned());
            self.git(invocation)?;
        }
        self.needs_commit = true;
        Ok(())
    }

    fn flush_deletes(&mut self) -> Result<()> {
        let paths = std::mem::take(&mut self.delete_queue);
        let dirs = std::mem::take(&mut self.removed_dirs);
        if paths.is_empty() {
            return Ok(());
        }
        for chunk in chunk_paths(&paths, self.batch_budget) {
            let invocation = self
                .invocation()
                .args(["rm", "-r", "-f", "--"])
                .args(chunk.iter().cloned());
            self.git(invocation)?;
        }
        for dir in dirs {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
            }
        }
        self.needs_commit = true;
        Ok(())
    }

    fn with_identity(invocation: Invocation, who: &Identity, when: DateTime<Utc>, author: bool) -> Invocation {
        let date = format_git_date(when);
        let invocation = if author {
            invocation
                .env("GIT_AUTHOR_NAME", &who.name)
                .env("GIT_AUTHOR_EMAIL", &who.email)
                .env("GIT_AUTHOR_DATE", &date)
        } else {
            invocation
        };
        invocation
            .env("GIT_COMMITTER_NAME", &who.name)
            .env("GIT_COMMITTER_EMAIL", &who.email)
            .env("GIT_COMMITTER_DATE", &date)
    }

    fn copy_seed(&self, source: Option<&PathBuf>, name: &str) -> Result<bool> {
        let Some(source) = source else {
            return Ok(false);
        };
        if !source.is_file() {
            return Err(Error::InvalidPath(format!(
                "bootstrap file not found: {}",
                source.display()
            )));
        }
        fs::copy(source, self.work_dir.join(name))?;
        Ok(true)
    }
}

impl VcsWrapper for GitWrapper {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn init(&mut self, reset: bool) -> Result<()> {
        if !reset {
            return Ok(());
        }
        if self.work_dir.exists() {
            info!(path = %self.work_dir.display(), "Removing existing repository");
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)?;
        let invocation = self.invocation().arg("init");
        self.git(invocation)?;
        self.add_queue.clear();
        self.delete_queue.clear();
        self.removed_dirs.clear();
        self.needs_commit = false;
        Ok(())
    }

    fn configure(&mut self, new_repo: bool) -> Result<()> {
        if !new_repo && !self.work_dir.join(GIT_META_DIR).is_dir() {
            return Err(Error::Repository(format!(
                "{} is not a git repository",
                self.work_dir.display()
            )));
        }
        if self.encoding != UTF_8 {
            let invocation = self
                .invocation()
                .args(["config", "i18n.commitencoding", self.encoding.name()]);
            self.git(invocation)?;
        }
        Ok(())
    }

    fn bootstrap(&mut self, when: DateTime<Utc>) -> Result<()> {
        let Some(seed) = self.bootstrap.clone() else {
            return Ok(());
        };
        let ignore = self.copy_seed(seed.ignore_file.as_ref(), ".gitignore")?;
        let attributes = self.copy_seed(seed.attributes_file.as_ref(), ".gitattributes")?;
        if !ignore && !attributes {
            return Ok(());
        }

        let invocation = self.invocation().args(["add", "-A"]);
        self.git(invocation)?;
        let who = Identity::new(seed.user_name, seed.user_email);
        self.needs_commit = true;
        self.commit(&who, &seed.comment, when)?;
        info!("Seeded repository with initial commit");
        Ok(())
    }

    fn add(&mut self, path: &Path) -> Result<()> {
        let relative = self.relative(path)?;
        self.add_queue.push(relative);
        Ok(())
    }

    fn add_dir(&mut self, _path: &Path) -> Result<()> {
        // git does not track directories
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        let relative = self.relative(path)?;
        self.delete_queue.push(relative);
        Ok(())
    }

    fn remove_dir(&mut self, path: &Path, _recursive: bool) -> Result<()> {
        let relative = self.relative(path)?;
        self.delete_queue.push(relative);
        self.removed_dirs.push(path.to_path_buf());
        Ok(())
    }

    fn move_path(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.flush_adds()?;
        self.flush_deletes()?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        let (src, dst) = (self.relative(src)?, self.relative(dst)?);
        let invocation = self.invocation().args(["mv", "-f", "--"]).arg(src).arg(dst);
        self.git(invocation)?;
        self.needs_commit = true;
        Ok(())
    }

    fn move_empty_dir(&mut self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(src, dst)?;
        Ok(())
    }

    fn needs_commit(&mut self) -> Result<bool> {
        self.flush_adds()?;
        self.flush_deletes()?;
        Ok(self.needs_commit)
    }

    fn commit(&mut self, author: &Identity, comment: &str, when: DateTime<Utc>) -> Result<bool> {
        let (message, _file) = if comment.is_empty() {
            let args = ["--allow-empty-message", "--no-edit", "-m", ""];
            (args.iter().map(|s| s.to_string()).collect(), None)
        } else {
            self.message_args(comment)?
        };
        let invocation = Self::with_identity(self.invocation().arg("commit").args(message), author, when, true);

        debug!(command = %invocation.command_line(), "git");
        let output = self.runner.run(&invocation)?;
        self.needs_commit = false;
        if output.success() {
            return Ok(true);
        }
        if output.stdout.contains("nothing to commit") || output.stdout.contains("nothing added to commit") {
            debug!("Nothing to commit");
            return Ok(false);
        }
        Err(Error::Command {
            command: invocation.command_line(),
            code: output.code.unwrap_or(-1),
            stderr: output.stderr.trim().to_string(),
        })
    }

    fn discard_pending(&mut self) -> Result<()> {
        self.add_queue.clear();
        self.delete_queue.clear();
        self.removed_dirs.clear();
        self.needs_commit = false;
        if !self.work_dir.join(GIT_META_DIR).is_dir() {
            return Ok(());
        }

        // moves are staged immediately
        let reset = self.invocation().args(["reset", "-q"]);
        debug!(command = %reset.command_line(), "git");
        if self.runner.run(&reset)?.success() {
            return Ok(());
        }
        // no HEAD yet: unstage everything instead
        let unstage = self
            .invocation()
            .args(["rm", "-r", "-q", "--cached", "--ignore-unmatch", "--", "."]);
        self.git(unstage)?;
        Ok(())
    }

    fn tag(&mut self, name: &str, tagger: &Identity, comment: &str, when: DateTime<Utc>) -> Result<()> {
        let name = sanitize_tag_name(name);
        let mut invocation = self.invocation().args(["tag", "-f"]);
        let mut _file = None;
        if self.force_annotated_tags || !comment.is_empty() {
            invocation = invocation.arg("-a");
            let (message, file) = self.message_args(comment)?;
            invocation = invocation.args(message);
            _file = file;
        }
        let invocation = Self::with_identity(invocation.arg("--").arg(name), tagger, when, false);
        self.git(invocation)?;
        Ok(())
    }

    fn last_commit(&mut self) -> Result<Option<DateTime<Utc>>> {
        if !self.work_dir.join(GIT_META_DIR).is_dir() {
            return Ok(None);
        }
        let invocation = self.invocation().args(["log", "-n", "1", "--date=raw"]);
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            // a repository without commits has no HEAD
            debug!(stderr = %output.stderr.trim(), "No last commit");
            return Ok(None);
        }
        Ok(parse_raw_date(&output.stdout))
    }
}

/// Extracts the commit time from `git log --date=raw` output.
pub fn parse_raw_date(log: &str) -> Option<DateTime<Utc>> {
    let pattern = Regex::new(r"(?m)^Date:\s*(\S+)").ok()?;
    let seconds: i64 = pattern.captures(log)?.get(1)?.as_str().parse().ok()?;
    DateTime::from_timestamp(seconds, 0)
}

/// Splits `paths` into runs whose quoted length stays within `budget`.
/// A single path longer than the budget gets a run of its own.
pub fn chunk_paths(paths: &[String], budget: usize) -> Vec<&[String]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut used = 0;
    for (i, path) in paths.iter().enumerate() {
        // two quotes and a separating space
        let cost = path.len() + 3;
        if i > start && used + cost > budget {
            chunks.push(&paths[start..i]);
            start = i;
            used = 0;
        }
        used += cost;
    }
    if start < paths.len() {
        chunks.push(&paths[start..]);
    }
    chunks
}

/// Rewrites `name` into a valid git ref component path.
pub fn sanitize_tag_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let bad = c.is_whitespace()
            || c.is_control()
            || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\');
        out.push(if bad { '_' } else { c });
    }
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    out = out.replace("@{", "_{");

    let parts: Vec<String> = out
        .split('/')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let p = p.trim_start_matches(['.', '-']);
            let p = p.strip_suffix(".lock").unwrap_or(p);
            p.trim_end_matches('.').to_string()
        })
        .filter(|p| !p.is_empty())
        .collect();
    let joined = parts.join("/");
    if joined.is_empty() || joined == "@" {
        warn!(name, "Tag name reduced to placeholder");
        "_".to_string()
    } else {
        joined
    }
}
