use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::trace;
use vssmigrate_core::{Error, Identity, Result};

/// Operations a target version control system must support for changesets
/// to be replayed against it.
///
/// Paths are absolute paths inside [`work_dir`](VcsWrapper::work_dir).
/// Implementations own any batching state; they are driven from a single
/// worker thread and need no internal locking.
pub trait VcsWrapper: Send {
    fn work_dir(&self) -> &Path;

    /// Prepares the working directory. With `reset` any existing content is
    /// deleted and a fresh repository is created.
    fn init(&mut self, reset: bool) -> Result<()>;

    fn configure(&mut self, new_repo: bool) -> Result<()>;

    /// Seeds a freshly created repository before replay starts. `when` is
    /// earlier than every changeset that follows.
    fn bootstrap(&mut self, _when: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn add(&mut self, path: &Path) -> Result<()>;

    fn add_dir(&mut self, path: &Path) -> Result<()>;

    fn remove_file(&mut self, path: &Path) -> Result<()>;

    fn remove_dir(&mut self, path: &Path, recursive: bool) -> Result<()>;

    /// Moves `src` to `dst` in the working tree and records the move.
    fn move_path(&mut self, src: &Path, dst: &Path) -> Result<()>;

    fn move_empty_dir(&mut self, src: &Path, dst: &Path) -> Result<()>;

    /// Flushes pending mutations and reports whether a commit is due.
    fn needs_commit(&mut self) -> Result<bool>;

    fn commit(&mut self, author: &Identity, comment: &str, when: DateTime<Utc>) -> Result<bool>;

    /// Drops every mutation recorded since the last commit, so the next
    /// commit holds only what is recorded after this call.
    fn discard_pending(&mut self) -> Result<()> {
        Ok(())
    }

    fn tag(&mut self, name: &str, tagger: &Identity, comment: &str, when: DateTime<Utc>)
        -> Result<()>;

    /// Time of the newest commit, or `None` for an empty or missing
    /// repository.
    fn last_commit(&mut self) -> Result<Option<DateTime<Utc>>>;
}

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: cwd.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push_str(&format!("\"{}\"", arg));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes tool invocations. The process-backed runner is the default;
/// tests substitute their own.
pub trait CommandRunner: Send {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput> {
        trace!(command = %invocation.command_line(), "Executing");
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .output()?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Runs `invocation` and turns a nonzero exit into [`Error::Command`].
pub fn run_checked(runner: &mut dyn CommandRunner, invocation: &Invocation) -> Result<CommandOutput> {
    let output = runner.run(invocation)?;
    if output.success() {
        Ok(output)
    } else {
        Err(Error::Command {
            command: invocation.command_line(),
            code: output.code.unwrap_or(-1),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// `path` relative to `root`, with `/` separators.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| {
            Error::InvalidPath(format!(
                "{} is outside {}",
                path.display(),
                root.display()
            ))
        })?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return Err(Error::InvalidPath(path.display().to_string())),
        }
    }
    if parts.is_empty() {
        Ok(".".to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Formats an identity timestamp the way the external tools expect it.
pub fn format_git_date(when: DateTime<Utc>) -> String {
    when.format("%Y-%m-%d %H:%M:%S +0000").to_string()
}
