use crate::wrapper::{relative_path, run_checked, CommandOutput, CommandRunner, Invocation, ProcessRunner, VcsWrapper};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vssmigrate_core::{Error, Identity, Result};

pub const SVN_META_DIR: &str = ".svn";

const PERMISSIVE_HOOK: &str = "#!/bin/sh\nexit 0\n";

/// Sub-paths of the trunk, tags and branches folders below the project path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvnLayout {
    pub trunk: String,
    pub tags: String,
    pub branches: String,
}

impl SvnLayout {
    pub fn standard() -> Self {
        Self {
            trunk: "trunk".to_string(),
            tags: "tags".to_string(),
            branches: "branches".to_string(),
        }
    }

    pub fn custom(trunk: &str, tags: &str, branches: &str) -> Self {
        Self {
            trunk: trunk.trim_matches('/').to_string(),
            tags: tags.trim_matches('/').to_string(),
            branches: branches.trim_matches('/').to_string(),
        }
    }
}

impl Default for SvnLayout {
    fn default() -> Self {
        Self::standard()
    }
}

pub struct SvnWrapper {
    work_dir: PathBuf,
    repository: String,
    project_path: String,
    layout: SvnLayout,
    user: Option<String>,
    password: Option<String>,
    runner: Box<dyn CommandRunner>,
    needs_commit: bool,
    layout_revision: Option<u64>,
}

impl SvnWrapper {
    pub fn new<P: Into<PathBuf>>(work_dir: P, repository: &str) -> Self {
        Self {
            work_dir: work_dir.into(),
            repository: repository.trim_end_matches('/').to_string(),
            project_path: String::new(),
            layout: SvnLayout::standard(),
            user: None,
            password: None,
            runner: Box::new(ProcessRunner),
            needs_commit: false,
            layout_revision: None,
        }
    }

    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_project_path(mut self, path: &str) -> Self {
        self.project_path = path.trim_matches('/').to_string();
        self
    }

    pub fn with_layout(mut self, layout: SvnLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_credentials(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    fn url(&self, sub: &str) -> String {
        let mut url = self.repository.clone();
        for part in [self.project_path.as_str(), sub] {
            if !part.is_empty() {
                url.push('/');
                url.push_str(part);
            }
        }
        url
    }

    pub fn trunk_url(&self) -> String {
        self.url(&self.layout.trunk)
    }

    pub fn tag_url(&self, name: &str) -> String {
        format!("{}/{}", self.url(&self.layout.tags), name)
    }

    fn svn(&self) -> Invocation {
        let mut invocation = Invocation::new("svn", &self.work_dir);
        invocation = invocation.args(["--non-interactive", "--no-auth-cache"]);
        if let Some(user) = &self.user {
            invocation = invocation.arg("--username").arg(user);
        }
        if let Some(password) = &self.password {
            invocation = invocation.arg("--password").arg(password);
        }
        invocation
    }

    fn run(&mut self, invocation: Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation.command_line(), "svn");
        run_checked(self.runner.as_mut(), &invocation)
    }

    fn relative(&self, path: &Path) -> Result<String> {
        relative_path(&self.work_dir, path)
    }

    /// Local repository path for a `file://` URL.
    fn local_repository(&self) -> Option<PathBuf> {
        let rest = self.repository.strip_prefix("file://")?;
        // file:///C:/repo on Windows
        let rest = match rest.strip_prefix('/') {
            Some(tail) if tail.get(1..2) == Some(":") => tail,
            _ => rest,
        };
        Some(PathBuf::from(rest))
    }

    fn create_local_repository(&mut self, path: &Path) -> Result<()> {
        info!(path = %path.display(), "Creating local repository");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cwd = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.work_dir.clone());
        let invocation = Invocation::new("svnadmin", cwd)
            .arg("create")
            .arg(path.to_string_lossy().into_owned());
        self.run(invocation)?;

        let hooks = path.join("hooks");
        fs::create_dir_all(&hooks)?;
        if cfg!(windows) {
            fs::write(hooks.join("pre-revprop-change.bat"), "@exit 0\r\n")?;
        } else {
            let hook = hooks.join("pre-revprop-change");
            fs::write(&hook, PERMISSIVE_HOOK)?;
            make_executable(&hook)?;
        }
        Ok(())
    }

    fn create_layout(&mut self) -> Result<()> {
        let info = self.svn().args(["info", "--"]).arg(self.trunk_url());
        if self.runner.run(&info)?.success() {
            debug!(url = %self.trunk_url(), "Layout already present");
            return Ok(());
        }

        let mut invocation = self
            .svn()
            .args(["mkdir", "--parents", "-m", "Create repository layout", "--"]);
        for sub in [&self.layout.trunk, &self.layout.tags, &self.layout.branches] {
            invocation = invocation.arg(self.url(sub));
        }
        let output = self.run(invocation)?;
        self.layout_revision = parse_committed_revision(&output.stdout);
        Ok(())
    }

    fn set_revprops(&mut self, revision: u64, who: &Identity, when: DateTime<Utc>) -> Result<()> {
        let rev = revision.to_string();
        let date = format_svn_date(when);
        for (name, value) in [("svn:author", who.name.as_str()), ("svn:date", date.as_str())] {
            let invocation = self
                .svn()
                .args(["propset", "--revprop", "-r", rev.as_str(), name, value, "--"])
                .arg(self.repository.clone());
            self.run(invocation)?;
        }
        Ok(())
    }

    fn message_file(comment: &str) -> Result<tempfile::NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("vssmigrate-msg-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(comment.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

impl VcsWrapper for SvnWrapper {
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn init(&mut self, reset: bool) -> Result<()> {
        if !reset {
            return Ok(());
        }
        if self.work_dir.exists() {
            info!(path = %self.work_dir.display(), "Removing existing working copy");
            fs::remove_dir_all(&self.work_dir)?;
        }
        fs::create_dir_all(&self.work_dir)?;

        if let Some(local) = self.local_repository() {
            if !local.join("format").exists() {
                self.create_local_repository(&local)?;
            }
        }
        self.create_layout()?;

        let invocation = self.svn().args(["checkout", "--"]).arg(self.trunk_url()).arg(".");
        self.run(invocation)?;
        self.needs_commit = false;
        Ok(())
    }

    fn configure(&mut self, _new_repo: bool) -> Result<()> {
        if !self.work_dir.join(SVN_META_DIR).is_dir() {
            return Err(Error::Repository(format!(
                "{} is not a subversion working copy",
                self.work_dir.display()
            )));
        }
        Ok(())
    }

    fn bootstrap(&mut self, when: DateTime<Utc>) -> Result<()> {
        // date the layout commit so the resume cursor stays consistent
        if let Some(revision) = self.layout_revision.take() {
            let who = Identity::new(self.user.clone().unwrap_or_else(|| "vssmigrate".to_string()), "");
            self.set_revprops(revision, &who, when)?;
        }
        Ok(())
    }

    fn add(&mut self, path: &Path) -> Result<()> {
        let relative = self.relative(path)?;
        let invocation = self.svn().args(["add", "--force", "--parents", "--"]).arg(relative);
        self.run(invocation)?;
        self.needs_commit = true;
        Ok(())
    }

    fn add_dir(&mut self, path: &Path) -> Result<()> {
        let relative = self.relative(path)?;
        let invocation = self
            .svn()
            .args(["add", "--force", "--parents", "--depth=empty", "--"])
            .arg(relative);
        self.run(invocation)?;
        self.needs_commit = true;
        Ok(())
    }

    fn remove_file(&mut self, path: &Path) -> Result<()> {
        let relative = self.relative(path)?;
        let invocation = self.svn().args(["delete", "--force", "--"]).arg(relative);
        self.run(invocation)?;
        self.needs_commit = true;
        Ok(())
    }

    fn remove_dir(&mut self, path: &Path, _recursive: bool) -> Result<()> {
        self.remove_file(path)
    }

    fn move_path(&mut self, src: &Path, dst: &Path) -> Result<()> {
        let (src, dst) = (self.relative(src)?, self.relative(dst)?);
        let invocation = self.svn().args(["move", "--force", "--parents", "--"]).arg(src).arg(dst);
        self.run(invocation)?;
        self.needs_commit = true;
        Ok(())
    }

    fn move_empty_dir(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.move_path(src, dst)
    }

    fn needs_commit(&mut self) -> Result<bool> {
        Ok(self.needs_commit)
    }

    fn commit(&mut self, author: &Identity, comment: &str, when: DateTime<Utc>) -> Result<bool> {
        let file = Self::message_file(comment)?;
        let invocation = self
            .svn()
            .args(["commit", "--encoding", "UTF-8", "-F"])
            .arg(file.path().to_string_lossy().into_owned());
        let output = self.run(invocation)?;
        drop(file);
        self.needs_commit = false;

        let Some(revision) = parse_committed_revision(&output.stdout) else {
            debug!("Nothing to commit");
            return Ok(false);
        };
        self.set_revprops(revision, author, when)?;

        let update = self.svn().arg("update");
        self.run(update)?;
        Ok(true)
    }

    fn discard_pending(&mut self) -> Result<()> {
        if !self.needs_commit {
            return Ok(());
        }
        self.needs_commit = false;
        let invocation = self.svn().args(["revert", "--depth", "infinity", "--", "."]);
        self.run(invocation)?;
        Ok(())
    }

    fn tag(&mut self, name: &str, tagger: &Identity, comment: &str, when: DateTime<Utc>) -> Result<()> {
        let file = Self::message_file(comment)?;
        let invocation = self
            .svn()
            .args(["copy", "--parents", "--encoding", "UTF-8", "-F"])
            .arg(file.path().to_string_lossy().into_owned())
            .arg("--")
            .arg(self.trunk_url())
            .arg(self.tag_url(name));
        let output = self.run(invocation)?;
        drop(file);

        if let Some(revision) = parse_committed_revision(&output.stdout) {
            self.set_revprops(revision, tagger, when)?;
        }
        Ok(())
    }

    fn last_commit(&mut self) -> Result<Option<DateTime<Utc>>> {
        if !self.work_dir.join(SVN_META_DIR).is_dir() {
            return Ok(None);
        }
        let invocation = self.svn().args(["log", "--xml", "-l", "1", "--"]).arg(self.trunk_url());
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            debug!(stderr = %output.stderr.trim(), "No last commit");
            return Ok(None);
        }
        Ok(parse_log_date(&output.stdout))
    }
}

pub fn format_svn_date(when: DateTime<Utc>) -> String {
    when.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn parse_committed_revision(stdout: &str) -> Option<u64> {
    let pattern = Regex::new(r"Committed revision (\d+)\.").ok()?;
    pattern.captures(stdout)?.get(1)?.as_str().parse().ok()
}

fn parse_log_date(xml: &str) -> Option<DateTime<Utc>> {
    let pattern = Regex::new(r"<date>([^<]+)</date>").ok()?;
    let text = pattern.captures(xml)?.get(1)?.as_str();
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::testing::{failed_output, ok_output, FakeRunner};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn when() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2003, 11, 2, 18, 45, 0).unwrap()
    }

    fn working_copy() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("wc");
        fs::create_dir_all(work.join(SVN_META_DIR)).unwrap();
        (dir, work)
    }

    /// Arguments after the shared authentication flags.
    fn command(invocation: &Invocation) -> Vec<&str> {
        let mut args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        let mut i = 0;
        while i < args.len() {
            match args[i] {
                "--non-interactive" | "--no-auth-cache" => {
                    args.remove(i);
                }
                "--username" | "--password" => {
                    args.drain(i..i + 2);
                }
                _ => i += 1,
            }
        }
        args
    }

    #[test]
    fn test_urls_for_custom_layout() {
        let svn = SvnWrapper::new("/wc", "https://svn.example.com/repo/")
            .with_project_path("/product/")
            .with_layout(SvnLayout::custom("main", "/releases/", "dev"));
        assert_eq!(svn.trunk_url(), "https://svn.example.com/repo/product/main");
        assert_eq!(svn.tag_url("v1"), "https://svn.example.com/repo/product/releases/v1");

        let plain = SvnWrapper::new("/wc", "file:///srv/repo");
        assert_eq!(plain.trunk_url(), "file:///srv/repo/trunk");
        assert_eq!(plain.local_repository(), Some(PathBuf::from("/srv/repo")));
    }

    #[test]
    fn test_credentials_passed_non_interactively() {
        let (_dir, work) = working_copy();
        let (runner, log) = FakeRunner::ok();
        let mut svn = SvnWrapper::new(&work, "https://svn.example.com/repo")
            .with_runner(Box::new(runner))
            .with_credentials(Some("builder".into()), Some("s3cret".into()));

        svn.add(&work.join("a.txt")).unwrap();

        let log = log.lock().unwrap();
        let args = &log[0].args;
        assert_eq!(
            &args[..6],
            &["--non-interactive", "--no-auth-cache", "--username", "builder", "--password", "s3cret"]
        );
        assert_eq!(command(&log[0]), vec!["add", "--force", "--parents", "--", "a.txt"]);
    }

    #[test]
    fn test_mutations_mark_commit_needed() {
        let (_dir, work) = working_copy();
        let (runner, log) = FakeRunner::ok();
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));

        assert!(!svn.needs_commit().unwrap());
        svn.add_dir(&work.join("docs")).unwrap();
        svn.remove_dir(&work.join("old"), true).unwrap();
        svn.move_path(&work.join("a.txt"), &work.join("b/a.txt")).unwrap();
        assert!(svn.needs_commit().unwrap());

        let log = log.lock().unwrap();
        assert_eq!(command(&log[0]), vec!["add", "--force", "--parents", "--depth=empty", "--", "docs"]);
        assert_eq!(command(&log[1]), vec!["delete", "--force", "--", "old"]);
        assert_eq!(command(&log[2]), vec!["move", "--force", "--parents", "--", "a.txt", "b/a.txt"]);
    }

    #[test]
    fn test_discard_pending_reverts_working_copy() {
        let (_dir, work) = working_copy();
        let (runner, log) = FakeRunner::ok();
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));

        svn.discard_pending().unwrap();
        assert!(log.lock().unwrap().is_empty());

        svn.add(&work.join("a.txt")).unwrap();
        svn.discard_pending().unwrap();

        assert!(!svn.needs_commit().unwrap());
        let log = log.lock().unwrap();
        assert_eq!(command(&log[1]), vec!["revert", "--depth", "infinity", "--", "."]);
    }

    #[test]
    fn test_commit_sets_revision_properties() {
        let (_dir, work) = working_copy();
        let (runner, log) = FakeRunner::with(Box::new(|invocation: &Invocation| {
            if invocation.args.iter().any(|a| a == "commit") {
                ok_output("Adding         a.txt\nTransmitting file data .\nCommitted revision 42.\n")
            } else {
                ok_output("")
            }
        }));
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));

        let who = Identity::new("Donna", "donna@example.com");
        assert!(svn.commit(&who, "Fix\nmore", when()).unwrap());

        let log = log.lock().unwrap();
        assert_eq!(command(&log[0])[..4], ["commit", "--encoding", "UTF-8", "-F"]);
        assert_eq!(
            command(&log[1]),
            vec!["propset", "--revprop", "-r", "42", "svn:author", "Donna", "--", "file:///srv/repo"]
        );
        assert_eq!(
            command(&log[2]),
            vec!["propset", "--revprop", "-r", "42", "svn:date", "2003-11-02T18:45:00.000000Z", "--", "file:///srv/repo"]
        );
        assert_eq!(command(&log[3]), vec!["update"]);
    }

    #[test]
    fn test_commit_without_revision_reports_nothing_committed() {
        let (_dir, work) = working_copy();
        let (runner, log) = FakeRunner::ok();
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));

        assert!(!svn.commit(&Identity::new("a", ""), "msg", when()).unwrap());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tag_copies_trunk() {
        let (_dir, work) = working_copy();
        let (runner, log) = FakeRunner::with(Box::new(|_: &Invocation| ok_output("Committed revision 7.\n")));
        let mut svn = SvnWrapper::new(&work, "https://svn.example.com/repo").with_runner(Box::new(runner));

        svn.tag("Beta 2", &Identity::new("Martha", ""), "", when()).unwrap();

        let log = log.lock().unwrap();
        let copy = command(&log[0]);
        assert_eq!(copy[0], "copy");
        assert_eq!(
            &copy[copy.len() - 2..],
            &["https://svn.example.com/repo/trunk", "https://svn.example.com/repo/tags/Beta 2"]
        );
        assert_eq!(command(&log[1])[5], "Martha");
    }

    #[test]
    fn test_last_commit_reads_log_date() {
        let (_dir, work) = working_copy();
        let xml = "<?xml version=\"1.0\"?>\n<log>\n<logentry revision=\"9\">\n<author>amy</author>\n<date>2003-11-02T18:45:00.000000Z</date>\n<msg>x</msg>\n</logentry>\n</log>\n";
        let (runner, _log) = FakeRunner::with(Box::new(move |_: &Invocation| ok_output(xml)));
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));
        assert_eq!(svn.last_commit().unwrap(), Some(when()));
    }

    #[test]
    fn test_last_commit_none_cases() {
        let (_dir, work) = working_copy();
        let (runner, _log) = FakeRunner::with(Box::new(|_: &Invocation| ok_output("<?xml version=\"1.0\"?>\n<log>\n</log>\n")));
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));
        assert_eq!(svn.last_commit().unwrap(), None);

        let (runner, _log) = FakeRunner::with(Box::new(|_: &Invocation| failed_output("svn: E170000: URL doesn't exist")));
        let mut svn = SvnWrapper::new(&work, "file:///srv/repo").with_runner(Box::new(runner));
        assert_eq!(svn.last_commit().unwrap(), None);

        let bare = TempDir::new().unwrap();
        let (runner, log) = FakeRunner::ok();
        let mut svn = SvnWrapper::new(bare.path(), "file:///srv/repo").with_runner(Box::new(runner));
        assert_eq!(svn.last_commit().unwrap(), None);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_init_creates_local_repository_and_layout() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        let work = dir.path().join("wc");
        let url = format!("file://{}", repo.display());
        let (runner, log) = FakeRunner::with(Box::new(|invocation: &Invocation| {
            if invocation.args.iter().any(|a| a == "info") {
                failed_output("svn: E170000: path not found")
            } else if invocation.args.iter().any(|a| a == "mkdir") {
                ok_output("\nCommitted revision 1.\n")
            } else {
                ok_output("")
            }
        }));
        let mut svn = SvnWrapper::new(&work, &url).with_runner(Box::new(runner));

        svn.init(true).unwrap();

        assert!(work.is_dir());
        assert_eq!(fs::read_dir(repo.join("hooks")).unwrap().count(), 1);
        let log = log.lock().unwrap();
        assert_eq!(log[0].program, "svnadmin");
        assert_eq!(command(&log[1])[0], "info");
        let mkdir = command(&log[2]);
        assert_eq!(mkdir[0], "mkdir");
        assert!(mkdir.contains(&format!("{}/branches", url).as_str()));
        assert_eq!(command(&log[3])[0], "checkout");
        assert_eq!(log[3].cwd, work);
        drop(log);

        svn.bootstrap(when()).unwrap();
        assert!(svn.layout_revision.is_none());
    }

    #[test]
    fn test_configure_requires_working_copy() {
        let dir = TempDir::new().unwrap();
        let (runner, _log) = FakeRunner::ok();
        let mut svn = SvnWrapper::new(dir.path(), "file:///srv/repo").with_runner(Box::new(runner));
        assert!(matches!(svn.configure(true), Err(Error::Repository(_))));
    }
}
