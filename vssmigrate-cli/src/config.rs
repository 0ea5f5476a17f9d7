use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vssmigrate_core::{ChangesetBuilder, SourceZone};
use vssmigrate_vcs::{ExportOptions, GitBootstrap, GitWrapper, SvnLayout, SvnWrapper, VcsWrapper};

pub const DEFAULT_SETTINGS_FILE: &str = "vssmigrate.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
    Svn,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub ignore_file: Option<PathBuf>,
    pub attributes_file: Option<PathBuf>,
    pub user_name: String,
    pub user_email: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvnSettings {
    pub repository: String,
    pub project_path: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub standard_layout: bool,
    pub trunk: String,
    pub tags: String,
    pub branches: String,
}

impl Default for SvnSettings {
    fn default() -> Self {
        let layout = SvnLayout::standard();
        Self {
            repository: String::new(),
            project_path: String::new(),
            user: None,
            password: None,
            standard_layout: true,
            trunk: layout.trunk,
            tags: layout.tags,
            branches: layout.branches,
        }
    }
}

/// Everything a conversion run needs, read from `vssmigrate.toml`. Missing
/// keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub history: PathBuf,
    pub out_directory: PathBuf,
    pub vcs: VcsKind,
    pub email_domain: String,
    pub emails_file: PathBuf,
    pub default_comment: String,
    pub try_generate_comment: bool,
    pub ignore_errors: bool,
    pub reset_repo: bool,
    pub remove_path: Option<String>,
    pub folder_before_label: bool,
    pub any_comment_seconds: i64,
    pub same_comment_seconds: i64,
    pub same_comment_inclusive: bool,
    pub source_timezone: String,
    pub commit_encoding: String,
    pub force_annotated_tags: bool,
    pub log_file: Option<PathBuf>,
    pub git: GitSettings,
    pub svn: SvnSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            history: PathBuf::from("vssmigrate.db"),
            out_directory: PathBuf::from("out"),
            vcs: VcsKind::Git,
            email_domain: "localhost".to_string(),
            emails_file: PathBuf::from("emails.properties"),
            default_comment: String::new(),
            try_generate_comment: true,
            ignore_errors: false,
            reset_repo: false,
            remove_path: None,
            folder_before_label: false,
            any_comment_seconds: 30,
            same_comment_seconds: 600,
            same_comment_inclusive: true,
            source_timezone: "local".to_string(),
            commit_encoding: "utf-8".to_string(),
            force_annotated_tags: true,
            log_file: None,
            git: GitSettings::default(),
            svn: SvnSettings::default(),
        }
    }
}

impl Settings {
    /// Reads `path`, or returns the defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn source_zone(&self) -> Result<SourceZone> {
        SourceZone::parse(&self.source_timezone)
            .ok_or_else(|| anyhow!("Invalid source_timezone: {}", self.source_timezone))
    }

    pub fn changeset_builder(&self) -> Result<ChangesetBuilder> {
        Ok(ChangesetBuilder::new()
            .with_any_comment_threshold(Duration::seconds(self.any_comment_seconds))
            .with_same_comment_threshold(Duration::seconds(self.same_comment_seconds))
            .with_same_comment_inclusive(self.same_comment_inclusive)
            .with_zone(self.source_zone()?))
    }

    pub fn export_options(&self, resume_after: Option<DateTime<Utc>>) -> ExportOptions {
        ExportOptions {
            email_domain: self.email_domain.clone(),
            default_comment: self.default_comment.clone(),
            try_generate_comment: self.try_generate_comment,
            ignore_errors: self.ignore_errors,
            reset_repo: self.reset_repo,
            remove_path: self.remove_path.clone().filter(|p| !p.is_empty()),
            folder_before_label: self.folder_before_label,
            resume_after,
        }
    }

    pub fn wrapper(&self) -> Result<Box<dyn VcsWrapper>> {
        match self.vcs {
            VcsKind::Git => {
                let mut git = GitWrapper::new(&self.out_directory)
                    .with_commit_encoding(&self.commit_encoding)?
                    .with_force_annotated_tags(self.force_annotated_tags);
                let seed = &self.git;
                if seed.ignore_file.is_some() || seed.attributes_file.is_some() {
                    git = git.with_bootstrap(GitBootstrap {
                        ignore_file: seed.ignore_file.clone(),
                        attributes_file: seed.attributes_file.clone(),
                        user_name: seed.user_name.clone(),
                        user_email: seed.user_email.clone(),
                        comment: seed.comment.clone(),
                    });
                }
                Ok(Box::new(git))
            }
            VcsKind::Svn => {
                let svn = &self.svn;
                if svn.repository.trim().is_empty() {
                    bail!("svn.repository must be set when vcs = \"svn\"");
                }
                let layout = if svn.standard_layout {
                    SvnLayout::standard()
                } else {
                    SvnLayout::custom(&svn.trunk, &svn.tags, &svn.branches)
                };
                Ok(Box::new(
                    SvnWrapper::new(&self.out_directory, &svn.repository)
                        .with_project_path(&svn.project_path)
                        .with_layout(layout)
                        .with_credentials(svn.user.clone(), svn.password.clone()),
                ))
            }
        }
    }
}
