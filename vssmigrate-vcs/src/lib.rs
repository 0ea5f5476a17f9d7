//! # vssmigrate-vcs
//!
//! Target version control support for vssmigrate: the [`VcsWrapper`]
//! capability trait, wrappers driving the `git` and `svn` command line
//! tools, and the exporter that replays changesets through them.

pub mod exporter;
pub mod git;
pub mod svn;
pub mod wrapper;

pub use exporter::{ExportOptions, ExportStats, VcsExporter};
pub use git::{GitBootstrap, GitWrapper};
pub use svn::{SvnLayout, SvnWrapper};
pub use wrapper::{CommandOutput, CommandRunner, Invocation, ProcessRunner, VcsWrapper};
