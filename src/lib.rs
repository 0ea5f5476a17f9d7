//! # vssmigrate
//!
//! Converts the history of a Visual SourceSafe database into a Git or
//! Subversion repository, preserving authors, timestamps, grouped commits
//! and labels.
//!
//! The heavy lifting lives in two crates re-exported here:
//! [`core`] reconstructs changesets from per-file revision logs and
//! [`vcs`] replays them against a target version control system.

pub use vssmigrate_core as core;
pub use vssmigrate_vcs as vcs;
