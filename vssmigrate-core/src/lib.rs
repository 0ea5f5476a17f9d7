//! # vssmigrate-core
//!
//! Core library for vssmigrate - revision history and changeset
//! reconstruction.
//!
//! This crate holds the data model for items and revisions read from a
//! SourceSafe database, the SQLite history store, the engine that groups
//! per-file revisions into changesets, and the single-worker task queue
//! that every long-running step is scheduled on.

pub mod changeset;
pub mod comment;
pub mod emails;
pub mod error;
pub mod import;
pub mod models;
pub mod queue;
pub mod source;
pub mod storage;

pub use changeset::{merge_revisions, ChangesetBuilder, ChangesetList, SourceZone};
pub use comment::CommentBuilder;
pub use emails::EmailMap;
pub use error::{Error, Result};
pub use import::{import_jsonl, ImportStats};
pub use models::{Action, ActionType, Changeset, Identity, Item, Revision};
pub use queue::{QueueState, TaskContext, TaskQueue};
pub use source::{ContentSource, ItemHistory, MemorySource, RevisionSource};
pub use storage::Storage;
