use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tracked file or folder. Identity is the physical id; the logical path
/// may change over the item's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub physical: String,
    pub path: String,
    #[serde(default)]
    pub is_project: bool,
}

impl Item {
    pub fn file(physical: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            physical: physical.into(),
            path: path.into(),
            is_project: false,
        }
    }

    pub fn project(physical: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            physical: physical.into(),
            path: path.into(),
            is_project: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Add,
    Delete,
    Rename,
    MoveFrom,
    MoveTo,
    #[serde(alias = "checkin")]
    Edit,
    Share,
    Branch,
    Label,
    Destroy,
    Recover,
    Restore,
}

impl ActionType {
    pub fn as_str(&self) -> &str {
        match self {
            ActionType::Add => "Add",
            ActionType::Delete => "Delete",
            ActionType::Rename => "Rename",
            ActionType::MoveFrom => "MoveFrom",
            ActionType::MoveTo => "MoveTo",
            ActionType::Edit => "Edit",
            ActionType::Share => "Share",
            ActionType::Branch => "Branch",
            ActionType::Label => "Label",
            ActionType::Destroy => "Destroy",
            ActionType::Recover => "Recover",
            ActionType::Restore => "Restore",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a revision did. `target` is the item acted upon, which for
/// project-level revisions is usually a child of the revision's item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionType,
    pub target: Item,
    /// New path for Rename/MoveTo, source path for MoveFrom/Share/Branch.
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Action {
    pub fn new(kind: ActionType, target: Item) -> Self {
        Self {
            kind,
            target,
            secondary: None,
            label: None,
        }
    }

    pub fn with_secondary(mut self, path: impl Into<String>) -> Self {
        self.secondary = Some(path.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// One change to one item at one instant, exactly as read from the source.
/// The timestamp is source-local; it is normalized when changesets are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub timestamp: NaiveDateTime,
    pub user: String,
    pub item: Item,
    pub version: u32,
    #[serde(default)]
    pub comment: Option<String>,
    pub action: Action,
}

impl Revision {
    pub fn new(timestamp: NaiveDateTime, user: impl Into<String>, item: Item, action: Action) -> Self {
        Self {
            timestamp,
            user: user.into(),
            item,
            version: 1,
            comment: None,
            action,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// The comment with surrounding whitespace removed; blank comments read
    /// as absent.
    pub fn trimmed_comment(&self) -> Option<&str> {
        self.comment
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// A group of revisions committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    /// UTC time of the first revision in the group.
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub comment: Option<String>,
    pub revisions: Vec<Revision>,
}

impl Changeset {
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

/// A commit author or tagger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
