use crate::error::Result;
use crate::models::{Item, Revision};
use std::collections::HashMap;

/// The revisions recorded against one item, oldest first.
#[derive(Debug, Clone)]
pub struct ItemHistory {
    pub item: Item,
    pub revisions: Vec<Revision>,
}

/// Supplies per-item revision histories read from the legacy database.
pub trait RevisionSource {
    fn histories(&self) -> Result<Vec<ItemHistory>>;
}

/// Supplies file contents for revisions that put a file into the tree.
pub trait ContentSource: Send {
    fn file_content(&self, revision: &Revision) -> Result<Option<Vec<u8>>>;
}

/// An in-memory source, handy for small conversions and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    histories: Vec<ItemHistory>,
    contents: HashMap<(String, u32), Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a revision to the history of `revision.item`, keeping the
    /// order in which revisions were pushed.
    pub fn push(&mut self, revision: Revision) {
        match self
            .histories
            .iter_mut()
            .find(|h| h.item.physical == revision.item.physical)
        {
            Some(history) => history.revisions.push(revision),
            None => self.histories.push(ItemHistory {
                item: revision.item.clone(),
                revisions: vec![revision],
            }),
        }
    }

    pub fn push_with_content(&mut self, revision: Revision, content: impl Into<Vec<u8>>) {
        self.contents.insert(
            (revision.item.physical.clone(), revision.version),
            content.into(),
        );
        self.push(revision);
    }
}

impl RevisionSource for MemorySource {
    fn histories(&self) -> Result<Vec<ItemHistory>> {
        Ok(self.histories.clone())
    }
}

impl ContentSource for MemorySource {
    fn file_content(&self, revision: &Revision) -> Result<Option<Vec<u8>>> {
        Ok(self
            .contents
            .get(&(revision.item.physical.clone(), revision.version))
            .cloned())
    }
}
