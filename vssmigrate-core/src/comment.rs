use crate::models::{ActionType, Changeset};

/// Tallies action types and renders them as `Edit[3], Add`.
#[derive(Debug, Default)]
pub struct CommentBuilder {
    tallies: Vec<(ActionType, usize)>,
    count: usize,
}

impl CommentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, action: ActionType) {
        match self.tallies.iter_mut().find(|(kind, _)| *kind == action) {
            Some((_, n)) => *n += 1,
            None => self.tallies.push((action, 1)),
        }
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Entries appear in order of first occurrence.
    pub fn render(&self) -> String {
        self.tallies
            .iter()
            .map(|(kind, n)| match n {
                1 => kind.to_string(),
                _ => format!("{}[{}]", kind, n),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Synthesizes a message from the changeset's project-level revisions.
    /// Returns `None` when there are none.
    pub fn comment_for(changeset: Option<&Changeset>) -> Option<String> {
        let changeset = changeset?;
        let mut builder = Self::new();
        for revision in changeset.revisions.iter().filter(|r| r.item.is_project) {
            builder.add(revision.action.kind);
        }
        if builder.count() > 0 {
            Some(builder.render())
        } else {
            None
        }
    }
}
