use crate::error::Result;
use crate::models::Identity;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Username to identity mapping read from a `key = value` properties file.
///
/// Values are either `Full Name <email>` or a bare `email`. Lines starting
/// with `#`, blank lines and lines without `=` are ignored.
#[derive(Debug, Default, Clone)]
pub struct EmailMap {
    entries: BTreeMap<String, String>,
}

impl EmailMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }
        Self { entries }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Loads the map if the file exists. A missing or unreadable file yields
    /// an empty map.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Email map not found");
            return Self::default();
        }
        match Self::load(path) {
            Ok(map) => {
                info!(path = %path.display(), entries = map.len(), "Read email map");
                map
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read email map");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, user: &str, value: impl Into<String>) {
        self.entries.insert(user.to_lowercase(), value.into());
    }

    /// Adds an empty entry for every user not mapped yet. Returns how many
    /// were added.
    pub fn add_unmapped<I, S>(&mut self, users: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for user in users {
            let key = user.as_ref().to_lowercase();
            if !self.entries.contains_key(&key) {
                self.entries.insert(key, String::new());
                added += 1;
            }
        }
        added
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(&format!("{} = {}\n", key, value));
        }
        out
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.render())?;
        Ok(())
    }

    /// Maps a username to its identity, falling back to `user@domain`.
    pub fn resolve(&self, user: &str, email_domain: &str) -> Identity {
        let fallback = || Identity::new(user, format!("{}@{}", user.to_lowercase(), email_domain));
        let value = match self.entries.get(&user.to_lowercase()) {
            Some(v) if !v.is_empty() => v,
            _ => return fallback(),
        };

        match (value.rfind('<'), value.ends_with('>')) {
            (Some(open), true) => {
                let name = value[..open].trim();
                let email = value[open + 1..value.len() - 1].trim();
                let name = if name.is_empty() { user } else { name };
                Identity::new(name, email)
            }
            _ => Identity::new(user, value.as_str()),
        }
    }
}
