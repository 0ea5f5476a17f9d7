use crate::error::{Error, Result};
use crate::models::{Changeset, Revision};
use crate::queue::TaskQueue;
use crate::source::{ItemHistory, RevisionSource};
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, SubsecRound, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// The time zone source timestamps were recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceZone {
    Local,
    Utc,
    Fixed(FixedOffset),
}

impl SourceZone {
    /// Parses `local`, `utc` or an offset such as `+02:00` / `-0530`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "local" => return Some(SourceZone::Local),
            "utc" | "z" => return Some(SourceZone::Utc),
            _ => {}
        }

        let (sign, rest) = match s.as_bytes().first()? {
            b'+' => (1, &s[1..]),
            b'-' => (-1, &s[1..]),
            _ => return None,
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).map(SourceZone::Fixed)
    }

    /// Converts a source-local time to UTC, truncated to whole seconds as
    /// the target repositories store them. Ambiguous local times (clocks
    /// turned back) resolve to the earlier instant; local times skipped by a
    /// forward transition are moved one hour later.
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let utc = match self {
            SourceZone::Local => resolve(&Local, local),
            SourceZone::Utc => Utc.from_utc_datetime(&local),
            SourceZone::Fixed(offset) => resolve(offset, local),
        };
        utc.trunc_subsecs(0)
    }
}

impl Default for SourceZone {
    fn default() -> Self {
        SourceZone::Local
    }
}

fn resolve<Tz: TimeZone>(zone: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| zone.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

/// Merges per-item histories into one map ordered by UTC time. Revisions
/// sharing a timestamp keep the order they were read in.
pub fn merge_revisions(
    histories: Vec<ItemHistory>,
    zone: SourceZone,
) -> BTreeMap<DateTime<Utc>, Vec<Revision>> {
    let mut merged: BTreeMap<DateTime<Utc>, Vec<Revision>> = BTreeMap::new();
    for history in histories {
        for revision in history.revisions {
            merged
                .entry(zone.to_utc(revision.timestamp))
                .or_default()
                .push(revision);
        }
    }
    merged
}

/// Shared, growable list of built changesets. The build task fills it; the
/// export task and progress displays read it.
#[derive(Clone, Default)]
pub struct ChangesetList {
    inner: Arc<Mutex<Vec<Changeset>>>,
}

impl ChangesetList {
    fn lock(&self) -> MutexGuard<'_, Vec<Changeset>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<Changeset> {
        self.lock().clone()
    }

    fn replace(&self, changesets: Vec<Changeset>) {
        *self.lock() = changesets;
    }
}

impl From<Vec<Changeset>> for ChangesetList {
    fn from(changesets: Vec<Changeset>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(changesets)),
        }
    }
}

/// Groups time-ordered revisions into changesets.
///
/// A revision joins the open changeset when it has the same author, is no
/// more than `any_comment_threshold` after the changeset's latest member,
/// and either carries the same comment as that member or is within
/// `same_comment_threshold` of it. A zero threshold disables the rule it
/// governs, so a zero `any_comment_threshold` yields one changeset per
/// revision.
#[derive(Debug, Clone)]
pub struct ChangesetBuilder {
    any_comment_threshold: Duration,
    same_comment_threshold: Duration,
    same_comment_inclusive: bool,
    zone: SourceZone,
}

impl Default for ChangesetBuilder {
    fn default() -> Self {
        Self {
            any_comment_threshold: Duration::seconds(30),
            same_comment_threshold: Duration::seconds(600),
            same_comment_inclusive: true,
            zone: SourceZone::Local,
        }
    }
}

impl ChangesetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_any_comment_threshold(mut self, threshold: Duration) -> Self {
        self.any_comment_threshold = threshold;
        self
    }

    pub fn with_same_comment_threshold(mut self, threshold: Duration) -> Self {
        self.same_comment_threshold = threshold;
        self
    }

    /// Whether a gap exactly equal to `same_comment_threshold` still merges
    /// revisions with differing comments.
    pub fn with_same_comment_inclusive(mut self, inclusive: bool) -> Self {
        self.same_comment_inclusive = inclusive;
        self
    }

    pub fn with_zone(mut self, zone: SourceZone) -> Self {
        self.zone = zone;
        self
    }

    pub fn build(&self, histories: Vec<ItemHistory>) -> Vec<Changeset> {
        let merged = merge_revisions(histories, self.zone);
        let mut changesets = Vec::new();
        let mut open: Option<Pending> = None;

        for (time, revisions) in merged {
            for revision in revisions {
                if let Some(pending) = open.take() {
                    if self.joins(&pending, time, &revision) {
                        open = Some(pending);
                    } else {
                        changesets.push(pending.finish());
                    }
                }
                match open.as_mut() {
                    Some(pending) => pending.push(time, revision),
                    None => open = Some(Pending::start(time, revision)),
                }
            }
        }
        if let Some(pending) = open {
            changesets.push(pending.finish());
        }

        changesets
    }

    pub fn build_from(&self, source: &dyn RevisionSource) -> Result<Vec<Changeset>> {
        let histories = source.histories()?;
        let revisions: usize = histories.iter().map(|h| h.revisions.len()).sum();
        let changesets = self.build(histories);
        info!(revisions, changesets = changesets.len(), "Built changesets");
        Ok(changesets)
    }

    /// Enqueues the build on `queue`. The returned list is filled once the
    /// task has run.
    pub fn build_changesets<S>(&self, queue: &TaskQueue, source: S) -> Result<ChangesetList>
    where
        S: RevisionSource + Send + 'static,
    {
        let list = ChangesetList::default();
        let output = list.clone();
        let builder = self.clone();
        queue.enqueue(move |ctx| {
            ctx.set_status("Building changesets");
            let changesets = builder.build_from(&source)?;
            if changesets.is_empty() {
                return Err(Error::InvalidSource("no revisions to convert".to_string()));
            }
            output.replace(changesets);
            Ok(())
        })?;
        Ok(list)
    }

    fn joins(&self, pending: &Pending, time: DateTime<Utc>, revision: &Revision) -> bool {
        if !revision.user.eq_ignore_ascii_case(&pending.user) {
            debug!(user = %revision.user, "Changeset closed: author changed");
            return false;
        }

        let gap = time - pending.last_time;
        if !within(gap, self.any_comment_threshold, true) {
            return false;
        }

        if revision.trimmed_comment() == pending.last_comment.as_deref() {
            return true;
        }
        within(gap, self.same_comment_threshold, self.same_comment_inclusive)
    }
}

fn within(gap: Duration, threshold: Duration, inclusive: bool) -> bool {
    if threshold <= Duration::zero() {
        false
    } else if inclusive {
        gap <= threshold
    } else {
        gap < threshold
    }
}

struct Pending {
    timestamp: DateTime<Utc>,
    user: String,
    comments: Vec<String>,
    revisions: Vec<Revision>,
    last_time: DateTime<Utc>,
    last_comment: Option<String>,
}

impl Pending {
    fn start(time: DateTime<Utc>, revision: Revision) -> Self {
        let mut pending = Self {
            timestamp: time,
            user: revision.user.clone(),
            comments: Vec::new(),
            revisions: Vec::new(),
            last_time: time,
            last_comment: None,
        };
        pending.push(time, revision);
        pending
    }

    fn push(&mut self, time: DateTime<Utc>, revision: Revision) {
        let comment = revision.trimmed_comment().map(str::to_string);
        if let Some(c) = &comment {
            if !self.comments.contains(c) {
                self.comments.push(c.clone());
            }
        }
        self.last_time = time;
        self.last_comment = comment;
        self.revisions.push(revision);
    }

    fn finish(self) -> Changeset {
        let comment = if self.comments.is_empty() {
            None
        } else {
            Some(self.comments.join("\n"))
        };
        Changeset {
            timestamp: self.timestamp,
            user: self.user,
            comment,
            revisions: self.revisions,
        }
    }
}
