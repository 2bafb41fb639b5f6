//! Durable restriction records
//!
//! The restriction store is the source of truth for who is muted or
//! forcebanned, surviving process restarts. It is the only writer of
//! durable state; the coordinator is the sole caller permitted to
//! mutate it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::moderation::error::{ModerationError, ModerationResult};
use crate::moderation::events::Subject;

/// Kind of restriction applied to a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Restrictive role; the subject can no longer send messages
    Mute,
    /// Ingress rejection; the subject's messages are dropped upstream
    Forceban,
}

impl std::fmt::Display for RestrictionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mute => write!(f, "mute"),
            Self::Forceban => write!(f, "forceban"),
        }
    }
}

/// Durable record of one restriction.
///
/// State machine: none -> active on impose, active -> lifted on explicit
/// lift. Re-imposing an active restriction is a no-op, not a transition.
/// There is no automatic expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restriction {
    pub id: String,
    pub subject: Subject,
    pub kind: RestrictionKind,
    pub imposed_by: u64,
    pub reason: String,
    pub evidence_count: u64,
    pub imposed_at: DateTime<Utc>,
    pub lifted_at: Option<DateTime<Utc>>,
}

impl Restriction {
    #[must_use]
    pub fn new(
        subject: Subject,
        kind: RestrictionKind,
        imposed_by: u64,
        reason: impl Into<String>,
        evidence_count: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject,
            kind,
            imposed_by,
            reason: reason.into(),
            evidence_count,
            imposed_at: Utc::now(),
            lifted_at: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lifted_at.is_none()
    }
}

/// Outcome of an impose call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImposeOutcome {
    /// A new restriction was recorded
    Applied,
    /// An active restriction of this kind already exists; no new row
    AlreadyActive,
}

/// Outcome of a lift call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftOutcome {
    Lifted,
    NotFound,
}

/// Durable store of active and historical restrictions.
///
/// Active records are unique per (subject, kind); the map entry is the
/// atomic claim that makes concurrent impose calls yield exactly one
/// `Applied`. Every mutation is written through to a YAML file so
/// `is_active` is correct immediately after a restart.
#[derive(Debug)]
pub struct RestrictionStore {
    path: PathBuf,
    active: DashMap<(Subject, RestrictionKind), Restriction>,
    history: DashMap<String, Restriction>,
    /// Serializes writers; snapshots are taken under this lock so the
    /// last write to land always contains every earlier record
    write_lock: tokio::sync::Mutex<()>,
}

impl RestrictionStore {
    /// Open the store at `path`, loading any existing records
    pub async fn open(path: impl Into<PathBuf>) -> ModerationResult<Self> {
        let path = path.into();
        let store = Self {
            path,
            active: DashMap::new(),
            history: DashMap::new(),
            write_lock: tokio::sync::Mutex::new(()),
        };

        match tokio::fs::read_to_string(&store.path).await {
            Ok(contents) => {
                let records: Vec<Restriction> = serde_yaml::from_str(&contents)?;
                for record in records {
                    if record.is_active() {
                        store.active.insert((record.subject, record.kind), record);
                    } else {
                        store.history.insert(record.id.clone(), record);
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(ModerationError::Storage(err)),
        }

        Ok(store)
    }

    /// Record a restriction, idempotently.
    ///
    /// Returns `AlreadyActive` without touching storage when an active
    /// restriction of this kind exists. A write failure rolls the
    /// in-memory claim back and surfaces as a retryable error.
    pub async fn impose(
        &self,
        subject: Subject,
        kind: RestrictionKind,
        imposed_by: u64,
        reason: &str,
        evidence_count: u64,
    ) -> ModerationResult<ImposeOutcome> {
        let record_id = {
            match self.active.entry((subject, kind)) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Ok(ImposeOutcome::AlreadyActive);
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let record =
                        Restriction::new(subject, kind, imposed_by, reason, evidence_count);
                    let id = record.id.clone();
                    slot.insert(record);
                    id
                }
            }
            // Entry guard dropped here; persistence never holds the lock.
        };

        if let Err(err) = self.persist().await {
            self.active
                .remove_if(&(subject, kind), |_, record| record.id == record_id);
            return Err(err);
        }

        info!(
            subject = %subject,
            kind = %kind,
            imposed_by,
            reason,
            evidence_count,
            "restriction recorded"
        );
        Ok(ImposeOutcome::Applied)
    }

    /// Lift an active restriction, moving it into history
    pub async fn lift(
        &self,
        subject: Subject,
        kind: RestrictionKind,
    ) -> ModerationResult<LiftOutcome> {
        let Some((_, mut record)) = self.active.remove(&(subject, kind)) else {
            return Ok(LiftOutcome::NotFound);
        };
        record.lifted_at = Some(Utc::now());
        self.history.insert(record.id.clone(), record.clone());

        if let Err(err) = self.persist().await {
            self.history.remove(&record.id);
            record.lifted_at = None;
            self.active.insert((subject, kind), record);
            return Err(err);
        }

        info!(subject = %subject, kind = %kind, "restriction lifted");
        Ok(LiftOutcome::Lifted)
    }

    /// Whether an active restriction of `kind` exists for `subject`
    #[must_use]
    pub fn is_active(&self, subject: Subject, kind: RestrictionKind) -> bool {
        self.active.contains_key(&(subject, kind))
    }

    /// Snapshot of the active restriction, if any
    #[must_use]
    pub fn get_active(&self, subject: Subject, kind: RestrictionKind) -> Option<Restriction> {
        self.active
            .get(&(subject, kind))
            .map(|entry| entry.value().clone())
    }

    /// All active restrictions for a guild
    #[must_use]
    pub fn active_for_guild(&self, guild_id: u64) -> Vec<Restriction> {
        self.active
            .iter()
            .filter(|entry| entry.value().subject.guild_id == guild_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// In-memory store backed by a throwaway path
    #[cfg(test)]
    pub(crate) fn empty_for_tests() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("chat-warden-test-{}.yaml", Uuid::new_v4())),
            active: DashMap::new(),
            history: DashMap::new(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Write the full record set out. The snapshot happens under the
    /// write lock, and the file is replaced via temp-file rename so a
    /// crash mid-write leaves the previous contents intact.
    async fn persist(&self) -> ModerationResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut records: Vec<Restriction> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .chain(self.history.iter().map(|entry| entry.value().clone()))
            .collect();
        records.sort_by(|a, b| a.imposed_at.cmp(&b.imposed_at));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let yaml = serde_yaml::to_string(&records)?;
        let tmp = self.path.with_extension("yaml.tmp");
        tokio::fs::write(&tmp, yaml).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("chat-warden-restrictions-{}.yaml", Uuid::new_v4()))
    }

    fn subject() -> Subject {
        Subject::new(67890, 12345)
    }

    #[tokio::test]
    async fn test_impose_is_idempotent() {
        let path = temp_path();
        let store = RestrictionStore::open(&path).await.expect("open");

        let first = store
            .impose(subject(), RestrictionKind::Mute, 1, "message flood", 6)
            .await
            .expect("impose");
        assert_eq!(first, ImposeOutcome::Applied);

        let second = store
            .impose(subject(), RestrictionKind::Mute, 1, "message flood", 7)
            .await
            .expect("impose");
        assert_eq!(second, ImposeOutcome::AlreadyActive);

        // The original record is untouched.
        let record = store
            .get_active(subject(), RestrictionKind::Mute)
            .expect("active");
        assert_eq!(record.evidence_count, 6);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let path = temp_path();
        let store = RestrictionStore::open(&path).await.expect("open");

        store
            .impose(subject(), RestrictionKind::Mute, 1, "caps spam", 1)
            .await
            .expect("impose");
        assert!(!store.is_active(subject(), RestrictionKind::Forceban));

        let outcome = store
            .impose(subject(), RestrictionKind::Forceban, 1, "repeat offender", 1)
            .await
            .expect("impose");
        assert_eq!(outcome, ImposeOutcome::Applied);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_lift_then_reimpose_is_fresh() {
        let path = temp_path();
        let store = RestrictionStore::open(&path).await.expect("open");

        store
            .impose(subject(), RestrictionKind::Mute, 1, "link sharing", 1)
            .await
            .expect("impose");

        let lifted = store
            .lift(subject(), RestrictionKind::Mute)
            .await
            .expect("lift");
        assert_eq!(lifted, LiftOutcome::Lifted);
        assert!(!store.is_active(subject(), RestrictionKind::Mute));

        let again = store
            .lift(subject(), RestrictionKind::Mute)
            .await
            .expect("lift");
        assert_eq!(again, LiftOutcome::NotFound);

        let outcome = store
            .impose(subject(), RestrictionKind::Mute, 1, "link sharing", 1)
            .await
            .expect("impose");
        assert_eq!(outcome, ImposeOutcome::Applied);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let path = temp_path();
        {
            let store = RestrictionStore::open(&path).await.expect("open");
            store
                .impose(subject(), RestrictionKind::Forceban, 99, "raid actor", 5)
                .await
                .expect("impose");
            store
                .impose(
                    Subject::new(67890, 22222),
                    RestrictionKind::Mute,
                    99,
                    "flood",
                    6,
                )
                .await
                .expect("impose");
            store
                .lift(Subject::new(67890, 22222), RestrictionKind::Mute)
                .await
                .expect("lift");
        }

        // A fresh process sees the same truth.
        let store = RestrictionStore::open(&path).await.expect("reopen");
        assert!(store.is_active(subject(), RestrictionKind::Forceban));
        assert!(!store.is_active(Subject::new(67890, 22222), RestrictionKind::Mute));

        let record = store
            .get_active(subject(), RestrictionKind::Forceban)
            .expect("active");
        assert_eq!(record.imposed_by, 99);
        assert_eq!(record.reason, "raid actor");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_concurrent_impose_yields_exactly_one_applied() {
        let path = temp_path();
        let store = Arc::new(RestrictionStore::open(&path).await.expect("open"));

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .impose(subject(), RestrictionKind::Mute, 1, "flood", 6)
                    .await
            })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .impose(subject(), RestrictionKind::Mute, 1, "flood", 6)
                    .await
            })
        };

        let outcomes = [
            a.await.expect("join").expect("impose"),
            b.await.expect("join").expect("impose"),
        ];
        let applied = outcomes
            .iter()
            .filter(|o| **o == ImposeOutcome::Applied)
            .count();
        assert_eq!(applied, 1);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_concurrent_imposes_for_different_subjects_all_persist() {
        let path = temp_path();
        let store = Arc::new(RestrictionStore::open(&path).await.expect("open"));

        let mut tasks = Vec::new();
        for user_id in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .impose(
                        Subject::new(67890, user_id),
                        RestrictionKind::Mute,
                        1,
                        "flood",
                        6,
                    )
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(
                task.await.expect("join").expect("impose"),
                ImposeOutcome::Applied
            );
        }

        // No write may clobber another; a fresh open sees every record.
        let reopened = RestrictionStore::open(&path).await.expect("reopen");
        for user_id in 0..8 {
            assert!(reopened.is_active(Subject::new(67890, user_id), RestrictionKind::Mute));
        }

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_persist_replaces_file_whole() {
        let path = temp_path();
        let store = RestrictionStore::open(&path).await.expect("open");

        store
            .impose(subject(), RestrictionKind::Mute, 1, "flood", 6)
            .await
            .expect("impose");
        store
            .impose(subject(), RestrictionKind::Forceban, 1, "repeat offender", 1)
            .await
            .expect("impose");

        // The temp file never outlives a successful write, and what is
        // on disk is always a complete, parseable record set.
        assert!(!path.with_extension("yaml.tmp").exists());
        let contents = tokio::fs::read_to_string(&path).await.expect("read");
        let records: Vec<Restriction> = serde_yaml::from_str(&contents).expect("parse");
        assert_eq!(records.len(), 2);

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_active_for_guild_filters() {
        let path = temp_path();
        let store = RestrictionStore::open(&path).await.expect("open");

        store
            .impose(subject(), RestrictionKind::Mute, 1, "flood", 6)
            .await
            .expect("impose");
        store
            .impose(Subject::new(11111, 12345), RestrictionKind::Mute, 1, "flood", 6)
            .await
            .expect("impose");

        assert_eq!(store.active_for_guild(67890).len(), 1);
        assert_eq!(store.active_for_guild(11111).len(), 1);
        assert_eq!(store.active_for_guild(1).len(), 0);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
