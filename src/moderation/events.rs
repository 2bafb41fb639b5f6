//! Boundary types between the gateway and the moderation pipeline
//!
//! The pipeline never talks to Discord directly; it sees events in the
//! shapes below and reaches the platform through the [`Enforcer`],
//! [`AuditFeed`], and [`AuditSink`] traits. The Discord-backed
//! implementations live in [`crate::moderation::discord`].

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::moderation::error::ModerationResult;
use crate::moderation::restriction::RestrictionKind;

/// The (community, actor) pair being tracked or restricted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub guild_id: u64,
    pub user_id: u64,
}

impl Subject {
    #[must_use]
    pub fn new(guild_id: u64, user_id: u64) -> Self {
        Self { guild_id, user_id }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.guild_id)
    }
}

/// Kind of state change attributed through the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Kick,
    Ban,
    RoleCreate,
    RoleDelete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kick => write!(f, "kick"),
            Self::Ban => write!(f, "ban"),
            Self::RoleCreate => write!(f, "role create"),
            Self::RoleDelete => write!(f, "role delete"),
        }
    }
}

/// A message delivered from the chat gateway.
///
/// Delivery is at-least-once with no ordering guarantee, so window
/// membership is decided by `timestamp`, never by arrival order.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub author: Subject,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A member left or was removed from a guild
#[derive(Debug, Clone)]
pub struct MemberRemovedEvent {
    pub target: Subject,
    pub observed_at: DateTime<Utc>,
}

/// A role was created or deleted in a guild
#[derive(Debug, Clone)]
pub struct RoleChangedEvent {
    pub kind: ActionKind,
    pub guild_id: u64,
    pub observed_at: DateTime<Utc>,
}

/// One entry retrieved from the platform's audit trail
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Platform-assigned entry id; strictly increasing over time
    pub id: u64,
    /// Who performed the action
    pub actor_id: u64,
    /// Who or what the action was applied to, when the kind has a target
    pub target_id: Option<u64>,
    /// Whether the actor holds administrative privilege
    pub actor_is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// An append-only record of one enforcement decision, for human review
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModLogEntry {
    /// Who caused the action (bot user for automated enforcement)
    pub actor_id: u64,
    pub subject: Subject,
    pub action: String,
    pub reason: String,
    pub evidence_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// External enforcement actor: the platform's role/ban mutation API.
///
/// Calls may fail with `PermissionDenied`, `SubjectGone`, or transient
/// variants; the coordinator classifies and isolates those per event.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Enforcer: Send + Sync {
    /// Grant the restrictive (muted) role to the subject
    async fn grant_restrictive_role(&self, subject: Subject) -> ModerationResult<()>;

    /// Remove the restrictive role from the subject
    async fn revoke_restrictive_role(&self, subject: Subject) -> ModerationResult<()>;

    /// Reject all future ingress from the subject (platform ban)
    async fn reject_ingress(&self, subject: Subject) -> ModerationResult<()>;

    /// Allow the subject back in (platform unban)
    async fn restore_ingress(&self, subject: Subject) -> ModerationResult<()>;

    /// Whether the external effect for `kind` is currently applied.
    /// Used by the reconcile read-path, never by the hot event path.
    async fn is_restricted(&self, subject: Subject, kind: RestrictionKind)
    -> ModerationResult<bool>;
}

/// Read-only, paginated, eventually consistent audit retrieval API
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditFeed: Send + Sync {
    /// Fetch up to `limit` recent entries of `kind`, newest first
    async fn fetch_recent_entries(
        &self,
        guild_id: u64,
        kind: ActionKind,
        limit: u8,
    ) -> ModerationResult<Vec<AuditEntry>>;
}

/// Append-only sink recording enforcement decisions for human review
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &ModLogEntry) -> ModerationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_display() {
        let subject = Subject::new(11111, 12345);
        assert_eq!(subject.to_string(), "12345@11111");
    }

    #[test]
    fn test_subject_roundtrip() {
        let subject = Subject::new(1, 2);
        let yaml = serde_yaml::to_string(&subject).expect("serialize");
        let back: Subject = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(subject, back);
    }

    #[test]
    fn test_action_kind_display() {
        assert_eq!(ActionKind::Kick.to_string(), "kick");
        assert_eq!(ActionKind::RoleDelete.to_string(), "role delete");
    }
}
