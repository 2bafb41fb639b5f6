//! Audit-trail correlation
//!
//! The platform's audit log is only eventually consistent with the
//! gateway event that triggered it, so attribution is a best-effort
//! bounded lookback: one retrieval per invocation, no wait/retry loop.
//! A per-(guild, action kind) cursor deduplicates entries already seen
//! across repeated event deliveries.

use dashmap::DashMap;
use tracing::debug;

use crate::moderation::error::ModerationResult;
use crate::moderation::events::{ActionKind, AuditFeed, Subject};

/// How many recent entries one correlation attempt inspects
pub const LOOKBACK_LIMIT: u8 = 5;

/// Attributes state changes to their causing actor via the audit trail
#[derive(Debug, Default)]
pub struct AuditLogCorrelator {
    /// Highest entry id consumed per (guild, action kind); monotonic
    cursors: DashMap<(u64, ActionKind), u64>,
}

impl AuditLogCorrelator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute an action of `kind` in `guild_id` to its actor.
    ///
    /// Inspects a bounded window of recent entries, keeps those matching
    /// `target_id` (when the kind has a target), skips entries at or
    /// below the cursor, and returns the actor of the newest remaining
    /// entry. Administrator-performed entries are consumed but never
    /// returned; `None` means no attributable non-admin entry was found.
    pub async fn correlate<F: AuditFeed + ?Sized>(
        &self,
        feed: &F,
        guild_id: u64,
        target_id: Option<u64>,
        kind: ActionKind,
    ) -> ModerationResult<Option<Subject>> {
        let entries = feed
            .fetch_recent_entries(guild_id, kind, LOOKBACK_LIMIT)
            .await?;

        let cursor = self
            .cursors
            .get(&(guild_id, kind))
            .map_or(0, |entry| *entry.value());

        let newest = entries
            .iter()
            .filter(|entry| entry.id > cursor)
            .filter(|entry| match target_id {
                Some(target) => entry.target_id == Some(target),
                None => true,
            })
            .max_by_key(|entry| entry.id);

        let Some(entry) = newest else {
            debug!(
                guild_id,
                action = %kind,
                cursor,
                "no unconsumed audit entry matched"
            );
            return Ok(None);
        };

        self.advance_cursor(guild_id, kind, entry.id);

        if entry.actor_is_admin {
            // Administrator-performed moderation is trusted; the caller
            // never sees it.
            debug!(
                guild_id,
                action = %kind,
                actor_id = entry.actor_id,
                "audit entry performed by administrator, skipped"
            );
            return Ok(None);
        }

        Ok(Some(Subject::new(guild_id, entry.actor_id)))
    }

    /// Monotonic cursor update; stale ids never move it backwards
    fn advance_cursor(&self, guild_id: u64, kind: ActionKind, entry_id: u64) {
        let mut cursor = self.cursors.entry((guild_id, kind)).or_insert(0);
        if entry_id > *cursor {
            *cursor = entry_id;
        }
    }
}
