//! Enforcement coordination
//!
//! Receives classified violations, claims the restriction in the durable
//! store, invokes the external enforcement actor, and records the
//! outcome. The store claim and the external call are two separate
//! fallible operations; a crash between them is healed by the reconcile
//! read-path on the next evaluation rather than by cross-system
//! transactions.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::moderation::classifier::Violation;
use crate::moderation::error::{ModerationError, ModerationResult};
use crate::moderation::events::{AuditSink, Enforcer, ModLogEntry, Subject};
use crate::moderation::restriction::{
    ImposeOutcome, LiftOutcome, RestrictionKind, RestrictionStore,
};

/// Default bound on any single external platform call
pub const DEFAULT_EXTERNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of handling one violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Restriction recorded and external effect applied
    Applied,
    /// An equivalent restriction was already active; idempotent no-op
    SkippedAlreadyActive,
    /// The external actor refused or never answered; logged, not retried
    Failed,
}

/// Orchestrates the restriction store and the external enforcement actor
pub struct EnforcementCoordinator<E, S> {
    store: Arc<RestrictionStore>,
    enforcer: E,
    sink: S,
    external_timeout: Duration,
}

impl<E: Enforcer, S: AuditSink> EnforcementCoordinator<E, S> {
    pub fn new(store: Arc<RestrictionStore>, enforcer: E, sink: S) -> Self {
        Self {
            store,
            enforcer,
            sink,
            external_timeout: DEFAULT_EXTERNAL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.external_timeout = timeout;
        self
    }

    /// Handle a classified violation.
    ///
    /// Every violation kind maps to a mute of the violating subject; for
    /// raid violations the subject is already the audit-attributed
    /// actor, not the kicked or banned target. Failures are isolated:
    /// this never panics and never propagates an error into the event
    /// loop.
    pub async fn handle(&self, violation: &Violation, imposed_by: u64) -> Outcome {
        self.impose(
            violation.subject,
            RestrictionKind::Mute,
            imposed_by,
            &violation.kind.reason(),
            violation.evidence_count,
        )
        .await
    }

    /// Record and apply a restriction, exactly once per active spell.
    ///
    /// The store's impose is the atomic claim that serializes concurrent
    /// attempts for one subject; the external call runs afterwards with
    /// no per-subject lock held.
    pub async fn impose(
        &self,
        subject: Subject,
        kind: RestrictionKind,
        imposed_by: u64,
        reason: &str,
        evidence_count: u64,
    ) -> Outcome {
        let claimed = self
            .store
            .impose(subject, kind, imposed_by, reason, evidence_count)
            .await;

        match claimed {
            Err(err) => {
                error!(
                    subject = %subject,
                    kind = %kind,
                    transient = err.is_transient(),
                    error = %err,
                    "failed to record restriction"
                );
                Outcome::Failed
            }
            Ok(ImposeOutcome::AlreadyActive) => {
                info!(
                    subject = %subject,
                    kind = %kind,
                    evidence_count,
                    "restriction already active, skipped"
                );
                // Self-heal: the record may predate a crash that lost the
                // external effect.
                self.reconcile(subject, kind).await;
                Outcome::SkippedAlreadyActive
            }
            Ok(ImposeOutcome::Applied) => match self.apply_external(subject, kind).await {
                Ok(()) => {
                    self.log_decision(subject, kind.to_string(), imposed_by, reason, evidence_count)
                        .await;
                    Outcome::Applied
                }
                Err(ModerationError::SubjectGone(_)) => {
                    // The subject left between detection and enforcement;
                    // the durable record stands for their return.
                    warn!(
                        subject = %subject,
                        kind = %kind,
                        "subject gone before enforcement, recorded anyway"
                    );
                    self.log_decision(subject, kind.to_string(), imposed_by, reason, evidence_count)
                        .await;
                    Outcome::Applied
                }
                Err(err) => {
                    error!(
                        subject = %subject,
                        kind = %kind,
                        transient = err.is_transient(),
                        error = %err,
                        "external enforcement failed; restriction stays recorded"
                    );
                    Outcome::Failed
                }
            },
        }
    }

    /// Lift a restriction and reverse its external effect.
    ///
    /// A failed external reversal is logged but does not resurrect the
    /// record; the durable state is authoritative.
    pub async fn lift(
        &self,
        subject: Subject,
        kind: RestrictionKind,
        lifted_by: u64,
    ) -> ModerationResult<LiftOutcome> {
        match self.store.lift(subject, kind).await? {
            LiftOutcome::NotFound => Ok(LiftOutcome::NotFound),
            LiftOutcome::Lifted => {
                match self.revoke_external(subject, kind).await {
                    Ok(()) | Err(ModerationError::SubjectGone(_)) => {}
                    Err(err) => {
                        error!(
                            subject = %subject,
                            kind = %kind,
                            error = %err,
                            "external reversal failed"
                        );
                    }
                }
                let action = match kind {
                    RestrictionKind::Mute => "unmute",
                    RestrictionKind::Forceban => "unban",
                };
                self.log_decision(subject, action.to_string(), lifted_by, "lifted", 0)
                    .await;
                Ok(LiftOutcome::Lifted)
            }
        }
    }

    /// Re-apply the external effect when the durable record says active
    /// but the platform disagrees. Best-effort; errors are logged only.
    async fn reconcile(&self, subject: Subject, kind: RestrictionKind) {
        if !self.store.is_active(subject, kind) {
            return;
        }
        match self.check_external(subject, kind).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    subject = %subject,
                    kind = %kind,
                    "recorded restriction missing on platform, re-applying"
                );
                if let Err(err) = self.apply_external(subject, kind).await {
                    error!(subject = %subject, kind = %kind, error = %err, "reconcile failed");
                }
            }
            Err(err) => {
                warn!(subject = %subject, kind = %kind, error = %err, "reconcile check failed");
            }
        }
    }

    async fn apply_external(&self, subject: Subject, kind: RestrictionKind) -> ModerationResult<()> {
        let call = match kind {
            RestrictionKind::Mute => self.enforcer.grant_restrictive_role(subject),
            RestrictionKind::Forceban => self.enforcer.reject_ingress(subject),
        };
        self.bounded(call).await
    }

    async fn revoke_external(
        &self,
        subject: Subject,
        kind: RestrictionKind,
    ) -> ModerationResult<()> {
        let call = match kind {
            RestrictionKind::Mute => self.enforcer.revoke_restrictive_role(subject),
            RestrictionKind::Forceban => self.enforcer.restore_ingress(subject),
        };
        self.bounded(call).await
    }

    async fn check_external(
        &self,
        subject: Subject,
        kind: RestrictionKind,
    ) -> ModerationResult<bool> {
        self.bounded(self.enforcer.is_restricted(subject, kind))
            .await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = ModerationResult<T>>,
    ) -> ModerationResult<T> {
        tokio::time::timeout(self.external_timeout, call)
            .await
            .map_err(|_| ModerationError::Timeout(self.external_timeout))?
    }

    async fn log_decision(
        &self,
        subject: Subject,
        action: String,
        actor_id: u64,
        reason: &str,
        evidence_count: u64,
    ) {
        let entry = ModLogEntry {
            actor_id,
            subject,
            action,
            reason: reason.to_string(),
            evidence_count,
            timestamp: chrono::Utc::now(),
        };
        if let Err(err) = self.sink.append(&entry).await {
            warn!(subject = %subject, error = %err, "audit sink append failed");
        }
    }
}
