//! Violation detection and enforcement pipeline
//!
//! Events flow from the gateway handlers through the classifier (backed
//! by per-subject sliding windows) or the audit-log correlator, and any
//! resulting violation is handed to the enforcement coordinator, which
//! records and applies restrictions exactly once per active spell.

mod audit;
mod classifier;
mod coordinator;
pub mod discord;
mod error;
mod events;
mod restriction;
mod window;

pub use audit::{AuditLogCorrelator, LOOKBACK_LIMIT};
pub use classifier::{RuleConfig, Violation, ViolationClassifier, ViolationKind};
pub use coordinator::{DEFAULT_EXTERNAL_TIMEOUT, EnforcementCoordinator, Outcome};
pub use error::{ModerationError, ModerationResult};
pub use events::{
    ActionKind, AuditEntry, AuditFeed, AuditSink, Enforcer, MemberRemovedEvent, MessageEvent,
    ModLogEntry, RoleChangedEvent, Subject,
};
pub use restriction::{
    ImposeOutcome, LiftOutcome, Restriction, RestrictionKind, RestrictionStore,
};
pub use window::{Category, CounterKey, SlidingWindowCounter};
