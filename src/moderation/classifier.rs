//! Stateless rule evaluation
//!
//! Turns an incoming event plus counter state into zero or one
//! [`Violation`]. Evaluation order is observable behavior: flood first,
//! then profanity, link, excessive caps, returning on the first match.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::moderation::events::{ActionKind, MessageEvent, Subject};
use crate::moderation::window::{CounterKey, SlidingWindowCounter};

/// Why a subject is being enforced against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// Too many messages inside the flood window
    Flood,
    /// Message contained a banned term
    Profanity,
    /// Message contained a link
    Link,
    /// Message was mostly uppercase
    CapsSpam,
    /// Rapid moderation actions attributed to a non-admin actor
    Raid(ActionKind),
}

impl ViolationKind {
    /// Human-readable reason recorded on the resulting restriction
    #[must_use]
    pub fn reason(self) -> String {
        match self {
            Self::Flood => "message flood".to_string(),
            Self::Profanity => "banned term".to_string(),
            Self::Link => "link sharing".to_string(),
            Self::CapsSpam => "caps spam".to_string(),
            Self::Raid(kind) => format!("rapid {kind} actions"),
        }
    }

    /// Whether the triggering message itself should be removed upstream
    #[must_use]
    pub fn removes_content(self) -> bool {
        matches!(self, Self::Profanity | Self::Link | Self::CapsSpam)
    }
}

/// A classified rule breach, ready for enforcement.
///
/// Consumed exactly once by the coordinator and never persisted; only
/// the restriction it produces is durable.
#[derive(Debug, Clone)]
pub struct Violation {
    pub subject: Subject,
    pub kind: ViolationKind,
    /// Activity count (or 1 for content rules) backing the decision
    pub evidence_count: u64,
    pub observed_at: DateTime<Utc>,
}

/// Static rule configuration.
///
/// Thresholds and windows are per category; nothing here is mutated at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Messages above this count inside the flood window trigger a mute
    pub flood_threshold: usize,
    pub flood_window_secs: i64,
    /// Audit-derived actions at or above this count trigger a raid mute
    pub raid_threshold: usize,
    pub raid_window_secs: i64,
    /// Lowercased terms matched as substrings of message content
    pub profanity_terms: Vec<String>,
    /// Uppercase-letter ratio at or above which a message is caps spam
    pub caps_ratio: f64,
    /// Caps rule only applies to messages at least this many characters
    pub caps_min_len: usize,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            flood_threshold: 5,
            flood_window_secs: 7,
            raid_threshold: 5,
            raid_window_secs: 10,
            profanity_terms: Vec::new(),
            caps_ratio: 0.7,
            caps_min_len: 5,
        }
    }
}

impl RuleConfig {
    #[must_use]
    pub fn flood_window(&self) -> Duration {
        Duration::seconds(self.flood_window_secs)
    }

    #[must_use]
    pub fn raid_window(&self) -> Duration {
        Duration::seconds(self.raid_window_secs)
    }
}

/// Rule evaluation over an owned sliding-window counter
#[derive(Debug, Default)]
pub struct ViolationClassifier {
    rules: RuleConfig,
    counter: SlidingWindowCounter,
}

impl ViolationClassifier {
    #[must_use]
    pub fn new(rules: RuleConfig) -> Self {
        Self {
            rules,
            counter: SlidingWindowCounter::new(),
        }
    }

    #[must_use]
    pub fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    /// Classify a message event. At most one violation per event; flood
    /// wins over content rules, and a flood breach clears the subject's
    /// window so the next breach needs a fresh full window.
    pub fn classify_message(&self, event: &MessageEvent) -> Option<Violation> {
        let key = CounterKey::flood(event.author);
        let count =
            self.counter
                .record_and_count(key, event.timestamp, self.rules.flood_window());
        if count > self.rules.flood_threshold {
            self.counter.reset(key);
            return Some(Violation {
                subject: event.author,
                kind: ViolationKind::Flood,
                evidence_count: count as u64,
                observed_at: event.timestamp,
            });
        }

        let kind = self.classify_content(&event.content)?;
        Some(Violation {
            subject: event.author,
            kind,
            evidence_count: 1,
            observed_at: event.timestamp,
        })
    }

    /// Classify an audit-attributed action. Callers only pass actors the
    /// correlator has already attributed and admin-filtered; an
    /// administrator never reaches this point.
    pub fn classify_action(
        &self,
        actor: Subject,
        kind: ActionKind,
        observed_at: DateTime<Utc>,
    ) -> Option<Violation> {
        let key = CounterKey::action(actor, kind);
        let count = self
            .counter
            .record_and_count(key, observed_at, self.rules.raid_window());
        if count >= self.rules.raid_threshold {
            // The window is kept; repeat breaches inside it are absorbed
            // by restriction idempotency downstream.
            return Some(Violation {
                subject: actor,
                kind: ViolationKind::Raid(kind),
                evidence_count: count as u64,
                observed_at,
            });
        }
        None
    }

    fn classify_content(&self, content: &str) -> Option<ViolationKind> {
        let lowered = content.to_lowercase();
        if self
            .rules
            .profanity_terms
            .iter()
            .any(|term| !term.is_empty() && lowered.contains(term))
        {
            return Some(ViolationKind::Profanity);
        }

        if contains_link(content) {
            return Some(ViolationKind::Link);
        }

        let total = content.chars().count();
        if total >= self.rules.caps_min_len {
            let upper = content.chars().filter(|c| c.is_uppercase()).count();
            #[allow(clippy::cast_precision_loss)]
            if upper as f64 / total as f64 >= self.rules.caps_ratio {
                return Some(ViolationKind::CapsSpam);
            }
        }

        None
    }

    /// Drop windows for subjects that went idle past the longest window
    pub fn sweep_idle(&self, now: DateTime<Utc>) {
        let retention = self.rules.flood_window().max(self.rules.raid_window());
        self.counter.sweep_idle(now, retention);
    }

    /// Number of subject windows currently held in memory
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.counter.tracked_keys()
    }
}

/// A scheme followed by at least one non-whitespace character
fn contains_link(content: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        content.match_indices(scheme).any(|(idx, _)| {
            content[idx + scheme.len()..]
                .chars()
                .next()
                .is_some_and(|c| !c.is_whitespace())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject::new(67890, 12345)
    }

    fn message(content: &str, at: DateTime<Utc>) -> MessageEvent {
        MessageEvent {
            author: subject(),
            content: content.to_string(),
            timestamp: at,
        }
    }

    fn classifier_with_terms() -> ViolationClassifier {
        ViolationClassifier::new(RuleConfig {
            profanity_terms: vec!["badword".to_string()],
            ..RuleConfig::default()
        })
    }

    #[test]
    fn test_flood_triggers_on_sixth_message_in_seven_seconds() {
        let classifier = classifier_with_terms();
        let start = Utc::now();

        for i in 0..5 {
            let at = start + Duration::seconds(i);
            assert!(classifier.classify_message(&message("hi", at)).is_none());
        }
        let violation = classifier
            .classify_message(&message("hi", start + Duration::seconds(6)))
            .expect("sixth message should breach");
        assert_eq!(violation.kind, ViolationKind::Flood);
        assert_eq!(violation.evidence_count, 6);
    }

    #[test]
    fn test_flood_breach_resets_the_window() {
        let classifier = classifier_with_terms();
        let start = Utc::now();

        for i in 0..6 {
            classifier.classify_message(&message("hi", start + Duration::seconds(i)));
        }
        // Right after a breach the count starts over.
        assert!(
            classifier
                .classify_message(&message("hi", start + Duration::seconds(6)))
                .is_none()
        );
    }

    #[test]
    fn test_slow_messages_never_flood() {
        let classifier = classifier_with_terms();
        let start = Utc::now();

        for i in 0..20 {
            let at = start + Duration::milliseconds(i * 7_001);
            assert!(classifier.classify_message(&message("hi", at)).is_none());
        }
    }

    #[test]
    fn test_profanity_is_immediate_and_case_insensitive() {
        let classifier = classifier_with_terms();
        let violation = classifier
            .classify_message(&message("well BADWORD indeed", Utc::now()))
            .expect("banned term should classify");
        assert_eq!(violation.kind, ViolationKind::Profanity);
        assert_eq!(violation.evidence_count, 1);
        assert!(violation.kind.removes_content());
    }

    #[test]
    fn test_profanity_beats_link_and_caps() {
        let classifier = classifier_with_terms();
        let violation = classifier
            .classify_message(&message("BADWORD https://spam.example AAAA", Utc::now()))
            .expect("should classify");
        assert_eq!(violation.kind, ViolationKind::Profanity);
    }

    #[test]
    fn test_link_detection() {
        let classifier = classifier_with_terms();
        let violation = classifier
            .classify_message(&message("join https://discord.gg/evil now", Utc::now()))
            .expect("link should classify");
        assert_eq!(violation.kind, ViolationKind::Link);

        // A bare scheme with nothing after it is not a link.
        assert!(
            classifier
                .classify_message(&message("https:// nothing", Utc::now()))
                .is_none()
        );
    }

    #[test]
    fn test_caps_rule_respects_minimum_length() {
        let classifier = classifier_with_terms();

        // Short all-caps words are fine.
        assert!(
            classifier
                .classify_message(&message("WOW", Utc::now()))
                .is_none()
        );

        let violation = classifier
            .classify_message(&message("STOP SHOUTING", Utc::now()))
            .expect("long caps should classify");
        assert_eq!(violation.kind, ViolationKind::CapsSpam);
    }

    #[test]
    fn test_caps_ratio_boundary() {
        let classifier = classifier_with_terms();

        // 6 uppercase of 10 chars = 0.6, below the 0.7 default.
        assert!(
            classifier
                .classify_message(&message("AAABBB cdef", Utc::now()))
                .is_none()
        );
    }

    #[test]
    fn test_empty_or_odd_content_is_no_violation() {
        let classifier = classifier_with_terms();
        assert!(
            classifier
                .classify_message(&message("", Utc::now()))
                .is_none()
        );
        assert!(
            classifier
                .classify_message(&message("\u{200b}\u{200b}", Utc::now()))
                .is_none()
        );
    }

    #[test]
    fn test_raid_triggers_on_fifth_action_in_ten_seconds() {
        let classifier = classifier_with_terms();
        let actor = Subject::new(67890, 55555);
        let start = Utc::now();

        for i in 0..4 {
            let at = start + Duration::seconds(i);
            assert!(
                classifier
                    .classify_action(actor, ActionKind::Kick, at)
                    .is_none()
            );
        }
        let violation = classifier
            .classify_action(actor, ActionKind::Kick, start + Duration::seconds(4))
            .expect("fifth kick should breach");
        assert_eq!(violation.kind, ViolationKind::Raid(ActionKind::Kick));
        assert_eq!(violation.evidence_count, 5);
        assert!(!violation.kind.removes_content());

        // The window is not reset; a sixth kick classifies again and is
        // deduplicated by the restriction store downstream.
        assert!(
            classifier
                .classify_action(actor, ActionKind::Kick, start + Duration::seconds(5))
                .is_some()
        );
    }

    #[test]
    fn test_sweep_clears_windows_from_clean_traffic() {
        let classifier = classifier_with_terms();
        let start = Utc::now();

        // Many distinct well-behaved authors each leave a window behind.
        for user_id in 0..50 {
            let event = MessageEvent {
                author: Subject::new(67890, user_id),
                content: "hello".to_string(),
                timestamp: start,
            };
            assert!(classifier.classify_message(&event).is_none());
        }
        assert_eq!(classifier.tracked_keys(), 50);

        // Once everyone has gone idle past the longest window, the
        // sweep reclaims all of them without any violation happening.
        classifier.sweep_idle(start + Duration::seconds(11));
        assert_eq!(classifier.tracked_keys(), 0);
    }

    #[test]
    fn test_action_kinds_are_tracked_separately() {
        let classifier = classifier_with_terms();
        let actor = Subject::new(67890, 55555);
        let now = Utc::now();

        for _ in 0..4 {
            classifier.classify_action(actor, ActionKind::Kick, now);
        }
        assert!(
            classifier
                .classify_action(actor, ActionKind::Ban, now)
                .is_none()
        );
    }
}
