use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::approval::{ApprovalLogEntry, EntityRef, LogAction};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryVerification {
    pub entity: EntityRef,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Hash over every field of an entry except `entry_hash` itself.
pub fn hash_entry(entry: &ApprovalLogEntry) -> String {
    let metadata = entry
        .metadata
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",");
    let material = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        entry.id.0,
        entry.entity,
        entry.sequence,
        entry.action.as_str(),
        entry.actor.0,
        entry.actor_kind.as_str(),
        entry.origin.rule_id().unwrap_or("human"),
        entry.prior_status.map(|status| status.as_str()).unwrap_or(""),
        entry.new_status.map(|status| status.as_str()).unwrap_or(""),
        entry.notes,
        metadata,
        entry.prev_hash.as_deref().unwrap_or(""),
        entry.occurred_at.to_rfc3339(),
    );
    sha256_hex(material.as_bytes())
}

/// Recomputes the chain for one entity's history (oldest first) and reports
/// the first entry that does not line up.
pub fn verify_history(entity: &EntityRef, entries: &[ApprovalLogEntry]) -> HistoryVerification {
    let mut previous_hash: Option<String> = None;

    for (index, entry) in entries.iter().enumerate() {
        let failure = if entry.entity != *entity {
            Some(format!("entry {} belongs to {}", entry.id.0, entry.entity))
        } else if entry.sequence != u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1) {
            Some(format!(
                "sequence mismatch at entry {}: expected {}, found {}",
                entry.id.0,
                index + 1,
                entry.sequence
            ))
        } else if entry.prev_hash != previous_hash {
            Some(format!("previous hash mismatch at entry {}", entry.id.0))
        } else if hash_entry(entry) != entry.entry_hash {
            Some(format!("entry hash mismatch at entry {}", entry.id.0))
        } else {
            None
        };

        if let Some(reason) = failure {
            return HistoryVerification {
                entity: entity.clone(),
                valid: false,
                verified_entries: index,
                latest_hash: previous_hash,
                failure_reason: Some(reason),
            };
        }

        previous_hash = Some(entry.entry_hash.clone());
    }

    HistoryVerification {
        entity: entity.clone(),
        valid: true,
        verified_entries: entries.len(),
        latest_hash: previous_hash,
        failure_reason: None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerCount {
    pub actor: String,
    pub count: usize,
}

/// Activity breakdown over a window of log entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub since: Option<DateTime<Utc>>,
    pub total_entries: usize,
    pub automated_entries: usize,
    pub by_action: BTreeMap<String, usize>,
    pub by_entity_type: BTreeMap<String, usize>,
    pub top_reviewers: Vec<ReviewerCount>,
}

impl AuditStats {
    pub const TOP_REVIEWERS: usize = 10;

    pub fn from_entries(since: Option<DateTime<Utc>>, entries: &[ApprovalLogEntry]) -> Self {
        let mut stats = Self { since, ..Self::default() };
        let mut reviewers: BTreeMap<String, usize> = BTreeMap::new();

        let in_window =
            |entry: &&ApprovalLogEntry| since.map_or(true, |at| entry.occurred_at >= at);
        for entry in entries.iter().filter(in_window) {
            stats.total_entries += 1;
            if entry.origin.is_automated() {
                stats.automated_entries += 1;
            }
            *stats.by_action.entry(entry.action.as_str().to_string()).or_default() += 1;
            *stats.by_entity_type.entry(entry.entity.entity_type.clone()).or_default() += 1;

            if is_review_action(entry.action) {
                *reviewers.entry(entry.actor.0.clone()).or_default() += 1;
            }
        }

        let mut top_reviewers: Vec<ReviewerCount> =
            reviewers.into_iter().map(|(actor, count)| ReviewerCount { actor, count }).collect();
        top_reviewers.sort_by(|left, right| {
            right.count.cmp(&left.count).then_with(|| left.actor.cmp(&right.actor))
        });
        top_reviewers.truncate(Self::TOP_REVIEWERS);
        stats.top_reviewers = top_reviewers;

        stats
    }
}

fn is_review_action(action: LogAction) -> bool {
    matches!(action, LogAction::Approved | LogAction::Rejected | LogAction::ChangesRequested)
}

fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{hash_entry, verify_history, AuditStats};
    use crate::approvals::engine::ApprovalEngine;
    use crate::domain::approval::{Actor, EntityRef};

    fn reviewed_history() -> (EntityRef, Vec<crate::domain::approval::ApprovalLogEntry>) {
        let engine = ApprovalEngine::default();
        let entity = EntityRef::new("review", "7");
        let record = engine.register(entity.clone(), Default::default());
        let submitted = engine.submit(&record, &Actor::user("u-writer")).expect("submit");
        let approved = engine
            .approve(&submitted.record, &Actor::reviewer("u-staff"), "looks good")
            .expect("approve");

        let mut entries = submitted.entries;
        entries.extend(approved.entries);
        (entity, entries)
    }

    #[test]
    fn untampered_history_verifies() {
        let (entity, entries) = reviewed_history();
        let result = verify_history(&entity, &entries);

        assert!(result.valid);
        assert_eq!(result.verified_entries, 2);
        assert_eq!(result.latest_hash.as_deref(), Some(entries[1].entry_hash.as_str()));
    }

    #[test]
    fn edited_notes_break_the_chain() {
        let (entity, mut entries) = reviewed_history();
        entries[1].notes = "rubber stamp".to_string();

        let result = verify_history(&entity, &entries);
        assert!(!result.valid);
        assert_eq!(result.verified_entries, 1);
        assert!(result.failure_reason.unwrap_or_default().contains("entry hash mismatch"));
    }

    #[test]
    fn dropped_entry_is_detected() {
        let (entity, entries) = reviewed_history();
        let result = verify_history(&entity, &entries[1..]);

        assert!(!result.valid);
        assert!(result.failure_reason.unwrap_or_default().contains("sequence mismatch"));
    }

    #[test]
    fn hash_is_stable_for_same_entry() {
        let (_, entries) = reviewed_history();
        assert_eq!(hash_entry(&entries[0]), entries[0].entry_hash);
    }

    #[test]
    fn stats_count_actions_and_reviewers() {
        let (_, entries) = reviewed_history();
        let stats = AuditStats::from_entries(Some(Utc::now() - Duration::days(30)), &entries);

        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.automated_entries, 0);
        assert_eq!(stats.by_action.get("submitted"), Some(&1));
        assert_eq!(stats.by_action.get("approved"), Some(&1));
        assert_eq!(stats.by_entity_type.get("review"), Some(&2));
        assert_eq!(stats.top_reviewers.len(), 1);
        assert_eq!(stats.top_reviewers[0].actor, "u-staff");
    }

    #[test]
    fn stats_ignore_entries_before_window() {
        let (_, entries) = reviewed_history();
        let stats = AuditStats::from_entries(Some(Utc::now() + Duration::hours(1)), &entries);
        assert_eq!(stats.total_entries, 0);
    }
}
