use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use waymark_core::approvals::engine::TransitionResult;
use waymark_core::domain::approval::{
    ActorId, ApprovalLogEntry, ApprovalRecord, EntityRef, LogAction,
};

use super::{ApprovalRepository, RecordFilter, RepositoryError};

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<EntityRef, ApprovalRecord>,
    log: Vec<ApprovalLogEntry>,
}

/// Records and log share one lock so a commit is observed all at once.
#[derive(Default)]
pub struct InMemoryApprovalRepository {
    state: Mutex<MemoryState>,
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn find_record(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.records.get(entity).cloned())
    }

    async fn insert_record(&self, record: &ApprovalRecord) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&record.entity) {
            return Err(RepositoryError::Duplicate(record.entity.clone()));
        }
        state.records.insert(record.entity.clone(), record.clone());
        Ok(())
    }

    async fn commit_transition(
        &self,
        transition: &TransitionResult,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let entity = transition.entity();

        let current_version = state.records.get(entity).map(|record| record.state_version);
        if current_version != Some(transition.expected_version) {
            return Err(RepositoryError::Conflict {
                entity: entity.clone(),
                expected_version: transition.expected_version,
            });
        }

        state.records.insert(entity.clone(), transition.record.clone());
        state.log.extend(transition.entries.iter().cloned());
        Ok(())
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.records.values().filter(|record| filter.matches(record)).cloned().collect())
    }

    async fn history(&self, entity: &EntityRef) -> Result<Vec<ApprovalLogEntry>, RepositoryError> {
        let state = self.state.lock().await;
        let mut entries: Vec<ApprovalLogEntry> =
            state.log.iter().filter(|entry| entry.entity == *entity).cloned().collect();
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    async fn recent_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApprovalLogEntry>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .log
            .iter()
            .filter(|entry| since.map_or(true, |at| entry.occurred_at >= at))
            .cloned()
            .collect())
    }

    async fn count_approved_for_submitter(
        &self,
        submitter: &ActorId,
    ) -> Result<u32, RepositoryError> {
        let state = self.state.lock().await;
        let mut entries: Vec<&ApprovalLogEntry> = state.log.iter().collect();
        entries.sort_by(|left, right| {
            (&left.entity, left.sequence).cmp(&(&right.entity, right.sequence))
        });

        let mut last_submitter: BTreeMap<&EntityRef, &ActorId> = BTreeMap::new();
        let mut count = 0u32;
        for entry in entries {
            match entry.action {
                LogAction::Submitted => {
                    last_submitter.insert(&entry.entity, &entry.actor);
                }
                LogAction::Approved if last_submitter.get(&entry.entity) == Some(&submitter) => {
                    count = count.saturating_add(1);
                }
                _ => {}
            }
        }
        Ok(count)
    }
}
