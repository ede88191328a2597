use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use waymark_core::approvals::engine::TransitionResult;
use waymark_core::domain::approval::{
    ActorId, ActorKind, ApprovalLogEntry, ApprovalPriority, ApprovalRecord, ApprovalStatus,
    EntityRef, LogAction, LogEntryId, ReviewOrigin,
};

use super::{ApprovalRepository, RecordFilter, RepositoryError};
use crate::DbPool;

const RECORD_COLUMNS: &str = "entity_type, entity_id, status, priority, submitted_by, submitted_at,
     reviewed_by, reviewed_at, assigned_reviewer, history_len, history_head, state_version,
     created_at, updated_at";

const LOG_COLUMNS: &str = "id, entity_type, entity_id, sequence, action, actor_id, actor_kind,
     rule_id, prior_status, new_status, notes, metadata_json, prev_hash, entry_hash, occurred_at";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Fixed-width UTC timestamps keep text ordering chronological and preserve
/// the nanoseconds the entry hash was computed over.
fn encode_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| decode_timestamp(column, &value)).transpose()
}

fn decode_u32(column: &str, raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{column} out of range: {raw}")))
}

fn decode_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    ApprovalStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{raw}`")))
}

fn get<T>(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let entity_type: String = get(row, "entity_type")?;
    let entity_id: String = get(row, "entity_id")?;
    let status: String = get(row, "status")?;
    let priority: String = get(row, "priority")?;
    let submitted_by: Option<String> = get(row, "submitted_by")?;
    let submitted_at: Option<String> = get(row, "submitted_at")?;
    let reviewed_by: Option<String> = get(row, "reviewed_by")?;
    let reviewed_at: Option<String> = get(row, "reviewed_at")?;
    let assigned_reviewer: Option<String> = get(row, "assigned_reviewer")?;
    let history_len: i64 = get(row, "history_len")?;
    let history_head: Option<String> = get(row, "history_head")?;
    let state_version: i64 = get(row, "state_version")?;
    let created_at: String = get(row, "created_at")?;
    let updated_at: String = get(row, "updated_at")?;

    Ok(ApprovalRecord {
        entity: EntityRef::new(entity_type, entity_id),
        status: decode_status(&status)?,
        priority: ApprovalPriority::parse(&priority)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority}`")))?,
        submitted_by: submitted_by.map(ActorId),
        submitted_at: decode_optional_timestamp("submitted_at", submitted_at)?,
        reviewed_by: reviewed_by.map(ActorId),
        reviewed_at: decode_optional_timestamp("reviewed_at", reviewed_at)?,
        assigned_reviewer: assigned_reviewer.map(ActorId),
        history_len: decode_u32("history_len", history_len)?,
        history_head,
        state_version: decode_u32("state_version", state_version)?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalLogEntry, RepositoryError> {
    let id: String = get(row, "id")?;
    let entity_type: String = get(row, "entity_type")?;
    let entity_id: String = get(row, "entity_id")?;
    let sequence: i64 = get(row, "sequence")?;
    let action: String = get(row, "action")?;
    let actor_id: String = get(row, "actor_id")?;
    let actor_kind: String = get(row, "actor_kind")?;
    let rule_id: Option<String> = get(row, "rule_id")?;
    let prior_status: Option<String> = get(row, "prior_status")?;
    let new_status: Option<String> = get(row, "new_status")?;
    let notes: String = get(row, "notes")?;
    let metadata_json: String = get(row, "metadata_json")?;
    let prev_hash: Option<String> = get(row, "prev_hash")?;
    let entry_hash: String = get(row, "entry_hash")?;
    let occurred_at: String = get(row, "occurred_at")?;

    let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json)
        .map_err(|e| RepositoryError::Decode(format!("metadata_json: {e}")))?;

    Ok(ApprovalLogEntry {
        id: LogEntryId(id),
        entity: EntityRef::new(entity_type, entity_id),
        sequence: decode_u32("sequence", sequence)?,
        action: LogAction::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown log action `{action}`")))?,
        actor: ActorId(actor_id),
        actor_kind: ActorKind::parse(&actor_kind)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown actor kind `{actor_kind}`")))?,
        origin: match rule_id {
            Some(rule_id) => ReviewOrigin::Rule { rule_id },
            None => ReviewOrigin::Human,
        },
        prior_status: prior_status.as_deref().map(decode_status).transpose()?,
        new_status: new_status.as_deref().map(decode_status).transpose()?,
        notes,
        metadata,
        prev_hash,
        entry_hash,
        occurred_at: decode_timestamp("occurred_at", &occurred_at)?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLITE_BUSY and SQLITE_BUSY_SNAPSHOT: another connection committed to the
/// row first, so the planned change is stale.
fn is_write_contention(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("5") | Some("517"))
    )
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_record(
        &self,
        entity: &EntityRef,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record WHERE entity_type = ? AND entity_id = ?"
        ))
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_record(r)?)),
            None => Ok(None),
        }
    }

    async fn insert_record(&self, record: &ApprovalRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO approval_record (entity_type, entity_id, status, priority, submitted_by,
                                          submitted_at, reviewed_by, reviewed_at, assigned_reviewer,
                                          history_len, history_head, state_version, created_at,
                                          updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.entity.entity_type)
        .bind(&record.entity.entity_id)
        .bind(record.status.as_str())
        .bind(record.priority.as_str())
        .bind(record.submitted_by.as_ref().map(|actor| actor.0.clone()))
        .bind(record.submitted_at.as_ref().map(encode_timestamp))
        .bind(record.reviewed_by.as_ref().map(|actor| actor.0.clone()))
        .bind(record.reviewed_at.as_ref().map(encode_timestamp))
        .bind(record.assigned_reviewer.as_ref().map(|actor| actor.0.clone()))
        .bind(i64::from(record.history_len))
        .bind(&record.history_head)
        .bind(i64::from(record.state_version))
        .bind(encode_timestamp(&record.created_at))
        .bind(encode_timestamp(&record.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(error) if is_unique_violation(&error) => {
                Err(RepositoryError::Duplicate(record.entity.clone()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn commit_transition(
        &self,
        transition: &TransitionResult,
    ) -> Result<(), RepositoryError> {
        let record = &transition.record;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_record
             SET status = ?, priority = ?, submitted_by = ?, submitted_at = ?, reviewed_by = ?,
                 reviewed_at = ?, assigned_reviewer = ?, history_len = ?, history_head = ?,
                 state_version = ?, updated_at = ?
             WHERE entity_type = ? AND entity_id = ? AND state_version = ?",
        )
        .bind(record.status.as_str())
        .bind(record.priority.as_str())
        .bind(record.submitted_by.as_ref().map(|actor| actor.0.clone()))
        .bind(record.submitted_at.as_ref().map(encode_timestamp))
        .bind(record.reviewed_by.as_ref().map(|actor| actor.0.clone()))
        .bind(record.reviewed_at.as_ref().map(encode_timestamp))
        .bind(record.assigned_reviewer.as_ref().map(|actor| actor.0.clone()))
        .bind(i64::from(record.history_len))
        .bind(&record.history_head)
        .bind(i64::from(record.state_version))
        .bind(encode_timestamp(&record.updated_at))
        .bind(&record.entity.entity_type)
        .bind(&record.entity.entity_id)
        .bind(i64::from(transition.expected_version))
        .execute(&mut *tx)
        .await;

        let conflict = RepositoryError::Conflict {
            entity: record.entity.clone(),
            expected_version: transition.expected_version,
        };
        let updated = match updated {
            Ok(updated) => updated,
            Err(error) if is_write_contention(&error) => return Err(conflict),
            Err(error) => return Err(error.into()),
        };

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(conflict);
        }

        for entry in &transition.entries {
            let metadata_json = serde_json::to_string(&entry.metadata)
                .map_err(|e| RepositoryError::Decode(format!("metadata_json: {e}")))?;

            sqlx::query(&format!(
                "INSERT INTO approval_log ({LOG_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&entry.id.0)
            .bind(&entry.entity.entity_type)
            .bind(&entry.entity.entity_id)
            .bind(i64::from(entry.sequence))
            .bind(entry.action.as_str())
            .bind(&entry.actor.0)
            .bind(entry.actor_kind.as_str())
            .bind(entry.origin.rule_id())
            .bind(entry.prior_status.map(|status| status.as_str()))
            .bind(entry.new_status.map(|status| status.as_str()))
            .bind(&entry.notes)
            .bind(metadata_json)
            .bind(&entry.prev_hash)
            .bind(&entry.entry_hash)
            .bind(encode_timestamp(&entry.occurred_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let status = filter.status.map(|status| status.as_str());
        let priority = filter.priority.map(|priority| priority.as_str());
        let submitted_by = filter.submitted_by.as_ref().map(|actor| actor.0.as_str());

        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE (? IS NULL OR status = ?)
               AND (? IS NULL OR priority = ?)
               AND (? IS NULL OR submitted_by = ?)
             ORDER BY entity_type, entity_id"
        ))
        .bind(status)
        .bind(status)
        .bind(priority)
        .bind(priority)
        .bind(submitted_by)
        .bind(submitted_by)
        .fetch_all(&self.pool)
        .await?;

        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>, _>>()?;
        Ok(records.into_iter().filter(|record| filter.matches(record)).collect())
    }

    async fn history(&self, entity: &EntityRef) -> Result<Vec<ApprovalLogEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM approval_log
             WHERE entity_type = ? AND entity_id = ?
             ORDER BY sequence ASC"
        ))
        .bind(&entity.entity_type)
        .bind(&entity.entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()
    }

    async fn recent_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ApprovalLogEntry>, RepositoryError> {
        let since = since.as_ref().map(encode_timestamp);
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM approval_log
             WHERE (? IS NULL OR occurred_at >= ?)
             ORDER BY occurred_at ASC, sequence ASC"
        ))
        .bind(&since)
        .bind(&since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()
    }

    async fn count_approved_for_submitter(
        &self,
        submitter: &ActorId,
    ) -> Result<u32, RepositoryError> {
        // Each approval is credited to whoever made the submission it answered.
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM approval_log AS approval
             WHERE approval.action = 'approved'
               AND (SELECT submission.actor_id FROM approval_log AS submission
                    WHERE submission.entity_type = approval.entity_type
                      AND submission.entity_id = approval.entity_id
                      AND submission.action = 'submitted'
                      AND submission.sequence < approval.sequence
                    ORDER BY submission.sequence DESC
                    LIMIT 1) = ?",
        )
        .bind(&submitter.0)
        .fetch_one(&self.pool)
        .await?
        .try_get("count")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        decode_u32("count", count)
    }
}
