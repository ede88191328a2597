use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::approvals::normalize_key;
use crate::domain::approval::{
    ActorId, ApprovalPriority, ApprovalRecord, ApprovalStatus, EntityRef,
};

/// Reviewer-facing view over a subset of records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalQueue {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub entity_types: BTreeSet<String>,
    #[serde(default = "default_status_filter")]
    pub status_filter: ApprovalStatus,
    #[serde(default)]
    pub priority_filter: Option<ApprovalPriority>,
    #[serde(default)]
    pub reviewers: BTreeSet<ActorId>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub display_order: i32,
}

impl ApprovalQueue {
    pub fn matches(&self, record: &ApprovalRecord) -> bool {
        let entity_type = normalize_key(&record.entity.entity_type);
        record.status == self.status_filter
            && self.entity_types.iter().any(|candidate| normalize_key(candidate) == entity_type)
            && self.priority_filter.map_or(true, |priority| record.priority == priority)
    }

    /// Queues without an explicit reviewer list are open to every reviewer.
    pub fn is_visible_to(&self, reviewer: &ActorId) -> bool {
        self.reviewers.is_empty() || self.reviewers.contains(reviewer)
    }
}

fn default_status_filter() -> ApprovalStatus {
    ApprovalStatus::Pending
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub slug: String,
    pub name: String,
    pub count: usize,
    pub by_priority: BTreeMap<String, usize>,
    pub overdue: usize,
}

/// `total` and `overdue` count distinct entities, so a record matched by two
/// overlapping queues counts once there but appears in both queue rows.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub generated_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub overdue: usize,
    pub queues: Vec<QueueSummary>,
}

#[derive(Clone, Debug)]
pub struct QueueRouter {
    review_sla: Duration,
}

impl QueueRouter {
    pub fn new(review_sla_hours: u32) -> Self {
        Self { review_sla: Duration::hours(i64::from(review_sla_hours)) }
    }

    /// Records belonging to `queue`, in presentation order.
    pub fn pending_for<'a>(
        queue: &ApprovalQueue,
        records: &'a [ApprovalRecord],
    ) -> Vec<&'a ApprovalRecord> {
        let mut matched: Vec<&ApprovalRecord> =
            records.iter().filter(|record| queue.matches(record)).collect();
        matched.sort_by(|left, right| presentation_order(left, right));
        matched
    }

    pub fn is_overdue(&self, record: &ApprovalRecord, now: DateTime<Utc>) -> bool {
        record.submitted_at.is_some_and(|submitted_at| now - submitted_at > self.review_sla)
    }

    pub fn summarize(
        &self,
        queue: &ApprovalQueue,
        records: &[ApprovalRecord],
        now: DateTime<Utc>,
    ) -> QueueSummary {
        let matched = Self::pending_for(queue, records);
        let mut by_priority: BTreeMap<String, usize> = ApprovalPriority::ALL
            .iter()
            .map(|priority| (priority.as_str().to_string(), 0))
            .collect();
        for record in &matched {
            *by_priority.entry(record.priority.as_str().to_string()).or_default() += 1;
        }

        QueueSummary {
            slug: queue.slug.clone(),
            name: queue.name.clone(),
            count: matched.len(),
            by_priority,
            overdue: matched.iter().filter(|record| self.is_overdue(record, now)).count(),
        }
    }

    /// Summaries for every active queue in `display_order`.
    pub fn dashboard(
        &self,
        queues: &[ApprovalQueue],
        records: &[ApprovalRecord],
        now: DateTime<Utc>,
    ) -> DashboardSummary {
        let mut active: Vec<&ApprovalQueue> = queues.iter().filter(|queue| queue.active).collect();
        active.sort_by(|left, right| {
            left.display_order.cmp(&right.display_order).then_with(|| left.slug.cmp(&right.slug))
        });

        let mut queued: BTreeSet<&EntityRef> = BTreeSet::new();
        let mut overdue: BTreeSet<&EntityRef> = BTreeSet::new();
        for queue in &active {
            for record in Self::pending_for(queue, records) {
                queued.insert(&record.entity);
                if self.is_overdue(record, now) {
                    overdue.insert(&record.entity);
                }
            }
        }

        DashboardSummary {
            generated_at: Some(now),
            total: queued.len(),
            overdue: overdue.len(),
            queues: active.into_iter().map(|queue| self.summarize(queue, records, now)).collect(),
        }
    }
}

/// One page of a queue listing. Pages start at 1.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueuePage {
    pub queue: String,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub page_count: usize,
    pub records: Vec<ApprovalRecord>,
}

impl QueuePage {
    /// Cuts `ordered` into pages of `per_page`; a page past the end is empty.
    pub fn slice(
        queue: &str,
        ordered: Vec<ApprovalRecord>,
        page: usize,
        per_page: usize,
    ) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = ordered.len();
        let records =
            ordered.into_iter().skip((page - 1).saturating_mul(per_page)).take(per_page).collect();

        Self {
            queue: queue.to_string(),
            page,
            per_page,
            total,
            page_count: total.div_ceil(per_page),
            records,
        }
    }
}

/// Priority descending, then oldest submission first. Unsubmitted records
/// sort last; entity ref keeps the order total.
pub fn presentation_order(left: &ApprovalRecord, right: &ApprovalRecord) -> Ordering {
    right
        .priority
        .cmp(&left.priority)
        .then_with(|| match (left.submitted_at, right.submitted_at) {
            (Some(left_at), Some(right_at)) => left_at.cmp(&right_at),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| left.entity.cmp(&right.entity))
}
