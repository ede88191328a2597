use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use waymark_core::approvals::bulk::{with_default_notes, BulkItem, BulkItemResult, BulkReport};
use waymark_core::approvals::engine::{
    ApprovalCommand, ApprovalEngine, TransitionResult, WorkflowError,
};
use waymark_core::approvals::queue::{ApprovalQueue, DashboardSummary, QueuePage, QueueRouter};
use waymark_core::approvals::rules::{RuleEvaluator, SubmissionFacts};
use waymark_core::audit::{verify_history, AuditStats, HistoryVerification};
use waymark_core::catalog::WorkflowCatalog;
use waymark_core::config::WorkflowConfig;
use waymark_core::domain::approval::{
    Actor, ActorId, Approvable, ApprovalLogEntry, ApprovalPriority, ApprovalRecord,
    ApprovalStatus, EntityRef,
};
use waymark_core::errors::ApplicationError;

use crate::repositories::{ApprovalRepository, RecordFilter};

/// Lifecycle operations over any `Approvable` content, backed by a repository.
pub struct ApprovalWorkflow<R> {
    repository: R,
    engine: ApprovalEngine,
    rules: RuleEvaluator,
    queues: Vec<ApprovalQueue>,
    router: QueueRouter,
    items_per_page: usize,
    system_actor: Actor,
}

impl<R: ApprovalRepository> ApprovalWorkflow<R> {
    pub fn new(repository: R, catalog: WorkflowCatalog, config: &WorkflowConfig) -> Self {
        Self {
            repository,
            engine: ApprovalEngine::new(config.engine_settings()),
            rules: RuleEvaluator::new(catalog.rules),
            queues: catalog.queues,
            router: QueueRouter::new(config.review_sla_hours),
            items_per_page: usize::try_from(config.items_per_page).unwrap_or(usize::MAX),
            system_actor: Actor::system(config.system_actor_id.clone()),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn system_actor(&self) -> &Actor {
        &self.system_actor
    }

    pub fn queues(&self) -> &[ApprovalQueue] {
        &self.queues
    }

    pub async fn register(
        &self,
        item: &dyn Approvable,
    ) -> Result<ApprovalRecord, ApplicationError> {
        let record = self.engine.register(item.entity_ref(), item.default_priority());
        self.repository.insert_record(&record).await?;

        info!(
            event_name = "approval.record.registered",
            entity_type = %record.entity.entity_type,
            entity_id = %record.entity.entity_id,
            priority = %record.priority,
            "approval record registered"
        );
        Ok(record)
    }

    /// Loads a stored record, refusing one whose review fields contradict
    /// its status.
    pub async fn record(&self, entity: &EntityRef) -> Result<ApprovalRecord, ApplicationError> {
        let record = self
            .repository
            .find_record(entity)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(entity.to_string()))?;
        record.check_review_fields()?;
        Ok(record)
    }

    /// Submits `item` and applies the first matching auto-approval rule in
    /// the same commit.
    pub async fn submit_for_review(
        &self,
        item: &dyn Approvable,
        submitter: &Actor,
    ) -> Result<ApprovalRecord, ApplicationError> {
        let record = self.record(&item.entity_ref()).await?;
        let transition = self.plan_submission(&record, item, submitter).await?;
        self.commit(transition).await
    }

    pub async fn approve(
        &self,
        entity: &EntityRef,
        reviewer: &Actor,
        notes: &str,
    ) -> Result<ApprovalRecord, ApplicationError> {
        self.execute(entity, &ApprovalCommand::Approve { notes: notes.to_string() }, reviewer)
            .await
    }

    pub async fn reject(
        &self,
        entity: &EntityRef,
        reviewer: &Actor,
        notes: &str,
    ) -> Result<ApprovalRecord, ApplicationError> {
        self.execute(entity, &ApprovalCommand::Reject { notes: notes.to_string() }, reviewer).await
    }

    pub async fn request_changes(
        &self,
        entity: &EntityRef,
        reviewer: &Actor,
        notes: &str,
    ) -> Result<ApprovalRecord, ApplicationError> {
        self.execute(
            entity,
            &ApprovalCommand::RequestChanges { notes: notes.to_string() },
            reviewer,
        )
        .await
    }

    pub async fn archive(
        &self,
        entity: &EntityRef,
        actor: &Actor,
        notes: &str,
    ) -> Result<ApprovalRecord, ApplicationError> {
        self.execute(entity, &ApprovalCommand::Archive { notes: notes.to_string() }, actor).await
    }

    pub async fn change_priority(
        &self,
        entity: &EntityRef,
        actor: &Actor,
        priority: ApprovalPriority,
    ) -> Result<ApprovalRecord, ApplicationError> {
        self.execute(entity, &ApprovalCommand::ChangePriority { priority }, actor).await
    }

    pub async fn execute(
        &self,
        entity: &EntityRef,
        command: &ApprovalCommand,
        actor: &Actor,
    ) -> Result<ApprovalRecord, ApplicationError> {
        let record = self.record(entity).await?;
        self.execute_on(&record, command, actor).await
    }

    /// Applies `command` to a record the caller already loaded. Fails with
    /// `ConcurrentModification` if the stored record moved on since.
    pub async fn execute_on(
        &self,
        snapshot: &ApprovalRecord,
        command: &ApprovalCommand,
        actor: &Actor,
    ) -> Result<ApprovalRecord, ApplicationError> {
        let planned = match command {
            ApprovalCommand::Submit => Err(ApplicationError::from(WorkflowError::Validation {
                field: "content".to_string(),
                reason: "submission needs the content item; use submit_for_review".to_string(),
            })),
            other => self.engine.apply(snapshot, other, actor).map_err(ApplicationError::from),
        };

        let transition = match planned {
            Ok(transition) => transition,
            Err(error) => {
                warn!(
                    event_name = "approval.transition.refused",
                    entity_type = %snapshot.entity.entity_type,
                    entity_id = %snapshot.entity.entity_id,
                    actor = %actor.id,
                    action = %command.action(),
                    error_class = error.error_class(),
                    "approval transition refused: {error}"
                );
                return Err(error);
            }
        };

        self.commit(transition).await
    }

    pub async fn approval_history(
        &self,
        entity: &EntityRef,
    ) -> Result<Vec<ApprovalLogEntry>, ApplicationError> {
        Ok(self.repository.history(entity).await?)
    }

    pub async fn verify_history(
        &self,
        entity: &EntityRef,
    ) -> Result<HistoryVerification, ApplicationError> {
        let entries = self.approval_history(entity).await?;
        let verification = verify_history(entity, &entries);
        if !verification.valid {
            warn!(
                event_name = "approval.history.tampered",
                entity_type = %entity.entity_type,
                entity_id = %entity.entity_id,
                reason = verification.failure_reason.as_deref().unwrap_or("unknown"),
                "approval history failed verification"
            );
        }
        Ok(verification)
    }

    pub async fn pending_for(&self, slug: &str) -> Result<Vec<ApprovalRecord>, ApplicationError> {
        let queue = self
            .queues
            .iter()
            .find(|queue| queue.slug == slug)
            .ok_or_else(|| ApplicationError::NotFound(format!("queue `{slug}`")))?;
        self.pending_for_queue(queue).await
    }

    /// One page of `pending_for(slug)`, sized by `workflow.items_per_page`.
    pub async fn pending_page(
        &self,
        slug: &str,
        page: usize,
    ) -> Result<QueuePage, ApplicationError> {
        let ordered = self.pending_for(slug).await?;
        Ok(QueuePage::slice(slug, ordered, page, self.items_per_page))
    }

    pub async fn pending_for_queue(
        &self,
        queue: &ApprovalQueue,
    ) -> Result<Vec<ApprovalRecord>, ApplicationError> {
        let candidates = self
            .repository
            .list_records(&RecordFilter {
                entity_types: queue.entity_types.iter().cloned().collect(),
                status: Some(queue.status_filter),
                priority: queue.priority_filter,
                submitted_by: None,
            })
            .await?;

        Ok(QueueRouter::pending_for(queue, &candidates).into_iter().cloned().collect())
    }

    /// Queue summaries; with a reviewer, only queues visible to them.
    pub async fn dashboard(
        &self,
        reviewer: Option<&ActorId>,
        now: DateTime<Utc>,
    ) -> Result<DashboardSummary, ApplicationError> {
        let records = self.repository.list_records(&RecordFilter::default()).await?;
        let visible: Vec<ApprovalQueue> = self
            .queues
            .iter()
            .filter(|queue| reviewer.map_or(true, |reviewer| queue.is_visible_to(reviewer)))
            .cloned()
            .collect();

        Ok(self.router.dashboard(&visible, &records, now))
    }

    pub async fn stats(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<AuditStats, ApplicationError> {
        let entries = self.repository.recent_entries(since).await?;
        Ok(AuditStats::from_entries(since, &entries))
    }

    /// Runs every item independently; failures are reported per item.
    pub async fn apply_bulk(&self, items: Vec<BulkItem>, actor: &Actor) -> BulkReport {
        let mut report = BulkReport::default();

        for item in items {
            let action = item.command.action();
            let outcome = match item.content {
                Some(content) if matches!(item.command, ApprovalCommand::Submit) => {
                    self.submit_for_review(&content, actor).await
                }
                _ => {
                    let command = with_default_notes(item.command, &actor.id);
                    self.execute(&item.entity, &command, actor).await
                }
            };
            report.push(BulkItemResult { entity: item.entity, action, outcome });
        }

        info!(
            event_name = "approval.bulk.completed",
            actor = %actor.id,
            success_count = report.success_count,
            error_count = report.error_count,
            "bulk approval request processed"
        );
        report
    }

    /// Archives REJECTED records reviewed more than `days` before `now`.
    /// `days == 0` disables the sweep.
    pub async fn archive_stale_rejections(
        &self,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<EntityRef>, ApplicationError> {
        if days == 0 {
            return Ok(Vec::new());
        }

        let cutoff = now - Duration::days(i64::from(days));
        let rejected = self
            .repository
            .list_records(&RecordFilter::with_status(ApprovalStatus::Rejected))
            .await?;
        let command = ApprovalCommand::Archive {
            notes: format!("Auto-archived after {days} days in rejected status"),
        };

        let mut archived = Vec::new();
        let stale = rejected
            .iter()
            .filter(|record| record.reviewed_at.is_some_and(|reviewed_at| reviewed_at < cutoff));
        for record in stale {
            match self.execute_on(record, &command, &self.system_actor).await {
                Ok(updated) => archived.push(updated.entity),
                Err(error) if error.workflow().is_some() => {
                    warn!(
                        event_name = "approval.archive_stale.skipped",
                        entity_type = %record.entity.entity_type,
                        entity_id = %record.entity.entity_id,
                        "stale rejection skipped: {error}"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        info!(
            event_name = "approval.archive_stale.completed",
            days,
            archived = archived.len(),
            "stale rejections archived"
        );
        Ok(archived)
    }

    async fn plan_submission(
        &self,
        record: &ApprovalRecord,
        item: &dyn Approvable,
        submitter: &Actor,
    ) -> Result<TransitionResult, ApplicationError> {
        let approved_count = self.repository.count_approved_for_submitter(&submitter.id).await?;
        let facts = SubmissionFacts::gather(item, submitter, approved_count);
        let decision = self.rules.evaluate(&facts);

        if let Some(decision) = &decision {
            info!(
                event_name = "approval.rule.matched",
                entity_type = %record.entity.entity_type,
                entity_id = %record.entity.entity_id,
                rule_id = %decision.rule_id,
                rule_action = decision.action.as_str(),
                "approval rule matched on submission"
            );
        }

        Ok(self.engine.submit_with_decision(
            record,
            submitter,
            decision.as_ref(),
            &self.system_actor,
        )?)
    }

    async fn commit(
        &self,
        transition: TransitionResult,
    ) -> Result<ApprovalRecord, ApplicationError> {
        let correlation_id =
            transition.entries.first().map(|entry| entry.id.0.clone()).unwrap_or_default();

        match self.repository.commit_transition(&transition).await {
            Ok(()) => {
                let record = transition.record;
                info!(
                    event_name = "approval.transition.committed",
                    correlation_id = %correlation_id,
                    entity_type = %record.entity.entity_type,
                    entity_id = %record.entity.entity_id,
                    status = %record.status,
                    state_version = record.state_version,
                    entries = transition.entries.len(),
                    "approval transition committed"
                );
                Ok(record)
            }
            Err(error) => {
                warn!(
                    event_name = "approval.transition.not_committed",
                    correlation_id = %correlation_id,
                    entity_type = %transition.record.entity.entity_type,
                    entity_id = %transition.record.entity.entity_id,
                    expected_version = transition.expected_version,
                    "approval transition not committed: {error}"
                );
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use waymark_core::approvals::bulk::BulkItem;
    use waymark_core::approvals::engine::{
        ApprovalCommand, ApprovalEngine, WorkflowAction, WorkflowError,
    };
    use waymark_core::catalog::WorkflowCatalog;
    use waymark_core::config::AppConfig;
    use waymark_core::domain::approval::{
        Actor, ActorId, ApprovalPriority, ApprovalStatus, EntityRef, LogAction, ReviewOrigin,
    };
    use waymark_core::domain::content::{Review, Trip};
    use waymark_core::errors::{ApplicationError, DomainError};

    use super::ApprovalWorkflow;
    use crate::repositories::{
        ApprovalRepository, InMemoryApprovalRepository, SqlApprovalRepository,
    };
    use crate::{connect_with_settings, migrations};

    const CATALOG: &str = r#"
[[rules]]
id = "trusted-reviewers"
name = "Trusted reviewers"
entity_type = "review"
priority = 10
action = { kind = "auto_approve" }
conditions = [{ kind = "submitter_approved_count_at_least", count = 1 }]

[[rules]]
id = "long-trips"
name = "Long trips go to a senior reviewer"
entity_type = "trip"
priority = 20
action = { kind = "assign_reviewer", reviewer = "u-senior" }
conditions = [{ kind = "fact_at_least", fact = "stop_count", value = 10 }]

[[queues]]
slug = "trips"
name = "Trips"
entity_types = ["trip"]
display_order = 1

[[queues]]
slug = "reviews"
name = "Reviews"
entity_types = ["review"]
reviewers = ["u-senior"]
display_order = 2
"#;

    fn workflow() -> ApprovalWorkflow<InMemoryApprovalRepository> {
        let catalog = WorkflowCatalog::from_toml_str(CATALOG).expect("catalog");
        ApprovalWorkflow::new(
            InMemoryApprovalRepository::default(),
            catalog,
            &AppConfig::default().workflow,
        )
    }

    fn trip(id: &str, stop_count: u32) -> Trip {
        Trip {
            id: id.to_string(),
            title: format!("Trip {id}"),
            destination: "Porto".to_string(),
            day_count: 3,
            stop_count,
        }
    }

    fn review(id: &str) -> Review {
        Review {
            id: id.to_string(),
            rating: 4,
            body: "Great food and friendly hosts".to_string(),
            has_image: true,
        }
    }

    fn traveler() -> Actor {
        Actor::user("u-traveler")
    }

    fn staff() -> Actor {
        Actor::reviewer("u-staff")
    }

    #[tokio::test]
    async fn full_review_cycle_logs_each_step_in_order() {
        let workflow = workflow();
        let item = trip("1", 2);
        let entity = workflow.register(&item).await.expect("register").entity;

        workflow.submit_for_review(&item, &traveler()).await.expect("submit");
        assert_eq!(workflow.approval_history(&entity).await.expect("history").len(), 1);
        workflow.request_changes(&entity, &staff(), "add hotel names").await.expect("changes");
        assert_eq!(workflow.approval_history(&entity).await.expect("history").len(), 2);
        workflow.submit_for_review(&item, &traveler()).await.expect("resubmit");
        assert_eq!(workflow.approval_history(&entity).await.expect("history").len(), 3);
        let approved = workflow.approve(&entity, &staff(), "").await.expect("approve");

        assert!(approved.is_public());
        let history = workflow.approval_history(&entity).await.expect("history");
        let actions: Vec<LogAction> = history.iter().map(|entry| entry.action).collect();
        assert_eq!(
            actions,
            vec![
                LogAction::Submitted,
                LogAction::ChangesRequested,
                LogAction::Submitted,
                LogAction::Approved
            ]
        );
        assert!(workflow.verify_history(&entity).await.expect("verify").valid);
    }

    #[tokio::test]
    async fn refused_transitions_leave_no_trace() {
        let workflow = workflow();
        let item = trip("1", 2);
        let entity = workflow.register(&item).await.expect("register").entity;

        let error = workflow.approve(&entity, &staff(), "").await.expect_err("draft approve");
        assert_eq!(
            error.workflow(),
            Some(&WorkflowError::InvalidTransition {
                status: ApprovalStatus::Draft,
                action: WorkflowAction::Approve,
            })
        );

        workflow.submit_for_review(&item, &traveler()).await.expect("submit");
        workflow.approve(&entity, &staff(), "").await.expect("approve");
        let again = workflow.approve(&entity, &staff(), "").await.expect_err("double approve");
        assert!(matches!(again.workflow(), Some(WorkflowError::InvalidTransition { .. })));

        let self_review = workflow.reject(&entity, &traveler(), "no").await.expect_err("not staff");
        assert!(matches!(self_review.workflow(), Some(WorkflowError::UnauthorizedActor { .. })));

        assert_eq!(workflow.approval_history(&entity).await.expect("history").len(), 2);
    }

    #[tokio::test]
    async fn unknown_entities_are_not_found() {
        let workflow = workflow();
        let error = workflow
            .approve(&EntityRef::new("trip", "404"), &staff(), "")
            .await
            .expect_err("missing");
        assert_eq!(error, ApplicationError::NotFound("trip:404".to_string()));
    }

    #[tokio::test]
    async fn trusted_submitters_are_auto_approved_by_the_system() {
        let workflow = workflow();
        let first = review("1");
        let second = review("2");
        workflow.register(&first).await.expect("register first");
        workflow.register(&second).await.expect("register second");

        let pending = workflow.submit_for_review(&first, &traveler()).await.expect("submit first");
        assert!(pending.is_pending());
        workflow.approve(&pending.entity, &staff(), "").await.expect("approve first");

        let auto = workflow.submit_for_review(&second, &traveler()).await.expect("submit second");
        assert_eq!(auto.status, ApprovalStatus::Approved);
        assert_eq!(auto.reviewed_by, Some(workflow.system_actor().id.clone()));

        let history = workflow.approval_history(&auto.entity).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].actor, ActorId("system:approval-rules".to_string()));
        let rule_id = "trusted-reviewers".to_string();
        assert_eq!(history[1].origin, ReviewOrigin::Rule { rule_id });

        let stats = workflow.stats(None).await.expect("stats");
        assert_eq!(stats.automated_entries, 1);
    }

    #[tokio::test]
    async fn long_trips_are_assigned_to_a_senior_reviewer() {
        let workflow = workflow();
        let item = trip("9", 12);
        workflow.register(&item).await.expect("register");

        let record = workflow.submit_for_review(&item, &traveler()).await.expect("submit");
        assert!(record.is_pending());
        assert_eq!(record.assigned_reviewer, Some(ActorId("u-senior".to_string())));
    }

    #[tokio::test]
    async fn bulk_submissions_see_the_same_entity_facts() {
        let workflow = workflow();
        let (direct, queued) = (trip("direct", 12), trip("queued", 12));
        workflow.register(&direct).await.expect("register direct");
        workflow.register(&queued).await.expect("register queued");

        let direct = workflow.submit_for_review(&direct, &traveler()).await.expect("submit");
        let report = workflow.apply_bulk(vec![BulkItem::submit(&queued)], &traveler()).await;
        assert_eq!(report.success_count, 1);

        let queued = workflow.record(&EntityRef::new("trip", "queued")).await.expect("record");
        assert_eq!(queued.assigned_reviewer, direct.assigned_reviewer);
        assert_eq!(queued.assigned_reviewer, Some(ActorId("u-senior".to_string())));
    }

    #[tokio::test]
    async fn submit_without_content_is_refused() {
        let workflow = workflow();
        let item = trip("bare", 12);
        let entity = workflow.register(&item).await.expect("register").entity;

        let report = workflow
            .apply_bulk(vec![BulkItem::new(entity.clone(), ApprovalCommand::Submit)], &traveler())
            .await;
        assert_eq!(report.error_count, 1);
        let error = report.results[0].outcome.as_ref().expect_err("no content");
        assert_eq!(error.error_class(), "validation");

        let record = workflow.record(&entity).await.expect("record");
        assert!(record.is_draft());
        assert!(workflow.approval_history(&entity).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn archived_approvals_still_count_toward_trust() {
        let workflow = workflow();
        let (first, second) = (review("1"), review("2"));
        workflow.register(&first).await.expect("register first");
        workflow.register(&second).await.expect("register second");

        let pending = workflow.submit_for_review(&first, &traveler()).await.expect("submit");
        workflow.approve(&pending.entity, &staff(), "").await.expect("approve");
        workflow.archive(&pending.entity, &staff(), "superseded").await.expect("archive");

        let auto = workflow.submit_for_review(&second, &traveler()).await.expect("submit second");
        assert_eq!(auto.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn concurrent_reviews_of_one_snapshot_admit_exactly_one() {
        let workflow = workflow();
        let item = trip("1", 2);
        workflow.register(&item).await.expect("register");
        let snapshot = workflow.submit_for_review(&item, &traveler()).await.expect("submit");

        let first_reviewer = Actor::reviewer("u-a");
        let second_reviewer = Actor::reviewer("u-b");
        let approve = ApprovalCommand::Approve { notes: String::new() };
        let (first, second) = tokio::join!(
            workflow.execute_on(&snapshot, &approve, &first_reviewer),
            workflow.execute_on(&snapshot, &approve, &second_reviewer),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        let conflict = outcomes.iter().find_map(|outcome| outcome.as_ref().err()).expect("loser");
        assert!(matches!(conflict.workflow(), Some(WorkflowError::ConcurrentModification { .. })));

        let approvals = workflow
            .approval_history(&snapshot.entity)
            .await
            .expect("history")
            .into_iter()
            .filter(|entry| entry.action == LogAction::Approved)
            .count();
        assert_eq!(approvals, 1);
    }

    #[tokio::test]
    async fn queues_present_by_priority_then_age() {
        let workflow = workflow();
        let priorities = [
            ("a", ApprovalPriority::Normal),
            ("b", ApprovalPriority::Urgent),
            ("c", ApprovalPriority::Normal),
        ];
        for (id, priority) in priorities {
            let item = trip(id, 2);
            let entity = workflow.register(&item).await.expect("register").entity;
            workflow.submit_for_review(&item, &traveler()).await.expect("submit");
            if priority != ApprovalPriority::Normal {
                workflow.change_priority(&entity, &staff(), priority).await.expect("reprioritize");
            }
        }
        let reviewed = review("r");
        workflow.register(&reviewed).await.expect("register review");
        workflow.submit_for_review(&reviewed, &traveler()).await.expect("submit review");

        let ids: Vec<String> = workflow
            .pending_for("trips")
            .await
            .expect("pending")
            .into_iter()
            .map(|record| record.entity.entity_id)
            .collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        let everything = workflow.dashboard(None, Utc::now()).await.expect("dashboard");
        assert_eq!(everything.total, 4);
        let staff_view = workflow
            .dashboard(Some(&ActorId("u-staff".to_string())), Utc::now())
            .await
            .expect("dashboard");
        assert_eq!(staff_view.queues.len(), 1);
        assert_eq!(staff_view.queues[0].by_priority.get("urgent"), Some(&1));

        assert!(matches!(workflow.pending_for("nope").await, Err(ApplicationError::NotFound(_))));
    }

    #[tokio::test]
    async fn queue_pages_follow_items_per_page() {
        let mut config = AppConfig::default().workflow;
        config.items_per_page = 2;
        let catalog = WorkflowCatalog::from_toml_str(CATALOG).expect("catalog");
        let workflow =
            ApprovalWorkflow::new(InMemoryApprovalRepository::default(), catalog, &config);
        for id in ["a", "b", "c"] {
            let item = trip(id, 2);
            workflow.register(&item).await.expect("register");
            workflow.submit_for_review(&item, &traveler()).await.expect("submit");
        }

        let second = workflow.pending_page("trips", 2).await.expect("page two");
        assert_eq!((second.per_page, second.total, second.page_count), (2, 3, 2));
        assert_eq!(second.records.len(), 1);
        assert!(matches!(
            workflow.pending_page("nope", 1).await,
            Err(ApplicationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stored_records_with_stray_review_fields_are_refused() {
        let workflow = workflow();
        let mut record = ApprovalEngine::default()
            .register(EntityRef::new("trip", "odd"), ApprovalPriority::Normal);
        record.reviewed_by = Some(ActorId("u-staff".to_string()));
        workflow.repository().insert_record(&record).await.expect("insert");

        let error = workflow.approve(&record.entity, &staff(), "").await.expect_err("corrupt");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvariantViolation(_))));
        assert_eq!(error.error_class(), "invariant_violation");
        assert!(workflow.approval_history(&record.entity).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn bulk_actions_report_per_item_outcomes() {
        let workflow = workflow();
        let mut entities = Vec::new();
        for id in ["1", "2"] {
            let item = trip(id, 2);
            entities.push(workflow.register(&item).await.expect("register").entity);
            workflow.submit_for_review(&item, &traveler()).await.expect("submit");
        }
        workflow.register(&trip("draft", 2)).await.expect("register draft");

        let approve_blank = ApprovalCommand::Approve { notes: String::new() };
        let reject_blank = ApprovalCommand::Reject { notes: String::new() };
        let report = workflow
            .apply_bulk(
                vec![
                    BulkItem::new(entities[0].clone(), reject_blank),
                    BulkItem::new(EntityRef::new("trip", "draft"), approve_blank.clone()),
                    BulkItem::new(entities[1].clone(), approve_blank),
                ],
                &staff(),
            )
            .await;

        assert_eq!(report.success_count, 2);
        assert_eq!(report.error_count, 1);
        assert!(!report.results[1].is_success());

        let history = workflow.approval_history(&entities[0]).await.expect("history");
        assert_eq!(history[1].notes, "Bulk rejected by u-staff");
        let approved = workflow.record(&entities[1]).await.expect("record");
        assert!(approved.is_public());
    }

    #[tokio::test]
    async fn stale_rejections_are_archived_by_the_system() {
        let workflow = workflow();
        let item = trip("1", 2);
        let entity = workflow.register(&item).await.expect("register").entity;
        workflow.submit_for_review(&item, &traveler()).await.expect("submit");
        workflow.reject(&entity, &staff(), "duplicate").await.expect("reject");

        let disabled = workflow.archive_stale_rejections(0, Utc::now()).await.expect("disabled");
        assert!(disabled.is_empty());
        let fresh = workflow.archive_stale_rejections(30, Utc::now()).await.expect("too fresh");
        assert!(fresh.is_empty());

        let archived = workflow
            .archive_stale_rejections(30, Utc::now() + Duration::days(31))
            .await
            .expect("archive");
        assert_eq!(archived, vec![entity.clone()]);

        let record = workflow.record(&entity).await.expect("record");
        assert_eq!(record.status, ApprovalStatus::Archived);
        let history = workflow.approval_history(&entity).await.expect("history");
        let last_actor = history.last().map(|entry| entry.actor.clone());
        assert_eq!(last_actor, Some(workflow.system_actor().id.clone()));
    }

    #[tokio::test]
    async fn sqlite_backed_race_commits_one_review() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let workflow = ApprovalWorkflow::new(
            SqlApprovalRepository::new(pool),
            WorkflowCatalog::default(),
            &AppConfig::default().workflow,
        );

        let item = review("1");
        workflow.register(&item).await.expect("register");
        let snapshot = workflow.submit_for_review(&item, &traveler()).await.expect("submit");

        let (approver, rejecter) = (Actor::reviewer("u-a"), Actor::reviewer("u-b"));
        let approve = ApprovalCommand::Approve { notes: String::new() };
        let reject = ApprovalCommand::Reject { notes: "spam".to_string() };
        let (first, second) = tokio::join!(
            workflow.execute_on(&snapshot, &approve, &approver),
            workflow.execute_on(&snapshot, &reject, &rejecter),
        );
        assert!(first.is_ok() != second.is_ok());

        let history = workflow.approval_history(&snapshot.entity).await.expect("history");
        assert_eq!(history.len(), 2);
        assert!(workflow.verify_history(&snapshot.entity).await.expect("verify").valid);
    }
}
