use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::approvals::{contains_key, normalize_key};
use crate::domain::approval::{Actor, ActorId, Approvable, FactValue};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCondition {
    SubmitterApprovedCountAtLeast { count: u32 },
    SubmitterInGroup { group: String },
    FactEquals { fact: String, value: FactValue },
    FactAtLeast { fact: String, value: i64 },
}

impl RuleCondition {
    fn holds(&self, facts: &SubmissionFacts) -> bool {
        match self {
            Self::SubmitterApprovedCountAtLeast { count } => {
                facts.submitter_approved_count >= *count
            }
            Self::SubmitterInGroup { group } => {
                facts.submitter_groups.iter().any(|candidate| contains_key(group, candidate))
            }
            Self::FactEquals { fact, value } => facts.entity_facts.get(fact) == Some(value),
            Self::FactAtLeast { fact, value } => facts
                .entity_facts
                .get(fact)
                .and_then(FactValue::as_int)
                .is_some_and(|actual| actual >= *value),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleAction {
    AutoApprove,
    AutoReject,
    AssignReviewer { reviewer: ActorId },
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::AutoReject => "auto_reject",
            Self::AssignReviewer { .. } => "assign_reviewer",
        }
    }
}

/// Configured rule consulted when an entity is submitted. Conditions are
/// ANDed; a rule without conditions matches every submission of its type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub entity_type: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub action: RuleAction,
}

impl ApprovalRule {
    pub fn matches(&self, facts: &SubmissionFacts) -> bool {
        if !self.active || normalize_key(&self.entity_type) != normalize_key(&facts.entity_type) {
            return false;
        }

        self.conditions.iter().all(|condition| condition.holds(facts))
    }
}

fn default_active() -> bool {
    true
}

/// Everything a rule may look at for one submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFacts {
    pub entity_type: String,
    pub submitter_approved_count: u32,
    pub submitter_groups: BTreeSet<String>,
    pub entity_facts: BTreeMap<String, FactValue>,
}

impl SubmissionFacts {
    pub fn gather(item: &dyn Approvable, submitter: &Actor, submitter_approved_count: u32) -> Self {
        Self {
            entity_type: item.entity_ref().entity_type,
            submitter_approved_count,
            submitter_groups: submitter.groups.clone(),
            entity_facts: item.facts(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub rule_id: String,
    pub rule_name: String,
    pub action: RuleAction,
}

#[derive(Clone, Debug, Default)]
pub struct RuleEvaluator {
    rules: Vec<ApprovalRule>,
}

impl RuleEvaluator {
    /// Rules are evaluated in ascending `priority`, ties broken by id.
    pub fn new(mut rules: Vec<ApprovalRule>) -> Self {
        rules.sort_by(|left, right| {
            left.priority.cmp(&right.priority).then_with(|| left.id.cmp(&right.id))
        });
        Self { rules }
    }

    pub fn rules(&self) -> &[ApprovalRule] {
        &self.rules
    }

    /// First matching active rule wins.
    pub fn evaluate(&self, facts: &SubmissionFacts) -> Option<RuleDecision> {
        self.rules.iter().find(|rule| rule.matches(facts)).map(|rule| RuleDecision {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            action: rule.action.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{ApprovalRule, RuleAction, RuleCondition, RuleEvaluator, SubmissionFacts};
    use crate::domain::approval::{ActorId, FactValue};

    fn rule(
        id: &str,
        priority: i32,
        conditions: Vec<RuleCondition>,
        action: RuleAction,
    ) -> ApprovalRule {
        ApprovalRule {
            id: id.to_string(),
            name: id.replace('-', " "),
            description: String::new(),
            entity_type: "review".to_string(),
            active: true,
            priority,
            conditions,
            action,
        }
    }

    fn facts(approved: u32) -> SubmissionFacts {
        let mut entity_facts = BTreeMap::new();
        entity_facts.insert("word_count".to_string(), FactValue::Int(240));
        entity_facts.insert("has_image".to_string(), FactValue::Bool(true));
        SubmissionFacts {
            entity_type: "review".to_string(),
            submitter_approved_count: approved,
            submitter_groups: ["editors".to_string()].into_iter().collect(),
            entity_facts,
        }
    }

    #[test]
    fn lowest_priority_number_wins_when_several_match() {
        let evaluator = RuleEvaluator::new(vec![
            rule("assign-senior", 20, vec![], RuleAction::AssignReviewer {
                reviewer: ActorId("u-senior".to_string()),
            }),
            rule(
                "trusted",
                10,
                vec![RuleCondition::SubmitterApprovedCountAtLeast { count: 5 }],
                RuleAction::AutoApprove,
            ),
        ]);

        let decision = evaluator.evaluate(&facts(6)).expect("a rule matches");
        assert_eq!(decision.rule_id, "trusted");
        assert_eq!(decision.action, RuleAction::AutoApprove);

        let fallback = evaluator.evaluate(&facts(2)).expect("catch-all matches");
        assert_eq!(fallback.rule_id, "assign-senior");
    }

    #[test]
    fn ties_break_on_rule_id() {
        let evaluator = RuleEvaluator::new(vec![
            rule("b-rule", 1, vec![], RuleAction::AutoReject),
            rule("a-rule", 1, vec![], RuleAction::AutoApprove),
        ]);
        let winner = evaluator.evaluate(&facts(0)).map(|decision| decision.rule_id);
        assert_eq!(winner.as_deref(), Some("a-rule"));
    }

    #[test]
    fn inactive_rules_and_other_entity_types_never_match() {
        let mut inactive = rule("inactive", 1, vec![], RuleAction::AutoApprove);
        inactive.active = false;
        let mut trips = rule("trips", 2, vec![], RuleAction::AutoApprove);
        trips.entity_type = "trip".to_string();

        let evaluator = RuleEvaluator::new(vec![inactive, trips]);
        assert!(evaluator.evaluate(&facts(10)).is_none());
    }

    #[test]
    fn conditions_are_combined_with_and() {
        let evaluator = RuleEvaluator::new(vec![rule(
            "long-illustrated-editor-review",
            1,
            vec![
                RuleCondition::SubmitterInGroup { group: "Editors".to_string() },
                RuleCondition::FactAtLeast { fact: "word_count".to_string(), value: 200 },
                RuleCondition::FactEquals {
                    fact: "has_image".to_string(),
                    value: FactValue::Bool(true),
                },
            ],
            RuleAction::AutoApprove,
        )]);
        assert!(evaluator.evaluate(&facts(0)).is_some());

        let mut short = facts(0);
        short.entity_facts.insert("word_count".to_string(), FactValue::Int(50));
        assert!(evaluator.evaluate(&short).is_none());

        let mut outsider = facts(0);
        outsider.submitter_groups.clear();
        assert!(evaluator.evaluate(&outsider).is_none());
    }

    #[test]
    fn missing_facts_do_not_match() {
        let evaluator = RuleEvaluator::new(vec![rule(
            "rated",
            1,
            vec![RuleCondition::FactAtLeast { fact: "rating".to_string(), value: 4 }],
            RuleAction::AutoApprove,
        )]);
        assert!(evaluator.evaluate(&facts(0)).is_none());
    }
}
