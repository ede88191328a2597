use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::approval::{Approvable, ApprovalPriority, EntityRef, FactValue};

/// User-planned itinerary submitted for public listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    pub title: String,
    pub destination: String,
    pub day_count: u32,
    pub stop_count: u32,
}

impl Approvable for Trip {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new("trip", &self.id)
    }

    fn facts(&self) -> BTreeMap<String, FactValue> {
        let mut facts = BTreeMap::new();
        facts.insert("day_count".to_string(), FactValue::Int(i64::from(self.day_count)));
        facts.insert("stop_count".to_string(), FactValue::Int(i64::from(self.stop_count)));
        facts.insert("destination".to_string(), FactValue::Text(self.destination.clone()));
        facts
    }
}

/// Traveler review of a destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub rating: u8,
    pub body: String,
    pub has_image: bool,
}

impl Review {
    pub fn word_count(&self) -> usize {
        self.body.split_whitespace().count()
    }
}

impl Approvable for Review {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new("review", &self.id)
    }

    /// Low ratings get looked at first.
    fn default_priority(&self) -> ApprovalPriority {
        if self.rating <= 1 {
            ApprovalPriority::High
        } else {
            ApprovalPriority::Normal
        }
    }

    fn facts(&self) -> BTreeMap<String, FactValue> {
        let mut facts = BTreeMap::new();
        facts.insert("rating".to_string(), FactValue::Int(i64::from(self.rating)));
        facts.insert(
            "word_count".to_string(),
            FactValue::Int(i64::try_from(self.word_count()).unwrap_or(i64::MAX)),
        );
        facts.insert("has_image".to_string(), FactValue::Bool(self.has_image));
        facts
    }
}

#[cfg(test)]
mod tests {
    use super::{Review, Trip};
    use crate::domain::approval::{Approvable, ApprovalPriority, EntityRef, FactValue};

    #[test]
    fn review_exposes_rule_facts() {
        let review = Review {
            id: "12".to_string(),
            rating: 1,
            body: "The ferry never came and nobody answered".to_string(),
            has_image: false,
        };

        assert_eq!(review.entity_ref(), EntityRef::new("review", "12"));
        assert_eq!(review.default_priority(), ApprovalPriority::High);
        let facts = review.facts();
        assert_eq!(facts.get("word_count"), Some(&FactValue::Int(7)));
        assert_eq!(facts.get("has_image"), Some(&FactValue::Bool(false)));
    }

    #[test]
    fn trips_default_to_normal_priority() {
        let trip = Trip {
            id: "3".to_string(),
            title: "Coastal loop".to_string(),
            destination: "Lisbon".to_string(),
            day_count: 5,
            stop_count: 11,
        };
        assert_eq!(trip.default_priority(), ApprovalPriority::Normal);
        assert_eq!(trip.facts().get("stop_count"), Some(&FactValue::Int(11)));
    }
}
