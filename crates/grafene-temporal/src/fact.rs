//! Timestamped fact types.

use serde::{Deserialize, Serialize};

/// Timestamp type (arbitrary integer units, e.g. days since dataset start).
pub type Timestamp = u64;

/// A `(subject, relation, object)` fact over global entity/relation ids.
///
/// Relation ids are forward ids in `[0, num_relations)`. Inverse relations
/// (`r + num_relations`) are only ever materialized as snapshot edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    /// Subject entity id.
    pub subject: u32,
    /// Relation id.
    pub relation: u32,
    /// Object entity id.
    pub object: u32,
}

impl Fact {
    /// Create a new fact.
    pub fn new(subject: u32, relation: u32, object: u32) -> Self {
        Self {
            subject,
            relation,
            object,
        }
    }

    /// The inverse fact `(object, relation + num_relations, subject)`.
    pub fn inverse(&self, num_relations: u32) -> Self {
        Self {
            subject: self.object,
            relation: self.relation + num_relations,
            object: self.subject,
        }
    }
}

/// A fact that holds at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalFact {
    /// The fact itself.
    pub fact: Fact,
    /// Time at which it holds.
    pub time: Timestamp,
}

impl TemporalFact {
    /// Create a new temporal fact.
    pub fn new(subject: u32, relation: u32, object: u32, time: Timestamp) -> Self {
        Self {
            fact: Fact::new(subject, relation, object),
            time,
        }
    }
}

impl PartialOrd for TemporalFact {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TemporalFact {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.fact.subject.cmp(&other.fact.subject))
            .then_with(|| self.fact.relation.cmp(&other.fact.relation))
            .then_with(|| self.fact.object.cmp(&other.fact.object))
    }
}
