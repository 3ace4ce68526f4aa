//! Time-ordered snapshot storage.

use crate::fact::{Fact, TemporalFact, Timestamp};
use crate::snapshot::Snapshot;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// A temporal knowledge graph stored as one snapshot per timestep.
///
/// Times are expected on a regular grid: the time unit is the gap between the
/// first two registered times, and a query time `t` maps to the timestep index
/// `(t - first_time) / unit`.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    /// Snapshot per time, ordered.
    snapshots: BTreeMap<Timestamp, Snapshot>,
    /// Registered times, ascending (cached keys of `snapshots`).
    times: Vec<Timestamp>,
    /// Number of forward relations.
    num_relations: u32,
}

impl SnapshotHistory {
    /// Create an empty history.
    pub fn new(num_relations: u32) -> Self {
        Self {
            snapshots: BTreeMap::new(),
            times: Vec::new(),
            num_relations,
        }
    }

    /// Group temporal facts by time and build one snapshot per time.
    pub fn from_facts(
        facts: impl IntoIterator<Item = TemporalFact>,
        num_relations: u32,
    ) -> Result<Self> {
        let mut by_time: BTreeMap<Timestamp, Vec<Fact>> = BTreeMap::new();
        for tf in facts {
            by_time.entry(tf.time).or_default().push(tf.fact);
        }

        let mut history = Self::new(num_relations);
        for (time, facts) in by_time {
            history.insert(time, Snapshot::from_facts(&facts, num_relations)?)?;
        }
        Ok(history)
    }

    /// Register a snapshot at `time`, replacing any previous one.
    pub fn insert(&mut self, time: Timestamp, snapshot: Snapshot) -> Result<()> {
        if snapshot.num_relations() != self.num_relations {
            return Err(Error::RelationCountMismatch {
                expected: self.num_relations,
                got: snapshot.num_relations(),
            });
        }
        if self.snapshots.insert(time, snapshot).is_none() {
            let pos = self.times.partition_point(|&t| t < time);
            self.times.insert(pos, time);
        }
        Ok(())
    }

    /// Union of several histories (e.g. train, dev and test splits).
    ///
    /// Later histories win when two register the same time.
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a SnapshotHistory>) -> Result<Self> {
        let mut parts = parts.into_iter().peekable();
        let num_relations = parts.peek().map_or(0, |h| h.num_relations);
        let mut merged = Self::new(num_relations);
        for part in parts {
            for (&time, snapshot) in &part.snapshots {
                merged.insert(time, snapshot.clone())?;
            }
        }
        Ok(merged)
    }

    /// Snapshot registered at `time`.
    pub fn get(&self, time: Timestamp) -> Option<&Snapshot> {
        self.snapshots.get(&time)
    }

    /// Registered times, ascending.
    pub fn times(&self) -> &[Timestamp] {
        &self.times
    }

    /// Gap between consecutive timesteps.
    ///
    /// A history with fewer than two times has unit 1.
    pub fn time_unit(&self) -> Timestamp {
        match self.times.as_slice() {
            [first, second, ..] => second - first,
            _ => 1,
        }
    }

    /// Timestep index of `time` on the history's grid.
    ///
    /// Fails when the index falls outside the history or the registered time
    /// at that index differs from `time`.
    pub fn index_of(&self, time: Timestamp) -> Result<usize> {
        let first = *self.times.first().ok_or(Error::UnknownTime(time))?;
        let unit = self.time_unit();
        if time < first || unit == 0 {
            return Err(Error::UnknownTime(time));
        }
        let index = ((time - first) / unit) as usize;
        match self.times.get(index) {
            Some(&t) if t == time => Ok(index),
            _ => Err(Error::UnknownTime(time)),
        }
    }

    /// Number of forward relations.
    pub fn num_relations(&self) -> u32 {
        self.num_relations
    }

    /// Number of timesteps.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether no timestep is registered.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Snapshots in time order.
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, &Snapshot)> {
        self.snapshots.iter().map(|(&t, s)| (t, s))
    }

    /// Largest global entity id mentioned anywhere, if any.
    pub fn max_entity_id(&self) -> Option<u32> {
        self.iter()
            .flat_map(|(_, s)| s.node_ids().iter().copied())
            .max()
    }
}
