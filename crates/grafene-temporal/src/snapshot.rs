//! Per-timestep graph snapshots.

use crate::fact::Fact;
use crate::{Error, Result};
use smallvec::SmallVec;
use std::collections::HashMap;

/// A directed, relation-labeled edge between two local node indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Source node (local index).
    pub src: u32,
    /// Relation id in `[0, 2 * num_relations)`.
    pub relation: u32,
    /// Destination node (local index).
    pub dst: u32,
}

/// The graph of facts active at one timestep.
///
/// Nodes are the entities mentioned by the facts, indexed positionally in
/// order of first appearance. Every fact contributes a forward edge and an
/// inverse edge (`relation + num_relations`, endpoints swapped), so the edge
/// list always has even length and `edges[i + n/2]` is the inverse of
/// `edges[i]`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Global entity id per local node.
    node_ids: Vec<u32>,
    /// Forward edges followed by their inverses.
    edges: Vec<Edge>,
    /// (src, relation) -> true dst nodes, local indices, both directions.
    targets: HashMap<(u32, u32), SmallVec<[u32; 4]>>,
    /// Number of forward relations.
    num_relations: u32,
}

impl Snapshot {
    /// Build a snapshot from the facts that hold at one timestep.
    ///
    /// Duplicate facts are kept once.
    pub fn from_facts<'a>(
        facts: impl IntoIterator<Item = &'a Fact>,
        num_relations: u32,
    ) -> Result<Self> {
        let mut node_ids = Vec::new();
        let mut local: HashMap<u32, u32> = HashMap::new();
        let mut forward = Vec::new();
        let mut targets: HashMap<(u32, u32), SmallVec<[u32; 4]>> = HashMap::new();

        for fact in facts {
            if fact.relation >= num_relations {
                return Err(Error::RelationOutOfRange {
                    relation: fact.relation,
                    num_relations,
                });
            }
            let s = intern(&mut local, &mut node_ids, fact.subject);
            let o = intern(&mut local, &mut node_ids, fact.object);

            let objects = targets.entry((s, fact.relation)).or_default();
            if objects.contains(&o) {
                continue;
            }
            objects.push(o);
            targets
                .entry((o, fact.relation + num_relations))
                .or_default()
                .push(s);
            forward.push(Edge {
                src: s,
                relation: fact.relation,
                dst: o,
            });
        }

        let mut edges = forward.clone();
        edges.extend(forward.iter().map(|e| Edge {
            src: e.dst,
            relation: e.relation + num_relations,
            dst: e.src,
        }));

        Ok(Self {
            node_ids,
            edges,
            targets,
            num_relations,
        })
    }

    /// Global entity id of every node, in local index order.
    pub fn node_ids(&self) -> &[u32] {
        &self.node_ids
    }

    /// All edges (forward, then inverse).
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Forward edges only.
    pub fn forward_edges(&self) -> &[Edge] {
        &self.edges[..self.edges.len() / 2]
    }

    /// True destinations of `(src, relation)` in this snapshot.
    pub fn targets(&self, src: u32, relation: u32) -> &[u32] {
        self.targets
            .get(&(src, relation))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `(src, relation, dst)` (local indices) is a true edge.
    pub fn contains(&self, src: u32, relation: u32, dst: u32) -> bool {
        self.targets(src, relation).contains(&dst)
    }

    /// Number of active entities.
    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    /// Number of edges, inverses included.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Number of forward relations this snapshot was built with.
    pub fn num_relations(&self) -> u32 {
        self.num_relations
    }

    /// Whether the snapshot has no facts.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

fn intern(local: &mut HashMap<u32, u32>, node_ids: &mut Vec<u32>, id: u32) -> u32 {
    *local.entry(id).or_insert_with(|| {
        node_ids.push(id);
        (node_ids.len() - 1) as u32
    })
}
