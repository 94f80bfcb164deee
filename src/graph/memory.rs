//! In-memory graph store
//!
//! Arena of node and relationship records keyed by store-assigned ids.
//! Ids are never reused. A unit of work snapshots the whole arena on
//! `begin` and restores it on `rollback`, which is plenty for tests,
//! benchmarks and short-lived tools.

use crate::graph::{
    Direction, GraphError, GraphResult, GraphStore, NodeId, PropertyValue, RelId, RelType,
    Relationship,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
struct NodeRecord {
    properties: HashMap<String, PropertyValue>,
    /// Attached relationships in creation order (both directions)
    rels: Vec<RelId>,
}

#[derive(Debug, Clone)]
struct RelRecord {
    start: NodeId,
    end: NodeId,
    rel_type: RelType,
    properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Default)]
struct Arena {
    nodes: BTreeMap<NodeId, NodeRecord>,
    rels: BTreeMap<RelId, RelRecord>,
    next_node: u64,
    next_rel: u64,
}

/// Arena-backed graph store
#[derive(Debug, Default)]
pub struct MemoryGraph {
    arena: Arena,
    /// Snapshot taken when the current unit of work began
    snapshot: Option<Arena>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.arena.nodes.len()
    }

    /// Number of live relationships
    pub fn relationship_count(&self) -> usize {
        self.arena.rels.len()
    }

    fn node(&self, node: NodeId) -> GraphResult<&NodeRecord> {
        self.arena
            .nodes
            .get(&node)
            .ok_or(GraphError::NodeNotFound(node))
    }

    fn node_mut(&mut self, node: NodeId) -> GraphResult<&mut NodeRecord> {
        self.arena
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::NodeNotFound(node))
    }

    fn rel(&self, rel: RelId) -> GraphResult<&RelRecord> {
        self.arena
            .rels
            .get(&rel)
            .ok_or(GraphError::RelationshipNotFound(rel))
    }

    fn to_relationship(id: RelId, record: &RelRecord) -> Relationship {
        Relationship {
            id,
            start: record.start,
            end: record.end,
            rel_type: record.rel_type.clone(),
        }
    }
}

impl GraphStore for MemoryGraph {
    fn create_node(&mut self) -> GraphResult<NodeId> {
        self.arena.next_node += 1;
        let id = NodeId(self.arena.next_node);
        self.arena.nodes.insert(id, NodeRecord::default());
        Ok(id)
    }

    fn delete_node(&mut self, node: NodeId) -> GraphResult<()> {
        let count = self.node(node)?.rels.len();
        if count > 0 {
            return Err(GraphError::NodeInUse { node, count });
        }
        self.arena.nodes.remove(&node);
        Ok(())
    }

    fn node_exists(&self, node: NodeId) -> GraphResult<bool> {
        Ok(self.arena.nodes.contains_key(&node))
    }

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &RelType,
    ) -> GraphResult<Relationship> {
        self.node(start)?;
        self.node(end)?;

        self.arena.next_rel += 1;
        let id = RelId(self.arena.next_rel);
        let record = RelRecord {
            start,
            end,
            rel_type: rel_type.clone(),
            properties: HashMap::new(),
        };
        let rel = Self::to_relationship(id, &record);
        self.arena.rels.insert(id, record);

        self.node_mut(start)?.rels.push(id);
        if start != end {
            self.node_mut(end)?.rels.push(id);
        }
        Ok(rel)
    }

    fn delete_relationship(&mut self, rel: RelId) -> GraphResult<()> {
        let record = self
            .arena
            .rels
            .remove(&rel)
            .ok_or(GraphError::RelationshipNotFound(rel))?;

        for node in [record.start, record.end] {
            if let Some(n) = self.arena.nodes.get_mut(&node) {
                n.rels.retain(|r| *r != rel);
            }
        }
        Ok(())
    }

    fn relationship(&self, rel: RelId) -> GraphResult<Relationship> {
        Ok(Self::to_relationship(rel, self.rel(rel)?))
    }

    fn relationships(
        &self,
        node: NodeId,
        rel_type: &RelType,
        direction: Direction,
    ) -> GraphResult<Vec<Relationship>> {
        let record = self.node(node)?;
        let mut result = Vec::new();
        for id in &record.rels {
            let rel = Self::to_relationship(*id, self.rel(*id)?);
            if rel.rel_type == *rel_type && direction.matches(&rel, node) {
                result.push(rel);
            }
        }
        Ok(result)
    }

    fn node_property(&self, node: NodeId, key: &str) -> GraphResult<Option<PropertyValue>> {
        Ok(self.node(node)?.properties.get(key).cloned())
    }

    fn set_node_property(
        &mut self,
        node: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        self.node_mut(node)?
            .properties
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove_node_property(&mut self, node: NodeId, key: &str) -> GraphResult<()> {
        self.node_mut(node)?.properties.remove(key);
        Ok(())
    }

    fn rel_property(&self, rel: RelId, key: &str) -> GraphResult<Option<PropertyValue>> {
        Ok(self.rel(rel)?.properties.get(key).cloned())
    }

    fn set_rel_property(
        &mut self,
        rel: RelId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        self.arena
            .rels
            .get_mut(&rel)
            .ok_or(GraphError::RelationshipNotFound(rel))?
            .properties
            .insert(key.to_string(), value);
        Ok(())
    }

    fn nodes_with_property(&self, key: &str, value: &PropertyValue) -> GraphResult<Vec<NodeId>> {
        Ok(self
            .arena
            .nodes
            .iter()
            .filter(|(_, record)| record.properties.get(key) == Some(value))
            .map(|(id, _)| *id)
            .collect())
    }

    fn begin(&mut self) -> GraphResult<()> {
        if self.snapshot.is_some() {
            return Err(GraphError::Transaction(
                "unit of work already open".to_string(),
            ));
        }
        self.snapshot = Some(self.arena.clone());
        Ok(())
    }

    fn commit(&mut self) -> GraphResult<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| GraphError::Transaction("commit without begin".to_string()))
    }

    fn rollback(&mut self) -> GraphResult<()> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| GraphError::Transaction("rollback without begin".to_string()))?;
        self.arena = snapshot;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}
