//! Backing Graph Store
//!
//! The timeline keeps all of its state as nodes, typed relationships and
//! properties inside a property graph. This module defines the capability
//! contract the timeline needs from such a store, plus two implementations:
//!
//! - **MemoryGraph**: arena-backed store, snapshot transactions
//! - **SqliteGraph**: SQLite-backed persistent store
//!
//! # Model
//!
//! ```text
//! (node)-[:TYPE {key: value}]->(node)
//!
//! nodes          : store-assigned NodeId, property map
//! relationships  : store-assigned RelId, start, end, type, property map
//! ```
//!
//! Identifiers are stable handles assigned by the store. Nothing in the
//! timeline holds references into the store itself.

mod error;
mod memory;
mod sqlite;

pub use error::{GraphError, GraphResult};
pub use memory::MemoryGraph;
pub use sqlite::SqliteGraph;

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Store-assigned node handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node[{}]", self.0)
    }
}

/// Store-assigned relationship handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl fmt::Display for RelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relationship[{}]", self.0)
    }
}

/// Relationship type name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelType(Cow<'static, str>);

impl RelType {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which end of a relationship a node sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Relationships starting at the node
    Outgoing,
    /// Relationships ending at the node
    Incoming,
    /// Either end
    Both,
}

impl Direction {
    /// Check whether a relationship matches this direction relative to `node`
    pub fn matches(self, rel: &Relationship, node: NodeId) -> bool {
        match self {
            Direction::Outgoing => rel.start == node,
            Direction::Incoming => rel.end == node,
            Direction::Both => rel.start == node || rel.end == node,
        }
    }
}

/// Property value stored on a node or relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Str(String),
}

impl PropertyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            PropertyValue::Int(_) => None,
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value as i64)
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(value as i64)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// A directed, typed relationship between two nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: RelId,
    pub start: NodeId,
    pub end: NodeId,
    pub rel_type: RelType,
}

impl Relationship {
    /// The node at the opposite end from `node`
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }
}

/// Capability contract of a property graph store
///
/// Relationship listings are returned in creation order. Deleting a node
/// that still has relationships attached is refused with
/// [`GraphError::NodeInUse`].
pub trait GraphStore {
    fn create_node(&mut self) -> GraphResult<NodeId>;

    fn delete_node(&mut self, node: NodeId) -> GraphResult<()>;

    fn node_exists(&self, node: NodeId) -> GraphResult<bool>;

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &RelType,
    ) -> GraphResult<Relationship>;

    fn delete_relationship(&mut self, rel: RelId) -> GraphResult<()>;

    fn relationship(&self, rel: RelId) -> GraphResult<Relationship>;

    /// All relationships of `rel_type` attached to `node` in `direction`
    fn relationships(
        &self,
        node: NodeId,
        rel_type: &RelType,
        direction: Direction,
    ) -> GraphResult<Vec<Relationship>>;

    fn node_property(&self, node: NodeId, key: &str) -> GraphResult<Option<PropertyValue>>;

    fn set_node_property(
        &mut self,
        node: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()>;

    fn remove_node_property(&mut self, node: NodeId, key: &str) -> GraphResult<()>;

    fn rel_property(&self, rel: RelId, key: &str) -> GraphResult<Option<PropertyValue>>;

    fn set_rel_property(&mut self, rel: RelId, key: &str, value: PropertyValue)
        -> GraphResult<()>;

    /// Nodes carrying `key = value`, ascending by id
    fn nodes_with_property(&self, key: &str, value: &PropertyValue) -> GraphResult<Vec<NodeId>>;

    /// Start a unit of work
    fn begin(&mut self) -> GraphResult<()>;

    fn commit(&mut self) -> GraphResult<()>;

    fn rollback(&mut self) -> GraphResult<()>;

    fn in_transaction(&self) -> bool;

    /// The only relationship of `rel_type` in `direction`, if any
    ///
    /// More than one match is reported as [`GraphError::AmbiguousRelationship`].
    fn single_relationship(
        &self,
        node: NodeId,
        rel_type: &RelType,
        direction: Direction,
    ) -> GraphResult<Option<Relationship>> {
        let mut rels = self.relationships(node, rel_type, direction)?;
        match rels.len() {
            0 => Ok(None),
            1 => Ok(rels.pop()),
            count => Err(GraphError::AmbiguousRelationship {
                node,
                rel_type: rel_type.to_string(),
                count,
            }),
        }
    }

    fn node_i64(&self, node: NodeId, key: &str) -> GraphResult<Option<i64>> {
        Ok(self.node_property(node, key)?.and_then(|v| v.as_i64()))
    }

    fn node_str(&self, node: NodeId, key: &str) -> GraphResult<Option<String>> {
        Ok(self.node_property(node, key)?.and_then(|v| match v {
            PropertyValue::Str(s) => Some(s),
            PropertyValue::Int(_) => None,
        }))
    }

    fn rel_i64(&self, rel: RelId, key: &str) -> GraphResult<Option<i64>> {
        Ok(self.rel_property(rel, key)?.and_then(|v| v.as_i64()))
    }

    fn rel_str(&self, rel: RelId, key: &str) -> GraphResult<Option<String>> {
        Ok(self.rel_property(rel, key)?.and_then(|v| match v {
            PropertyValue::Str(s) => Some(s),
            PropertyValue::Int(_) => None,
        }))
    }
}

impl<G: GraphStore + ?Sized> GraphStore for &mut G {
    fn create_node(&mut self) -> GraphResult<NodeId> {
        (**self).create_node()
    }

    fn delete_node(&mut self, node: NodeId) -> GraphResult<()> {
        (**self).delete_node(node)
    }

    fn node_exists(&self, node: NodeId) -> GraphResult<bool> {
        (**self).node_exists(node)
    }

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &RelType,
    ) -> GraphResult<Relationship> {
        (**self).create_relationship(start, end, rel_type)
    }

    fn delete_relationship(&mut self, rel: RelId) -> GraphResult<()> {
        (**self).delete_relationship(rel)
    }

    fn relationship(&self, rel: RelId) -> GraphResult<Relationship> {
        (**self).relationship(rel)
    }

    fn relationships(
        &self,
        node: NodeId,
        rel_type: &RelType,
        direction: Direction,
    ) -> GraphResult<Vec<Relationship>> {
        (**self).relationships(node, rel_type, direction)
    }

    fn node_property(&self, node: NodeId, key: &str) -> GraphResult<Option<PropertyValue>> {
        (**self).node_property(node, key)
    }

    fn set_node_property(
        &mut self,
        node: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        (**self).set_node_property(node, key, value)
    }

    fn remove_node_property(&mut self, node: NodeId, key: &str) -> GraphResult<()> {
        (**self).remove_node_property(node, key)
    }

    fn rel_property(&self, rel: RelId, key: &str) -> GraphResult<Option<PropertyValue>> {
        (**self).rel_property(rel, key)
    }

    fn set_rel_property(
        &mut self,
        rel: RelId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        (**self).set_rel_property(rel, key, value)
    }

    fn nodes_with_property(&self, key: &str, value: &PropertyValue) -> GraphResult<Vec<NodeId>> {
        (**self).nodes_with_property(key, value)
    }

    fn begin(&mut self) -> GraphResult<()> {
        (**self).begin()
    }

    fn commit(&mut self) -> GraphResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> GraphResult<()> {
        (**self).rollback()
    }

    fn in_transaction(&self) -> bool {
        (**self).in_transaction()
    }
}

/// Run `f` as one unit of work against `store`
///
/// When a unit of work is already open, `f` joins it and the outer caller
/// decides on commit. Otherwise a new unit is started, committed on `Ok`
/// and rolled back on `Err`.
pub fn atomic<G, T, E, F>(store: &mut G, f: F) -> Result<T, E>
where
    G: GraphStore + ?Sized,
    E: From<GraphError>,
    F: FnOnce(&mut G) -> Result<T, E>,
{
    if store.in_transaction() {
        return f(store);
    }

    store.begin()?;
    match f(store) {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!("Failed to roll back unit of work: {}", rollback_err);
            }
            Err(err)
        }
    }
}
