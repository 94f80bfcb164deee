//! SQLite Graph Store - persistent property graph on SQLite
//!
//! Nodes, relationships and properties live in three tables. Relationship
//! lookups by (node, type) go through covering indexes on both ends, so a
//! single-hop probe along the timeline ring is O(log n).
//!
//! # Schema
//! ```text
//! nodes(id)
//! relationships(id, start_node, end_node, rel_type)
//! properties(owner_kind, owner_id, key, int_value, text_value)
//! ```
//!
//! Units of work map onto `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK`.

use crate::graph::{
    Direction, GraphError, GraphResult, GraphStore, NodeId, PropertyValue, RelId, RelType,
    Relationship,
};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};

/// Owner discriminator in the shared properties table
const OWNER_NODE: i64 = 0;
const OWNER_REL: i64 = 1;

/// SQLite-backed graph store
pub struct SqliteGraph {
    conn: Connection,
    path: Option<PathBuf>,
    in_tx: bool,
}

impl std::fmt::Debug for SqliteGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteGraph")
            .field("path", &self.path)
            .field("in_tx", &self.in_tx)
            .finish_non_exhaustive()
    }
}

impl SqliteGraph {
    /// Create or open the graph database inside `data_dir`
    pub fn open(data_dir: &Path) -> GraphResult<Self> {
        let path = data_dir.join("timeline.db");

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        tracing::debug!("Opened graph store at {:?}", path);
        Self::init(conn, Some(path))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> GraphResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> GraphResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT
            );
            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_node INTEGER NOT NULL,
                end_node INTEGER NOT NULL,
                rel_type TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rel_start
                ON relationships(start_node, rel_type, id);
            CREATE INDEX IF NOT EXISTS idx_rel_end
                ON relationships(end_node, rel_type, id);
            CREATE TABLE IF NOT EXISTS properties (
                owner_kind INTEGER NOT NULL,
                owner_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                int_value INTEGER,
                text_value TEXT,
                PRIMARY KEY (owner_kind, owner_id, key)
            );
            CREATE INDEX IF NOT EXISTS idx_prop_text
                ON properties(owner_kind, key, text_value);
            ",
        )?;

        Ok(Self {
            conn,
            path,
            in_tx: false,
        })
    }

    /// Database file path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Count of live nodes
    pub fn node_count(&self) -> GraphResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Count of live relationships
    pub fn relationship_count(&self) -> GraphResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Force checkpoint for WAL mode
    pub fn checkpoint(&mut self) -> GraphResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    fn require_node(&self, node: NodeId) -> GraphResult<()> {
        if self.node_exists(node)? {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound(node))
        }
    }

    fn require_rel(&self, rel: RelId) -> GraphResult<()> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM relationships WHERE id = ?",
                params![raw(rel.0)],
                |row| row.get(0),
            )
            .optional()?;
        found
            .map(|_| ())
            .ok_or(GraphError::RelationshipNotFound(rel))
    }

    fn property(&self, kind: i64, owner: u64, key: &str) -> GraphResult<Option<PropertyValue>> {
        let value = self
            .conn
            .prepare_cached(
                "SELECT int_value, text_value FROM properties
                 WHERE owner_kind = ? AND owner_id = ? AND key = ?",
            )?
            .query_row(params![kind, raw(owner), key], read_value)
            .optional()?;
        Ok(value.flatten())
    }

    fn set_property(
        &mut self,
        kind: i64,
        owner: u64,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        let (int_value, text_value) = match value {
            PropertyValue::Int(v) => (Some(v), None),
            PropertyValue::Str(s) => (None, Some(s)),
        };
        self.conn
            .prepare_cached(
                "INSERT OR REPLACE INTO properties (owner_kind, owner_id, key, int_value, text_value)
                 VALUES (?, ?, ?, ?, ?)",
            )?
            .execute(params![kind, raw(owner), key, int_value, text_value])?;
        Ok(())
    }

    fn clear_properties(&mut self, kind: i64, owner: u64) -> GraphResult<()> {
        self.conn.execute(
            "DELETE FROM properties WHERE owner_kind = ? AND owner_id = ?",
            params![kind, raw(owner)],
        )?;
        Ok(())
    }
}

/// Store ids are SQLite rowids, which are always positive
fn raw(id: u64) -> i64 {
    id as i64
}

fn read_value(row: &Row<'_>) -> rusqlite::Result<Option<PropertyValue>> {
    let int_value: Option<i64> = row.get(0)?;
    let text_value: Option<String> = row.get(1)?;
    Ok(match (int_value, text_value) {
        (Some(v), _) => Some(PropertyValue::Int(v)),
        (None, Some(s)) => Some(PropertyValue::Str(s)),
        (None, None) => None,
    })
}

fn read_relationship(row: &Row<'_>) -> rusqlite::Result<Relationship> {
    let id: i64 = row.get(0)?;
    let start: i64 = row.get(1)?;
    let end: i64 = row.get(2)?;
    let rel_type: String = row.get(3)?;
    Ok(Relationship {
        id: RelId(id as u64),
        start: NodeId(start as u64),
        end: NodeId(end as u64),
        rel_type: RelType::new(rel_type),
    })
}

impl GraphStore for SqliteGraph {
    fn create_node(&mut self) -> GraphResult<NodeId> {
        self.conn.execute("INSERT INTO nodes DEFAULT VALUES", [])?;
        Ok(NodeId(self.conn.last_insert_rowid() as u64))
    }

    fn delete_node(&mut self, node: NodeId) -> GraphResult<()> {
        self.require_node(node)?;

        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM relationships WHERE start_node = ?1 OR end_node = ?1",
            params![raw(node.0)],
            |row| row.get(0),
        )?;
        if count > 0 {
            return Err(GraphError::NodeInUse {
                node,
                count: count as usize,
            });
        }

        self.clear_properties(OWNER_NODE, node.0)?;
        self.conn
            .execute("DELETE FROM nodes WHERE id = ?", params![raw(node.0)])?;
        Ok(())
    }

    fn node_exists(&self, node: NodeId) -> GraphResult<bool> {
        let found: Option<i64> = self
            .conn
            .prepare_cached("SELECT id FROM nodes WHERE id = ?")?
            .query_row(params![raw(node.0)], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: &RelType,
    ) -> GraphResult<Relationship> {
        self.require_node(start)?;
        self.require_node(end)?;

        self.conn
            .prepare_cached(
                "INSERT INTO relationships (start_node, end_node, rel_type) VALUES (?, ?, ?)",
            )?
            .execute(params![raw(start.0), raw(end.0), rel_type.as_str()])?;

        Ok(Relationship {
            id: RelId(self.conn.last_insert_rowid() as u64),
            start,
            end,
            rel_type: rel_type.clone(),
        })
    }

    fn delete_relationship(&mut self, rel: RelId) -> GraphResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM relationships WHERE id = ?", params![raw(rel.0)])?;
        if changed == 0 {
            return Err(GraphError::RelationshipNotFound(rel));
        }
        self.clear_properties(OWNER_REL, rel.0)
    }

    fn relationship(&self, rel: RelId) -> GraphResult<Relationship> {
        self.conn
            .query_row(
                "SELECT id, start_node, end_node, rel_type FROM relationships WHERE id = ?",
                params![raw(rel.0)],
                read_relationship,
            )
            .optional()?
            .ok_or(GraphError::RelationshipNotFound(rel))
    }

    fn relationships(
        &self,
        node: NodeId,
        rel_type: &RelType,
        direction: Direction,
    ) -> GraphResult<Vec<Relationship>> {
        self.require_node(node)?;

        let sql = match direction {
            Direction::Outgoing => {
                "SELECT id, start_node, end_node, rel_type FROM relationships
                 WHERE start_node = ?1 AND rel_type = ?2 ORDER BY id"
            }
            Direction::Incoming => {
                "SELECT id, start_node, end_node, rel_type FROM relationships
                 WHERE end_node = ?1 AND rel_type = ?2 ORDER BY id"
            }
            Direction::Both => {
                "SELECT id, start_node, end_node, rel_type FROM relationships
                 WHERE (start_node = ?1 OR end_node = ?1) AND rel_type = ?2 ORDER BY id"
            }
        };

        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![raw(node.0), rel_type.as_str()], read_relationship)?;
        let rels = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(rels)
    }

    fn node_property(&self, node: NodeId, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.require_node(node)?;
        self.property(OWNER_NODE, node.0, key)
    }

    fn set_node_property(
        &mut self,
        node: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        self.require_node(node)?;
        self.set_property(OWNER_NODE, node.0, key, value)
    }

    fn remove_node_property(&mut self, node: NodeId, key: &str) -> GraphResult<()> {
        self.require_node(node)?;
        self.conn.execute(
            "DELETE FROM properties WHERE owner_kind = ? AND owner_id = ? AND key = ?",
            params![OWNER_NODE, raw(node.0), key],
        )?;
        Ok(())
    }

    fn rel_property(&self, rel: RelId, key: &str) -> GraphResult<Option<PropertyValue>> {
        self.require_rel(rel)?;
        self.property(OWNER_REL, rel.0, key)
    }

    fn set_rel_property(
        &mut self,
        rel: RelId,
        key: &str,
        value: PropertyValue,
    ) -> GraphResult<()> {
        self.require_rel(rel)?;
        self.set_property(OWNER_REL, rel.0, key, value)
    }

    fn nodes_with_property(&self, key: &str, value: &PropertyValue) -> GraphResult<Vec<NodeId>> {
        let mut stmt;
        let rows = match value {
            PropertyValue::Int(v) => {
                stmt = self.conn.prepare_cached(
                    "SELECT owner_id FROM properties
                     WHERE owner_kind = ? AND key = ? AND int_value = ? ORDER BY owner_id",
                )?;
                stmt.query_map(params![OWNER_NODE, key, v], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?
            }
            PropertyValue::Str(s) => {
                stmt = self.conn.prepare_cached(
                    "SELECT owner_id FROM properties
                     WHERE owner_kind = ? AND key = ? AND text_value = ? ORDER BY owner_id",
                )?;
                stmt.query_map(params![OWNER_NODE, key, s], |row| row.get::<_, i64>(0))?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows.into_iter().map(|id| NodeId(id as u64)).collect())
    }

    fn begin(&mut self) -> GraphResult<()> {
        if self.in_tx {
            return Err(GraphError::Transaction(
                "unit of work already open".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_tx = true;
        Ok(())
    }

    fn commit(&mut self) -> GraphResult<()> {
        if !self.in_tx {
            return Err(GraphError::Transaction("commit without begin".to_string()));
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_tx = false;
        Ok(())
    }

    fn rollback(&mut self) -> GraphResult<()> {
        if !self.in_tx {
            return Err(GraphError::Transaction(
                "rollback without begin".to_string(),
            ));
        }
        self.in_tx = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KNOWS: RelType = RelType::from_static("KNOWS");

    #[test]
    fn test_graph_creation() {
        let dir = tempdir().unwrap();
        let graph = SqliteGraph::open(dir.path()).unwrap();
        assert_eq!(graph.node_count().unwrap(), 0);
        assert!(graph.path().unwrap().ends_with("timeline.db"));
    }

    #[test]
    fn test_nodes_and_relationships() {
        let mut graph = SqliteGraph::open_in_memory().unwrap();
        let a = graph.create_node().unwrap();
        let b = graph.create_node().unwrap();
        let c = graph.create_node().unwrap();

        let ab = graph.create_relationship(a, b, &KNOWS).unwrap();
        let ac = graph.create_relationship(a, c, &KNOWS).unwrap();

        let out = graph.relationships(a, &KNOWS, Direction::Outgoing).unwrap();
        assert_eq!(out, vec![ab.clone(), ac]);

        let inc = graph.relationships(b, &KNOWS, Direction::Incoming).unwrap();
        assert_eq!(inc, vec![ab.clone()]);
        assert_eq!(graph.relationship(ab.id).unwrap(), ab);

        assert!(matches!(
            graph.delete_node(b),
            Err(GraphError::NodeInUse { count: 1, .. })
        ));
        graph.delete_relationship(ab.id).unwrap();
        graph.delete_node(b).unwrap();
        assert!(!graph.node_exists(b).unwrap());
        assert!(matches!(
            graph.delete_relationship(ab.id),
            Err(GraphError::RelationshipNotFound(_))
        ));
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let mut graph = SqliteGraph::open_in_memory().unwrap();
        let a = graph.create_node().unwrap();
        assert!(matches!(
            graph.create_relationship(a, NodeId(999), &KNOWS),
            Err(GraphError::NodeNotFound(NodeId(999)))
        ));
    }

    #[test]
    fn test_properties_round_trip_types() {
        let mut graph = SqliteGraph::open_in_memory().unwrap();
        let a = graph.create_node().unwrap();
        graph.set_node_property(a, "timestamp", (-5i64).into()).unwrap();
        graph.set_node_property(a, "timeline_name", "t1".into()).unwrap();

        assert_eq!(graph.node_i64(a, "timestamp").unwrap(), Some(-5));
        assert_eq!(graph.node_str(a, "timeline_name").unwrap().as_deref(), Some("t1"));
        assert_eq!(graph.node_property(a, "missing").unwrap(), None);

        // Overwrite with a different type
        graph.set_node_property(a, "timestamp", "late".into()).unwrap();
        assert_eq!(graph.node_i64(a, "timestamp").unwrap(), None);

        assert_eq!(
            graph.nodes_with_property("timeline_name", &"t1".into()).unwrap(),
            vec![a]
        );
    }

    #[test]
    fn test_rollback_discards_changes() {
        let mut graph = SqliteGraph::open_in_memory().unwrap();
        let a = graph.create_node().unwrap();

        graph.begin().unwrap();
        let b = graph.create_node().unwrap();
        graph.create_relationship(a, b, &KNOWS).unwrap();
        graph.rollback().unwrap();

        assert!(!graph.node_exists(b).unwrap());
        assert_eq!(graph.relationship_count().unwrap(), 0);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let (a, b) = {
            let mut graph = SqliteGraph::open(dir.path()).unwrap();
            graph.begin().unwrap();
            let a = graph.create_node().unwrap();
            let b = graph.create_node().unwrap();
            let rel = graph.create_relationship(a, b, &KNOWS).unwrap();
            graph.set_rel_property(rel.id, "timeline_name", "t".into()).unwrap();
            graph.commit().unwrap();
            (a, b)
        };

        let graph = SqliteGraph::open(dir.path()).unwrap();
        assert_eq!(graph.node_count().unwrap(), 2);
        let rels = graph.relationships(b, &KNOWS, Direction::Incoming).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].start, a);
        assert_eq!(
            graph.rel_str(rels[0].id, "timeline_name").unwrap().as_deref(),
            Some("t")
        );
    }
}
