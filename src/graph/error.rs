//! Graph store error types

use crate::graph::{NodeId, RelId};
use thiserror::Error;

/// Errors raised by a backing graph store
#[derive(Error, Debug)]
pub enum GraphError {
    /// Node handle does not resolve to a live node
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Relationship handle does not resolve to a live relationship
    #[error("Relationship not found: {0}")]
    RelationshipNotFound(RelId),

    /// Node still has relationships attached and cannot be deleted
    #[error("{node} still has {count} relationship(s) attached")]
    NodeInUse { node: NodeId, count: usize },

    /// A single relationship was requested but several exist
    #[error("{node} has {count} {rel_type} relationships where at most one was expected")]
    AmbiguousRelationship {
        node: NodeId,
        rel_type: String,
        count: usize,
    },

    /// Transaction state misuse (commit without begin, nested begin, ...)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite backend failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for graph store operations
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphError::NodeNotFound(NodeId(7));
        assert_eq!(err.to_string(), "Node not found: Node[7]");

        let err = GraphError::NodeInUse {
            node: NodeId(3),
            count: 2,
        };
        assert_eq!(err.to_string(), "Node[3] still has 2 relationship(s) attached");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let graph_err: GraphError = io_err.into();
        assert!(matches!(graph_err, GraphError::Io(_)));
    }
}
