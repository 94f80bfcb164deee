//! Timeline error types
//!
//! Three families of failure:
//!
//! - invalid arguments (bad range, naming conflict, unknown nodes)
//! - membership violations (already a member, not a member)
//! - internal consistency faults (a ring edge that must exist is missing)
//!
//! Consistency faults mean the stored structure was corrupted earlier. They
//! are never recovered from silently.

use crate::graph::{GraphError, NodeId};
use thiserror::Error;

/// Errors that can occur in timeline operations
#[derive(Error, Debug)]
pub enum TimelineError {
    /// Missing or malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Anchor already bound to a timeline with a different name
    #[error("Timeline anchor is named '{stored}', passed in '{requested}'")]
    NamingConflict { stored: String, requested: String },

    /// Range query with start >= end
    #[error("Invalid time range: start {start} must be less than end {end}")]
    InvalidRange { start: i64, end: i64 },

    /// Node handle does not exist in the store
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// No anchor carries the requested name
    #[error("Unknown timeline: {0}")]
    UnknownTimeline(String),

    /// The anchor cannot be indexed or removed as an entry
    #[error("Cannot add or remove the timeline anchor as an entry")]
    AnchorRemoval,

    /// Entry already linked into this timeline
    #[error("{entry} already connected to Timeline[{timeline}]")]
    AlreadyMember { entry: NodeId, timeline: String },

    /// Entry not linked into this timeline
    #[error("{entry} not added to Timeline[{timeline}]")]
    NotMember { entry: NodeId, timeline: String },

    /// Ring structure violates its invariants
    #[error("Corrupt timeline: {0}")]
    Corruption(String),

    /// Backing store failure
    #[error("Graph store error: {0}")]
    Graph(#[from] GraphError),
}

impl TimelineError {
    /// Build a corruption error, logging it at error level
    pub(crate) fn corruption(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!("Timeline invariant violated: {}", message);
        TimelineError::Corruption(message)
    }

    /// Whether the error signals pre-existing corruption of the ring
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimelineError::Corruption(_))
    }

    /// Whether the error is a membership violation
    pub fn is_membership(&self) -> bool {
        matches!(
            self,
            TimelineError::AlreadyMember { .. } | TimelineError::NotMember { .. }
        )
    }
}

/// Result type alias for timeline operations
pub type TimelineResult<T> = Result<T, TimelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TimelineError::AlreadyMember {
            entry: NodeId(4),
            timeline: "frames".to_string(),
        };
        assert_eq!(err.to_string(), "Node[4] already connected to Timeline[frames]");

        let err = TimelineError::InvalidRange { start: 5, end: 5 };
        assert_eq!(
            err.to_string(),
            "Invalid time range: start 5 must be less than end 5"
        );
    }

    #[test]
    fn test_classification() {
        assert!(TimelineError::corruption("missing edge").is_fatal());
        assert!(!TimelineError::AnchorRemoval.is_fatal());
        assert!(TimelineError::NotMember {
            entry: NodeId(1),
            timeline: "t".to_string()
        }
        .is_membership());
    }

    #[test]
    fn test_graph_error_conversion() {
        let err: TimelineError = GraphError::NodeNotFound(NodeId(9)).into();
        assert!(matches!(err, TimelineError::Graph(_)));
    }
}
