//! Timeline Index
//!
//! Ordered secondary index mapping timestamps to externally-owned entry
//! nodes, stored as a graph structure inside a [`GraphStore`]:
//!
//! - **Chain**: ascending ring of timestamp buckets closed at an anchor
//! - **CalendarIndex**: year → month → day → hour → timestamp tree for
//!   point lookups without walking the ring
//! - **Timeline**: facade composing both into add/remove/lookup/range
//!
//! # Architecture
//!
//! ```text
//! add(e, t)
//!    ↓
//! Chain: find or splice bucket(t), link bucket ─INSTANCE{timeline_name}→ e
//!    ↓
//! CalendarIndex: anchor → year → month → day → hour ─NEXT_LEVEL{timestamp}→ bucket(t)
//!
//! nodes_at(t)  : CalendarIndex descent (depth 5), then bucket fan-out
//! all_nodes(..): lazy ring walk from the anchor with exclusive bounds
//! ```
//!
//! [`GraphStore`]: crate::graph::GraphStore

mod calendar;
mod chain;
mod error;
mod facade;
mod scan;

pub use calendar::{parse_datetime, CalendarIndex, CalendarKey, Level};
pub use chain::{Chain, Detached};
pub use error::{TimelineError, TimelineResult};
pub use facade::{Timeline, TimelineOptions};
pub use scan::{Entries, TimeWindow};

use crate::graph::RelType;
use serde::Serialize;

/// Ring edges: anchor → bucket → ... → bucket → anchor
pub const NEXT_ENTRY: RelType = RelType::from_static("TIMELINE_NEXT_ENTRY");

/// Bucket → entry edges, tagged with the timeline name
pub const INSTANCE: RelType = RelType::from_static("TIMELINE_INSTANCE");

/// Calendar tree edges
pub const NEXT_LEVEL: RelType = RelType::from_static("NEXT_LEVEL");

/// Bucket timestamp (seconds since epoch)
pub const TIMESTAMP: &str = "timestamp";

/// Timeline name, on the anchor and on every INSTANCE edge
pub const TIMELINE_NAME: &str = "timeline_name";

/// Calendar level marker naming the discriminator of a node's children
pub const NEXT_LEVEL_KEY: &str = "next_level";

/// Shape of a timeline's ring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineStats {
    /// Number of distinct timestamps
    pub buckets: usize,
    /// Number of indexed entries
    pub entries: usize,
    /// Smallest timestamp, if any
    pub first_timestamp: Option<i64>,
    /// Largest timestamp, if any
    pub last_timestamp: Option<i64>,
}
