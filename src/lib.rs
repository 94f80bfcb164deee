//! # Timeline Index
//!
//! Ordered secondary index mapping timestamps to entry nodes, stored as a
//! graph structure inside a property graph store.
//!
//! ## Features
//!
//! - **Ordered ring**: ascending bucket chain with O(1) append
//! - **Calendar tree**: exact-timestamp lookups in bounded depth
//! - **Lazy ranges**: before/after/between scans that stop early
//! - **Multi-tenant entries**: one entry may sit in many named timelines
//! - **Atomic mutations**: every change runs in one store transaction
//!
//! ## Modules
//!
//! - [`graph`]: Graph store contract with in-memory and SQLite backends
//! - [`timeline`]: Chain, calendar index and the `Timeline` facade
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use timeline_index::graph::{GraphStore, SqliteGraph};
//! use timeline_index::timeline::Timeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteGraph::open(std::path::Path::new("./timeline_data"))?;
//!     let mut timeline = Timeline::create(store, "events")?;
//!
//!     let entry = timeline.store_mut().create_node()?;
//!     timeline.add(entry, 1_246_438_800)?;
//!
//!     for entry in timeline.all_nodes(None, Some(1_246_500_000))? {
//!         println!("{}", entry?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod graph;
pub mod timeline;

// Re-export top-level types for convenience
pub use graph::{
    atomic, Direction, GraphError, GraphResult, GraphStore, MemoryGraph, NodeId, PropertyValue,
    RelId, RelType, Relationship, SqliteGraph,
};

pub use timeline::{
    CalendarIndex, Chain, Entries, TimeWindow, Timeline, TimelineError, TimelineOptions,
    TimelineResult, TimelineStats,
};

pub use config::{Config, ConfigError, LoggingConfig, StoreConfig, TimelineConfig};
