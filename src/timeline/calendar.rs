//! Calendar Index - hierarchical bucket index for point lookups
//!
//! A small tree hangs below the anchor, one level per calendar component
//! (UTC). Each `NEXT_LEVEL` edge carries the component value of the node it
//! leads to, and each level node records in `next_level` which component
//! its children are keyed by:
//!
//! ```text
//! [anchor] next_level=year
//!    └─{year: 2009}→ ( ) next_level=month
//!         └─{month: 7}→ ( ) next_level=day
//!              └─{day: 1}→ ( ) next_level=hour
//!                   └─{hour: 9}→ ( ) next_level=timestamp
//!                        └─{timestamp: 1246438800}→ bucket
//! ```
//!
//! A lookup descends at most five edges regardless of ring length. Range
//! queries still walk the ring.
//!
//! Branches are pruned when the bucket they lead to is collapsed, so every
//! leaf edge points at a live bucket.

use crate::graph::{Direction, GraphStore, NodeId};
use crate::timeline::error::{TimelineError, TimelineResult};
use crate::timeline::{NEXT_LEVEL, NEXT_LEVEL_KEY};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};

/// Date format accepted by [`parse_datetime`]
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One level of the calendar tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Year,
    Month,
    Day,
    Hour,
    /// Leaf edges into buckets
    Timestamp,
}

impl Level {
    /// Property key carried by edges into this level
    pub fn key(self) -> &'static str {
        match self {
            Level::Year => "year",
            Level::Month => "month",
            Level::Day => "day",
            Level::Hour => "hour",
            Level::Timestamp => "timestamp",
        }
    }

    /// Level below this one
    pub fn child(self) -> Option<Level> {
        match self {
            Level::Year => Some(Level::Month),
            Level::Month => Some(Level::Day),
            Level::Day => Some(Level::Hour),
            Level::Hour => Some(Level::Timestamp),
            Level::Timestamp => None,
        }
    }
}

/// Calendar components of a timestamp (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl CalendarKey {
    /// Decompose seconds since epoch; `None` outside chrono's date range
    pub fn from_timestamp(timestamp: i64) -> Option<Self> {
        let dt = DateTime::from_timestamp(timestamp, 0)?;
        Some(Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
        })
    }

    /// Component values in descent order
    pub fn components(&self) -> [(Level, i64); 4] {
        [
            (Level::Year, self.year as i64),
            (Level::Month, self.month as i64),
            (Level::Day, self.day as i64),
            (Level::Hour, self.hour as i64),
        ]
    }
}

/// Parse a timestamp argument into seconds since epoch
///
/// Accepts, in order: integer seconds, `YYYY-MM-DD HH:MM:SS` (UTC),
/// RFC 3339, and a bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_datetime(input: &str) -> TimelineResult<i64> {
    let s = input.trim();

    if let Ok(seconds) = s.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, DATE_FORMAT) {
        return Ok(dt.and_utc().timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc().timestamp());
    }

    Err(TimelineError::InvalidArgument(format!(
        "Invalid date '{}'. Use seconds, '{}', RFC 3339 or YYYY-MM-DD",
        input, DATE_FORMAT
    )))
}

/// Calendar tree rooted at a timeline anchor
#[derive(Debug, Clone, Copy)]
pub struct CalendarIndex {
    anchor: NodeId,
}

impl CalendarIndex {
    pub fn new(anchor: NodeId) -> Self {
        Self { anchor }
    }

    /// Child of `parent` reached by an edge carrying `level = value`
    fn child<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        parent: NodeId,
        level: Level,
        value: i64,
    ) -> TimelineResult<Option<NodeId>> {
        for rel in store.relationships(parent, &NEXT_LEVEL, Direction::Outgoing)? {
            if store.rel_i64(rel.id, level.key())? == Some(value) {
                return Ok(Some(rel.end));
            }
        }
        Ok(None)
    }

    fn mark<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        node: NodeId,
        level: Level,
    ) -> TimelineResult<()> {
        if store.node_str(node, NEXT_LEVEL_KEY)?.as_deref() != Some(level.key()) {
            store.set_node_property(node, NEXT_LEVEL_KEY, level.key().into())?;
        }
        Ok(())
    }

    /// Record `bucket` under the calendar path of `timestamp`
    ///
    /// Idempotent: an existing path and leaf edge are reused. Timestamps
    /// without a calendar decomposition are skipped.
    pub fn insert<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        bucket: NodeId,
        timestamp: i64,
    ) -> TimelineResult<()> {
        let Some(key) = CalendarKey::from_timestamp(timestamp) else {
            tracing::debug!(timestamp, "No calendar decomposition, ring only");
            return Ok(());
        };

        let mut node = self.anchor;
        for (level, value) in key.components() {
            self.mark(store, node, level)?;
            node = match self.child(store, node, level, value)? {
                Some(child) => child,
                None => {
                    let child = store.create_node()?;
                    store.set_node_property(child, level.key(), value.into())?;
                    let rel = store.create_relationship(node, child, &NEXT_LEVEL)?;
                    store.set_rel_property(rel.id, level.key(), value.into())?;
                    child
                }
            };
        }

        self.mark(store, node, Level::Timestamp)?;
        match self.child(store, node, Level::Timestamp, timestamp)? {
            Some(existing) if existing == bucket => {}
            Some(existing) => {
                return Err(TimelineError::corruption(format!(
                    "calendar leaf for {} points at {} instead of {}",
                    timestamp, existing, bucket
                )));
            }
            None => {
                let rel = store.create_relationship(node, bucket, &NEXT_LEVEL)?;
                store.set_rel_property(rel.id, Level::Timestamp.key(), timestamp.into())?;
            }
        }
        Ok(())
    }

    /// Bucket holding exactly `timestamp`, by tree descent
    pub fn lookup<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        timestamp: i64,
    ) -> TimelineResult<Option<NodeId>> {
        let Some(key) = CalendarKey::from_timestamp(timestamp) else {
            return Ok(None);
        };

        let mut node = self.anchor;
        for (level, value) in key.components() {
            node = match self.child(store, node, level, value)? {
                Some(child) => child,
                None => return Ok(None),
            };
        }
        self.child(store, node, Level::Timestamp, timestamp)
    }

    /// Drop the leaf edges into `bucket` and prune branches left empty
    pub fn unlink_bucket<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        bucket: NodeId,
    ) -> TimelineResult<()> {
        for rel in store.relationships(bucket, &NEXT_LEVEL, Direction::Incoming)? {
            store.delete_relationship(rel.id)?;
            self.prune(store, rel.start)?;
        }
        Ok(())
    }

    fn prune<G: GraphStore + ?Sized>(&self, store: &mut G, start: NodeId) -> TimelineResult<()> {
        let mut node = start;
        while node != self.anchor {
            if !store
                .relationships(node, &NEXT_LEVEL, Direction::Outgoing)?
                .is_empty()
            {
                return Ok(());
            }
            let parent = store.single_relationship(node, &NEXT_LEVEL, Direction::Incoming)?;
            if let Some(rel) = &parent {
                store.delete_relationship(rel.id)?;
            }
            store.delete_node(node)?;
            match parent {
                Some(rel) => node = rel.start,
                None => return Ok(()),
            }
        }

        if store
            .relationships(self.anchor, &NEXT_LEVEL, Direction::Outgoing)?
            .is_empty()
        {
            store.remove_node_property(self.anchor, NEXT_LEVEL_KEY)?;
        }
        Ok(())
    }

    /// Delete the whole tree, leaving buckets in place
    ///
    /// Returns the number of level nodes deleted.
    pub fn clear<G: GraphStore + ?Sized>(&self, store: &mut G) -> TimelineResult<usize> {
        let deleted = self.drop_children(store, self.anchor, Level::Year)?;
        store.remove_node_property(self.anchor, NEXT_LEVEL_KEY)?;
        Ok(deleted)
    }

    fn drop_children<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        node: NodeId,
        level: Level,
    ) -> TimelineResult<usize> {
        let mut deleted = 0;
        for rel in store.relationships(node, &NEXT_LEVEL, Direction::Outgoing)? {
            store.delete_relationship(rel.id)?;
            if let Some(below) = level.child() {
                deleted += self.drop_children(store, rel.end, below)?;
                store.delete_node(rel.end)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    // 2009-07-01 09:00:00 UTC
    const JULY_FIRST_9AM: i64 = 1_246_438_800;

    fn setup() -> (MemoryGraph, CalendarIndex) {
        let mut graph = MemoryGraph::new();
        let anchor = graph.create_node().unwrap();
        (graph, CalendarIndex::new(anchor))
    }

    #[test]
    fn test_decompose() {
        let key = CalendarKey::from_timestamp(JULY_FIRST_9AM + 125).unwrap();
        assert_eq!(
            key,
            CalendarKey {
                year: 2009,
                month: 7,
                day: 1,
                hour: 9
            }
        );
        assert!(CalendarKey::from_timestamp(i64::MAX).is_none());
    }

    #[test]
    fn test_parse_datetime() {
        assert_eq!(parse_datetime("2009-07-01 09:00:00").unwrap(), JULY_FIRST_9AM);
        assert_eq!(parse_datetime("2009-07-01T11:00:00+02:00").unwrap(), JULY_FIRST_9AM);
        assert_eq!(parse_datetime(" 1246438800 ").unwrap(), JULY_FIRST_9AM);
        assert_eq!(
            parse_datetime("2009-07-01").unwrap(),
            JULY_FIRST_9AM - 9 * 3600
        );
        assert!(matches!(
            parse_datetime("yesterday"),
            Err(TimelineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_insert_and_lookup() {
        let (mut graph, calendar) = setup();
        let bucket = graph.create_node().unwrap();
        calendar.insert(&mut graph, bucket, JULY_FIRST_9AM).unwrap();

        assert_eq!(calendar.lookup(&graph, JULY_FIRST_9AM).unwrap(), Some(bucket));
        // Same hour, different second
        assert_eq!(calendar.lookup(&graph, JULY_FIRST_9AM + 1).unwrap(), None);
        // Different hour
        assert_eq!(calendar.lookup(&graph, JULY_FIRST_9AM + 3600).unwrap(), None);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let (mut graph, calendar) = setup();
        let bucket = graph.create_node().unwrap();
        calendar.insert(&mut graph, bucket, JULY_FIRST_9AM).unwrap();
        let nodes = graph.node_count();
        let rels = graph.relationship_count();

        calendar.insert(&mut graph, bucket, JULY_FIRST_9AM).unwrap();
        assert_eq!(graph.node_count(), nodes);
        assert_eq!(graph.relationship_count(), rels);
    }

    #[test]
    fn test_paths_share_prefix() {
        let (mut graph, calendar) = setup();
        let a = graph.create_node().unwrap();
        let b = graph.create_node().unwrap();
        calendar.insert(&mut graph, a, JULY_FIRST_9AM).unwrap();
        calendar.insert(&mut graph, b, JULY_FIRST_9AM + 60).unwrap();

        // anchor, 4 level nodes, 2 buckets
        assert_eq!(graph.node_count(), 7);
        assert_eq!(calendar.lookup(&graph, JULY_FIRST_9AM + 60).unwrap(), Some(b));
    }

    #[test]
    fn test_level_markers() {
        let (mut graph, calendar) = setup();
        let bucket = graph.create_node().unwrap();
        calendar.insert(&mut graph, bucket, JULY_FIRST_9AM).unwrap();

        let anchor = calendar.anchor;
        assert_eq!(
            graph.node_str(anchor, NEXT_LEVEL_KEY).unwrap().as_deref(),
            Some("year")
        );
        let year = graph
            .single_relationship(anchor, &NEXT_LEVEL, Direction::Outgoing)
            .unwrap()
            .unwrap()
            .end;
        assert_eq!(graph.node_i64(year, "year").unwrap(), Some(2009));
        assert_eq!(
            graph.node_str(year, NEXT_LEVEL_KEY).unwrap().as_deref(),
            Some("month")
        );
    }

    #[test]
    fn test_unlink_prunes_empty_branches() {
        let (mut graph, calendar) = setup();
        let a = graph.create_node().unwrap();
        let b = graph.create_node().unwrap();
        calendar.insert(&mut graph, a, JULY_FIRST_9AM).unwrap();
        calendar.insert(&mut graph, b, JULY_FIRST_9AM + 86_400).unwrap();

        calendar.unlink_bucket(&mut graph, b).unwrap();
        assert_eq!(calendar.lookup(&graph, JULY_FIRST_9AM + 86_400).unwrap(), None);
        assert_eq!(calendar.lookup(&graph, JULY_FIRST_9AM).unwrap(), Some(a));
        // The day/hour branch of b is gone, year/month are shared
        assert_eq!(graph.node_count(), 7);

        calendar.unlink_bucket(&mut graph, a).unwrap();
        // Only anchor and the two buckets remain
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.relationship_count(), 0);
        assert_eq!(graph.node_property(calendar.anchor, NEXT_LEVEL_KEY).unwrap(), None);
    }

    #[test]
    fn test_clear_keeps_buckets() {
        let (mut graph, calendar) = setup();
        let a = graph.create_node().unwrap();
        let b = graph.create_node().unwrap();
        calendar.insert(&mut graph, a, JULY_FIRST_9AM).unwrap();
        calendar.insert(&mut graph, b, JULY_FIRST_9AM + 400 * 86_400).unwrap();

        assert_eq!(calendar.clear(&mut graph).unwrap(), 8);
        assert_eq!(graph.relationship_count(), 0);
        assert!(graph.node_exists(a).unwrap());
        assert!(graph.node_exists(b).unwrap());
    }

    #[test]
    fn test_undecomposable_timestamp_skipped() {
        let (mut graph, calendar) = setup();
        let bucket = graph.create_node().unwrap();
        calendar.insert(&mut graph, bucket, i64::MAX).unwrap();
        assert_eq!(graph.relationship_count(), 0);
        assert_eq!(calendar.lookup(&graph, i64::MAX).unwrap(), None);
    }
}
