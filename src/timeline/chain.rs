//! Time-Bucket Chain - ordered ring of timestamp buckets
//!
//! Each distinct timestamp gets one bucket node. Buckets are linked in
//! ascending order by `TIMELINE_NEXT_ENTRY` edges into a ring closed at
//! the anchor, and fan out to their entries through `TIMELINE_INSTANCE`
//! edges tagged with the timeline name.
//!
//! ```text
//!            ┌──────────────────────────────────────────┐
//!            ▼                                          │
//!        [anchor] ──NEXT──▶ (10) ──NEXT──▶ (30) ──NEXT──┘
//!                            │ │             │
//!                    INSTANCE│ │INSTANCE     │INSTANCE
//!                            ▼ ▼             ▼
//!                          e1   e2           e3
//! ```
//!
//! Invariants after every completed mutation:
//! - buckets strictly ascend from the anchor, one bucket per timestamp
//! - the ring is closed and visits each bucket once
//! - no bucket without at least one entry
//! - an entry sits under at most one bucket of a given timeline
//!
//! # Performance
//! - Append (timestamp >= last): O(1)
//! - Out-of-order insert, point lookup: O(buckets) scan from the anchor
//! - Remove: O(1) plus the entry's own INSTANCE fan-in

use crate::graph::{atomic, Direction, GraphStore, NodeId, Relationship};
use crate::timeline::error::{TimelineError, TimelineResult};
use crate::timeline::scan::{Entries, TimeWindow};
use crate::timeline::{TimelineStats, INSTANCE, NEXT_ENTRY, TIMELINE_NAME, TIMESTAMP};
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Read the timestamp a bucket holds
pub(crate) fn bucket_timestamp<G: GraphStore + ?Sized>(
    store: &G,
    bucket: NodeId,
) -> TimelineResult<i64> {
    store
        .node_i64(bucket, TIMESTAMP)?
        .ok_or_else(|| TimelineError::corruption(format!("{} has no timestamp", bucket)))
}

/// Successor of `node` in the ring
pub(crate) fn next_in_ring<G: GraphStore + ?Sized>(
    store: &G,
    node: NodeId,
) -> TimelineResult<NodeId> {
    store
        .single_relationship(node, &NEXT_ENTRY, Direction::Outgoing)?
        .map(|rel| rel.end)
        .ok_or_else(|| {
            TimelineError::corruption(format!("no outgoing {} from {}", NEXT_ENTRY, node))
        })
}

fn incoming_link<G: GraphStore + ?Sized>(store: &G, node: NodeId) -> TimelineResult<Relationship> {
    store
        .single_relationship(node, &NEXT_ENTRY, Direction::Incoming)?
        .ok_or_else(|| {
            TimelineError::corruption(format!("no incoming {} to {}", NEXT_ENTRY, node))
        })
}

fn outgoing_link<G: GraphStore + ?Sized>(store: &G, node: NodeId) -> TimelineResult<Relationship> {
    store
        .single_relationship(node, &NEXT_ENTRY, Direction::Outgoing)?
        .ok_or_else(|| {
            TimelineError::corruption(format!("no outgoing {} from {}", NEXT_ENTRY, node))
        })
}

/// Entries linked from `bucket` with the `name` tag, in link order
pub(crate) fn tagged_instances<G: GraphStore + ?Sized>(
    store: &G,
    bucket: NodeId,
    name: &str,
) -> TimelineResult<Vec<NodeId>> {
    let mut entries = Vec::new();
    for rel in store.relationships(bucket, &INSTANCE, Direction::Outgoing)? {
        if store.rel_str(rel.id, TIMELINE_NAME)?.as_deref() == Some(name) {
            entries.push(rel.end);
        }
    }
    Ok(entries)
}

/// Lazily derived first/last entries
///
/// `None` means unknown; `Some(None)` means the timeline is empty. The
/// cache lives in a `Cell`, so a chain cannot be shared across threads.
#[derive(Debug, Default)]
struct BoundaryCache {
    first: Cell<Option<Option<NodeId>>>,
    last: Cell<Option<Option<NodeId>>>,
}

impl BoundaryCache {
    fn invalidate(&self) {
        self.first.set(None);
        self.last.set(None);
    }
}

/// Outcome of detaching an entry from its bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detached {
    /// Bucket the entry was linked from
    pub bucket: NodeId,
    /// Timestamp of that bucket
    pub timestamp: i64,
    /// Bucket has no entries left and must be collapsed
    pub emptied: bool,
}

/// Ordered bucket ring rooted at an anchor node
#[derive(Debug)]
pub struct Chain {
    anchor: NodeId,
    name: String,
    boundaries: BoundaryCache,
}

impl Chain {
    pub fn new(anchor: NodeId, name: impl Into<String>) -> Self {
        Self {
            anchor,
            name: name.into(),
            boundaries: BoundaryCache::default(),
        }
    }

    pub fn anchor(&self) -> NodeId {
        self.anchor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop cached first/last entries
    ///
    /// Called at the start of every mutation. Callers that roll back an
    /// outer unit of work must call it too.
    pub fn invalidate(&self) {
        self.boundaries.invalidate();
    }

    // ==================== Mutations ====================

    /// Link `entry` at `timestamp`, returning the bucket it now hangs off
    ///
    /// # Errors
    /// - `AnchorRemoval` if `entry` is the anchor
    /// - `UnknownNode` if `entry` does not exist
    /// - `AlreadyMember` if `entry` is already in this timeline
    pub fn insert<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        entry: NodeId,
        timestamp: i64,
    ) -> TimelineResult<NodeId> {
        self.invalidate();
        if entry == self.anchor {
            return Err(TimelineError::AnchorRemoval);
        }
        if !store.node_exists(entry)? {
            return Err(TimelineError::UnknownNode(entry));
        }
        if self.membership(store, entry)?.is_some() {
            return Err(TimelineError::AlreadyMember {
                entry,
                timeline: self.name.clone(),
            });
        }

        atomic(store, |store| self.link(store, entry, timestamp))
    }

    fn link<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        entry: NodeId,
        timestamp: i64,
    ) -> TimelineResult<NodeId> {
        let Some(closing) = store.single_relationship(self.anchor, &NEXT_ENTRY, Direction::Incoming)?
        else {
            // Empty ring
            let bucket = self.create_bucket(store, timestamp, entry)?;
            store.create_relationship(self.anchor, bucket, &NEXT_ENTRY)?;
            store.create_relationship(bucket, self.anchor, &NEXT_ENTRY)?;
            tracing::debug!(timeline = %self.name, timestamp, "Opened ring with {}", bucket);
            return Ok(bucket);
        };

        let last = closing.start;
        let last_timestamp = bucket_timestamp(store, last)?;

        match timestamp.cmp(&last_timestamp) {
            Ordering::Greater => {
                let bucket = self.create_bucket(store, timestamp, entry)?;
                store.delete_relationship(closing.id)?;
                store.create_relationship(last, bucket, &NEXT_ENTRY)?;
                store.create_relationship(bucket, self.anchor, &NEXT_ENTRY)?;
                tracing::debug!(timeline = %self.name, timestamp, "Appended {}", bucket);
                Ok(bucket)
            }
            Ordering::Equal => {
                self.attach(store, last, entry)?;
                Ok(last)
            }
            Ordering::Less => {
                let (next, next_timestamp) = self.seek(store, timestamp)?.ok_or_else(|| {
                    TimelineError::corruption(format!(
                        "no bucket at or after {} although last bucket holds {}",
                        timestamp, last_timestamp
                    ))
                })?;

                if next_timestamp == timestamp {
                    self.attach(store, next, entry)?;
                    return Ok(next);
                }

                let incoming = incoming_link(store, next)?;
                let previous = incoming.start;
                let bucket = self.create_bucket(store, timestamp, entry)?;
                store.delete_relationship(incoming.id)?;
                store.create_relationship(previous, bucket, &NEXT_ENTRY)?;
                store.create_relationship(bucket, next, &NEXT_ENTRY)?;
                tracing::debug!(
                    timeline = %self.name,
                    timestamp,
                    "Spliced {} before {}",
                    bucket,
                    next
                );
                Ok(bucket)
            }
        }
    }

    fn create_bucket<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        timestamp: i64,
        entry: NodeId,
    ) -> TimelineResult<NodeId> {
        let bucket = store.create_node()?;
        store.set_node_property(bucket, TIMESTAMP, timestamp.into())?;
        self.attach(store, bucket, entry)?;
        Ok(bucket)
    }

    fn attach<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        bucket: NodeId,
        entry: NodeId,
    ) -> TimelineResult<()> {
        let rel = store.create_relationship(bucket, entry, &INSTANCE)?;
        store.set_rel_property(rel.id, TIMELINE_NAME, self.name.as_str().into())?;
        Ok(())
    }

    /// Unlink `entry` from its bucket without touching the ring
    ///
    /// When `emptied` is set the caller must follow up with
    /// [`Chain::collapse`] inside the same unit of work.
    pub fn detach<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        entry: NodeId,
    ) -> TimelineResult<Detached> {
        self.invalidate();
        if entry == self.anchor {
            return Err(TimelineError::AnchorRemoval);
        }
        let rel = self
            .membership(store, entry)?
            .ok_or_else(|| TimelineError::NotMember {
                entry,
                timeline: self.name.clone(),
            })?;

        let bucket = rel.start;
        let timestamp = bucket_timestamp(store, bucket)?;
        store.delete_relationship(rel.id)?;

        let emptied = store
            .relationships(bucket, &INSTANCE, Direction::Outgoing)?
            .is_empty();

        Ok(Detached {
            bucket,
            timestamp,
            emptied,
        })
    }

    /// Splice an empty bucket out of the ring and delete it
    pub fn collapse<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        bucket: NodeId,
    ) -> TimelineResult<()> {
        self.invalidate();
        let incoming = incoming_link(store, bucket)?;
        let outgoing = outgoing_link(store, bucket)?;
        let previous = incoming.start;
        let next = outgoing.end;

        store.delete_relationship(incoming.id)?;
        store.delete_relationship(outgoing.id)?;
        store.delete_node(bucket)?;
        if previous != next {
            store.create_relationship(previous, next, &NEXT_ENTRY)?;
        }
        tracing::debug!(timeline = %self.name, "Collapsed {}", bucket);
        Ok(())
    }

    /// Remove `entry`, collapsing its bucket if it was the last one there
    ///
    /// Only for rings without a calendar tree. A bucket still reached by a
    /// calendar leaf cannot be deleted, so an emptied bucket fails with
    /// `NodeInUse` and the unit of work rolls back. `Timeline::remove`
    /// unlinks the calendar first and is the removal path for indexed
    /// timelines.
    pub fn remove<G: GraphStore + ?Sized>(
        &self,
        store: &mut G,
        entry: NodeId,
    ) -> TimelineResult<Detached> {
        atomic(store, |store| {
            let detached = self.detach(store, entry)?;
            if detached.emptied {
                self.collapse(store, detached.bucket)?;
            }
            Ok(detached)
        })
    }

    /// Delete every bucket and INSTANCE link in one walk
    ///
    /// Returns the number of buckets deleted. Entries themselves are left
    /// in place.
    pub fn clear<G: GraphStore + ?Sized>(&self, store: &mut G) -> TimelineResult<usize> {
        self.invalidate();
        atomic(store, |store| {
            let Some(head) = store.single_relationship(self.anchor, &NEXT_ENTRY, Direction::Outgoing)?
            else {
                return Ok(0);
            };
            store.delete_relationship(head.id)?;

            let mut deleted = 0;
            let mut node = head.end;
            while node != self.anchor {
                for instance in store.relationships(node, &INSTANCE, Direction::Outgoing)? {
                    store.delete_relationship(instance.id)?;
                }
                let next = outgoing_link(store, node)?;
                store.delete_relationship(next.id)?;
                store.delete_node(node)?;
                deleted += 1;
                node = next.end;
            }
            tracing::debug!(timeline = %self.name, buckets = deleted, "Cleared ring");
            Ok(deleted)
        })
    }

    // ==================== Queries ====================

    /// The INSTANCE link tagged for this timeline that points at `entry`
    pub fn membership<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        entry: NodeId,
    ) -> TimelineResult<Option<Relationship>> {
        let mut found = None;
        for rel in store.relationships(entry, &INSTANCE, Direction::Incoming)? {
            if store.rel_str(rel.id, TIMELINE_NAME)?.as_deref() == Some(self.name.as_str()) {
                if found.is_some() {
                    return Err(TimelineError::corruption(format!(
                        "{} linked more than once into Timeline[{}]",
                        entry, self.name
                    )));
                }
                found = Some(rel);
            }
        }
        Ok(found)
    }

    /// Timestamp of the bucket owning `entry`
    pub fn timestamp_of<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        entry: NodeId,
    ) -> TimelineResult<i64> {
        let rel = self
            .membership(store, entry)?
            .ok_or_else(|| TimelineError::NotMember {
                entry,
                timeline: self.name.clone(),
            })?;
        bucket_timestamp(store, rel.start)
    }

    /// Entries of `bucket` that belong to this timeline
    pub fn instances<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        bucket: NodeId,
    ) -> TimelineResult<Vec<NodeId>> {
        tagged_instances(store, bucket, &self.name)
    }

    /// First bucket with timestamp >= `timestamp`, scanning from the anchor
    pub fn seek<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        timestamp: i64,
    ) -> TimelineResult<Option<(NodeId, i64)>> {
        let mut node = match self.first_bucket(store)? {
            Some(bucket) => bucket,
            None => return Ok(None),
        };
        while node != self.anchor {
            let current = bucket_timestamp(store, node)?;
            if current >= timestamp {
                return Ok(Some((node, current)));
            }
            node = next_in_ring(store, node)?;
        }
        Ok(None)
    }

    /// Bucket holding exactly `timestamp`, found by scanning
    pub fn bucket_at<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        timestamp: i64,
    ) -> TimelineResult<Option<NodeId>> {
        Ok(self
            .seek(store, timestamp)?
            .filter(|(_, ts)| *ts == timestamp)
            .map(|(bucket, _)| bucket))
    }

    /// Entries at exactly `timestamp`, found by scanning
    pub fn nodes_at<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        timestamp: i64,
    ) -> TimelineResult<Vec<NodeId>> {
        match self.bucket_at(store, timestamp)? {
            Some(bucket) => self.instances(store, bucket),
            None => Ok(Vec::new()),
        }
    }

    /// Bucket following the anchor
    pub fn first_bucket<G: GraphStore + ?Sized>(&self, store: &G) -> TimelineResult<Option<NodeId>> {
        Ok(store
            .single_relationship(self.anchor, &NEXT_ENTRY, Direction::Outgoing)?
            .map(|rel| rel.end))
    }

    /// Bucket preceding the anchor
    pub fn last_bucket<G: GraphStore + ?Sized>(&self, store: &G) -> TimelineResult<Option<NodeId>> {
        Ok(store
            .single_relationship(self.anchor, &NEXT_ENTRY, Direction::Incoming)?
            .map(|rel| rel.start))
    }

    /// Every bucket with its timestamp, in ring order
    pub fn buckets<G: GraphStore + ?Sized>(&self, store: &G) -> TimelineResult<Vec<(NodeId, i64)>> {
        let mut buckets = Vec::new();
        let Some(mut node) = self.first_bucket(store)? else {
            return Ok(buckets);
        };
        while node != self.anchor {
            buckets.push((node, bucket_timestamp(store, node)?));
            node = next_in_ring(store, node)?;
        }
        Ok(buckets)
    }

    /// Entry with the smallest timestamp (first linked among ties)
    pub fn first_entry<G: GraphStore + ?Sized>(&self, store: &G) -> TimelineResult<Option<NodeId>> {
        if let Some(cached) = self.boundaries.first.get() {
            return Ok(cached);
        }
        let entry = self.boundary_entry(store, self.first_bucket(store)?)?;
        self.boundaries.first.set(Some(entry));
        Ok(entry)
    }

    /// Entry with the largest timestamp (first linked among ties)
    pub fn last_entry<G: GraphStore + ?Sized>(&self, store: &G) -> TimelineResult<Option<NodeId>> {
        if let Some(cached) = self.boundaries.last.get() {
            return Ok(cached);
        }
        let entry = self.boundary_entry(store, self.last_bucket(store)?)?;
        self.boundaries.last.set(Some(entry));
        Ok(entry)
    }

    fn boundary_entry<G: GraphStore + ?Sized>(
        &self,
        store: &G,
        bucket: Option<NodeId>,
    ) -> TimelineResult<Option<NodeId>> {
        let Some(bucket) = bucket else {
            return Ok(None);
        };
        match self.instances(store, bucket)?.first() {
            Some(entry) => Ok(Some(*entry)),
            None => Err(TimelineError::corruption(format!(
                "{} in Timeline[{}] has no entries",
                bucket, self.name
            ))),
        }
    }

    /// Lazy scan over `window`
    pub fn entries<'a, G: GraphStore + ?Sized>(
        &'a self,
        store: &'a G,
        window: TimeWindow,
    ) -> Entries<'a, G> {
        Entries::new(store, self.anchor, &self.name, window)
    }

    /// Walk the whole ring, checking its invariants
    ///
    /// # Errors
    /// `Corruption` on the first violated invariant.
    pub fn inspect<G: GraphStore + ?Sized>(&self, store: &G) -> TimelineResult<TimelineStats> {
        let mut stats = TimelineStats::default();
        let Some(first) = self.first_bucket(store)? else {
            if self.last_bucket(store)?.is_some() {
                return Err(TimelineError::corruption(format!(
                    "anchor of Timeline[{}] has an incoming link but no outgoing one",
                    self.name
                )));
            }
            return Ok(stats);
        };

        let mut seen = HashSet::new();
        let mut previous: Option<i64> = None;
        let mut node = first;
        while node != self.anchor {
            if !seen.insert(node) {
                return Err(TimelineError::corruption(format!(
                    "ring of Timeline[{}] visits {} twice",
                    self.name, node
                )));
            }
            incoming_link(store, node)?;

            let timestamp = bucket_timestamp(store, node)?;
            if let Some(prev) = previous {
                if timestamp <= prev {
                    return Err(TimelineError::corruption(format!(
                        "{} holds {} after a bucket holding {}",
                        node, timestamp, prev
                    )));
                }
            }

            let entries = self.instances(store, node)?.len();
            if entries == 0 {
                return Err(TimelineError::corruption(format!(
                    "{} in Timeline[{}] has no entries",
                    node, self.name
                )));
            }

            stats.buckets += 1;
            stats.entries += entries;
            stats.first_timestamp.get_or_insert(timestamp);
            stats.last_timestamp = Some(timestamp);
            previous = Some(timestamp);
            node = next_in_ring(store, node)?;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    fn setup() -> (MemoryGraph, Chain) {
        let mut graph = MemoryGraph::new();
        let anchor = graph.create_node().unwrap();
        (graph, Chain::new(anchor, "test"))
    }

    fn entry(graph: &mut MemoryGraph) -> NodeId {
        graph.create_node().unwrap()
    }

    fn timestamps(graph: &MemoryGraph, chain: &Chain) -> Vec<i64> {
        chain
            .entries(graph, TimeWindow::All)
            .map(|e| chain.timestamp_of(graph, e.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn test_insert_out_of_order() {
        let (mut graph, chain) = setup();
        for ts in [50, 10, 10, 30] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
        }

        assert_eq!(timestamps(&graph, &chain), vec![10, 10, 30, 50]);
        let stats = chain.inspect(&graph).unwrap();
        assert_eq!(stats.buckets, 3);
        assert_eq!(stats.entries, 4);
    }

    #[test]
    fn test_duplicate_timestamp_shares_bucket() {
        let (mut graph, chain) = setup();
        let a = entry(&mut graph);
        let b = entry(&mut graph);
        let first = chain.insert(&mut graph, a, 7).unwrap();
        let second = chain.insert(&mut graph, b, 7).unwrap();
        assert_eq!(first, second);
        assert_eq!(chain.nodes_at(&graph, 7).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_duplicate_inside_chain_shares_bucket() {
        let (mut graph, chain) = setup();
        for ts in [10, 20, 30] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
        }
        let a = entry(&mut graph);
        let b = entry(&mut graph);
        chain.insert(&mut graph, a, 10).unwrap();
        chain.insert(&mut graph, b, 20).unwrap();

        let stats = chain.inspect(&graph).unwrap();
        assert_eq!(stats.buckets, 3);
        assert_eq!(stats.entries, 5);
    }

    #[test]
    fn test_insert_before_first_updates_first() {
        let (mut graph, chain) = setup();
        let late = entry(&mut graph);
        chain.insert(&mut graph, late, 100).unwrap();
        assert_eq!(chain.first_entry(&graph).unwrap(), Some(late));

        let early = entry(&mut graph);
        chain.insert(&mut graph, early, 1).unwrap();
        assert_eq!(chain.first_entry(&graph).unwrap(), Some(early));
        assert_eq!(chain.last_entry(&graph).unwrap(), Some(late));
    }

    #[test]
    fn test_reject_duplicate_membership() {
        let (mut graph, chain) = setup();
        let e = entry(&mut graph);
        chain.insert(&mut graph, e, 1).unwrap();
        let err = chain.insert(&mut graph, e, 2).unwrap_err();
        assert!(matches!(err, TimelineError::AlreadyMember { .. }));
        assert_eq!(chain.inspect(&graph).unwrap().entries, 1);
    }

    #[test]
    fn test_reject_anchor_and_unknown_nodes() {
        let (mut graph, chain) = setup();
        let anchor = chain.anchor();
        assert!(matches!(
            chain.insert(&mut graph, anchor, 1),
            Err(TimelineError::AnchorRemoval)
        ));
        assert!(matches!(
            chain.insert(&mut graph, NodeId(999), 1),
            Err(TimelineError::UnknownNode(_))
        ));
        assert!(matches!(
            chain.remove(&mut graph, anchor),
            Err(TimelineError::AnchorRemoval)
        ));
    }

    #[test]
    fn test_remove_collapses_bucket() {
        let (mut graph, chain) = setup();
        let mut nodes = Vec::new();
        for ts in [5, 15, 25] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
            nodes.push(e);
        }

        let detached = chain.remove(&mut graph, nodes[1]).unwrap();
        assert!(detached.emptied);
        assert_eq!(detached.timestamp, 15);
        assert!(!graph.node_exists(detached.bucket).unwrap());

        assert_eq!(timestamps(&graph, &chain), vec![5, 25]);
        let first = chain.first_bucket(&graph).unwrap().unwrap();
        let last = chain.last_bucket(&graph).unwrap().unwrap();
        assert_eq!(next_in_ring(&graph, first).unwrap(), last);
    }

    #[test]
    fn test_remove_keeps_shared_bucket() {
        let (mut graph, chain) = setup();
        let a = entry(&mut graph);
        let b = entry(&mut graph);
        chain.insert(&mut graph, a, 3).unwrap();
        chain.insert(&mut graph, b, 3).unwrap();

        let detached = chain.remove(&mut graph, a).unwrap();
        assert!(!detached.emptied);
        assert_eq!(chain.nodes_at(&graph, 3).unwrap(), vec![b]);
    }

    #[test]
    fn test_remove_non_member() {
        let (mut graph, chain) = setup();
        let e = entry(&mut graph);
        let err = chain.remove(&mut graph, e).unwrap_err();
        assert!(matches!(err, TimelineError::NotMember { .. }));
    }

    #[test]
    fn test_round_trip_restores_state() {
        let (mut graph, chain) = setup();
        for ts in [10, 20] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
        }
        let before = chain.inspect(&graph).unwrap();
        let first = chain.first_entry(&graph).unwrap();
        let last = chain.last_entry(&graph).unwrap();

        let extra = entry(&mut graph);
        chain.insert(&mut graph, extra, 30).unwrap();
        chain.remove(&mut graph, extra).unwrap();

        assert_eq!(chain.inspect(&graph).unwrap(), before);
        assert_eq!(chain.first_entry(&graph).unwrap(), first);
        assert_eq!(chain.last_entry(&graph).unwrap(), last);
    }

    #[test]
    fn test_drain_to_empty() {
        let (mut graph, chain) = setup();
        for ts in [3, 1, 2, 2] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
        }

        while let Some(last) = chain.last_entry(&graph).unwrap() {
            chain.remove(&mut graph, last).unwrap();
        }

        assert_eq!(chain.first_entry(&graph).unwrap(), None);
        assert_eq!(chain.entries(&graph, TimeWindow::All).count(), 0);
        // Only the anchor and the four entries remain
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.relationship_count(), 0);
    }

    #[test]
    fn test_range_scans() {
        let (mut graph, chain) = setup();
        let mut nodes = Vec::new();
        for ts in [5, 15, 25] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
            nodes.push(e);
        }

        let collect = |window| -> Vec<NodeId> {
            chain
                .entries(&graph, window)
                .collect::<TimelineResult<Vec<_>>>()
                .unwrap()
        };
        assert_eq!(collect(TimeWindow::Between(5, 25)), vec![nodes[1]]);
        assert_eq!(collect(TimeWindow::Before(15)), vec![nodes[0]]);
        assert_eq!(collect(TimeWindow::After(15)), vec![nodes[2]]);
        assert_eq!(collect(TimeWindow::All), nodes);
    }

    #[test]
    fn test_nodes_at_missing_timestamp() {
        let (mut graph, chain) = setup();
        assert!(chain.nodes_at(&graph, 1).unwrap().is_empty());
        let e = entry(&mut graph);
        chain.insert(&mut graph, e, 10).unwrap();
        assert!(chain.nodes_at(&graph, 5).unwrap().is_empty());
        assert!(chain.nodes_at(&graph, 15).unwrap().is_empty());
        assert_eq!(chain.nodes_at(&graph, 10).unwrap(), vec![e]);
    }

    #[test]
    fn test_remove_blocked_by_calendar_leaf() {
        use crate::timeline::CalendarIndex;

        let (mut graph, chain) = setup();
        let calendar = CalendarIndex::new(chain.anchor());
        let e = entry(&mut graph);
        // 2009-07-01 09:00:00 UTC
        let bucket = chain.insert(&mut graph, e, 1_246_438_800).unwrap();
        calendar.insert(&mut graph, bucket, 1_246_438_800).unwrap();

        let err = chain.remove(&mut graph, e).unwrap_err();
        assert!(matches!(
            err,
            TimelineError::Graph(crate::graph::GraphError::NodeInUse { .. })
        ));
        // Rolled back: entry still indexed, ring intact
        assert_eq!(chain.timestamp_of(&graph, e).unwrap(), 1_246_438_800);
        assert_eq!(chain.inspect(&graph).unwrap().entries, 1);
    }

    #[test]
    fn test_bounded_scan_stops_before_cut() {
        let (mut graph, chain) = setup();
        let mut nodes = Vec::new();
        for ts in [5, 15, 25] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
            nodes.push(e);
        }

        // Cut the ring after the last bucket, which lies past both upper bounds
        let last = chain.last_bucket(&graph).unwrap().unwrap();
        let closing = graph
            .single_relationship(last, &NEXT_ENTRY, Direction::Outgoing)
            .unwrap()
            .unwrap();
        graph.delete_relationship(closing.id).unwrap();

        let before: Vec<_> = chain.entries(&graph, TimeWindow::Before(15)).collect();
        assert_eq!(before.len(), 1);
        assert_eq!(*before[0].as_ref().unwrap(), nodes[0]);

        let between: Vec<_> = chain.entries(&graph, TimeWindow::Between(5, 25)).collect();
        assert_eq!(between.len(), 1);
        assert_eq!(*between[0].as_ref().unwrap(), nodes[1]);

        // An unbounded walk reaches the cut, reports it once and ends
        let all: Vec<_> = chain.entries(&graph, TimeWindow::All).collect();
        assert_eq!(all.len(), 3);
        assert!(all[..2].iter().all(|item| item.is_ok()));
        assert!(all[2].as_ref().unwrap_err().is_fatal());
    }

    #[test]
    fn test_clear_deletes_ring() {
        let (mut graph, chain) = setup();
        for ts in [1, 2, 3] {
            let e = entry(&mut graph);
            chain.insert(&mut graph, e, ts).unwrap();
        }
        assert_eq!(chain.clear(&mut graph).unwrap(), 3);
        assert_eq!(graph.relationship_count(), 0);
        assert_eq!(chain.first_entry(&graph).unwrap(), None);
        assert_eq!(chain.inspect(&graph).unwrap(), TimelineStats::default());
    }

    #[test]
    fn test_missing_link_is_fatal() {
        let (mut graph, chain) = setup();
        let a = entry(&mut graph);
        let b = entry(&mut graph);
        chain.insert(&mut graph, a, 1).unwrap();
        chain.insert(&mut graph, b, 2).unwrap();

        // Sever the link between the two buckets behind the chain's back
        let first = chain.first_bucket(&graph).unwrap().unwrap();
        let link = graph
            .single_relationship(first, &NEXT_ENTRY, Direction::Outgoing)
            .unwrap()
            .unwrap();
        graph.delete_relationship(link.id).unwrap();

        let err = chain.remove(&mut graph, a).unwrap_err();
        assert!(err.is_fatal());
        assert!(chain.inspect(&graph).unwrap_err().is_fatal());
    }

    #[test]
    fn test_timelines_share_entries() {
        let mut graph = MemoryGraph::new();
        let anchor_a = graph.create_node().unwrap();
        let anchor_b = graph.create_node().unwrap();
        let a = Chain::new(anchor_a, "a");
        let b = Chain::new(anchor_b, "b");

        let shared = entry(&mut graph);
        a.insert(&mut graph, shared, 10).unwrap();
        b.insert(&mut graph, shared, 20).unwrap();

        assert_eq!(a.timestamp_of(&graph, shared).unwrap(), 10);
        assert_eq!(b.timestamp_of(&graph, shared).unwrap(), 20);

        a.remove(&mut graph, shared).unwrap();
        assert!(matches!(
            a.timestamp_of(&graph, shared),
            Err(TimelineError::NotMember { .. })
        ));
        assert_eq!(b.timestamp_of(&graph, shared).unwrap(), 20);
    }
}
