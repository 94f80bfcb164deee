//! Timeline - public contract over the chain and calendar index
//!
//! A `Timeline` owns its store (or borrows it, since `&mut G` is itself a
//! store) and routes every mutation through one unit of work:
//!
//! - `add`: chain insert, then calendar insert for the bucket
//! - `remove`: detach, and if the bucket emptied, calendar unlink then
//!   ring collapse
//! - `clear_batched`: repeated `remove` of the last entry, one unit of work
//!   per batch
//!
//! Point lookups descend the calendar tree when it is enabled. Ranges always
//! walk the ring.

use crate::graph::{atomic, GraphStore, NodeId};
use crate::timeline::calendar::{parse_datetime, CalendarIndex, CalendarKey};
use crate::timeline::chain::{Chain, Detached};
use crate::timeline::error::{TimelineError, TimelineResult};
use crate::timeline::scan::{Entries, TimeWindow};
use crate::timeline::{TimelineStats, TIMELINE_NAME};
use serde::{Deserialize, Serialize};

/// Per-timeline behaviour switches
///
/// Must be the same every time a given timeline is opened: a ring built
/// without the calendar index has no tree to descend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineOptions {
    /// Maintain the calendar tree and use it for point lookups
    #[serde(default = "default_calendar_index")]
    pub calendar_index: bool,
}

fn default_calendar_index() -> bool {
    true
}

impl Default for TimelineOptions {
    fn default() -> Self {
        Self {
            calendar_index: default_calendar_index(),
        }
    }
}

/// Detach `entry`, pruning the calendar and ring if its bucket emptied
fn unlink_entry<G: GraphStore + ?Sized>(
    chain: &Chain,
    calendar: &CalendarIndex,
    store: &mut G,
    entry: NodeId,
) -> TimelineResult<Detached> {
    let detached = chain.detach(store, entry)?;
    if detached.emptied {
        calendar.unlink_bucket(store, detached.bucket)?;
        chain.collapse(store, detached.bucket)?;
    }
    Ok(detached)
}

/// Refuse `name` if any anchor in `store` already carries it
fn ensure_name_unused<G: GraphStore + ?Sized>(store: &G, name: &str) -> TimelineResult<()> {
    if !store
        .nodes_with_property(TIMELINE_NAME, &name.into())?
        .is_empty()
    {
        return Err(TimelineError::InvalidArgument(format!(
            "a timeline named '{}' already exists",
            name
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> TimelineResult<()> {
    if name.trim().is_empty() {
        return Err(TimelineError::InvalidArgument(
            "timeline name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Named timeline bound to an anchor node
pub struct Timeline<G: GraphStore> {
    store: G,
    chain: Chain,
    calendar: CalendarIndex,
    options: TimelineOptions,
}

impl<G: GraphStore> std::fmt::Debug for Timeline<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeline")
            .field("name", &self.chain.name())
            .field("anchor", &self.chain.anchor())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<G: GraphStore> Timeline<G> {
    fn bind(store: G, anchor: NodeId, name: String) -> Self {
        Self {
            store,
            chain: Chain::new(anchor, name),
            calendar: CalendarIndex::new(anchor),
            options: TimelineOptions::default(),
        }
    }

    /// Create a new anchor carrying `name`
    ///
    /// # Errors
    /// `InvalidArgument` if the name is empty or another anchor already
    /// carries it.
    pub fn create(mut store: G, name: &str) -> TimelineResult<Self> {
        validate_name(name)?;
        ensure_name_unused(&store, name)?;

        let anchor = atomic(&mut store, |store| -> TimelineResult<NodeId> {
            let anchor = store.create_node()?;
            store.set_node_property(anchor, TIMELINE_NAME, name.into())?;
            Ok(anchor)
        })?;
        tracing::info!(timeline = name, "Created timeline anchored at {}", anchor);
        Ok(Self::bind(store, anchor, name.to_string()))
    }

    /// Bind to `anchor` under `name`
    ///
    /// An unnamed anchor is claimed for `name`.
    ///
    /// # Errors
    /// - `UnknownNode` if the anchor does not exist
    /// - `NamingConflict` if the anchor already carries another name
    /// - `InvalidArgument` if the anchor is unnamed and another anchor
    ///   already carries `name`
    pub fn open(mut store: G, name: &str, anchor: NodeId) -> TimelineResult<Self> {
        validate_name(name)?;
        if !store.node_exists(anchor)? {
            return Err(TimelineError::UnknownNode(anchor));
        }

        match store.node_str(anchor, TIMELINE_NAME)? {
            Some(stored) if stored != name => {
                return Err(TimelineError::NamingConflict {
                    stored,
                    requested: name.to_string(),
                });
            }
            Some(_) => {}
            None => {
                ensure_name_unused(&store, name)?;
                atomic(&mut store, |store| -> TimelineResult<()> {
                    store.set_node_property(anchor, TIMELINE_NAME, name.into())?;
                    Ok(())
                })?;
                tracing::debug!(timeline = name, "Claimed {} as anchor", anchor);
            }
        }
        Ok(Self::bind(store, anchor, name.to_string()))
    }

    /// Bind to the anchor carrying `name`
    pub fn open_named(store: G, name: &str) -> TimelineResult<Self> {
        validate_name(name)?;
        let anchors = store.nodes_with_property(TIMELINE_NAME, &name.into())?;
        match anchors.as_slice() {
            [] => Err(TimelineError::UnknownTimeline(name.to_string())),
            [anchor] => {
                let anchor = *anchor;
                Ok(Self::bind(store, anchor, name.to_string()))
            }
            _ => Err(TimelineError::corruption(format!(
                "{} anchors carry the name '{}'",
                anchors.len(),
                name
            ))),
        }
    }

    /// Bind to `anchor`, reading the timeline name from it
    pub fn load(store: G, anchor: NodeId) -> TimelineResult<Self> {
        if !store.node_exists(anchor)? {
            return Err(TimelineError::UnknownNode(anchor));
        }
        let name = store.node_str(anchor, TIMELINE_NAME)?.ok_or_else(|| {
            TimelineError::InvalidArgument(format!("{} is not a timeline anchor", anchor))
        })?;
        Ok(Self::bind(store, anchor, name))
    }

    pub fn with_options(mut self, options: TimelineOptions) -> Self {
        self.options = options;
        self
    }

    // ==================== Mutations ====================

    /// Index `entry` at `timestamp`
    ///
    /// # Errors
    /// - `AlreadyMember` if `entry` is already in this timeline
    /// - `UnknownNode` / `AnchorRemoval` for invalid entries
    pub fn add(&mut self, entry: NodeId, timestamp: i64) -> TimelineResult<()> {
        let chain = &self.chain;
        let calendar = &self.calendar;
        let use_calendar = self.options.calendar_index;

        atomic(&mut self.store, |store| {
            let bucket = chain.insert(store, entry, timestamp)?;
            if use_calendar {
                calendar.insert(store, bucket, timestamp)?;
            }
            Ok(())
        })
    }

    /// Drop `entry` from this timeline, returning the timestamp it held
    ///
    /// # Errors
    /// - `NotMember` if `entry` is not in this timeline
    /// - `AnchorRemoval` if `entry` is the anchor
    pub fn remove(&mut self, entry: NodeId) -> TimelineResult<i64> {
        let chain = &self.chain;
        let calendar = &self.calendar;
        let detached = atomic(&mut self.store, |store| {
            unlink_entry(chain, calendar, store, entry)
        })?;
        Ok(detached.timestamp)
    }

    /// Delete the ring and calendar tree in one unit of work
    ///
    /// Returns the number of buckets deleted. Entry nodes are untouched.
    pub fn clear(&mut self) -> TimelineResult<usize> {
        let chain = &self.chain;
        let calendar = &self.calendar;
        chain.invalidate();

        let buckets = atomic(&mut self.store, |store| {
            calendar.clear(store)?;
            chain.clear(store)
        })?;
        tracing::info!(timeline = %chain.name(), buckets, "Cleared timeline");
        Ok(buckets)
    }

    /// Remove entries from the end, `batch_size` per unit of work
    ///
    /// Inside a caller's unit of work every batch joins it, so the whole
    /// drain commits or rolls back together. Returns the number of entries
    /// removed.
    pub fn clear_batched(&mut self, batch_size: usize) -> TimelineResult<usize> {
        if batch_size == 0 {
            return Err(TimelineError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }

        let chain = &self.chain;
        let calendar = &self.calendar;
        let mut removed = 0;
        loop {
            let batch = atomic(&mut self.store, |store| -> TimelineResult<usize> {
                let mut count = 0;
                while count < batch_size {
                    let Some(last) = chain.last_entry(&*store)? else {
                        break;
                    };
                    unlink_entry(chain, calendar, store, last)?;
                    count += 1;
                }
                Ok(count)
            })?;

            removed += batch;
            if batch > 0 {
                tracing::debug!(timeline = %chain.name(), batch, removed, "Committed clear batch");
            }
            if batch < batch_size {
                break;
            }
        }
        tracing::info!(timeline = %chain.name(), removed, "Drained timeline");
        Ok(removed)
    }

    // ==================== Lookups ====================

    /// Entries at exactly `timestamp`, in insertion order
    pub fn nodes_at(&self, timestamp: i64) -> TimelineResult<Vec<NodeId>> {
        let decomposable = CalendarKey::from_timestamp(timestamp).is_some();
        if !self.options.calendar_index || !decomposable {
            return self.chain.nodes_at(&self.store, timestamp);
        }
        match self.calendar.lookup(&self.store, timestamp)? {
            Some(bucket) => self.chain.instances(&self.store, bucket),
            None => Ok(Vec::new()),
        }
    }

    /// Entries at the instant described by `date`
    ///
    /// See [`parse_datetime`] for accepted formats.
    pub fn nodes_by_date(&self, date: &str) -> TimelineResult<Vec<NodeId>> {
        self.nodes_at(parse_datetime(date)?)
    }

    /// Entries strictly between the optional bounds, ascending
    ///
    /// # Errors
    /// `InvalidRange` if both bounds are present and `after >= before`.
    pub fn all_nodes(
        &self,
        after: Option<i64>,
        before: Option<i64>,
    ) -> TimelineResult<Entries<'_, G>> {
        let window = TimeWindow::from_bounds(after, before)?;
        Ok(self.chain.entries(&self.store, window))
    }

    /// Entries with timestamp < `timestamp`
    pub fn before(&self, timestamp: i64) -> Entries<'_, G> {
        self.chain.entries(&self.store, TimeWindow::Before(timestamp))
    }

    /// Entries with timestamp > `timestamp`
    pub fn after(&self, timestamp: i64) -> Entries<'_, G> {
        self.chain.entries(&self.store, TimeWindow::After(timestamp))
    }

    /// Entries with `start < timestamp < end`
    pub fn between(&self, start: i64, end: i64) -> TimelineResult<Entries<'_, G>> {
        let window = TimeWindow::between(start, end)?;
        Ok(self.chain.entries(&self.store, window))
    }

    pub fn first(&self) -> TimelineResult<Option<NodeId>> {
        self.chain.first_entry(&self.store)
    }

    pub fn last(&self) -> TimelineResult<Option<NodeId>> {
        self.chain.last_entry(&self.store)
    }

    /// Timestamp `entry` is indexed at
    ///
    /// # Errors
    /// `NotMember` if `entry` is not in this timeline.
    pub fn timestamp_of(&self, entry: NodeId) -> TimelineResult<i64> {
        self.chain.timestamp_of(&self.store, entry)
    }

    pub fn contains(&self, entry: NodeId) -> TimelineResult<bool> {
        Ok(self.chain.membership(&self.store, entry)?.is_some())
    }

    /// Walk the ring and report its shape
    pub fn stats(&self) -> TimelineResult<TimelineStats> {
        self.chain.inspect(&self.store)
    }

    /// Check the ring invariants and that the calendar tree reaches every
    /// decomposable bucket
    pub fn verify(&self) -> TimelineResult<TimelineStats> {
        let stats = self.chain.inspect(&self.store)?;
        if self.options.calendar_index {
            for (bucket, timestamp) in self.chain.buckets(&self.store)? {
                if CalendarKey::from_timestamp(timestamp).is_none() {
                    continue;
                }
                let indexed = self.calendar.lookup(&self.store, timestamp)?;
                if indexed != Some(bucket) {
                    return Err(TimelineError::corruption(format!(
                        "calendar of Timeline[{}] maps {} to {:?} instead of {}",
                        self.chain.name(),
                        timestamp,
                        indexed,
                        bucket
                    )));
                }
            }
        }
        Ok(stats)
    }

    // ==================== Accessors ====================

    /// Forget cached first/last entries
    ///
    /// Needed after rolling back a unit of work that spanned a mutation.
    pub fn invalidate_cache(&self) {
        self.chain.invalidate();
    }

    pub fn name(&self) -> &str {
        self.chain.name()
    }

    pub fn anchor(&self) -> NodeId {
        self.chain.anchor()
    }

    pub fn options(&self) -> TimelineOptions {
        self.options
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    /// Direct store access; drops cached boundaries
    pub fn store_mut(&mut self) -> &mut G {
        self.chain.invalidate();
        &mut self.store
    }

    pub fn into_inner(self) -> G {
        self.store
    }
}
