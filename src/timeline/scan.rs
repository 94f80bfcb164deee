//! Range scans over the bucket ring
//!
//! Every range query is a walk forward from the anchor with an explicit
//! stop predicate:
//!
//! ```text
//! anchor → b(5) → b(15) → b(25) → anchor
//!
//! All            : emit every bucket, stop at anchor
//! Before(15)     : emit while ts < 15, stop at first ts >= 15
//! After(15)      : skip while ts <= 15, emit the rest
//! Between(5, 25) : skip ts <= 5, emit while ts < 25
//! ```
//!
//! Bounds are exclusive. The walk is lazy and stops at the first bucket past
//! the upper bound, so bounded-above queries never visit the whole ring.

use crate::graph::{Direction, GraphStore, NodeId};
use crate::timeline::chain::{bucket_timestamp, next_in_ring, tagged_instances};
use crate::timeline::error::{TimelineError, TimelineResult};
use crate::timeline::NEXT_ENTRY;
use std::collections::VecDeque;

/// Which buckets a scan emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    /// Every bucket
    All,
    /// Buckets with timestamp < t
    Before(i64),
    /// Buckets with timestamp > t
    After(i64),
    /// Buckets with start < timestamp < end
    Between(i64, i64),
}

impl TimeWindow {
    /// Build a window from optional exclusive bounds
    ///
    /// # Errors
    /// Both bounds present with `after >= before`.
    pub fn from_bounds(after: Option<i64>, before: Option<i64>) -> TimelineResult<Self> {
        match (after, before) {
            (None, None) => Ok(TimeWindow::All),
            (None, Some(end)) => Ok(TimeWindow::Before(end)),
            (Some(start), None) => Ok(TimeWindow::After(start)),
            (Some(start), Some(end)) => Self::between(start, end),
        }
    }

    /// Open interval (start, end)
    pub fn between(start: i64, end: i64) -> TimelineResult<Self> {
        if start >= end {
            return Err(TimelineError::InvalidRange { start, end });
        }
        Ok(TimeWindow::Between(start, end))
    }

    /// Check if a bucket timestamp lies inside the window
    pub fn contains(&self, timestamp: i64) -> bool {
        match *self {
            TimeWindow::All => true,
            TimeWindow::Before(end) => timestamp < end,
            TimeWindow::After(start) => timestamp > start,
            TimeWindow::Between(start, end) => timestamp > start && timestamp < end,
        }
    }

    /// Check if no bucket at or after this timestamp can be inside the window
    pub fn is_past(&self, timestamp: i64) -> bool {
        match *self {
            TimeWindow::All | TimeWindow::After(_) => false,
            TimeWindow::Before(end) | TimeWindow::Between(_, end) => timestamp >= end,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// Not started: next step reads the anchor's successor
    Start,
    /// Next bucket to visit
    At(NodeId),
    Done,
}

/// Lazy sequence of entries in ascending timestamp order
///
/// Items are `Err` only on store failure or ring corruption; the sequence
/// ends after the first error.
pub struct Entries<'a, G: GraphStore + ?Sized> {
    store: &'a G,
    anchor: NodeId,
    name: &'a str,
    window: TimeWindow,
    cursor: Cursor,
    pending: VecDeque<NodeId>,
}

impl<'a, G: GraphStore + ?Sized> Entries<'a, G> {
    pub(crate) fn new(store: &'a G, anchor: NodeId, name: &'a str, window: TimeWindow) -> Self {
        Self {
            store,
            anchor,
            name,
            window,
            cursor: Cursor::Start,
            pending: VecDeque::new(),
        }
    }

    /// The window this scan walks
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Visit the bucket under the cursor, queueing its entries if in range
    fn step(&mut self) -> TimelineResult<()> {
        let bucket = match self.cursor {
            Cursor::Done => return Ok(()),
            Cursor::Start => {
                match self
                    .store
                    .single_relationship(self.anchor, &NEXT_ENTRY, Direction::Outgoing)?
                {
                    Some(rel) => rel.end,
                    None => {
                        self.cursor = Cursor::Done;
                        return Ok(());
                    }
                }
            }
            Cursor::At(bucket) => bucket,
        };

        if bucket == self.anchor {
            self.cursor = Cursor::Done;
            return Ok(());
        }

        let timestamp = bucket_timestamp(self.store, bucket)?;
        if self.window.is_past(timestamp) {
            self.cursor = Cursor::Done;
            return Ok(());
        }

        let next = next_in_ring(self.store, bucket)?;
        if self.window.contains(timestamp) {
            self.pending
                .extend(tagged_instances(self.store, bucket, self.name)?);
        }
        self.cursor = Cursor::At(next);
        Ok(())
    }
}

impl<G: GraphStore + ?Sized> Iterator for Entries<'_, G> {
    type Item = TimelineResult<NodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(Ok(entry));
            }
            if matches!(self.cursor, Cursor::Done) {
                return None;
            }
            if let Err(e) = self.step() {
                self.cursor = Cursor::Done;
                self.pending.clear();
                return Some(Err(e));
            }
        }
    }
}

impl<G: GraphStore + ?Sized> std::iter::FusedIterator for Entries<'_, G> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_from_bounds() {
        assert_eq!(TimeWindow::from_bounds(None, None).unwrap(), TimeWindow::All);
        assert_eq!(
            TimeWindow::from_bounds(None, Some(10)).unwrap(),
            TimeWindow::Before(10)
        );
        assert_eq!(
            TimeWindow::from_bounds(Some(10), None).unwrap(),
            TimeWindow::After(10)
        );
        assert_eq!(
            TimeWindow::from_bounds(Some(5), Some(25)).unwrap(),
            TimeWindow::Between(5, 25)
        );
    }

    #[test]
    fn test_between_rejects_empty_interval() {
        assert!(matches!(
            TimeWindow::between(25, 5),
            Err(TimelineError::InvalidRange { start: 25, end: 5 })
        ));
        assert!(TimeWindow::between(5, 5).is_err());
    }

    #[test]
    fn test_bounds_are_exclusive() {
        let window = TimeWindow::Between(5, 25);
        assert!(!window.contains(5));
        assert!(window.contains(15));
        assert!(!window.contains(25));

        assert!(!TimeWindow::Before(15).contains(15));
        assert!(!TimeWindow::After(15).contains(15));
        assert!(TimeWindow::After(15).contains(16));
    }

    #[test]
    fn test_stop_predicate() {
        assert!(TimeWindow::Before(15).is_past(15));
        assert!(!TimeWindow::Before(15).is_past(14));
        assert!(TimeWindow::Between(5, 25).is_past(30));
        assert!(!TimeWindow::After(5).is_past(i64::MAX));
        assert!(!TimeWindow::All.is_past(i64::MAX));
    }
}
