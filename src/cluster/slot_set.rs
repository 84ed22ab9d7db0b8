//! Canonical slot-range algebra (C1).
//!
//! Parses the `SLOTSRANGE s1 e1 [s2 e2 ...]` argument shape used by
//! `CLUSTER MIGRATESLOTS` and `SYNCSLOTS ESTABLISH`, and provides the
//! overlap/containment operations the rest of the migration subsystem needs.

use super::types::{SlotMigrationError, SlotMigrationResult, SlotRange, TOTAL_SLOTS};
use serde::{Deserialize, Serialize};

/// A non-overlapping, ascending-sorted set of slot ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SlotSet {
    ranges: Vec<SlotRange>,
}

impl SlotSet {
    /// Build a canonical `SlotSet` from raw ranges, rejecting any overlap.
    ///
    /// Overlapping input ranges are never silently merged; intra-request
    /// overlap is a hard error per §4.1.
    pub fn from_ranges(mut ranges: Vec<SlotRange>) -> SlotMigrationResult<Self> {
        for r in &ranges {
            if r.start > r.end {
                return Err(SlotMigrationError::InvertedRange {
                    start: r.start,
                    end: r.end,
                });
            }
            if r.end >= TOTAL_SLOTS {
                return Err(SlotMigrationError::SlotOutOfRange);
            }
        }

        ranges.sort_by_key(|r| r.start);

        for w in ranges.windows(2) {
            if w[0].end >= w[1].start {
                return Err(SlotMigrationError::OverlappingRanges);
            }
        }

        Ok(Self { ranges })
    }

    /// Parse the tokens following `SLOTSRANGE` (e.g. `["16379", "16380"]`).
    pub fn parse(tokens: &[&str]) -> SlotMigrationResult<Self> {
        if tokens.is_empty() || tokens.len() % 2 != 0 {
            if !tokens.is_empty() && tokens.len() % 2 == 1 {
                return Err(SlotMigrationError::MissingEndSlot);
            }
            return Err(SlotMigrationError::SyntaxError);
        }

        let mut ranges = Vec::with_capacity(tokens.len() / 2);
        for pair in tokens.chunks(2) {
            let start: u16 = pair[0].parse().map_err(|_| SlotMigrationError::SyntaxError)?;
            let end: u16 = pair[1].parse().map_err(|_| SlotMigrationError::SyntaxError)?;

            if start >= TOTAL_SLOTS || end >= TOTAL_SLOTS {
                return Err(SlotMigrationError::SlotOutOfRange);
            }
            if start > end {
                return Err(SlotMigrationError::InvertedRange { start, end });
            }
            ranges.push(SlotRange::new(start, end));
        }

        Self::from_ranges(ranges)
    }

    pub fn ranges(&self) -> &[SlotRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total slot count across all ranges.
    pub fn slot_count(&self) -> u32 {
        self.ranges.iter().map(|r| r.count() as u32).sum()
    }

    pub fn contains_slot(&self, slot: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(slot))
    }

    pub fn contains_range(&self, other: &SlotRange) -> bool {
        self.ranges
            .iter()
            .any(|r| r.start <= other.start && r.end >= other.end)
    }

    /// True if any range in `self` overlaps any range in `other`.
    pub fn overlaps_any(&self, other: &SlotSet) -> bool {
        for a in &self.ranges {
            for b in &other.ranges {
                if a.start <= b.end && b.start <= a.end {
                    return true;
                }
            }
        }
        false
    }

    /// Slot-by-slot union with another set. Adjacent/overlapping ranges merge.
    pub fn union(&self, other: &SlotSet) -> SlotSet {
        let mut all: Vec<SlotRange> = self.ranges.iter().chain(other.ranges.iter()).copied().collect();
        all.sort_by_key(|r| r.start);

        let mut merged: Vec<SlotRange> = Vec::new();
        for r in all.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(r.end);
                }
                _ => merged.push(r),
            }
        }

        SlotSet { ranges: merged }
    }

    /// Slot-by-slot intersection with another set.
    pub fn intersection(&self, other: &SlotSet) -> SlotSet {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                let start = a.start.max(b.start);
                let end = a.end.min(b.end);
                if start <= end {
                    out.push(SlotRange::new(start, end));
                }
            }
        }
        SlotSet { ranges: out }
    }

    /// Iterate every individual slot covered by this set, in ascending order.
    pub fn iter_slots(&self) -> impl Iterator<Item = u16> + '_ {
        self.ranges.iter().flat_map(|r| r.start..=r.end)
    }

    /// Render as the textual "a-b c-d" form used by GETSLOTMIGRATIONS.
    pub fn to_text(&self) -> String {
        self.ranges
            .iter()
            .map(|r| format!("{}-{}", r.start, r.end))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True if a single requested range spans more than one shard's
    /// contiguous ownership, per the `Requested slots span multiple shards`
    /// operator error. Callers pass the owning node id for each boundary slot.
    pub fn spans_multiple_owners<F>(&self, owner_of: F) -> bool
    where
        F: Fn(u16) -> Option<String>,
    {
        for r in &self.ranges {
            let mut owners = r.start..=r.end;
            let first_owner = owners.next().and_then(&owner_of);
            if first_owner.is_none() {
                continue;
            }
            if owners.any(|slot| owner_of(slot) != first_owner) {
                return true;
            }
        }
        false
    }
}
