//! Interval lookup for playback preview: which lyric line is active at a tick.
//!
//! Intervals are sorted by start and never overlap. Containment is half-open
//! (`start <= tick < end`); a tick in a gap, or past the last end, resolves to
//! the nearest interval that started before it.

use log::trace;

use crate::song::LyricEvent;

/// Display row of a line, alternating per insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Top,
    Bottom,
}

impl Lane {
    fn flip(self) -> Self {
        match self {
            Lane::Top => Lane::Bottom,
            Lane::Bottom => Lane::Top,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeEntry<K, V> {
    pub start: K,
    pub end: K,
    pub value: V,
    pub lane: Lane,
}

/// A `search` result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeHit<'a, K, V> {
    pub index: usize,
    pub entry: &'a RangeEntry<K, V>,
}

impl<K, V> RangeHit<'_, K, V> {
    pub fn value(&self) -> &V {
        &self.entry.value
    }
}

#[derive(Debug, Clone)]
pub struct LyricRangeIndex<K, V> {
    entries: Vec<RangeEntry<K, V>>,
    last_lane: Option<Lane>,
}

impl<K, V> Default for LyricRangeIndex<K, V> {
    fn default() -> Self {
        Self { entries: Vec::new(), last_lane: None }
    }
}

impl<K: Ord + Copy, V> LyricRangeIndex<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RangeEntry<K, V>] {
        &self.entries
    }

    /// Insert `[start, end)` keeping start order. Overlapping ranges are the
    /// caller's bug and are not checked.
    pub fn push(&mut self, (start, end): (K, K), value: V) -> Lane {
        let lane = self.last_lane.map_or(Lane::Top, Lane::flip);
        self.last_lane = Some(lane);
        let at = self.entries.partition_point(|e| e.start <= start);
        self.entries.insert(at, RangeEntry { start, end, value, lane });
        lane
    }

    /// The interval containing `tick`, else the nearest one started before it.
    pub fn search(&self, tick: K) -> Option<RangeHit<'_, K, V>> {
        let (mut lo, mut hi) = (0usize, self.entries.len());
        let mut best = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let e = &self.entries[mid];
            if tick < e.start {
                hi = mid;
            } else if tick < e.end {
                return Some(RangeHit { index: mid, entry: e });
            } else {
                best = Some(mid);
                lo = mid + 1;
            }
        }
        trace!("range search fell back to {best:?}");
        best.map(|index| RangeHit { index, entry: &self.entries[index] })
    }

    /// The interval after whatever `search(tick)` finds, or the first one
    /// when `tick` precedes everything.
    pub fn get_next(&self, tick: K) -> Option<RangeHit<'_, K, V>> {
        let index = self.search(tick).map_or(0, |h| h.index + 1);
        self.get_by_index(index)
    }

    pub fn get_by_index(&self, index: usize) -> Option<RangeHit<'_, K, V>> {
        self.entries.get(index).map(|entry| RangeHit { index, entry })
    }

    /// Remove the interval with exactly this key.
    pub fn remove(&mut self, (start, end): (K, K)) -> Option<V> {
        let from = self.entries.partition_point(|e| e.start < start);
        let pos = self.entries[from..]
            .iter()
            .take_while(|e| e.start == start)
            .position(|e| e.end == end)?;
        Some(self.entries.remove(from + pos).value)
    }
}

impl LyricRangeIndex<i64, usize> {
    /// Index lines of grouped lyric events by their line number. A line runs
    /// from its first word to the next line's first word; the last one ends a
    /// beat after its last word.
    pub fn from_lines(lines: &[Vec<LyricEvent>], ticks_per_beat: u16) -> Self {
        let starts: Vec<(usize, i64, i64)> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| {
                let first = l.first()?.tick as i64;
                let last = l.iter().map(|e| e.tick).max()? as i64;
                Some((i, first, last))
            })
            .collect();

        let mut index = Self::new();
        for (n, &(line, start, last)) in starts.iter().enumerate() {
            let end = starts
                .get(n + 1)
                .map_or(last + ticks_per_beat as i64, |&(_, next, _)| next)
                .max(start + 1);
            index.push((start, end), line);
        }
        index
    }
}
