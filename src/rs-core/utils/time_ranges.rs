use std::{ops::Index, slice::Iter};

/// Tolerance, in seconds, used when checking whether a position is inside a
/// buffered range.
///
/// Media buffers regularly report ranges starting or ending a frame away from
/// where the corresponding segment actually is.
pub(crate) const TIME_FUDGE_FACTOR: f64 = 1. / 30.;

/// Represent a range of time, from a start to an end, generally in seconds
#[derive(Clone, Debug, PartialEq)]
pub struct TimeRange {
    start: f64,
    end: f64,
}

impl TimeRange {
    pub(crate) fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Returns the start time of the range
    pub(crate) fn start(&self) -> f64 {
        self.start
    }

    /// Returns the end time of the range
    pub(crate) fn end(&self) -> f64 {
        self.end
    }

    fn overlap_with(&self, start: f64, end: f64) -> f64 {
        f64::max(0., f64::min(self.end, end) - f64::max(self.start, start))
    }
}

/// Abstracts non-contiguous chronological ranges of time, generally expressed in seconds.
///
/// Ranges are always kept sorted and never overlap each other.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<TimeRange>,
}

impl TimeRanges {
    /// Create a new empty `TimeRanges` object
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create a `TimeRanges` from a flat list of `start, end` couples, as
    /// communicated by JavaScript.
    ///
    /// A trailing lone value is ignored.
    pub(crate) fn from_flat(flat: &[f64]) -> Self {
        let mut ranges = Self::new();
        flat.chunks_exact(2).for_each(|c| ranges.add(c[0], c[1]));
        ranges
    }

    /// Add a range of time to that `TimeRanges` object, merging it with the ranges that are
    /// already there.
    pub(crate) fn add(&mut self, start: f64, end: f64) {
        if end < start {
            return;
        }
        let first_idx = self.ranges.iter().position(|r| r.end >= start);
        let first_idx = match first_idx {
            None => {
                self.ranges.push(TimeRange { start, end });
                return;
            }
            Some(idx) => idx,
        };
        if end < self.ranges[first_idx].start {
            self.ranges.insert(first_idx, TimeRange { start, end });
            return;
        }

        // Every range from `first_idx` which starts before the new end is merged.
        let mut last_idx = first_idx;
        while last_idx + 1 < self.ranges.len() && self.ranges[last_idx + 1].start <= end {
            last_idx += 1;
        }
        let merged = TimeRange {
            start: f64::min(start, self.ranges[first_idx].start),
            end: f64::max(end, self.ranges[last_idx].end),
        };
        self.ranges.drain(first_idx..=last_idx);
        self.ranges.insert(first_idx, merged);
    }

    /// Remove time range at a particular index
    pub(crate) fn remove(&mut self, idx: usize) -> TimeRange {
        self.ranges.remove(idx)
    }

    /// Returns the number of non-contiguous ranges in this `TimeRanges` object
    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the starting time of the range whose index is given in argument.
    ///
    /// Returns `None` if the given index is superior or equal to the number of actual ranges.
    pub(crate) fn start(&self, idx: usize) -> Option<f64> {
        self.ranges.get(idx).map(|r| r.start)
    }

    /// Returns the ending time of the range whose index is given in argument.
    ///
    /// Returns `None` if the given index is superior or equal to the number of actual ranges.
    pub(crate) fn end(&self, idx: usize) -> Option<f64> {
        self.ranges.get(idx).map(|r| r.end)
    }

    /// Returns the range containing the given position.
    ///
    /// Returns `None` if no range in this `TimeRanges` object contains it.
    pub(crate) fn range_for(&self, pos: f64) -> Option<&TimeRange> {
        for range in self.into_iter() {
            if pos < range.end {
                return if pos >= range.start {
                    Some(range)
                } else {
                    None
                };
            }
        }
        None
    }

    /// Returns the ranges containing `time`, with a `TIME_FUDGE_FACTOR` tolerance on both
    /// sides.
    pub(crate) fn find_range(&self, time: f64) -> TimeRanges {
        self.filter(|r| {
            r.start - TIME_FUDGE_FACTOR <= time && r.end + TIME_FUDGE_FACTOR >= time
        })
    }

    /// Returns the ranges starting after `time`.
    pub(crate) fn find_next_range(&self, time: f64) -> TimeRanges {
        self.filter(|r| r.start - TIME_FUDGE_FACTOR >= time)
    }

    /// Percentage, from `0` to `100`, of the `[start, end]` interval which is buffered.
    pub(crate) fn buffered_percent(&self, start: f64, end: f64) -> f64 {
        let duration = end - start;
        if duration <= 0. {
            return 0.;
        }
        let buffered: f64 = self.ranges.iter().map(|r| r.overlap_with(start, end)).sum();
        f64::min(100., buffered * 100. / duration)
    }

    pub(crate) fn clear(&mut self) {
        self.ranges.clear()
    }

    pub(crate) fn iter(&self) -> Iter<'_, TimeRange> {
        self.ranges.iter()
    }

    fn filter(&self, predicate: impl Fn(&TimeRange) -> bool) -> TimeRanges {
        TimeRanges {
            ranges: self.ranges.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }
}

/// Compare the ranges buffered before and after an append and returns the only end which
/// is new in `update`.
///
/// To be considered, an end must not have already existed in `original`, must not come from
/// the shrinking of an original range and must not be contained in an original range.
///
/// Returns `None` unless exactly one such end exists.
pub(crate) fn find_sole_uncommon_end(original: &TimeRanges, update: &TimeRanges) -> Option<f64> {
    let mut candidates = update.iter().map(|r| r.end).filter(|end| {
        !original
            .iter()
            .any(|o| o.start <= *end && o.end >= *end)
    });
    match (candidates.next(), candidates.next()) {
        (Some(end), None) => Some(end),
        _ => None,
    }
}

impl Index<usize> for TimeRanges {
    type Output = TimeRange;
    fn index(&self, index: usize) -> &Self::Output {
        &self.ranges[index]
    }
}

impl<'a> IntoIterator for &'a TimeRanges {
    type Item = &'a TimeRange;
    type IntoIter = Iter<'a, TimeRange>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(flat: &[f64]) -> TimeRanges {
        TimeRanges::from_flat(flat)
    }

    #[test]
    fn test_add_merges_overlapping_ranges() {
        let mut r = ranges(&[0., 5., 10., 15., 20., 25.]);
        r.add(4., 11.);
        assert_eq!(r, ranges(&[0., 15., 20., 25.]));
        r.add(16., 17.);
        assert_eq!(r.len(), 3);
        assert_eq!(r.start(1), Some(16.));
        r.add(-2., 30.);
        assert_eq!(r, ranges(&[-2., 30.]));
    }

    #[test]
    fn test_add_before_and_after() {
        let mut r = ranges(&[10., 15.]);
        r.add(0., 5.);
        r.add(20., 25.);
        assert_eq!(r, ranges(&[0., 5., 10., 15., 20., 25.]));
        r.add(15., 20.);
        assert_eq!(r, ranges(&[0., 5., 10., 25.]));
    }

    #[test]
    fn test_find_range_with_fudge() {
        let r = ranges(&[0.05, 10., 20., 30.]);
        assert_eq!(r.find_range(0.).len(), 0);
        assert_eq!(r.find_range(0.02).start(0), Some(0.05));
        assert_eq!(r.find_range(10.01).end(0), Some(10.));
        assert!(r.find_range(15.).is_empty());
        assert_eq!(r.find_next_range(15.).start(0), Some(20.));
        assert!(r.find_next_range(25.).is_empty());
    }

    #[test]
    fn test_buffered_percent() {
        let r = ranges(&[0., 5., 8., 10.]);
        assert_eq!(r.buffered_percent(0., 10.), 70.);
        assert_eq!(r.buffered_percent(10., 20.), 0.);
        assert_eq!(r.buffered_percent(1., 4.), 100.);
        assert_eq!(r.buffered_percent(4., 4.), 0.);
    }

    #[test]
    fn test_find_sole_uncommon_end() {
        let before = ranges(&[0., 10.]);
        assert_eq!(find_sole_uncommon_end(&before, &ranges(&[0., 20.])), Some(20.));
        assert_eq!(find_sole_uncommon_end(&TimeRanges::new(), &ranges(&[0., 9.5])), Some(9.5));
        // shrinking or identical ranges bring no information
        assert_eq!(find_sole_uncommon_end(&before, &ranges(&[0., 8.])), None);
        assert_eq!(find_sole_uncommon_end(&before, &before), None);
        // two new ends are ambiguous
        assert_eq!(
            find_sole_uncommon_end(&before, &ranges(&[0., 12., 20., 30.])),
            None
        );
    }
}
