//! `SegmentReference` and `SegmentIndex` (spec.md §3).

/// One addressable media segment within a representation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentReference {
    pub segment_number: u64,
    pub start_time: f64,
    pub end_time: f64,
}

impl SegmentReference {
    pub fn new(segment_number: u64, start_time: f64, end_time: f64) -> Self {
        debug_assert!(end_time >= start_time);
        Self {
            segment_number,
            start_time,
            end_time,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Pure URL-generation function, per the Design Notes (spec.md §9):
    /// callers must not close over segment/representation ids to build
    /// URLs, they call this instead.
    pub fn uri(&self, base: &str, representation_id: &str) -> String {
        format!("{base}/{representation_id}/{}", self.segment_number)
    }
}

/// Ordered sequence of [`SegmentReference`]s for one representation.
#[derive(Debug, Clone)]
pub struct SegmentIndex {
    segments: Vec<SegmentReference>,
}

impl SegmentIndex {
    pub fn new(segments: Vec<SegmentReference>) -> Self {
        debug_assert!(
            segments.windows(2).all(|w| w[0].start_time <= w[1].start_time),
            "segment index must be time-ordered"
        );
        Self { segments }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Binary search for the segment containing `time`.
    pub fn at(&self, time: f64) -> Option<SegmentReference> {
        self.segments
            .binary_search_by(|seg| {
                if time < seg.start_time {
                    std::cmp::Ordering::Greater
                } else if time >= seg.end_time {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()
            .map(|i| self.segments[i])
    }

    /// Direct lookup by segment number, falling back to a linear search if
    /// the index isn't densely numbered from zero.
    pub fn by_number(&self, number: u64) -> Option<SegmentReference> {
        if let Some(seg) = self.segments.get(number as usize) {
            if seg.segment_number == number {
                return Some(*seg);
            }
        }
        self.segments.iter().find(|s| s.segment_number == number).copied()
    }

    pub fn next(&self, reference: &SegmentReference) -> Option<SegmentReference> {
        self.by_number(reference.segment_number + 1)
    }

    pub fn first(&self) -> Option<SegmentReference> {
        self.segments.first().copied()
    }

    pub fn last(&self) -> Option<SegmentReference> {
        self.segments.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> SegmentIndex {
        SegmentIndex::new(vec![
            SegmentReference::new(0, 0.0, 4.0),
            SegmentReference::new(1, 4.0, 8.0),
            SegmentReference::new(2, 8.0, 12.0),
        ])
    }

    #[test]
    fn at_finds_the_containing_segment() {
        let idx = ladder();
        assert_eq!(idx.at(5.5).unwrap().segment_number, 1);
        assert_eq!(idx.at(0.0).unwrap().segment_number, 0);
        assert!(idx.at(12.0).is_none());
    }

    #[test]
    fn by_number_falls_back_to_search_when_not_dense() {
        let idx = SegmentIndex::new(vec![
            SegmentReference::new(10, 0.0, 4.0),
            SegmentReference::new(11, 4.0, 8.0),
        ]);
        assert_eq!(idx.by_number(11).unwrap().start_time, 4.0);
        assert!(idx.by_number(99).is_none());
    }

    #[test]
    fn next_returns_the_following_segment() {
        let idx = ladder();
        let first = idx.first().unwrap();
        let second = idx.next(&first).unwrap();
        assert_eq!(second.segment_number, 1);
        assert!(idx.next(&idx.last().unwrap()).is_none());
    }

    #[test]
    fn duration_is_end_minus_start() {
        let seg = SegmentReference::new(0, 4.0, 8.5);
        assert_eq!(seg.duration(), 4.5);
    }
}
