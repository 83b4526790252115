use std::sync::Arc;

use crate::model::SegmentIndex;

/// A selectable rendition of the stream. Immutable once published
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct Representation {
    pub id: Arc<str>,
    /// Bits per second. Strictly positive.
    pub bitrate: u64,
    pub codec: Arc<str>,
    pub segment_index: SegmentIndex,
    /// `None` for audio representations.
    pub video: Option<VideoAttributes>,
}

#[derive(Debug, Clone, Copy)]
pub struct VideoAttributes {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
}

impl Representation {
    pub fn new(
        id: impl Into<Arc<str>>,
        bitrate: u64,
        codec: impl Into<Arc<str>>,
        segment_index: SegmentIndex,
        video: Option<VideoAttributes>,
    ) -> Self {
        debug_assert!(bitrate > 0, "representation bitrate must be positive");
        Self {
            id: id.into(),
            bitrate,
            codec: codec.into(),
            segment_index,
            video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SegmentReference;

    #[test]
    fn sorts_a_ladder_ascending_by_bitrate() {
        let mk = |bitrate: u64| {
            Arc::new(Representation::new(
                format!("r{bitrate}"),
                bitrate,
                "avc1",
                SegmentIndex::new(vec![SegmentReference::new(0, 0.0, 4.0)]),
                None,
            ))
        };
        let mut ladder = vec![mk(3000), mk(400), mk(6000), mk(1000)];
        ladder.sort_by_key(|r| r.bitrate);
        let bitrates: Vec<u64> = ladder.iter().map(|r| r.bitrate).collect();
        assert_eq!(bitrates, vec![400, 1000, 3000, 6000]);
    }
}
