//! Shared data model (spec.md §3).
//!
//! `Representation`s are published once and shared read-only; everything
//! else here is owned exclusively by one component (`SegmentPipeline` or
//! `BolaController`), per the ownership rule in spec.md §3.

mod buffered;
mod representation;
mod segment_index;

pub use buffered::{BufferedSegmentInfo, DownloadTask, QueuedSegment, ReplacementTask};
pub use representation::{Representation, VideoAttributes};
pub use segment_index::{SegmentIndex, SegmentReference};

/// Which media track a pipeline/scheduler operation concerns.
///
/// Added beyond spec.md's data model because the scheduler loop body
/// explicitly drives `loadNext()` "for video and audio" (spec.md §4.5),
/// so the two tracks need a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Why a quality switch happened.
///
/// `Start` and `ChosenByUser` are exempt from the switch cooldown
/// invariant (spec.md §8, testable property 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// First quality decision for a track.
    Start,
    /// Ordinary ABR-driven switch, subject to cooldown.
    Abr,
    /// User (or an external caller) explicitly requested this representation.
    ChosenByUser,
    /// Representations changed (manifest update) and the controller re-initialized.
    Initial,
}

impl SwitchReason {
    /// Whether the switch cooldown applies to a switch with this reason.
    pub fn is_cooldown_exempt(self) -> bool {
        matches!(self, SwitchReason::Start | SwitchReason::ChosenByUser)
    }
}
