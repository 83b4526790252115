//! Event plumbing.
//!
//! Per the Design Notes (spec.md §9), the "event bus with priorities"
//! pattern is replaced by a sealed enum and a same-task dispatcher: no
//! runtime lookup by string name, subscribers are registered once and
//! invoked in order.

use std::sync::Arc;

use crate::model::{Representation, SegmentReference, SwitchReason, TrackKind};

/// Status of a completed fragment load, carried by [`CoreEvent::FragmentLoadingCompleted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStatus {
    Ok,
    Discarded,
}

/// Events published by the core to the outside world.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    VideoBitrateChanged {
        representation: Arc<Representation>,
        switch_reason: SwitchReason,
    },
    AudioBitrateChanged {
        representation: Arc<Representation>,
        switch_reason: SwitchReason,
    },
    FragmentLoadingStarted {
        segment: SegmentReference,
        is_replacement: bool,
    },
    FragmentLoadingCompleted {
        segment: SegmentReference,
        status: FragmentStatus,
        duration_ms: u64,
        from_cache: bool,
        transferred_bytes: u64,
        resource_bytes: u64,
        is_replacement: bool,
        reason: Option<String>,
    },
    /// Video track only, per spec.md §6.
    BufferLevelUpdated {
        buffer_level: f64,
    },
    BufferTargetChanged {
        new_buffer_target: f64,
    },
    ManifestParsed,
    RepresentationsChanged {
        video: Vec<Arc<Representation>>,
        audio: Vec<Arc<Representation>>,
    },
    PlaybackError {
        reason: String,
    },
}

/// Events consumed by the core from the outside world.
#[derive(Debug, Clone)]
pub enum ExternalEvent {
    SeekRequested {
        seek_to: f64,
    },
    QualityChangeRequested {
        representation: Arc<Representation>,
        switch_reason: SwitchReason,
        track: TrackKind,
    },
    ForceVideoBitrateChange {
        representation: Arc<Representation>,
    },
    EnableAbr,
    PlaybackStarted,
    PlaybackPaused,
    PlaybackEnded,
    Seeked,
    PlaybackProgress {
        position: f64,
    },
    DimensionsChanged {
        width: u32,
        height: u32,
        device_pixel_ratio: f64,
    },
}

/// Something that wants to observe [`CoreEvent`]s published by a
/// [`crate::CoreSession`].
///
/// Subscribers are registered once, at construction time, and invoked on
/// the same task that publishes the event, in registration order — the
/// whole point being that there is no implicit global bus to subscribe to
/// by name.
pub trait EventSubscriber {
    fn on_event(&mut self, event: &CoreEvent);
}

/// Dispatches [`CoreEvent`]s to a fixed, ordered list of subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: Vec<Box<dyn EventSubscriber + Send>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber + Send>) {
        self.subscribers.push(subscriber);
    }

    pub fn publish(&mut self, event: CoreEvent) {
        tracing::trace!(?event, "publishing core event");
        for subscriber in &mut self.subscribers {
            subscriber.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriber_count", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<String>);
    impl EventSubscriber for Recorder {
        fn on_event(&mut self, event: &CoreEvent) {
            self.0.push(format!("{event:?}"));
        }
    }

    #[test]
    fn dispatch_delivers_in_registration_order() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Box::new(Recorder(Vec::new())));
        dispatcher.publish(CoreEvent::ManifestParsed);
        dispatcher.publish(CoreEvent::BufferTargetChanged {
            new_buffer_target: 56.0,
        });
        // Two publishes, no panics, dispatcher stays usable.
        assert_eq!(dispatcher.subscribers.len(), 1);
    }
}
