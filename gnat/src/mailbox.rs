//! Single-slot frame mailbox.
//!
//! The receiver thread overwrites the slot on every processed frame; the
//! HTTP surface takes a snapshot whenever it wants one. Overwrite-on-full
//! bounds memory under a slow consumer, and dropping intermediate frames
//! is fine: every consumer here wants latest-frame semantics.

use parking_lot::Mutex;
use std::sync::Arc;

use gnat_frame::VideoFrame;
use gnat_types::VisionResult;

/// A frame plus the analysis snapshot computed from it.
#[derive(Clone)]
pub struct ProcessedFrame {
    pub frame: VideoFrame,
    pub vision: VisionResult,
}

fn _test_processed_frame_is_send() {
    // Compile-time test to ensure ProcessedFrame implements Send trait.
    fn implements<T: Send>() {}
    implements::<ProcessedFrame>();
}

#[derive(Clone, Default)]
pub struct FrameMailbox {
    slot: Arc<Mutex<Option<ProcessedFrame>>>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot contents; never blocks beyond the lock.
    pub fn store(&self, frame: ProcessedFrame) {
        *self.slot.lock() = Some(frame);
    }

    /// Clone out the latest frame, if any.
    pub fn latest(&self) -> Option<ProcessedFrame> {
        self.slot.lock().clone()
    }

    /// Frame index of the current occupant, for change detection.
    pub fn latest_index(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|p| p.frame.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gnat_types::SafeDirections;

    fn processed(index: u64) -> ProcessedFrame {
        ProcessedFrame {
            frame: VideoFrame::from_rgb8(index, index as f64, 2, 2, vec![0; 12]),
            vision: VisionResult {
                balance: None,
                flow_magnitude: 0.0,
                danger_level: 0,
                safe_directions: SafeDirections::default(),
            },
        }
    }

    #[test]
    fn starts_empty() {
        let mb = FrameMailbox::new();
        assert!(mb.latest().is_none());
    }

    #[test]
    fn overwrites_keep_only_latest() {
        let mb = FrameMailbox::new();
        mb.store(processed(1));
        mb.store(processed(2));
        mb.store(processed(3));
        assert_eq!(mb.latest_index(), Some(3));
    }

    #[test]
    fn latest_is_a_snapshot() {
        let mb = FrameMailbox::new();
        mb.store(processed(1));
        let snap = mb.latest().unwrap();
        mb.store(processed(2));
        assert_eq!(snap.frame.index(), 1);
    }
}
