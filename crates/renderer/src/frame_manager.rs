//! Frame phase tracking.
//!
//! This module provides [`FrameScheduler`], which enforces the order of the
//! per-frame operations:
//!
//! ```text
//! Idle -> begin -> Begun -> setup -> SetUp -> record -> Recorded
//!      -> submit -> Submitted -> end -> Idle
//! ```
//!
//! # Overview
//!
//! The renderer uses a "frames in flight" pattern: while the GPU renders
//! frame N, the CPU prepares frame N+1 in another slot. Each slot has its own
//! command allocator, ring-buffer slot and fence value; the scheduler only
//! tracks which slot is active and which phase the frame is in. Calling an
//! operation out of order is an error, not a silent reordering.
//!
//! Between frames (phase `Idle`) the command list is closed and
//! [`FrameScheduler::frame_index`] names the slot of the next frame.
//!
//! # Example
//!
//! ```
//! use forge_renderer::frame_manager::{FramePhase, FrameScheduler};
//!
//! let mut scheduler = FrameScheduler::new(2);
//! scheduler.begin(0).unwrap();
//! scheduler.setup().unwrap();
//! scheduler.record().unwrap();
//! scheduler.submit().unwrap();
//! scheduler.end(1).unwrap();
//!
//! assert_eq!(scheduler.phase(), FramePhase::Idle);
//! assert_eq!(scheduler.frame_index(), 1);
//! assert_eq!(scheduler.frame_count(), 1);
//! ```

use tracing::trace;

use forge_rhi::{RhiError, RhiResult};

/// Where the current frame is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePhase {
    /// No frame in progress.
    #[default]
    Idle,
    /// Slot acquired, command list open.
    Begun,
    /// Per-frame and per-view constants written.
    SetUp,
    /// Draws recorded, back buffer returned to `Present`.
    Recorded,
    /// Command list executed, fence signaled, presented.
    Submitted,
}

impl FramePhase {
    pub fn name(self) -> &'static str {
        match self {
            FramePhase::Idle => "idle",
            FramePhase::Begun => "begun",
            FramePhase::SetUp => "set up",
            FramePhase::Recorded => "recorded",
            FramePhase::Submitted => "submitted",
        }
    }
}

impl std::fmt::Display for FramePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame-in-flight index, frame counter and phase.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    frame_index: usize,
    frame_count: u64,
    phase: FramePhase,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight,
            frame_index: 0,
            frame_count: 0,
            phase: FramePhase::Idle,
        }
    }

    /// Starts a frame in slot `frame_index`.
    pub fn begin(&mut self, frame_index: usize) -> RhiResult<()> {
        if frame_index >= self.frames_in_flight {
            return Err(RhiError::InvalidArgument(format!(
                "frame index {frame_index} out of range ({} frames in flight)",
                self.frames_in_flight
            )));
        }
        self.advance("begin_frame", FramePhase::Idle, FramePhase::Begun)?;
        self.frame_index = frame_index;
        Ok(())
    }

    pub fn setup(&mut self) -> RhiResult<()> {
        self.advance("setup_frame", FramePhase::Begun, FramePhase::SetUp)
    }

    pub fn record(&mut self) -> RhiResult<()> {
        self.advance("record_frame", FramePhase::SetUp, FramePhase::Recorded)
    }

    pub fn submit(&mut self) -> RhiResult<()> {
        self.advance("submit_frame", FramePhase::Recorded, FramePhase::Submitted)
    }

    /// Finishes the frame; `next_frame_index` is the slot of the next one.
    pub fn end(&mut self, next_frame_index: usize) -> RhiResult<()> {
        self.advance("end_frame", FramePhase::Submitted, FramePhase::Idle)?;
        self.frame_count += 1;
        self.frame_index = next_frame_index;
        Ok(())
    }

    /// Fails unless no frame is in progress.
    pub fn require_idle(&self, operation: &'static str) -> RhiResult<()> {
        self.require(operation, FramePhase::Idle)
    }

    /// Fails unless the frame is in `expected`.
    pub fn require(&self, operation: &'static str, expected: FramePhase) -> RhiResult<()> {
        if self.phase != expected {
            return Err(RhiError::FrameOutOfOrder {
                operation,
                phase: self.phase.name(),
            });
        }
        Ok(())
    }

    fn advance(&mut self, operation: &'static str, from: FramePhase, to: FramePhase) -> RhiResult<()> {
        self.require(operation, from)?;
        trace!("Frame {} slot {}: {} -> {}", self.frame_count, self.frame_index, from, to);
        self.phase = to;
        Ok(())
    }

    /// Sets the slot of the next frame while idle, after the swap chain was
    /// recreated.
    pub fn set_frame_index(&mut self, frame_index: usize) {
        self.frame_index = frame_index;
    }

    /// Slot of the current frame, or of the next one while idle.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// Number of completed frames.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Whether the command list is open for this frame.
    pub fn is_recording(&self) -> bool {
        matches!(self.phase, FramePhase::Begun | FramePhase::SetUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut scheduler = FrameScheduler::new(2);
        for expected_next in [1, 0, 1] {
            let index = scheduler.frame_index();
            scheduler.begin(index).unwrap();
            assert!(scheduler.is_recording());
            scheduler.setup().unwrap();
            scheduler.record().unwrap();
            assert!(!scheduler.is_recording());
            scheduler.submit().unwrap();
            scheduler.end(expected_next).unwrap();
            assert_eq!(scheduler.frame_index(), expected_next);
        }
        assert_eq!(scheduler.frame_count(), 3);
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut scheduler = FrameScheduler::new(2);
        let err = scheduler.record().unwrap_err();
        assert!(matches!(
            err,
            RhiError::FrameOutOfOrder {
                operation: "record_frame",
                phase: "idle"
            }
        ));

        scheduler.begin(0).unwrap();
        assert!(scheduler.begin(0).is_err());
        assert!(scheduler.submit().is_err());
        assert!(scheduler.require_idle("resize").is_err());
        assert_eq!(scheduler.phase(), FramePhase::Begun);
    }

    #[test]
    fn test_begin_rejects_bad_slot() {
        let mut scheduler = FrameScheduler::new(2);
        assert!(matches!(scheduler.begin(2), Err(RhiError::InvalidArgument(_))));
        assert_eq!(scheduler.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_frame_out_of_order_message() {
        let mut scheduler = FrameScheduler::new(1);
        let err = scheduler.end(0).unwrap_err();
        assert_eq!(err.to_string(), "end_frame called while the frame is idle");
    }
}
