//! CPU/GPU synchronization.
//!
//! This module provides:
//! - [`GpuFence`] wraps the backend fence with the wait policy (infinite or
//!   bounded; a bounded wait that expires is a GPU hang)
//! - [`FenceTimeline`] keeps the per-frame-in-flight fence values and the
//!   monotonic counter the next signal uses
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Frame i is submitted, then the queue signals value v = next_value
//! 2. values[i] = v, next_value = v + 1
//! 3. Before slot i is reused the CPU waits until completed >= values[i]
//! ```

use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{RhiError, RhiResult};
use crate::hal::{Api, Fence};

/// Fence values of every frame in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceTimeline {
    values: Vec<u64>,
    next_value: u64,
}

impl FenceTimeline {
    /// Value the first signal uses.
    pub const FIRST_VALUE: u64 = 1;

    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            values: vec![0; frames_in_flight],
            next_value: Self::FIRST_VALUE,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.values.len()
    }

    /// Value the GPU must reach before frame slot `frame` can be reused.
    #[inline]
    pub fn value(&self, frame: usize) -> u64 {
        self.values[frame]
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Value the next signal will use.
    #[inline]
    pub fn next_value(&self) -> u64 {
        self.next_value
    }

    /// Takes the next value for a signal issued on behalf of `frame`.
    pub fn advance(&mut self, frame: usize) -> u64 {
        let value = self.next_value;
        self.values[frame] = value;
        self.next_value += 1;
        value
    }

    /// Most recently issued value, zero if nothing was signaled yet.
    pub fn last_signaled(&self) -> u64 {
        self.next_value - 1
    }
}

/// A GPU fence with the configured wait policy.
pub struct GpuFence<A: Api> {
    raw: A::Fence,
    timeout: Option<Duration>,
}

impl<A: Api> GpuFence<A> {
    pub fn new(raw: A::Fence, timeout: Option<Duration>) -> Self {
        debug!("Created fence (timeout {:?})", timeout);
        Self { raw, timeout }
    }

    #[inline]
    pub fn raw(&self) -> &A::Fence {
        &self.raw
    }

    #[inline]
    pub fn completed_value(&self) -> u64 {
        self.raw.completed_value()
    }

    /// Returns whether the GPU already passed `value`.
    #[inline]
    pub fn is_complete(&self, value: u64) -> bool {
        self.raw.completed_value() >= value
    }

    /// Blocks until the GPU reaches `value`. Returns immediately if it has.
    ///
    /// # Errors
    ///
    /// [`RhiError::GpuTimeout`] if a bounded wait expires, or the backend's
    /// error if the wait itself fails.
    pub fn wait(&self, value: u64) -> RhiResult<()> {
        if self.is_complete(value) {
            return Ok(());
        }
        trace!("Waiting for fence value {}", value);
        if self.raw.wait(value, self.timeout)? {
            Ok(())
        } else {
            Err(RhiError::GpuTimeout {
                value,
                timeout_ms: self.timeout.map_or(u64::MAX, |t| t.as_millis() as u64),
            })
        }
    }
}

impl<A: Api> Drop for GpuFence<A> {
    fn drop(&mut self) {
        debug!("Destroyed fence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{Adapter, Device, Instance, Queue};
    use crate::null::{Null, NullInstance};
    use crate::types::{FeatureLevel, InstanceDesc};

    #[test]
    fn test_timeline_starts_at_one() {
        let timeline = FenceTimeline::new(2);
        assert_eq!(timeline.next_value(), 1);
        assert_eq!(timeline.values(), &[0, 0]);
        assert_eq!(timeline.last_signaled(), 0);
    }

    #[test]
    fn test_timeline_advance() {
        let mut timeline = FenceTimeline::new(3);
        assert_eq!(timeline.advance(0), 1);
        assert_eq!(timeline.advance(1), 2);
        assert_eq!(timeline.advance(0), 3);
        assert_eq!(timeline.values(), &[3, 2, 0]);
        assert_eq!(timeline.next_value(), 4);
    }

    #[test]
    fn test_bounded_wait_reports_hang() {
        let instance = NullInstance::init(&InstanceDesc::default()).unwrap();
        let device = instance.enumerate_adapters(None).unwrap()[1]
            .open(FeatureLevel::Level12_0, false)
            .unwrap();
        let queue = device.create_queue().unwrap();
        let fence = GpuFence::<Null>::new(
            device.create_fence(0).unwrap(),
            Some(Duration::from_millis(10)),
        );

        queue.signal(fence.raw(), 1).unwrap();
        fence.wait(1).unwrap();
        assert!(fence.is_complete(1));

        let err = fence.wait(2).unwrap_err();
        assert!(matches!(err, RhiError::GpuTimeout { value: 2, timeout_ms: 10 }));
    }
}
