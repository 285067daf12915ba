//! Depth-buffer convention.
//!
//! The renderer supports two depth conventions:
//!
//! | Mode        | Near → | Far → | Clear | Compare        | Viewport min/max |
//! |-------------|--------|-------|-------|----------------|------------------|
//! | `Standard`  | 0      | 1     | 1.0   | `LessEqual`    | 0 / 1            |
//! | `ReversedZ` | 1      | 0     | 0.0   | `GreaterEqual` | 1 / 0            |
//!
//! Everything that depends on the convention (the depth buffer's optimized
//! clear value, the pipeline's compare function, the projection matrix and
//! the viewport depth range) asks [`DepthConvention`] rather than hard-coding
//! a mode.
//!
//! # Change notification
//!
//! Subscribers register a callback with [`DepthConvention::subscribe`] and get
//! a [`Subscription`] token back. The callback runs once for every actual
//! change of mode; dropping the token unregisters it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use forge_core::config::DepthMode;
//! use forge_renderer::depth_convention::DepthConvention;
//!
//! let mut convention = DepthConvention::new(DepthMode::ReversedZ);
//! let changes = Arc::new(AtomicUsize::new(0));
//! let counter = changes.clone();
//! let _subscription = convention.subscribe(move |_mode| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert!(convention.set_mode(DepthMode::Standard));
//! assert!(!convention.set_mode(DepthMode::Standard));
//! assert_eq!(changes.load(Ordering::SeqCst), 1);
//! assert_eq!(convention.clear_depth(), 1.0);
//! ```

use std::sync::{Arc, Weak};

use glam::Mat4;
use parking_lot::Mutex;
use tracing::{debug, info};

use forge_rhi::pipeline::DepthState;
use forge_rhi::types::{ClearValue, ComparisonFunc};

pub use forge_core::config::DepthMode;

type Callback = Box<dyn FnMut(DepthMode) + Send>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

/// Token returned by [`DepthConvention::subscribe`]. Unsubscribes on drop.
#[must_use = "dropping the subscription unregisters the callback"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Returns whether the convention this token belongs to still exists.
    pub fn is_active(&self) -> bool {
        self.subscribers.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// The active depth convention and its subscribers.
pub struct DepthConvention {
    mode: DepthMode,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl DepthConvention {
    pub fn new(mode: DepthMode) -> Self {
        debug!("Depth convention initialized to {:?}", mode);
        Self {
            mode,
            subscribers: Arc::default(),
        }
    }

    #[inline]
    pub fn mode(&self) -> DepthMode {
        self.mode
    }

    #[inline]
    pub fn is_reversed(&self) -> bool {
        self.mode == DepthMode::ReversedZ
    }

    /// Switches the convention.
    ///
    /// Subscribers are notified, in subscription order, only when the mode
    /// actually changes. Returns whether it did. Callbacks run while the
    /// subscriber list is locked and must not subscribe or unsubscribe.
    pub fn set_mode(&mut self, mode: DepthMode) -> bool {
        if mode == self.mode {
            return false;
        }
        info!("Depth convention changed: {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        let mut subscribers = self.subscribers.lock();
        for (_, callback) in subscribers.callbacks.iter_mut() {
            callback(mode);
        }
        true
    }

    /// Registers `callback` for mode changes.
    pub fn subscribe(&self, callback: impl FnMut(DepthMode) + Send + 'static) -> Subscription {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.push((id, Box::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().callbacks.len()
    }

    /// Depth the buffer is cleared to: the far plane.
    pub fn clear_depth(&self) -> f32 {
        match self.mode {
            DepthMode::Standard => 1.0,
            DepthMode::ReversedZ => 0.0,
        }
    }

    /// Optimized clear value for a depth buffer.
    pub fn clear_value(&self) -> ClearValue {
        ClearValue::DepthStencil {
            depth: self.clear_depth(),
            stencil: 0,
        }
    }

    /// Depth test that passes for fragments nearer than or as near as the
    /// stored depth.
    pub fn comparison(&self) -> ComparisonFunc {
        match self.mode {
            DepthMode::Standard => ComparisonFunc::LessEqual,
            DepthMode::ReversedZ => ComparisonFunc::GreaterEqual,
        }
    }

    /// Depth-stencil state for opaque geometry.
    pub fn depth_state(&self) -> DepthState {
        DepthState {
            test_enable: true,
            write_enable: true,
            compare: self.comparison(),
        }
    }

    /// Viewport `(min_depth, max_depth)`.
    pub fn depth_range(&self) -> (f32, f32) {
        match self.mode {
            DepthMode::Standard => (0.0, 1.0),
            DepthMode::ReversedZ => (1.0, 0.0),
        }
    }

    /// Left-handed perspective projection into D3D clip space.
    ///
    /// `Standard` maps `near` to depth 0 and `far` to 1; `ReversedZ` maps
    /// `near` to 1 and `far` to 0.
    pub fn perspective(&self, fov_y_radians: f32, aspect_ratio: f32, near: f32, far: f32) -> Mat4 {
        match self.mode {
            DepthMode::Standard => Mat4::perspective_lh(fov_y_radians, aspect_ratio, near, far),
            DepthMode::ReversedZ => Mat4::perspective_lh(fov_y_radians, aspect_ratio, far, near),
        }
    }
}

impl std::fmt::Debug for DepthConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthConvention")
            .field("mode", &self.mode)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ndc_depth(projection: Mat4, z: f32) -> f32 {
        let clip = projection * Vec4::new(0.0, 0.0, z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_reversed_z_values() {
        let convention = DepthConvention::new(DepthMode::ReversedZ);
        assert_eq!(convention.clear_depth(), 0.0);
        assert_eq!(convention.comparison(), ComparisonFunc::GreaterEqual);
        assert_eq!(convention.depth_range(), (1.0, 0.0));
        assert!(convention.is_reversed());
    }

    #[test]
    fn test_standard_values() {
        let convention = DepthConvention::new(DepthMode::Standard);
        assert_eq!(convention.clear_depth(), 1.0);
        assert_eq!(convention.comparison(), ComparisonFunc::LessEqual);
        assert_eq!(convention.depth_range(), (0.0, 1.0));
        assert_eq!(
            convention.clear_value(),
            ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0
            }
        );
    }

    #[test]
    fn test_projection_maps_planes() {
        let aspect = 16.0 / 9.0;
        let fov = 60.0_f32.to_radians();

        let standard = DepthConvention::new(DepthMode::Standard).perspective(fov, aspect, 0.1, 100.0);
        assert!(ndc_depth(standard, 0.1).abs() < 1e-5);
        assert!((ndc_depth(standard, 100.0) - 1.0).abs() < 1e-5);

        let reversed = DepthConvention::new(DepthMode::ReversedZ).perspective(fov, aspect, 0.1, 100.0);
        assert!((ndc_depth(reversed, 0.1) - 1.0).abs() < 1e-5);
        assert!(ndc_depth(reversed, 100.0).abs() < 1e-5);
    }

    #[test]
    fn test_notifies_only_on_change() {
        let mut convention = DepthConvention::new(DepthMode::ReversedZ);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = convention.subscribe(move |mode| sink.lock().push(mode));

        assert!(!convention.set_mode(DepthMode::ReversedZ));
        assert!(convention.set_mode(DepthMode::Standard));
        assert!(convention.set_mode(DepthMode::ReversedZ));
        assert_eq!(*seen.lock(), vec![DepthMode::Standard, DepthMode::ReversedZ]);
    }

    #[test]
    fn test_dropped_subscription_is_not_called() {
        let mut convention = DepthConvention::new(DepthMode::ReversedZ);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = convention.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(convention.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(convention.subscriber_count(), 0);
        convention.set_mode(DepthMode::Standard);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outliving_convention() {
        let convention = DepthConvention::new(DepthMode::Standard);
        let subscription = convention.subscribe(|_| {});
        assert!(subscription.is_active());
        drop(convention);
        assert!(!subscription.is_active());
    }
}
