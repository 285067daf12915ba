//! GPU device context.
//!
//! This module provides [`DeviceContext`], which owns the device and
//! everything needed to feed it work:
//!
//! - Adapter selection by power preference, skipping software adapters
//! - The single direct command queue
//! - One fence and the per-frame fence values ([`FenceTimeline`])
//! - One command allocator per frame in flight
//! - One reusable command list, either recording or closed
//!
//! # Overview
//!
//! The command list is created closed. A frame resets the allocator of its
//! frame-in-flight slot once the GPU has retired the slot's previous work,
//! reopens the list on it, records, then executes and closes it:
//!
//! ```text
//! wait_for_gpu(i) -> reset_command_allocator(i) -> reset_command_list(i)
//!     -> record -> execute_and_close() -> signal()
//! ```
//!
//! # Example
//!
//! ```
//! use forge_rhi::device::{DeviceConfig, DeviceContext};
//! use forge_rhi::null::Null;
//!
//! # fn main() -> forge_rhi::RhiResult<()> {
//! let mut ctx = DeviceContext::<Null>::new(&DeviceConfig::default())?;
//!
//! ctx.wait_for_gpu(0)?;
//! ctx.reset_command_allocator(0)?;
//! ctx.reset_command_list(0)?;
//! // ... record into ctx.command_list()? ...
//! ctx.execute_and_close()?;
//! let value = ctx.signal()?;
//! assert_eq!(value, 1);
//!
//! ctx.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Recording and submission are single-threaded: the context is driven by
//! the frame loop through `&mut self`.

use std::time::Duration;

use forge_core::Settings;
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};
use crate::hal::{Adapter, Api, CommandAllocator, CommandList, Device, Instance, Queue};
use crate::sync::{FenceTimeline, GpuFence};
use crate::types::{
    AdapterInfo, FeatureLevel, InstanceDesc, MessageSeverity, PowerPreference, ResourceState,
    ShaderModel, TransitionBarrier,
};

/// Device creation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub frames_in_flight: usize,
    pub power_preference: PowerPreference,
    pub feature_level: FeatureLevel,
    pub min_shader_model: ShaderModel,
    /// Enable the debug layer. Error-severity messages then fail the
    /// submission that produced them.
    pub validation: bool,
    pub gpu_wait_timeout: Option<Duration>,
    /// Debug-layer message ids that are dropped.
    pub debug_message_deny_list: Vec<i32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            power_preference: PowerPreference::HighPerformance,
            feature_level: FeatureLevel::Level12_0,
            min_shader_model: ShaderModel::new(6, 0),
            validation: true,
            gpu_wait_timeout: None,
            debug_message_deny_list: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            frames_in_flight: settings.frames_in_flight as usize,
            power_preference: if settings.prefer_high_performance_adapter {
                PowerPreference::HighPerformance
            } else {
                PowerPreference::LowPower
            },
            feature_level: FeatureLevel::Level12_0,
            min_shader_model: ShaderModel::new(
                settings.min_shader_model[0],
                settings.min_shader_model[1],
            ),
            validation: settings.enable_gpu_validation,
            gpu_wait_timeout: settings.gpu_wait_timeout(),
            debug_message_deny_list: settings.debug_message_deny_list.clone(),
        }
    }
}

/// Recording state of the command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    Recording,
    Closed,
}

impl CommandListState {
    fn name(self) -> &'static str {
        match self {
            CommandListState::Recording => "recording",
            CommandListState::Closed => "closed",
        }
    }
}

/// Picks the adapter to create the device on.
///
/// Adapters are tried in `preference` order first, then in default
/// enumeration order. Software adapters are never picked; the first
/// hardware adapter that supports `level` wins.
///
/// # Errors
///
/// [`RhiError::NoSuitableAdapter`] if no hardware adapter supports `level`.
pub fn select_adapter<A: Api>(
    instance: &A::Instance,
    preference: PowerPreference,
    level: FeatureLevel,
) -> RhiResult<A::Adapter> {
    for order in [Some(preference), None] {
        for adapter in instance.enumerate_adapters(order)? {
            let info = adapter.info();
            if info.is_software {
                debug!("Skipping software adapter '{}'", info.name);
                continue;
            }
            if adapter.probe(level) {
                info!(
                    "Selected adapter '{}' ({} MiB dedicated, {:?} order)",
                    info.name,
                    info.dedicated_video_memory >> 20,
                    order
                );
                return Ok(adapter);
            }
            debug!(
                "Adapter '{}' does not support feature level {}",
                info.name, level
            );
        }
        warn!("No adapter found in {:?} order, retrying default order", order);
    }
    Err(RhiError::NoSuitableAdapter(level.to_string()))
}

/// Owns the GPU device, queue, fence, command allocators and command list.
///
/// # Resource Destruction
///
/// Dropping the context flushes the queue first, so every resource created
/// from the device may be released afterwards.
pub struct DeviceContext<A: Api> {
    command_list: A::CommandList,
    allocators: Vec<A::CommandAllocator>,
    fence: GpuFence<A>,
    queue: A::Queue,
    device: A::Device,
    instance: A::Instance,
    adapter_info: AdapterInfo,
    list_state: CommandListState,
    timeline: FenceTimeline,
    frame_index: usize,
    validation: bool,
    deny_list: Vec<i32>,
}

impl<A: Api> DeviceContext<A> {
    /// Creates the instance and the device.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter qualifies, device creation fails, or
    /// the device is below the minimum shader model.
    pub fn new(config: &DeviceConfig) -> RhiResult<Self> {
        let instance = A::Instance::init(&InstanceDesc {
            validation: config.validation,
        })?;
        Self::with_instance(instance, config)
    }

    /// Creates the device on an existing instance.
    pub fn with_instance(instance: A::Instance, config: &DeviceConfig) -> RhiResult<Self> {
        if config.frames_in_flight == 0 {
            return Err(RhiError::InvalidArgument(
                "frames_in_flight must be at least 1".into(),
            ));
        }

        let adapter =
            select_adapter::<A>(&instance, config.power_preference, config.feature_level)?;
        let adapter_info = adapter.info().clone();
        let device = adapter.open(config.feature_level, config.validation)?;

        let supported = device.shader_model();
        if supported < config.min_shader_model {
            return Err(RhiError::UnsupportedShaderModel {
                required: config.min_shader_model,
                supported,
            });
        }

        let queue = device.create_queue()?;
        let fence = GpuFence::new(device.create_fence(0)?, config.gpu_wait_timeout);
        let allocators = (0..config.frames_in_flight)
            .map(|_| device.create_command_allocator())
            .collect::<RhiResult<Vec<_>>>()?;

        // Lists are born recording; keep it closed between frames.
        let mut command_list = device.create_command_list(&allocators[0])?;
        command_list.close()?;

        info!(
            "{} device created on '{}' (shader model {}, {} frames in flight, validation {})",
            A::NAME,
            adapter_info.name,
            supported,
            config.frames_in_flight,
            config.validation
        );

        Ok(Self {
            command_list,
            allocators,
            fence,
            queue,
            device,
            instance,
            adapter_info,
            list_state: CommandListState::Closed,
            timeline: FenceTimeline::new(config.frames_in_flight),
            frame_index: 0,
            validation: config.validation,
            deny_list: config.debug_message_deny_list.clone(),
        })
    }

    #[inline]
    pub fn instance(&self) -> &A::Instance {
        &self.instance
    }

    #[inline]
    pub fn device(&self) -> &A::Device {
        &self.device
    }

    #[inline]
    pub fn queue(&self) -> &A::Queue {
        &self.queue
    }

    #[inline]
    pub fn fence(&self) -> &GpuFence<A> {
        &self.fence
    }

    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.adapter_info
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.allocators.len()
    }

    /// Frame-in-flight slot of the current or most recent recording.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    #[inline]
    pub fn list_state(&self) -> CommandListState {
        self.list_state
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.list_state == CommandListState::Recording
    }

    pub fn timeline(&self) -> &FenceTimeline {
        &self.timeline
    }

    #[inline]
    pub fn fence_value(&self, frame: usize) -> u64 {
        self.timeline.value(frame)
    }

    #[inline]
    pub fn next_fence_value(&self) -> u64 {
        self.timeline.next_value()
    }

    #[inline]
    pub fn completed_fence_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// The command list, only while it is recording.
    ///
    /// # Errors
    ///
    /// [`RhiError::CommandListState`] when the list is closed.
    pub fn command_list(&mut self) -> RhiResult<&mut A::CommandList> {
        self.require_state(CommandListState::Recording)?;
        Ok(&mut self.command_list)
    }

    /// Resets the command allocator of slot `frame`.
    ///
    /// # Errors
    ///
    /// [`RhiError::AllocatorInUse`] if the GPU has not yet retired the
    /// slot's last submission, or the backend's reset error.
    pub fn reset_command_allocator(&mut self, frame: usize) -> RhiResult<()> {
        self.check_frame(frame)?;
        let required = self.timeline.value(frame);
        let completed = self.fence.completed_value();
        if completed < required {
            return Err(RhiError::AllocatorInUse {
                frame,
                required,
                completed,
            });
        }
        self.allocators[frame].reset()
    }

    /// Reopens the command list on the allocator of slot `frame`.
    pub fn reset_command_list(&mut self, frame: usize) -> RhiResult<()> {
        self.check_frame(frame)?;
        self.require_state(CommandListState::Closed)?;
        self.command_list.reset(&self.allocators[frame])?;
        self.list_state = CommandListState::Recording;
        self.frame_index = frame;
        Ok(())
    }

    /// Closes the command list and submits it to the queue.
    ///
    /// Debug-layer messages produced by the submission are drained and
    /// logged; with validation enabled an error-severity message fails it.
    pub fn execute_and_close(&mut self) -> RhiResult<()> {
        self.require_state(CommandListState::Recording)?;
        self.command_list.close()?;
        self.list_state = CommandListState::Closed;
        self.queue.execute(&self.command_list)?;
        self.process_debug_messages()
    }

    /// Signals the next fence value on the queue for the current slot.
    ///
    /// Returns the signaled value.
    pub fn signal(&mut self) -> RhiResult<u64> {
        let value = self.timeline.next_value();
        self.queue.signal(self.fence.raw(), value)?;
        self.timeline.advance(self.frame_index);
        Ok(value)
    }

    /// Waits until the GPU has retired the last submission of slot `frame`.
    pub fn wait_for_gpu(&self, frame: usize) -> RhiResult<()> {
        self.check_frame(frame)?;
        self.fence.wait(self.timeline.value(frame))
    }

    /// Waits until the GPU reaches an arbitrary fence value.
    pub fn wait_for_fence_value(&self, value: u64) -> RhiResult<()> {
        self.fence.wait(value)
    }

    /// Signals and waits, leaving the GPU idle.
    pub fn flush(&mut self) -> RhiResult<()> {
        self.signal()?;
        self.wait_for_gpu(self.frame_index)?;
        debug!("Flushed GPU at fence value {}", self.timeline.last_signaled());
        Ok(())
    }

    /// Records one transition of all subresources of `resource`.
    pub fn barrier(
        &mut self,
        resource: &A::Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> RhiResult<()> {
        self.barriers(&[TransitionBarrier {
            resource,
            before,
            after,
        }])
    }

    /// Records several transitions in one call.
    pub fn barriers(&mut self, barriers: &[TransitionBarrier<'_, A::Resource>]) -> RhiResult<()> {
        self.command_list()?.transition_barriers(barriers);
        Ok(())
    }

    /// Logs queued debug-layer messages.
    ///
    /// # Errors
    ///
    /// [`RhiError::Validation`] for the first error-severity message when
    /// validation is enabled.
    pub fn process_debug_messages(&self) -> RhiResult<()> {
        let mut first_error = None;
        for message in self.device.drain_debug_messages() {
            if self.deny_list.contains(&message.id) {
                continue;
            }
            match message.severity {
                MessageSeverity::Info => {
                    debug!(target: "gpu::validation", id = message.id, "{}", message.description)
                }
                MessageSeverity::Warning => {
                    warn!(target: "gpu::validation", id = message.id, "{}", message.description)
                }
                MessageSeverity::Error | MessageSeverity::Corruption => {
                    error!(target: "gpu::validation", id = message.id, "{}", message.description);
                    if first_error.is_none() {
                        first_error = Some(message.description);
                    }
                }
            }
        }
        match first_error {
            Some(description) if self.validation => Err(RhiError::Validation(description)),
            _ => Ok(()),
        }
    }

    fn check_frame(&self, frame: usize) -> RhiResult<()> {
        if frame >= self.allocators.len() {
            return Err(RhiError::InvalidArgument(format!(
                "frame index {frame} out of range ({} frames in flight)",
                self.allocators.len()
            )));
        }
        Ok(())
    }

    fn require_state(&self, expected: CommandListState) -> RhiResult<()> {
        if self.list_state != expected {
            return Err(RhiError::CommandListState {
                expected: expected.name(),
                actual: self.list_state.name(),
            });
        }
        Ok(())
    }
}

impl<A: Api> Drop for DeviceContext<A> {
    fn drop(&mut self) {
        if self.list_state == CommandListState::Recording {
            if let Err(e) = self.command_list.close() {
                warn!("Failed to close command list during teardown: {}", e);
            }
            self.list_state = CommandListState::Closed;
        }
        if let Err(e) = self.flush() {
            error!("Failed to flush GPU during teardown: {}", e);
        }
        debug!("Destroyed {} device context", A::NAME);
    }
}
