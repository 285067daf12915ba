//! Root signature and graphics pipeline descriptions.
//!
//! # Overview
//!
//! - [`RootSignatureDesc`] lists root parameters (root CBVs and descriptor tables)
//! - [`GraphicsPipelineDesc`] is the full graphics pipeline state
//! - [`GraphicsPipelineBuilder`] fills in defaults and validates before the
//!   backend is called
//!
//! # Example
//!
//! ```no_run
//! use forge_rhi::hal::{Api, Device};
//! use forge_rhi::pipeline::{GraphicsPipelineBuilder, RootParameter, RootSignatureDesc, ShaderVisibility};
//! use forge_rhi::types::{ComparisonFunc, Format};
//! use forge_rhi::vertex::Vertex;
//!
//! # fn example<A: Api>(device: &A::Device, vs: &[u8], ps: &[u8]) -> forge_rhi::RhiResult<()> {
//! let root_signature = device.create_root_signature(&RootSignatureDesc {
//!     parameters: vec![RootParameter::ConstantBufferView {
//!         register: 0,
//!         visibility: ShaderVisibility::All,
//!     }],
//! })?;
//!
//! let layout = Vertex::input_layout();
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .vertex_shader(vs)
//!     .pixel_shader(ps)
//!     .input_layout(&layout)
//!     .render_target_format(Format::Bgra8Unorm)
//!     .depth_format(Format::D32Float)
//!     .depth_compare(ComparisonFunc::GreaterEqual)
//!     .build::<A>(device, &root_signature)?;
//! # let _ = pipeline;
//! # Ok(())
//! # }
//! ```

use tracing::debug;

use crate::error::{RhiError, RhiResult};
use crate::hal::{Api, Device};
use crate::types::{ComparisonFunc, Format};
use crate::vertex::InputElement;

/// Which shader stages can see a root parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorRangeType {
    ShaderResource,
    ConstantBuffer,
    UnorderedAccess,
    Sampler,
}

/// One root signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootParameter {
    /// A root descriptor bound with a GPU virtual address (`bN`).
    ConstantBufferView {
        register: u32,
        visibility: ShaderVisibility,
    },
    /// A single-range descriptor table.
    DescriptorTable {
        range_type: DescriptorRangeType,
        base_register: u32,
        count: u32,
        visibility: ShaderVisibility,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
}

/// Primitive class the pipeline rasterizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopologyType {
    Point,
    Line,
    #[default]
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Triangle winding treated as front-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare: ComparisonFunc,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            test_enable: true,
            write_enable: true,
            compare: ComparisonFunc::LessEqual,
        }
    }
}

/// Complete graphics pipeline state, generic over the backend's root signature.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc<'a, R> {
    pub root_signature: &'a R,
    pub vertex_shader: &'a [u8],
    pub pixel_shader: &'a [u8],
    pub input_layout: &'a [InputElement],
    pub topology_type: TopologyType,
    pub render_target_format: Format,
    pub depth_format: Format,
    pub depth: DepthState,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub alpha_blend: bool,
}

/// Builder for graphics pipelines.
#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a [u8]>,
    pixel_shader: Option<&'a [u8]>,
    input_layout: &'a [InputElement],
    topology_type: TopologyType,
    render_target_format: Format,
    depth_format: Format,
    depth: DepthState,
    cull_mode: CullMode,
    front_face: FrontFace,
    alpha_blend: bool,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_shader(mut self, bytecode: &'a [u8]) -> Self {
        self.vertex_shader = Some(bytecode);
        self
    }

    pub fn pixel_shader(mut self, bytecode: &'a [u8]) -> Self {
        self.pixel_shader = Some(bytecode);
        self
    }

    pub fn input_layout(mut self, layout: &'a [InputElement]) -> Self {
        self.input_layout = layout;
        self
    }

    pub fn topology_type(mut self, topology_type: TopologyType) -> Self {
        self.topology_type = topology_type;
        self
    }

    pub fn render_target_format(mut self, format: Format) -> Self {
        self.render_target_format = format;
        self
    }

    /// Sets the depth format. `Format::Unknown` disables depth testing.
    pub fn depth_format(mut self, format: Format) -> Self {
        self.depth_format = format;
        self
    }

    pub fn depth_compare(mut self, compare: ComparisonFunc) -> Self {
        self.depth.compare = compare;
        self
    }

    pub fn depth_write(mut self, enable: bool) -> Self {
        self.depth.write_enable = enable;
        self
    }

    pub fn cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn alpha_blend(mut self, enable: bool) -> Self {
        self.alpha_blend = enable;
        self
    }

    /// Validates the state and builds the description.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if a shader stage is missing or
    /// empty, or no render-target format was set.
    pub fn describe<R>(&self, root_signature: &'a R) -> RhiResult<GraphicsPipelineDesc<'a, R>> {
        let vertex_shader = self
            .vertex_shader
            .filter(|code| !code.is_empty())
            .ok_or_else(|| RhiError::PipelineError("vertex shader is required".into()))?;
        let pixel_shader = self
            .pixel_shader
            .filter(|code| !code.is_empty())
            .ok_or_else(|| RhiError::PipelineError("pixel shader is required".into()))?;
        if self.render_target_format == Format::Unknown {
            return Err(RhiError::PipelineError(
                "render target format is required".into(),
            ));
        }
        if self.depth_format != Format::Unknown && !self.depth_format.is_depth() {
            return Err(RhiError::PipelineError(format!(
                "{:?} is not a depth format",
                self.depth_format
            )));
        }

        let mut depth = self.depth;
        if self.depth_format == Format::Unknown {
            depth.test_enable = false;
            depth.write_enable = false;
        }

        Ok(GraphicsPipelineDesc {
            root_signature,
            vertex_shader,
            pixel_shader,
            input_layout: self.input_layout,
            topology_type: self.topology_type,
            render_target_format: self.render_target_format,
            depth_format: self.depth_format,
            depth,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            alpha_blend: self.alpha_blend,
        })
    }

    /// Builds the pipeline on `device`.
    pub fn build<A: Api>(
        &self,
        device: &A::Device,
        root_signature: &'a A::RootSignature,
    ) -> RhiResult<A::PipelineState> {
        let desc = self.describe(root_signature)?;
        let pipeline = device.create_graphics_pipeline(&desc)?;
        debug!(
            "Created graphics pipeline (depth {:?}, compare {:?})",
            desc.depth_format, desc.depth.compare
        );
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::Vertex;

    const CODE: &[u8] = &[0x44, 0x58, 0x42, 0x43];

    #[test]
    fn test_describe_requires_shaders() {
        let builder = GraphicsPipelineBuilder::new().render_target_format(Format::Bgra8Unorm);
        let err = builder.describe(&()).unwrap_err();
        assert!(matches!(err, RhiError::PipelineError(_)));

        let builder = builder.vertex_shader(CODE).pixel_shader(&[]);
        assert!(builder.describe(&()).is_err());
    }

    #[test]
    fn test_describe_disables_depth_without_format() {
        let layout = Vertex::input_layout();
        let desc = GraphicsPipelineBuilder::new()
            .vertex_shader(CODE)
            .pixel_shader(CODE)
            .input_layout(&layout)
            .render_target_format(Format::Bgra8Unorm)
            .describe(&())
            .unwrap();
        assert!(!desc.depth.test_enable);
        assert!(!desc.depth.write_enable);
        assert_eq!(desc.input_layout.len(), 4);
    }

    #[test]
    fn test_describe_rejects_color_depth_format() {
        let err = GraphicsPipelineBuilder::new()
            .vertex_shader(CODE)
            .pixel_shader(CODE)
            .render_target_format(Format::Bgra8Unorm)
            .depth_format(Format::Rgba8Unorm)
            .describe(&())
            .unwrap_err();
        assert!(matches!(err, RhiError::PipelineError(_)));
    }

    #[test]
    fn test_describe_keeps_compare() {
        let desc = GraphicsPipelineBuilder::new()
            .vertex_shader(CODE)
            .pixel_shader(CODE)
            .render_target_format(Format::Bgra8Unorm)
            .depth_format(Format::D32Float)
            .depth_compare(ComparisonFunc::GreaterEqual)
            .describe(&())
            .unwrap();
        assert!(desc.depth.test_enable);
        assert_eq!(desc.depth.compare, ComparisonFunc::GreaterEqual);
    }
}
