//! Root signature and pipeline state for the scene pass.
//!
//! Shaders are compiled offline; this module only consumes their bytecode.
//! The pipeline bakes in the depth compare function, so it is rebuilt when
//! the depth convention changes.

use std::path::Path;

use tracing::{debug, info};

use forge_rhi::hal::{Api, Device};
use forge_rhi::pipeline::{
    CullMode, DescriptorRangeType, GraphicsPipelineBuilder, RootParameter, RootSignatureDesc,
    ShaderVisibility,
};
use forge_rhi::types::Format;
use forge_rhi::vertex::Vertex;
use forge_rhi::{RhiError, RhiResult};

use crate::depth_convention::{DepthConvention, DepthMode};
use crate::sampler_table::SAMPLER_COUNT;

/// Compiled vertex shader file name.
pub const VERTEX_SHADER_FILE: &str = "scene_vs.cso";
/// Compiled pixel shader file name.
pub const PIXEL_SHADER_FILE: &str = "scene_ps.cso";

/// Root parameter indices.
pub mod root_slot {
    pub const PER_FRAME: u32 = 0;
    pub const PER_VIEW: u32 = 1;
    pub const OBJECT_VS: u32 = 2;
    pub const OBJECT_PS: u32 = 3;
    pub const TEXTURES: u32 = 4;
    pub const SAMPLERS: u32 = 5;
}

/// Vertex and pixel shader bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSet {
    pub vertex: Vec<u8>,
    pub pixel: Vec<u8>,
}

impl ShaderSet {
    /// Reads `scene_vs.cso` and `scene_ps.cso` from `dir`.
    ///
    /// # Errors
    ///
    /// [`RhiError::ShaderError`] if either file is missing or empty.
    pub fn load(dir: &Path) -> RhiResult<Self> {
        let read = |name: &str| -> RhiResult<Vec<u8>> {
            let path = dir.join(name);
            let bytes = std::fs::read(&path)
                .map_err(|e| RhiError::ShaderError(format!("{}: {}", path.display(), e)))?;
            if bytes.is_empty() {
                return Err(RhiError::ShaderError(format!(
                    "{} is empty",
                    path.display()
                )));
            }
            Ok(bytes)
        };
        let shaders = Self {
            vertex: read(VERTEX_SHADER_FILE)?,
            pixel: read(PIXEL_SHADER_FILE)?,
        };
        info!(
            "Loaded scene shaders from {} ({} + {} bytes)",
            dir.display(),
            shaders.vertex.len(),
            shaders.pixel.len()
        );
        Ok(shaders)
    }

    pub fn from_bytes(vertex: impl Into<Vec<u8>>, pixel: impl Into<Vec<u8>>) -> Self {
        Self {
            vertex: vertex.into(),
            pixel: pixel.into(),
        }
    }
}

/// Binding layout shared by every scene draw.
///
/// | Slot | Binding                          |
/// |------|----------------------------------|
/// | 0    | `b0` per-frame root CBV          |
/// | 1    | `b1` per-view root CBV           |
/// | 2    | `b2` per-object VS root CBV      |
/// | 3    | `b3` per-object PS root CBV      |
/// | 4    | `t0` SRV table                   |
/// | 5    | `s0..s32` sampler table          |
pub fn root_signature_desc() -> RootSignatureDesc {
    RootSignatureDesc {
        parameters: vec![
            RootParameter::ConstantBufferView {
                register: 0,
                visibility: ShaderVisibility::All,
            },
            RootParameter::ConstantBufferView {
                register: 1,
                visibility: ShaderVisibility::All,
            },
            RootParameter::ConstantBufferView {
                register: 2,
                visibility: ShaderVisibility::Vertex,
            },
            RootParameter::ConstantBufferView {
                register: 3,
                visibility: ShaderVisibility::Pixel,
            },
            RootParameter::DescriptorTable {
                range_type: DescriptorRangeType::ShaderResource,
                base_register: 0,
                count: 1,
                visibility: ShaderVisibility::Pixel,
            },
            RootParameter::DescriptorTable {
                range_type: DescriptorRangeType::Sampler,
                base_register: 0,
                count: SAMPLER_COUNT,
                visibility: ShaderVisibility::Pixel,
            },
        ],
    }
}

/// Root signature plus the opaque-geometry pipeline built against it.
pub struct ScenePipeline<A: Api> {
    root_signature: A::RootSignature,
    pipeline: A::PipelineState,
    render_target_format: Format,
    depth_format: Format,
    depth_mode: DepthMode,
}

impl<A: Api> ScenePipeline<A> {
    pub fn new(
        device: &A::Device,
        shaders: &ShaderSet,
        render_target_format: Format,
        depth_format: Format,
        convention: &DepthConvention,
    ) -> RhiResult<Self> {
        let root_signature = device.create_root_signature(&root_signature_desc())?;
        let pipeline = Self::build(
            device,
            &root_signature,
            shaders,
            render_target_format,
            depth_format,
            convention,
        )?;
        info!(
            "Scene pipeline created ({:?} / {:?}, {:?})",
            render_target_format,
            depth_format,
            convention.mode()
        );
        Ok(Self {
            root_signature,
            pipeline,
            render_target_format,
            depth_format,
            depth_mode: convention.mode(),
        })
    }

    fn build(
        device: &A::Device,
        root_signature: &A::RootSignature,
        shaders: &ShaderSet,
        render_target_format: Format,
        depth_format: Format,
        convention: &DepthConvention,
    ) -> RhiResult<A::PipelineState> {
        let layout = Vertex::input_layout();
        let depth = convention.depth_state();
        GraphicsPipelineBuilder::new()
            .vertex_shader(&shaders.vertex)
            .pixel_shader(&shaders.pixel)
            .input_layout(&layout)
            .render_target_format(render_target_format)
            .depth_format(depth_format)
            .depth_compare(depth.compare)
            .depth_write(depth.write_enable)
            .cull_mode(CullMode::Back)
            .build::<A>(device, root_signature)
    }

    /// Rebuilds the pipeline for the convention's compare function. The root
    /// signature is kept.
    pub fn rebuild(
        &mut self,
        device: &A::Device,
        shaders: &ShaderSet,
        convention: &DepthConvention,
    ) -> RhiResult<()> {
        self.pipeline = Self::build(
            device,
            &self.root_signature,
            shaders,
            self.render_target_format,
            self.depth_format,
            convention,
        )?;
        self.depth_mode = convention.mode();
        debug!("Scene pipeline rebuilt for {:?}", self.depth_mode);
        Ok(())
    }

    #[inline]
    pub fn root_signature(&self) -> &A::RootSignature {
        &self.root_signature
    }

    #[inline]
    pub fn pipeline(&self) -> &A::PipelineState {
        &self.pipeline
    }

    /// Convention the pipeline was last built for.
    #[inline]
    pub fn depth_mode(&self) -> DepthMode {
        self.depth_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_rhi::device::{DeviceConfig, DeviceContext};
    use forge_rhi::null::Null;
    use forge_rhi::types::ComparisonFunc;

    fn shaders() -> ShaderSet {
        ShaderSet::from_bytes(vec![0x44, 0x58, 0x42, 0x43], vec![0x44, 0x58, 0x42, 0x43])
    }

    #[test]
    fn test_root_signature_layout() {
        let desc = root_signature_desc();
        assert_eq!(desc.parameters.len(), 6);
        assert_eq!(
            desc.parameters[root_slot::SAMPLERS as usize],
            RootParameter::DescriptorTable {
                range_type: DescriptorRangeType::Sampler,
                base_register: 0,
                count: 33,
                visibility: ShaderVisibility::Pixel,
            }
        );
    }

    #[test]
    fn test_rebuild_follows_convention() {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        let mut convention = DepthConvention::new(DepthMode::ReversedZ);
        let mut pipeline = ScenePipeline::<Null>::new(
            ctx.device(),
            &shaders(),
            Format::Bgra8Unorm,
            Format::D32Float,
            &convention,
        )
        .unwrap();
        assert_eq!(pipeline.pipeline().depth_compare, ComparisonFunc::GreaterEqual);
        let root_id = pipeline.root_signature().id;

        convention.set_mode(DepthMode::Standard);
        pipeline.rebuild(ctx.device(), &shaders(), &convention).unwrap();
        assert_eq!(pipeline.pipeline().depth_compare, ComparisonFunc::LessEqual);
        assert_eq!(pipeline.depth_mode(), DepthMode::Standard);
        assert_eq!(pipeline.root_signature().id, root_id);
    }

    #[test]
    fn test_empty_bytecode_is_rejected() {
        let ctx = DeviceContext::<Null>::new(&DeviceConfig::default()).unwrap();
        let convention = DepthConvention::new(DepthMode::ReversedZ);
        let result = ScenePipeline::<Null>::new(
            ctx.device(),
            &ShaderSet::from_bytes(Vec::new(), Vec::new()),
            Format::Bgra8Unorm,
            Format::D32Float,
            &convention,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_directory() {
        let err = ShaderSet::load(Path::new("/nonexistent/forge-shaders")).unwrap_err();
        assert!(matches!(err, RhiError::ShaderError(_)));
    }
}
