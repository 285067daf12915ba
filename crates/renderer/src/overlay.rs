//! UI overlay hook.
//!
//! The renderer calls the overlay after the scene pass, with the back
//! buffer still bound as the render target.

use forge_rhi::hal::Api;
use forge_rhi::RhiResult;

/// Something that draws on top of the scene, such as a debug UI.
pub trait Overlay<A: Api> {
    fn render(&mut self, list: &mut A::CommandList) -> RhiResult<()>;
}

/// Draws nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlay;

impl<A: Api> Overlay<A> for NoOverlay {
    fn render(&mut self, _list: &mut A::CommandList) -> RhiResult<()> {
        Ok(())
    }
}
