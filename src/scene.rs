//! The host's scene renderer, called once per eye per frame.

use glam::Mat4;

use crate::backend::GraphicsBackend;
use crate::error::BackendError;
use crate::eye::{Eye, EyePair};
use crate::eye_transform::EyeViewProjection;
use crate::tracking::RenderTargetSize;

/// What a scene renderer gets for one eye.
///
/// The eye's render target is already bound and its view-projection already
/// uploaded when the renderer is called.
pub struct EyeRenderContext<'a> {
    pub eye: Eye,
    pub frame_index: u64,
    /// This frame's matrix for this eye. Borrowed, never kept.
    pub view_projection: &'a EyeViewProjection,
    pub target_size: RenderTargetSize,
    /// Seconds since the session started.
    pub time: f32,
}

impl EyeRenderContext<'_> {
    pub fn matrix(&self) -> &Mat4 {
        self.view_projection.matrix()
    }
}

/// Draws the scene into the bound render target.
///
/// Any `FnMut(&mut B, &EyeRenderContext) -> Result<(), BackendError>` closure
/// is a scene renderer.
///
/// # Example
///
/// ```
/// use hmd_present::{BackendError, EyeRenderContext, GraphicsBackend, SceneRenderer, SoftwareBackend};
///
/// fn assert_renderer<R: SceneRenderer<SoftwareBackend>>(_: R) {}
///
/// assert_renderer(|backend: &mut SoftwareBackend, ctx: &EyeRenderContext<'_>| {
///     backend.clear([ctx.time.sin().abs(), 0.0, 0.0, 1.0])
/// });
/// ```
pub trait SceneRenderer<B: GraphicsBackend + ?Sized> {
    fn render_eye(&mut self, backend: &mut B, ctx: &EyeRenderContext<'_>) -> Result<(), BackendError>;
}

impl<B, F> SceneRenderer<B> for F
where
    B: GraphicsBackend + ?Sized,
    F: FnMut(&mut B, &EyeRenderContext<'_>) -> Result<(), BackendError>,
{
    fn render_eye(&mut self, backend: &mut B, ctx: &EyeRenderContext<'_>) -> Result<(), BackendError> {
        self(backend, ctx)
    }
}

/// Clears each eye to its own color.
///
/// Useful as a smoke test: a snapshot of either eye shows at a glance whether
/// the eyes were swapped.
#[derive(Clone, Debug)]
pub struct ClearScene {
    pub colors: EyePair<[f32; 4]>,
    /// Modulates brightness over time so a frozen frame is visible.
    pub pulse: bool,
}

impl Default for ClearScene {
    fn default() -> Self {
        Self {
            colors: EyePair::new([0.1, 0.2, 0.6, 1.0], [0.6, 0.2, 0.1, 1.0]),
            pulse: false,
        }
    }
}

impl ClearScene {
    pub fn pulsing() -> Self {
        Self {
            pulse: true,
            ..Self::default()
        }
    }

    fn color_at(&self, eye: Eye, time: f32) -> [f32; 4] {
        let [r, g, b, a] = *self.colors.get(eye);
        if !self.pulse {
            return [r, g, b, a];
        }
        let k = 0.75 + 0.25 * (time * std::f32::consts::TAU).sin();
        [r * k, g * k, b * k, a]
    }
}

impl<B: GraphicsBackend + ?Sized> SceneRenderer<B> for ClearScene {
    fn render_eye(&mut self, backend: &mut B, ctx: &EyeRenderContext<'_>) -> Result<(), BackendError> {
        backend.clear(self.color_at(ctx.eye, ctx.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_colors_ignore_time() {
        let scene = ClearScene::default();
        assert_eq!(scene.color_at(Eye::Left, 0.3), scene.colors.left);
        assert_eq!(scene.color_at(Eye::Right, 7.0), scene.colors.right);
    }

    #[test]
    fn pulse_stays_in_range_and_keeps_alpha() {
        let scene = ClearScene::pulsing();
        for step in 0..20 {
            let [r, _, _, a] = scene.color_at(Eye::Right, step as f32 * 0.05);
            assert!(r >= 0.6 * 0.5 - 1e-6 && r <= 0.6 + 1e-6);
            assert_eq!(a, 1.0);
        }
    }
}
