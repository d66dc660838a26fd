//! Offscreen per-eye render targets.
//!
//! A [`RenderTarget`] owns three backend handles: a color texture, a combined
//! depth+stencil buffer, and a framebuffer binding them. [`RenderTarget::destroy`]
//! consumes the target and releases all three together, so a destroyed target
//! cannot be used, destroyed again, or named by a live
//! [`SubmissionHandle`](crate::SubmissionHandle).
//!
//! [`StereoTargets`] holds exactly one target per eye and replaces both on
//! resize.

use crate::backend::{FramebufferId, FramebufferStatus, GraphicsBackend, PixelRegion, RenderbufferId, TextureId};
use crate::compositor::{ColorSpace, SubmissionHandle, TextureType};
use crate::error::{BackendError, CreateTargetError, FramebufferIncompleteError};
use crate::eye::{Eye, EyePair};
use crate::tracking::RenderTargetSize;

/// An offscreen color + depth/stencil destination for one eye.
///
/// # Ownership
///
/// The target is not `Clone`. It must be released with [`destroy`](Self::destroy)
/// on the backend that created it; dropping it without doing so leaks the GPU
/// handles and logs a warning.
#[derive(Debug)]
pub struct RenderTarget {
    framebuffer: FramebufferId,
    color: TextureId,
    depth_stencil: RenderbufferId,
    width: u32,
    height: u32,
    released: bool,
}

impl RenderTarget {
    /// Allocates and validates a `width × height` target.
    ///
    /// The framebuffer bound before the call is bound again on return, whether
    /// creation succeeds or not. On an incomplete framebuffer every handle
    /// allocated so far is deleted before the error is returned.
    ///
    /// # Arguments
    ///
    /// * `backend` - The backend to allocate on
    /// * `width` - Color and depth width in pixels
    /// * `height` - Color and depth height in pixels
    ///
    /// # Errors
    ///
    /// [`CreateTargetError::Incomplete`] with the driver-reported status, or
    /// [`CreateTargetError::Backend`] if an allocation failed.
    pub fn create<B>(backend: &mut B, width: u32, height: u32) -> Result<Self, CreateTargetError>
    where
        B: GraphicsBackend + ?Sized,
    {
        let color = backend.create_color_texture(width, height)?;
        let depth_stencil = match backend.create_depth_stencil(width, height) {
            Ok(depth) => depth,
            Err(err) => {
                backend.delete_texture(color);
                return Err(err.into());
            }
        };
        let framebuffer = match backend.create_framebuffer(color, depth_stencil) {
            Ok(fb) => fb,
            Err(err) => {
                backend.delete_renderbuffer(depth_stencil);
                backend.delete_texture(color);
                return Err(err.into());
            }
        };

        let status = backend.framebuffer_status(framebuffer);
        if status != FramebufferStatus::Complete {
            backend.delete_framebuffer(framebuffer);
            backend.delete_renderbuffer(depth_stencil);
            backend.delete_texture(color);
            log::error!("render target {width}x{height} incomplete: {status:?}");
            return Err(FramebufferIncompleteError { status, width, height }.into());
        }

        log::trace!("render target {framebuffer:?} created: {width}x{height}, color {color:?}");
        Ok(Self {
            framebuffer,
            color,
            depth_stencil,
            width,
            height,
            released: false,
        })
    }

    /// Releases the framebuffer, depth buffer and color texture.
    pub fn destroy<B>(mut self, backend: &mut B)
    where
        B: GraphicsBackend + ?Sized,
    {
        backend.delete_framebuffer(self.framebuffer);
        backend.delete_renderbuffer(self.depth_stencil);
        backend.delete_texture(self.color);
        self.released = true;
        log::trace!("render target {:?} destroyed", self.framebuffer);
    }

    /// Binds this target for the caller's subsequent draws.
    ///
    /// The previous binding is not restored; use [`with_bound_framebuffer`]
    /// for a scoped bind.
    pub fn bind_as_target<B>(&self, backend: &mut B) -> Result<(), BackendError>
    where
        B: GraphicsBackend + ?Sized,
    {
        backend.bind_framebuffer(self.framebuffer)
    }

    /// Reads `region` of the color attachment in the backend's native layout.
    ///
    /// The caller's binding is restored afterwards.
    pub fn read_pixels<B>(&self, backend: &mut B, region: PixelRegion) -> Result<Vec<u8>, BackendError>
    where
        B: GraphicsBackend + ?Sized,
    {
        with_bound_framebuffer(backend, self.framebuffer, |backend| backend.read_pixels(region))
    }

    /// A handle to this target's color texture, valid while the target lives.
    pub fn submission_handle(&self, texture_type: TextureType, color_space: ColorSpace) -> SubmissionHandle<'_> {
        SubmissionHandle::for_target(self, texture_type, color_space)
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn color_texture(&self) -> TextureId {
        self.color
    }

    pub fn size(&self) -> RenderTargetSize {
        RenderTargetSize::new(self.width, self.height)
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if !self.released {
            log::warn!(
                "render target {:?} dropped without destroy; its handles leak",
                self.framebuffer
            );
        }
    }
}

/// Binds `framebuffer`, runs `f`, then rebinds whatever was bound before.
///
/// The previous binding is restored even when `f` fails.
pub fn with_bound_framebuffer<B, T, F>(backend: &mut B, framebuffer: FramebufferId, f: F) -> Result<T, BackendError>
where
    B: GraphicsBackend + ?Sized,
    F: FnOnce(&mut B) -> Result<T, BackendError>,
{
    let previous = backend.bound_framebuffer();
    backend.bind_framebuffer(framebuffer)?;
    let result = f(backend);
    let restored = backend.bind_framebuffer(previous);
    let value = result?;
    restored?;
    Ok(value)
}

/// One [`RenderTarget`] per eye.
#[derive(Debug)]
pub struct StereoTargets {
    targets: EyePair<RenderTarget>,
}

impl StereoTargets {
    /// Creates both eyes' targets at `size`.
    ///
    /// If the right eye fails, the left target is destroyed before returning.
    pub fn create<B>(backend: &mut B, size: RenderTargetSize) -> Result<Self, CreateTargetError>
    where
        B: GraphicsBackend + ?Sized,
    {
        let left = RenderTarget::create(backend, size.width, size.height)?;
        let right = match RenderTarget::create(backend, size.width, size.height) {
            Ok(right) => right,
            Err(err) => {
                left.destroy(backend);
                return Err(err);
            }
        };
        log::info!("stereo render targets created: {size} per eye");
        Ok(Self {
            targets: EyePair::new(left, right),
        })
    }

    /// Destroys both targets and creates new ones at `size`.
    ///
    /// Textures are never resized in place. On failure no targets remain.
    pub fn resize<B>(self, backend: &mut B, size: RenderTargetSize) -> Result<Self, CreateTargetError>
    where
        B: GraphicsBackend + ?Sized,
    {
        let old = self.size();
        self.destroy(backend);
        log::info!("resizing stereo render targets: {old} -> {size}");
        Self::create(backend, size)
    }

    pub fn destroy<B>(self, backend: &mut B)
    where
        B: GraphicsBackend + ?Sized,
    {
        let EyePair { left, right } = self.targets;
        left.destroy(backend);
        right.destroy(backend);
    }

    pub fn get(&self, eye: Eye) -> &RenderTarget {
        self.targets.get(eye)
    }

    pub fn size(&self) -> RenderTargetSize {
        self.targets.left.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::ResourceCounts;

    #[test]
    fn create_then_destroy_restores_binding_and_handles() {
        let mut backend = SoftwareBackend::new(64, 64);
        let host = RenderTarget::create(&mut backend, 8, 8).unwrap();
        host.bind_as_target(&mut backend).unwrap();
        let baseline = backend.live_resources();

        let target = RenderTarget::create(&mut backend, 16, 16).unwrap();
        assert_eq!(backend.bound_framebuffer(), host.framebuffer());
        target.destroy(&mut backend);

        assert_eq!(backend.bound_framebuffer(), host.framebuffer());
        assert_eq!(backend.live_resources(), baseline);
        host.destroy(&mut backend);
    }

    #[test]
    fn incomplete_target_releases_everything() {
        let mut backend = SoftwareBackend::new(64, 64);
        backend.force_framebuffer_status(Some(FramebufferStatus::IncompleteMissingAttachment));

        let err = RenderTarget::create(&mut backend, 32, 32).unwrap_err();
        match err {
            CreateTargetError::Incomplete(e) => {
                assert_eq!(e.status, FramebufferStatus::IncompleteMissingAttachment);
                assert_eq!((e.width, e.height), (32, 32));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.live_resources(), ResourceCounts::default());
        assert_eq!(backend.bound_framebuffer(), FramebufferId::DEFAULT);
    }

    #[test]
    fn read_pixels_restores_caller_binding() {
        let mut backend = SoftwareBackend::new(4, 4);
        let target = RenderTarget::create(&mut backend, 2, 2).unwrap();
        target.bind_as_target(&mut backend).unwrap();
        backend.clear([1.0, 0.0, 0.0, 1.0]).unwrap();
        backend.bind_framebuffer(FramebufferId::DEFAULT).unwrap();

        let pixels = target.read_pixels(&mut backend, PixelRegion::full(2, 2)).unwrap();
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
        assert_eq!(backend.bound_framebuffer(), FramebufferId::DEFAULT);
        target.destroy(&mut backend);
    }

    #[test]
    fn scoped_bind_restores_on_error() {
        let mut backend = SoftwareBackend::new(4, 4);
        let target = RenderTarget::create(&mut backend, 2, 2).unwrap();
        let result = with_bound_framebuffer(&mut backend, target.framebuffer(), |backend| {
            backend.read_pixels(PixelRegion::full(3, 3))
        });
        assert!(matches!(result, Err(BackendError::RegionOutOfBounds { .. })));
        assert_eq!(backend.bound_framebuffer(), FramebufferId::DEFAULT);
        target.destroy(&mut backend);
    }

    #[test]
    fn eyes_get_distinct_targets_and_resize_leaks_nothing() {
        let mut backend = SoftwareBackend::new(64, 64);
        let targets = StereoTargets::create(&mut backend, RenderTargetSize::new(1080, 1200)).unwrap();
        assert_ne!(
            targets.get(Eye::Left).color_texture(),
            targets.get(Eye::Right).color_texture()
        );
        let old_left = targets.get(Eye::Left).color_texture();

        let targets = targets.resize(&mut backend, RenderTargetSize::new(1440, 1600)).unwrap();
        assert_eq!(targets.size(), RenderTargetSize::new(1440, 1600));
        assert!(!backend.texture_exists(old_left));
        assert_eq!(
            backend.live_resources(),
            ResourceCounts {
                textures: 2,
                renderbuffers: 2,
                framebuffers: 2,
            }
        );

        targets.destroy(&mut backend);
        assert_eq!(backend.live_resources(), ResourceCounts::default());
    }
}
