//! The rendering backend seam.
//!
//! The pipeline only needs a handful of call shapes from the graphics API:
//! create/delete a color texture, a depth-stencil buffer and a framebuffer
//! binding them, query completeness, bind a target, clear, upload the
//! view-projection uniform, read pixels back and flush. [`GraphicsBackend`]
//! captures exactly those, with GL-style integer handles, plus a blocking
//! [`finish`](GraphicsBackend::finish) that fences rendering before submission.
//!
//! Two implementations ship with the crate:
//!
//! - [`SoftwareBackend`](software::SoftwareBackend): CPU-only, GL semantics,
//!   used by tests and anywhere a GPU is unavailable.
//! - [`WgpuBackend`](gpu::WgpuBackend): headless wgpu device for real rendering.

pub mod gpu;
pub mod software;

use glam::Mat4;

use crate::compositor::TextureType;
use crate::error::BackendError;
use crate::eye_transform::DepthRange;

/// Handle to a color texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Handle to a combined depth+stencil buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderbufferId(pub u32);

/// Handle to a framebuffer object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    /// The host's window framebuffer.
    pub const DEFAULT: Self = Self(0);
}

/// Completeness of a framebuffer, as the driver reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    IncompleteAttachment,
    IncompleteMissingAttachment,
    IncompleteDimensions,
    Unsupported,
}

/// Byte order of one pixel in backend readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    Rgba8,
    Bgra8,
}

/// Order in which readback rows are returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrder {
    /// First row is the bottom of the image (OpenGL).
    BottomUp,
    /// First row is the top of the image.
    TopDown,
}

/// A rectangle of pixels in the backend's native coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole of a `width × height` target.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub(crate) fn check_within(&self, target_width: u32, target_height: u32) -> Result<(), BackendError> {
        let fits_x = self.x.checked_add(self.width).is_some_and(|end| end <= target_width);
        let fits_y = self.y.checked_add(self.height).is_some_and(|end| end <= target_height);
        if fits_x && fits_y {
            Ok(())
        } else {
            Err(BackendError::RegionOutOfBounds {
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                target_width,
                target_height,
            })
        }
    }
}

/// Live handle counts, for leak checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub textures: usize,
    pub renderbuffers: usize,
    pub framebuffers: usize,
}

/// The graphics API operations the stereo pipeline drives.
pub trait GraphicsBackend {
    fn create_color_texture(&mut self, width: u32, height: u32) -> Result<TextureId, BackendError>;

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<RenderbufferId, BackendError>;

    /// Creates a framebuffer with `color` and `depth_stencil` attached.
    ///
    /// The current binding is left unchanged.
    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth_stencil: RenderbufferId,
    ) -> Result<FramebufferId, BackendError>;

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus;

    fn bound_framebuffer(&self) -> FramebufferId;

    /// Makes `framebuffer` the target of subsequent clears, draws and reads.
    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> Result<(), BackendError>;

    /// Clears the bound target's color to `rgba` and its depth/stencil to far/zero.
    fn clear(&mut self, rgba: [f32; 4]) -> Result<(), BackendError>;

    /// Uploads the view-projection matrix used by subsequent draws.
    fn set_view_projection(&mut self, matrix: &Mat4) -> Result<(), BackendError>;

    /// Reads color pixels of the bound target, in [`pixel_layout`](Self::pixel_layout)
    /// byte order and [`row_order`](Self::row_order).
    fn read_pixels(&mut self, region: PixelRegion) -> Result<Vec<u8>, BackendError>;

    fn pixel_layout(&self) -> PixelLayout;

    fn row_order(&self) -> RowOrder;

    fn depth_range(&self) -> DepthRange;

    /// What kind of texture handle the compositor receives.
    fn texture_type(&self) -> TextureType;

    /// Whether `texture` is a live, undeleted texture.
    fn texture_exists(&self, texture: TextureId) -> bool;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId);

    fn delete_texture(&mut self, texture: TextureId);

    /// Blocks until every command recorded so far has executed on the GPU.
    ///
    /// Called after both eyes are rendered and before either texture is
    /// handed to the compositor.
    fn finish(&mut self) -> Result<(), BackendError>;

    /// Pushes all recorded commands to the GPU.
    fn flush(&mut self) -> Result<(), BackendError>;

    fn live_resources(&self) -> ResourceCounts;
}

/// Lets a session borrow a backend the caller keeps.
impl<B: GraphicsBackend + ?Sized> GraphicsBackend for &mut B {
    fn create_color_texture(&mut self, width: u32, height: u32) -> Result<TextureId, BackendError> {
        (**self).create_color_texture(width, height)
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<RenderbufferId, BackendError> {
        (**self).create_depth_stencil(width, height)
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth_stencil: RenderbufferId,
    ) -> Result<FramebufferId, BackendError> {
        (**self).create_framebuffer(color, depth_stencil)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        (**self).framebuffer_status(framebuffer)
    }

    fn bound_framebuffer(&self) -> FramebufferId {
        (**self).bound_framebuffer()
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> Result<(), BackendError> {
        (**self).bind_framebuffer(framebuffer)
    }

    fn clear(&mut self, rgba: [f32; 4]) -> Result<(), BackendError> {
        (**self).clear(rgba)
    }

    fn set_view_projection(&mut self, matrix: &Mat4) -> Result<(), BackendError> {
        (**self).set_view_projection(matrix)
    }

    fn read_pixels(&mut self, region: PixelRegion) -> Result<Vec<u8>, BackendError> {
        (**self).read_pixels(region)
    }

    fn pixel_layout(&self) -> PixelLayout {
        (**self).pixel_layout()
    }

    fn row_order(&self) -> RowOrder {
        (**self).row_order()
    }

    fn depth_range(&self) -> DepthRange {
        (**self).depth_range()
    }

    fn texture_type(&self) -> TextureType {
        (**self).texture_type()
    }

    fn texture_exists(&self, texture: TextureId) -> bool {
        (**self).texture_exists(texture)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        (**self).delete_framebuffer(framebuffer)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        (**self).delete_renderbuffer(renderbuffer)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        (**self).delete_texture(texture)
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        (**self).finish()
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        (**self).flush()
    }

    fn live_resources(&self) -> ResourceCounts {
        (**self).live_resources()
    }
}
