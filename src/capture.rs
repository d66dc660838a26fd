//! Diagnostic readback of eye images.
//!
//! Readback stalls the render thread until the GPU catches up, so the
//! presenter only captures when a snapshot was scheduled through
//! [`SessionConfig::capture_every`](crate::SessionConfig::capture_every) or requested with
//! [`FramePresenter::capture_next_frame`](crate::FramePresenter::capture_next_frame).

use std::path::Path;

use image::RgbaImage;

use crate::backend::{GraphicsBackend, PixelLayout, PixelRegion, RowOrder};
use crate::error::BackendError;
use crate::eye::Eye;
use crate::framebuffer::RenderTarget;

/// Reads render targets back into portable RGBA images.
pub struct FrameCapture;

impl FrameCapture {
    /// Copies `region` of `target`'s color attachment into a top-down RGBA image.
    ///
    /// The target's contents and the backend's binding are left as they were.
    pub fn snapshot<B>(backend: &mut B, target: &RenderTarget, region: PixelRegion) -> Result<RgbaImage, BackendError>
    where
        B: GraphicsBackend + ?Sized,
    {
        let mut pixels = target.read_pixels(backend, region)?;
        if backend.pixel_layout() == PixelLayout::Bgra8 {
            for px in pixels.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
        }

        let mut image = RgbaImage::from_raw(region.width, region.height, pixels).ok_or_else(|| {
            BackendError::Readback(format!(
                "readback size does not match {}x{} region",
                region.width, region.height
            ))
        })?;
        if backend.row_order() == RowOrder::BottomUp {
            image::imageops::flip_vertical_in_place(&mut image);
        }
        Ok(image)
    }
}

/// One captured eye image.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub eye: Eye,
    pub frame_index: u64,
    pub image: RgbaImage,
}

impl Snapshot {
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.image.save_with_format(path, image::ImageFormat::Png)
    }

    /// A file name that identifies the frame and eye.
    pub fn default_file_name(&self) -> String {
        format!("frame{:06}_{}.png", self.frame_index, self.eye)
    }
}
