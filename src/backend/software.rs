//! CPU backend with OpenGL semantics.
//!
//! Handles are monotonic integers that are never reused, framebuffer
//! completeness is computed from the attachments the way a GL driver would,
//! and readback returns rows bottom-up. Every live handle is tracked so tests
//! can assert that teardown returns to baseline.

use std::collections::HashMap;

use glam::Mat4;

use super::{
    FramebufferId, FramebufferStatus, GraphicsBackend, PixelLayout, PixelRegion, RenderbufferId,
    ResourceCounts, RowOrder, TextureId,
};
use crate::compositor::TextureType;
use crate::error::BackendError;
use crate::eye_transform::DepthRange;
use crate::sim::{Timeline, TimelineEvent};

#[derive(Debug)]
struct SoftTexture {
    width: u32,
    height: u32,
    /// Row 0 is the bottom row, stored in the backend's pixel layout.
    pixels: Vec<u8>,
}

impl SoftTexture {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    fn fill(&mut self, region: PixelRegion, bytes: [u8; 4]) {
        for y in region.y..region.y + region.height {
            let row = (y * self.width) as usize;
            for x in region.x..region.x + region.width {
                let i = (row + x as usize) * 4;
                self.pixels[i..i + 4].copy_from_slice(&bytes);
            }
        }
    }

    fn read(&self, region: PixelRegion) -> Vec<u8> {
        let mut out = Vec::with_capacity(region.pixel_count() * 4);
        for y in region.y..region.y + region.height {
            let start = ((y * self.width + region.x) * 4) as usize;
            out.extend_from_slice(&self.pixels[start..start + region.width as usize * 4]);
        }
        out
    }
}

#[derive(Debug)]
struct SoftFramebuffer {
    color: TextureId,
    depth_stencil: RenderbufferId,
    forced_status: Option<FramebufferStatus>,
}

/// Deterministic in-memory [`GraphicsBackend`].
#[derive(Debug)]
pub struct SoftwareBackend {
    next_id: u32,
    textures: HashMap<TextureId, SoftTexture>,
    renderbuffers: HashMap<RenderbufferId, (u32, u32)>,
    framebuffers: HashMap<FramebufferId, SoftFramebuffer>,
    window: SoftTexture,
    bound: FramebufferId,
    layout: PixelLayout,
    forced_status: Option<FramebufferStatus>,
    view_projections: Vec<Mat4>,
    clears: u64,
    flushes: u64,
    timeline: Option<Timeline>,
}

impl SoftwareBackend {
    /// A backend whose default framebuffer is a `width × height` window.
    pub fn new(window_width: u32, window_height: u32) -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            window: SoftTexture::new(window_width, window_height),
            bound: FramebufferId::DEFAULT,
            layout: PixelLayout::Rgba8,
            forced_status: None,
            view_projections: Vec::new(),
            clears: 0,
            flushes: 0,
            timeline: None,
        }
    }

    pub fn with_pixel_layout(mut self, layout: PixelLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Records binds, clears, finishes and flushes into `timeline`.
    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Makes framebuffers created from now on report `status` (or their real
    /// status again, with `None`).
    pub fn force_framebuffer_status(&mut self, status: Option<FramebufferStatus>) {
        self.forced_status = status;
    }

    /// Clears only `region` of the bound target (a scissored clear).
    pub fn clear_region(&mut self, region: PixelRegion, rgba: [f32; 4]) -> Result<(), BackendError> {
        let bytes = self.encode(rgba);
        let target = self.bound_color_mut()?;
        region.check_within(target.width, target.height)?;
        target.fill(region, bytes);
        Ok(())
    }

    /// Every matrix uploaded with `set_view_projection`, oldest first.
    pub fn view_projections(&self) -> &[Mat4] {
        &self.view_projections
    }

    pub fn clear_count(&self) -> u64 {
        self.clears
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&self, event: TimelineEvent) {
        if let Some(timeline) = &self.timeline {
            timeline.push(event);
        }
    }

    fn encode(&self, rgba: [f32; 4]) -> [u8; 4] {
        let [r, g, b, a] = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        match self.layout {
            PixelLayout::Rgba8 => [r, g, b, a],
            PixelLayout::Bgra8 => [b, g, r, a],
        }
    }

    fn bound_color(&self) -> Result<&SoftTexture, BackendError> {
        if self.bound == FramebufferId::DEFAULT {
            return Ok(&self.window);
        }
        let framebuffer = self
            .framebuffers
            .get(&self.bound)
            .ok_or(BackendError::UnknownFramebuffer(self.bound))?;
        self.textures
            .get(&framebuffer.color)
            .ok_or(BackendError::UnknownTexture(framebuffer.color))
    }

    fn bound_color_mut(&mut self) -> Result<&mut SoftTexture, BackendError> {
        if self.bound == FramebufferId::DEFAULT {
            return Ok(&mut self.window);
        }
        let framebuffer = self
            .framebuffers
            .get(&self.bound)
            .ok_or(BackendError::UnknownFramebuffer(self.bound))?;
        let color = framebuffer.color;
        self.textures
            .get_mut(&color)
            .ok_or(BackendError::UnknownTexture(color))
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn create_color_texture(&mut self, width: u32, height: u32) -> Result<TextureId, BackendError> {
        let id = TextureId(self.allocate_id());
        self.textures.insert(id, SoftTexture::new(width, height));
        log::trace!("software: created texture {id:?} {width}x{height}");
        Ok(id)
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<RenderbufferId, BackendError> {
        let id = RenderbufferId(self.allocate_id());
        self.renderbuffers.insert(id, (width, height));
        log::trace!("software: created depth-stencil {id:?} {width}x{height}");
        Ok(id)
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth_stencil: RenderbufferId,
    ) -> Result<FramebufferId, BackendError> {
        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(
            id,
            SoftFramebuffer {
                color,
                depth_stencil,
                forced_status: self.forced_status,
            },
        );
        log::trace!("software: created framebuffer {id:?}");
        Ok(id)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        if framebuffer == FramebufferId::DEFAULT {
            return FramebufferStatus::Complete;
        }
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Unsupported;
        };
        if let Some(status) = fb.forced_status {
            return status;
        }
        let (Some(color), Some(&(depth_width, depth_height))) =
            (self.textures.get(&fb.color), self.renderbuffers.get(&fb.depth_stencil))
        else {
            return FramebufferStatus::IncompleteAttachment;
        };
        if color.width == 0 || color.height == 0 {
            FramebufferStatus::IncompleteAttachment
        } else if (color.width, color.height) != (depth_width, depth_height) {
            FramebufferStatus::IncompleteDimensions
        } else {
            FramebufferStatus::Complete
        }
    }

    fn bound_framebuffer(&self) -> FramebufferId {
        self.bound
    }

    fn bind_framebuffer(&mut self, framebuffer: FramebufferId) -> Result<(), BackendError> {
        if framebuffer != FramebufferId::DEFAULT && !self.framebuffers.contains_key(&framebuffer) {
            return Err(BackendError::UnknownFramebuffer(framebuffer));
        }
        self.bound = framebuffer;
        self.record(TimelineEvent::Bind(framebuffer));
        Ok(())
    }

    fn clear(&mut self, rgba: [f32; 4]) -> Result<(), BackendError> {
        let bytes = self.encode(rgba);
        let target = self.bound_color_mut()?;
        let region = PixelRegion::full(target.width, target.height);
        target.fill(region, bytes);
        self.clears += 1;
        self.record(TimelineEvent::Clear(self.bound));
        Ok(())
    }

    fn set_view_projection(&mut self, matrix: &Mat4) -> Result<(), BackendError> {
        self.view_projections.push(*matrix);
        Ok(())
    }

    fn read_pixels(&mut self, region: PixelRegion) -> Result<Vec<u8>, BackendError> {
        let target = self.bound_color()?;
        region.check_within(target.width, target.height)?;
        Ok(target.read(region))
    }

    fn pixel_layout(&self) -> PixelLayout {
        self.layout
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::BottomUp
    }

    fn depth_range(&self) -> DepthRange {
        DepthRange::NegativeOneToOne
    }

    fn texture_type(&self) -> TextureType {
        TextureType::OpenGl
    }

    fn texture_exists(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            log::trace!("software: deleted framebuffer {framebuffer:?}");
            // Deleting the bound framebuffer reverts to the default one.
            if self.bound == framebuffer {
                self.bound = FramebufferId::DEFAULT;
            }
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if self.renderbuffers.remove(&renderbuffer).is_some() {
            log::trace!("software: deleted depth-stencil {renderbuffer:?}");
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            log::trace!("software: deleted texture {texture:?}");
        }
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        self.record(TimelineEvent::Finish);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        self.flushes += 1;
        self.record(TimelineEvent::Flush);
        Ok(())
    }

    fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            textures: self.textures.len(),
            renderbuffers: self.renderbuffers.len(),
            framebuffers: self.framebuffers.len(),
        }
    }
}
