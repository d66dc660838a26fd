//! Headless wgpu backend.
//!
//! This module provides [`GpuContext`], which owns the wgpu device and queue,
//! and [`WgpuBackend`], which maps the integer handles of [`GraphicsBackend`]
//! onto wgpu textures.
//!
//! # Initialization
//!
//! No window or surface is involved. The HMD compositor is the only consumer
//! of the rendered images, so the context requests an adapter without a
//! compatible surface and the backend has no default framebuffer.
//!
//! # Example
//!
//! ```no_run
//! use hmd_present::{GraphicsBackend, WgpuBackend};
//!
//! let mut backend = WgpuBackend::new_headless()?;
//! let color = backend.create_color_texture(1440, 1600)?;
//! # Ok::<(), hmd_present::BackendError>(())
//! ```
//!
//! # Drawing
//!
//! Clears go through render passes recorded and submitted immediately.
//! [`GraphicsBackend::finish`] blocks until the queue is drained; `flush` only
//! polls so the frame loop never stalls after submission. Host
//! scene renderers that need real draws record their own passes against
//! [`WgpuBackend::bound_attachments`] and bind
//! [`WgpuBackend::view_projection_buffer`] as their camera uniform.

use std::collections::HashMap;

use glam::Mat4;

use super::{
    FramebufferId, FramebufferStatus, GraphicsBackend, PixelLayout, PixelRegion, RenderbufferId,
    ResourceCounts, RowOrder, TextureId,
};
use crate::compositor::TextureType;
use crate::error::BackendError;
use crate::eye_transform::DepthRange;

/// Color format of every eye texture.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Format of every depth-stencil buffer.
pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Core GPU context holding the wgpu device and queue.
///
/// All fields are public to allow direct access to wgpu APIs when needed.
pub struct GpuContext {
    /// The logical GPU device for creating resources and pipelines.
    pub device: wgpu::Device,
    /// The command queue for submitting work to the GPU.
    pub queue: wgpu::Queue,
    /// Which adapter and API the device runs on.
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Create a GPU context without a surface.
    ///
    /// This performs all wgpu initialization:
    /// 1. Creates a wgpu instance with primary backends (Vulkan, Metal, DX12)
    /// 2. Requests a high-performance adapter with no surface requirement
    /// 3. Creates the logical device and command queue
    pub fn new_headless() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BackendError::NoAdapter(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("HMD Present Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            ..Default::default()
        }))
        .map_err(|e| BackendError::DeviceRequest(e.to_string()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "wgpu: using {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }
}

/// Camera uniform written by `set_view_projection`.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ViewProjectionUniform {
    pub view_projection: [[f32; 4]; 4],
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuTexture {
    fn new(
        gpu: &GpuContext,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        label: &str,
    ) -> Result<Self, BackendError> {
        check_texture_size(width, height, gpu.device.limits().max_texture_dimension_2d)?;
        let usage = if format == COLOR_FORMAT {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
        };
        // Validation failures would otherwise reach the uncaptured-error handler and panic.
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            texture.destroy();
            return Err(BackendError::TextureCreation(err.to_string()));
        }
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }
}

fn check_texture_size(width: u32, height: u32, max: u32) -> Result<(), BackendError> {
    if (1..=max).contains(&width) && (1..=max).contains(&height) {
        Ok(())
    } else {
        Err(BackendError::InvalidTextureSize { width, height, max })
    }
}

#[derive(Clone, Copy)]
struct GpuFramebuffer {
    color: TextureId,
    depth_stencil: RenderbufferId,
}

/// [`GraphicsBackend`] on a headless wgpu device.
pub struct WgpuBackend {
    gpu: GpuContext,
    next_id: u32,
    textures: HashMap<TextureId, GpuTexture>,
    depth_buffers: HashMap<RenderbufferId, GpuTexture>,
    framebuffers: HashMap<FramebufferId, GpuFramebuffer>,
    bound: FramebufferId,
    view_projection: wgpu::Buffer,
}

impl WgpuBackend {
    pub fn new_headless() -> Result<Self, BackendError> {
        Ok(Self::new(GpuContext::new_headless()?))
    }

    pub fn new(gpu: GpuContext) -> Self {
        let view_projection = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Eye View Projection"),
            size: std::mem::size_of::<ViewProjectionUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            gpu,
            next_id: 1,
            textures: HashMap::new(),
            depth_buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            bound: FramebufferId::DEFAULT,
            view_projection,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// The wgpu texture behind a handle, for compositor interop.
    pub fn texture(&self, texture: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&texture).map(|t| &t.texture)
    }

    /// Color and depth-stencil views of the bound framebuffer.
    pub fn bound_attachments(&self) -> Result<(&wgpu::TextureView, &wgpu::TextureView), BackendError> {
        let (color, depth) = self.bound_targets()?;
        Ok((&color.view, &depth.view))
    }

    /// Uniform buffer holding the last uploaded view-projection.
    pub fn view_projection_buffer(&self) -> &wgpu::Buffer {
        &self.view_projection
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bound_targets(&self) -> Result<(&GpuTexture, &GpuTexture), BackendError> {
        if self.bound == FramebufferId::DEFAULT {
            return Err(BackendError::NoDefaultFramebuffer);
        }
        let fb = self
            .framebuffers
            .get(&self.bound)
            .ok_or(BackendError::UnknownFramebuffer(self.bound))?;
        let color = self
            .textures
            .get(&fb.color)
            .ok_or(BackendError::UnknownTexture(fb.color))?;
        let depth = self
            .depth_buffers
            .get(&fb.depth_stencil)
            .ok_or(BackendError::UnknownFramebuffer(self.bound))?;
        Ok((color, depth))
    }
}

fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

impl GraphicsBackend for WgpuBackend {
    fn create_color_texture(&mut self, width: u32, height: u32) -> Result<TextureId, BackendError> {
        let id = TextureId(self.allocate_id());
        let texture = GpuTexture::new(&self.gpu, width, height, COLOR_FORMAT, "Eye Color")?;
        self.textures.insert(id, texture);
        log::trace!("wgpu: created color texture {id:?} {width}x{height}");
        Ok(id)
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<RenderbufferId, BackendError> {
        let id = RenderbufferId(self.allocate_id());
        let texture = GpuTexture::new(&self.gpu, width, height, DEPTH_STENCIL_FORMAT, "Eye Depth Stencil")?;
        self.depth_buffers.insert(id, texture);
        log::trace!("wgpu: created depth-stencil {id:?} {width}x{height}");
        Ok(id)
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth_stencil: RenderbufferId,
    ) -> Result<FramebufferId, BackendError> {
        let id = FramebufferId(self.allocate_id());
        self.framebuffers.insert(id, GpuFramebuffer { color, depth_stencil });
        Ok(id)
    }

    fn framebuffer_status(&self, framebuffer: FramebufferId) -> FramebufferStatus {
        let Some(fb) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Unsupported;
        };
        match (self.textures.get(&fb.color), self.depth_buffers.get(&fb.depth_stencil)) {
            (Some(color), Some(depth)) if (color.width, color.height) == (depth.width, depth.height) => {
                FramebufferStatus::Complete
            }
            (Some(_), Some(_)) => FramebufferStatus::IncompleteDimensions,
            _ => FramebufferStatus::IncompleteAttachment,
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
        Ok(())
    }

    fn clear(&mut self, rgba: [f32; 4]) -> Result<(), BackendError> {
        let (color, depth) = self.bound_targets()?;
        let [r, g, b, a] = rgba.map(f64::from);
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Eye Clear Encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Eye Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn set_view_projection(&mut self, matrix: &Mat4) -> Result<(), BackendError> {
        let uniform = ViewProjectionUniform {
            view_projection: matrix.to_cols_array_2d(),
        };
        self.gpu
            .queue
            .write_buffer(&self.view_projection, 0, bytemuck::bytes_of(&uniform));
        Ok(())
    }

    fn read_pixels(&mut self, region: PixelRegion) -> Result<Vec<u8>, BackendError> {
        let (color, _) = self.bound_targets()?;
        region.check_within(color.width, color.height)?;
        if region.pixel_count() == 0 {
            return Ok(Vec::new());
        }

        let bytes_per_row = padded_bytes_per_row(region.width);
        let staging = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Eye Readback"),
            size: u64::from(bytes_per_row) * u64::from(region.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Eye Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &color.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: None,
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.gpu
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| BackendError::Poll(e.to_string()))?;
        rx.recv()
            .map_err(|e| BackendError::Readback(e.to_string()))?
            .map_err(|e| BackendError::Readback(e.to_string()))?;

        let row_bytes = region.width as usize * 4;
        let mut pixels = Vec::with_capacity(row_bytes * region.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks_exact(bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }

    fn pixel_layout(&self) -> PixelLayout {
        PixelLayout::Rgba8
    }

    fn row_order(&self) -> RowOrder {
        RowOrder::TopDown
    }

    fn depth_range(&self) -> DepthRange {
        DepthRange::ZeroToOne
    }

    fn texture_type(&self) -> TextureType {
        match self.gpu.adapter_info.backend {
            wgpu::Backend::Metal => TextureType::Metal,
            wgpu::Backend::Dx12 => TextureType::DirectX,
            wgpu::Backend::Gl => TextureType::OpenGl,
            _ => TextureType::Vulkan,
        }
    }

    fn texture_exists(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() && self.bound == framebuffer {
            self.bound = FramebufferId::DEFAULT;
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferId) {
        if let Some(depth) = self.depth_buffers.remove(&renderbuffer) {
            depth.texture.destroy();
            log::trace!("wgpu: destroyed depth-stencil {renderbuffer:?}");
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(color) = self.textures.remove(&texture) {
            color.texture.destroy();
            log::trace!("wgpu: destroyed color texture {texture:?}");
        }
    }

    fn finish(&mut self) -> Result<(), BackendError> {
        self.gpu
            .device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| BackendError::Poll(e.to_string()))
    }

    fn flush(&mut self) -> Result<(), BackendError> {
        self.gpu
            .device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|e| BackendError::Poll(e.to_string()))
    }

    fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            textures: self.textures.len(),
            renderbuffers: self.depth_buffers.len(),
            framebuffers: self.framebuffers.len(),
        }
    }
}
