//! Handing finished eye images to the runtime's compositor.
//!
//! A [`SubmissionHandle`] borrows the [`RenderTarget`] whose color texture it
//! names, so the borrow checker rejects any handle that would outlive its
//! target. Handles built from raw ids with [`SubmissionHandle::from_raw`] carry
//! no such guarantee; [`submit_checked`] validates them against the backend
//! before the compositor ever sees them.

use std::marker::PhantomData;
use std::ops::BitOr;

use crate::backend::{GraphicsBackend, TextureId};
use crate::error::{SubmissionError, SubmissionFailure};
use crate::eye::Eye;
use crate::framebuffer::RenderTarget;

/// How the compositor should interpret the texture's color values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorSpace {
    Auto,
    #[default]
    Gamma,
    Linear,
}

/// Graphics API the texture handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureType {
    OpenGl,
    Vulkan,
    DirectX,
    Metal,
}

/// Submission flag bits, matching the runtime's values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SubmitFlags(pub u32);

impl SubmitFlags {
    pub const DEFAULT: Self = Self(0x00);
    pub const LENS_DISTORTION_ALREADY_APPLIED: Self = Self(0x01);
    pub const GL_RENDER_BUFFER: Self = Self(0x02);
    pub const TEXTURE_WITH_POSE: Self = Self(0x08);
    pub const TEXTURE_WITH_DEPTH: Self = Self(0x10);

    pub fn contains(self, other: SubmitFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SubmitFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Status code returned by compositor calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompositorErrorCode(pub i32);

impl CompositorErrorCode {
    pub const NONE: Self = Self(0);
    pub const REQUEST_FAILED: Self = Self(1);
    pub const INCOMPATIBLE_VERSION: Self = Self(100);
    pub const DO_NOT_HAVE_FOCUS: Self = Self(101);
    pub const INVALID_TEXTURE: Self = Self(102);
    pub const IS_NOT_SCENE_APPLICATION: Self = Self(103);
    pub const TEXTURE_IS_ON_WRONG_DEVICE: Self = Self(104);
    pub const TEXTURE_USES_UNSUPPORTED_FORMAT: Self = Self(105);
    pub const SHARED_TEXTURES_NOT_SUPPORTED: Self = Self(106);
    pub const INDEX_OUT_OF_RANGE: Self = Self(107);
    pub const ALREADY_SUBMITTED: Self = Self(108);
    pub const INVALID_BOUNDS: Self = Self(109);
    pub const ALREADY_SET: Self = Self(110);

    pub fn symbol(self) -> &'static str {
        match self {
            Self::NONE => "VRCompositorError_None",
            Self::REQUEST_FAILED => "VRCompositorError_RequestFailed",
            Self::INCOMPATIBLE_VERSION => "VRCompositorError_IncompatibleVersion",
            Self::DO_NOT_HAVE_FOCUS => "VRCompositorError_DoNotHaveFocus",
            Self::INVALID_TEXTURE => "VRCompositorError_InvalidTexture",
            Self::IS_NOT_SCENE_APPLICATION => "VRCompositorError_IsNotSceneApplication",
            Self::TEXTURE_IS_ON_WRONG_DEVICE => "VRCompositorError_TextureIsOnWrongDevice",
            Self::TEXTURE_USES_UNSUPPORTED_FORMAT => "VRCompositorError_TextureUsesUnsupportedFormat",
            Self::SHARED_TEXTURES_NOT_SUPPORTED => "VRCompositorError_SharedTexturesNotSupported",
            Self::INDEX_OUT_OF_RANGE => "VRCompositorError_IndexOutOfRange",
            Self::ALREADY_SUBMITTED => "VRCompositorError_AlreadySubmitted",
            Self::INVALID_BOUNDS => "VRCompositorError_InvalidBounds",
            Self::ALREADY_SET => "VRCompositorError_AlreadySet",
            _ => "VRCompositorError_Unrecognized",
        }
    }

    /// Codes that will fail again on every frame of this session.
    pub fn is_persistent(self) -> bool {
        matches!(
            self,
            Self::INCOMPATIBLE_VERSION
                | Self::IS_NOT_SCENE_APPLICATION
                | Self::TEXTURE_IS_ON_WRONG_DEVICE
                | Self::SHARED_TEXTURES_NOT_SUPPORTED
        )
    }
}

impl std::fmt::Display for CompositorErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.symbol(), self.0)
    }
}

/// A color texture plus the metadata the compositor needs to display it.
#[derive(Debug)]
pub struct SubmissionHandle<'t> {
    texture: TextureId,
    texture_type: TextureType,
    color_space: ColorSpace,
    _target: PhantomData<&'t RenderTarget>,
}

impl<'t> SubmissionHandle<'t> {
    pub(crate) fn for_target(target: &'t RenderTarget, texture_type: TextureType, color_space: ColorSpace) -> Self {
        Self {
            texture: target.color_texture(),
            texture_type,
            color_space,
            _target: PhantomData,
        }
    }
}

impl SubmissionHandle<'static> {
    /// A handle to a texture this crate does not own.
    ///
    /// Nothing ties the texture's lifetime to the handle; submit it through
    /// [`submit_checked`].
    pub fn from_raw(texture: TextureId, texture_type: TextureType, color_space: ColorSpace) -> Self {
        Self {
            texture,
            texture_type,
            color_space,
            _target: PhantomData,
        }
    }
}

impl SubmissionHandle<'_> {
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn texture_type(&self) -> TextureType {
        self.texture_type
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }
}

/// The runtime service that displays submitted eye images.
pub trait Compositor {
    /// Queues `handle` as this frame's image for `eye`.
    fn submit(&mut self, eye: Eye, handle: &SubmissionHandle<'_>, flags: SubmitFlags) -> Result<(), CompositorErrorCode>;

    /// Tells the compositor both eyes are submitted, in non-blocking
    /// presentation modes.
    fn post_present_handoff(&mut self) {}
}

/// Submits `handle` after checking its texture is still alive.
pub fn submit_checked<B, C>(
    backend: &B,
    compositor: &mut C,
    eye: Eye,
    handle: &SubmissionHandle<'_>,
    flags: SubmitFlags,
) -> Result<(), SubmissionError>
where
    B: GraphicsBackend + ?Sized,
    C: Compositor + ?Sized,
{
    if !backend.texture_exists(handle.texture()) {
        return Err(SubmissionError {
            eye,
            failure: SubmissionFailure::StaleTexture(handle.texture()),
        });
    }
    compositor
        .submit(eye, handle, flags)
        .map_err(|code| SubmissionError {
            eye,
            failure: SubmissionFailure::Compositor(code),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = SubmitFlags::TEXTURE_WITH_DEPTH | SubmitFlags::TEXTURE_WITH_POSE;
        assert_eq!(flags.0, 0x18);
        assert!(flags.contains(SubmitFlags::TEXTURE_WITH_DEPTH));
        assert!(!flags.contains(SubmitFlags::GL_RENDER_BUFFER));
    }

    #[test]
    fn persistent_codes() {
        assert!(CompositorErrorCode::IS_NOT_SCENE_APPLICATION.is_persistent());
        assert!(!CompositorErrorCode::DO_NOT_HAVE_FOCUS.is_persistent());
        assert_eq!(
            CompositorErrorCode::INVALID_TEXTURE.to_string(),
            "VRCompositorError_InvalidTexture (102)"
        );
    }
}
