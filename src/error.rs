//! Error types for the stereo presentation pipeline.
//!
//! Errors are split by how far they propagate:
//!
//! | Error                          | Scope                | Outcome                              |
//! |--------------------------------|----------------------|--------------------------------------|
//! | [`InitializationError`]        | session              | terminal, the host skips the loop    |
//! | [`FramebufferIncompleteError`] | session              | terminal, startup or resize aborts   |
//! | [`PoseAcquisitionError`]       | frame                | frame skipped, escalates if repeated |
//! | [`DegenerateTransformError`]   | one eye of one frame | eye rejected, loop continues         |
//! | [`SubmissionError`]            | frame                | frame flushed, escalates if repeated |
//! | [`BackendError`]               | session              | terminal                             |
//!
//! [`FrameError`] wraps the per-frame failures; [`SessionError`] is what a
//! failed session reports to the host.

use thiserror::Error;

use crate::backend::{FramebufferId, FramebufferStatus, TextureId};
use crate::compositor::CompositorErrorCode;
use crate::eye::Eye;
use crate::tracking::InitErrorCode;

/// The tracking runtime is absent, unsupported, or found no HMD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tracking runtime failed to initialize: {code}")]
pub struct InitializationError {
    pub code: InitErrorCode,
}

/// Waiting for the next frame's device poses failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pose acquisition failed: {code}")]
pub struct PoseAcquisitionError {
    pub code: CompositorErrorCode,
}

/// A pose matrix was not a rigid transform.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("pose is not a rigid transform (orthonormality deviation {max_deviation:.2e})")]
pub struct DegenerateTransformError {
    /// Largest absolute deviation of `RᵀR` from identity, or of `det(R)` from one.
    pub max_deviation: f32,
}

/// The driver rejected a framebuffer's attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("framebuffer {width}x{height} is incomplete: {status:?}")]
pub struct FramebufferIncompleteError {
    pub status: FramebufferStatus,
    pub width: u32,
    pub height: u32,
}

/// Creating a render target failed.
#[derive(Debug, Error)]
pub enum CreateTargetError {
    #[error(transparent)]
    Incomplete(#[from] FramebufferIncompleteError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Why a single eye's submission did not reach the compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmissionFailure {
    #[error("compositor rejected the texture: {0}")]
    Compositor(CompositorErrorCode),
    #[error("texture {0:?} was already destroyed")]
    StaleTexture(TextureId),
}

/// Handing one eye's image to the compositor failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{eye} eye submission failed: {failure}")]
pub struct SubmissionError {
    pub eye: Eye,
    #[source]
    pub failure: SubmissionFailure,
}

impl SubmissionError {
    /// Whether retrying next frame cannot help.
    pub fn is_persistent(&self) -> bool {
        match self.failure {
            SubmissionFailure::Compositor(code) => code.is_persistent(),
            SubmissionFailure::StaleTexture(_) => true,
        }
    }
}

/// Failures reported by a [`GraphicsBackend`](crate::GraphicsBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no suitable GPU adapter: {0}")]
    NoAdapter(String),
    #[error("failed to create device: {0}")]
    DeviceRequest(String),
    #[error("unknown framebuffer {0:?}")]
    UnknownFramebuffer(FramebufferId),
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("texture size {width}x{height} is outside 1..={max} per side")]
    InvalidTextureSize { width: u32, height: u32, max: u32 },
    #[error("texture creation failed: {0}")]
    TextureCreation(String),
    #[error("the backend has no default framebuffer to draw into")]
    NoDefaultFramebuffer,
    #[error("region {x},{y} {width}x{height} exceeds the {target_width}x{target_height} target")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },
    #[error("pixel readback failed: {0}")]
    Readback(String),
    #[error("device poll failed: {0}")]
    Poll(String),
}

/// A failure confined to one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    PoseAcquisition(#[from] PoseAcquisitionError),
    #[error("no valid HMD pose and no earlier pose to reuse")]
    HmdPoseUnavailable,
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("render targets could not be recreated: {0}")]
    Resize(#[source] FramebufferIncompleteError),
    #[error("the session has already been shut down")]
    ShutDown,
}

/// A terminal failure that ends (or prevents) a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),
    #[error(transparent)]
    FramebufferIncomplete(#[from] FramebufferIncompleteError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("frame {frame_index}: {source}")]
    FrameLoop {
        frame_index: u64,
        #[source]
        source: FrameError,
    },
}

impl From<CreateTargetError> for FrameError {
    fn from(err: CreateTargetError) -> Self {
        match err {
            CreateTargetError::Incomplete(e) => FrameError::Resize(e),
            CreateTargetError::Backend(e) => FrameError::Backend(e),
        }
    }
}

impl From<CreateTargetError> for SessionError {
    fn from(err: CreateTargetError) -> Self {
        match err {
            CreateTargetError::Incomplete(e) => SessionError::FramebufferIncomplete(e),
            CreateTargetError::Backend(e) => SessionError::Backend(e),
        }
    }
}

impl SessionError {
    /// The pipeline stage that failed, for the user-facing report.
    pub fn stage(&self) -> &'static str {
        match self {
            SessionError::Initialization(_) => "runtime initialization",
            SessionError::FramebufferIncomplete(_) => "render target creation",
            SessionError::Backend(_) => "graphics backend",
            SessionError::FrameLoop { .. } => "frame loop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_error_reports_runtime_symbol() {
        let err = InitializationError {
            code: InitErrorCode::HMD_NOT_FOUND,
        };
        let text = err.to_string();
        assert!(text.contains("VRInitError_Init_HmdNotFound"));
        assert!(text.contains("108"));
    }

    #[test]
    fn stale_texture_is_persistent() {
        let err = SubmissionError {
            eye: Eye::Right,
            failure: SubmissionFailure::StaleTexture(TextureId(7)),
        };
        assert!(err.is_persistent());
        assert!(err.to_string().starts_with("right eye"));
    }

    #[test]
    fn session_error_names_stage() {
        let err = SessionError::from(FramebufferIncompleteError {
            status: FramebufferStatus::IncompleteDimensions,
            width: 4,
            height: 4,
        });
        assert_eq!(err.stage(), "render target creation");
    }
}
