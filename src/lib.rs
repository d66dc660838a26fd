//! # hmd-present
//!
//! **Tracked pose in, stereo frame out.**
//!
//! Drives a head-mounted display's render loop: wait for the runtime's device
//! poses, build each eye's view-projection, render the scene into two
//! offscreen targets, hand both images to the compositor, flush, repeat.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hmd_present::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = SimulatedRuntime::init(SimulatedHmd::default().with_refresh_rate(90.0))?;
//!     let backend = WgpuBackend::new_headless()?;
//!     let config = SessionConfig::new().capture_every(450, Eye::Left);
//!
//!     let mut presenter = FramePresenter::new(config, backend, runtime, RecordingCompositor::new())?;
//!     let summary = presenter.run(&mut ClearScene::pulsing(), &StopSignal::with_timeout(std::time::Duration::from_secs(5)))?;
//!     for snapshot in &summary.snapshots {
//!         snapshot.save_png(snapshot.default_file_name())?;
//!     }
//!     presenter.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Contracts
//!
//! - **Composition order**: `projection · eye_to_head · inverse(head)`, built
//!   in one place ([`build_eye_view_projection`]).
//! - **One layout conversion**: the runtime's row-major 3×4 becomes a
//!   [`RigidTransform`] in [`RigidTransform::from_hmd34`] and nowhere else.
//! - **One target per eye**: [`StereoTargets`] owns both; [`RenderTarget::destroy`]
//!   is the only way to release one.
//! - **Handles never outlive targets**: a [`SubmissionHandle`] borrows its target.
//! - **Flush before the next wait**: every frame ends with a backend flush.
//!
//! ## Testing without hardware
//!
//! [`SoftwareBackend`], [`SimulatedRuntime`] and [`RecordingCompositor`] replace
//! the GPU, the tracking runtime and the compositor, and can share a
//! [`Timeline`] to check call ordering.

mod backend;
mod capture;
mod compositor;
mod config;
mod error;
mod eye;
mod eye_transform;
mod frame_timing;
mod framebuffer;
mod pose;
mod presenter;
pub mod scene;
pub mod sim;
mod tracking;

pub use backend::gpu::{GpuContext, ViewProjectionUniform, WgpuBackend};
pub use backend::software::SoftwareBackend;
pub use backend::{
    FramebufferId, FramebufferStatus, GraphicsBackend, PixelLayout, PixelRegion, RenderbufferId,
    ResourceCounts, RowOrder, TextureId,
};
pub use capture::{FrameCapture, Snapshot};
pub use compositor::{
    ColorSpace, Compositor, CompositorErrorCode, SubmissionHandle, SubmitFlags, TextureType, submit_checked,
};
pub use config::{CaptureSchedule, InvalidPosePolicy, SessionConfig};
pub use error::{
    BackendError, CreateTargetError, DegenerateTransformError, FrameError, FramebufferIncompleteError,
    InitializationError, PoseAcquisitionError, SessionError, SubmissionError, SubmissionFailure,
};
pub use eye::{Eye, EyePair};
pub use eye_transform::{
    ClipPlanes, DepthRange, EyeIntrinsics, EyeTransformBuilder, EyeViewProjection, FovTangents, IntrinsicsSource,
    build_eye_view_projection,
};
pub use frame_timing::{FrameTiming, FrameTimingStats};
pub use framebuffer::{RenderTarget, StereoTargets, with_bound_framebuffer};
pub use pose::{
    DevicePoses, HMD_DEVICE_INDEX, HmdMatrix34, MAX_TRACKED_DEVICE_COUNT, ORTHONORMAL_TOLERANCE, PoseSource,
    RigidTransform, TrackedDeviceClass, TrackedDeviceIndex, TrackedDevicePose, TrackingResult,
};
pub use presenter::{FailureClass, FramePresenter, FrameReport, FrameStage, RunSummary, StopHandle, StopSignal};
pub use scene::{ClearScene, EyeRenderContext, SceneRenderer};
pub use sim::{HeadMotion, RecordingCompositor, SimulatedHmd, SimulatedRuntime, SubmissionRecord, Timeline, TimelineEvent};
pub use tracking::{InitErrorCode, RenderTargetSize, TrackingSystem};

// Re-export glam math types for convenience
pub use glam::{Mat3, Mat4, Quat, Vec3, Vec4};
