//! The per-frame presentation loop.
//!
//! A [`FramePresenter`] owns one HMD session: the backend, the tracking
//! runtime, the compositor, and both eyes' render targets. Each call to
//! [`present_frame`](FramePresenter::present_frame) walks the frame through
//! four stages:
//!
//! ```text
//! Idle ──wait_poses──▶ PosesAcquired ──render L, R──▶ EyesRendered ──submit L, R──▶ Submitted ──flush──▶ Idle
//! ```
//!
//! The pose wait is the only blocking call in steady state. Before either eye
//! is submitted the backend retires both eyes' rendering with
//! [`GraphicsBackend::finish`], so the compositor never reads a half-drawn
//! texture. Both eyes are always submitted in the same order (left, then
//! right), and the backend is flushed once submission is done.
//!
//! # Failure policy
//!
//! Per-frame failures come back as [`FrameError`] and leave the session usable.
//! [`FramePresenter::classify`] decides whether a failure ends the session:
//!
//! - Pose waits that fail `max_consecutive_pose_failures` times in a row.
//! - An HMD pose that stays invalid or disconnected for
//!   `max_consecutive_invalid_poses` frames, under either [`InvalidPosePolicy`].
//! - Submission errors the compositor will repeat forever, or any submission
//!   error `max_consecutive_submit_failures` frames in a row.
//! - Backend and resize failures, immediately.
//!
//! [`run`](FramePresenter::run) applies this policy and turns a terminal frame
//! failure into [`SessionError::FrameLoop`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::backend::{GraphicsBackend, PixelRegion};
use crate::capture::{FrameCapture, Snapshot};
use crate::compositor::{Compositor, submit_checked};
use crate::config::{InvalidPosePolicy, SessionConfig};
use crate::error::{FrameError, SessionError, SubmissionError};
use crate::eye::{Eye, EyePair};
use crate::eye_transform::EyeTransformBuilder;
use crate::frame_timing::{FrameTiming, FrameTimingStats};
use crate::framebuffer::{StereoTargets, with_bound_framebuffer};
use crate::pose::{DevicePoses, HmdMatrix34, PoseSource, RigidTransform, TrackedDeviceClass};
use crate::scene::{EyeRenderContext, SceneRenderer};
use crate::tracking::{RenderTargetSize, TrackingSystem};

/// Where the current frame is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    Idle,
    PosesAcquired,
    EyesRendered,
    Submitted,
}

/// Whether a frame failure ends the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Terminal,
}

/// What happened in one successfully presented frame.
#[derive(Debug)]
pub struct FrameReport {
    pub frame_index: u64,
    /// The HMD pose was invalid and the last good one was used instead.
    pub stale_pose: bool,
    pub rendered: EyePair<bool>,
    pub submitted: EyePair<bool>,
    pub snapshot: Option<Snapshot>,
}

/// Totals from [`FramePresenter::run`].
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Frames attempted, including failed ones.
    pub frames: u64,
    pub failed_frames: u64,
    pub stale_frames: u64,
    pub timing: FrameTimingStats,
    pub snapshots: Vec<Snapshot>,
}

/// Cooperative stop condition, checked once per frame.
///
/// A stop never interrupts a frame: the frame in flight is submitted and
/// flushed before [`FramePresenter::run`] returns.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops on its own once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A handle that can request a stop from anywhere, including another thread.
    pub fn handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.flag),
        }
    }

    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Acquire) || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

#[derive(Clone, Debug)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }
}

/// An HMD presentation session.
///
/// # Example
///
/// ```
/// use hmd_present::*;
///
/// let runtime = SimulatedRuntime::init(SimulatedHmd::default())?;
/// let backend = SoftwareBackend::new(640, 480);
/// let mut presenter = FramePresenter::new(SessionConfig::new(), backend, runtime, RecordingCompositor::new())?;
///
/// let report = presenter.present_frame(&mut ClearScene::default())?;
/// assert!(report.submitted.left && report.submitted.right);
/// presenter.shutdown();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct FramePresenter<B, R, C>
where
    B: GraphicsBackend,
    R: TrackingSystem + PoseSource,
    C: Compositor,
{
    config: SessionConfig,
    backend: B,
    runtime: R,
    compositor: C,
    targets: Option<StereoTargets>,
    transforms: EyeTransformBuilder,
    stage: FrameStage,
    frame_index: u64,
    last_good_head: Option<HmdMatrix34>,
    consecutive_pose_failures: u32,
    consecutive_invalid_poses: u32,
    consecutive_submit_failures: u32,
    pending_capture: Option<Eye>,
    timing: FrameTiming,
    started: Instant,
}

impl<B, R, C> FramePresenter<B, R, C>
where
    B: GraphicsBackend,
    R: TrackingSystem + PoseSource,
    C: Compositor,
{
    /// Starts a session on an initialized runtime.
    ///
    /// Creates both eyes' render targets at the configured size, or at the
    /// runtime's recommended size. Nothing is rendered until the first
    /// [`present_frame`](Self::present_frame).
    ///
    /// # Errors
    ///
    /// [`SessionError::FramebufferIncomplete`] or [`SessionError::Backend`] if
    /// the targets cannot be created. No handles are left allocated.
    pub fn new(config: SessionConfig, mut backend: B, runtime: R, compositor: C) -> Result<Self, SessionError> {
        log_device_inventory(&runtime);

        let size = config
            .render_target_size
            .unwrap_or_else(|| runtime.recommended_render_target_size());
        let targets = StereoTargets::create(&mut backend, size)?;
        let transforms = EyeTransformBuilder::new(config.intrinsics.clone(), config.clip_planes, backend.depth_range());
        let timing = FrameTiming::new(1000, config.frame_budget);

        log::info!(
            "session started: {size} per eye, clip {}..{}, {:?} depth, {:?} textures",
            config.clip_planes.near,
            config.clip_planes.far,
            backend.depth_range(),
            backend.texture_type()
        );

        Ok(Self {
            config,
            backend,
            runtime,
            compositor,
            targets: Some(targets),
            transforms,
            stage: FrameStage::Idle,
            frame_index: 0,
            last_good_head: None,
            consecutive_pose_failures: 0,
            consecutive_invalid_poses: 0,
            consecutive_submit_failures: 0,
            pending_capture: None,
            timing,
            started: Instant::now(),
        })
    }

    /// Runs one full frame: wait, render both eyes, submit both eyes, flush.
    ///
    /// A failed frame returns to [`FrameStage::Idle`] and the session stays
    /// usable; see [`classify`](Self::classify).
    pub fn present_frame<S>(&mut self, scene: &mut S) -> Result<FrameReport, FrameError>
    where
        S: SceneRenderer<B> + ?Sized,
    {
        let frame_index = self.frame_index;
        self.frame_index += 1;
        let result = self.drive_frame(frame_index, scene);
        self.stage = FrameStage::Idle;
        result
    }

    fn advance(&mut self, frame_index: u64, stage: FrameStage) {
        log::debug!("frame {frame_index}: {:?} -> {stage:?}", self.stage);
        self.stage = stage;
    }

    fn drive_frame<S>(&mut self, frame_index: u64, scene: &mut S) -> Result<FrameReport, FrameError>
    where
        S: SceneRenderer<B> + ?Sized,
    {
        self.ensure_target_size()?;
        if self.pending_capture.is_none() {
            self.pending_capture = self
                .config
                .capture
                .filter(|schedule| schedule.is_due(frame_index))
                .map(|schedule| schedule.eye);
        }

        // Idle -> PosesAcquired
        let wait_start = Instant::now();
        let poses = match self.runtime.wait_poses() {
            Ok(poses) => {
                self.consecutive_pose_failures = 0;
                poses
            }
            Err(err) => {
                self.consecutive_pose_failures += 1;
                return Err(err.into());
            }
        };
        let wait_time = wait_start.elapsed();
        self.advance(frame_index, FrameStage::PosesAcquired);

        let (head, stale_pose) = self.select_head_pose(frame_index, &poses)?;

        // PosesAcquired -> EyesRendered
        let render_start = Instant::now();
        let mut rendered = EyePair::new(false, false);
        let time = self.started.elapsed().as_secs_f32();
        let targets = self.targets.as_ref().ok_or(FrameError::ShutDown)?;
        for eye in Eye::BOTH {
            let view_projection = match self.transforms.build(eye, &head, &self.runtime) {
                Ok(vp) => vp,
                Err(err) => {
                    log::warn!("frame {frame_index}: {eye} eye not rendered: {err}");
                    continue;
                }
            };
            let target = targets.get(eye);
            let ctx = EyeRenderContext {
                eye,
                frame_index,
                view_projection: &view_projection,
                target_size: target.size(),
                time,
            };
            with_bound_framebuffer(&mut self.backend, target.framebuffer(), |backend| {
                backend.set_view_projection(view_projection.matrix())?;
                scene.render_eye(backend, &ctx)
            })?;
            *rendered.get_mut(eye) = true;
        }
        self.backend.finish()?;
        let render_time = render_start.elapsed();
        self.advance(frame_index, FrameStage::EyesRendered);

        // EyesRendered -> Submitted
        let submit_start = Instant::now();
        let failure = self.submit_eyes(&rendered);
        let submitted = failure.submitted;
        self.advance(frame_index, FrameStage::Submitted);

        if self.config.post_present_handoff && (submitted.left || submitted.right) {
            self.compositor.post_present_handoff();
        }

        // Submitted -> Idle
        self.backend.flush()?;
        self.timing
            .record_frame(wait_time, render_time, submit_start.elapsed());

        if let Some(err) = failure.first_error {
            self.consecutive_submit_failures += 1;
            return Err(err.into());
        }
        if submitted.left || submitted.right {
            self.consecutive_submit_failures = 0;
        }

        let snapshot = self.take_scheduled_snapshot(frame_index, &rendered);
        Ok(FrameReport {
            frame_index,
            stale_pose,
            rendered,
            submitted,
            snapshot,
        })
    }

    /// The HMD pose to render with, and whether it is a stale substitute.
    fn select_head_pose(
        &mut self,
        frame_index: u64,
        poses: &DevicePoses,
    ) -> Result<(HmdMatrix34, bool), FrameError> {
        let hmd = self.runtime.hmd_device_index();
        if let Some(pose) = poses.usable(hmd) {
            self.consecutive_invalid_poses = 0;
            let head = pose.device_to_absolute_tracking;
            if RigidTransform::from_hmd34(&head).is_ok() {
                self.last_good_head = Some(head);
            }
            return Ok((head, false));
        }

        self.consecutive_invalid_poses += 1;
        if self.invalid_pose_limit_reached() {
            return Err(FrameError::HmdPoseUnavailable);
        }
        match (self.config.invalid_pose_policy, self.last_good_head) {
            (InvalidPosePolicy::ReuseLastKnownGood, Some(last)) => {
                log::warn!(
                    "frame {frame_index}: HMD pose invalid ({} in a row), reusing last known good pose",
                    self.consecutive_invalid_poses
                );
                Ok((last, true))
            }
            _ => Err(FrameError::HmdPoseUnavailable),
        }
    }

    fn invalid_pose_limit_reached(&self) -> bool {
        self.consecutive_invalid_poses >= self.config.max_consecutive_invalid_poses
    }

    fn submit_eyes(&mut self, rendered: &EyePair<bool>) -> SubmitOutcome {
        let mut outcome = SubmitOutcome {
            submitted: EyePair::new(false, false),
            first_error: None,
        };
        let Some(targets) = self.targets.as_ref() else {
            return outcome;
        };
        let texture_type = self.backend.texture_type();
        for eye in Eye::BOTH {
            if !*rendered.get(eye) {
                continue;
            }
            let handle = targets.get(eye).submission_handle(texture_type, self.config.color_space);
            match submit_checked(&self.backend, &mut self.compositor, eye, &handle, self.config.submit_flags) {
                Ok(()) => *outcome.submitted.get_mut(eye) = true,
                Err(err) => {
                    outcome.first_error.get_or_insert(err);
                }
            }
        }
        outcome
    }

    fn take_scheduled_snapshot(&mut self, frame_index: u64, rendered: &EyePair<bool>) -> Option<Snapshot> {
        let eye = self.pending_capture?;
        if !*rendered.get(eye) {
            return None;
        }
        self.pending_capture = None;
        let target = self.targets.as_ref()?.get(eye);
        let size = target.size();
        match FrameCapture::snapshot(&mut self.backend, target, PixelRegion::full(size.width, size.height)) {
            Ok(image) => {
                log::debug!("frame {frame_index}: captured {eye} eye ({size})");
                Some(Snapshot {
                    eye,
                    frame_index,
                    image,
                })
            }
            Err(err) => {
                log::warn!("frame {frame_index}: {eye} eye snapshot failed: {err}");
                None
            }
        }
    }

    /// Recreates both targets if the runtime's recommended size changed.
    fn ensure_target_size(&mut self) -> Result<(), FrameError> {
        if self.config.render_target_size.is_some() {
            return Ok(());
        }
        let wanted = self.runtime.recommended_render_target_size();
        let targets = self.targets.take().ok_or(FrameError::ShutDown)?;
        if targets.size() == wanted {
            self.targets = Some(targets);
            return Ok(());
        }
        self.targets = Some(targets.resize(&mut self.backend, wanted)?);
        // The HMD was reconfigured; its optics may have changed too.
        self.transforms.invalidate();
        Ok(())
    }

    /// Applies the failure policy to a frame error.
    pub fn classify(&self, err: &FrameError) -> FailureClass {
        match err {
            FrameError::PoseAcquisition(_)
                if self.consecutive_pose_failures >= self.config.max_consecutive_pose_failures =>
            {
                FailureClass::Terminal
            }
            FrameError::HmdPoseUnavailable if self.invalid_pose_limit_reached() => FailureClass::Terminal,
            FrameError::PoseAcquisition(_) | FrameError::HmdPoseUnavailable => FailureClass::Transient,
            FrameError::Submission(e) if e.is_persistent() => FailureClass::Terminal,
            FrameError::Submission(_)
                if self.consecutive_submit_failures >= self.config.max_consecutive_submit_failures =>
            {
                FailureClass::Terminal
            }
            FrameError::Submission(_) => FailureClass::Transient,
            FrameError::Backend(_) | FrameError::Resize(_) | FrameError::ShutDown => FailureClass::Terminal,
        }
    }

    /// Captures `eye` at the end of the next frame that renders it.
    pub fn capture_next_frame(&mut self, eye: Eye) {
        self.pending_capture = Some(eye);
    }

    /// Presents frames until `stop` fires or a failure is terminal.
    ///
    /// `stop` is checked once per iteration, before the pose wait.
    pub fn run<S>(&mut self, scene: &mut S, stop: &StopSignal) -> Result<RunSummary, SessionError>
    where
        S: SceneRenderer<B> + ?Sized,
    {
        let first_frame = self.frame_index;
        let mut summary = RunSummary::default();

        while !stop.should_stop() {
            let frame_index = self.frame_index;
            match self.present_frame(scene) {
                Ok(report) => {
                    if report.stale_pose {
                        summary.stale_frames += 1;
                    }
                    summary.snapshots.extend(report.snapshot);
                }
                Err(err) => {
                    summary.failed_frames += 1;
                    match self.classify(&err) {
                        FailureClass::Transient => log::warn!("frame {frame_index}: {err}"),
                        FailureClass::Terminal => {
                            log::error!("frame {frame_index}: {err}; ending session");
                            return Err(SessionError::FrameLoop {
                                frame_index,
                                source: err,
                            });
                        }
                    }
                }
            }
        }

        summary.frames = self.frame_index - first_frame;
        summary.timing = self.timing.stats();
        log::info!(
            "run stopped after {} frames ({} failed, {} stale): {}",
            summary.frames,
            summary.failed_frames,
            summary.stale_frames,
            summary.timing
        );
        Ok(summary)
    }

    /// Destroys both render targets. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(targets) = self.targets.take() {
            targets.destroy(&mut self.backend);
            log::info!("session shut down after {} frames", self.frame_index);
        }
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Index the next frame will get.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn target_size(&self) -> Option<RenderTargetSize> {
        self.targets.as_ref().map(StereoTargets::size)
    }

    pub fn targets(&self) -> Option<&StereoTargets> {
        self.targets.as_ref()
    }

    pub fn timing(&self) -> FrameTimingStats {
        self.timing.stats()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn compositor(&self) -> &C {
        &self.compositor
    }

    pub fn compositor_mut(&mut self) -> &mut C {
        &mut self.compositor
    }
}

impl<B, R, C> Drop for FramePresenter<B, R, C>
where
    B: GraphicsBackend,
    R: TrackingSystem + PoseSource,
    C: Compositor,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SubmitOutcome {
    submitted: EyePair<bool>,
    first_error: Option<SubmissionError>,
}

fn log_device_inventory<R: TrackingSystem + ?Sized>(runtime: &R) {
    let devices = runtime.device_inventory();
    log::info!("tracking runtime reports {} device(s)", devices.len());
    for (index, class, connected) in &devices {
        let state = if *connected { "connected" } else { "disconnected" };
        log::info!("  device {}: {class:?} ({state})", index.0);
    }
    let hmd = runtime.hmd_device_index();
    if runtime.tracked_device_class(hmd) != TrackedDeviceClass::Hmd {
        log::warn!("slot {} does not report an HMD", hmd.0);
    }
}
