//! A simulated tracking runtime and compositor.
//!
//! [`SimulatedRuntime`] stands in for a physical HMD: it reports a fixed
//! per-eye frustum and IPD, animates the head along a [`HeadMotion`], and can
//! be scripted to fail pose waits or report invalid poses. [`RecordingCompositor`]
//! accepts submissions and keeps them for inspection.
//!
//! Both, plus [`SoftwareBackend`](crate::SoftwareBackend), can share a
//! [`Timeline`] that records the order of waits, binds, clears, submits and
//! flushes across all three.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

use crate::backend::{FramebufferId, TextureId};
use crate::compositor::{ColorSpace, Compositor, CompositorErrorCode, SubmissionHandle, SubmitFlags, TextureType};
use crate::error::{InitializationError, PoseAcquisitionError};
use crate::eye::{Eye, EyePair};
use crate::eye_transform::FovTangents;
use crate::pose::{
    DevicePoses, HMD_DEVICE_INDEX, HmdMatrix34, MAX_TRACKED_DEVICE_COUNT, PoseSource, RigidTransform,
    TrackedDeviceClass, TrackedDeviceIndex, TrackedDevicePose, TrackingResult,
};
use crate::tracking::{InitErrorCode, RenderTargetSize, TrackingSystem};

/// One observable step of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineEvent {
    WaitPoses,
    Bind(FramebufferId),
    Clear(FramebufferId),
    /// Rendering retired on the GPU.
    Finish,
    Submit(Eye, TextureId),
    Flush,
    Handoff,
}

/// Shared, ordered log of [`TimelineEvent`]s.
///
/// Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    events: Rc<RefCell<Vec<TimelineEvent>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: TimelineEvent) {
        self.events.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<TimelineEvent> {
        self.events.borrow().clone()
    }
}

/// How the simulated head moves from frame to frame.
#[derive(Clone, Debug)]
pub enum HeadMotion {
    /// The head never moves.
    Static(RigidTransform),
    /// Standing height, yawing side to side.
    Sway {
        height: f32,
        amplitude_radians: f32,
        period_frames: u32,
    },
    /// Plays the poses in order, repeating from the start.
    Scripted(Vec<RigidTransform>),
}

impl HeadMotion {
    pub fn pose_at(&self, frame: u64) -> RigidTransform {
        match self {
            HeadMotion::Static(pose) => *pose,
            HeadMotion::Sway {
                height,
                amplitude_radians,
                period_frames,
            } => {
                let period = (*period_frames).max(1) as f32;
                let phase = (frame as f32 / period) * std::f32::consts::TAU;
                let yaw = amplitude_radians * phase.sin();
                RigidTransform::from_rotation_translation(Quat::from_rotation_y(yaw), Vec3::new(0.0, *height, 0.0))
            }
            HeadMotion::Scripted(poses) if poses.is_empty() => RigidTransform::IDENTITY,
            HeadMotion::Scripted(poses) => poses[(frame % poses.len() as u64) as usize],
        }
    }
}

/// Hardware description of a simulated headset.
#[derive(Clone, Debug)]
pub struct SimulatedHmd {
    /// `false` makes [`SimulatedRuntime::init`] fail with `HMD_NOT_FOUND`.
    pub present: bool,
    pub render_target_size: RenderTargetSize,
    pub fov: EyePair<FovTangents>,
    /// Distance between the eyes' optical centers.
    pub ipd: f32,
    pub head_motion: HeadMotion,
    pub controllers: u32,
    pub base_stations: u32,
    /// When set, pose waits block until this long after the previous wait.
    pub frame_interval: Option<Duration>,
}

impl Default for SimulatedHmd {
    fn default() -> Self {
        let left = FovTangents {
            left: -1.39,
            right: 1.24,
            bottom: -1.47,
            top: 1.46,
        };
        let right = FovTangents {
            left: -left.right,
            right: -left.left,
            ..left
        };
        Self {
            present: true,
            render_target_size: RenderTargetSize::new(1080, 1200),
            fov: EyePair::new(left, right),
            ipd: 0.064,
            head_motion: HeadMotion::Static(RigidTransform::from_translation(Vec3::new(0.0, 1.6, 0.0))),
            controllers: 2,
            base_stations: 2,
            frame_interval: None,
        }
    }
}

impl SimulatedHmd {
    /// A runtime install with no headset attached.
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::default()
        }
    }

    /// Same frustum for both eyes, `fov_radians` wide on each axis.
    pub fn with_symmetric_fov(mut self, fov_radians: f32) -> Self {
        let fov = FovTangents::symmetric(fov_radians);
        self.fov = EyePair::new(fov, fov);
        self
    }

    pub fn with_ipd(mut self, ipd: f32) -> Self {
        self.ipd = ipd;
        self
    }

    pub fn with_render_target_size(mut self, width: u32, height: u32) -> Self {
        self.render_target_size = RenderTargetSize::new(width, height);
        self
    }

    pub fn with_head_motion(mut self, motion: HeadMotion) -> Self {
        self.head_motion = motion;
        self
    }

    /// Paces pose waits at `hz`.
    pub fn with_refresh_rate(mut self, hz: f32) -> Self {
        self.frame_interval = Some(Duration::from_secs_f32(1.0 / hz));
        self
    }
}

/// [`TrackingSystem`] and [`PoseSource`] over a [`SimulatedHmd`].
pub struct SimulatedRuntime {
    hmd: SimulatedHmd,
    classes: Vec<TrackedDeviceClass>,
    frame: u64,
    last_wait: Option<Instant>,
    wait_failures: VecDeque<CompositorErrorCode>,
    invalid_poses: u32,
    disconnected: bool,
    timeline: Option<Timeline>,
}

impl SimulatedRuntime {
    pub fn init(hmd: SimulatedHmd) -> Result<Self, InitializationError> {
        if !hmd.present {
            return Err(InitializationError {
                code: InitErrorCode::HMD_NOT_FOUND,
            });
        }

        let mut classes = vec![TrackedDeviceClass::Invalid; MAX_TRACKED_DEVICE_COUNT];
        let mut slots = classes.iter_mut();
        if let Some(slot) = slots.next() {
            *slot = TrackedDeviceClass::Hmd;
        }
        for slot in slots.by_ref().take(hmd.controllers as usize) {
            *slot = TrackedDeviceClass::Controller;
        }
        for slot in slots.take(hmd.base_stations as usize) {
            *slot = TrackedDeviceClass::TrackingReference;
        }

        Ok(Self {
            hmd,
            classes,
            frame: 0,
            last_wait: None,
            wait_failures: VecDeque::new(),
            invalid_poses: 0,
            disconnected: false,
            timeline: None,
        })
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Number of successful pose waits so far.
    pub fn frames_delivered(&self) -> u64 {
        self.frame
    }

    /// Makes the next `count` pose waits fail with `code`.
    pub fn fail_next_waits(&mut self, code: CompositorErrorCode, count: usize) {
        self.wait_failures.extend(std::iter::repeat_n(code, count));
    }

    /// Marks the HMD pose invalid for the next `count` delivered frames.
    pub fn invalidate_next_poses(&mut self, count: u32) {
        self.invalid_poses += count;
    }

    /// Unplugs the headset; every later wait fails.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    /// Simulates a headset reconfiguration.
    pub fn set_recommended_size(&mut self, width: u32, height: u32) {
        self.hmd.render_target_size = RenderTargetSize::new(width, height);
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.hmd.frame_interval, self.last_wait) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_wait = Some(Instant::now());
    }
}

impl TrackingSystem for SimulatedRuntime {
    fn recommended_render_target_size(&self) -> RenderTargetSize {
        self.hmd.render_target_size
    }

    fn projection_raw(&self, eye: Eye) -> FovTangents {
        *self.hmd.fov.get(eye)
    }

    fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
        let half = self.hmd.ipd * 0.5;
        let x = match eye {
            Eye::Left => -half,
            Eye::Right => half,
        };
        RigidTransform::from_translation(Vec3::new(x, 0.0, 0.0)).into()
    }

    fn tracked_device_class(&self, index: TrackedDeviceIndex) -> TrackedDeviceClass {
        self.classes
            .get(index.as_usize())
            .copied()
            .unwrap_or(TrackedDeviceClass::Invalid)
    }

    fn is_tracked_device_connected(&self, index: TrackedDeviceIndex) -> bool {
        !self.disconnected && self.tracked_device_class(index) != TrackedDeviceClass::Invalid
    }
}

impl PoseSource for SimulatedRuntime {
    fn wait_poses(&mut self) -> Result<DevicePoses, PoseAcquisitionError> {
        if let Some(timeline) = &self.timeline {
            timeline.push(TimelineEvent::WaitPoses);
        }
        self.pace();

        if self.disconnected {
            return Err(PoseAcquisitionError {
                code: CompositorErrorCode::DO_NOT_HAVE_FOCUS,
            });
        }
        if let Some(code) = self.wait_failures.pop_front() {
            return Err(PoseAcquisitionError { code });
        }

        let head = self.hmd.head_motion.pose_at(self.frame);
        let mut poses = DevicePoses::new();

        let mut hmd_pose = TrackedDevicePose::tracked(head);
        if self.invalid_poses > 0 {
            self.invalid_poses -= 1;
            hmd_pose.pose_is_valid = false;
            hmd_pose.tracking_result = TrackingResult::RunningOutOfRange;
        }
        poses.set(HMD_DEVICE_INDEX, hmd_pose);

        for (slot, class) in self.classes.iter().enumerate().skip(1) {
            let side = if slot % 2 == 1 { -1.0 } else { 1.0 };
            let pose = match class {
                TrackedDeviceClass::Controller => {
                    head.compose(&RigidTransform::from_translation(Vec3::new(0.25 * side, -0.45, -0.3)))
                }
                TrackedDeviceClass::TrackingReference => {
                    RigidTransform::from_translation(Vec3::new(2.0 * side, 2.2, 2.0))
                }
                _ => continue,
            };
            poses.set(TrackedDeviceIndex(slot as u32), TrackedDevicePose::tracked(pose));
        }

        self.frame += 1;
        Ok(poses)
    }
}

/// One accepted submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub eye: Eye,
    pub texture: TextureId,
    pub texture_type: TextureType,
    pub color_space: ColorSpace,
    pub flags: SubmitFlags,
}

/// [`Compositor`] that records what it is given.
#[derive(Debug, Default)]
pub struct RecordingCompositor {
    submissions: Vec<SubmissionRecord>,
    handoffs: usize,
    failures: VecDeque<CompositorErrorCode>,
    timeline: Option<Timeline>,
}

impl RecordingCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    /// Rejects the next `count` submissions with `code`.
    pub fn fail_next(&mut self, code: CompositorErrorCode, count: usize) {
        self.failures.extend(std::iter::repeat_n(code, count));
    }

    pub fn submissions(&self) -> &[SubmissionRecord] {
        &self.submissions
    }

    pub fn handoffs(&self) -> usize {
        self.handoffs
    }
}

impl Compositor for RecordingCompositor {
    fn submit(&mut self, eye: Eye, handle: &SubmissionHandle<'_>, flags: SubmitFlags) -> Result<(), CompositorErrorCode> {
        if let Some(code) = self.failures.pop_front() {
            return Err(code);
        }
        if let Some(timeline) = &self.timeline {
            timeline.push(TimelineEvent::Submit(eye, handle.texture()));
        }
        self.submissions.push(SubmissionRecord {
            eye,
            texture: handle.texture(),
            texture_type: handle.texture_type(),
            color_space: handle.color_space(),
            flags,
        });
        Ok(())
    }

    fn post_present_handoff(&mut self) {
        if let Some(timeline) = &self.timeline {
            timeline.push(TimelineEvent::Handoff);
        }
        self.handoffs += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_hmd_fails_init_with_runtime_code() {
        let err = SimulatedRuntime::init(SimulatedHmd::absent()).err().unwrap();
        assert_eq!(err.code, InitErrorCode::HMD_NOT_FOUND);
    }

    #[test]
    fn inventory_lists_hmd_controllers_and_base_stations() {
        let runtime = SimulatedRuntime::init(SimulatedHmd::default()).unwrap();
        let classes: Vec<_> = runtime.device_inventory().into_iter().map(|(_, c, _)| c).collect();
        assert_eq!(
            classes,
            vec![
                TrackedDeviceClass::Hmd,
                TrackedDeviceClass::Controller,
                TrackedDeviceClass::Controller,
                TrackedDeviceClass::TrackingReference,
                TrackedDeviceClass::TrackingReference,
            ]
        );
    }

    #[test]
    fn scripted_failures_then_recovery() {
        let mut runtime = SimulatedRuntime::init(SimulatedHmd::default()).unwrap();
        runtime.fail_next_waits(CompositorErrorCode::DO_NOT_HAVE_FOCUS, 2);
        assert!(runtime.wait_poses().is_err());
        assert!(runtime.wait_poses().is_err());
        let poses = runtime.wait_poses().unwrap();
        assert!(poses.usable(HMD_DEVICE_INDEX).is_some());
        assert_eq!(runtime.frames_delivered(), 1);
    }

    #[test]
    fn invalid_pose_is_reported_not_hidden() {
        let mut runtime = SimulatedRuntime::init(SimulatedHmd::default()).unwrap();
        runtime.invalidate_next_poses(1);
        let poses = runtime.wait_poses().unwrap();
        assert!(poses.usable(HMD_DEVICE_INDEX).is_none());
        assert!(runtime.wait_poses().unwrap().usable(HMD_DEVICE_INDEX).is_some());
    }

    #[test]
    fn eye_offsets_are_half_ipd_either_side() {
        let runtime = SimulatedRuntime::init(SimulatedHmd::default().with_ipd(0.07)).unwrap();
        let left = RigidTransform::from_hmd34(&runtime.eye_to_head_transform(Eye::Left)).unwrap();
        let right = RigidTransform::from_hmd34(&runtime.eye_to_head_transform(Eye::Right)).unwrap();
        assert!((left.translation.x + 0.035).abs() < 1e-6);
        assert!((right.translation.x - 0.035).abs() < 1e-6);
    }

    #[test]
    fn scripted_motion_repeats() {
        let a = RigidTransform::from_translation(Vec3::X);
        let b = RigidTransform::from_translation(Vec3::Y);
        let motion = HeadMotion::Scripted(vec![a, b]);
        assert_eq!(motion.pose_at(0), a);
        assert_eq!(motion.pose_at(3), b);
    }

    #[test]
    fn recording_compositor_applies_scripted_failures_first() {
        let mut compositor = RecordingCompositor::new();
        compositor.fail_next(CompositorErrorCode::DO_NOT_HAVE_FOCUS, 1);
        let handle = SubmissionHandle::from_raw(TextureId(1), TextureType::OpenGl, ColorSpace::Gamma);
        assert_eq!(
            compositor.submit(Eye::Left, &handle, SubmitFlags::DEFAULT),
            Err(CompositorErrorCode::DO_NOT_HAVE_FOCUS)
        );
        assert!(compositor.submit(Eye::Left, &handle, SubmitFlags::DEFAULT).is_ok());
        assert_eq!(compositor.submissions().len(), 1);
    }
}
