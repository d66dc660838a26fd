//! Session configuration.

use std::time::Duration;

use crate::compositor::{ColorSpace, SubmitFlags};
use crate::eye::Eye;
use crate::eye_transform::{ClipPlanes, IntrinsicsSource};
use crate::tracking::RenderTargetSize;

/// What to do when the HMD's pose is invalid or disconnected for a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InvalidPosePolicy {
    /// Render with the most recent valid pose. The frame is not visually
    /// marked as stale; [`FrameReport::stale_pose`](crate::FrameReport::stale_pose)
    /// records it. Reuse ends once
    /// [`SessionConfig::max_consecutive_invalid_poses`] is reached.
    #[default]
    ReuseLastKnownGood,
    /// Render and submit nothing this frame.
    SkipFrame,
}

/// Low-frequency diagnostic readback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSchedule {
    /// Capture frames whose index is a multiple of this.
    pub every_n_frames: u64,
    pub eye: Eye,
}

impl CaptureSchedule {
    pub fn is_due(&self, frame_index: u64) -> bool {
        self.every_n_frames > 0 && frame_index % self.every_n_frames == 0
    }
}

/// Everything a [`FramePresenter`](crate::FramePresenter) needs from the host.
///
/// # Example
///
/// ```
/// use hmd_present::{ClipPlanes, ColorSpace, Eye, SessionConfig};
///
/// let config = SessionConfig::new()
///     .clip_planes(ClipPlanes::new(0.05, 500.0))
///     .color_space(ColorSpace::Linear)
///     .capture_every(900, Eye::Left);
/// assert_eq!(config.max_consecutive_submit_failures, 5);
/// ```
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub clip_planes: ClipPlanes,
    pub color_space: ColorSpace,
    pub submit_flags: SubmitFlags,
    /// Overrides the runtime's recommended per-eye size.
    pub render_target_size: Option<RenderTargetSize>,
    pub intrinsics: IntrinsicsSource,
    pub invalid_pose_policy: InvalidPosePolicy,
    /// Consecutive failed pose waits before the session is abandoned.
    pub max_consecutive_pose_failures: u32,
    /// Consecutive frames with an unusable HMD pose before the session is
    /// abandoned. Stale-pose reuse stops at this limit too.
    pub max_consecutive_invalid_poses: u32,
    /// Consecutive frames with a failed submission before the session is abandoned.
    pub max_consecutive_submit_failures: u32,
    pub post_present_handoff: bool,
    pub frame_budget: Duration,
    pub capture: Option<CaptureSchedule>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clip_planes: ClipPlanes::default(),
            color_space: ColorSpace::Gamma,
            submit_flags: SubmitFlags::DEFAULT,
            render_target_size: None,
            intrinsics: IntrinsicsSource::LiveQuery,
            invalid_pose_policy: InvalidPosePolicy::default(),
            max_consecutive_pose_failures: 90,
            max_consecutive_invalid_poses: 90,
            max_consecutive_submit_failures: 5,
            post_present_handoff: false,
            frame_budget: Duration::from_micros(11_100),
            capture: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clip_planes(mut self, clip_planes: ClipPlanes) -> Self {
        self.clip_planes = clip_planes;
        self
    }

    pub fn color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn submit_flags(mut self, flags: SubmitFlags) -> Self {
        self.submit_flags = flags;
        self
    }

    pub fn render_target_size(mut self, width: u32, height: u32) -> Self {
        self.render_target_size = Some(RenderTargetSize::new(width, height));
        self
    }

    pub fn intrinsics(mut self, source: IntrinsicsSource) -> Self {
        self.intrinsics = source;
        self
    }

    pub fn invalid_pose_policy(mut self, policy: InvalidPosePolicy) -> Self {
        self.invalid_pose_policy = policy;
        self
    }

    pub fn max_consecutive_pose_failures(mut self, count: u32) -> Self {
        self.max_consecutive_pose_failures = count;
        self
    }

    pub fn max_consecutive_invalid_poses(mut self, count: u32) -> Self {
        self.max_consecutive_invalid_poses = count;
        self
    }

    pub fn max_consecutive_submit_failures(mut self, count: u32) -> Self {
        self.max_consecutive_submit_failures = count;
        self
    }

    pub fn post_present_handoff(mut self, enabled: bool) -> Self {
        self.post_present_handoff = enabled;
        self
    }

    /// Frame budget from the display refresh rate.
    pub fn refresh_rate(mut self, hz: f32) -> Self {
        self.frame_budget = Duration::from_secs_f32(1.0 / hz);
        self
    }

    pub fn capture_every(mut self, every_n_frames: u64, eye: Eye) -> Self {
        self.capture = Some(CaptureSchedule { every_n_frames, eye });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.clip_planes, ClipPlanes { near: 0.01, far: 100.0 });
        assert_eq!(config.color_space, ColorSpace::Gamma);
        assert_eq!(config.submit_flags, SubmitFlags::DEFAULT);
        assert_eq!(config.invalid_pose_policy, InvalidPosePolicy::ReuseLastKnownGood);
        assert_eq!(config.max_consecutive_invalid_poses, 90);
        assert!(config.capture.is_none());
    }

    #[test]
    fn capture_schedule() {
        let schedule = CaptureSchedule {
            every_n_frames: 90,
            eye: Eye::Left,
        };
        assert!(schedule.is_due(0));
        assert!(!schedule.is_due(45));
        assert!(schedule.is_due(180));
        let never = CaptureSchedule {
            every_n_frames: 0,
            eye: Eye::Left,
        };
        assert!(!never.is_due(0));
    }
}
