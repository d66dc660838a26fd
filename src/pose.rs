//! Tracked device poses and the rigid transforms they carry.
//!
//! The tracking runtime reports every pose as an [`HmdMatrix34`]: a row-major
//! 3×4 matrix whose last column is the translation. Rendering works with glam's
//! column-major [`Mat4`]. [`RigidTransform::from_hmd34`] is the one place that
//! layout conversion happens. Everything downstream works with
//! [`RigidTransform`] or `Mat4` and never transposes again.
//!
//! # Example
//!
//! ```
//! use hmd_present::{HmdMatrix34, RigidTransform};
//!
//! let raw = HmdMatrix34 {
//!     m: [
//!         [1.0, 0.0, 0.0, 0.5],
//!         [0.0, 1.0, 0.0, 1.6],
//!         [0.0, 0.0, 1.0, -0.25],
//!     ],
//! };
//! let head = RigidTransform::from_hmd34(&raw).unwrap();
//! assert_eq!(head.translation.y, 1.6);
//! ```

use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

use crate::error::{DegenerateTransformError, PoseAcquisitionError};

/// Number of device slots the tracking runtime reports every frame.
pub const MAX_TRACKED_DEVICE_COUNT: usize = 64;

/// Slot the tracking runtime reserves for the HMD.
///
/// This is the runtime's convention, not something this crate enforces. Look it
/// up through [`TrackingSystem::hmd_device_index`](crate::TrackingSystem::hmd_device_index)
/// instead of indexing slot zero directly.
pub const HMD_DEVICE_INDEX: TrackedDeviceIndex = TrackedDeviceIndex(0);

/// Largest deviation from orthonormality accepted for a rotation block.
pub const ORTHONORMAL_TOLERANCE: f32 = 1e-3;

/// Stable index of a tracked device slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackedDeviceIndex(pub u32);

impl TrackedDeviceIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Row-major 3×4 matrix as laid out by the tracking runtime.
///
/// `m[row][3]` holds the translation.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HmdMatrix34 {
    pub m: [[f32; 4]; 3],
}

impl HmdMatrix34 {
    pub const IDENTITY: Self = Self {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };
}

impl Default for HmdMatrix34 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<RigidTransform> for HmdMatrix34 {
    fn from(transform: RigidTransform) -> Self {
        let r = transform.rotation;
        let t = transform.translation;
        Self {
            m: [
                [r.x_axis.x, r.y_axis.x, r.z_axis.x, t.x],
                [r.x_axis.y, r.y_axis.y, r.z_axis.y, t.y],
                [r.x_axis.z, r.y_axis.z, r.z_axis.z, t.z],
            ],
        }
    }
}

/// A rotation plus translation, with no scale or shear.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidTransform {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    pub const IDENTITY: Self = Self {
        rotation: Mat3::IDENTITY,
        translation: Vec3::ZERO,
    };

    /// Builds a transform from a quaternion (normalized here) and a translation.
    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self {
            rotation: Mat3::from_quat(rotation.normalize()),
            translation,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            translation,
        }
    }

    /// Builds a transform from a rotation block, rejecting anything that is not
    /// a proper rotation within [`ORTHONORMAL_TOLERANCE`].
    pub fn from_parts(rotation: Mat3, translation: Vec3) -> Result<Self, DegenerateTransformError> {
        let max_deviation = orthonormal_deviation(&rotation);
        if !(max_deviation <= ORTHONORMAL_TOLERANCE) {
            return Err(DegenerateTransformError { max_deviation });
        }
        Ok(Self {
            rotation,
            translation,
        })
    }

    /// Converts the runtime's row-major 3×4 layout into a rigid transform.
    pub fn from_hmd34(raw: &HmdMatrix34) -> Result<Self, DegenerateTransformError> {
        let m = &raw.m;
        let rotation = Mat3::from_cols(
            Vec3::new(m[0][0], m[1][0], m[2][0]),
            Vec3::new(m[0][1], m[1][1], m[2][1]),
            Vec3::new(m[0][2], m[1][2], m[2][2]),
        );
        let translation = Vec3::new(m[0][3], m[1][3], m[2][3]);
        Self::from_parts(rotation, translation)
    }

    /// Rigid inverse: `(Rᵀ, -Rᵀt)`.
    ///
    /// Exact for orthonormal rotations and free of the pivoting error a general
    /// 4×4 inverse would introduce.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Applies `self` after `other`.
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols(
            self.rotation.x_axis.extend(0.0),
            self.rotation.y_axis.extend(0.0),
            self.rotation.z_axis.extend(0.0),
            Vec4::new(self.translation.x, self.translation.y, self.translation.z, 1.0),
        )
    }

    pub fn abs_diff_eq(&self, other: &RigidTransform, max_abs_diff: f32) -> bool {
        self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
            && self.translation.abs_diff_eq(other.translation, max_abs_diff)
    }
}

fn orthonormal_deviation(rotation: &Mat3) -> f32 {
    let gram = rotation.transpose() * *rotation;
    let identity_error = (gram - Mat3::IDENTITY)
        .to_cols_array()
        .iter()
        .fold(0.0f32, |acc, v| acc.max(v.abs()));
    let det_error = (rotation.determinant() - 1.0).abs();
    identity_error.max(det_error)
}

/// Quality of the tracking solution behind a pose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingResult {
    Uninitialized = 1,
    CalibratingInProgress = 100,
    CalibratingOutOfRange = 101,
    RunningOk = 200,
    RunningOutOfRange = 201,
    FallbackRotationOnly = 300,
}

/// Class of device occupying a tracked slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackedDeviceClass {
    Invalid = 0,
    Hmd = 1,
    Controller = 2,
    GenericTracker = 3,
    TrackingReference = 4,
    DisplayRedirect = 5,
}

/// One device's pose for one frame, with the runtime's validity bits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackedDevicePose {
    /// Device-to-absolute-tracking-space transform.
    pub device_to_absolute_tracking: HmdMatrix34,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub tracking_result: TrackingResult,
    pub pose_is_valid: bool,
    pub device_is_connected: bool,
}

impl Default for TrackedDevicePose {
    fn default() -> Self {
        Self::DISCONNECTED
    }
}

impl TrackedDevicePose {
    pub const DISCONNECTED: Self = Self {
        device_to_absolute_tracking: HmdMatrix34::IDENTITY,
        velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        tracking_result: TrackingResult::Uninitialized,
        pose_is_valid: false,
        device_is_connected: false,
    };

    /// A connected device with a valid pose at `transform`.
    pub fn tracked(transform: RigidTransform) -> Self {
        Self {
            device_to_absolute_tracking: transform.into(),
            tracking_result: TrackingResult::RunningOk,
            pose_is_valid: true,
            device_is_connected: true,
            ..Self::DISCONNECTED
        }
    }

    /// Whether the pose means anything this frame.
    pub fn is_usable(&self) -> bool {
        self.device_is_connected && self.pose_is_valid
    }
}

/// The snapshot of every device slot returned by one pose wait.
///
/// Never carried across frames; each wait produces a fresh one.
#[derive(Clone, Debug, PartialEq)]
pub struct DevicePoses {
    poses: Vec<TrackedDevicePose>,
}

impl Default for DevicePoses {
    fn default() -> Self {
        Self {
            poses: vec![TrackedDevicePose::DISCONNECTED; MAX_TRACKED_DEVICE_COUNT],
        }
    }
}

impl DevicePoses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, index: TrackedDeviceIndex, pose: TrackedDevicePose) {
        if let Some(slot) = self.poses.get_mut(index.as_usize()) {
            *slot = pose;
        }
    }

    pub fn get(&self, index: TrackedDeviceIndex) -> Option<&TrackedDevicePose> {
        self.poses.get(index.as_usize())
    }

    /// The pose in `index` if the device is connected and the pose valid.
    pub fn usable(&self, index: TrackedDeviceIndex) -> Option<&TrackedDevicePose> {
        self.get(index).filter(|pose| pose.is_usable())
    }

    /// Every slot whose device is connected and whose pose is valid.
    pub fn iter_usable(&self) -> impl Iterator<Item = (TrackedDeviceIndex, &TrackedDevicePose)> {
        self.poses
            .iter()
            .enumerate()
            .filter(|(_, pose)| pose.is_usable())
            .map(|(i, pose)| (TrackedDeviceIndex(i as u32), pose))
    }
}

/// Source of per-frame device poses.
pub trait PoseSource {
    /// Blocks until the runtime is ready to begin a new frame and returns every
    /// slot's pose.
    ///
    /// This is the frame pacing point of the loop. Runtime error codes come back
    /// as [`PoseAcquisitionError`], never as a stale snapshot.
    fn wait_poses(&mut self) -> Result<DevicePoses, PoseAcquisitionError>;
}
