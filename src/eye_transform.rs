//! Per-eye view-projection matrices.
//!
//! Every frame, each eye's matrix is composed from three parts:
//!
//! ```text
//! view_projection = projection(eye) · eye_to_head(eye) · inverse(head_pose)
//! ```
//!
//! All matrices act on column vectors to their right, so a world point is first
//! brought into head space, then offset into the eye, then projected. The order
//! is not commutative. Swapping the first two factors still yields a plausible
//! frustum whose stereo geometry is wrong.
//!
//! Intrinsics (frustum tangents and the eye-to-head offset) are near-static and
//! cached per eye by [`EyeTransformBuilder`]. The builder either queries them
//! from the runtime ([`IntrinsicsSource::LiveQuery`]) or uses fixed values
//! ([`IntrinsicsSource::Injected`]) so tests run without an HMD.
//!
//! # Example
//!
//! ```
//! use hmd_present::*;
//!
//! let intrinsics = EyeIntrinsics {
//!     fov: FovTangents::symmetric(90f32.to_radians()),
//!     eye_to_head: RigidTransform::from_translation(Vec3::new(-0.035, 0.0, 0.0)),
//! };
//! let vp = build_eye_view_projection(
//!     Eye::Left,
//!     &HmdMatrix34::IDENTITY,
//!     &intrinsics,
//!     ClipPlanes::default(),
//!     DepthRange::NegativeOneToOne,
//! )
//! .unwrap();
//! assert!(vp.ndc_point(Vec3::new(0.0, 0.0, -1.0)).abs().max_element() <= 1.0);
//! ```

use glam::{Mat4, Vec3, Vec4};

use crate::error::DegenerateTransformError;
use crate::eye::{Eye, EyePair};
use crate::pose::{HmdMatrix34, RigidTransform};
use crate::tracking::TrackingSystem;

/// Tangents of an eye's frustum half-angles.
///
/// `left` and `bottom` are negative for a frustum that contains the view axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FovTangents {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
}

impl FovTangents {
    /// A frustum with the same full angle horizontally and vertically.
    pub fn symmetric(fov_radians: f32) -> Self {
        let t = (fov_radians * 0.5).tan();
        Self {
            left: -t,
            right: t,
            bottom: -t,
            top: t,
        }
    }

    /// Off-axis perspective projection for a right-handed view space looking
    /// down -Z.
    pub fn projection(&self, clip: ClipPlanes, depth_range: DepthRange) -> Mat4 {
        let ClipPlanes { near, far } = clip;
        let width = self.right - self.left;
        let height = self.top - self.bottom;
        let depth = far - near;

        let (z_scale, z_offset) = match depth_range {
            DepthRange::NegativeOneToOne => (-(far + near) / depth, -2.0 * far * near / depth),
            DepthRange::ZeroToOne => (-far / depth, -far * near / depth),
        };

        Mat4::from_cols(
            Vec4::new(2.0 / width, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / height, 0.0, 0.0),
            Vec4::new(
                (self.right + self.left) / width,
                (self.top + self.bottom) / height,
                z_scale,
                -1.0,
            ),
            Vec4::new(0.0, 0.0, z_offset, 0.0),
        )
    }
}

/// Near and far clip distances, both positive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipPlanes {
    pub near: f32,
    pub far: f32,
}

impl ClipPlanes {
    pub fn new(near: f32, far: f32) -> Self {
        Self { near, far }
    }
}

impl Default for ClipPlanes {
    fn default() -> Self {
        Self {
            near: 0.01,
            far: 100.0,
        }
    }
}

/// Clip-space depth convention of the rendering backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthRange {
    /// OpenGL: depth maps to `[-1, 1]`.
    NegativeOneToOne,
    /// Vulkan, Metal, D3D, wgpu: depth maps to `[0, 1]`.
    ZeroToOne,
}

/// Near-static optical data for one eye.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeIntrinsics {
    pub fov: FovTangents,
    pub eye_to_head: RigidTransform,
}

/// One eye's composed view-projection matrix for one frame.
///
/// Deliberately neither `Clone` nor `Copy`: each frame builds its own.
#[derive(Debug, PartialEq)]
pub struct EyeViewProjection {
    eye: Eye,
    matrix: Mat4,
}

impl EyeViewProjection {
    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.matrix
    }

    /// Clip-space position of a world point.
    pub fn clip_point(&self, world: Vec3) -> Vec4 {
        self.matrix * world.extend(1.0)
    }

    /// Normalized device coordinates of a world point.
    pub fn ndc_point(&self, world: Vec3) -> Vec3 {
        let clip = self.clip_point(world);
        clip.truncate() / clip.w
    }
}

/// Composes `projection · eye_to_head · inverse(head)`.
fn compose(
    head: &RigidTransform,
    intrinsics: &EyeIntrinsics,
    clip: ClipPlanes,
    depth_range: DepthRange,
) -> Mat4 {
    let view = head.inverse().to_mat4();
    let eye_to_head = intrinsics.eye_to_head.to_mat4();
    let projection = intrinsics.fov.projection(clip, depth_range);
    projection * eye_to_head * view
}

/// Builds one eye's view-projection from the HMD's device-to-tracking pose.
///
/// Only call this with a pose the runtime flagged valid. What to do with an
/// invalid pose is the caller's decision.
pub fn build_eye_view_projection(
    eye: Eye,
    head_pose: &HmdMatrix34,
    intrinsics: &EyeIntrinsics,
    clip: ClipPlanes,
    depth_range: DepthRange,
) -> Result<EyeViewProjection, DegenerateTransformError> {
    let head = RigidTransform::from_hmd34(head_pose)?;
    Ok(EyeViewProjection {
        eye,
        matrix: compose(&head, intrinsics, clip, depth_range),
    })
}

/// Where the builder gets each eye's intrinsics from.
#[derive(Clone, Debug, PartialEq)]
pub enum IntrinsicsSource {
    /// Query the tracking runtime, once per eye until invalidated.
    LiveQuery,
    /// Use fixed values and never touch the runtime.
    Injected(EyePair<EyeIntrinsics>),
}

/// Caches eye intrinsics and builds per-frame view-projections.
#[derive(Debug)]
pub struct EyeTransformBuilder {
    source: IntrinsicsSource,
    clip: ClipPlanes,
    depth_range: DepthRange,
    cache: EyePair<Option<EyeIntrinsics>>,
}

impl EyeTransformBuilder {
    pub fn new(source: IntrinsicsSource, clip: ClipPlanes, depth_range: DepthRange) -> Self {
        Self {
            source,
            clip,
            depth_range,
            cache: EyePair::default(),
        }
    }

    pub fn clip_planes(&self) -> ClipPlanes {
        self.clip
    }

    pub fn depth_range(&self) -> DepthRange {
        self.depth_range
    }

    /// Drops cached live intrinsics, e.g. after the HMD was reconfigured.
    pub fn invalidate(&mut self) {
        self.cache = EyePair::default();
    }

    /// The eye's intrinsics, queried from `system` on a cache miss.
    pub fn intrinsics<S>(&mut self, eye: Eye, system: &S) -> Result<EyeIntrinsics, DegenerateTransformError>
    where
        S: TrackingSystem + ?Sized,
    {
        if let IntrinsicsSource::Injected(fixed) = &self.source {
            return Ok(*fixed.get(eye));
        }
        if let Some(cached) = self.cache.get(eye) {
            return Ok(*cached);
        }
        let intrinsics = EyeIntrinsics {
            fov: system.projection_raw(eye),
            eye_to_head: RigidTransform::from_hmd34(&system.eye_to_head_transform(eye))?,
        };
        log::debug!("cached {eye} eye intrinsics: {intrinsics:?}");
        *self.cache.get_mut(eye) = Some(intrinsics);
        Ok(intrinsics)
    }

    /// Builds the eye's matrix for this frame's head pose.
    pub fn build<S>(
        &mut self,
        eye: Eye,
        head_pose: &HmdMatrix34,
        system: &S,
    ) -> Result<EyeViewProjection, DegenerateTransformError>
    where
        S: TrackingSystem + ?Sized,
    {
        let intrinsics = self.intrinsics(eye, system)?;
        build_eye_view_projection(eye, head_pose, &intrinsics, self.clip, self.depth_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{TrackedDeviceClass, TrackedDeviceIndex};
    use crate::tracking::RenderTargetSize;
    use glam::{Mat3, Quat};
    use std::cell::Cell;

    /// Canonical pose/projection pair with literal expected values.
    fn canonical() -> (HmdMatrix34, EyeIntrinsics, ClipPlanes) {
        // Head at (0.5, 1.6, -0.25), turned 90° about +Y.
        let head = HmdMatrix34 {
            m: [
                [0.0, 0.0, 1.0, 0.5],
                [0.0, 1.0, 0.0, 1.6],
                [-1.0, 0.0, 0.0, -0.25],
            ],
        };
        let intrinsics = EyeIntrinsics {
            fov: FovTangents {
                left: -1.2,
                right: 1.0,
                bottom: -1.1,
                top: 0.9,
            },
            eye_to_head: RigidTransform::from_translation(Vec3::new(-0.032, 0.0, 0.015)),
        };
        (head, intrinsics, ClipPlanes { near: 0.1, far: 100.0 })
    }

    /// Written row by row, as on paper.
    fn rows(r: [[f32; 4]; 4]) -> Mat4 {
        Mat4::from_cols_array_2d(&r).transpose()
    }

    #[test]
    fn composition_matches_reference_matrix() {
        let (head, intrinsics, clip) = canonical();
        let vp = build_eye_view_projection(
            Eye::Left,
            &head,
            &intrinsics,
            clip,
            DepthRange::NegativeOneToOne,
        )
        .unwrap();

        let reference = rows([
            [-0.0909091, 0.0, -0.9090909, -0.2122727],
            [-0.1, 1.0, 0.0, -1.5515],
            [-1.002002, 0.0, 0.0, 0.2857708],
            [-1.0, 0.0, 0.0, 0.485],
        ]);
        assert!(vp.matrix().abs_diff_eq(reference, 1e-5), "{:?}", vp.matrix());

        let clip_pos = vp.clip_point(Vec3::new(-2.5, 1.4, 0.3));
        let expected = Vec4::new(-0.2577273, 0.0985, 2.7907758, 2.985);
        assert!(clip_pos.abs_diff_eq(expected, 1e-4), "{clip_pos:?}");
    }

    #[test]
    fn swapped_eye_offset_and_projection_is_detected() {
        let (head, intrinsics, clip) = canonical();
        let head_rigid = RigidTransform::from_hmd34(&head).unwrap();
        let projection = intrinsics.fov.projection(clip, DepthRange::NegativeOneToOne);
        let swapped = intrinsics.eye_to_head.to_mat4() * projection * head_rigid.inverse().to_mat4();

        let point = Vec3::new(-2.5, 1.4, 0.3).extend(1.0);
        let wrong = swapped * point;
        // The wrong order lands measurably elsewhere.
        assert!(wrong.abs_diff_eq(Vec4::new(-0.3232727, 0.1, 2.8508058, 3.0), 1e-4));

        let right = compose(&head_rigid, &intrinsics, clip, DepthRange::NegativeOneToOne) * point;
        assert!((right - wrong).length() > 0.05);
    }

    #[test]
    fn symmetric_stereo_pair_differs_only_in_lateral_translation() {
        let clip = ClipPlanes { near: 0.01, far: 100.0 };
        let fov = FovTangents::symmetric(90f32.to_radians());
        let eye = |x: f32| EyeIntrinsics {
            fov,
            eye_to_head: RigidTransform::from_translation(Vec3::new(x, 0.0, 0.0)),
        };
        let build = |e, i: &EyeIntrinsics| {
            build_eye_view_projection(e, &HmdMatrix34::IDENTITY, i, clip, DepthRange::NegativeOneToOne)
                .unwrap()
        };
        let left = build(Eye::Left, &eye(-0.035));
        let right = build(Eye::Right, &eye(0.035));

        let l = left.matrix().to_cols_array_2d();
        let r = right.matrix().to_cols_array_2d();
        for col in 0..4 {
            for row in 0..4 {
                if (col, row) == (3, 0) {
                    assert!((l[col][row] + 0.035).abs() < 1e-6);
                    assert!((r[col][row] - 0.035).abs() < 1e-6);
                } else {
                    assert_eq!(l[col][row], r[col][row], "col {col} row {row}");
                }
            }
        }

        for vp in [&left, &right] {
            let ndc = vp.ndc_point(Vec3::new(0.0, 0.0, -1.0));
            assert!(ndc.abs().max_element() <= 1.0, "{ndc:?}");
        }
    }

    #[test]
    fn zero_to_one_depth_maps_near_and_far_planes() {
        let clip = ClipPlanes { near: 0.5, far: 20.0 };
        let projection = FovTangents::symmetric(1.2).projection(clip, DepthRange::ZeroToOne);
        let near = projection.project_point3(Vec3::new(0.0, 0.0, -0.5));
        let far = projection.project_point3(Vec3::new(0.0, 0.0, -20.0));
        assert!(near.z.abs() < 1e-5);
        assert!((far.z - 1.0).abs() < 1e-5);

        let gl = FovTangents::symmetric(1.2).projection(clip, DepthRange::NegativeOneToOne);
        assert!((gl.project_point3(Vec3::new(0.0, 0.0, -0.5)).z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn degenerate_head_pose_is_rejected() {
        let (mut head, intrinsics, clip) = canonical();
        head.m[0][2] = 3.0;
        let err = build_eye_view_projection(Eye::Right, &head, &intrinsics, clip, DepthRange::ZeroToOne);
        assert!(err.is_err());
    }

    struct CountingSystem {
        queries: Cell<u32>,
    }

    impl TrackingSystem for CountingSystem {
        fn recommended_render_target_size(&self) -> RenderTargetSize {
            RenderTargetSize::new(16, 16)
        }

        fn projection_raw(&self, _eye: Eye) -> FovTangents {
            self.queries.set(self.queries.get() + 1);
            FovTangents::symmetric(1.5)
        }

        fn eye_to_head_transform(&self, eye: Eye) -> HmdMatrix34 {
            let x = if eye == Eye::Left { -0.03 } else { 0.03 };
            RigidTransform::from_translation(Vec3::new(x, 0.0, 0.0)).into()
        }

        fn tracked_device_class(&self, _index: TrackedDeviceIndex) -> TrackedDeviceClass {
            TrackedDeviceClass::Invalid
        }

        fn is_tracked_device_connected(&self, _index: TrackedDeviceIndex) -> bool {
            false
        }
    }

    #[test]
    fn live_intrinsics_are_cached_per_eye_until_invalidated() {
        let system = CountingSystem { queries: Cell::new(0) };
        let mut builder =
            EyeTransformBuilder::new(IntrinsicsSource::LiveQuery, ClipPlanes::default(), DepthRange::ZeroToOne);

        for _ in 0..3 {
            builder.build(Eye::Left, &HmdMatrix34::IDENTITY, &system).unwrap();
            builder.build(Eye::Right, &HmdMatrix34::IDENTITY, &system).unwrap();
        }
        assert_eq!(system.queries.get(), 2);

        builder.invalidate();
        let left = builder.intrinsics(Eye::Left, &system).unwrap();
        assert_eq!(system.queries.get(), 3);
        assert_eq!(left.eye_to_head.translation.x, -0.03);
    }

    #[test]
    fn injected_intrinsics_never_query_the_runtime() {
        let system = CountingSystem { queries: Cell::new(0) };
        let fixed = EyeIntrinsics {
            fov: FovTangents::symmetric(1.0),
            eye_to_head: RigidTransform::from_rotation_translation(Quat::IDENTITY, Vec3::X * 0.05),
        };
        let mut builder = EyeTransformBuilder::new(
            IntrinsicsSource::Injected(EyePair::new(fixed, fixed)),
            ClipPlanes::default(),
            DepthRange::NegativeOneToOne,
        );
        let vp = builder.build(Eye::Right, &HmdMatrix34::IDENTITY, &system).unwrap();
        assert_eq!(system.queries.get(), 0);
        assert_eq!(vp.eye(), Eye::Right);
        assert_eq!(fixed.eye_to_head.rotation, Mat3::IDENTITY);
    }
}
