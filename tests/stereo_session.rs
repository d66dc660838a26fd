//! End-to-end sessions on the software backend and simulated runtime.

use hmd_present::*;

fn symmetric_hmd() -> SimulatedHmd {
    SimulatedHmd::default()
        .with_symmetric_fov(90f32.to_radians())
        .with_ipd(0.07)
        .with_render_target_size(32, 32)
        .with_head_motion(HeadMotion::Static(RigidTransform::IDENTITY))
}

fn session(
    hmd: SimulatedHmd,
    config: SessionConfig,
) -> FramePresenter<SoftwareBackend, SimulatedRuntime, RecordingCompositor> {
    let runtime = SimulatedRuntime::init(hmd).unwrap();
    FramePresenter::new(config, SoftwareBackend::new(64, 64), runtime, RecordingCompositor::new()).unwrap()
}

fn timed_session(
    timeline: &Timeline,
    config: SessionConfig,
) -> FramePresenter<SoftwareBackend, SimulatedRuntime, RecordingCompositor> {
    let runtime = SimulatedRuntime::init(symmetric_hmd())
        .unwrap()
        .with_timeline(timeline.clone());
    let backend = SoftwareBackend::new(64, 64).with_timeline(timeline.clone());
    let compositor = RecordingCompositor::new().with_timeline(timeline.clone());
    FramePresenter::new(config, backend, runtime, compositor).unwrap()
}

#[test]
fn identity_head_gives_mirrored_eye_matrices() {
    let mut presenter = session(symmetric_hmd(), SessionConfig::new());
    presenter.present_frame(&mut ClearScene::default()).unwrap();

    let matrices = presenter.backend().view_projections();
    assert_eq!(matrices.len(), 2);
    let (left, right) = (matrices[0], matrices[1]);

    // Only the lateral component of the translation column differs, by sign.
    assert!(left.x_axis.abs_diff_eq(right.x_axis, 1e-6));
    assert!(left.y_axis.abs_diff_eq(right.y_axis, 1e-6));
    assert!(left.z_axis.abs_diff_eq(right.z_axis, 1e-6));
    assert!((left.w_axis.x + 0.035).abs() < 1e-6);
    assert!((right.w_axis.x - 0.035).abs() < 1e-6);
    assert!((left.w_axis.x + right.w_axis.x).abs() < 1e-6);
    assert_eq!(left.w_axis.y, right.w_axis.y);
    assert_eq!(left.w_axis.z, right.w_axis.z);
    assert_eq!(left.w_axis.w, right.w_axis.w);

    for matrix in [left, right] {
        let clip = matrix * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(clip.w > 0.0);
        assert!(ndc.abs().max_element() <= 1.0, "{ndc:?} outside the clip cube");
    }
}

#[test]
fn resize_recreates_both_targets_without_leaks() {
    let mut backend = SoftwareBackend::new(64, 64);
    {
        let runtime = SimulatedRuntime::init(SimulatedHmd::default()).unwrap();
        let mut presenter =
            FramePresenter::new(SessionConfig::new(), &mut backend, runtime, RecordingCompositor::new()).unwrap();
        let mut scene = ClearScene::default();
        presenter.present_frame(&mut scene).unwrap();
        assert_eq!(presenter.target_size(), Some(RenderTargetSize::new(1080, 1200)));

        let old = presenter.targets().unwrap();
        let old_textures = [old.get(Eye::Left).color_texture(), old.get(Eye::Right).color_texture()];
        let baseline = presenter.backend().live_resources();

        presenter.runtime_mut().set_recommended_size(1440, 1600);
        let report = presenter.present_frame(&mut scene).unwrap();
        assert_eq!(report.submitted, EyePair::new(true, true));
        assert_eq!(presenter.target_size(), Some(RenderTargetSize::new(1440, 1600)));
        assert_eq!(presenter.backend().live_resources(), baseline);
        for texture in old_textures {
            assert!(!presenter.backend().texture_exists(texture));
        }

        let targets = presenter.targets().unwrap();
        for eye in Eye::BOTH {
            let texture = targets.get(eye).color_texture();
            assert_eq!(presenter.backend().texture_size(texture), Some((1440, 1600)));
        }
    }
    assert_eq!(backend.live_resources(), ResourceCounts::default());
}

#[test]
fn stop_mid_frame_still_submits_and_flushes() {
    let timeline = Timeline::new();
    let mut presenter = timed_session(&timeline, SessionConfig::new());
    let stop = StopSignal::new();
    let handle = stop.handle();

    let mut scene = |backend: &mut SoftwareBackend, ctx: &EyeRenderContext<'_>| {
        if ctx.frame_index == 1 && ctx.eye == Eye::Left {
            handle.stop();
        }
        backend.clear([0.2, 0.2, 0.2, 1.0])
    };
    let summary = presenter.run(&mut scene, &stop).unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(summary.failed_frames, 0);
    assert_eq!(presenter.compositor().submissions().len(), 4);
    assert_eq!(presenter.backend().flush_count(), 2);

    let events = timeline.events();
    let last_wait = events.iter().rposition(|e| *e == TimelineEvent::WaitPoses).unwrap();
    let tail: Vec<_> = events[last_wait..]
        .iter()
        .filter(|e| matches!(e, TimelineEvent::Submit(..) | TimelineEvent::Flush))
        .collect();
    assert!(matches!(
        tail.as_slice(),
        [
            TimelineEvent::Submit(Eye::Left, _),
            TimelineEvent::Submit(Eye::Right, _),
            TimelineEvent::Flush
        ]
    ));
    assert_eq!(events.last(), Some(&TimelineEvent::Flush));
}

#[test]
fn every_frame_finishes_before_submitting_and_flushes_before_the_next_wait() {
    let timeline = Timeline::new();
    let mut presenter = timed_session(&timeline, SessionConfig::new().post_present_handoff(true));
    let mut scene = ClearScene::default();
    for _ in 0..3 {
        presenter.present_frame(&mut scene).unwrap();
    }

    let events = timeline.events();
    let frames: Vec<&[TimelineEvent]> = events
        .split(|e| *e == TimelineEvent::WaitPoses)
        .filter(|frame| !frame.is_empty())
        .collect();
    assert_eq!(frames.len(), 3);
    for frame in frames {
        let submits: Vec<_> = frame
            .iter()
            .filter_map(|e| match e {
                TimelineEvent::Submit(eye, _) => Some(*eye),
                _ => None,
            })
            .collect();
        assert_eq!(submits, vec![Eye::Left, Eye::Right]);

        let last_submit = frame.iter().rposition(|e| matches!(e, TimelineEvent::Submit(..))).unwrap();
        let first_clear = frame.iter().position(|e| matches!(e, TimelineEvent::Clear(_))).unwrap();
        assert!(first_clear < last_submit);
        let last_clear = frame.iter().rposition(|e| matches!(e, TimelineEvent::Clear(_))).unwrap();
        let finish = frame.iter().position(|e| *e == TimelineEvent::Finish).unwrap();
        let first_submit = frame.iter().position(|e| matches!(e, TimelineEvent::Submit(..))).unwrap();
        assert!(last_clear < finish && finish < first_submit);
        assert_eq!(frame.last(), Some(&TimelineEvent::Flush));
        assert!(frame.contains(&TimelineEvent::Handoff));
    }
}

#[test]
fn handle_to_destroyed_target_is_rejected() {
    let mut backend = SoftwareBackend::new(8, 8);
    let mut compositor = RecordingCompositor::new();

    let target = RenderTarget::create(&mut backend, 4, 4).unwrap();
    let texture = target.color_texture();
    target.destroy(&mut backend);

    let handle = SubmissionHandle::from_raw(texture, TextureType::OpenGl, ColorSpace::Gamma);
    let err = submit_checked(&backend, &mut compositor, Eye::Left, &handle, SubmitFlags::DEFAULT).unwrap_err();
    assert_eq!(err.failure, SubmissionFailure::StaleTexture(texture));
    assert!(err.is_persistent());
    assert!(compositor.submissions().is_empty());
}

#[test]
fn repeated_submit_failures_end_the_session() {
    let mut presenter = session(symmetric_hmd(), SessionConfig::new().max_consecutive_submit_failures(3));
    presenter
        .compositor_mut()
        .fail_next(CompositorErrorCode::DO_NOT_HAVE_FOCUS, 100);

    let err = presenter
        .run(&mut ClearScene::default(), &StopSignal::new())
        .unwrap_err();
    match err {
        SessionError::FrameLoop { frame_index, ref source } => {
            assert_eq!(frame_index, 2);
            assert!(matches!(source, FrameError::Submission(_)));
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), "frame loop");
    // Failed frames were still flushed.
    assert_eq!(presenter.backend().flush_count(), 3);
}

#[test]
fn intermittent_submit_failure_is_survived() {
    let mut presenter = session(symmetric_hmd(), SessionConfig::new().max_consecutive_submit_failures(2));
    let stop = StopSignal::new();
    let handle = stop.handle();
    presenter
        .compositor_mut()
        .fail_next(CompositorErrorCode::INVALID_TEXTURE, 1);

    let mut scene = |backend: &mut SoftwareBackend, ctx: &EyeRenderContext<'_>| {
        if ctx.frame_index == 5 {
            handle.stop();
        }
        backend.clear([0.0, 0.0, 0.0, 1.0])
    };
    let summary = presenter.run(&mut scene, &stop).unwrap();
    assert_eq!(summary.frames, 6);
    assert_eq!(summary.failed_frames, 1);
}

#[test]
fn lost_runtime_ends_the_session() {
    let mut presenter = session(symmetric_hmd(), SessionConfig::new().max_consecutive_pose_failures(4));
    presenter.runtime_mut().disconnect();

    let err = presenter
        .run(&mut ClearScene::default(), &StopSignal::new())
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::FrameLoop {
            frame_index: 3,
            source: FrameError::PoseAcquisition(_)
        }
    ));
    assert!(presenter.compositor().submissions().is_empty());
}

#[test]
fn invalid_poses_are_reused_and_counted() {
    let mut presenter = session(symmetric_hmd(), SessionConfig::new());
    let stop = StopSignal::new();
    let handle = stop.handle();
    let mut scene = ClearScene::default();

    presenter.present_frame(&mut scene).unwrap();
    presenter.runtime_mut().invalidate_next_poses(2);

    let mut stopping_scene = |backend: &mut SoftwareBackend, ctx: &EyeRenderContext<'_>| {
        if ctx.frame_index == 4 {
            handle.stop();
        }
        scene.render_eye(backend, ctx)
    };
    let summary = presenter.run(&mut stopping_scene, &stop).unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.stale_frames, 2);
    assert_eq!(presenter.compositor().submissions().len(), 10);
}

#[test]
fn headset_that_stays_invalid_ends_the_session() {
    let config = SessionConfig::new().max_consecutive_invalid_poses(5);
    let mut presenter = session(symmetric_hmd(), config);
    presenter.present_frame(&mut ClearScene::default()).unwrap();
    presenter.runtime_mut().invalidate_next_poses(100_000);

    let err = presenter
        .run(&mut ClearScene::default(), &StopSignal::new())
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::FrameLoop {
            frame_index: 5,
            source: FrameError::HmdPoseUnavailable
        }
    ));
    // Frames 1 to 4 reused the pose from frame 0.
    assert_eq!(presenter.compositor().submissions().len(), 10);
}

#[test]
fn degenerate_head_pose_rejects_both_eyes_but_keeps_looping() {
    let squashed = RigidTransform {
        rotation: Mat3::from_diagonal(Vec3::new(1.0, 0.5, 1.0)),
        translation: Vec3::ZERO,
    };
    let hmd = symmetric_hmd().with_head_motion(HeadMotion::Scripted(vec![squashed, RigidTransform::IDENTITY]));
    let mut presenter = session(hmd, SessionConfig::new());
    let mut scene = ClearScene::default();

    let report = presenter.present_frame(&mut scene).unwrap();
    assert_eq!(report.rendered, EyePair::new(false, false));
    assert_eq!(report.submitted, EyePair::new(false, false));
    assert!(presenter.compositor().submissions().is_empty());
    assert_eq!(presenter.backend().flush_count(), 1);

    let report = presenter.present_frame(&mut scene).unwrap();
    assert_eq!(report.submitted, EyePair::new(true, true));
}

#[test]
fn incomplete_framebuffer_aborts_startup_without_leaks() {
    let mut backend = SoftwareBackend::new(64, 64);
    backend.force_framebuffer_status(Some(FramebufferStatus::IncompleteAttachment));
    let runtime = SimulatedRuntime::init(symmetric_hmd()).unwrap();

    let err = FramePresenter::new(SessionConfig::new(), &mut backend, runtime, RecordingCompositor::new())
        .err()
        .unwrap();
    assert!(matches!(
        err,
        SessionError::FramebufferIncomplete(FramebufferIncompleteError {
            status: FramebufferStatus::IncompleteAttachment,
            width: 32,
            height: 32,
        })
    ));
    assert_eq!(err.stage(), "render target creation");
    assert_eq!(backend.live_resources(), ResourceCounts::default());
    assert_eq!(backend.bound_framebuffer(), FramebufferId::DEFAULT);
}

#[test]
fn missing_hmd_is_reported_with_runtime_symbol() {
    let err = SimulatedRuntime::init(SimulatedHmd::absent()).err().unwrap();
    let err = SessionError::from(err);
    assert_eq!(err.stage(), "runtime initialization");
    assert!(err.to_string().contains("VRInitError_Init_HmdNotFound"));
}

#[test]
fn injected_intrinsics_override_the_runtime() {
    let fov = FovTangents::symmetric(60f32.to_radians());
    let intrinsics = EyePair::from_fn(|eye| EyeIntrinsics {
        fov,
        eye_to_head: RigidTransform::from_translation(Vec3::new(
            if eye == Eye::Left { -0.03 } else { 0.03 },
            0.0,
            0.0,
        )),
    });
    let config = SessionConfig::new().intrinsics(IntrinsicsSource::Injected(intrinsics));
    let mut presenter = session(symmetric_hmd(), config);
    presenter.present_frame(&mut ClearScene::default()).unwrap();

    let left = presenter.backend().view_projections()[0];
    let expected = build_eye_view_projection(
        Eye::Left,
        &HmdMatrix34::IDENTITY,
        &intrinsics.left,
        ClipPlanes::default(),
        DepthRange::NegativeOneToOne,
    )
    .unwrap();
    assert!(left.abs_diff_eq(*expected.matrix(), 1e-6));
}
