use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use hmd_present::{
    ClearScene, Eye, FramePresenter, GraphicsBackend, HeadMotion, RecordingCompositor, RunSummary, SessionConfig,
    SessionError, SimulatedHmd, SimulatedRuntime, SoftwareBackend, StopSignal, WgpuBackend,
};

const DEFAULT_SECONDS: u64 = 5;

fn run_session<B: GraphicsBackend>(backend: B, runtime: SimulatedRuntime) -> Result<RunSummary, SessionError> {
    let config = SessionConfig::new()
        .refresh_rate(90.0)
        .post_present_handoff(true)
        .capture_every(180, Eye::Left);

    let mut presenter = FramePresenter::new(config, backend, runtime, RecordingCompositor::new())?;

    let seconds = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_SECONDS);
    let stop = StopSignal::with_timeout(Duration::from_secs(seconds));

    let summary = presenter.run(&mut ClearScene::pulsing(), &stop);
    log::info!(
        "compositor received {} submissions, {} handoffs",
        presenter.compositor().submissions().len(),
        presenter.compositor().handoffs()
    );
    presenter.shutdown();
    summary
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let hmd = SimulatedHmd::default()
        .with_refresh_rate(90.0)
        .with_head_motion(HeadMotion::Sway {
            height: 1.6,
            amplitude_radians: 0.4,
            period_frames: 270,
        });
    let runtime = match SimulatedRuntime::init(hmd) {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!("no HMD session: {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match WgpuBackend::new_headless() {
        Ok(backend) => run_session(backend, runtime),
        Err(err) => {
            log::warn!("GPU unavailable ({err}); falling back to the software backend");
            run_session(SoftwareBackend::new(640, 480), runtime)
        }
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            log::error!("session failed during {}: {err}", err.stage());
            return ExitCode::FAILURE;
        }
    };

    let out_dir = PathBuf::from("snapshots");
    if !summary.snapshots.is_empty() {
        if let Err(err) = std::fs::create_dir_all(&out_dir) {
            log::error!("cannot create {}: {err}", out_dir.display());
            return ExitCode::FAILURE;
        }
    }
    for snapshot in &summary.snapshots {
        let path = out_dir.join(snapshot.default_file_name());
        match snapshot.save_png(&path) {
            Ok(()) => log::info!("saved {}", path.display()),
            Err(err) => log::warn!("could not save {}: {err}", path.display()),
        }
    }

    ExitCode::SUCCESS
}
