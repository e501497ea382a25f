//! Proximity guard - main entry point

use std::path::PathBuf;
use std::sync::Arc;

use alerting::LoggingAlarm;
use anyhow::Context;
use camera_capture::SyntheticCamera;
use face_distance::{DistanceEstimator, MockFaceDetector};
use guard::{init_logging, spawn_pipeline, GuardConfig, LoggingDisplay, PipelineParts};
use photo_upload::HttpUploader;
use storage::FileCalibrationStore;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "proximity-guard.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    info!("=== Proximity Guard v{} ===", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let config = GuardConfig::load(Some(config_path.as_path())).context("loading configuration")?;

    let camera = Arc::new(SyntheticCamera::new(config.camera.clone()).context("opening camera")?);
    let detector = Arc::new(MockFaceDetector::new(60));
    let store = FileCalibrationStore::new(&config.calibration.path);
    let mut estimator = DistanceEstimator::new(config.estimator.clone(), Box::new(store))
        .context("creating distance estimator")?;
    if !estimator.is_calibrated() {
        if config.calibration.auto_calibrate {
            info!(
                "Not calibrated; hold a face at {} cm while {} samples are taken",
                config.estimator.known_distance_cm, config.estimator.calibration_samples
            );
            estimator.start_calibration();
        } else {
            warn!("Not calibrated and auto-calibration disabled; distance alerts are off");
        }
    }
    let uploader = HttpUploader::new(config.upload.clone()).context("creating uploader")?;

    let handle = spawn_pipeline(
        PipelineParts {
            source: camera,
            detector,
            estimator,
            uploader,
            alarm: Arc::new(LoggingAlarm::new()),
            display: Arc::new(LoggingDisplay::new()),
        },
        &config,
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Interrupt received");
        }
        _ = handle.stopped() => {}
    }

    let report = handle.shutdown().await?;
    info!(
        "Frames captured={} processed={} rendered={} released={}; uploads={}",
        report.stats.captured,
        report.stats.processed,
        report.stats.rendered,
        report.stats.released,
        report.mode.completed_uploads
    );

    if let Some(stage) = report.stalled {
        error!("Exiting after watchdog trip in {} stage", stage.label());
        std::process::exit(2);
    }

    Ok(())
}
