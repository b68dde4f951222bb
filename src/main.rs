use anyhow::Context;
use robo_recorder::capture::mock::{MockCamera, MockController, MockSensor};
use robo_recorder::recorder::SessionEvent;
use robo_recorder::{CollectorConfig, Session, SourceKind};
use std::path::PathBuf;

const CONFIG_ENV: &str = "ROBO_RECORDER_CONFIG";

fn load_config() -> anyhow::Result<CollectorConfig> {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            CollectorConfig::load(&path)
                .with_context(|| format!("failed to load config from {:?}", path))
        }
        None => {
            let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
            Ok(CollectorConfig::new(format!("./data/session_{}", stamp)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    robo_recorder::init_logging();
    tracing::info!("Starting Robo Recorder v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    let mut session = Session::new(config);

    session.register("joint_pos", SourceKind::Sensor, 100.0, MockSensor::new(7))?;
    session.register("teleop", SourceKind::Controller, 50.0, MockController::new(6))?;
    session.register("camera_left", SourceKind::Camera, 30.0, MockCamera::new(320, 240))?;
    session.register("camera_right", SourceKind::Camera, 30.0, MockCamera::new(320, 240))?;

    let mut events = session.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SessionEvent::Error(message) = event {
                tracing::warn!("{}", message);
            }
        }
    });

    tracing::info!("Recording; press Ctrl-C to stop");
    let report = session.run_until_interrupted().await?;
    for source in report.sources.iter().filter(|s| s.enabled) {
        tracing::info!(
            "'{}': {} samples, {:.1} Hz realized of {} Hz nominal",
            source.name,
            source.sample_count,
            source.realized_frequency(report.duration()),
            source.nominal_frequency
        );
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
