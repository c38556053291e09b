//! Run a model build against the simulated rig.
//!
//! Usage: modelbuild-sim [config.json]
//!
//! `MODELBUILD_LOG_DIR` enables file logging, `MODELBUILD_IMAGE_DIR`
//! overrides where the (simulated) images are written. The finished model
//! is printed to stdout as JSON. Ctrl-C ends the run early and still
//! builds a model from the points solved so far.

use anyhow::Context;
use nightshade_modelbuild::sim::{sim_rig, SimSettings};
use nightshade_modelbuild::{
    device_events, init_logging, BuildEvent, ModelBuildConfig, ModelBuilder, TargetPoint,
};
use std::path::PathBuf;

/// Points on three altitude rings, azimuths staggered between rings
fn target_grid() -> Vec<TargetPoint> {
    let mut targets = Vec::new();
    for (ring, altitude) in [30.0, 50.0, 70.0].into_iter().enumerate() {
        let count = 8 - 2 * ring;
        let offset = if ring % 2 == 1 { 180.0 / count as f64 } else { 0.0 };
        for i in 0..count {
            let azimuth = offset + 360.0 * i as f64 / count as f64;
            targets.push(TargetPoint::new(altitude, azimuth));
        }
    }
    targets
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_dir = std::env::var_os("MODELBUILD_LOG_DIR").map(PathBuf::from);
    let _guard = init_logging(log_dir.as_deref())?;

    let config = match std::env::args().nth(1) {
        Some(path) => ModelBuildConfig::load(&path).with_context(|| format!("loading config {}", path))?,
        None => ModelBuildConfig::default(),
    };

    let image_dir = std::env::var_os("MODELBUILD_IMAGE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("modelbuild-sim"));

    let settings = SimSettings {
        latitude: config.site.latitude,
        ..Default::default()
    };
    let (sink, inbox) = device_events();
    let rig = sim_rig(&settings, &sink);
    let mut builder = ModelBuilder::new(rig, inbox, config)?;

    let control = builder.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, ending model build");
            control.end();
        }
    });

    let mut events = builder.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                BuildEvent::Progress(p) => tracing::info!(
                    "Model progress: {}/{} ({}%), solved {}, about {:.0}s left",
                    p.count,
                    p.number,
                    p.percent,
                    p.solved,
                    p.estimated_remaining_secs
                ),
                BuildEvent::CommandRejected { index, command, reason } => {
                    tracing::warn!("Point {} stalled, {} rejected: {}", index, command, reason)
                }
                _ => {}
            }
        }
    });

    let targets = target_grid();
    let result = builder.run(&targets, &image_dir, "sim").await?;

    match result {
        Some(model) => println!("{}", model.to_json_string()?),
        None => tracing::warn!("No model built, state {:?}", builder.state()),
    }
    Ok(())
}
