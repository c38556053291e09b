//! Target points and per-point job records

use crate::config::ModelBuildConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Horizontal position to slew to, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPoint {
    pub altitude: f64,
    pub azimuth: f64,
}

impl TargetPoint {
    pub fn new(altitude: f64, azimuth: f64) -> Self {
        Self { altitude, azimuth }
    }
}

impl From<(f64, f64)> for TargetPoint {
    fn from((altitude, azimuth): (f64, f64)) -> Self {
        Self { altitude, azimuth }
    }
}

/// Side of the pier the optical tube is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PierSide {
    East,
    West,
    Unknown,
}

impl std::fmt::Display for PierSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PierSide::East => write!(f, "E"),
            PierSide::West => write!(f, "W"),
            PierSide::Unknown => write!(f, "?"),
        }
    }
}

/// Solve state of a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointStatus {
    #[default]
    Pending,
    Solved,
    Failed,
}

/// Mount position captured at exposure start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSnapshot {
    pub ra_jnow: f64,
    pub dec_jnow: f64,
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    /// Local sidereal time in hours
    pub sidereal_time: f64,
    pub julian_date: f64,
    pub pier_side: PierSide,
    pub captured_at: DateTime<Utc>,
}

/// Plate-solved position of a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedCoordinates {
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    pub ra_jnow: f64,
    pub dec_jnow: f64,
    /// Position angle in degrees
    pub angle: f64,
    /// Image scale in arcsec per pixel
    pub scale: f64,
    /// Solver fit error in arcsec
    pub error_rms: f64,
    pub flipped: bool,
}

/// Per-point errors reported back by the mount after it computed the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointErrors {
    /// Arcseconds
    pub error_rms: f64,
    pub error_ra: f64,
    pub error_dec: f64,
    /// Degrees
    pub error_angle: f64,
}

/// Everything the pipeline knows about one target point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub index: usize,
    pub altitude: f64,
    pub azimuth: f64,
    pub image_path: PathBuf,
    pub exposure_time: f64,
    pub binning: u32,
    pub sub_frame: f64,
    pub fast_readout: bool,
    pub plate_solve_app: String,
    pub focal_length: f64,
    pub settle_time: f64,
    /// Model name this point belongs to
    pub name: String,
    pub status: PointStatus,
    pub mount: Option<MountSnapshot>,
    pub solved: Option<SolvedCoordinates>,
    pub errors: Option<PointErrors>,
    pub message: Option<String>,
}

impl JobRecord {
    pub fn is_solved(&self) -> bool {
        self.status == PointStatus::Solved
    }

    pub fn target(&self) -> TargetPoint {
        TargetPoint::new(self.altitude, self.azimuth)
    }
}

/// File name of the image taken for point `index`
pub fn image_file_name(index: usize) -> String {
    format!("image-{:03}.fits", index)
}

/// Build one job record per target point
pub fn prepare_jobs(
    targets: &[TargetPoint],
    image_dir: &Path,
    model_name: &str,
    config: &ModelBuildConfig,
) -> Vec<JobRecord> {
    tracing::debug!("Preparing {} model points for '{}'", targets.len(), model_name);

    targets
        .iter()
        .enumerate()
        .map(|(index, point)| JobRecord {
            index,
            altitude: point.altitude,
            azimuth: point.azimuth,
            image_path: image_dir.join(image_file_name(index)),
            exposure_time: config.camera.exposure_time,
            binning: config.camera.binning,
            sub_frame: config.camera.sub_frame,
            fast_readout: config.camera.fast_readout,
            plate_solve_app: config.plate_solve_app.clone(),
            focal_length: config.camera.focal_length,
            settle_time: config.settle_time_secs,
            name: model_name.to_string(),
            status: PointStatus::Pending,
            mount: None,
            solved: None,
            errors: None,
            message: None,
        })
        .collect()
}
