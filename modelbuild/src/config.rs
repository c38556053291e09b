//! Model build configuration
//!
//! Everything a run needs besides the target list and the devices. All
//! fields have defaults, so a JSON file only has to name what it changes.

use crate::error::{ModelBuildError, ModelBuildResult};
use crate::timing::TimingPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for exposure and settle times in seconds
pub const MAX_WAIT_SECS: f64 = 3600.0;

/// Camera parameters copied into every job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Exposure duration in seconds
    pub exposure_time: f64,
    pub binning: u32,
    /// Sub frame in percent of the full sensor
    pub sub_frame: f64,
    pub fast_readout: bool,
    /// Focal length in millimeters, passed on as a solve hint
    pub focal_length: f64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure_time: 3.0,
            binning: 1,
            sub_frame: 100.0,
            fast_readout: true,
            focal_length: 0.0,
        }
    }
}

/// Metadata written into the resulting model
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteInfo {
    /// Site latitude in degrees
    pub latitude: f64,
    pub version: String,
    pub profile: String,
    pub firmware: String,
}

/// Configuration for a model build run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelBuildConfig {
    pub timing: TimingPolicy,
    /// Additional passes over points that failed to solve
    pub retries: u32,
    /// Run every other retry pass in reverse point order
    pub retries_reversed: bool,
    /// Wait between the slew rendezvous and the exposure start, in seconds
    pub settle_time_secs: f64,
    /// Wake-up interval of the run loop while waiting, in milliseconds
    pub poll_interval_ms: u64,
    /// Models with fewer successful points are discarded
    pub min_points: usize,
    pub plate_solve_app: String,
    pub camera: CameraSettings,
    pub site: SiteInfo,
}

impl Default for ModelBuildConfig {
    fn default() -> Self {
        Self {
            timing: TimingPolicy::Conservative,
            retries: 0,
            retries_reversed: false,
            settle_time_secs: 0.0,
            poll_interval_ms: 500,
            min_points: 3,
            plate_solve_app: String::new(),
            camera: CameraSettings::default(),
            site: SiteInfo::default(),
        }
    }
}

impl ModelBuildConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> ModelBuildResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> ModelBuildResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loading model build config from {}", path.as_ref().display());
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> ModelBuildResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Wait between the end of a slew and the exposure start
    pub fn settle_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.settle_time_secs.min(MAX_WAIT_SECS)).unwrap_or_default()
    }

    pub fn validate(&self) -> ModelBuildResult<()> {
        if !(self.camera.exposure_time > 0.0 && self.camera.exposure_time <= MAX_WAIT_SECS) {
            return Err(ModelBuildError::InvalidConfig(format!(
                "exposure time must be in (0, {}] s, got {}",
                MAX_WAIT_SECS,
                self.camera.exposure_time
            )));
        }
        if self.camera.binning == 0 {
            return Err(ModelBuildError::InvalidConfig("binning must be at least 1".into()));
        }
        if !(0.0..=MAX_WAIT_SECS).contains(&self.settle_time_secs) {
            return Err(ModelBuildError::InvalidConfig(format!(
                "settle time must be in [0, {}] s, got {}",
                MAX_WAIT_SECS, self.settle_time_secs
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ModelBuildError::InvalidConfig("poll interval must be at least 1 ms".into()));
        }
        if !(-90.0..=90.0).contains(&self.site.latitude) {
            return Err(ModelBuildError::InvalidConfig(format!(
                "latitude {} out of range",
                self.site.latitude
            )));
        }
        Ok(())
    }
}
