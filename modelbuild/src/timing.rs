//! Pipeline overlap policy
//!
//! Decides which camera lifecycle event releases the slew to the next
//! target point. The earlier the release, the more mount/dome motion
//! overlaps with readout and disk I/O of the previous frame.

use serde::{Deserialize, Serialize};

/// Camera lifecycle events the exposure stage reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraStage {
    Exposed,
    Downloaded,
    Saved,
}

/// How early the next slew may start relative to the current exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingPolicy {
    /// Next slew after the image is saved. Fully sequential.
    #[default]
    Conservative = 0,
    /// Next slew after the image is downloaded from the camera
    Normal = 1,
    /// Next slew as soon as the shutter closes
    Progressive = 2,
}

impl TimingPolicy {
    /// Camera event at which the next slew is released
    pub fn release_stage(self) -> CameraStage {
        match self {
            TimingPolicy::Conservative => CameraStage::Saved,
            TimingPolicy::Normal => CameraStage::Downloaded,
            TimingPolicy::Progressive => CameraStage::Exposed,
        }
    }

    /// True if `stage` is the event that releases the next slew
    pub fn releases_next_slew(self, stage: CameraStage) -> bool {
        self.release_stage() == stage
    }
}

impl TryFrom<u8> for TimingPolicy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TimingPolicy::Conservative),
            1 => Ok(TimingPolicy::Normal),
            2 => Ok(TimingPolicy::Progressive),
            other => Err(format!("Unknown timing policy {}", other)),
        }
    }
}

impl std::fmt::Display for TimingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimingPolicy::Conservative => write!(f, "conservative"),
            TimingPolicy::Normal => write!(f, "normal"),
            TimingPolicy::Progressive => write!(f, "progressive"),
        }
    }
}
