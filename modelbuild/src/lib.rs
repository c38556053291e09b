// Nightshade Model Build
//
// Drives mount, dome, camera and plate solver through a pipelined
// slew/expose/solve cycle over a list of target points and assembles the
// resulting pointing model.

pub mod collector;
pub mod config;
pub mod control;
pub mod device_ops;
pub mod error;
pub mod executor;
pub mod exposure;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod pointers;
pub mod sim;
pub mod slew;
pub mod solve;
pub mod targets;
pub mod timing;
pub mod transform;

pub use collector::ModelProgress;
pub use config::{CameraSettings, ModelBuildConfig, SiteInfo};
pub use control::{RunControl, StopRequest};
pub use device_ops::*;
pub use error::{ModelBuildError, ModelBuildResult};
pub use executor::{BuildEvent, BuildState, ModelBuilder};
pub use logging::init_logging;
pub use model::{AlignStarError, ModelResult, ProgPoint, RunMetadata};
pub use pipeline::PassOutcome;
pub use pointers::{Cursor, PointerSet};
pub use targets::*;
pub use timing::{CameraStage, TimingPolicy};
