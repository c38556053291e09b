//! Device Operations Traits
//!
//! This module defines the interface the model build pipeline needs from
//! the mount, dome, camera and plate solver. Commands are issued through
//! the traits and return as soon as the device accepted them; completion
//! is reported asynchronously as a [`DeviceEvent`] pushed into the
//! [`EventSink`] the driver was constructed with.
//!
//! The actual implementations live with the device drivers; [`crate::sim`]
//! provides simulated ones.

use crate::targets::PierSide;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, String>;

/// Mount readout at a given moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountTelemetry {
    /// Apparent RA of date in hours
    pub ra_jnow: f64,
    /// Apparent Dec of date in degrees
    pub dec_jnow: f64,
    /// Local sidereal time in hours
    pub sidereal_time: f64,
    pub julian_date: f64,
    pub pier_side: PierSide,
}

/// Parameters of a single exposure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureRequest {
    pub index: usize,
    pub image_path: PathBuf,
    pub exposure_time: f64,
    pub binning: u32,
    pub sub_frame: f64,
    pub fast_readout: bool,
}

/// Optional hint passed to the solver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveHint {
    pub ra_j2000: f64,
    pub dec_j2000: f64,
    pub focal_length: f64,
}

/// Plate solve request, tagged with the job index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveRequest {
    pub index: usize,
    pub image_path: PathBuf,
    pub hint: Option<SolveHint>,
}

/// Plate solve result, tagged with the job index of its request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveOutcome {
    pub index: usize,
    pub success: bool,
    /// J2000 RA in hours
    pub ra_j2000: f64,
    /// J2000 Dec in degrees
    pub dec_j2000: f64,
    pub angle: f64,
    pub scale: f64,
    pub error_rms: f64,
    pub flipped: bool,
    pub message: Option<String>,
}

impl SolveOutcome {
    pub fn failed(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            success: false,
            ra_j2000: 0.0,
            dec_j2000: 0.0,
            angle: 0.0,
            scale: 0.0,
            error_rms: 0.0,
            flipped: false,
            message: Some(message.into()),
        }
    }
}

/// Completion events delivered by the device drivers
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    MountSlewed,
    DomeSlewed,
    /// Shutter closed, frame captured
    ImageExposed,
    /// Frame read out from the camera
    ImageDownloaded,
    /// Frame written to disk
    ImageSaved { path: PathBuf },
    SolveResult(SolveOutcome),
}

/// Mount commands needed for a model build
#[async_trait]
pub trait Mount: Send + Sync {
    /// Set the slew target in horizontal coordinates (degrees)
    async fn set_target_alt_az(&self, altitude: f64, azimuth: f64) -> DeviceResult<()>;

    /// Start slewing to the target set before; completion is `MountSlewed`
    async fn start_slewing(&self) -> DeviceResult<()>;

    /// Current position, time and pier side
    async fn telemetry(&self) -> DeviceResult<MountTelemetry>;
}

/// Dome commands needed for a model build
#[async_trait]
pub trait Dome: Send + Sync {
    /// Slew the dome slit to the mount azimuth (degrees); completion is `DomeSlewed`
    async fn slew_dome(&self, azimuth: f64) -> DeviceResult<()>;
}

/// Camera commands needed for a model build
#[async_trait]
pub trait Camera: Send + Sync {
    /// Start an exposure; completion is `ImageExposed`, `ImageDownloaded`, `ImageSaved`
    async fn expose(&self, request: &ExposureRequest) -> DeviceResult<()>;
}

/// Plate solver commands needed for a model build
#[async_trait]
pub trait PlateSolver: Send + Sync {
    /// Queue a solve; completion is `SolveResult`
    async fn solve(&self, request: &SolveRequest) -> DeviceResult<()>;
}

pub type SharedMount = Arc<dyn Mount>;
pub type SharedDome = Arc<dyn Dome>;
pub type SharedCamera = Arc<dyn Camera>;
pub type SharedPlateSolver = Arc<dyn PlateSolver>;

/// The devices a model build drives
#[derive(Clone)]
pub struct Rig {
    pub mount: SharedMount,
    pub dome: Option<SharedDome>,
    pub camera: SharedCamera,
    pub solver: SharedPlateSolver,
}

impl Rig {
    pub fn new(mount: SharedMount, camera: SharedCamera, solver: SharedPlateSolver) -> Self {
        Self { mount, dome: None, camera, solver }
    }

    pub fn with_dome(mut self, dome: SharedDome) -> Self {
        self.dome = Some(dome);
        self
    }

    pub fn has_dome(&self) -> bool {
        self.dome.is_some()
    }
}

/// Sending half handed to the device drivers
///
/// Every event is stamped with a run generation. Drivers that complete a
/// command asynchronously should send through [`EventSink::for_command`],
/// taken when the command is issued, so a completion arriving after the next
/// run started is discarded instead of releasing that run's points.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<(u64, DeviceEvent)>,
    generation: Arc<AtomicU64>,
    stamp: Option<u64>,
}

impl EventSink {
    /// Sink bound to the run that is current right now
    pub fn for_command(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
            generation: self.generation.clone(),
            stamp: Some(self.generation.load(Ordering::SeqCst)),
        }
    }

    /// Deliver an event; returns false if the pipeline is gone
    pub fn send(&self, event: DeviceEvent) -> bool {
        let generation = self.stamp.unwrap_or_else(|| self.generation.load(Ordering::SeqCst));
        match self.tx.send((generation, event)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Dropping device event, pipeline receiver closed: {:?}", (e.0).1);
                false
            }
        }
    }
}

/// Receiving half owned by the pipeline
#[derive(Debug)]
pub struct EventInbox {
    rx: mpsc::UnboundedReceiver<(u64, DeviceEvent)>,
    generation: Arc<AtomicU64>,
}

impl EventInbox {
    /// Next event of the current run; events stamped for an earlier run are skipped
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        loop {
            let (generation, event) = self.rx.recv().await?;
            if generation == self.generation.load(Ordering::SeqCst) {
                return Some(event);
            }
            tracing::debug!("Discarding device event of run {}: {:?}", generation, event);
        }
    }

    /// Start a new run generation and discard everything queued so far.
    /// Returns the number of dropped events.
    pub fn begin_run(&mut self) -> usize {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Device event generation {}", generation);
        self.drain()
    }

    /// Discard everything queued so far, returns the number of dropped events
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok((_, event)) = self.rx.try_recv() {
            tracing::debug!("Discarding stale device event: {:?}", event);
            dropped += 1;
        }
        dropped
    }
}

/// Create the event channel connecting device drivers to the pipeline
pub fn device_events() -> (EventSink, EventInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let generation = Arc::new(AtomicU64::new(0));
    (
        EventSink {
            tx,
            generation: generation.clone(),
            stamp: None,
        },
        EventInbox { rx, generation },
    )
}
