//! Simulated devices
//!
//! A mount, dome, camera and plate solver that accept every reasonable
//! command, take a configurable amount of time and report completion
//! through the event sink like real drivers do. Used by the
//! `modelbuild-sim` binary and the integration tests.

use crate::device_ops::{
    Camera, DeviceEvent, DeviceResult, Dome, EventSink, ExposureRequest, Mount, MountTelemetry, PlateSolver,
    Rig, SolveOutcome, SolveRequest,
};
use crate::targets::{PierSide, TargetPoint};
use crate::transform::{alt_az_to_equatorial, julian_day, local_sidereal_time, normalize_hours};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Behaviour of the simulated rig
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub slew_time: Duration,
    pub dome_time: Duration,
    pub download_time: Duration,
    pub save_time: Duration,
    pub solve_time: Duration,
    pub with_dome: bool,
    /// Targets below this altitude are refused by the mount
    pub horizon: f64,
    /// Job indices the solver never solves
    pub failing_points: HashSet<usize>,
    /// Scatter of the solved position around the mount position
    pub pointing_noise_arcsec: f64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            latitude: 48.0,
            longitude: 11.0,
            slew_time: Duration::from_secs(2),
            dome_time: Duration::from_secs(3),
            download_time: Duration::from_secs(1),
            save_time: Duration::from_millis(200),
            solve_time: Duration::from_secs(2),
            with_dome: false,
            horizon: 0.0,
            failing_points: HashSet::new(),
            pointing_noise_arcsec: 60.0,
        }
    }
}

/// Build a simulated rig reporting into `sink`. Must be called inside a tokio runtime.
pub fn sim_rig(settings: &SimSettings, sink: &EventSink) -> Rig {
    let rig = Rig::new(
        Arc::new(SimMount::new(settings, sink.clone())),
        Arc::new(SimCamera::new(settings, sink.clone())),
        Arc::new(SimSolver::spawn(settings, sink.clone())),
    );
    if settings.with_dome {
        rig.with_dome(Arc::new(SimDome::new(settings, sink.clone())))
    } else {
        rig
    }
}

struct MountState {
    target: Option<TargetPoint>,
    position: TargetPoint,
}

pub struct SimMount {
    sink: EventSink,
    latitude: f64,
    longitude: f64,
    horizon: f64,
    slew_time: Duration,
    state: Arc<Mutex<MountState>>,
}

impl SimMount {
    pub fn new(settings: &SimSettings, sink: EventSink) -> Self {
        Self {
            sink,
            latitude: settings.latitude,
            longitude: settings.longitude,
            horizon: settings.horizon,
            slew_time: settings.slew_time,
            state: Arc::new(Mutex::new(MountState {
                target: None,
                position: TargetPoint::new(90.0, 0.0),
            })),
        }
    }
}

#[async_trait]
impl Mount for SimMount {
    async fn set_target_alt_az(&self, altitude: f64, azimuth: f64) -> DeviceResult<()> {
        if altitude < self.horizon || altitude > 90.0 {
            return Err(format!("Altitude {:.1} outside of {:.1}..90", altitude, self.horizon));
        }
        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        state.target = Some(TargetPoint::new(altitude, azimuth.rem_euclid(360.0)));
        Ok(())
    }

    async fn start_slewing(&self) -> DeviceResult<()> {
        let target = {
            let mut state = self.state.lock().map_err(|e| e.to_string())?;
            state.target.take().ok_or_else(|| "No slew target set".to_string())?
        };
        tracing::info!("[SIM] Slew to alt={:.1}°, az={:.1}°", target.altitude, target.azimuth);

        let state = self.state.clone();
        let sink = self.sink.for_command();
        let slew_time = self.slew_time;
        tokio::spawn(async move {
            tokio::time::sleep(slew_time).await;
            if let Ok(mut state) = state.lock() {
                state.position = target;
            }
            sink.send(DeviceEvent::MountSlewed);
        });
        Ok(())
    }

    async fn telemetry(&self) -> DeviceResult<MountTelemetry> {
        let position = self.state.lock().map_err(|e| e.to_string())?.position;
        let julian_date = julian_day(&chrono::Utc::now());
        let sidereal_time = local_sidereal_time(julian_date, self.longitude);
        let (ra_jnow, dec_jnow) =
            alt_az_to_equatorial(position.altitude, position.azimuth, self.latitude, sidereal_time);

        // Tube sits west of the pier while looking east of the meridian
        let hour_angle = normalize_hours(sidereal_time - ra_jnow + 12.0) - 12.0;
        let pier_side = if hour_angle < 0.0 { PierSide::West } else { PierSide::East };

        Ok(MountTelemetry {
            ra_jnow,
            dec_jnow,
            sidereal_time,
            julian_date,
            pier_side,
        })
    }
}

pub struct SimDome {
    sink: EventSink,
    dome_time: Duration,
}

impl SimDome {
    pub fn new(settings: &SimSettings, sink: EventSink) -> Self {
        Self { sink, dome_time: settings.dome_time }
    }
}

#[async_trait]
impl Dome for SimDome {
    async fn slew_dome(&self, azimuth: f64) -> DeviceResult<()> {
        tracing::info!("[SIM] Dome to az={:.1}°", azimuth);
        let sink = self.sink.for_command();
        let dome_time = self.dome_time;
        tokio::spawn(async move {
            tokio::time::sleep(dome_time).await;
            sink.send(DeviceEvent::DomeSlewed);
        });
        Ok(())
    }
}

pub struct SimCamera {
    sink: EventSink,
    download_time: Duration,
    save_time: Duration,
    /// One frame at a time through the sensor and readout
    sensor: Arc<tokio::sync::Mutex<()>>,
}

impl SimCamera {
    pub fn new(settings: &SimSettings, sink: EventSink) -> Self {
        Self {
            sink,
            download_time: settings.download_time,
            save_time: settings.save_time,
            sensor: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[async_trait]
impl Camera for SimCamera {
    async fn expose(&self, request: &ExposureRequest) -> DeviceResult<()> {
        let exposure = Duration::try_from_secs_f64(request.exposure_time)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| format!("Invalid exposure time {}", request.exposure_time))?;
        tracing::info!("[SIM] Exposure {:.1}s bin {} -> {}", request.exposure_time, request.binning, request.image_path.display());

        let sink = self.sink.for_command();
        let sensor = self.sensor.clone();
        let (download_time, save_time) = (self.download_time, self.save_time);
        let path = request.image_path.clone();
        tokio::spawn(async move {
            let _sensor = sensor.lock_owned().await;
            tokio::time::sleep(exposure).await;
            sink.send(DeviceEvent::ImageExposed);
            tokio::time::sleep(download_time).await;
            sink.send(DeviceEvent::ImageDownloaded);
            tokio::time::sleep(save_time).await;
            sink.send(DeviceEvent::ImageSaved { path });
        });
        Ok(())
    }
}

/// Solver with a single worker processing requests in submission order
pub struct SimSolver {
    queue: mpsc::UnboundedSender<(SolveRequest, EventSink)>,
    sink: EventSink,
}

impl SimSolver {
    /// Start the worker task. Must be called inside a tokio runtime.
    pub fn spawn(settings: &SimSettings, sink: EventSink) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<(SolveRequest, EventSink)>();
        let solve_time = settings.solve_time;
        let failing = settings.failing_points.clone();
        let noise = settings.pointing_noise_arcsec;

        tokio::spawn(async move {
            while let Some((request, reply)) = rx.recv().await {
                tokio::time::sleep(solve_time).await;
                let outcome = simulate_solve(&request, &failing, noise);
                if !reply.send(DeviceEvent::SolveResult(outcome)) {
                    break;
                }
            }
            tracing::debug!("[SIM] Solver worker stopped");
        });

        Self { queue, sink }
    }
}

#[async_trait]
impl PlateSolver for SimSolver {
    async fn solve(&self, request: &SolveRequest) -> DeviceResult<()> {
        self.queue
            .send((request.clone(), self.sink.for_command()))
            .map_err(|_| "Solver worker not running".to_string())
    }
}

fn simulate_solve(request: &SolveRequest, failing: &HashSet<usize>, noise_arcsec: f64) -> SolveOutcome {
    if failing.contains(&request.index) {
        return SolveOutcome::failed(request.index, "No stars found");
    }
    let Some(hint) = &request.hint else {
        return SolveOutcome::failed(request.index, "Blind solve not supported");
    };

    let mut rng = rand::thread_rng();
    let dec_offset = noise_arcsec * rng.gen_range(-1.0..=1.0) / 3600.0;
    let ra_offset = noise_arcsec * rng.gen_range(-1.0..=1.0) / 3600.0 / 15.0 / hint.dec_j2000.to_radians().cos().max(0.01);
    // 3.76 µm pixels
    let scale = if hint.focal_length > 0.0 { 206.265 * 3.76 / hint.focal_length } else { 1.0 };

    SolveOutcome {
        index: request.index,
        success: true,
        ra_j2000: normalize_hours(hint.ra_j2000 + ra_offset),
        dec_j2000: (hint.dec_j2000 + dec_offset).clamp(-90.0, 90.0),
        angle: rng.gen_range(0.0..360.0),
        scale,
        error_rms: rng.gen_range(0.5..3.0),
        flipped: false,
        message: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_ops::{device_events, SolveHint};
    use std::path::PathBuf;

    #[tokio::test(start_paused = true)]
    async fn test_mount_slew_reports_completion() {
        let (sink, mut inbox) = device_events();
        let mount = SimMount::new(&SimSettings::default(), sink);

        assert!(mount.start_slewing().await.is_err());
        mount.set_target_alt_az(45.0, 180.0).await.unwrap();
        mount.start_slewing().await.unwrap();
        assert_eq!(inbox.recv().await, Some(DeviceEvent::MountSlewed));

        // due south at 45° altitude from latitude 48° is Dec 45 - 90 + 48 = 3°
        let t = mount.telemetry().await.unwrap();
        assert!((t.dec_jnow - 3.0).abs() < 1e-6);
        assert!((normalize_hours(t.sidereal_time - t.ra_jnow + 12.0) - 12.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_mount_refuses_below_horizon() {
        let (sink, _inbox) = device_events();
        let settings = SimSettings { horizon: 10.0, ..Default::default() };
        let mount = SimMount::new(&settings, sink);
        assert!(mount.set_target_alt_az(5.0, 90.0).await.is_err());
        assert!(mount.set_target_alt_az(15.0, 90.0).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_event_sequence() {
        let (sink, mut inbox) = device_events();
        let camera = SimCamera::new(&SimSettings::default(), sink);
        let request = ExposureRequest {
            index: 0,
            image_path: PathBuf::from("/tmp/image-000.fits"),
            exposure_time: 2.0,
            binning: 1,
            sub_frame: 100.0,
            fast_readout: true,
        };
        camera.expose(&request).await.unwrap();

        assert_eq!(inbox.recv().await, Some(DeviceEvent::ImageExposed));
        assert_eq!(inbox.recv().await, Some(DeviceEvent::ImageDownloaded));
        assert_eq!(inbox.recv().await, Some(DeviceEvent::ImageSaved { path: request.image_path.clone() }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_solver_answers_in_order() {
        let (sink, mut inbox) = device_events();
        let settings = SimSettings { failing_points: [1].into_iter().collect(), ..Default::default() };
        let solver = SimSolver::spawn(&settings, sink);
        let hint = Some(SolveHint { ra_j2000: 6.0, dec_j2000: 20.0, focal_length: 0.0 });

        for index in 0..3 {
            let request = SolveRequest { index, image_path: PathBuf::from("/tmp/x.fits"), hint: hint.clone() };
            solver.solve(&request).await.unwrap();
        }

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            match inbox.recv().await {
                Some(DeviceEvent::SolveResult(o)) => outcomes.push(o),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(outcomes.iter().map(|o| o.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(outcomes[0].success && !outcomes[1].success && outcomes[2].success);
        // within the configured scatter
        assert!((outcomes[0].dec_j2000 - 20.0).abs() <= 60.0 / 3600.0 + 1e-9);
    }

    #[test]
    fn test_blind_solve_fails() {
        let request = SolveRequest { index: 4, image_path: PathBuf::from("/tmp/x.fits"), hint: None };
        let outcome = simulate_solve(&request, &HashSet::new(), 10.0);
        assert!(!outcome.success);
        assert_eq!(outcome.index, 4);
    }
}
