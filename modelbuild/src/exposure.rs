//! Exposure stage
//!
//! Starts the camera once the slew rendezvous released a point, recording
//! where the mount believed it was pointing at that moment. Camera
//! lifecycle events come back here; depending on the timing policy one of
//! them releases the next slew, and the saved event hands the image over
//! to the solve stage.

use crate::device_ops::ExposureRequest;
use crate::executor::BuildEvent;
use crate::pipeline::BuildPipeline;
use crate::targets::MountSnapshot;
use crate::timing::CameraStage;
use crate::transform::jnow_to_j2000;
use chrono::Utc;
use tokio::time::Instant;

impl BuildPipeline {
    /// Start the exposure for the most recently slewed point. The exposure
    /// is deferred while paused or until the settle time has passed.
    pub(crate) async fn start_next_exposure(&mut self) {
        if self.control.is_stopping() {
            tracing::debug!("Start exposure: run is stopping, ignoring");
            return;
        }
        if self.pointers.image.count() >= self.pointers.slew.count() {
            tracing::debug!("Start exposure: no slewed point waiting, ignoring");
            return;
        }

        let settle = self.config.settle_time();
        if self.control.is_paused() || !settle.is_zero() {
            let now = Instant::now();
            self.pending_exposure = Some(now.checked_add(settle).unwrap_or(now));
            tracing::debug!(
                "Start exposure: deferred, paused: {}, settle: {:.1}s",
                self.control.is_paused(),
                settle.as_secs_f64()
            );
            return;
        }

        self.begin_exposure().await;
    }

    /// Start a deferred exposure once the settle deadline passed and the run is not paused
    pub(crate) async fn maybe_start_pending_exposure(&mut self) {
        let Some(deadline) = self.pending_exposure else {
            return;
        };
        if self.control.is_stopping() {
            self.pending_exposure = None;
            return;
        }
        if self.control.is_paused() || Instant::now() < deadline {
            return;
        }
        self.pending_exposure = None;
        self.begin_exposure().await;
    }

    async fn begin_exposure(&mut self) {
        let position = self.pointers.image.advance();
        let index = self.queue[position];

        let telemetry = self.rig.mount.telemetry().await;
        let job = &mut self.jobs[index];
        match telemetry {
            Ok(t) => {
                let (ra_j2000, dec_j2000) = jnow_to_j2000(t.ra_jnow, t.dec_jnow, t.julian_date);
                job.mount = Some(MountSnapshot {
                    ra_jnow: t.ra_jnow,
                    dec_jnow: t.dec_jnow,
                    ra_j2000,
                    dec_j2000,
                    sidereal_time: t.sidereal_time,
                    julian_date: t.julian_date,
                    pier_side: t.pier_side,
                    captured_at: Utc::now(),
                });
                job.message = None;
            }
            Err(e) => {
                tracing::warn!("Point [{:02}]: could not read mount position: {}", index, e);
                job.mount = None;
                job.message = Some(format!("Mount position unavailable: {}", e));
            }
        }

        let request = ExposureRequest {
            index,
            image_path: job.image_path.clone(),
            exposure_time: job.exposure_time,
            binning: job.binning,
            sub_frame: job.sub_frame,
            fast_readout: job.fast_readout,
        };

        tracing::info!(
            "Start exposure: [{:02}], file: [{}], exp: [{:.1}s], bin: [{}]",
            position,
            request.image_path.display(),
            request.exposure_time,
            request.binning
        );
        self.emit(BuildEvent::ExposureStarted {
            index,
            image_path: request.image_path.clone(),
            exposure_time: request.exposure_time,
            binning: request.binning,
        });

        if let Err(e) = self.rig.camera.expose(&request).await {
            self.reject_command(index, "exposure", e);
        }
    }

    pub(crate) async fn on_camera_event(&mut self, stage: CameraStage) {
        let Some(position) = self.pointers.image.get() else {
            tracing::debug!("Camera {:?} without exposure in this pass, ignoring", stage);
            return;
        };

        if stage == CameraStage::Exposed {
            let index = self.queue[position];
            self.emit(BuildEvent::ImageExposed {
                index,
                image_path: self.jobs[index].image_path.clone(),
            });
        }

        if self.config.timing.releases_next_slew(stage) {
            self.start_next_slew().await;
        }

        if stage == CameraStage::Saved {
            self.start_next_solve().await;
        }
    }
}
