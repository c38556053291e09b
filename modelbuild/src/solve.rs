//! Solve stage
//!
//! Hands each saved image to the plate solver, in capture order. Results
//! come back tagged with the job index and are merged by the collector.

use crate::device_ops::{SolveHint, SolveOutcome, SolveRequest};
use crate::executor::BuildEvent;
use crate::pipeline::BuildPipeline;

impl BuildPipeline {
    pub(crate) async fn start_next_solve(&mut self) {
        let next = self.pointers.solve.next();
        if next >= self.queue.len() {
            tracing::warn!("Start solve: [{:02}] length exceeded", next);
            return;
        }
        if next >= self.pointers.image.count() {
            tracing::warn!("Start solve: no saved image for [{:02}], ignoring", next);
            return;
        }

        let position = self.pointers.solve.advance();
        let index = self.queue[position];
        let job = &self.jobs[index];

        let hint = job.mount.as_ref().map(|m| SolveHint {
            ra_j2000: m.ra_j2000,
            dec_j2000: m.dec_j2000,
            focal_length: job.focal_length,
        });
        let request = SolveRequest {
            index,
            image_path: job.image_path.clone(),
            hint,
        };

        tracing::info!("Start solve: [{:02}], file: [{}]", position, request.image_path.display());
        self.emit(BuildEvent::SolveStarted { index });

        if let Err(e) = self.rig.solver.solve(&request).await {
            tracing::warn!("Point [{:02}]: solver rejected request: {}", index, e);
            self.on_solve_result(SolveOutcome::failed(index, format!("Solver rejected request: {}", e)));
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ModelBuildConfig;
    use crate::device_ops::DeviceEvent;
    use crate::pipeline::testing::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_saved_without_exposure_is_ignored() {
        let (mut p, rec, _control, _rx) = pipeline(1, ModelBuildConfig::default(), false);
        p.start_next_slew().await;
        p.start_next_solve().await;
        assert_eq!(rec.count(|c| matches!(c, Command::Solve { .. })), 0);
        assert_eq!(p.pointers().solve.get(), None);
    }

    #[tokio::test]
    async fn test_solves_follow_capture_order() {
        let config = ModelBuildConfig {
            timing: crate::timing::TimingPolicy::Progressive,
            ..Default::default()
        };
        let (mut p, rec, _control, _rx) = pipeline(2, config, false);
        let saved = || DeviceEvent::ImageSaved { path: PathBuf::from("/tmp/x.fits") };

        p.start_next_slew().await;
        p.handle_event(DeviceEvent::MountSlewed).await;
        p.handle_event(DeviceEvent::ImageExposed).await;
        // second point exposes before the first one is saved
        p.handle_event(DeviceEvent::MountSlewed).await;
        p.handle_event(DeviceEvent::ImageDownloaded).await;
        p.handle_event(saved()).await;
        p.handle_event(DeviceEvent::ImageExposed).await;
        p.handle_event(DeviceEvent::ImageDownloaded).await;
        p.handle_event(saved()).await;

        let solves: Vec<_> = rec
            .commands()
            .into_iter()
            .filter(|c| matches!(c, Command::Solve { .. }))
            .collect();
        assert_eq!(solves, vec![Command::Solve { index: 0 }, Command::Solve { index: 1 }]);
    }

    #[tokio::test]
    async fn test_no_hint_without_mount_position() {
        let (mut p, rec, _control, _rx) = pipeline(1, ModelBuildConfig::default(), false);
        *rec.telemetry_fails.lock().unwrap() = true;
        p.start_next_slew().await;
        p.handle_event(DeviceEvent::MountSlewed).await;
        p.handle_event(DeviceEvent::ImageSaved { path: PathBuf::from("/tmp/x.fits") }).await;
        assert_eq!(rec.count(|c| matches!(c, Command::Solve { index: 0 })), 1);
        assert!(rec.solve_requests.lock().unwrap()[0].hint.is_none());
    }

    #[tokio::test]
    async fn test_hint_from_mount_position() {
        let mut config = ModelBuildConfig::default();
        config.camera.focal_length = 530.0;
        let (mut p, rec, _control, _rx) = pipeline(1, config, false);
        p.start_next_slew().await;
        p.handle_event(DeviceEvent::MountSlewed).await;
        p.handle_event(DeviceEvent::ImageSaved { path: PathBuf::from("/tmp/x.fits") }).await;

        let request = rec.solve_requests.lock().unwrap()[0].clone();
        let mount = p.jobs()[0].mount.clone().unwrap();
        let hint = request.hint.unwrap();
        assert_eq!(hint.ra_j2000, mount.ra_j2000);
        assert_eq!(hint.dec_j2000, mount.dec_j2000);
        assert_eq!(hint.focal_length, 530.0);
        assert!(request.image_path.ends_with("image-000.fits"));
    }
}
