//! Per-pass pipeline state and the event loop driving it
//!
//! One `BuildPipeline` lives for a whole run and is re-primed for every
//! pass. All stage handlers (`slew`, `exposure`, `solve`, `collector`)
//! are `impl BuildPipeline` blocks; they only ever run from [`drive`],
//! which processes one device event at a time, so none of the state here
//! needs a lock.
//!
//! [`drive`]: BuildPipeline::drive

use crate::config::ModelBuildConfig;
use crate::control::{RunControl, StopRequest};
use crate::device_ops::{DeviceEvent, EventInbox, Rig};
use crate::error::{ModelBuildError, ModelBuildResult};
use crate::executor::BuildEvent;
use crate::pointers::PointerSet;
use crate::slew::Rendezvous;
use crate::targets::JobRecord;
use crate::timing::CameraStage;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Cancelled,
    Ended,
}

impl From<StopRequest> for PassOutcome {
    fn from(stop: StopRequest) -> Self {
        match stop {
            StopRequest::Cancel => PassOutcome::Cancelled,
            StopRequest::End => PassOutcome::Ended,
        }
    }
}

pub struct BuildPipeline {
    pub(crate) rig: Rig,
    pub(crate) config: ModelBuildConfig,
    pub(crate) control: RunControl,
    events: broadcast::Sender<BuildEvent>,
    pub(crate) jobs: Vec<JobRecord>,
    /// Job indices covered by the current pass, in slew order
    pub(crate) queue: Vec<usize>,
    pub(crate) pointers: PointerSet,
    pub(crate) rendezvous: Rendezvous,
    /// Exposure released by the rendezvous but held back by pause or settle time
    pub(crate) pending_exposure: Option<Instant>,
    /// Job indices whose solve result arrived in the current pass
    pub(crate) collected: HashSet<usize>,
    pub(crate) solved_in_pass: usize,
    pub(crate) pass: u32,
    pub(crate) run_started: Instant,
}

impl BuildPipeline {
    pub fn new(
        rig: Rig,
        config: ModelBuildConfig,
        control: RunControl,
        events: broadcast::Sender<BuildEvent>,
        jobs: Vec<JobRecord>,
    ) -> Self {
        Self {
            rig,
            config,
            control,
            events,
            jobs,
            queue: Vec::new(),
            pointers: PointerSet::new(),
            rendezvous: Rendezvous::default(),
            pending_exposure: None,
            collected: HashSet::new(),
            solved_in_pass: 0,
            pass: 0,
            run_started: Instant::now(),
        }
    }

    /// Reset the cursors and set up the job order for a new pass
    pub fn begin_pass(&mut self, queue: Vec<usize>, pass: u32) {
        tracing::debug!("Begin pass {}: {} points {:?}", pass, queue.len(), queue);
        self.queue = queue;
        self.pass = pass;
        self.pointers.reset();
        self.rendezvous.reset();
        self.pending_exposure = None;
        self.collected.clear();
        self.solved_in_pass = 0;
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<JobRecord> {
        self.jobs
    }

    pub fn pointers(&self) -> PointerSet {
        self.pointers
    }

    pub fn queue(&self) -> &[usize] {
        &self.queue
    }

    /// Completion predicate: a result arrived for the last position of the pass
    pub fn is_pass_complete(&self) -> bool {
        self.pointers.is_complete(self.queue.len())
    }

    pub(crate) fn emit(&self, event: BuildEvent) {
        let _ = self.events.send(event);
    }

    /// Dispatch one device completion event to its stage handler
    pub async fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::MountSlewed => self.on_mount_slewed().await,
            DeviceEvent::DomeSlewed => self.on_dome_slewed().await,
            DeviceEvent::ImageExposed => self.on_camera_event(CameraStage::Exposed).await,
            DeviceEvent::ImageDownloaded => self.on_camera_event(CameraStage::Downloaded).await,
            DeviceEvent::ImageSaved { path } => {
                tracing::debug!("Image saved: {}", path.display());
                self.on_camera_event(CameraStage::Saved).await
            }
            DeviceEvent::SolveResult(outcome) => self.on_solve_result(outcome),
        }
    }

    /// Run the current pass until every point has a result or the run is stopped
    pub async fn drive(&mut self, inbox: &mut EventInbox) -> ModelBuildResult<PassOutcome> {
        let poll = Duration::from_millis(self.config.poll_interval_ms);

        self.start_next_slew().await;

        loop {
            if let Some(stop) = self.control.stop_request() {
                self.pending_exposure = None;
                tracing::info!("Pass {} stopped: {:?}", self.pass, stop);
                return Ok(stop.into());
            }
            if self.is_pass_complete() {
                tracing::debug!("Pass {} complete", self.pass);
                return Ok(PassOutcome::Completed);
            }

            self.maybe_start_pending_exposure().await;

            let mut wake = Instant::now() + poll;
            // while paused only resume or the poll tick can release the exposure
            if let Some(deadline) = self.pending_exposure.filter(|_| !self.control.is_paused()) {
                wake = wake.min(deadline);
            }

            let event = tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => Some(event),
                    None => return Err(ModelBuildError::EventChannelClosed),
                },
                _ = self.control.changed() => None,
                _ = tokio::time::sleep_until(wake) => None,
            };

            if let Some(event) = event {
                tracing::trace!("Device event: {:?}", event);
                self.handle_event(event).await;
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::device_ops::{device_events, SolveOutcome};
    use crate::timing::TimingPolicy;
    use std::path::PathBuf;

    fn saved() -> DeviceEvent {
        DeviceEvent::ImageSaved { path: PathBuf::from("/tmp/model/image.fits") }
    }

    #[tokio::test]
    async fn test_conservative_point_cycle() {
        let (mut p, rec, _control, _rx) = pipeline(2, ModelBuildConfig::default(), false);

        p.start_next_slew().await;
        assert_eq!(rec.commands(), vec![
            Command::SetTarget { altitude: 30.0, azimuth: 0.0 },
            Command::StartSlewing,
        ]);

        p.handle_event(DeviceEvent::MountSlewed).await;
        assert_eq!(rec.count(|c| matches!(c, Command::Expose { index: 0 })), 1);

        // exposed and downloaded do not release the next slew in conservative mode
        p.handle_event(DeviceEvent::ImageExposed).await;
        p.handle_event(DeviceEvent::ImageDownloaded).await;
        assert_eq!(rec.count(|c| matches!(c, Command::StartSlewing)), 1);

        p.handle_event(saved()).await;
        assert_eq!(rec.count(|c| matches!(c, Command::StartSlewing)), 2);
        assert_eq!(rec.count(|c| matches!(c, Command::Solve { index: 0 })), 1);
        assert_eq!(p.pointers().slew.get(), Some(1));
        assert_eq!(p.pointers().image.get(), Some(0));
        assert_eq!(p.pointers().solve.get(), Some(0));
    }

    #[tokio::test]
    async fn test_pass_completes_after_last_result() {
        let (mut p, _rec, _control, _rx) = pipeline(2, ModelBuildConfig::default(), false);
        p.start_next_slew().await;
        for index in 0..2 {
            p.handle_event(DeviceEvent::MountSlewed).await;
            p.handle_event(DeviceEvent::ImageExposed).await;
            p.handle_event(DeviceEvent::ImageDownloaded).await;
            p.handle_event(saved()).await;
            assert!(!p.is_pass_complete());
            p.handle_event(DeviceEvent::SolveResult(solved(index))).await;
        }
        assert!(p.is_pass_complete());
        assert_eq!(p.pointers().result.get(), Some(1));
        // slew cursor never runs past the end of the pass
        assert_eq!(p.pointers().slew.get(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_stops_on_cancel() {
        let (mut p, rec, control, _rx) = pipeline(3, ModelBuildConfig::default(), false);
        let (sink, mut inbox) = device_events();

        let driver = async {
            p.drive(&mut inbox).await
        };
        let script = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            sink.send(DeviceEvent::MountSlewed);
            tokio::time::sleep(Duration::from_millis(100)).await;
            control.cancel();
        };
        let (outcome, _) = tokio::join!(driver, script);

        assert_eq!(outcome.unwrap(), PassOutcome::Cancelled);
        assert_eq!(rec.count(|c| matches!(c, Command::Expose { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_reports_closed_channel() {
        let (mut p, _rec, _control, _rx) = pipeline(1, ModelBuildConfig::default(), false);
        let (sink, mut inbox) = device_events();
        drop(sink);
        let result = p.drive(&mut inbox).await;
        assert!(matches!(result, Err(ModelBuildError::EventChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_completes_with_progressive_timing() {
        let config = ModelBuildConfig { timing: TimingPolicy::Progressive, ..Default::default() };
        let (mut p, rec, _control, _rx) = pipeline(2, config, false);
        let (sink, mut inbox) = device_events();

        // Queue the whole device conversation up front; drive consumes it in order
        for index in 0..2 {
            sink.send(DeviceEvent::MountSlewed);
            sink.send(DeviceEvent::ImageExposed);
            sink.send(DeviceEvent::ImageDownloaded);
            sink.send(saved());
            sink.send(DeviceEvent::SolveResult(solved(index)));
        }

        let outcome = p.drive(&mut inbox).await.unwrap();
        assert_eq!(outcome, PassOutcome::Completed);
        assert_eq!(rec.count(|c| matches!(c, Command::StartSlewing)), 2);
        assert_eq!(rec.count(|c| matches!(c, Command::Solve { .. })), 2);
        assert!(p.jobs().iter().all(|j| j.is_solved()));
    }

    #[tokio::test]
    async fn test_failed_submission_counts_as_result() {
        let (mut p, rec, _control, _rx) = pipeline(1, ModelBuildConfig::default(), false);
        *rec.reject_solve.lock().unwrap() = true;
        p.start_next_slew().await;
        p.handle_event(DeviceEvent::MountSlewed).await;
        p.handle_event(DeviceEvent::ImageExposed).await;
        p.handle_event(DeviceEvent::ImageDownloaded).await;
        p.handle_event(saved()).await;
        assert!(p.is_pass_complete());
        assert!(!p.jobs()[0].is_solved());

        // a late duplicate result for the same index is ignored
        p.handle_event(DeviceEvent::SolveResult(SolveOutcome::failed(0, "late"))).await;
        assert_eq!(p.pointers().result.get(), Some(0));
    }
}
