//! Model build execution engine

use crate::collector::ModelProgress;
use crate::config::ModelBuildConfig;
use crate::control::RunControl;
use crate::device_ops::{EventInbox, Rig};
use crate::error::{ModelBuildError, ModelBuildResult};
use crate::model::{assemble_model, ModelResult, RunMetadata};
use crate::pipeline::{BuildPipeline, PassOutcome};
use crate::pointers::PointerSet;
use crate::targets::{prepare_jobs, JobRecord, PointStatus, TargetPoint};
use crate::timing::TimingPolicy;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

/// State of the model builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildState {
    Idle,
    Running,
    /// Last run was cancelled, nothing was kept
    Cancelled,
    /// Last run was ended early, a model was built from the solved points
    Ended,
    Completed,
    /// Last run aborted with an error
    Failed,
}

/// Event emitted by the model builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BuildEvent {
    StateChanged(BuildState),
    PassStarted { pass: u32, points: usize },
    SlewStarted { index: usize, altitude: f64, azimuth: f64 },
    /// A device refused a command; the pass stalls at this point
    CommandRejected { index: usize, command: String, reason: String },
    ExposureStarted { index: usize, image_path: PathBuf, exposure_time: f64, binning: u32 },
    ImageExposed { index: usize, image_path: PathBuf },
    SolveStarted { index: usize },
    PointSolved { index: usize, status: PointStatus },
    Progress(ModelProgress),
    PauseChanged(bool),
    /// Terminal event of every run; `None` if no model was built
    Finished(Option<ModelResult>),
}

/// Runs model builds over a set of devices
pub struct ModelBuilder {
    rig: Rig,
    inbox: EventInbox,
    config: ModelBuildConfig,
    state: BuildState,
    event_tx: broadcast::Sender<BuildEvent>,
    control: RunControl,
    /// Cursors of the last pass that ran
    pointers: PointerSet,
    /// Job records of the last run, empty after a cancel
    jobs: Vec<JobRecord>,
}

impl ModelBuilder {
    pub fn new(rig: Rig, inbox: EventInbox, config: ModelBuildConfig) -> ModelBuildResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(256);
        let control = RunControl::new(event_tx.clone());

        Ok(Self {
            rig,
            inbox,
            config,
            state: BuildState::Idle,
            event_tx,
            control,
            pointers: PointerSet::new(),
            jobs: Vec::new(),
        })
    }

    /// Set the overlap policy and the number of retry passes for the next run
    pub fn configure(&mut self, timing: TimingPolicy, retries: u32) {
        tracing::debug!("Model build configured: timing {}, retries {}", timing, retries);
        self.config.timing = timing;
        self.config.retries = retries;
    }

    pub fn config(&self) -> &ModelBuildConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ModelBuildConfig) -> ModelBuildResult<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Subscribe to build events
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.event_tx.subscribe()
    }

    /// Handle for pausing, resuming, cancelling or ending a run from another task
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn pointers(&self) -> PointerSet {
        self.pointers
    }

    pub fn jobs(&self) -> &[JobRecord] {
        &self.jobs
    }

    fn emit(&self, event: BuildEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&mut self, state: BuildState) {
        self.state = state;
        self.emit(BuildEvent::StateChanged(state));
    }

    /// Build a model over `targets`, saving images into `image_dir`.
    ///
    /// Returns the model, or `None` if the run was cancelled or too few
    /// points solved. The same value is broadcast as `Finished`.
    pub async fn run(
        &mut self,
        targets: &[TargetPoint],
        image_dir: &Path,
        model_name: &str,
    ) -> ModelBuildResult<Option<ModelResult>> {
        if targets.is_empty() {
            tracing::warn!("Model build '{}' has no target points", model_name);
            return Err(ModelBuildError::EmptyTargetList);
        }
        self.config.validate()?;

        self.control.reset();
        let dropped = self.inbox.begin_run();
        if dropped > 0 {
            tracing::debug!("Dropped {} stale device events", dropped);
        }

        tracing::info!(
            "Starting model build '{}': {} points, timing {}, retries {}",
            model_name,
            targets.len(),
            self.config.timing,
            self.config.retries
        );
        let started_at = Utc::now();
        self.pointers = PointerSet::new();
        self.jobs.clear();
        self.set_state(BuildState::Running);

        let jobs = prepare_jobs(targets, image_dir, model_name, &self.config);
        let mut pipeline = BuildPipeline::new(
            self.rig.clone(),
            self.config.clone(),
            self.control.clone(),
            self.event_tx.clone(),
            jobs,
        );

        let mut outcome = PassOutcome::Completed;
        for pass in 0..=self.config.retries {
            let mut queue: Vec<usize> = pipeline
                .jobs()
                .iter()
                .filter(|job| !job.is_solved())
                .map(|job| job.index)
                .collect();
            if queue.is_empty() {
                break;
            }
            if self.config.retries_reversed && pass % 2 == 1 {
                queue.reverse();
            }

            if pass > 0 {
                tracing::info!("Retry pass {} over {} unsolved points", pass, queue.len());
            }
            self.emit(BuildEvent::PassStarted { pass, points: queue.len() });
            pipeline.begin_pass(queue, pass);

            let result = pipeline.drive(&mut self.inbox).await;
            self.pointers = pipeline.pointers();
            outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("Model build '{}' aborted: {}", model_name, e);
                    self.jobs = pipeline.into_jobs();
                    self.set_state(BuildState::Failed);
                    self.emit(BuildEvent::Finished(None));
                    return Err(e);
                }
            };
            if outcome != PassOutcome::Completed {
                break;
            }
        }

        let (state, result) = match outcome {
            PassOutcome::Cancelled => {
                tracing::info!("Model build '{}' cancelled", model_name);
                (BuildState::Cancelled, None)
            }
            PassOutcome::Ended | PassOutcome::Completed => {
                let jobs = pipeline.into_jobs();
                let metadata = RunMetadata::new(model_name, &self.config, started_at);
                let result = assemble_model(&jobs, metadata, self.config.min_points);
                self.jobs = jobs;
                let state = if outcome == PassOutcome::Ended {
                    BuildState::Ended
                } else {
                    BuildState::Completed
                };
                (state, result)
            }
        };

        self.set_state(state);
        self.emit(BuildEvent::Finished(result.clone()));
        Ok(result)
    }
}
