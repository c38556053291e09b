//! Result collection and progress reporting

use crate::device_ops::SolveOutcome;
use crate::executor::BuildEvent;
use crate::pipeline::BuildPipeline;
use crate::targets::{PointStatus, SolvedCoordinates};
use crate::transform::j2000_to_jnow;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress of the current pass, published after every collected result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProgress {
    /// Results collected so far in this pass
    pub count: usize,
    /// Points in this pass
    pub number: usize,
    /// Rounded percentage of the pass done
    pub percent: u32,
    pub elapsed_secs: f64,
    pub estimated_remaining_secs: f64,
    /// Successfully solved points so far in this pass
    pub solved: usize,
}

impl ModelProgress {
    pub fn compute(count: usize, number: usize, solved: usize, elapsed: Duration) -> Self {
        let fraction = if number == 0 { 0.0 } else { count as f64 / number as f64 };
        let elapsed_secs = elapsed.as_secs_f64();
        let estimated_remaining_secs = if fraction > 0.0 {
            elapsed_secs * (1.0 - fraction) / fraction
        } else {
            0.0
        };

        Self {
            count,
            number,
            percent: (fraction * 100.0).round() as u32,
            elapsed_secs,
            estimated_remaining_secs,
            solved,
        }
    }
}

impl BuildPipeline {
    /// Merge a solve result into its job record and advance the result cursor
    pub(crate) fn on_solve_result(&mut self, outcome: SolveOutcome) {
        let index = outcome.index;
        if !self.queue.contains(&index) {
            tracing::warn!("Solve result for point [{:02}] not in pass {}, ignoring", index, self.pass);
            return;
        }
        if !self.collected.insert(index) {
            tracing::warn!("Duplicate solve result for point [{:02}], ignoring", index);
            return;
        }

        let position = self.pointers.result.advance();
        let job = &mut self.jobs[index];

        match (&job.mount, outcome.success) {
            (Some(mount), true) => {
                let (ra_jnow, dec_jnow) = j2000_to_jnow(outcome.ra_j2000, outcome.dec_j2000, mount.julian_date);
                job.solved = Some(SolvedCoordinates {
                    ra_j2000: outcome.ra_j2000,
                    dec_j2000: outcome.dec_j2000,
                    ra_jnow,
                    dec_jnow,
                    angle: outcome.angle,
                    scale: outcome.scale,
                    error_rms: outcome.error_rms,
                    flipped: outcome.flipped,
                });
                job.status = PointStatus::Solved;
                job.message = None;
                self.solved_in_pass += 1;
            }
            (None, true) => {
                // solved, but nothing to pair it with
                job.solved = None;
                job.status = PointStatus::Failed;
                if job.message.is_none() {
                    job.message = Some("Mount position unavailable".into());
                }
            }
            (_, false) => {
                job.solved = None;
                job.status = PointStatus::Failed;
                job.message = Some(outcome.message.unwrap_or_else(|| "Solve failed".into()));
            }
        }

        let status = job.status;
        if status == PointStatus::Solved {
            tracing::info!(
                "Point [{:02}] solved: ra: {:.4}h, dec: {:.4}, rms: {:.2}\"",
                index,
                outcome.ra_j2000,
                outcome.dec_j2000,
                outcome.error_rms
            );
        } else {
            tracing::warn!("Point [{:02}] not solved: {}", index, job.message.as_deref().unwrap_or(""));
        }
        self.emit(BuildEvent::PointSolved { index, status });

        let progress = ModelProgress::compute(
            position + 1,
            self.queue.len(),
            self.solved_in_pass,
            self.run_started.elapsed(),
        );
        tracing::debug!(
            "Progress: {}/{} ({}%), solved: {}, remaining: {:.0}s",
            progress.count,
            progress.number,
            progress.percent,
            progress.solved,
            progress.estimated_remaining_secs
        );
        self.emit(BuildEvent::Progress(progress));
    }
}
