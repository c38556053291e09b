//! Model assembly
//!
//! Turns the job records of a finished run into the point list the mount
//! computes its pointing model from, plus the full record set that gets
//! saved alongside it.

use crate::config::ModelBuildConfig;
use crate::targets::{JobRecord, PierSide, PointErrors};
use crate::timing::TimingPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One alignment star as handed to the mount: where it thought it was
/// pointing and where the image says it was pointing, both of date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgPoint {
    pub mount_ra_jnow: f64,
    pub mount_dec_jnow: f64,
    pub solved_ra_jnow: f64,
    pub solved_dec_jnow: f64,
    /// Local sidereal time in hours
    pub sidereal_time: f64,
    pub pier_side: PierSide,
}

/// Descriptive data attached to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub name: String,
    pub version: String,
    pub profile: String,
    pub firmware: String,
    pub latitude: f64,
    pub timing: TimingPolicy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new(name: &str, config: &ModelBuildConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            name: name.to_string(),
            version: config.site.version.clone(),
            profile: config.site.profile.clone(),
            firmware: config.site.firmware.clone(),
            latitude: config.site.latitude,
            timing: config.timing,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Per-point residuals the mount reports after computing a model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignStarError {
    /// Arcseconds
    pub error_rms: f64,
    /// Direction of the error in degrees
    pub error_angle: f64,
}

/// A built model, ready for upload to the mount and for saving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub metadata: RunMetadata,
    /// Solved points, in target order
    pub points: Vec<JobRecord>,
    pub prog_points: Vec<ProgPoint>,
}

impl ModelResult {
    /// Attach the mount's per-star errors to the points, in order.
    ///
    /// Returns false and clears all errors if the mount reports a different
    /// number of stars than the model holds.
    pub fn retrofit_mount_errors(&mut self, stars: &[AlignStarError]) -> bool {
        if stars.len() != self.points.len() {
            tracing::warn!(
                "Mount reports {} alignment stars, model has {} points, dropping errors",
                stars.len(),
                self.points.len()
            );
            for point in &mut self.points {
                point.errors = None;
            }
            return false;
        }

        for (point, star) in self.points.iter_mut().zip(stars) {
            let angle = star.error_angle.to_radians();
            point.errors = Some(PointErrors {
                error_rms: star.error_rms,
                error_ra: star.error_rms * angle.sin(),
                error_dec: star.error_rms * angle.cos(),
                error_angle: star.error_angle,
            });
        }
        true
    }

    pub fn to_json_string(&self) -> crate::error::ModelBuildResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Alignment stars for every solved point, in target order
pub fn build_prog_model(jobs: &[JobRecord]) -> Vec<ProgPoint> {
    jobs.iter()
        .filter(|job| job.is_solved())
        .filter_map(|job| {
            let mount = job.mount.as_ref()?;
            let solved = job.solved.as_ref()?;
            Some(ProgPoint {
                mount_ra_jnow: mount.ra_jnow,
                mount_dec_jnow: mount.dec_jnow,
                solved_ra_jnow: solved.ra_jnow,
                solved_dec_jnow: solved.dec_jnow,
                sidereal_time: mount.sidereal_time,
                pier_side: mount.pier_side,
            })
        })
        .collect()
}

/// Records of the solved points, in target order
pub fn generate_save_data(jobs: &[JobRecord]) -> Vec<JobRecord> {
    jobs.iter().filter(|job| job.is_solved()).cloned().collect()
}

/// Build the model, or `None` if fewer than `min_points` points solved
pub fn assemble_model(jobs: &[JobRecord], metadata: RunMetadata, min_points: usize) -> Option<ModelResult> {
    let points = generate_save_data(jobs);
    if points.len() < min_points {
        tracing::warn!(
            "Only {} of {} points solved, at least {} needed, no model built",
            points.len(),
            jobs.len(),
            min_points
        );
        return None;
    }

    let prog_points = build_prog_model(jobs);
    tracing::info!("Model '{}' built from {} of {} points", metadata.name, points.len(), jobs.len());
    Some(ModelResult {
        metadata,
        points,
        prog_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::{prepare_jobs, MountSnapshot, PointStatus, SolvedCoordinates, TargetPoint};
    use std::path::Path;

    fn make_jobs(solved: &[bool]) -> Vec<JobRecord> {
        let targets: Vec<_> = (0..solved.len()).map(|i| TargetPoint::new(40.0, 30.0 * i as f64)).collect();
        let mut jobs = prepare_jobs(&targets, Path::new("/tmp"), "m-test", &ModelBuildConfig::default());
        for (job, ok) in jobs.iter_mut().zip(solved) {
            job.mount = Some(MountSnapshot {
                ra_jnow: job.index as f64,
                dec_jnow: 20.0,
                ra_j2000: job.index as f64,
                dec_j2000: 20.0,
                sidereal_time: 5.0 + job.index as f64,
                julian_date: 2460676.5,
                pier_side: PierSide::East,
                captured_at: Utc::now(),
            });
            if *ok {
                job.status = PointStatus::Solved;
                job.solved = Some(SolvedCoordinates {
                    ra_j2000: job.index as f64 + 0.01,
                    dec_j2000: 20.1,
                    ra_jnow: job.index as f64 + 0.01,
                    dec_jnow: 20.1,
                    angle: 0.0,
                    scale: 1.0,
                    error_rms: 1.0,
                    flipped: false,
                });
            } else {
                job.status = PointStatus::Failed;
            }
        }
        jobs
    }

    fn metadata() -> RunMetadata {
        RunMetadata::new("m-test", &ModelBuildConfig::default(), Utc::now())
    }

    #[test]
    fn test_prog_model_skips_failed_points() {
        let jobs = make_jobs(&[true, false, true, true]);
        let prog = build_prog_model(&jobs);
        assert_eq!(prog.len(), 3);
        assert_eq!(prog[1].mount_ra_jnow, 2.0);
        assert_eq!(prog[1].solved_ra_jnow, 2.01);
        assert_eq!(prog[1].sidereal_time, 7.0);
        assert_eq!(prog[1].pier_side, PierSide::East);
    }

    #[test]
    fn test_assemble_requires_min_points() {
        let jobs = make_jobs(&[true, false, true]);
        assert!(assemble_model(&jobs, metadata(), 3).is_none());

        let jobs = make_jobs(&[true, true, true, false]);
        let model = assemble_model(&jobs, metadata(), 3).unwrap();
        assert_eq!(model.points.len(), 3);
        assert_eq!(model.prog_points.len(), 3);
        assert_eq!(model.metadata.name, "m-test");
        assert!(model.points.iter().all(|p| p.is_solved()));
    }

    #[test]
    fn test_retrofit_errors() {
        let mut model = assemble_model(&make_jobs(&[true, true, true]), metadata(), 3).unwrap();
        let stars = [
            AlignStarError { error_rms: 10.0, error_angle: 90.0 },
            AlignStarError { error_rms: 4.0, error_angle: 0.0 },
            AlignStarError { error_rms: 2.0, error_angle: 180.0 },
        ];
        assert!(model.retrofit_mount_errors(&stars));

        let e0 = model.points[0].errors.clone().unwrap();
        assert!((e0.error_ra - 10.0).abs() < 1e-9);
        assert!(e0.error_dec.abs() < 1e-9);
        let e1 = model.points[1].errors.clone().unwrap();
        assert!(e1.error_ra.abs() < 1e-9);
        assert!((e1.error_dec - 4.0).abs() < 1e-9);
        let e2 = model.points[2].errors.clone().unwrap();
        assert!((e2.error_dec + 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_retrofit_length_mismatch_clears() {
        let mut model = assemble_model(&make_jobs(&[true, true, true]), metadata(), 3).unwrap();
        let stars = [AlignStarError { error_rms: 1.0, error_angle: 0.0 }; 3];
        assert!(model.retrofit_mount_errors(&stars));

        assert!(!model.retrofit_mount_errors(&stars[..2]));
        assert!(model.points.iter().all(|p| p.errors.is_none()));
    }

    #[test]
    fn test_model_serializes() {
        let model = assemble_model(&make_jobs(&[true, true, true]), metadata(), 3).unwrap();
        let json = model.to_json_string().unwrap();
        let back: ModelResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.run_id, model.metadata.run_id);
        assert_eq!(back.points.len(), 3);
    }
}
