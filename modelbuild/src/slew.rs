//! Slew stage
//!
//! Moves the mount (and the dome, if there is one) to the next target of
//! the pass. The exposure for a point is released only once both have
//! reported completion, in whatever order their events arrive.

use crate::executor::BuildEvent;
use crate::pipeline::BuildPipeline;

/// Joins the mount and dome completion events of one slew
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rendezvous {
    armed: bool,
    mount: bool,
    dome: bool,
}

impl Rendezvous {
    /// Start waiting for a new slew. Without a dome only the mount is awaited.
    pub fn arm(&mut self, has_dome: bool) {
        self.armed = true;
        self.mount = false;
        self.dome = !has_dome;
    }

    /// Record mount completion; true if this released the exposure
    pub fn mount_slewed(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.mount = true;
        self.try_release()
    }

    /// Record dome completion; true if this released the exposure
    pub fn dome_slewed(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.dome = true;
        self.try_release()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn try_release(&mut self) -> bool {
        if self.mount && self.dome {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

impl BuildPipeline {
    /// Issue the slew for the next point of the pass, if there is one and
    /// the exposure of the previous point has started
    pub(crate) async fn start_next_slew(&mut self) {
        if self.control.is_stopping() {
            tracing::debug!("Start slew: run is stopping, ignoring");
            return;
        }

        let next = self.pointers.slew.next();
        if next >= self.queue.len() {
            tracing::debug!("Start slew: [{:02}] length exceeded", next);
            return;
        }
        if self.pointers.image.count() < self.pointers.slew.count() {
            tracing::debug!("Start slew: exposure for [{}] not started yet, ignoring", self.pointers.slew);
            return;
        }

        let position = self.pointers.slew.advance();
        let index = self.queue[position];
        let (altitude, azimuth) = (self.jobs[index].altitude, self.jobs[index].azimuth);

        self.rendezvous.arm(self.rig.has_dome());
        tracing::info!(
            "Start slew: [{:02}], point [{:02}], alt: [{:03.0}], az: [{:03.0}]",
            position,
            index,
            altitude,
            azimuth
        );
        self.emit(BuildEvent::SlewStarted { index, altitude, azimuth });

        let result = self.rig.mount.set_target_alt_az(altitude, azimuth).await;
        if let Err(e) = result {
            self.reject_command(index, "set target", e);
            return;
        }

        if let Some(dome) = self.rig.dome.clone() {
            if let Err(e) = dome.slew_dome(azimuth).await {
                self.reject_command(index, "dome slew", e);
                return;
            }
        }

        let result = self.rig.mount.start_slewing().await;
        if let Err(e) = result {
            self.reject_command(index, "mount slew", e);
        }
    }

    pub(crate) async fn on_mount_slewed(&mut self) {
        if self.rendezvous.mount_slewed() {
            self.start_next_exposure().await;
        } else {
            tracing::debug!("Mount slewed, waiting for dome");
        }
    }

    pub(crate) async fn on_dome_slewed(&mut self) {
        if self.rendezvous.dome_slewed() {
            self.start_next_exposure().await;
        } else {
            tracing::debug!("Dome slewed, waiting for mount");
        }
    }

    /// A device refused a command for `index`. The point is left where it
    /// is; the pass will not get past it unless the run is ended or cancelled.
    pub(crate) fn reject_command(&mut self, index: usize, command: &str, reason: String) {
        self.rendezvous.reset();
        tracing::warn!("Point [{:02}]: {} rejected: {}", index, command, reason);
        self.emit(BuildEvent::CommandRejected {
            index,
            command: command.to_string(),
            reason,
        });
    }
}
