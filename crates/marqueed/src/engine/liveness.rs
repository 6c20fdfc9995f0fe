use std::time::Duration;
use std::time::Instant;

use serde::Serialize;

/// Connectivity of the controlled device, derived from heartbeat arrivals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    /// No heartbeat has ever been observed. Shown from startup until first
    /// contact; a device that never connects stays Checking, not Offline.
    #[default]
    Checking,
    Online,
    Offline,
}

/// Watches heartbeat arrival times and derives online/offline via timeout.
///
/// The status is a function of (now, last heartbeat arrival, timeout) only.
/// `tick` must be called on a cadence strictly finer than the timeout so that
/// detection latency is bounded by one cadence period.
#[derive(Debug)]
pub struct LivenessMonitor {
    timeout: Duration,
    last_heartbeat: Option<Instant>,
    status: ConnectivityStatus,
}

impl LivenessMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_heartbeat: None,
            status: ConnectivityStatus::Checking,
        }
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.status
    }

    /// Record a heartbeat arrival.
    ///
    /// Returns the new status only on an actual transition, so callers emit
    /// no redundant updates when the device is already Online.
    pub fn observe_heartbeat(&mut self, now: Instant) -> Option<ConnectivityStatus> {
        self.last_heartbeat = Some(now);
        if self.status != ConnectivityStatus::Online {
            self.status = ConnectivityStatus::Online;
            Some(self.status)
        } else {
            None
        }
    }

    /// Periodic check. Returns the new status only on a transition.
    ///
    /// Only Online can time out into Offline; before the first heartbeat the
    /// monitor stays Checking indefinitely.
    pub fn tick(&mut self, now: Instant) -> Option<ConnectivityStatus> {
        if self.status != ConnectivityStatus::Online {
            return None;
        }
        let last = self.last_heartbeat?;
        if now.duration_since(last) >= self.timeout {
            self.status = ConnectivityStatus::Offline;
            Some(self.status)
        } else {
            None
        }
    }
}
