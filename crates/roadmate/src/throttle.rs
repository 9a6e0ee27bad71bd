//! Shared debounce for work derived from location updates.
//!
//! The store recomputes its telemetry on every sample. Anything heavier, like
//! refetching route geometry, should go through [`SignificantChange`] and only
//! run when the device moved far enough or the target waypoint changed.

use crate::geo::Coordinate;

/// Default distance that counts as movement, in metres.
pub const DEFAULT_THRESHOLD_M: f64 = 50.0;

/// Distance-and-identity change detector.
#[derive(Debug, Clone)]
pub struct SignificantChange {
    threshold_m: f64,
    last_position: Option<Coordinate>,
    last_waypoint: Option<String>,
}

impl Default for SignificantChange {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_M)
    }
}

impl SignificantChange {
    /// Create a detector that fires after `threshold_m` metres of movement.
    #[must_use]
    pub fn new(threshold_m: f64) -> Self {
        Self {
            threshold_m,
            last_position: None,
            last_waypoint: None,
        }
    }

    /// Movement threshold in metres.
    #[must_use]
    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// Report whether this observation is significant, and if so remember it
    /// as the new baseline.
    ///
    /// The first observation is always significant. Small movements do not
    /// accumulate: the baseline only moves when the check fires.
    pub fn check(&mut self, position: Coordinate, waypoint_id: Option<&str>) -> bool {
        let waypoint_changed = self.last_waypoint.as_deref() != waypoint_id;
        let moved = match self.last_position {
            None => true,
            Some(last) => last.distance_km(&position) * 1000.0 >= self.threshold_m,
        };

        if !(moved || waypoint_changed) {
            return false;
        }
        self.last_position = Some(position);
        self.last_waypoint = waypoint_id.map(str::to_string);
        true
    }

    /// Forget the baseline so the next observation fires.
    pub fn reset(&mut self) {
        self.last_position = None;
        self.last_waypoint = None;
    }
}
