//! One-shot geofence evaluation.
//!
//! `evaluate` is a pure query. Marking a fence triggered is done by the
//! navigation store so that every state transition happens in one place.

use tracing::{debug, trace};

use crate::geo::{haversine_distance_km, Coordinate};
use crate::trip::GeoFence;

/// The session's fence set.
#[derive(Debug, Clone, Default)]
pub struct GeofenceEngine {
    fences: Vec<GeoFence>,
}

impl GeofenceEngine {
    /// Create an engine over `fences`, all armed.
    #[must_use]
    pub fn new(fences: Vec<GeoFence>) -> Self {
        let mut engine = Self { fences };
        engine.rearm_all();
        engine
    }

    /// Return the first armed fence whose radius contains `position`.
    ///
    /// Fences are checked in list order and the first hit wins, even when a
    /// later overlapping fence is closer.
    #[must_use]
    pub fn evaluate(&self, position: Coordinate) -> Option<&GeoFence> {
        self.fences.iter().filter(|f| !f.triggered).find(|f| {
            let distance = haversine_distance_km(
                position.lat,
                position.lng,
                f.center.lat,
                f.center.lng,
            );
            trace!(fence = %f.id, distance, radius = f.radius_km, "geofence check");
            distance <= f.radius_km
        })
    }

    /// Mark a fence as fired. Returns `false` if the id is unknown or the
    /// fence had already fired.
    pub fn mark_triggered(&mut self, id: &str) -> bool {
        match self.fences.iter_mut().find(|f| f.id == id) {
            Some(fence) if !fence.triggered => {
                fence.triggered = true;
                true
            }
            _ => false,
        }
    }

    /// Re-arm every fence.
    pub fn rearm_all(&mut self) {
        for fence in &mut self.fences {
            fence.triggered = false;
        }
        debug!(count = self.fences.len(), "geofences armed");
    }

    /// Look up a fence by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&GeoFence> {
        self.fences.iter().find(|f| f.id == id)
    }

    /// All fences in evaluation order.
    #[must_use]
    pub fn fences(&self) -> &[GeoFence] {
        &self.fences
    }

    /// Number of fences that have not fired yet.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.fences.iter().filter(|f| !f.triggered).count()
    }
}
