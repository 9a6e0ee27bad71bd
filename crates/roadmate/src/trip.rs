//! Trip definition: the fixed waypoint sequence and the geofence set.
//!
//! A trip is loaded once at session start and never mutated afterwards,
//! except for the geofence `triggered` flags owned by the store.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo::Coordinate;

/// Role a waypoint plays along the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointCategory {
    /// Departure point.
    Start,
    /// Passenger pickup.
    Pickup,
    /// Parking stop.
    Parking,
    /// Sightseeing stop.
    Sightseeing,
    /// Overnight stay.
    Hotel,
    /// Final destination.
    Goal,
}

impl std::fmt::Display for WaypointCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Pickup => write!(f, "pickup"),
            Self::Parking => write!(f, "parking"),
            Self::Sightseeing => write!(f, "sightseeing"),
            Self::Hotel => write!(f, "hotel"),
            Self::Goal => write!(f, "goal"),
        }
    }
}

/// A named stop along the route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    /// Stable unique id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Location of the stop.
    pub coords: Coordinate,
    /// Category tag.
    pub category: WaypointCategory,
    /// Descriptions, images, quests. Never interpreted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Text announced when a geofence fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    /// Text shown on screen.
    pub text: String,
    /// Variant tuned for speech; falls back to `text` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoken_text: Option<String>,
}

impl Announcement {
    /// The text to hand to speech synthesis.
    #[must_use]
    pub fn speech(&self) -> &str {
        self.spoken_text.as_deref().unwrap_or(&self.text)
    }
}

/// A circular one-shot trigger region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFence {
    /// Stable id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Centre of the region.
    pub center: Coordinate,
    /// Trigger radius in kilometres.
    pub radius_km: f64,
    /// What to announce on entry.
    pub announcement: Announcement,
    /// Set once the fence has fired this session.
    #[serde(default)]
    pub triggered: bool,
}

/// The fixed route and fence set for one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    /// Ordered waypoints; the last one is the goal.
    pub waypoints: Vec<Waypoint>,
    /// Geofences, evaluated in list order.
    #[serde(default)]
    pub geofences: Vec<GeoFence>,
}

impl Trip {
    /// Load a trip from a JSON file.
    ///
    /// Fences are always armed on load, whatever the file says.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not describe a trip.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::trip_load(path, e.to_string()))?;
        let mut trip: Trip =
            serde_json::from_str(&raw).map_err(|e| Error::trip_load(path, e.to_string()))?;
        trip.validate().map_err(|message| Error::trip_load(path, message))?;
        for fence in &mut trip.geofences {
            fence.triggered = false;
        }
        Ok(trip)
    }

    /// Load from `path` when given, otherwise the builtin trip.
    ///
    /// # Errors
    ///
    /// Returns an error if a given file cannot be loaded.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::builtin()),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for wp in &self.waypoints {
            if !seen.insert(wp.id.as_str()) {
                return Err(format!("duplicate waypoint id '{}'", wp.id));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for fence in &self.geofences {
            if !seen.insert(fence.id.as_str()) {
                return Err(format!("duplicate geofence id '{}'", fence.id));
            }
            if fence.radius_km.is_nan() || fence.radius_km < 0.0 {
                return Err(format!("geofence '{}' has a negative radius", fence.id));
            }
        }
        Ok(())
    }

    /// Look up a waypoint by id.
    #[must_use]
    pub fn waypoint(&self, id: &str) -> Option<&Waypoint> {
        self.waypoints.iter().find(|w| w.id == id)
    }

    /// The final waypoint of the sequence.
    #[must_use]
    pub fn goal(&self) -> Option<&Waypoint> {
        self.waypoints.last()
    }

    /// A two-day Fukuoka to Shimonoseki loop.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            waypoints: vec![
                waypoint("hakata", "Hakata Station", 33.5902, 130.4207, WaypointCategory::Start),
                waypoint("tenjin", "Tenjin Pickup", 33.5911, 130.3989, WaypointCategory::Pickup),
                waypoint("munakata", "Munakata Taisha", 33.8306, 130.5144, WaypointCategory::Sightseeing),
                waypoint("kokura", "Kokura Castle", 33.8845, 130.8746, WaypointCategory::Sightseeing),
                waypoint("mojiko", "Mojiko Retro Parking", 33.9451, 130.9617, WaypointCategory::Parking),
                waypoint("karato", "Karato Market", 33.9573, 130.9414, WaypointCategory::Hotel),
                waypoint("tsunoshima", "Tsunoshima Bridge", 34.3508, 130.8868, WaypointCategory::Goal),
            ],
            geofences: vec![
                fence(
                    "munakata",
                    "Munakata Taisha",
                    33.8306,
                    130.5144,
                    1.0,
                    "Munakata Taisha is just ahead. It is a World Heritage shrine.",
                    None,
                ),
                fence(
                    "kanmon",
                    "Kanmon Straits",
                    33.9598,
                    130.9616,
                    2.0,
                    "Welcome to the Kanmon Straits! Honshu is right across the water.",
                    Some("We are crossing the Kanmon Straits. Look out for the bridge on your right."),
                ),
                fence(
                    "tsunoshima",
                    "Tsunoshima Bridge",
                    34.3508,
                    130.8868,
                    1.5,
                    "Tsunoshima Bridge coming up. Enjoy the emerald sea!",
                    Some("Almost there. The Tsunoshima Bridge is coming up."),
                ),
            ],
        }
    }
}

fn waypoint(id: &str, name: &str, lat: f64, lng: f64, category: WaypointCategory) -> Waypoint {
    Waypoint {
        id: id.to_string(),
        name: name.to_string(),
        coords: Coordinate::new(lat, lng),
        category,
        details: None,
    }
}

fn fence(
    id: &str,
    name: &str,
    lat: f64,
    lng: f64,
    radius_km: f64,
    text: &str,
    spoken: Option<&str>,
) -> GeoFence {
    GeoFence {
        id: id.to_string(),
        name: name.to_string(),
        center: Coordinate::new(lat, lng),
        radius_km,
        announcement: Announcement {
            text: text.to_string(),
            spoken_text: spoken.map(str::to_string),
        },
        triggered: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_trip_shape() {
        let trip = Trip::builtin();
        assert!(!trip.waypoints.is_empty());
        assert_eq!(trip.goal().unwrap().category, WaypointCategory::Goal);
        assert_eq!(trip.waypoints[0].category, WaypointCategory::Start);
        assert!(trip.validate().is_ok());
        assert!(trip.geofences.iter().all(|f| !f.triggered));
    }

    #[test]
    fn test_builtin_kanmon_fence() {
        let trip = Trip::builtin();
        let kanmon = trip.geofences.iter().find(|f| f.id == "kanmon").unwrap();
        assert_eq!(kanmon.center, Coordinate::new(33.9598, 130.9616));
        assert!(kanmon.announcement.spoken_text.is_some());
    }

    #[test]
    fn test_waypoint_lookup() {
        let trip = Trip::builtin();
        assert_eq!(trip.waypoint("kokura").unwrap().name, "Kokura Castle");
        assert!(trip.waypoint("nonexistent-id").is_none());
    }

    #[test]
    fn test_announcement_speech_fallback() {
        let a = Announcement {
            text: "Shown".to_string(),
            spoken_text: None,
        };
        assert_eq!(a.speech(), "Shown");

        let a = Announcement {
            text: "Shown".to_string(),
            spoken_text: Some("Spoken".to_string()),
        };
        assert_eq!(a.speech(), "Spoken");
    }

    #[test]
    fn test_category_display() {
        assert_eq!(WaypointCategory::Sightseeing.to_string(), "sightseeing");
        assert_eq!(WaypointCategory::Goal.to_string(), "goal");
    }

    #[test]
    fn test_waypoint_serialization_passes_details_through() {
        let json = r#"{
            "id": "kokura",
            "name": "Kokura Castle",
            "coords": {"lat": 33.8845, "lng": 130.8746},
            "category": "sightseeing",
            "details": {"quests": ["find the tanuki"], "images": []}
        }"#;
        let wp: Waypoint = serde_json::from_str(json).unwrap();
        assert_eq!(wp.category, WaypointCategory::Sightseeing);
        let details = wp.details.clone().unwrap();
        assert_eq!(details["quests"][0], "find the tanuki");

        let back = serde_json::to_value(&wp).unwrap();
        assert_eq!(back["details"], details);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Trip::load(Path::new("/nonexistent/trip.json")).unwrap_err();
        assert!(matches!(err, Error::TripLoad { .. }));
    }

    #[test]
    fn test_load_file_rearms_fences() {
        let mut trip = Trip::builtin();
        trip.geofences[0].triggered = true;
        let path = std::env::temp_dir().join(format!("roadmate_trip_{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&trip).unwrap()).unwrap();

        let loaded = Trip::load(&path).unwrap();
        assert!(loaded.geofences.iter().all(|f| !f.triggered));
        assert_eq!(loaded.waypoints, trip.waypoints);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_duplicate_ids() {
        let mut trip = Trip::builtin();
        let dup = trip.waypoints[0].clone();
        trip.waypoints.push(dup);
        let path = std::env::temp_dir().join(format!("roadmate_dup_{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&trip).unwrap()).unwrap();

        let err = Trip::load(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate waypoint id"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_or_builtin() {
        assert_eq!(Trip::load_or_builtin(None).unwrap(), Trip::builtin());
    }
}
