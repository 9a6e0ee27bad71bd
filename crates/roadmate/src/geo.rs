//! Distance math and coarse area naming.
//!
//! Spherical-earth helpers. Accuracy is within ordinary GPS error, which is
//! all the telemetry strings need.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Area name used east of the last band threshold.
pub const DEFAULT_AREA_NAME: &str = "Highway Cruising";

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        haversine_distance_km(self.lat, self.lng, other.lat, other.lng)
    }
}

/// Great-circle distance between two points in kilometres.
#[must_use]
pub fn haversine_distance_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// One longitude band: every longitude strictly below `below_lng` that did
/// not match an earlier band gets `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaBand {
    /// Exclusive upper longitude bound.
    pub below_lng: f64,
    /// Display name for the band.
    pub name: String,
}

/// Ordered longitude band table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaBands {
    bands: Vec<AreaBand>,
}

impl AreaBands {
    /// Build a table, sorting bands by ascending threshold.
    #[must_use]
    pub fn new(mut bands: Vec<AreaBand>) -> Self {
        bands.sort_by(|a, b| a.below_lng.total_cmp(&b.below_lng));
        Self { bands }
    }

    /// Bands for the builtin Fukuoka to Kanmon route.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(vec![
            band(130.45, "Fukuoka City"),
            band(130.60, "Koga / Munakata"),
            band(130.80, "Kitakyushu"),
            band(130.93, "Mojiko Retro"),
            band(131.00, "Kanmon Straits"),
            band(131.20, "Shimonoseki"),
        ])
    }

    /// Name of the band containing `lng`; first match wins.
    ///
    /// NaN matches no threshold and falls through to the default band.
    #[must_use]
    pub fn area_name_for(&self, lng: f64) -> &str {
        self.band_index(lng)
            .map_or(DEFAULT_AREA_NAME, |i| self.bands[i].name.as_str())
    }

    /// Index of the matching band, `None` for the default band.
    #[must_use]
    pub fn band_index(&self, lng: f64) -> Option<usize> {
        self.bands.iter().position(|b| lng < b.below_lng)
    }

    /// Number of explicit bands (the default band is not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    /// Check if the table has no explicit bands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

impl Default for AreaBands {
    fn default() -> Self {
        Self::builtin()
    }
}

fn band(below_lng: f64, name: &str) -> AreaBand {
    AreaBand {
        below_lng,
        name: name.to_string(),
    }
}

/// Render a distance for display: metres under 1 km, one decimal above.
#[must_use]
pub fn format_distance(km: f64) -> String {
    if km < 1.0 {
        format!("{:.0} m", km * 1000.0)
    } else {
        format!("{km:.1} km")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KANMON: Coordinate = Coordinate::new(33.9598, 130.9616);
    const HAKATA: Coordinate = Coordinate::new(33.5902, 130.4207);

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(haversine_distance_km(33.9598, 130.9616, 33.9598, 130.9616), 0.0);
        assert_eq!(KANMON.distance_km(&KANMON), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (KANMON, HAKATA),
            (Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 179.5)),
            (Coordinate::new(-45.0, 170.0), Coordinate::new(60.0, -10.0)),
        ];
        for (a, b) in pairs {
            assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_known_distance() {
        // Hakata station to the Kanmon strait is roughly 65 km in a straight line.
        let d = HAKATA.distance_km(&KANMON);
        assert!(d > 60.0 && d < 70.0, "got {d}");
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_distance_km(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111.19).abs() < 0.1, "got {d}");
    }

    #[test]
    fn test_nan_passes_through() {
        assert!(haversine_distance_km(f64::NAN, 0.0, 0.0, 0.0).is_nan());
    }

    #[test]
    fn test_area_name_first_match_wins() {
        let bands = AreaBands::builtin();
        assert_eq!(bands.area_name_for(130.40), "Fukuoka City");
        assert_eq!(bands.area_name_for(130.9616), "Kanmon Straits");
        assert_eq!(bands.area_name_for(131.10), "Shimonoseki");
    }

    #[test]
    fn test_area_name_default_band() {
        let bands = AreaBands::builtin();
        assert_eq!(bands.area_name_for(135.0), DEFAULT_AREA_NAME);
        assert_eq!(bands.area_name_for(f64::NAN), DEFAULT_AREA_NAME);
    }

    #[test]
    fn test_area_bands_sorted_on_construction() {
        let bands = AreaBands::new(vec![band(20.0, "B"), band(10.0, "A")]);
        assert_eq!(bands.area_name_for(5.0), "A");
        assert_eq!(bands.area_name_for(15.0), "B");
        assert_eq!(bands.len(), 2);
    }

    #[test]
    fn test_area_lookup_is_monotonic() {
        let bands = AreaBands::builtin();
        let mut last = 0usize;
        let mut lng = 129.5;
        while lng < 132.0 {
            // Default band sorts after every explicit band.
            let idx = bands.band_index(lng).unwrap_or(bands.len());
            assert!(idx >= last, "band went backwards at {lng}");
            last = idx;
            lng += 0.005;
        }
        assert_eq!(last, bands.len());
    }

    #[test]
    fn test_empty_bands_always_default() {
        let bands = AreaBands::new(Vec::new());
        assert!(bands.is_empty());
        assert_eq!(bands.area_name_for(0.0), DEFAULT_AREA_NAME);
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(0.25), "250 m");
        assert_eq!(format_distance(1.0), "1.0 km");
        assert_eq!(format_distance(12.345), "12.3 km");
    }
}
