//! Great-circle distance and nearest-city selection.

use std::collections::HashSet;

use crate::models::City;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Half-width of the first-pass search box, in degrees.
pub const BBOX_DEGREES: f64 = 2.0;

/// Below this many boxed candidates the full city list is consulted too.
pub const MIN_BOX_RESULTS: usize = 5;

/// Upper bound on rows pulled by the full-table fallback.
pub const FULL_SCAN_LIMIT: usize = 5000;

#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box of ±`degrees` around a point, latitude clamped to the poles.
    #[must_use]
    pub fn around(lat: f64, lon: f64, degrees: f64) -> Self {
        Self {
            min_lat: (lat - degrees).max(-90.0),
            max_lat: (lat + degrees).min(90.0),
            min_lon: lon - degrees,
            max_lon: lon + degrees,
        }
    }

    /// Longitudes past ±180 wrap, so a plain range query misses the far side.
    #[must_use]
    pub fn crosses_antimeridian(&self) -> bool {
        self.min_lon < -180.0 || self.max_lon > 180.0
    }

    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Boxed results followed by any full-scan rows not already present.
#[must_use]
pub fn merge_candidates(boxed: Vec<City>, full: Vec<City>) -> Vec<City> {
    let mut seen: HashSet<i64> = boxed.iter().map(|c| c.id).collect();
    let mut all = boxed;
    for city in full {
        if seen.insert(city.id) {
            all.push(city);
        }
    }
    all
}

/// Closest candidate by haversine distance; ties keep the earlier candidate.
#[must_use]
pub fn nearest_city(candidates: &[City], lat: f64, lon: f64) -> Option<&City> {
    let mut best: Option<(&City, f64)> = None;
    for city in candidates {
        let d = haversine_km(lat, lon, city.latitude, city.longitude);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((city, d)),
        }
    }
    best.map(|(c, _)| c)
}
