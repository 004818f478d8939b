//! Geographic helpers shared by the segmentation stages.
//!
//! Distances are dispatched on the coordinate reference system of the input
//! collection: great-circle (haversine) for WGS84 longitude/latitude, planar
//! Euclidean for projected coordinates. The CRS is always carried explicitly
//! by the collections; it is never guessed from coordinate values.

use std::str::FromStr;

use geo::{Distance, Euclidean, Haversine, Point};

use crate::error::SegmentationError;
use crate::{Crs, GeoPoint};

/// Great-circle distance between two WGS84 points, in meters.
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    Haversine::distance(Point::new(a.x, a.y), Point::new(b.x, b.y))
}

/// Planar distance between two projected points, in the unit of the CRS.
pub fn euclidean_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    Euclidean::distance(Point::new(a.x, a.y), Point::new(b.x, b.y))
}

/// Distance between two points under the metric appropriate for `crs`.
pub fn point_distance(crs: Crs, a: &GeoPoint, b: &GeoPoint) -> f64 {
    DistanceMetric::for_crs(crs).distance(a, b)
}

/// Total length of a path, in meters (WGS84) or CRS units (projected).
pub fn polyline_length(crs: Crs, path: &[GeoPoint]) -> f64 {
    path.windows(2)
        .map(|w| point_distance(crs, &w[0], &w[1]))
        .sum()
}

/// Coordinate-wise mean of a set of points.
///
/// Returns `None` for an empty slice.
pub fn mean_point(points: &[GeoPoint]) -> Option<GeoPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(GeoPoint::new(sx / n, sy / n))
}

/// Convert a distance in meters to approximate degrees at a given latitude.
///
/// Useful for jittering synthetic WGS84 tracks; not precise enough for
/// distance comparisons, which should go through [`point_distance`].
pub fn meters_to_degrees(meters: f64, at_latitude: f64) -> (f64, f64) {
    let lat_deg = meters / 111_320.0;
    let lon_deg = meters / (111_320.0 * at_latitude.to_radians().cos().max(1e-12));
    (lon_deg, lat_deg)
}

/// The distance metric applied by the segmentation stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Great-circle distance on WGS84 longitude/latitude, in meters.
    Haversine,
    /// Planar distance on projected coordinates, in CRS units.
    Euclidean,
}

impl DistanceMetric {
    /// The metric matching a coordinate reference system.
    pub fn for_crs(crs: Crs) -> Self {
        match crs {
            Crs::Wgs84 => DistanceMetric::Haversine,
            Crs::Projected => DistanceMetric::Euclidean,
        }
    }

    /// Distance between two points under this metric.
    pub fn distance(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        match self {
            DistanceMetric::Haversine => haversine_distance(a, b),
            DistanceMetric::Euclidean => euclidean_distance(a, b),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Haversine => "haversine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "haversine" => Ok(DistanceMetric::Haversine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(SegmentationError::UnknownMetric {
                value: other.to_string(),
            }),
        }
    }
}
