//! Tests for geographic helpers.

use tripline::geo_utils::{
    euclidean_distance, haversine_distance, mean_point, meters_to_degrees, point_distance,
    polyline_length,
};
use tripline::{Crs, DistanceMetric, GeoPoint, SegmentationError};

#[test]
fn test_haversine_known_distance() {
    // one hundredth of a degree of latitude is ~1113m
    let a = GeoPoint::new(8.55, 47.37);
    let b = GeoPoint::new(8.55, 47.38);
    let d = haversine_distance(&a, &b);
    assert!((d - 1113.0).abs() < 5.0, "got {d}");

    assert_eq!(haversine_distance(&a, &a), 0.0);
}

#[test]
fn test_euclidean_is_planar() {
    let a = GeoPoint::new(0.0, 0.0);
    let b = GeoPoint::new(3.0, 4.0);
    assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-12);
}

#[test]
fn test_point_distance_dispatches_on_crs() {
    let a = GeoPoint::new(0.0, 0.0);
    let b = GeoPoint::new(1.0, 0.0);

    assert!((point_distance(Crs::Projected, &a, &b) - 1.0).abs() < 1e-12);
    // one degree of longitude at the equator is ~111km
    let geographic = point_distance(Crs::Wgs84, &a, &b);
    assert!(geographic > 110_000.0 && geographic < 112_000.0);
}

#[test]
fn test_distance_metric_parsing() {
    assert_eq!(
        "haversine".parse::<DistanceMetric>().unwrap(),
        DistanceMetric::Haversine
    );
    assert_eq!(
        "Euclidean".parse::<DistanceMetric>().unwrap(),
        DistanceMetric::Euclidean
    );
    let err = "manhattan".parse::<DistanceMetric>().unwrap_err();
    assert!(matches!(err, SegmentationError::UnknownMetric { ref value } if value == "manhattan"));

    assert_eq!(DistanceMetric::for_crs(Crs::Wgs84), DistanceMetric::Haversine);
    assert_eq!(
        DistanceMetric::for_crs(Crs::Projected),
        DistanceMetric::Euclidean
    );
}

#[test]
fn test_mean_point() {
    assert_eq!(mean_point(&[]), None);

    let points = vec![
        GeoPoint::new(0.0, 0.0),
        GeoPoint::new(2.0, 4.0),
        GeoPoint::new(4.0, 2.0),
    ];
    let mean = mean_point(&points).unwrap();
    assert!((mean.x - 2.0).abs() < 1e-12);
    assert!((mean.y - 2.0).abs() < 1e-12);
}

#[test]
fn test_polyline_length() {
    let path = vec![
        GeoPoint::new(0.0, 0.0),
        GeoPoint::new(3.0, 0.0),
        GeoPoint::new(3.0, 4.0),
    ];
    assert!((polyline_length(Crs::Projected, &path) - 7.0).abs() < 1e-12);
    assert_eq!(polyline_length(Crs::Projected, &path[..1]), 0.0);
}

#[test]
fn test_meters_to_degrees_roundtrip() {
    let (lon_deg, lat_deg) = meters_to_degrees(100.0, 47.37);
    let origin = GeoPoint::new(8.55, 47.37);

    let east = GeoPoint::new(8.55 + lon_deg, 47.37);
    let north = GeoPoint::new(8.55, 47.37 + lat_deg);
    assert!((haversine_distance(&origin, &east) - 100.0).abs() < 2.0);
    assert!((haversine_distance(&origin, &north) - 100.0).abs() < 2.0);
}
