//! Tests for trip assembly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tripline::{
    generate_trips, Crs, GeoPoint, SegmentationError, Staypoint, Staypoints, TripConfig, Tripleg,
    Triplegs,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 7, 1, 6, 0, 0).unwrap()
}

fn minute(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

fn sp(id: u64, user: u64, from: i64, to: i64, x: f64, activity: bool) -> Staypoint {
    let mut s = Staypoint::new(id, user, minute(from), minute(to), GeoPoint::new(x, 47.37));
    s.is_activity = Some(activity);
    s
}

fn tpl(id: u64, user: u64, from: i64, to: i64, x0: f64, x1: f64) -> Tripleg {
    Tripleg::new(
        id,
        user,
        minute(from),
        minute(to),
        vec![GeoPoint::new(x0, 47.37), GeoPoint::new(x1, 47.37)],
    )
}

fn collections(sps: Vec<Staypoint>, tpls: Vec<Tripleg>) -> (Staypoints, Triplegs) {
    (
        Staypoints::new(sps, Crs::Wgs84).unwrap(),
        Triplegs::new(tpls, Crs::Wgs84).unwrap(),
    )
}

#[test]
fn test_basic_trip_between_two_activities() {
    let (sps, tpls) = collections(
        vec![
            sp(0, 0, 0, 60, 8.55, true),
            sp(1, 0, 75, 85, 8.56, false),
            sp(2, 0, 100, 200, 8.57, true),
        ],
        vec![tpl(0, 0, 60, 75, 8.55, 8.56), tpl(1, 0, 85, 100, 8.56, 8.57)],
    );

    let (sps, tpls, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();

    assert_eq!(trips.len(), 1);
    let trip = &trips.records()[0];
    assert_eq!(trip.origin_staypoint_id, Some(0));
    assert_eq!(trip.destination_staypoint_id, Some(2));
    // bounds are those of the first/last constituent, not the activities
    assert_eq!(trip.started_at, minute(60));
    assert_eq!(trip.finished_at, minute(100));
    assert_eq!(trip.endpoints, Some((GeoPoint::new(8.55, 47.37), GeoPoint::new(8.57, 47.37))));

    // the intermediate staypoint is absorbed, the activities hold neighbor ids
    let by_id = |id: u64| sps.records().iter().find(|s| s.id == id).unwrap();
    assert_eq!(by_id(1).trip_id, Some(0));
    assert_eq!(by_id(1).prev_trip_id, None);
    assert_eq!(by_id(0).next_trip_id, Some(0));
    assert_eq!(by_id(0).trip_id, None);
    assert_eq!(by_id(2).prev_trip_id, Some(0));
    assert_eq!(by_id(2).next_trip_id, None);

    assert!(tpls.records().iter().all(|t| t.trip_id == Some(0)));
}

#[test]
fn test_gap_splits_trip_with_unknown_boundaries() {
    let (sps, tpls) = collections(
        vec![sp(0, 0, 0, 60, 8.55, true), sp(1, 0, 210, 270, 8.58, true)],
        vec![tpl(0, 0, 60, 75, 8.55, 8.56), tpl(1, 0, 195, 210, 8.57, 8.58)],
    );

    let (_, _, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();

    assert_eq!(trips.len(), 2);
    let first = &trips.records()[0];
    assert_eq!(first.origin_staypoint_id, Some(0));
    assert_eq!(first.destination_staypoint_id, None);
    // unknown destination falls back to the last tripleg coordinate
    assert_eq!(first.endpoints.unwrap().1, GeoPoint::new(8.56, 47.37));

    let second = &trips.records()[1];
    assert_eq!(second.origin_staypoint_id, None);
    assert_eq!(second.destination_staypoint_id, Some(1));
    assert_eq!(second.endpoints.unwrap().0, GeoPoint::new(8.57, 47.37));
}

#[test]
fn test_consecutive_activities_collapse_to_last() {
    let (sps, tpls) = collections(
        vec![
            sp(0, 0, 0, 30, 8.55, true),
            sp(1, 0, 30, 70, 8.55, true),
            sp(2, 0, 80, 120, 8.57, true),
        ],
        vec![tpl(0, 0, 70, 80, 8.55, 8.57)],
    );

    let (sps, _, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();

    assert_eq!(trips.len(), 1);
    // the origin is the last activity of the run
    assert_eq!(trips.records()[0].origin_staypoint_id, Some(1));

    let first = sps.records().iter().find(|s| s.id == 0).unwrap();
    assert_eq!(first.trip_id, None);
    assert_eq!(first.prev_trip_id, None);
    assert_eq!(first.next_trip_id, None);
}

#[test]
fn test_staypoint_only_candidate_produces_no_trip() {
    let (sps, tpls) = collections(
        vec![
            sp(0, 0, 0, 30, 8.55, true),
            sp(1, 0, 30, 35, 8.55, false),
            sp(2, 0, 35, 80, 8.55, true),
            sp(3, 0, 90, 130, 8.57, true),
        ],
        vec![tpl(0, 0, 80, 90, 8.55, 8.57)],
    );

    let (sps, _, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();

    // only the tripleg span materializes
    assert_eq!(trips.len(), 1);
    assert_eq!(trips.records()[0].origin_staypoint_id, Some(2));
    assert_eq!(trips.records()[0].destination_staypoint_id, Some(3));
    assert_eq!(trips.records()[0].id, 0);

    let short = sps.records().iter().find(|s| s.id == 1).unwrap();
    assert_eq!(short.trip_id, None);
}

#[test]
fn test_user_without_staypoints_is_legal() {
    let sps = Staypoints::new(Vec::new(), Crs::Wgs84).unwrap();
    let tpls = Triplegs::new(
        vec![tpl(0, 4, 0, 10, 8.55, 8.56), tpl(1, 9, 0, 10, 8.60, 8.61)],
        Crs::Wgs84,
    )
    .unwrap();

    let (_, tpls, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();

    assert_eq!(trips.len(), 2);
    assert_eq!(trips.records()[0].user_id, 4);
    assert_eq!(trips.records()[1].user_id, 9);
    assert!(trips
        .records()
        .iter()
        .all(|t| t.origin_staypoint_id.is_none() && t.destination_staypoint_id.is_none()));
    assert_eq!(tpls.records()[0].trip_id, Some(0));
    assert_eq!(tpls.records()[1].trip_id, Some(1));
}

#[test]
fn test_missing_activity_flag_is_rejected() {
    let mut bare = sp(0, 0, 0, 60, 8.55, true);
    bare.is_activity = None;
    let sps = Staypoints::new(vec![bare], Crs::Wgs84).unwrap();
    let tpls = Triplegs::new(vec![tpl(0, 0, 60, 75, 8.55, 8.56)], Crs::Wgs84).unwrap();

    let err = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        SegmentationError::MissingActivityFlag { staypoint_id: 0 }
    ));
}

#[test]
fn test_crs_mismatch_is_rejected() {
    let sps = Staypoints::new(vec![sp(0, 0, 0, 60, 8.55, true)], Crs::Projected).unwrap();
    let tpls = Triplegs::new(vec![tpl(0, 0, 60, 75, 8.55, 8.56)], Crs::Wgs84).unwrap();

    let err = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap_err();
    assert!(matches!(err, SegmentationError::CrsMismatch { .. }));
}

#[test]
fn test_gap_directly_after_activity_wins_the_origin() {
    // The activity ends and a recording gap follows immediately: the next
    // trip starts in the void, not at the activity.
    let (sps, tpls) = collections(
        vec![
            sp(0, 0, 0, 60, 8.55, true),
            sp(1, 0, 70, 100, 8.56, true),
            sp(2, 0, 230, 300, 8.58, true),
        ],
        vec![tpl(0, 0, 60, 70, 8.55, 8.56), tpl(1, 0, 220, 230, 8.57, 8.58)],
    );

    let (sps, _, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();

    assert_eq!(trips.len(), 2);
    let second = &trips.records()[1];
    assert_eq!(second.origin_staypoint_id, None);
    assert_eq!(second.destination_staypoint_id, Some(2));

    let middle = sps.records().iter().find(|s| s.id == 1).unwrap();
    assert_eq!(middle.prev_trip_id, Some(0));
    assert_eq!(middle.next_trip_id, None);
}

#[test]
fn test_reassembly_is_idempotent() {
    let (sps, tpls) = collections(
        vec![
            sp(0, 0, 0, 60, 8.55, true),
            sp(1, 0, 75, 85, 8.56, false),
            sp(2, 0, 100, 200, 8.57, true),
            sp(3, 1, 0, 40, 8.60, true),
        ],
        vec![
            tpl(0, 0, 60, 75, 8.55, 8.56),
            tpl(1, 0, 85, 100, 8.56, 8.57),
            tpl(2, 1, 40, 55, 8.60, 8.61),
        ],
    );

    let config = TripConfig::default();
    let (sps1, tpls1, trips1) = generate_trips(&sps, &tpls, &config).unwrap();
    let (sps2, tpls2, trips2) = generate_trips(&sps1, &tpls1, &config).unwrap();

    assert_eq!(trips1.records(), trips2.records());
    assert_eq!(sps1.records(), sps2.records());
    assert_eq!(tpls1.records(), tpls2.records());
}

#[test]
fn test_no_triplegs_means_no_trips() {
    let sps = Staypoints::new(vec![sp(0, 0, 0, 60, 8.55, true)], Crs::Wgs84).unwrap();
    let tpls = Triplegs::new(Vec::new(), Crs::Wgs84).unwrap();

    let (_, _, trips) = generate_trips(&sps, &tpls, &TripConfig::default()).unwrap();
    assert!(trips.is_empty());
}
