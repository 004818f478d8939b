//! End-to-end pipeline tests on synthetic ground-truth tracks.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tripline::synthetic::MobilityScenario;
use tripline::{
    create_activity_flag, generate_staypoints, generate_tours, generate_triplegs, generate_trips,
    ActivityMethod, Staypoints, StaypointConfig, TourConfig, TripConfig, TriplegConfig, Triplegs,
    Trips,
};

fn run_pipeline(users: u64) -> (Staypoints, Triplegs, Trips) {
    let pfs = MobilityScenario::commute_day(42)
        .with_users(users)
        .generate()
        .unwrap();

    let sp_config = StaypointConfig {
        include_last: true,
        ..StaypointConfig::default()
    };
    let (pfs, staypoints) = generate_staypoints(&pfs, &sp_config).unwrap();
    let (_, triplegs) = generate_triplegs(&pfs, &TriplegConfig::default()).unwrap();
    let staypoints = create_activity_flag(&staypoints, ActivityMethod::TimeThreshold, 25.0);
    let (staypoints, triplegs, trips) =
        generate_trips(&staypoints, &triplegs, &TripConfig::default()).unwrap();
    (staypoints, triplegs, trips)
}

#[test]
fn test_commute_day_segments_cleanly() {
    let (staypoints, triplegs, trips) = run_pipeline(1);

    // home, work, cafe, work, home - the trailing home dwell needs
    // include_last since nobody steps out of it
    assert_eq!(staypoints.len(), 5);
    assert_eq!(triplegs.len(), 4);
    assert_eq!(trips.len(), 4);

    // every dwell is long enough to be an activity, so each trip is a single
    // tripleg between two known activities
    for trip in trips.records() {
        assert!(trip.origin_staypoint_id.is_some());
        assert!(trip.destination_staypoint_id.is_some());
        assert!(trip.endpoints.is_some());
    }
}

#[test]
fn test_intervals_never_overlap_and_leave_no_holes() {
    let (staypoints, triplegs, _) = run_pipeline(3);

    for user in 0..3 {
        let mut intervals: Vec<(DateTime<Utc>, DateTime<Utc>)> = staypoints
            .records()
            .iter()
            .filter(|s| s.user_id == user)
            .map(|s| (s.started_at, s.finished_at))
            .chain(
                triplegs
                    .records()
                    .iter()
                    .filter(|t| t.user_id == user)
                    .map(|t| (t.started_at, t.finished_at)),
            )
            .collect();
        intervals.sort();
        assert!(!intervals.is_empty());

        for pair in intervals.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "user {user} intervals overlap");
            assert_eq!(pair[1].0, pair[0].1, "user {user} intervals leave a hole");
        }
    }
}

#[test]
fn test_trips_cover_the_tripleg_set_exactly() {
    let (_, triplegs, trips) = run_pipeline(3);

    // every tripleg is placed in exactly one trip
    assert!(triplegs.records().iter().all(|t| t.trip_id.is_some()));

    let placed: HashSet<u64> = triplegs.records().iter().map(|t| t.id).collect();
    let mut covered = HashSet::new();
    for trip in trips.records() {
        for tpl in triplegs
            .records()
            .iter()
            .filter(|t| t.trip_id == Some(trip.id))
        {
            assert!(covered.insert(tpl.id), "tripleg {} placed twice", tpl.id);
            assert_eq!(tpl.user_id, trip.user_id);
        }
    }
    assert_eq!(placed, covered);
}

#[test]
fn test_commute_day_contains_nested_tours() {
    let (_, _, trips) = run_pipeline(1);

    let (trips, tours) = generate_tours(&trips, None, &TourConfig::default()).unwrap();

    // the inner work → cafe → work loop and the outer home → ... → home loop
    assert_eq!(tours.len(), 2);
    assert_eq!(tours.records()[0].trips.len(), 2);
    assert_eq!(tours.records()[1].trips.len(), 4);

    let tour_ids: Vec<&[u64]> = trips.records().iter().map(|t| t.tour_ids.as_slice()).collect();
    assert_eq!(tour_ids[0], [1]);
    assert_eq!(tour_ids[1], [0, 1]);
    assert_eq!(tour_ids[2], [0, 1]);
    assert_eq!(tour_ids[3], [1]);

    for tour in tours.records() {
        assert!(tour.finished_at - tour.started_at <= chrono::Duration::days(1));
    }
}

#[test]
fn test_multi_user_results_are_per_user_and_dense() {
    let (_, _, trips) = run_pipeline(3);

    assert_eq!(trips.len(), 12);
    let ids: Vec<u64> = trips.records().iter().map(|t| t.id).collect();
    assert_eq!(ids, (0..12).collect::<Vec<u64>>());

    let (trips, tours) = generate_tours(&trips, None, &TourConfig::default()).unwrap();
    assert_eq!(tours.len(), 6);
    for tour in tours.records() {
        let members: Vec<&tripline::Trip> = trips
            .records()
            .iter()
            .filter(|t| tour.trips.contains(&t.id))
            .collect();
        assert!(members.iter().all(|t| t.user_id == tour.user_id));
    }
}
