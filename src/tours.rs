//! Tour detection from trips.
//!
//! A tour is a chronological run of trips that returns to its starting
//! location within a time budget. Each user's trips feed a stack automaton:
//! the stack holds start candidates (and markers for spatial gaps between
//! consecutive trips), and every trip with a known destination walks the
//! stack backwards looking for a candidate whose origin closes the loop.
//! Nested and overlapping tours are expected; a trip can sit on several
//! tours and records all of them, innermost first.
//!
//! Closure is tested via location ids when annotated staypoints are
//! supplied, and via endpoint proximity (`max_dist`) otherwise.

use std::collections::HashMap;

use chrono::Duration;
use log::{info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Result, SegmentationError};
use crate::geo_utils::point_distance;
use crate::{Crs, Staypoints, Tour, Tours, Trip, Trips};

/// Configuration for [`generate_tours`].
#[derive(Debug, Clone)]
pub struct TourConfig {
    /// Maximum distance between the end of one trip and the start of the
    /// next trip on a tour. Meters for WGS84 geometry, CRS units for
    /// projected geometry. Only used without location-annotated staypoints.
    /// Default: 100.0
    pub max_dist: f64,

    /// Maximum duration of a tour.
    /// Default: 1 day
    pub max_time: Duration,

    /// Maximum number of spatial gaps bridged on a tour. Gaps are only
    /// counted, not bounded in extent, so values above zero deserve caution:
    /// two trips hours apart can still end up on one tour.
    /// Default: 0
    pub max_nr_gaps: usize,
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            max_dist: 100.0,
            max_time: Duration::days(1),
            max_nr_gaps: 0,
        }
    }
}

impl TourConfig {
    /// Set `max_time` from a duration string such as `"1d"` or `"8h"`.
    pub fn with_max_time_str(mut self, value: &str) -> Result<Self> {
        self.max_time = parse_duration(value)?;
        Ok(self)
    }
}

/// Parse a duration string of the form `<number><unit>` with unit `d`, `h`,
/// `m` or `s`, e.g. `"1d"`, `"2h"`, `"30m"`, `"1.5h"`.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let v = value.trim();
    if v.len() < 2 || !v.is_char_boundary(v.len() - 1) {
        return Err(SegmentationError::InvalidDuration {
            value: value.to_string(),
        });
    }
    let (number, unit) = v.split_at(v.len() - 1);
    let n: f64 = number.trim().parse().map_err(|_| SegmentationError::InvalidDuration {
        value: value.to_string(),
    })?;
    if !n.is_finite() || n < 0.0 {
        return Err(SegmentationError::InvalidDuration {
            value: value.to_string(),
        });
    }
    let seconds = match unit {
        "d" => n * 86_400.0,
        "h" => n * 3_600.0,
        "m" => n * 60.0,
        "s" => n,
        _ => {
            return Err(SegmentationError::InvalidDuration {
                value: value.to_string(),
            })
        }
    };
    Ok(Duration::milliseconds((seconds * 1000.0).round() as i64))
}

/// Detect tours from trips.
///
/// With `staypoints` supplied (annotated with location ids by an external
/// clustering step), two trip endpoints count as the same place when their
/// staypoints share a location id. Without staypoints, the trips must carry
/// endpoint geometry and places match within `max_dist`.
///
/// Returns a copy of the trips with `tour_ids` filled in plus the tour
/// collection. Finding no tours is not an error: the tour collection comes
/// back empty (with a warning) and every trip has an empty `tour_ids`.
pub fn generate_tours(
    trips: &Trips,
    staypoints: Option<&Staypoints>,
    config: &TourConfig,
) -> Result<(Trips, Tours)> {
    // Contract checks happen before any processing.
    let locations: Option<HashMap<u64, Option<u64>>> = match staypoints {
        Some(sps) => {
            if !sps.is_empty() && sps.records().iter().all(|sp| sp.location_id.is_none()) {
                return Err(SegmentationError::MissingAnnotation {
                    what: "staypoint location ids (run a location clustering first)",
                });
            }
            Some(
                sps.records()
                    .iter()
                    .map(|sp| (sp.id, sp.location_id))
                    .collect(),
            )
        }
        None => {
            if trips.records().iter().any(|t| t.endpoints.is_none()) {
                return Err(SegmentationError::MissingAnnotation {
                    what: "trip endpoint geometry (assemble trips with add_geometry)",
                });
            }
            None
        }
    };
    let test = match &locations {
        Some(map) => ClosureTest::Location(map),
        None => ClosureTest::Distance {
            crs: trips.crs(),
            max_dist: config.max_dist,
        },
    };

    let mut trips_out = trips.records().to_vec();
    if trips_out.iter().any(|t| !t.tour_ids.is_empty()) {
        warn!("discarding existing tour ids on input trips");
    }
    for t in &mut trips_out {
        t.tour_ids.clear();
    }

    let records = trips.records();
    let ranges = trips.user_ranges();

    #[cfg(feature = "parallel")]
    let per_user: Vec<Vec<TourDraft>> = ranges
        .par_iter()
        .map(|(_, range)| scan_user(&records[range.clone()], &test, config))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let per_user: Vec<Vec<TourDraft>> = ranges
        .iter()
        .map(|(_, range)| scan_user(&records[range.clone()], &test, config))
        .collect();

    // Single sequential pass for final dense tour ids. Per-user discovery
    // order is preserved, so a trip's tour list is ascending and its
    // innermost tour comes first.
    let mut tour_records = Vec::new();
    let mut next_id: u64 = 0;
    for ((user_id, range), drafts) in ranges.iter().zip(per_user) {
        for draft in drafts {
            let id = next_id;
            next_id += 1;

            let first = &trips_out[range.start + draft.members[0]];
            let last = &trips_out[range.start + *draft.members.last().expect("tour has a trip")];
            debug_assert!(last.finished_at - first.started_at <= config.max_time);
            let record = Tour {
                id,
                user_id: *user_id,
                started_at: first.started_at,
                finished_at: last.finished_at,
                origin_staypoint_id: first.origin_staypoint_id,
                destination_staypoint_id: last.destination_staypoint_id,
                trips: draft
                    .members
                    .iter()
                    .map(|&m| trips_out[range.start + m].id)
                    .collect(),
                location_id: draft.location_id,
            };
            for &m in &draft.members {
                trips_out[range.start + m].tour_ids.push(id);
            }
            tour_records.push(record);
        }
    }

    if tour_records.is_empty() {
        warn!("no tours could be generated; returning empty tours");
    } else {
        info!("detected {} tours", tour_records.len());
    }

    Ok((
        Trips::from_sorted(trips_out, trips.crs()),
        Tours::from_records(tour_records),
    ))
}

/// Expand tours back to their member trips, in chronological order.
///
/// A trip's own `tour_ids` leads with the innermost tour it belongs to; this
/// helper answers the converse question and returns, for every tour, all of
/// its trips - including trips whose innermost tour is a nested one.
pub fn trips_by_tour<'a>(trips: &'a Trips, tours: &Tours) -> Vec<(u64, Vec<&'a Trip>)> {
    let by_id: HashMap<u64, &Trip> = trips.records().iter().map(|t| (t.id, t)).collect();
    tours
        .records()
        .iter()
        .map(|tour| {
            let members = tour
                .trips
                .iter()
                .filter_map(|id| by_id.get(id).copied())
                .collect();
            (tour.id, members)
        })
        .collect()
}

/// How two trip endpoints are compared for "same place".
enum ClosureTest<'a> {
    /// Staypoint location ids; unknown staypoints or unclustered locations
    /// never match.
    Location(&'a HashMap<u64, Option<u64>>),
    /// Endpoint proximity under the CRS-appropriate metric.
    Distance { crs: Crs, max_dist: f64 },
}

impl ClosureTest<'_> {
    fn location_of(map: &HashMap<u64, Option<u64>>, staypoint: Option<u64>) -> Option<u64> {
        staypoint.and_then(|id| map.get(&id).copied().flatten())
    }

    /// Does `cur` start where `prev` ended?
    fn connects(&self, prev: &Trip, cur: &Trip) -> bool {
        match self {
            ClosureTest::Location(map) => {
                let a = Self::location_of(map, prev.destination_staypoint_id);
                let b = Self::location_of(map, cur.origin_staypoint_id);
                matches!((a, b), (Some(x), Some(y)) if x == y)
            }
            ClosureTest::Distance { crs, max_dist } => {
                let (_, prev_end) = prev.endpoints.expect("endpoints checked upfront");
                let (cur_start, _) = cur.endpoints.expect("endpoints checked upfront");
                point_distance(*crs, &prev_end, &cur_start) <= *max_dist
            }
        }
    }

    /// Does `cur` end where the candidate `cand` started?
    fn closes(&self, cand: &Trip, cur: &Trip) -> bool {
        match self {
            ClosureTest::Location(map) => {
                let a = Self::location_of(map, cand.origin_staypoint_id);
                let b = Self::location_of(map, cur.destination_staypoint_id);
                matches!((a, b), (Some(x), Some(y)) if x == y)
            }
            ClosureTest::Distance { crs, max_dist } => {
                let (cand_start, _) = cand.endpoints.expect("endpoints checked upfront");
                let (_, cur_end) = cur.endpoints.expect("endpoints checked upfront");
                point_distance(*crs, &cand_start, &cur_end) <= *max_dist
            }
        }
    }
}

/// A tour found in one user's scan. `members` are indices into the user's
/// trip slice, chronological and free of gap markers.
struct TourDraft {
    members: Vec<usize>,
    location_id: Option<u64>,
}

/// Stack automaton over one user's chronological trips.
///
/// `candidates` holds start candidates as `Some(index)` and spatial gap
/// markers as `None`; it never ends with a marker because the current trip is
/// pushed right after one. Front trimming only removes entries no future
/// closure can reach (expired, or behind an over-budget gap), so it cannot
/// change outcomes.
fn scan_user(trips: &[Trip], test: &ClosureTest, config: &TourConfig) -> Vec<TourDraft> {
    debug_assert!(trips.iter().all(|t| t.user_id == trips[0].user_id));

    let mut tours = Vec::new();
    let mut candidates: Vec<Option<usize>> = Vec::new();

    for idx in 0..trips.len() {
        let row = &trips[idx];

        if let Some(&last) = candidates.last() {
            let prev = last.expect("stack never ends with a gap marker");
            if !test.connects(&trips[prev], row) {
                if config.max_nr_gaps == 0 {
                    // no tour can bridge the discontinuity
                    candidates.clear();
                    candidates.push(Some(idx));
                    continue;
                }
                candidates.push(None);
            }
        }
        candidates.push(Some(idx));

        // An unknown destination can never close a tour.
        if row.destination_staypoint_id.is_none() {
            continue;
        }

        let end_time = row.finished_at;
        let len = candidates.len();
        let mut new_list_start = 0;
        let mut gap_counter = 0usize;

        for (j, cand) in candidates.iter().rev().enumerate() {
            match *cand {
                None => {
                    gap_counter += 1;
                    if gap_counter > config.max_nr_gaps {
                        // Gaps never vanish: nothing at or beyond this marker
                        // can take part in a later closure either.
                        new_list_start = len - j;
                        break;
                    }
                }
                Some(c) => {
                    let cand_trip = &trips[c];
                    if end_time - cand_trip.started_at > config.max_time {
                        // Older candidates only get harder to satisfy as
                        // time advances.
                        new_list_start = len - j;
                        break;
                    }
                    if cand_trip.origin_staypoint_id.is_none() {
                        continue;
                    }
                    if test.closes(cand_trip, row) {
                        let members: Vec<usize> =
                            candidates[len - 1 - j..].iter().filter_map(|c| *c).collect();
                        let location_id = match test {
                            ClosureTest::Location(map) => {
                                let start_loc = ClosureTest::location_of(
                                    map,
                                    cand_trip.origin_staypoint_id,
                                );
                                debug_assert_eq!(
                                    start_loc,
                                    ClosureTest::location_of(map, row.destination_staypoint_id)
                                );
                                start_loc
                            }
                            ClosureTest::Distance { .. } => None,
                        };
                        tours.push(TourDraft {
                            members,
                            location_id,
                        });
                        // One trip cannot close two tours at a time.
                        break;
                    }
                }
            }
        }

        candidates.drain(..new_list_start);
    }

    tours
}
