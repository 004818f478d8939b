//! # Tripline
//!
//! GPS mobility segmentation library for travel-behavior research.
//!
//! Tripline converts raw GPS trajectories (timestamped position fixes) into a
//! hierarchy of semantic mobility entities:
//!
//! - **Staypoints** - places where a user paused, detected with a sliding
//!   window over the time-ordered fixes
//! - **Triplegs** - the complementary continuous movement segments
//! - **Trips** - movement between two activities, bounded by long staypoints,
//!   recording gaps or user boundaries
//! - **Tours** - closed sequences of trips returning to their start location,
//!   including nested and overlapping tours
//!
//! Data flows strictly forward: positionfixes → (staypoints, triplegs) →
//! trips → tours. Every stage returns enriched copies of its inputs plus the
//! newly created entity collection; inputs are never mutated in place.
//!
//! ## Features
//!
//! - **`parallel`** - Process independent per-user slices with rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{Duration, TimeZone, Utc};
//! use tripline::{generate_staypoints, Crs, GeoPoint, Positionfix, Positionfixes, StaypointConfig};
//!
//! let t0 = Utc.with_ymd_and_hms(2023, 7, 1, 8, 0, 0).unwrap();
//! let home = GeoPoint::new(8.5500, 47.3700);
//!
//! // Twenty minutes at home, then walking away.
//! let mut fixes: Vec<Positionfix> = (0..5)
//!     .map(|i| Positionfix::new(0, t0 + Duration::minutes(5 * i), home))
//!     .collect();
//! for i in 0..3 {
//!     let p = GeoPoint::new(home.x + 0.02 * (i + 1) as f64, home.y);
//!     fixes.push(Positionfix::new(0, t0 + Duration::minutes(25 + 5 * i), p));
//! }
//!
//! let pfs = Positionfixes::new(fixes, Crs::Wgs84).unwrap();
//! let (pfs, staypoints) = generate_staypoints(&pfs, &StaypointConfig::default()).unwrap();
//!
//! assert_eq!(staypoints.len(), 1);
//! assert_eq!(pfs.records().iter().filter(|p| p.staypoint_id.is_some()).count(), 5);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, SegmentationError};

// Geographic utilities (distance dispatch, path length, centroids)
pub mod geo_utils;
pub use geo_utils::DistanceMetric;

// Staypoint extraction and activity labelling
pub mod staypoints;
pub use staypoints::{
    create_activity_flag, generate_staypoints, ActivityMethod, StaypointConfig, StaypointMethod,
};

// Tripleg extraction
pub mod triplegs;
pub use triplegs::{generate_triplegs, TriplegConfig};

// Trip assembly
pub mod trips;
pub use trips::{generate_trips, TripConfig};

// Tour detection
pub mod tours;
pub use tours::{generate_tours, parse_duration, trips_by_tour, TourConfig};

// Synthetic mobility tracks for tests and benchmarks
pub mod synthetic;

// ============================================================================
// Core Types
// ============================================================================

/// Coordinate reference system of a collection.
///
/// The CRS decides which distance function applies (haversine for WGS84,
/// planar Euclidean for projected coordinates). It is carried explicitly by
/// every geometric collection and never inferred from coordinate values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crs {
    /// WGS84 longitude/latitude in degrees; distances in meters.
    Wgs84,
    /// A projected system; coordinates and distances in CRS units.
    Projected,
}

impl Crs {
    pub fn is_projected(&self) -> bool {
        matches!(self, Crs::Projected)
    }
}

/// A coordinate pair, interpreted according to the owning collection's [`Crs`].
///
/// For [`Crs::Wgs84`], `x` is the longitude and `y` the latitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Check that both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// One raw GPS observation.
///
/// `staypoint_id` and `tripleg_id` start out empty and are written by
/// [`generate_staypoints`] and [`generate_triplegs`]; a fix that ends up with
/// neither was dropped from segmentation (e.g. an isolated fix between two
/// staypoints).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Positionfix {
    pub user_id: u64,
    pub tracked_at: DateTime<Utc>,
    pub point: GeoPoint,
    pub elevation: Option<f64>,
    pub accuracy: Option<f64>,
    pub staypoint_id: Option<u64>,
    pub tripleg_id: Option<u64>,
}

impl Positionfix {
    pub fn new(user_id: u64, tracked_at: DateTime<Utc>, point: GeoPoint) -> Self {
        Self {
            user_id,
            tracked_at,
            point,
            elevation: None,
            accuracy: None,
            staypoint_id: None,
            tripleg_id: None,
        }
    }

    pub fn with_elevation(mut self, elevation: f64) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// A place-time interval where a user stayed within a bounded radius.
///
/// `is_activity` is empty until [`create_activity_flag`] runs; the trip
/// assembler refuses staypoints without the flag. `trip_id` is set for
/// staypoints absorbed into a trip, `prev_trip_id`/`next_trip_id` for
/// activity staypoints that bound trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Staypoint {
    pub id: u64,
    pub user_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub point: GeoPoint,
    pub elevation: Option<f64>,
    pub is_activity: Option<bool>,
    pub location_id: Option<u64>,
    pub trip_id: Option<u64>,
    pub prev_trip_id: Option<u64>,
    pub next_trip_id: Option<u64>,
}

impl Staypoint {
    pub fn new(
        id: u64,
        user_id: u64,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        point: GeoPoint,
    ) -> Self {
        Self {
            id,
            user_id,
            started_at,
            finished_at,
            point,
            elevation: None,
            is_activity: None,
            location_id: None,
            trip_id: None,
            prev_trip_id: None,
            next_trip_id: None,
        }
    }

    /// Duration of the stay.
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// A continuous movement segment between two staypoints or track boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tripleg {
    pub id: u64,
    pub user_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub path: Vec<GeoPoint>,
    pub trip_id: Option<u64>,
}

impl Tripleg {
    pub fn new(
        id: u64,
        user_id: u64,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        path: Vec<GeoPoint>,
    ) -> Self {
        Self {
            id,
            user_id,
            started_at,
            finished_at,
            path,
            trip_id: None,
        }
    }
}

/// Movement between two activities: one or more triplegs, possibly with
/// short staypoints in between.
///
/// Origin/destination staypoint ids are empty when the trip starts or ends
/// in an untracked gap or at a user's first/last record. `endpoints` holds
/// the origin and destination coordinates when trip geometry was requested,
/// falling back to the first/last tripleg coordinate for unknown boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: u64,
    pub user_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub origin_staypoint_id: Option<u64>,
    pub destination_staypoint_id: Option<u64>,
    pub endpoints: Option<(GeoPoint, GeoPoint)>,
    /// Tours this trip belongs to, innermost first. Empty when the trip is
    /// on no tour; a trip can sit on several tours (nested/overlapping).
    pub tour_ids: Vec<u64>,
}

impl Trip {
    pub fn new(
        id: u64,
        user_id: u64,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            started_at,
            finished_at,
            origin_staypoint_id: None,
            destination_staypoint_id: None,
            endpoints: None,
            tour_ids: Vec::new(),
        }
    }

    pub fn with_staypoints(mut self, origin: Option<u64>, destination: Option<u64>) -> Self {
        self.origin_staypoint_id = origin;
        self.destination_staypoint_id = destination;
        self
    }

    pub fn with_endpoints(mut self, origin: GeoPoint, destination: GeoPoint) -> Self {
        self.endpoints = Some((origin, destination));
        self
    }
}

/// A closed, chronological sequence of trips returning to its start location
/// within a time budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tour {
    pub id: u64,
    pub user_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub origin_staypoint_id: Option<u64>,
    pub destination_staypoint_id: Option<u64>,
    /// Member trip ids, chronological.
    pub trips: Vec<u64>,
    pub location_id: Option<u64>,
}

// ============================================================================
// Validated Collections
// ============================================================================

/// Group a slice sorted by user id into per-user index ranges.
pub(crate) fn user_ranges<T>(
    records: &[T],
    user_of: impl Fn(&T) -> u64,
) -> Vec<(u64, std::ops::Range<usize>)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < records.len() {
        let user = user_of(&records[start]);
        let mut end = start + 1;
        while end < records.len() && user_of(&records[end]) == user {
            end += 1;
        }
        ranges.push((user, start..end));
        start = end;
    }
    ranges
}

fn check_unique_ids(ids: impl Iterator<Item = u64>, kind: &'static str) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(SegmentationError::DuplicateId { kind, id });
        }
    }
    Ok(())
}

/// A validated collection of [`Positionfix`] records, sorted by
/// `(user_id, tracked_at)`.
#[derive(Debug, Clone)]
pub struct Positionfixes {
    records: Vec<Positionfix>,
    crs: Crs,
}

impl Positionfixes {
    /// Validate and take ownership of raw fixes.
    ///
    /// Sorts by `(user_id, tracked_at)` and rejects empty input and
    /// non-finite coordinates. Rejection happens before any processing so a
    /// corrupt record never reaches the sliding window.
    pub fn new(mut records: Vec<Positionfix>, crs: Crs) -> Result<Self> {
        if records.is_empty() {
            return Err(SegmentationError::EmptyInput {
                what: "positionfixes",
            });
        }
        records.sort_by_key(|r| (r.user_id, r.tracked_at));
        for (index, r) in records.iter().enumerate() {
            if !r.point.is_finite() {
                return Err(SegmentationError::NonFiniteCoordinate {
                    user_id: r.user_id,
                    index,
                });
            }
        }
        Ok(Self { records, crs })
    }

    pub(crate) fn from_sorted(records: Vec<Positionfix>, crs: Crs) -> Self {
        Self { records, crs }
    }

    pub fn records(&self) -> &[Positionfix] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Positionfix> {
        self.records
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn user_ranges(&self) -> Vec<(u64, std::ops::Range<usize>)> {
        user_ranges(&self.records, |r| r.user_id)
    }

    /// Detect staypoints; see [`generate_staypoints`].
    pub fn generate_staypoints(
        &self,
        config: &StaypointConfig,
    ) -> Result<(Positionfixes, Staypoints)> {
        staypoints::generate_staypoints(self, config)
    }

    /// Extract triplegs from staypoint-annotated fixes; see
    /// [`generate_triplegs`].
    pub fn generate_triplegs(&self, config: &TriplegConfig) -> Result<(Positionfixes, Triplegs)> {
        triplegs::generate_triplegs(self, config)
    }
}

/// A validated collection of [`Staypoint`] records, sorted by
/// `(user_id, started_at)`.
#[derive(Debug, Clone)]
pub struct Staypoints {
    records: Vec<Staypoint>,
    crs: Crs,
}

impl Staypoints {
    /// Validate and take ownership of staypoint records.
    ///
    /// An empty collection is allowed: a user may legitimately have no
    /// staypoints at all.
    pub fn new(mut records: Vec<Staypoint>, crs: Crs) -> Result<Self> {
        records.sort_by_key(|r| (r.user_id, r.started_at));
        check_unique_ids(records.iter().map(|r| r.id), "staypoint")?;
        for (index, r) in records.iter().enumerate() {
            if !r.point.is_finite() {
                return Err(SegmentationError::NonFiniteCoordinate {
                    user_id: r.user_id,
                    index,
                });
            }
            if r.finished_at < r.started_at {
                return Err(SegmentationError::NegativeInterval {
                    kind: "staypoint",
                    index,
                });
            }
        }
        Ok(Self { records, crs })
    }

    pub(crate) fn from_sorted(records: Vec<Staypoint>, crs: Crs) -> Self {
        Self { records, crs }
    }

    pub fn records(&self) -> &[Staypoint] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Staypoint> {
        self.records
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn user_ranges(&self) -> Vec<(u64, std::ops::Range<usize>)> {
        user_ranges(&self.records, |r| r.user_id)
    }

    /// Label long staypoints as activities; see [`create_activity_flag`].
    pub fn create_activity_flag(
        &self,
        method: ActivityMethod,
        time_threshold_minutes: f64,
    ) -> Staypoints {
        staypoints::create_activity_flag(self, method, time_threshold_minutes)
    }
}

/// A validated collection of [`Tripleg`] records, sorted by
/// `(user_id, started_at)`.
#[derive(Debug, Clone)]
pub struct Triplegs {
    records: Vec<Tripleg>,
    crs: Crs,
}

impl Triplegs {
    pub fn new(mut records: Vec<Tripleg>, crs: Crs) -> Result<Self> {
        records.sort_by_key(|r| (r.user_id, r.started_at));
        check_unique_ids(records.iter().map(|r| r.id), "tripleg")?;
        for (index, r) in records.iter().enumerate() {
            if r.path.len() < 2 {
                return Err(SegmentationError::InvalidGeometry {
                    kind: "tripleg",
                    index,
                    detail: "a line geometry needs at least two coordinates",
                });
            }
            if r.path.iter().any(|p| !p.is_finite()) {
                return Err(SegmentationError::NonFiniteCoordinate {
                    user_id: r.user_id,
                    index,
                });
            }
            if r.finished_at < r.started_at {
                return Err(SegmentationError::NegativeInterval {
                    kind: "tripleg",
                    index,
                });
            }
        }
        Ok(Self { records, crs })
    }

    pub(crate) fn from_sorted(records: Vec<Tripleg>, crs: Crs) -> Self {
        Self { records, crs }
    }

    pub fn records(&self) -> &[Tripleg] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Tripleg> {
        self.records
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn user_ranges(&self) -> Vec<(u64, std::ops::Range<usize>)> {
        user_ranges(&self.records, |r| r.user_id)
    }

    /// Assemble trips from staypoints and these triplegs; see
    /// [`generate_trips`].
    pub fn generate_trips(
        &self,
        staypoints: &Staypoints,
        config: &TripConfig,
    ) -> Result<(Staypoints, Triplegs, Trips)> {
        trips::generate_trips(staypoints, self, config)
    }
}

/// A validated collection of [`Trip`] records, sorted by
/// `(user_id, started_at)`.
#[derive(Debug, Clone)]
pub struct Trips {
    records: Vec<Trip>,
    crs: Crs,
}

impl Trips {
    pub fn new(mut records: Vec<Trip>, crs: Crs) -> Result<Self> {
        records.sort_by_key(|r| (r.user_id, r.started_at));
        check_unique_ids(records.iter().map(|r| r.id), "trip")?;
        for (index, r) in records.iter().enumerate() {
            if r.finished_at < r.started_at {
                return Err(SegmentationError::NegativeInterval {
                    kind: "trip",
                    index,
                });
            }
            if let Some((o, d)) = &r.endpoints {
                if !o.is_finite() || !d.is_finite() {
                    return Err(SegmentationError::NonFiniteCoordinate {
                        user_id: r.user_id,
                        index,
                    });
                }
            }
        }
        Ok(Self { records, crs })
    }

    pub(crate) fn from_sorted(records: Vec<Trip>, crs: Crs) -> Self {
        Self { records, crs }
    }

    pub fn records(&self) -> &[Trip] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Trip> {
        self.records
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn user_ranges(&self) -> Vec<(u64, std::ops::Range<usize>)> {
        user_ranges(&self.records, |r| r.user_id)
    }

    /// Detect tours; see [`generate_tours`].
    pub fn generate_tours(
        &self,
        staypoints: Option<&Staypoints>,
        config: &TourConfig,
    ) -> Result<(Trips, Tours)> {
        tours::generate_tours(self, staypoints, config)
    }
}

/// A collection of [`Tour`] records.
///
/// Generated tours keep their discovery order: per user, a nested tour
/// precedes the enclosing tour that closed later, matching the id order.
#[derive(Debug, Clone)]
pub struct Tours {
    records: Vec<Tour>,
}

impl Tours {
    pub fn new(mut records: Vec<Tour>) -> Result<Self> {
        records.sort_by_key(|r| (r.user_id, r.started_at));
        check_unique_ids(records.iter().map(|r| r.id), "tour")?;
        for (index, r) in records.iter().enumerate() {
            if r.finished_at < r.started_at {
                return Err(SegmentationError::NegativeInterval {
                    kind: "tour",
                    index,
                });
            }
            if r.trips.is_empty() {
                return Err(SegmentationError::EmptyInput {
                    what: "tour trip list",
                });
            }
        }
        Ok(Self { records })
    }

    pub(crate) fn from_records(records: Vec<Tour>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Tour] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Tour> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
