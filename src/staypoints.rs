//! Staypoint detection and activity labelling.
//!
//! Staypoints are detected with the sliding-window scheme of Li et al.
//! (2008): two cursors walk each user's chronological fixes; the window
//! closes as soon as a fix falls outside the distance threshold, and a
//! staypoint is emitted when the window also spans more than the time
//! threshold. Everything the window does not absorb is tripleg material for
//! [`crate::triplegs::generate_triplegs`].
//!
//! References
//! ----------
//! Li, Q., Zheng, Y., Xie, X., Chen, Y., Liu, W., & Ma, W. Y. (2008). Mining
//! user similarity based on location history. ACM SIGSPATIAL.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SegmentationError};
use crate::geo_utils::{mean_point, point_distance};
use crate::{Crs, GeoPoint, Positionfix, Positionfixes, Staypoint, Staypoints};

/// Method used to detect staypoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaypointMethod {
    /// Sliding window over the chronological fixes (Li et al. 2008).
    Sliding,
}

impl FromStr for StaypointMethod {
    type Err = SegmentationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sliding" => Ok(StaypointMethod::Sliding),
            other => Err(SegmentationError::UnknownMethod {
                value: other.to_string(),
            }),
        }
    }
}

/// Method used to label staypoints as activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityMethod {
    /// An activity is a staypoint longer than a duration threshold.
    TimeThreshold,
}

impl FromStr for ActivityMethod {
    type Err = SegmentationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "time_threshold" => Ok(ActivityMethod::TimeThreshold),
            other => Err(SegmentationError::UnknownMethod {
                value: other.to_string(),
            }),
        }
    }
}

/// Configuration for [`generate_staypoints`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaypointConfig {
    pub method: StaypointMethod,

    /// How far someone has to move to close the window. Meters for WGS84
    /// input, CRS units for projected input.
    /// Default: 100.0
    pub dist_threshold: f64,

    /// Minimum dwell time in seconds for an emitted staypoint.
    /// Default: 300.0 (5 minutes)
    pub time_threshold: f64,

    /// The window scheme only detects a staypoint once the user steps out of
    /// it, which drops a stay that is still open when the track ends. Set
    /// this to emit the trailing open window as a staypoint too (it must
    /// still satisfy `time_threshold`).
    /// Default: false
    pub include_last: bool,
}

impl Default for StaypointConfig {
    fn default() -> Self {
        Self {
            method: StaypointMethod::Sliding,
            dist_threshold: 100.0,
            time_threshold: 300.0,
            include_last: false,
        }
    }
}

/// Detect staypoints from positionfixes.
///
/// Returns a copy of the fixes with `staypoint_id` filled in (`tripleg_id`
/// reset), plus the staypoint collection. Staypoint ids are dense and
/// 0-based across the whole batch, assigned in user order after all per-user
/// scans complete, so results do not depend on scan scheduling.
///
/// Degenerate thresholds behave predictably: with both thresholds at zero
/// every fix becomes its own staypoint; with arbitrarily large thresholds the
/// window never closes and no staypoint is emitted.
pub fn generate_staypoints(
    pfs: &Positionfixes,
    config: &StaypointConfig,
) -> Result<(Positionfixes, Staypoints)> {
    let StaypointMethod::Sliding = config.method;

    let crs = pfs.crs();
    let records = pfs.records();
    let ranges = pfs.user_ranges();

    #[cfg(feature = "parallel")]
    let scans: Vec<Vec<StaypointDraft>> = ranges
        .par_iter()
        .map(|(_, range)| sliding_user(&records[range.clone()], crs, config))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let scans: Vec<Vec<StaypointDraft>> = ranges
        .iter()
        .map(|(_, range)| sliding_user(&records[range.clone()], crs, config))
        .collect();

    // Single sequential pass for final dense ids and fix annotations.
    let mut fixes_out = records.to_vec();
    for f in &mut fixes_out {
        f.staypoint_id = None;
        f.tripleg_id = None;
    }

    let mut staypoints = Vec::new();
    let mut next_id: u64 = 0;
    for ((user_id, range), drafts) in ranges.iter().zip(scans) {
        for draft in drafts {
            let id = next_id;
            next_id += 1;
            for k in draft.members.clone() {
                fixes_out[range.start + k].staypoint_id = Some(id);
            }
            staypoints.push(Staypoint {
                id,
                user_id: *user_id,
                started_at: draft.started_at,
                finished_at: draft.finished_at,
                point: draft.point,
                elevation: draft.elevation,
                is_activity: None,
                location_id: None,
                trip_id: None,
                prev_trip_id: None,
                next_trip_id: None,
            });
        }
    }

    if staypoints.is_empty() {
        warn!("no staypoints detected; every fix remains tripleg material");
    } else {
        info!(
            "detected {} staypoints across {} users",
            staypoints.len(),
            ranges.len()
        );
    }

    Ok((
        Positionfixes::from_sorted(fixes_out, crs),
        Staypoints::from_sorted(staypoints, crs),
    ))
}

/// Label each staypoint as an activity when its duration exceeds
/// `time_threshold_minutes`. Pure and row-wise; returns a copy.
pub fn create_activity_flag(
    staypoints: &Staypoints,
    method: ActivityMethod,
    time_threshold_minutes: f64,
) -> Staypoints {
    let ActivityMethod::TimeThreshold = method;

    let threshold_ms = (time_threshold_minutes * 60_000.0) as i64;
    let records = staypoints
        .records()
        .iter()
        .cloned()
        .map(|mut sp| {
            sp.is_activity = Some(sp.duration().num_milliseconds() > threshold_ms);
            sp
        })
        .collect();
    Staypoints::from_sorted(records, staypoints.crs())
}

/// A staypoint candidate local to one user's scan. `members` are indices
/// into the user's slice of fixes.
struct StaypointDraft {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    point: GeoPoint,
    elevation: Option<f64>,
    members: std::ops::Range<usize>,
}

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

fn draft(fixes: &[Positionfix], members: std::ops::Range<usize>, finished_at: DateTime<Utc>) -> StaypointDraft {
    let window = &fixes[members.clone()];
    let points: Vec<GeoPoint> = window.iter().map(|f| f.point).collect();
    let elevation = if window.iter().all(|f| f.elevation.is_some()) {
        Some(window.iter().map(|f| f.elevation.unwrap()).sum::<f64>() / window.len() as f64)
    } else {
        None
    };
    StaypointDraft {
        started_at: fixes[members.start].tracked_at,
        finished_at,
        point: mean_point(&points).expect("staypoint window is never empty"),
        elevation,
        members,
    }
}

/// Sliding-window scan over one user's chronological fixes.
///
/// The window `[i, j)` closes when fix `j` is the first fix farther than the
/// distance threshold from fix `i`; the staypoint interval ends at `t[j]`
/// (the user was still inside until observed outside). When a window closes
/// exactly on the final fix, that fix is anchored with a zero-duration
/// staypoint so the tail of the track is not lost to an unplaceable
/// single-fix run.
fn sliding_user(fixes: &[Positionfix], crs: Crs, config: &StaypointConfig) -> Vec<StaypointDraft> {
    let n = fixes.len();
    let mut drafts = Vec::new();

    let mut i = 0;
    while i < n {
        let mut closed = false;
        let mut j = i + 1;
        while j < n {
            let dist = point_distance(crs, &fixes[i].point, &fixes[j].point);
            if dist > config.dist_threshold {
                if elapsed_seconds(fixes[i].tracked_at, fixes[j].tracked_at) > config.time_threshold
                {
                    drafts.push(draft(fixes, i..j, fixes[j].tracked_at));
                    if j == n - 1 {
                        // The window closed on the last record.
                        drafts.push(draft(fixes, j..j + 1, fixes[j].tracked_at));
                    }
                }
                i = j;
                closed = true;
                break;
            }
            j += 1;
        }
        if !closed {
            // Trailing open window: the user never stepped out again.
            if config.include_last
                && i < n - 1
                && elapsed_seconds(fixes[i].tracked_at, fixes[n - 1].tracked_at)
                    > config.time_threshold
            {
                drafts.push(draft(fixes, i..n, fixes[n - 1].tracked_at));
            }
            break;
        }
    }

    drafts
}
