//! Tripleg extraction from staypoint-annotated positionfixes.
//!
//! Triplegs are the complement of staypoints: maximal runs of fixes the
//! sliding window did not absorb, one line geometry per run. Interval
//! boundaries are chosen so that a user's staypoint/tripleg sequence is
//! gapless except across genuine recording gaps: a run that directly follows
//! a staypoint starts at that staypoint's end, and a run directly followed
//! by a staypoint extends to that staypoint's start.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::{Positionfix, Positionfixes, Tripleg, Triplegs};

/// Configuration for [`generate_triplegs`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriplegConfig {
    /// Maximum temporal gap inside one tripleg, in minutes. A run of moving
    /// fixes is split where consecutive fixes are further apart than this;
    /// `None` disables gap splitting.
    /// Default: `Some(15.0)`
    pub gap_threshold_minutes: Option<f64>,
}

impl Default for TriplegConfig {
    fn default() -> Self {
        Self {
            gap_threshold_minutes: Some(15.0),
        }
    }
}

/// Extract triplegs as the movement runs between staypoints.
///
/// Expects fixes annotated by [`crate::generate_staypoints`]; on fixes with
/// no staypoint annotations at all (no staypoint was detected) each user's
/// whole track becomes a single tripleg, modulo gap splitting.
///
/// Returns a copy of the fixes with `tripleg_id` filled in plus the tripleg
/// collection. Runs of fewer than two fixes cannot carry a line geometry and
/// are dropped; their fixes end up with neither a staypoint nor a tripleg id.
pub fn generate_triplegs(
    pfs: &Positionfixes,
    config: &TriplegConfig,
) -> Result<(Positionfixes, Triplegs)> {
    let crs = pfs.crs();
    let gap_ms = config
        .gap_threshold_minutes
        .map(|m| (m * 60_000.0) as i64);

    let mut fixes_out = pfs.records().to_vec();
    for f in &mut fixes_out {
        f.tripleg_id = None;
    }

    let mut triplegs = Vec::new();
    let mut dropped = 0usize;
    let mut next_id: u64 = 0;

    for (user_id, range) in pfs.user_ranges() {
        let fixes = &pfs.records()[range.clone()];
        for run in moving_runs(fixes, gap_ms) {
            if run.end - run.start < 2 {
                dropped += 1;
                continue;
            }

            let first = &fixes[run.start];
            let last = &fixes[run.end - 1];

            // Extend the interval to the following staypoint's start unless a
            // recording gap separates the run from it.
            let mut finished_at = last.tracked_at;
            if let Some(next) = fixes.get(run.end) {
                if next.staypoint_id.is_some()
                    && gap_ms
                        .map(|g| (next.tracked_at - last.tracked_at).num_milliseconds() <= g)
                        .unwrap_or(true)
                {
                    finished_at = next.tracked_at;
                }
            }

            let id = next_id;
            next_id += 1;
            for k in run.clone() {
                fixes_out[range.start + k].tripleg_id = Some(id);
            }
            triplegs.push(Tripleg::new(
                id,
                user_id,
                first.tracked_at,
                finished_at,
                fixes[run].iter().map(|f| f.point).collect(),
            ));
        }
    }

    if dropped > 0 {
        warn!("dropped {dropped} single-fix movement runs (no line geometry possible)");
    }
    info!("extracted {} triplegs", triplegs.len());

    Ok((
        Positionfixes::from_sorted(fixes_out, crs),
        Triplegs::from_sorted(triplegs, crs),
    ))
}

/// Maximal runs of un-absorbed fixes, split at recording gaps.
fn moving_runs(fixes: &[Positionfix], gap_ms: Option<i64>) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;

    for (k, fix) in fixes.iter().enumerate() {
        if fix.staypoint_id.is_some() {
            if let Some(s) = start.take() {
                runs.push(s..k);
            }
            continue;
        }
        match start {
            None => start = Some(k),
            Some(s) => {
                let gap_exceeded = gap_ms
                    .map(|g| (fix.tracked_at - fixes[k - 1].tracked_at).num_milliseconds() > g)
                    .unwrap_or(false);
                if gap_exceeded {
                    runs.push(s..k);
                    start = Some(k);
                }
            }
        }
    }
    if let Some(s) = start {
        runs.push(s..fixes.len());
    }
    runs
}
