//! Trip assembly from staypoints and triplegs.
//!
//! Each user's staypoints and triplegs are merged into one chronological
//! timeline of tagged events. Activity staypoints, recording gaps and the end
//! of a user's timeline act uniformly as *trip terminators*: everything
//! accumulated between two terminators becomes one trip, provided it contains
//! at least one tripleg. Runs of consecutive activities collapse to their
//! last member (only the transition back into movement matters), and a trip
//! bounded by a gap or a user boundary has an unknown origin/destination.

use chrono::{DateTime, Utc};
use log::{info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{Result, SegmentationError};
use crate::{Staypoint, Staypoints, Trip, Tripleg, Triplegs, Trips};

/// Configuration for [`generate_trips`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripConfig {
    /// Maximum temporal gap inside a trip, in minutes. When tracking data is
    /// missing for longer, the person is assumed to have performed an
    /// unobserved activity and the trip is split at the gap.
    /// Default: 15.0
    pub gap_threshold_minutes: f64,

    /// Record origin/destination coordinates on each trip, falling back to
    /// the first/last tripleg coordinate when a boundary staypoint is
    /// unknown.
    /// Default: true
    pub add_geometry: bool,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            gap_threshold_minutes: 15.0,
            add_geometry: true,
        }
    }
}

/// Assemble trips from activity-flagged staypoints and triplegs.
///
/// Returns copies of the staypoints (with `trip_id`, `prev_trip_id`,
/// `next_trip_id`), the triplegs (with `trip_id`) and the new trip
/// collection. Staypoints absorbed into a trip get `trip_id`; activity
/// staypoints bounding trips get the neighboring trip ids instead. Trip ids
/// are dense and 0-based after dropping candidates without a tripleg.
///
/// Every staypoint must carry an activity flag
/// ([`crate::create_activity_flag`]); a user with triplegs but no staypoints
/// is legal and yields trips bounded by gaps and the user boundary only.
pub fn generate_trips(
    staypoints: &Staypoints,
    triplegs: &Triplegs,
    config: &TripConfig,
) -> Result<(Staypoints, Triplegs, Trips)> {
    if staypoints.crs() != triplegs.crs() {
        return Err(SegmentationError::CrsMismatch {
            left: staypoints.crs(),
            right: triplegs.crs(),
        });
    }
    for sp in staypoints.records() {
        if sp.is_activity.is_none() {
            return Err(SegmentationError::MissingActivityFlag {
                staypoint_id: sp.id,
            });
        }
    }

    let crs = staypoints.crs();
    let mut sp_out = staypoints.records().to_vec();
    for sp in &mut sp_out {
        sp.trip_id = None;
        sp.prev_trip_id = None;
        sp.next_trip_id = None;
    }
    let mut tpl_out = triplegs.records().to_vec();
    for tpl in &mut tpl_out {
        tpl.trip_id = None;
    }

    if triplegs.is_empty() {
        warn!("no triplegs supplied; there are no trips without recorded movement");
        return Ok((
            Staypoints::from_sorted(sp_out, crs),
            Triplegs::from_sorted(tpl_out, crs),
            Trips::from_sorted(Vec::new(), crs),
        ));
    }

    // Per-user timelines keyed by ascending user id.
    let mut users: BTreeMap<u64, (Range<usize>, Range<usize>)> = BTreeMap::new();
    for (user, range) in staypoints.user_ranges() {
        users.entry(user).or_insert((0..0, 0..0)).0 = range;
    }
    for (user, range) in triplegs.user_ranges() {
        users.entry(user).or_insert((0..0, 0..0)).1 = range;
    }

    let gap_ms = (config.gap_threshold_minutes * 60_000.0) as i64;
    let timelines: Vec<(u64, Vec<TimelineEvent>)> = users
        .into_iter()
        .map(|(user, (sp_range, tpl_range))| {
            let events = build_timeline(
                staypoints.records(),
                sp_range,
                triplegs.records(),
                tpl_range,
                gap_ms,
            );
            (user, events)
        })
        .collect();

    #[cfg(feature = "parallel")]
    let per_user: Vec<Vec<TripDraft>> = timelines
        .par_iter()
        .map(|(_, events)| assemble_user(events))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let per_user: Vec<Vec<TripDraft>> = timelines
        .iter()
        .map(|(_, events)| assemble_user(events))
        .collect();

    // Single sequential pass for final dense trip ids and back-references.
    let mut trip_records = Vec::new();
    let mut next_id: u64 = 0;
    for ((user_id, _), drafts) in timelines.iter().zip(per_user) {
        for draft in drafts {
            let id = next_id;
            next_id += 1;

            for &k in &draft.staypoints {
                sp_out[k].trip_id = Some(id);
            }
            for &k in &draft.triplegs {
                tpl_out[k].trip_id = Some(id);
            }
            if let Some(o) = draft.origin_sp {
                sp_out[o].next_trip_id = Some(id);
            }
            if let Some(d) = draft.destination_sp {
                sp_out[d].prev_trip_id = Some(id);
            }

            let mut trip = Trip::new(id, *user_id, draft.started_at, draft.finished_at)
                .with_staypoints(
                    draft.origin_sp.map(|k| sp_out[k].id),
                    draft.destination_sp.map(|k| sp_out[k].id),
                );
            if config.add_geometry {
                let first_leg = &tpl_out[draft.triplegs[0]];
                let last_leg = &tpl_out[*draft.triplegs.last().expect("trip has a tripleg")];
                let origin_point = draft
                    .origin_sp
                    .map(|k| sp_out[k].point)
                    .unwrap_or(first_leg.path[0]);
                let destination_point = draft
                    .destination_sp
                    .map(|k| sp_out[k].point)
                    .unwrap_or(*last_leg.path.last().expect("tripleg path is non-empty"));
                trip = trip.with_endpoints(origin_point, destination_point);
            }
            trip_records.push(trip);
        }
    }

    info!("assembled {} trips", trip_records.len());

    Ok((
        Staypoints::from_sorted(sp_out, crs),
        Triplegs::from_sorted(tpl_out, crs),
        Trips::from_sorted(trip_records, crs),
    ))
}

/// One entry of a user's merged staypoint/tripleg timeline.
///
/// Indices refer to the full (sorted) staypoint/tripleg record slices.
#[derive(Debug, Clone, Copy)]
enum TimelineEvent {
    /// Short staypoint travelled through; absorbed into the running trip.
    Staypoint {
        sp: usize,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    },
    /// Activity staypoint: terminates the running trip and anchors the next.
    ActivityBoundary {
        sp: usize,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    },
    Tripleg {
        tpl: usize,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    },
    /// Virtual terminator at the midpoint of a recording gap.
    GapMarker { at: DateTime<Utc> },
    /// Virtual terminator flushing the automaton at the end of a user's
    /// timeline.
    UserChange { at: DateTime<Utc> },
}

impl TimelineEvent {
    fn started(&self) -> DateTime<Utc> {
        match *self {
            TimelineEvent::Staypoint { started, .. }
            | TimelineEvent::ActivityBoundary { started, .. }
            | TimelineEvent::Tripleg { started, .. } => started,
            TimelineEvent::GapMarker { at } | TimelineEvent::UserChange { at } => at,
        }
    }

    fn finished(&self) -> DateTime<Utc> {
        match *self {
            TimelineEvent::Staypoint { finished, .. }
            | TimelineEvent::ActivityBoundary { finished, .. }
            | TimelineEvent::Tripleg { finished, .. } => finished,
            TimelineEvent::GapMarker { at } | TimelineEvent::UserChange { at } => at,
        }
    }
}

/// Merge one user's staypoints and triplegs into a chronological event list
/// with gap markers and a trailing flush terminator.
///
/// A gap marker is placed at the midpoint of each oversized gap; since the
/// midpoint lies strictly inside the gap, the marker orders after the record
/// it follows even when an activity boundary ends exactly at the gap's start
/// (the gap then decides the next trip's origin, not the activity).
fn build_timeline(
    sps: &[Staypoint],
    sp_range: Range<usize>,
    tpls: &[Tripleg],
    tpl_range: Range<usize>,
    gap_ms: i64,
) -> Vec<TimelineEvent> {
    let mut events: Vec<TimelineEvent> = Vec::with_capacity(sp_range.len() + tpl_range.len());
    for k in sp_range {
        let sp = &sps[k];
        let ev = if sp.is_activity == Some(true) {
            TimelineEvent::ActivityBoundary {
                sp: k,
                started: sp.started_at,
                finished: sp.finished_at,
            }
        } else {
            TimelineEvent::Staypoint {
                sp: k,
                started: sp.started_at,
                finished: sp.finished_at,
            }
        };
        events.push(ev);
    }
    for k in tpl_range {
        let tpl = &tpls[k];
        events.push(TimelineEvent::Tripleg {
            tpl: k,
            started: tpl.started_at,
            finished: tpl.finished_at,
        });
    }
    events.sort_by_key(|e| (e.started(), e.finished()));

    let mut timeline = Vec::with_capacity(events.len() + 2);
    for (idx, ev) in events.iter().enumerate() {
        timeline.push(*ev);
        if let Some(next) = events.get(idx + 1) {
            let gap = next.started() - ev.finished();
            if gap.num_milliseconds() > gap_ms {
                timeline.push(TimelineEvent::GapMarker {
                    at: ev.finished() + gap / 2,
                });
            }
        }
    }
    if let Some(last) = events.last() {
        timeline.push(TimelineEvent::UserChange {
            at: last.finished(),
        });
    }
    timeline
}

/// A trip candidate local to one user. Indices refer to the full staypoint
/// and tripleg record slices.
struct TripDraft {
    origin_sp: Option<usize>,
    destination_sp: Option<usize>,
    staypoints: Vec<usize>,
    triplegs: Vec<usize>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

/// Boundary automaton over one user's timeline.
///
/// State is the running candidate (accumulated events) plus the origin
/// terminator. Every terminator closes the candidate; a candidate without a
/// tripleg is discarded rather than materialized, so staypoint-only spans
/// produce no trip but still move the origin forward.
fn assemble_user(events: &[TimelineEvent]) -> Vec<TripDraft> {
    let mut drafts = Vec::new();
    let mut origin: Option<usize> = None;
    let mut stack: Vec<TimelineEvent> = Vec::new();

    for ev in events {
        match *ev {
            TimelineEvent::Staypoint { .. } | TimelineEvent::Tripleg { .. } => stack.push(*ev),
            TimelineEvent::ActivityBoundary { sp, .. } => {
                close_candidate(&mut drafts, &mut stack, &mut origin, Some(sp));
            }
            TimelineEvent::GapMarker { .. } | TimelineEvent::UserChange { .. } => {
                close_candidate(&mut drafts, &mut stack, &mut origin, None);
            }
        }
    }
    drafts
}

fn close_candidate(
    drafts: &mut Vec<TripDraft>,
    stack: &mut Vec<TimelineEvent>,
    origin: &mut Option<usize>,
    terminator_sp: Option<usize>,
) {
    let has_tripleg = stack
        .iter()
        .any(|e| matches!(e, TimelineEvent::Tripleg { .. }));
    if has_tripleg {
        let mut staypoints = Vec::new();
        let mut triplegs = Vec::new();
        for e in stack.iter() {
            match *e {
                TimelineEvent::Staypoint { sp, .. } => staypoints.push(sp),
                TimelineEvent::Tripleg { tpl, .. } => triplegs.push(tpl),
                _ => unreachable!("terminators never enter the candidate stack"),
            }
        }
        drafts.push(TripDraft {
            origin_sp: *origin,
            destination_sp: terminator_sp,
            staypoints,
            triplegs,
            started_at: stack.first().expect("candidate is non-empty").started(),
            finished_at: stack.last().expect("candidate is non-empty").finished(),
        });
    }
    stack.clear();
    *origin = terminator_sp;
}
