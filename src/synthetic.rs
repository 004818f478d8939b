//! Synthetic mobility track generator for tests and benchmarks.
//!
//! Generates per-user days of position fixes that alternate dwell periods at
//! anchor places with movement legs between them, providing ground truth for
//! the segmentation pipeline: every dwell should surface as a staypoint,
//! every leg as a tripleg.
//!
//! # Example
//!
//! ```rust
//! use tripline::synthetic::MobilityScenario;
//!
//! let pfs = MobilityScenario::commute_day(42).generate().unwrap();
//! assert!(!pfs.is_empty());
//! ```

use std::f64::consts::PI;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::geo_utils::meters_to_degrees;
use crate::{Crs, GeoPoint, Positionfix, Positionfixes};

/// One stop on a user's daily schedule.
#[derive(Debug, Clone)]
pub struct ScheduleStop {
    /// Index into [`MobilityScenario::anchors`].
    pub anchor: usize,
    /// How long the user dwells there, in minutes.
    pub dwell_minutes: f64,
}

/// A synthetic daily mobility pattern shared by a set of users.
#[derive(Debug, Clone)]
pub struct MobilityScenario {
    /// Anchor places (WGS84 longitude/latitude).
    pub anchors: Vec<GeoPoint>,
    /// Visiting order with dwell durations; consecutive stops are connected
    /// by a straight movement leg.
    pub schedule: Vec<ScheduleStop>,
    pub user_count: u64,
    /// Timestamp of every user's first fix.
    pub start: DateTime<Utc>,
    /// Seconds between consecutive fixes.
    pub sample_interval_seconds: f64,
    /// Movement speed between anchors, in m/s.
    pub speed_mps: f64,
    /// GPS noise (1-sigma), in meters.
    pub noise_sigma_meters: f64,
    pub seed: u64,
}

impl MobilityScenario {
    /// A single-user commute day: home → work → cafe → work → home.
    ///
    /// Dwell times are well above the default activity threshold at home and
    /// work and the anchors are kilometers apart, so the default pipeline
    /// configs segment it cleanly.
    pub fn commute_day(seed: u64) -> Self {
        let home = GeoPoint::new(8.5500, 47.3700);
        let work = GeoPoint::new(8.5800, 47.3900);
        let cafe = GeoPoint::new(8.5900, 47.3850);
        Self {
            anchors: vec![home, work, cafe],
            schedule: vec![
                ScheduleStop { anchor: 0, dwell_minutes: 60.0 },
                ScheduleStop { anchor: 1, dwell_minutes: 240.0 },
                ScheduleStop { anchor: 2, dwell_minutes: 45.0 },
                ScheduleStop { anchor: 1, dwell_minutes: 120.0 },
                ScheduleStop { anchor: 0, dwell_minutes: 60.0 },
            ],
            user_count: 1,
            start: Utc.with_ymd_and_hms(2023, 7, 1, 6, 0, 0).unwrap(),
            sample_interval_seconds: 30.0,
            speed_mps: 10.0,
            noise_sigma_meters: 3.0,
            seed,
        }
    }

    pub fn with_users(mut self, user_count: u64) -> Self {
        self.user_count = user_count;
        self
    }

    /// Generate the position fixes for all users.
    pub fn generate(&self) -> Result<Positionfixes> {
        let mut fixes = Vec::new();
        for user_id in 0..self.user_count {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(user_id));
            self.generate_user(user_id, &mut rng, &mut fixes);
        }
        Positionfixes::new(fixes, Crs::Wgs84)
    }

    fn generate_user(&self, user_id: u64, rng: &mut StdRng, out: &mut Vec<Positionfix>) {
        let interval = Duration::milliseconds((self.sample_interval_seconds * 1000.0) as i64);
        let mut t = self.start;

        for (pos, stop) in self.schedule.iter().enumerate() {
            let anchor = self.anchors[stop.anchor];

            // Dwell at the anchor.
            let samples = (stop.dwell_minutes * 60.0 / self.sample_interval_seconds) as usize;
            for _ in 0..samples.max(1) {
                out.push(Positionfix::new(user_id, t, self.jitter(anchor, rng)));
                t += interval;
            }

            // Movement leg to the next stop.
            if let Some(next) = self.schedule.get(pos + 1) {
                let target = self.anchors[next.anchor];
                let dist = crate::geo_utils::haversine_distance(&anchor, &target);
                let steps = ((dist / self.speed_mps / self.sample_interval_seconds) as usize).max(2);
                for s in 1..=steps {
                    let f = s as f64 / steps as f64;
                    let p = GeoPoint::new(
                        anchor.x + f * (target.x - anchor.x),
                        anchor.y + f * (target.y - anchor.y),
                    );
                    out.push(Positionfix::new(user_id, t, self.jitter(p, rng)));
                    t += interval;
                }
            }
        }
    }

    fn jitter(&self, p: GeoPoint, rng: &mut StdRng) -> GeoPoint {
        if self.noise_sigma_meters <= 0.0 {
            return p;
        }
        let (lon_per_m, lat_per_m) = meters_to_degrees(1.0, p.y);
        GeoPoint::new(
            p.x + gaussian(rng) * self.noise_sigma_meters * lon_per_m,
            p.y + gaussian(rng) * self.noise_sigma_meters * lat_per_m,
        )
    }
}

/// Standard normal sample via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
