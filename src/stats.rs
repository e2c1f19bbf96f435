use crate::geometry::haversine_m;
use crate::traces::Trace;
use log::warn;
use serde::{Deserialize, Serialize};

/// Passenger-meter accounting per transport category. Forms a monoid
/// under `add` with the all-zero record as identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyStats {
    pub car_meters: f64,
    pub rail_meters: f64,
    pub bus_meters: f64,
    pub walk_meters: f64,

    pub car_passengers: f64,
    pub rail_passengers: f64,
    pub bus_passengers: f64,
    pub walkers: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportShares {
    pub car: f64,
    pub rail: f64,
    pub bus: f64,
    pub walk: f64,
}

impl JourneyStats {
    pub fn add(&self, other: &JourneyStats) -> JourneyStats {
        JourneyStats {
            car_meters: self.car_meters + other.car_meters,
            rail_meters: self.rail_meters + other.rail_meters,
            bus_meters: self.bus_meters + other.bus_meters,
            walk_meters: self.walk_meters + other.walk_meters,

            car_passengers: self.car_passengers + other.car_passengers,
            rail_passengers: self.rail_passengers + other.rail_passengers,
            bus_passengers: self.bus_passengers + other.bus_passengers,
            walkers: self.walkers + other.walkers,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == JourneyStats::default()
    }

    /// Total passenger-meters across all categories.
    pub fn passenger_meter_total(&self) -> f64 {
        self.car_meters * self.car_passengers
            + self.rail_meters * self.rail_passengers
            + self.bus_meters * self.bus_passengers
            + self.walk_meters * self.walkers
    }

    /// Per-category passenger-meters normalized by this record's own
    /// total. A zero total yields all-zero shares.
    pub fn shares(&self) -> TransportShares {
        self.contribution_shares(self.passenger_meter_total())
    }

    /// Shares against an externally computed total, e.g. the global
    /// passenger-meter total of a whole simulation.
    pub fn contribution_shares(&self, total: f64) -> TransportShares {
        if total == 0.0 {
            return TransportShares::default();
        }

        TransportShares {
            car: self.car_meters * self.car_passengers / total,
            rail: self.rail_meters * self.rail_passengers / total,
            bus: self.bus_meters * self.bus_passengers / total,
            walk: self.walk_meters * self.walkers / total,
        }
    }
}

/// Accumulates passenger-meters over the consecutive same-mode pairs
/// of a trace. Each leg entry counts one passenger; distance within
/// the leg then turns into passenger-meters without double counting.
pub fn trace_stats(trace: &Trace) -> JourneyStats {
    use crate::journeys::Mode;

    let mut stats = JourneyStats::default();

    for pair in trace.elements.windows(2) {
        let (from, to) = (&pair[0], &pair[1]);
        if from.mode != to.mode {
            continue;
        }

        let dist = haversine_m(from.point, to.point);
        let pax = if from.is_leg_start { 1.0 } else { 0.0 };

        match from.mode {
            Mode::Train | Mode::Gondola | Mode::Watercraft => {
                stats.rail_meters += dist;
                stats.rail_passengers += pax;
            }
            Mode::Bus => {
                stats.bus_meters += dist;
                stats.bus_passengers += pax;
            }
            Mode::Car => {
                stats.car_meters += dist;
                stats.car_passengers += pax;
            }
            Mode::Walking => {
                stats.walk_meters += dist;
                stats.walkers += pax;
            }
            other => warn!("unknown mode in trace {}: {}", trace.vc_id, other),
        }
    }

    stats
}

/// Aggregate over a batch of traces. Traces with fewer than two
/// elements contribute nothing.
pub fn stats_for_traces(traces: &[Trace]) -> JourneyStats {
    let mut total = JourneyStats::default();

    for trace in traces {
        if trace.elements.len() < 2 {
            continue;
        }
        total = total.add(&trace_stats(trace));
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journeys::Mode;
    use crate::traces::TraceElement;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 4, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn element(point: [f64; 2], minute: i64, mode: Mode, is_leg_start: bool) -> TraceElement {
        TraceElement {
            point,
            time: at(minute),
            mode,
            is_leg_start,
        }
    }

    fn trace_of(elements: Vec<TraceElement>) -> Trace {
        Trace {
            vc_id: "vc-1".into(),
            route_option_id: "opt-1".into(),
            elements,
        }
    }

    #[test]
    fn single_walking_leg() {
        let trace = trace_of(vec![
            element([0.0, 0.0], 0, Mode::Walking, true),
            element([0.0, 0.001], 1, Mode::Walking, false),
        ]);

        let stats = trace_stats(&trace);
        assert!((stats.walk_meters - 111.195).abs() < 0.01);
        assert_eq!(stats.walkers, 1.0);
        assert_eq!(stats.car_meters, 0.0);
        assert_eq!(stats.rail_meters, 0.0);
        assert_eq!(stats.bus_meters, 0.0);

        let shares = stats.shares();
        assert_eq!(shares.walk, 1.0);
        assert_eq!(shares.car, 0.0);
    }

    #[test]
    fn mixed_mode_pairs_are_ignored() {
        let b = [0.01, 0.0];
        let c = [0.02, 0.0];
        let trace = trace_of(vec![
            element([0.0, 0.0], 0, Mode::Walking, true),
            element(b, 1, Mode::Car, true),
            element(c, 2, Mode::Car, false),
        ]);

        let stats = trace_stats(&trace);
        assert!((stats.car_meters - haversine_m(b, c)).abs() < 1e-9);
        assert_eq!(stats.car_passengers, 1.0);
        assert_eq!(stats.walk_meters, 0.0);
        assert_eq!(stats.walkers, 0.0);
    }

    #[test]
    fn mid_leg_pairs_add_distance_but_no_passengers() {
        let trace = trace_of(vec![
            element([0.0, 0.0], 0, Mode::Bus, true),
            element([0.0, 0.001], 1, Mode::Bus, false),
            element([0.0, 0.002], 2, Mode::Bus, false),
        ]);

        let stats = trace_stats(&trace);
        assert_eq!(stats.bus_passengers, 1.0);
        assert!((stats.bus_meters - 2.0 * 111.195).abs() < 0.05);
    }

    #[test]
    fn add_is_a_commutative_monoid() {
        let a = JourneyStats {
            car_meters: 100.0,
            car_passengers: 2.0,
            walk_meters: 50.0,
            walkers: 1.0,
            ..JourneyStats::default()
        };
        let b = JourneyStats {
            rail_meters: 300.0,
            rail_passengers: 1.0,
            car_meters: 10.0,
            ..JourneyStats::default()
        };
        let c = JourneyStats {
            bus_meters: 70.0,
            bus_passengers: 3.0,
            ..JourneyStats::default()
        };

        assert_eq!(a.add(&b), b.add(&a));
        assert_eq!(a.add(&b).add(&c), a.add(&b.add(&c)));
        assert_eq!(a.add(&JourneyStats::default()), a);
    }

    #[test]
    fn zero_total_yields_zero_shares() {
        let stats = JourneyStats::default();
        assert_eq!(stats.shares(), TransportShares::default());
        assert_eq!(stats.contribution_shares(0.0), TransportShares::default());
    }

    #[test]
    fn contribution_shares_use_the_external_total() {
        let stats = JourneyStats {
            car_meters: 100.0,
            car_passengers: 1.0,
            ..JourneyStats::default()
        };

        let shares = stats.contribution_shares(400.0);
        assert_eq!(shares.car, 0.25);
        assert_eq!(shares.rail, 0.0);
    }

    #[test]
    fn short_traces_contribute_nothing() {
        let traces = vec![
            trace_of(vec![element([0.0, 0.0], 0, Mode::Walking, true)]),
            trace_of(Vec::new()),
        ];
        assert!(stats_for_traces(&traces).is_empty());
    }
}
