use crate::geometry::Bounds;
use crate::journeys::{Leg, Mode, SelectedOption};
use crate::parallel;
use anyhow::Result;
use chrono::{DateTime, Utc};
use geo_types::Coord;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct TraceElement {
    pub point: [f64; 2],
    pub time: DateTime<Utc>,
    pub mode: Mode,
    pub is_leg_start: bool,
}

/// Spatial/temporal trace of one selected route option. A trace with
/// fewer than two elements contributes nothing to any statistic.
#[derive(Debug, Clone)]
pub struct Trace {
    pub vc_id: String,
    pub route_option_id: String,
    pub elements: Vec<TraceElement>,
}

impl Trace {
    fn like(other: &Trace, elements: Vec<TraceElement>) -> Trace {
        Trace {
            vc_id: other.vc_id.clone(),
            route_option_id: other.route_option_id.clone(),
            elements,
        }
    }
}

/// Builds the trace of a selected option, leg by leg: a decodable
/// polyline wins, then stopover stations, then the plain
/// origin/destination pair. The first element emitted for a leg is
/// its leg start.
pub fn extract_trace(selected: &SelectedOption) -> Trace {
    let option = selected.option;
    let mut elements = Vec::new();

    for leg in &option.legs {
        if let Some(encoded) = &leg.polyline {
            if push_polyline_elements(&mut elements, leg, encoded) {
                continue;
            }
        }

        if leg.stopovers.is_empty() {
            let (Some(origin), Some(destination)) = (&leg.origin, &leg.destination) else {
                continue;
            };

            elements.push(TraceElement {
                point: origin.point(),
                time: leg.departure,
                mode: leg.mode,
                is_leg_start: true,
            });
            elements.push(TraceElement {
                point: destination.point(),
                time: leg.arrival,
                mode: leg.mode,
                is_leg_start: false,
            });
            continue;
        }

        let mut first_in_leg = true;
        for stopover in &leg.stopovers {
            let Some(station) = &stopover.station else {
                continue;
            };
            let Some(time) = stopover.departure.or(stopover.arrival) else {
                continue;
            };

            elements.push(TraceElement {
                point: station.point(),
                time,
                mode: leg.mode,
                is_leg_start: first_in_leg,
            });
            first_in_leg = false;
        }
    }

    Trace {
        vc_id: selected.vc_id.to_string(),
        route_option_id: option.route_option_id.clone(),
        elements,
    }
}

/// Samples a leg polyline uniformly between departure and arrival.
/// Returns false when the polyline cannot be used.
fn push_polyline_elements(elements: &mut Vec<TraceElement>, leg: &Leg, encoded: &str) -> bool {
    let line = match polyline::decode_polyline(encoded, 5) {
        Ok(line) => line,
        Err(err) => {
            debug!("ignoring undecodable polyline on {} leg: {}", leg.mode, err);
            return false;
        }
    };

    let points: Vec<[f64; 2]> = line.coords().map(|c| [c.x, c.y]).collect();
    if points.is_empty() {
        return false;
    }

    let step = (leg.arrival - leg.departure) / points.len() as i32;
    for (i, point) in points.into_iter().enumerate() {
        elements.push(TraceElement {
            point,
            time: leg.departure + step * i as i32,
            mode: leg.mode,
            is_leg_start: i == 0,
        });
    }
    true
}

pub fn extract_traces(selected: &[SelectedOption]) -> Vec<Trace> {
    selected.iter().map(extract_trace).collect()
}

/// Keeps elements inside the boundary plus their immediate
/// neighbours, so entries and exits survive. A dropped leg start is
/// carried forward onto the next kept element.
pub fn filter_trace<B: Bounds>(trace: &Trace, boundary: &B) -> Trace {
    let contains: Vec<bool> = trace
        .elements
        .iter()
        .map(|elem| boundary.contains(elem.point))
        .collect();

    let mut filtered = Vec::new();
    let mut carry_leg_start = false;

    for (i, elem) in trace.elements.iter().enumerate() {
        let mut keep = contains[i];
        if !keep && i > 0 && contains[i - 1] {
            keep = true;
        }
        if !keep && i + 1 < contains.len() && contains[i + 1] {
            keep = true;
        }

        if keep {
            let is_leg_start = elem.is_leg_start || carry_leg_start;
            carry_leg_start = false;
            filtered.push(TraceElement {
                is_leg_start,
                ..*elem
            });
        } else if elem.is_leg_start {
            carry_leg_start = true;
        }
    }

    Trace::like(trace, filtered)
}

pub fn filter_traces<B: Bounds + Sync>(
    traces: &[Trace],
    boundary: &B,
    workers: usize,
) -> Vec<Trace> {
    parallel::strided_map(traces.len(), workers, |_, index| {
        filter_trace(&traces[index], boundary)
    })
}

/// Thins a trace to roughly `target` non-leg-start elements using a
/// running budget. Leg starts always survive. The budget can leave
/// the final element unemitted; output size <= target is fine.
pub fn downsample_trace(trace: &Trace, target: usize) -> Trace {
    let non_leg_start = trace
        .elements
        .iter()
        .filter(|elem| !elem.is_leg_start)
        .count();
    if non_leg_start <= target {
        return trace.clone();
    }

    let ratio = target as f64 / non_leg_start as f64;
    let mut budget = 0.0;
    let mut kept = Vec::new();

    for elem in &trace.elements {
        if elem.is_leg_start {
            kept.push(*elem);
            continue;
        }

        budget += ratio;
        if budget >= 1.0 {
            kept.push(*elem);
            budget -= 1.0;
        }
    }

    Trace::like(trace, kept)
}

pub fn downsample_traces(traces: &[Trace], target: usize, workers: usize) -> Vec<Trace> {
    parallel::strided_map(traces.len(), workers, |_, index| {
        downsample_trace(&traces[index], target)
    })
}

/// Maximal runs of consecutive elements travelling with `mode`.
pub fn split_trace_by_mode(trace: &Trace, mode: Mode) -> Vec<Trace> {
    let mut split = Vec::new();
    let mut run = Vec::new();

    for elem in &trace.elements {
        if elem.mode != mode {
            if !run.is_empty() {
                split.push(Trace::like(trace, std::mem::take(&mut run)));
            }
            continue;
        }
        run.push(*elem);
    }

    if !run.is_empty() {
        split.push(Trace::like(trace, run));
    }

    split
}

pub fn split_traces_by_mode(traces: &[Trace], mode: Mode) -> Vec<Trace> {
    traces
        .iter()
        .flat_map(|trace| split_trace_by_mode(trace, mode))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTrace {
    pub mode: Mode,
    pub trace: String,
}

/// A trace re-encoded as one polyline per maximal same-mode run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTraces {
    #[serde(rename = "vc-id")]
    pub vc_id: String,
    #[serde(rename = "route-option-id")]
    pub route_option_id: String,
    pub traces: Vec<ModeTrace>,
}

pub fn mode_polylines(trace: &Trace) -> Result<ModeTraces> {
    let mut traces = Vec::new();
    let mut run: Vec<Coord<f64>> = Vec::new();
    let mut run_mode: Option<Mode> = None;

    for elem in &trace.elements {
        if run_mode != Some(elem.mode) {
            if let Some(mode) = run_mode {
                if !run.is_empty() {
                    traces.push(ModeTrace {
                        mode,
                        trace: polyline::encode_coordinates(std::mem::take(&mut run), 5)?,
                    });
                }
            }
            run_mode = Some(elem.mode);
            run.clear();
        }

        run.push(Coord {
            x: elem.point[0],
            y: elem.point[1],
        });
    }

    if let Some(mode) = run_mode {
        if !run.is_empty() {
            traces.push(ModeTrace {
                mode,
                trace: polyline::encode_coordinates(run, 5)?,
            });
        }
    }

    Ok(ModeTraces {
        vc_id: trace.vc_id.clone(),
        route_option_id: trace.route_option_id.clone(),
        traces,
    })
}
