use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport modes as produced by the routing engine. Train, gondola
/// and watercraft legs are accounted as rail downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Train,
    Gondola,
    Watercraft,
    Bus,
    Car,
    Walking,
    Bicycle,
    Taxi,
    Aircraft,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Gondola => "gondola",
            Mode::Watercraft => "watercraft",
            Mode::Bus => "bus",
            Mode::Car => "car",
            Mode::Walking => "walking",
            Mode::Bicycle => "bicycle",
            Mode::Taxi => "taxi",
            Mode::Aircraft => "aircraft",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Mode, String> {
        match s {
            "train" => Ok(Mode::Train),
            "gondola" => Ok(Mode::Gondola),
            "watercraft" => Ok(Mode::Watercraft),
            "bus" => Ok(Mode::Bus),
            "car" => Ok(Mode::Car),
            "walking" => Ok(Mode::Walking),
            "bicycle" => Ok(Mode::Bicycle),
            "taxi" => Ok(Mode::Taxi),
            "aircraft" => Ok(Mode::Aircraft),
            other => Err(format!("unknown transport mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Location {
    pub fn point(&self) -> [f64; 2] {
        [self.longitude, self.latitude]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stopover {
    #[serde(default)]
    pub station: Option<Location>,
    #[serde(default)]
    pub departure: Option<DateTime<Utc>>,
    #[serde(default)]
    pub arrival: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    pub mode: Mode,
    #[serde(default)]
    pub origin: Option<Location>,
    #[serde(default)]
    pub destination: Option<Location>,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    #[serde(default, rename = "departure-delay")]
    pub departure_delay: Option<i64>,
    #[serde(default, rename = "arrival-delay")]
    pub arrival_delay: Option<i64>,
    #[serde(default)]
    pub stopovers: Vec<Stopover>,
    #[serde(default)]
    pub polyline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOption {
    #[serde(rename = "route-option-id")]
    pub route_option_id: String,
    /// `[lon, lat]` of the commuter's requested origin.
    pub origin: Vec<f64>,
    pub destination: Vec<f64>,
    pub departure: DateTime<Utc>,
    pub legs: Vec<Leg>,
}

impl RouteOption {
    pub fn has_car_leg(&self) -> bool {
        self.legs.iter().any(|leg| leg.mode == Mode::Car)
    }

    /// Journey duration including reported delays: departure and its
    /// delay come from the first leg, arrival and its delay from the
    /// last.
    pub fn adjusted_duration(&self) -> Option<Duration> {
        let first = self.legs.first()?;
        let last = self.legs.last()?;

        let departure = first.departure + Duration::seconds(first.departure_delay.unwrap_or(0));
        let arrival = last.arrival + Duration::seconds(last.arrival_delay.unwrap_or(0));

        Some(arrival - departure)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vehicles {
    #[serde(default)]
    pub car: Option<i32>,
    #[serde(default)]
    pub moto: Option<i32>,
    #[serde(default)]
    pub utilities: Option<i32>,
    #[serde(default)]
    pub usage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Traveller {
    #[serde(default)]
    pub employed: bool,
    #[serde(default, rename = "employment_type")]
    pub employment_type: Option<String>,
    #[serde(default)]
    pub vehicles: Vehicles,
    #[serde(default)]
    pub age: String,
}

impl Traveller {
    /// A traveller uses a car iff a vehicle usage entry exists. The
    /// entry's value is not consulted.
    pub fn would_use_car(&self) -> bool {
        self.vehicles.usage.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    #[serde(rename = "_id")]
    pub doc_id: String,
    #[serde(rename = "vc-id")]
    pub vc_id: String,
    #[serde(rename = "sim-id")]
    pub sim_id: String,
    #[serde(default)]
    pub traveller: Option<Traveller>,
    pub options: Vec<RouteOption>,
}

/// One route option chosen for one commuter.
#[derive(Debug, Clone, Copy)]
pub struct SelectedOption<'a> {
    pub vc_id: &'a str,
    pub option: &'a RouteOption,
}

/// The option with minimum delay-adjusted duration. Options with a
/// car leg are skipped for travellers without vehicle usage; if no
/// option qualifies the result contributes nothing.
pub fn selected_option(result: &RouteResult) -> Option<&RouteOption> {
    let would_use_car = result
        .traveller
        .as_ref()
        .is_some_and(|traveller| traveller.would_use_car());

    let mut best: Option<(&RouteOption, Duration)> = None;

    for option in &result.options {
        if !would_use_car && option.has_car_leg() {
            continue;
        }

        let Some(duration) = option.adjusted_duration() else {
            continue;
        };

        match best {
            Some((_, shortest)) if duration >= shortest => {}
            _ => best = Some((option, duration)),
        }
    }

    best.map(|(option, _)| option)
}

pub fn select_options(results: &[RouteResult]) -> Vec<SelectedOption<'_>> {
    results
        .iter()
        .filter_map(|result| {
            selected_option(result).map(|option| SelectedOption {
                vc_id: &result.vc_id,
                option,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 4, 8, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn leg(mode: Mode, departure: i64, arrival: i64) -> Leg {
        Leg {
            mode,
            origin: None,
            destination: None,
            departure: at(departure),
            arrival: at(arrival),
            departure_delay: None,
            arrival_delay: None,
            stopovers: Vec::new(),
            polyline: None,
        }
    }

    fn option(id: &str, legs: Vec<Leg>) -> RouteOption {
        RouteOption {
            route_option_id: id.into(),
            origin: vec![5.4, 51.4],
            destination: vec![5.5, 51.5],
            departure: at(0),
            legs,
        }
    }

    fn result(traveller: Option<Traveller>, options: Vec<RouteOption>) -> RouteResult {
        RouteResult {
            doc_id: "doc-1".into(),
            vc_id: "vc-1".into(),
            sim_id: "sim-1".into(),
            traveller,
            options,
        }
    }

    fn carless_traveller() -> Traveller {
        Traveller {
            employed: true,
            employment_type: None,
            vehicles: Vehicles::default(),
            age: "30-39".into(),
        }
    }

    #[test]
    fn skips_car_option_without_vehicle_usage() {
        // The car option is faster, but the traveller has no vehicle
        // usage entry.
        let result = result(
            Some(carless_traveller()),
            vec![
                option("car", vec![leg(Mode::Car, 0, 10)]),
                option("transit", vec![leg(Mode::Bus, 0, 40)]),
            ],
        );

        let selected = selected_option(&result).unwrap();
        assert_eq!(selected.route_option_id, "transit");
    }

    #[test]
    fn car_only_results_contribute_nothing() {
        let result = result(
            Some(carless_traveller()),
            vec![option("car", vec![leg(Mode::Car, 0, 10)])],
        );
        assert!(selected_option(&result).is_none());
    }

    #[test]
    fn car_owner_gets_the_faster_car_option() {
        let mut traveller = carless_traveller();
        traveller.vehicles.usage = Some("daily".into());

        let result = result(
            Some(traveller),
            vec![
                option("car", vec![leg(Mode::Car, 0, 10)]),
                option("transit", vec![leg(Mode::Bus, 0, 40)]),
            ],
        );

        assert_eq!(selected_option(&result).unwrap().route_option_id, "car");
    }

    #[test]
    fn delays_shift_the_adjusted_duration() {
        let mut delayed = option("delayed", vec![leg(Mode::Bus, 0, 30)]);
        delayed.legs[0].arrival_delay = Some(20 * 60);

        let result = result(
            Some(carless_traveller()),
            vec![delayed, option("steady", vec![leg(Mode::Bus, 0, 40)])],
        );

        assert_eq!(selected_option(&result).unwrap().route_option_id, "steady");
    }

    #[test]
    fn duration_ties_keep_the_first_option() {
        let result = result(
            Some(carless_traveller()),
            vec![
                option("first", vec![leg(Mode::Bus, 0, 30)]),
                option("second", vec![leg(Mode::Train, 0, 30)]),
            ],
        );

        assert_eq!(selected_option(&result).unwrap().route_option_id, "first");
    }

    #[test]
    fn mode_string_roundtrip() {
        for mode in [Mode::Train, Mode::Car, Mode::Walking, Mode::Watercraft] {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert!("hovercraft".parse::<Mode>().is_err());
    }
}
