//! Unit conversions and display formatting.
//!
//! Everything inside the crate is metric (°C, m/s, mm, hPa, km). Conversions
//! to other units happen at the edges: when parsing vendor payloads that use
//! other units, and when rendering for a user who prefers imperial.

use serde::{Deserialize, Serialize};

pub fn c_to_f(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

pub fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

pub fn mps_to_kph(mps: f64) -> f64 {
    mps * 3.6
}

pub fn mps_to_mph(mps: f64) -> f64 {
    mps * 2.236_936
}

pub fn mm_to_in(mm: f64) -> f64 {
    mm / 25.4
}

pub fn hpa_to_inhg(hpa: f64) -> f64 {
    hpa * 0.029_529_98
}

pub fn km_to_miles(km: f64) -> f64 {
    km * 0.621_371
}

/// 16-point compass direction for a bearing in degrees.
pub fn cardinal(degrees: f64) -> &'static str {
    const POINTS: [&str; 16] = [
        "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW",
        "NW", "NNW",
    ];
    let normalized = degrees.rem_euclid(360.0);
    let idx = ((normalized / 22.5) + 0.5).floor() as usize % 16;
    POINTS[idx]
}

/// The unit system a user wants to read values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn temperature(&self, celsius: f64) -> f64 {
        match self {
            UnitSystem::Metric => celsius,
            UnitSystem::Imperial => c_to_f(celsius),
        }
    }

    pub fn speed(&self, mps: f64) -> f64 {
        match self {
            UnitSystem::Metric => mps_to_kph(mps),
            UnitSystem::Imperial => mps_to_mph(mps),
        }
    }

    pub fn format_temperature(&self, celsius: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.0}°C", celsius),
            UnitSystem::Imperial => format!("{:.0}°F", c_to_f(celsius)),
        }
    }

    pub fn format_speed(&self, mps: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.0} km/h", mps_to_kph(mps)),
            UnitSystem::Imperial => format!("{:.0} mph", mps_to_mph(mps)),
        }
    }

    pub fn format_precipitation(&self, mm: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.1} mm", mm),
            UnitSystem::Imperial => format!("{:.2} in", mm_to_in(mm)),
        }
    }

    pub fn format_pressure(&self, hpa: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.0} hPa", hpa),
            UnitSystem::Imperial => format!("{:.2} inHg", hpa_to_inhg(hpa)),
        }
    }

    pub fn format_distance(&self, km: f64) -> String {
        match self {
            UnitSystem::Metric => format!("{:.1} km", km),
            UnitSystem::Imperial => format!("{:.1} mi", km_to_miles(km)),
        }
    }
}

impl TryFrom<&str> for UnitSystem {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "metric" | "c" | "celsius" => Ok(UnitSystem::Metric),
            "imperial" | "f" | "fahrenheit" => Ok(UnitSystem::Imperial),
            _ => Err(anyhow::anyhow!(
                "Unknown unit system '{value}'. Supported: metric, imperial."
            )),
        }
    }
}
