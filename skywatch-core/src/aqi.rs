//! US EPA Air Quality Index.
//!
//! Providers report raw pollutant concentrations (µg/m³) and, sometimes,
//! their own coarse index. The unified shape carries a US AQI computed from
//! PM2.5/PM10 so that alert thresholds mean the same thing for every vendor.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn from_aqi(aqi: u16) -> Self {
        match aqi {
            0..=50 => Self::Good,
            51..=100 => Self::Moderate,
            101..=150 => Self::UnhealthyForSensitiveGroups,
            151..=200 => Self::Unhealthy,
            201..=300 => Self::VeryUnhealthy,
            _ => Self::Hazardous,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Good => "Good",
            Self::Moderate => "Moderate",
            Self::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            Self::Unhealthy => "Unhealthy",
            Self::VeryUnhealthy => "Very Unhealthy",
            Self::Hazardous => "Hazardous",
        }
    }

    /// Representative AQI for a category, used when only a coarse index is known.
    fn representative_aqi(&self) -> u16 {
        match self {
            Self::Good => 25,
            Self::Moderate => 75,
            Self::UnhealthyForSensitiveGroups => 125,
            Self::Unhealthy => 175,
            Self::VeryUnhealthy => 250,
            Self::Hazardous => 400,
        }
    }
}

// (concentration low, concentration high, index low, index high)
type Breakpoint = (f64, f64, u16, u16);

const PM25_BREAKPOINTS: [Breakpoint; 6] = [
    (0.0, 9.0, 0, 50),
    (9.1, 35.4, 51, 100),
    (35.5, 55.4, 101, 150),
    (55.5, 125.4, 151, 200),
    (125.5, 225.4, 201, 300),
    (225.5, 325.4, 301, 500),
];

const PM10_BREAKPOINTS: [Breakpoint; 6] = [
    (0.0, 54.0, 0, 50),
    (55.0, 154.0, 51, 100),
    (155.0, 254.0, 101, 150),
    (255.0, 354.0, 151, 200),
    (355.0, 424.0, 201, 300),
    (425.0, 604.0, 301, 500),
];

fn interpolate(conc: f64, table: &[Breakpoint]) -> u16 {
    if conc <= 0.0 {
        return 0;
    }
    for &(c_lo, c_hi, i_lo, i_hi) in table {
        if conc <= c_hi {
            // Gaps between rows are closed by snapping up to the next row.
            let c = conc.max(c_lo);
            let span = f64::from(i_hi - i_lo);
            let aqi = span / (c_hi - c_lo) * (c - c_lo) + f64::from(i_lo);
            return aqi.round() as u16;
        }
    }
    500
}

/// AQI sub-index for a PM2.5 concentration (µg/m³, truncated to 0.1).
/// Non-finite readings are unknown.
pub fn pm25_aqi(conc: f64) -> Option<u16> {
    conc.is_finite()
        .then(|| interpolate((conc * 10.0).trunc() / 10.0, &PM25_BREAKPOINTS))
}

/// AQI sub-index for a PM10 concentration (µg/m³, truncated to 1).
/// Non-finite readings are unknown.
pub fn pm10_aqi(conc: f64) -> Option<u16> {
    conc.is_finite().then(|| interpolate(conc.trunc(), &PM10_BREAKPOINTS))
}

/// Overall AQI from whichever particulate concentrations are known.
pub fn us_aqi(pm2_5: Option<f64>, pm10: Option<f64>) -> Option<u16> {
    let a = pm2_5.and_then(pm25_aqi);
    let b = pm10.and_then(pm10_aqi);
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// OpenWeather's 1 (good) ..= 5 (very poor) index.
pub fn category_from_openweather_index(index: u8) -> Option<AqiCategory> {
    match index {
        1 => Some(AqiCategory::Good),
        2 => Some(AqiCategory::Moderate),
        3 => Some(AqiCategory::UnhealthyForSensitiveGroups),
        4 => Some(AqiCategory::Unhealthy),
        5 => Some(AqiCategory::VeryUnhealthy),
        _ => None,
    }
}

/// WeatherAPI's `us-epa-index`, 1 ..= 6, one step per EPA category.
pub fn category_from_epa_index(index: u8) -> Option<AqiCategory> {
    match index {
        1 => Some(AqiCategory::Good),
        2 => Some(AqiCategory::Moderate),
        3 => Some(AqiCategory::UnhealthyForSensitiveGroups),
        4 => Some(AqiCategory::Unhealthy),
        5 => Some(AqiCategory::VeryUnhealthy),
        6 => Some(AqiCategory::Hazardous),
        _ => None,
    }
}

/// Best AQI estimate: concentrations when present, otherwise the vendor category.
pub fn resolve_aqi(
    pm2_5: Option<f64>,
    pm10: Option<f64>,
    vendor_category: Option<AqiCategory>,
) -> Option<(u16, AqiCategory)> {
    if let Some(aqi) = us_aqi(pm2_5, pm10) {
        return Some((aqi, AqiCategory::from_aqi(aqi)));
    }
    vendor_category.map(|c| (c.representative_aqi(), c))
}
