//! The unified shape every provider response is converted into.
//!
//! All values are metric: °C, m/s, mm, hPa, km. Use [`crate::units`] to
//! render them in other units.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{aqi::AqiCategory, condition::WeatherCondition, provider::ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> anyhow::Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(anyhow::anyhow!("Coordinates out of range: {lat},{lon}"));
        }
        Ok(Self { lat, lon })
    }

    /// Stable key for caching; about 1 km of resolution.
    pub fn cache_key(&self) -> String {
        format!("{:.2},{:.2}", self.lat, self.lon)
    }

    /// `lat,lon` as most vendor query strings expect it.
    pub fn query(&self) -> String {
        format!("{},{}", self.lat, self.lon)
    }

    /// Parse `"lat,lon"`. Returns `None` for anything that is not two numbers.
    pub fn parse(s: &str) -> Option<Self> {
        let (lat, lon) = s.split_once(',')?;
        let lat = lat.trim().parse().ok()?;
        let lon = lon.trim().parse().ok()?;
        Self::new(lat, lon).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub region: Option<String>,
    pub country: Option<String>,
    pub coordinates: Coordinates,
}

impl Place {
    pub fn from_coordinates(coordinates: Coordinates) -> Self {
        Self {
            name: coordinates.query(),
            region: None,
            country: None,
            coordinates,
        }
    }

    pub fn display_name(&self) -> String {
        match (&self.region, &self.country) {
            (Some(r), Some(c)) if !r.is_empty() => format!("{}, {}, {}", self.name, r, c),
            (_, Some(c)) if !c.is_empty() => format!("{}, {}", self.name, c),
            _ => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub provider: ProviderId,
    pub place: Place,
    pub observed_at: DateTime<Utc>,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub humidity_pct: u8,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_mps: f64,
    pub wind_gust_mps: Option<f64>,
    pub wind_direction_deg: Option<u16>,
    pub visibility_km: Option<f64>,
    pub uv_index: Option<f64>,
    pub cloud_cover_pct: Option<u8>,
    pub precipitation_mm: f64,
    pub condition: WeatherCondition,
    pub description: String,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub time: DateTime<Utc>,
    pub temperature_c: f64,
    pub feels_like_c: Option<f64>,
    pub condition: WeatherCondition,
    pub description: String,
    pub precipitation_probability_pct: u8,
    pub precipitation_mm: f64,
    pub wind_speed_mps: f64,
    pub wind_gust_mps: Option<f64>,
    pub wind_direction_deg: Option<u16>,
    pub humidity_pct: Option<u8>,
    pub uv_index: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub high_c: f64,
    pub low_c: f64,
    pub condition: WeatherCondition,
    pub description: String,
    pub precipitation_probability_pct: u8,
    pub precipitation_mm: f64,
    pub max_wind_mps: Option<f64>,
    pub humidity_pct: Option<u8>,
    pub uv_index: Option<f64>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub provider: ProviderId,
    pub place: Place,
    pub hourly: Vec<HourlyForecast>,
    pub daily: Vec<DailyForecast>,
    pub fetched_at: DateTime<Utc>,
}

impl Forecast {
    /// Hourly entries from `from` up to `from + hours`. A horizon beyond the
    /// representable range takes every later entry.
    pub fn hours_ahead(&self, from: DateTime<Utc>, hours: i64) -> impl Iterator<Item = &HourlyForecast> {
        let until = chrono::TimeDelta::try_hours(hours).and_then(|d| from.checked_add_signed(d));
        self.hourly
            .iter()
            .filter(move |h| h.time >= from && until.is_none_or(|until| h.time <= until))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirQuality {
    pub provider: ProviderId,
    pub measured_at: DateTime<Utc>,
    /// US EPA AQI, 0..=500.
    pub aqi: u16,
    pub category: AqiCategory,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub o3: Option<f64>,
    pub no2: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Extreme,
}

impl Severity {
    /// Lenient mapping of vendor severity words.
    pub fn from_vendor(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "extreme" => Severity::Extreme,
            "severe" | "high" | "warning" => Severity::High,
            "moderate" | "watch" | "medium" => Severity::Moderate,
            _ => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Extreme => "extreme",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert issued by the weather vendor itself (as opposed to one raised by a local rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorAlert {
    pub provider: ProviderId,
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub starts: Option<DateTime<Utc>>,
    pub ends: Option<DateTime<Utc>>,
    pub areas: Option<String>,
}

impl VendorAlert {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.ends.is_none_or(|end| end > now)
    }
}

/// Everything known about one location at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherReport {
    pub current: CurrentConditions,
    pub forecast: Forecast,
    pub air_quality: Option<AirQuality>,
    pub alerts: Vec<VendorAlert>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_parse_and_key() {
        let c = Coordinates::parse("52.5200, 13.4010").unwrap();
        assert_eq!(c.cache_key(), "52.52,13.40");
        assert!(Coordinates::parse("Berlin").is_none());
        assert!(Coordinates::parse("95,10").is_none());
    }

    #[test]
    fn place_display_name() {
        let coordinates = Coordinates::new(40.7, -74.0).unwrap();
        let place = Place {
            name: "New York".into(),
            region: Some("New York".into()),
            country: Some("USA".into()),
            coordinates,
        };
        assert_eq!(place.display_name(), "New York, New York, USA");

        let bare = Place::from_coordinates(coordinates);
        assert_eq!(bare.display_name(), "40.7,-74");
    }

    #[test]
    fn hours_ahead_bounds_the_window() {
        let forecast = fixtures::forecast();
        let from = fixtures::now();

        assert_eq!(forecast.hours_ahead(from, 3).count(), 4);
        assert_eq!(forecast.hours_ahead(from, i64::MAX).count(), forecast.hourly.len());
    }

    #[test]
    fn severity_ordering_and_vendor_words() {
        assert!(Severity::Extreme > Severity::High);
        assert_eq!(Severity::from_vendor("Severe"), Severity::High);
        assert_eq!(Severity::from_vendor("Moderate"), Severity::Moderate);
        assert_eq!(Severity::from_vendor(""), Severity::Low);
    }
}
