//! AccuWeather adapter.
//!
//! Every AccuWeather data endpoint is keyed by an opaque location key, so a
//! coordinate lookup precedes the first request for each location. Keys are
//! remembered for the lifetime of the provider.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::{
    condition::WeatherCondition,
    model::{
        Coordinates, CurrentConditions, DailyForecast, Forecast, HourlyForecast, Place, Severity,
        VendorAlert,
    },
    provider::{ProviderId, get_json, http_client, pct, unix_to_utc},
    units::kph_to_mps,
};

use super::WeatherProvider;

const BASE_URL: &str = "https://dataservice.accuweather.com";
const ID: ProviderId = ProviderId::AccuWeather;
const MAX_DAYS: usize = 5;

#[derive(Debug, Clone)]
pub struct AccuWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
    locations: Arc<Mutex<HashMap<String, AwResolved>>>,
}

#[derive(Debug, Clone)]
struct AwResolved {
    key: String,
    place: Place,
}

impl AccuWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            http: http_client(),
            locations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn resolve(&self, at: Coordinates) -> Result<AwResolved> {
        let cache_key = at.cache_key();
        if let Some(hit) = self.locations.lock().await.get(&cache_key) {
            return Ok(hit.clone());
        }

        let q = at.query();
        let parsed: AwLocation = get_json(
            &self.http,
            ID,
            "geoposition search",
            &self.url("/locations/v1/cities/geoposition/search"),
            &[("apikey", self.api_key.as_str()), ("q", q.as_str())],
        )
        .await?;

        let resolved = AwResolved { key: parsed.key.clone(), place: parsed.into_place() };
        tracing::debug!(key = %resolved.key, place = %resolved.place.name, "resolved AccuWeather location key");

        self.locations.lock().await.insert(cache_key, resolved.clone());
        Ok(resolved)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwNamed {
    localized_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwGeoPosition {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwLocation {
    key: String,
    localized_name: String,
    #[serde(default)]
    administrative_area: Option<AwNamed>,
    #[serde(default)]
    country: Option<AwNamed>,
    geo_position: AwGeoPosition,
}

impl AwLocation {
    fn into_place(self) -> Place {
        Place {
            name: self.localized_name,
            region: self.administrative_area.map(|a| a.localized_name),
            country: self.country.map(|c| c.localized_name),
            coordinates: Coordinates { lat: self.geo_position.latitude, lon: self.geo_position.longitude },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwValue {
    value: f64,
}

/// `{ "Metric": { "Value": .. }, "Imperial": { .. } }`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwMeasure {
    metric: AwValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwDirection {
    degrees: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwCurrentWind {
    #[serde(default)]
    direction: Option<AwDirection>,
    speed: AwMeasure,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwCurrentGust {
    speed: AwMeasure,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwPrecipSummary {
    #[serde(default)]
    past_hour: Option<AwMeasure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwCurrent {
    epoch_time: i64,
    weather_text: String,
    weather_icon: Option<u32>,
    temperature: AwMeasure,
    #[serde(default)]
    real_feel_temperature: Option<AwMeasure>,
    #[serde(default)]
    relative_humidity: Option<f64>,
    wind: AwCurrentWind,
    #[serde(default)]
    wind_gust: Option<AwCurrentGust>,
    #[serde(rename = "UVIndex", default)]
    uv_index: Option<f64>,
    #[serde(default)]
    visibility: Option<AwMeasure>,
    #[serde(default)]
    cloud_cover: Option<f64>,
    #[serde(default)]
    pressure: Option<AwMeasure>,
    #[serde(default)]
    precipitation_summary: Option<AwPrecipSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwSun {
    #[serde(default)]
    epoch_rise: Option<i64>,
    #[serde(default)]
    epoch_set: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwMinMax {
    minimum: AwValue,
    maximum: AwValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwForecastWind {
    speed: AwValue,
    #[serde(default)]
    direction: Option<AwDirection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwForecastGust {
    speed: AwValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwHalfDay {
    icon: u32,
    icon_phrase: String,
    #[serde(default)]
    precipitation_probability: f64,
    #[serde(default)]
    total_liquid: Option<AwValue>,
    #[serde(default)]
    wind: Option<AwForecastWind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwPollen {
    name: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwDailyEntry {
    epoch_date: i64,
    #[serde(default)]
    sun: Option<AwSun>,
    temperature: AwMinMax,
    day: AwHalfDay,
    #[serde(default)]
    night: Option<AwHalfDay>,
    #[serde(default)]
    air_and_pollen: Vec<AwPollen>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwDailyResponse {
    daily_forecasts: Vec<AwDailyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwHourlyEntry {
    epoch_date_time: i64,
    weather_icon: u32,
    icon_phrase: String,
    temperature: AwValue,
    #[serde(default)]
    real_feel_temperature: Option<AwValue>,
    #[serde(default)]
    wind: Option<AwForecastWind>,
    #[serde(default)]
    wind_gust: Option<AwForecastGust>,
    #[serde(default)]
    relative_humidity: Option<f64>,
    #[serde(default)]
    precipitation_probability: f64,
    #[serde(default)]
    total_liquid: Option<AwValue>,
    #[serde(rename = "UVIndex", default)]
    uv_index: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwLocalized {
    localized: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwAlertArea {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    epoch_start_time: Option<i64>,
    #[serde(default)]
    epoch_end_time: Option<i64>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwAlert {
    #[serde(rename = "AlertID")]
    alert_id: i64,
    description: AwLocalized,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    area: Vec<AwAlertArea>,
}

fn convert_current(c: AwCurrent, place: Place) -> CurrentConditions {
    let condition = c
        .weather_icon
        .map(WeatherCondition::from_accuweather_icon)
        .unwrap_or_default();

    CurrentConditions {
        provider: ID,
        place,
        observed_at: unix_to_utc(c.epoch_time).unwrap_or_else(Utc::now),
        temperature_c: c.temperature.metric.value,
        feels_like_c: c
            .real_feel_temperature
            .map(|m| m.metric.value)
            .unwrap_or(c.temperature.metric.value),
        humidity_pct: c.relative_humidity.map(pct).unwrap_or(0),
        pressure_hpa: c.pressure.map(|m| m.metric.value),
        wind_speed_mps: kph_to_mps(c.wind.speed.metric.value),
        wind_gust_mps: c.wind_gust.map(|g| kph_to_mps(g.speed.metric.value)),
        wind_direction_deg: c.wind.direction.map(|d| d.degrees),
        visibility_km: c.visibility.map(|m| m.metric.value),
        uv_index: c.uv_index,
        cloud_cover_pct: c.cloud_cover.map(pct),
        precipitation_mm: c
            .precipitation_summary
            .and_then(|p| p.past_hour)
            .map(|m| m.metric.value)
            .unwrap_or(0.0),
        condition,
        description: c.weather_text,
        sunrise: None,
        sunset: None,
    }
}

fn convert_daily(entry: AwDailyEntry) -> Option<DailyForecast> {
    let date = unix_to_utc(entry.epoch_date)?.date_naive();
    let night = entry.night.as_ref();
    let precipitation_probability = night
        .map(|n| n.precipitation_probability)
        .unwrap_or(0.0)
        .max(entry.day.precipitation_probability);
    let precipitation_mm = entry.day.total_liquid.as_ref().map(|v| v.value).unwrap_or(0.0)
        + night.and_then(|n| n.total_liquid.as_ref()).map(|v| v.value).unwrap_or(0.0);
    let max_wind_kph = entry
        .day
        .wind
        .as_ref()
        .map(|w| w.speed.value)
        .into_iter()
        .chain(night.and_then(|n| n.wind.as_ref()).map(|w| w.speed.value))
        .reduce(f64::max);
    let uv_index = entry
        .air_and_pollen
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case("UVIndex"))
        .map(|p| p.value);

    Some(DailyForecast {
        date,
        high_c: entry.temperature.maximum.value,
        low_c: entry.temperature.minimum.value,
        condition: WeatherCondition::from_accuweather_icon(entry.day.icon),
        description: entry.day.icon_phrase,
        precipitation_probability_pct: pct(precipitation_probability),
        precipitation_mm,
        max_wind_mps: max_wind_kph.map(kph_to_mps),
        humidity_pct: None,
        uv_index,
        sunrise: entry.sun.as_ref().and_then(|s| s.epoch_rise).and_then(unix_to_utc),
        sunset: entry.sun.as_ref().and_then(|s| s.epoch_set).and_then(unix_to_utc),
    })
}

fn convert_hourly(h: AwHourlyEntry) -> Option<HourlyForecast> {
    Some(HourlyForecast {
        time: unix_to_utc(h.epoch_date_time)?,
        temperature_c: h.temperature.value,
        feels_like_c: h.real_feel_temperature.map(|v| v.value),
        condition: WeatherCondition::from_accuweather_icon(h.weather_icon),
        description: h.icon_phrase,
        precipitation_probability_pct: pct(h.precipitation_probability),
        precipitation_mm: h.total_liquid.map(|v| v.value).unwrap_or(0.0),
        wind_speed_mps: h.wind.as_ref().map(|w| kph_to_mps(w.speed.value)).unwrap_or(0.0),
        wind_gust_mps: h.wind_gust.map(|g| kph_to_mps(g.speed.value)),
        wind_direction_deg: h.wind.and_then(|w| w.direction).map(|d| d.degrees),
        humidity_pct: h.relative_humidity.map(pct),
        uv_index: h.uv_index,
    })
}

fn alert_severity(alert: &AwAlert) -> Severity {
    if let Some(level) = alert.level.as_deref() {
        return Severity::from_vendor(level);
    }
    // Lower priority numbers are more urgent.
    match alert.priority {
        Some(1) => Severity::Extreme,
        Some(2..=10) => Severity::High,
        Some(11..=50) => Severity::Moderate,
        _ => Severity::Low,
    }
}

fn convert_alert(alert: AwAlert) -> VendorAlert {
    let severity = alert_severity(&alert);
    let first_area = alert.area.first();
    let areas = alert
        .area
        .iter()
        .filter_map(|a| a.name.clone())
        .collect::<Vec<_>>()
        .join(", ");

    VendorAlert {
        provider: ID,
        id: alert.alert_id.to_string(),
        title: alert.description.localized,
        description: first_area.and_then(|a| a.text.clone()).unwrap_or_default(),
        severity,
        starts: first_area.and_then(|a| a.epoch_start_time).and_then(unix_to_utc),
        ends: first_area.and_then(|a| a.epoch_end_time).and_then(unix_to_utc),
        areas: (!areas.is_empty()).then_some(areas),
    }
}

#[async_trait]
impl WeatherProvider for AccuWeatherProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn current(&self, at: Coordinates) -> Result<CurrentConditions> {
        let resolved = self.resolve(at).await?;
        let path = format!("/currentconditions/v1/{}", resolved.key);
        let parsed: Vec<AwCurrent> = get_json(
            &self.http,
            ID,
            "current conditions",
            &self.url(&path),
            &[("apikey", self.api_key.as_str()), ("details", "true")],
        )
        .await?;

        let current = parsed
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("AccuWeather current conditions response was empty"))?;
        Ok(convert_current(current, resolved.place))
    }

    async fn forecast(&self, at: Coordinates, days: u8) -> Result<Forecast> {
        let resolved = self.resolve(at).await?;
        let query = [
            ("apikey", self.api_key.as_str()),
            ("details", "true"),
            ("metric", "true"),
        ];

        let daily_url = self.url(&format!("/forecasts/v1/daily/5day/{}", resolved.key));
        let hourly_url = self.url(&format!("/forecasts/v1/hourly/12hour/{}", resolved.key));
        let (daily, hourly) = tokio::try_join!(
            get_json::<AwDailyResponse>(&self.http, ID, "daily forecast", &daily_url, &query),
            get_json::<Vec<AwHourlyEntry>>(&self.http, ID, "hourly forecast", &hourly_url, &query),
        )
        .context("AccuWeather forecast failed")?;

        Ok(Forecast {
            provider: ID,
            place: resolved.place,
            hourly: hourly.into_iter().filter_map(convert_hourly).collect(),
            daily: daily
                .daily_forecasts
                .into_iter()
                .take(usize::from(days).min(MAX_DAYS))
                .filter_map(convert_daily)
                .collect(),
            fetched_at: Utc::now(),
        })
    }

    async fn alerts(&self, at: Coordinates) -> Result<Vec<VendorAlert>> {
        let resolved = self.resolve(at).await?;
        let path = format!("/alerts/v1/{}", resolved.key);
        let parsed: Vec<AwAlert> = get_json(
            &self.http,
            ID,
            "alerts",
            &self.url(&path),
            &[("apikey", self.api_key.as_str())],
        )
        .await?;

        Ok(parsed.into_iter().map(convert_alert).collect())
    }

    async fn search(&self, query: &str) -> Result<Vec<Place>> {
        let parsed: Vec<AwLocation> = get_json(
            &self.http,
            ID,
            "city search",
            &self.url("/locations/v1/cities/search"),
            &[("apikey", self.api_key.as_str()), ("q", query)],
        )
        .await?;

        Ok(parsed.into_iter().map(AwLocation::into_place).collect())
    }
}
