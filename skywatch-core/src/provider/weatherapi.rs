use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    aqi,
    condition::WeatherCondition,
    model::{
        AirQuality, Coordinates, CurrentConditions, DailyForecast, Forecast, HourlyForecast, Place,
        Severity, VendorAlert,
    },
    provider::{ProviderId, get_json, http_client, pct, unix_to_utc},
    units::kph_to_mps,
};

use super::WeatherProvider;

const BASE_URL: &str = "https://api.weatherapi.com";
const ID: ProviderId = ProviderId::WeatherApi;
/// Free plan forecast horizon.
const MAX_DAYS: u8 = 14;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self { api_key, base_url: BASE_URL.to_string(), http: http_client() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn fetch_forecast(
        &self,
        at: Coordinates,
        days: u8,
        with_alerts: bool,
    ) -> Result<WaForecastResponse> {
        let q = at.query();
        let days = days.clamp(1, MAX_DAYS).to_string();
        get_json(
            &self.http,
            ID,
            "forecast",
            &self.url("/v1/forecast.json"),
            &[
                ("key", self.api_key.as_str()),
                ("q", q.as_str()),
                ("days", days.as_str()),
                ("aqi", "no"),
                ("alerts", if with_alerts { "yes" } else { "no" }),
            ],
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    lat: f64,
    lon: f64,
    #[serde(default)]
    localtime_epoch: Option<i64>,
    #[serde(default)]
    localtime: Option<String>,
}

impl WaLocation {
    fn place(&self) -> Place {
        Place {
            name: self.name.clone(),
            region: self.region.clone().filter(|r| !r.is_empty()),
            country: self.country.clone(),
            coordinates: Coordinates { lat: self.lat, lon: self.lon },
        }
    }

    /// Seconds east of UTC, derived from the local wall clock and the epoch.
    fn utc_offset_secs(&self) -> Option<i64> {
        let local = NaiveDateTime::parse_from_str(self.localtime.as_deref()?, "%Y-%m-%d %H:%M").ok()?;
        let epoch = self.localtime_epoch?;
        // Round to the nearest quarter hour; localtime has minute precision.
        let raw = local.and_utc().timestamp() - epoch;
        Some((raw as f64 / 900.0).round() as i64 * 900)
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
    code: u32,
}

#[derive(Debug, Deserialize)]
struct WaAirQuality {
    #[serde(default)]
    co: Option<f64>,
    #[serde(default)]
    no2: Option<f64>,
    #[serde(default)]
    o3: Option<f64>,
    #[serde(default)]
    so2: Option<f64>,
    #[serde(default)]
    pm2_5: Option<f64>,
    #[serde(default)]
    pm10: Option<f64>,
    #[serde(rename = "us-epa-index", default)]
    us_epa_index: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    #[serde(default)]
    last_updated_epoch: Option<i64>,
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    wind_kph: f64,
    #[serde(default)]
    gust_kph: Option<f64>,
    #[serde(default)]
    wind_degree: Option<u16>,
    #[serde(default)]
    pressure_mb: Option<f64>,
    #[serde(default)]
    precip_mm: f64,
    #[serde(default)]
    cloud: Option<u8>,
    #[serde(default)]
    vis_km: Option<f64>,
    #[serde(default)]
    uv: Option<f64>,
    condition: WaCondition,
    #[serde(default)]
    air_quality: Option<WaAirQuality>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: WaCurrent,
}

#[derive(Debug, Deserialize)]
struct WaForecastHour {
    time_epoch: i64,
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    wind_kph: f64,
    #[serde(default)]
    gust_kph: Option<f64>,
    #[serde(default)]
    wind_degree: Option<u16>,
    #[serde(default)]
    precip_mm: f64,
    #[serde(default)]
    chance_of_rain: f64,
    #[serde(default)]
    chance_of_snow: f64,
    #[serde(default)]
    uv: Option<f64>,
    condition: WaCondition,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    #[serde(default)]
    maxwind_kph: Option<f64>,
    #[serde(default)]
    totalprecip_mm: f64,
    #[serde(default)]
    avghumidity: Option<f64>,
    #[serde(default)]
    daily_chance_of_rain: f64,
    #[serde(default)]
    daily_chance_of_snow: f64,
    #[serde(default)]
    uv: Option<f64>,
    condition: WaCondition,
}

#[derive(Debug, Default, Deserialize)]
struct WaAstro {
    #[serde(default)]
    sunrise: Option<String>,
    #[serde(default)]
    sunset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: String,
    day: WaDay,
    #[serde(default)]
    astro: WaAstro,
    hour: Vec<WaForecastHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaAlert {
    #[serde(default)]
    headline: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    areas: Option<String>,
    #[serde(default)]
    event: String,
    #[serde(default)]
    effective: Option<String>,
    #[serde(default)]
    expires: Option<String>,
    #[serde(default)]
    desc: String,
}

#[derive(Debug, Default, Deserialize)]
struct WaAlerts {
    #[serde(default)]
    alert: Vec<WaAlert>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    forecast: WaForecast,
    #[serde(default)]
    alerts: WaAlerts,
}

#[derive(Debug, Deserialize)]
struct WaSearchEntry {
    name: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    country: Option<String>,
    lat: f64,
    lon: f64,
}

/// Astro times come as local wall clock, e.g. "05:43 AM".
fn astro_time(date: NaiveDate, text: Option<&str>, offset_secs: Option<i64>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(text?.trim(), "%I:%M %p").ok()?;
    let local = date.and_time(time).and_utc();
    Some(local - chrono::Duration::seconds(offset_secs?))
}

fn convert_current(parsed: WaResponse) -> CurrentConditions {
    let observed_at = parsed
        .current
        .last_updated_epoch
        .or(parsed.location.localtime_epoch)
        .and_then(unix_to_utc)
        .unwrap_or_else(Utc::now);
    let c = parsed.current;

    CurrentConditions {
        provider: ID,
        place: parsed.location.place(),
        observed_at,
        temperature_c: c.temp_c,
        feels_like_c: c.feelslike_c,
        humidity_pct: c.humidity,
        pressure_hpa: c.pressure_mb,
        wind_speed_mps: kph_to_mps(c.wind_kph),
        wind_gust_mps: c.gust_kph.map(kph_to_mps),
        wind_direction_deg: c.wind_degree,
        visibility_km: c.vis_km,
        uv_index: c.uv,
        cloud_cover_pct: c.cloud,
        precipitation_mm: c.precip_mm,
        condition: WeatherCondition::from_weatherapi_code(c.condition.code),
        description: c.condition.text,
        sunrise: None,
        sunset: None,
    }
}

fn convert_forecast(parsed: WaForecastResponse) -> Result<Forecast> {
    let offset = parsed.location.utc_offset_secs();
    let mut hourly = Vec::new();
    let mut daily = Vec::with_capacity(parsed.forecast.forecastday.len());

    for day in parsed.forecast.forecastday {
        let date = NaiveDate::parse_from_str(&day.date, "%Y-%m-%d")
            .with_context(|| format!("Invalid WeatherAPI forecast date '{}'", day.date))?;

        hourly.extend(day.hour.into_iter().filter_map(|h| {
            Some(HourlyForecast {
                time: unix_to_utc(h.time_epoch)?,
                temperature_c: h.temp_c,
                feels_like_c: Some(h.feelslike_c),
                condition: WeatherCondition::from_weatherapi_code(h.condition.code),
                description: h.condition.text,
                precipitation_probability_pct: pct(h.chance_of_rain.max(h.chance_of_snow)),
                precipitation_mm: h.precip_mm,
                wind_speed_mps: kph_to_mps(h.wind_kph),
                wind_gust_mps: h.gust_kph.map(kph_to_mps),
                wind_direction_deg: h.wind_degree,
                humidity_pct: Some(h.humidity),
                uv_index: h.uv,
            })
        }));

        daily.push(DailyForecast {
            date,
            high_c: day.day.maxtemp_c,
            low_c: day.day.mintemp_c,
            condition: WeatherCondition::from_weatherapi_code(day.day.condition.code),
            description: day.day.condition.text,
            precipitation_probability_pct: pct(
                day.day.daily_chance_of_rain.max(day.day.daily_chance_of_snow),
            ),
            precipitation_mm: day.day.totalprecip_mm,
            max_wind_mps: day.day.maxwind_kph.map(kph_to_mps),
            humidity_pct: day.day.avghumidity.map(pct),
            uv_index: day.day.uv,
            sunrise: astro_time(date, day.astro.sunrise.as_deref(), offset),
            sunset: astro_time(date, day.astro.sunset.as_deref(), offset),
        });
    }

    Ok(Forecast {
        provider: ID,
        place: parsed.location.place(),
        hourly,
        daily,
        fetched_at: Utc::now(),
    })
}

fn parse_rfc3339(s: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s?).ok().map(|d| d.with_timezone(&Utc))
}

fn convert_alerts(alerts: WaAlerts) -> Vec<VendorAlert> {
    alerts
        .alert
        .into_iter()
        .map(|a| {
            let starts = parse_rfc3339(a.effective.as_deref());
            let title = if a.headline.is_empty() { a.event.clone() } else { a.headline };
            VendorAlert {
                provider: ID,
                id: format!("{}@{}", a.event, a.effective.as_deref().unwrap_or("")),
                title,
                description: a.desc,
                severity: Severity::from_vendor(&a.severity),
                starts,
                ends: parse_rfc3339(a.expires.as_deref()),
                areas: a.areas.filter(|s| !s.is_empty()),
            }
        })
        .collect()
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn current(&self, at: Coordinates) -> Result<CurrentConditions> {
        let q = at.query();
        let parsed: WaResponse = get_json(
            &self.http,
            ID,
            "current",
            &self.url("/v1/current.json"),
            &[("key", self.api_key.as_str()), ("q", q.as_str()), ("aqi", "no")],
        )
        .await?;

        Ok(convert_current(parsed))
    }

    async fn forecast(&self, at: Coordinates, days: u8) -> Result<Forecast> {
        let parsed = self.fetch_forecast(at, days, false).await?;
        convert_forecast(parsed)
    }

    async fn air_quality(&self, at: Coordinates) -> Result<AirQuality> {
        let q = at.query();
        let parsed: WaResponse = get_json(
            &self.http,
            ID,
            "air quality",
            &self.url("/v1/current.json"),
            &[("key", self.api_key.as_str()), ("q", q.as_str()), ("aqi", "yes")],
        )
        .await?;

        let measured_at = parsed
            .current
            .last_updated_epoch
            .and_then(unix_to_utc)
            .unwrap_or_else(Utc::now);
        let air = parsed
            .current
            .air_quality
            .ok_or_else(|| anyhow::anyhow!("WeatherAPI response contained no air_quality block"))?;

        let (aqi, category) = aqi::resolve_aqi(
            air.pm2_5,
            air.pm10,
            air.us_epa_index.and_then(aqi::category_from_epa_index),
        )
        .ok_or_else(|| anyhow::anyhow!("WeatherAPI air quality had no usable index"))?;

        Ok(AirQuality {
            provider: ID,
            measured_at,
            aqi,
            category,
            pm2_5: air.pm2_5,
            pm10: air.pm10,
            o3: air.o3,
            no2: air.no2,
            so2: air.so2,
            co: air.co,
        })
    }

    async fn alerts(&self, at: Coordinates) -> Result<Vec<VendorAlert>> {
        let parsed = self.fetch_forecast(at, 1, true).await?;
        Ok(convert_alerts(parsed.alerts))
    }

    async fn search(&self, query: &str) -> Result<Vec<Place>> {
        let parsed: Vec<WaSearchEntry> = get_json(
            &self.http,
            ID,
            "search",
            &self.url("/v1/search.json"),
            &[("key", self.api_key.as_str()), ("q", query)],
        )
        .await?;

        Ok(parsed
            .into_iter()
            .map(|e| Place {
                name: e.name,
                region: e.region.filter(|r| !r.is_empty()),
                country: e.country,
                coordinates: Coordinates { lat: e.lat, lon: e.lon },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_from_localtime() {
        let loc = WaLocation {
            name: "Chicago".into(),
            region: None,
            country: None,
            lat: 41.9,
            lon: -87.6,
            // 2024-06-01 12:00 UTC == 07:00 CDT
            localtime_epoch: Some(1_717_243_230),
            localtime: Some("2024-06-01 7:00".into()),
        };
        assert_eq!(loc.utc_offset_secs(), Some(-5 * 3600));
    }

    #[test]
    fn astro_time_converts_local_to_utc() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let t = astro_time(date, Some("05:15 AM"), Some(-5 * 3600)).unwrap();
        assert_eq!(t.to_rfc3339(), "2024-06-01T10:15:00+00:00");
        assert!(astro_time(date, Some("05:15 AM"), None).is_none());
    }

    #[test]
    fn alerts_map_severity_and_window() {
        let alerts: WaAlerts = serde_json::from_value(serde_json::json!({
            "alert": [{
                "headline": "Flood Warning issued",
                "severity": "Severe",
                "event": "Flood Warning",
                "effective": "2024-06-01T10:00:00-05:00",
                "expires": "2024-06-02T10:00:00-05:00",
                "desc": "River flooding",
                "areas": ""
            }]
        }))
        .unwrap();

        let out = convert_alerts(alerts);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, Severity::High);
        assert_eq!(out[0].title, "Flood Warning issued");
        assert_eq!(out[0].starts.unwrap().to_rfc3339(), "2024-06-01T15:00:00+00:00");
        assert!(out[0].areas.is_none());
    }
}
