use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Timelike, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    aqi,
    condition::WeatherCondition,
    model::{
        AirQuality, Coordinates, CurrentConditions, DailyForecast, Forecast, HourlyForecast, Place,
    },
    provider::{ProviderId, get_json, http_client, pct, unix_to_utc},
};

use super::WeatherProvider;

const BASE_URL: &str = "https://api.openweathermap.org";
const ID: ProviderId = ProviderId::OpenWeather;
/// The free forecast endpoint returns 5 days in 3-hour steps.
const MAX_FORECAST_STEPS: u8 = 40;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            http: http_client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Deserialize)]
struct OwCoord {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
    #[serde(default)]
    pressure: Option<f64>,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    id: u32,
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
    #[serde(default)]
    deg: Option<u16>,
    #[serde(default)]
    gust: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OwClouds {
    all: u8,
}

#[derive(Debug, Default, Deserialize)]
struct OwPrecip {
    #[serde(rename = "1h", default)]
    one_hour: Option<f64>,
    #[serde(rename = "3h", default)]
    three_hours: Option<f64>,
}

impl OwPrecip {
    fn amount(&self) -> f64 {
        self.one_hour.or(self.three_hours).unwrap_or(0.0)
    }
}

#[derive(Debug, Default, Deserialize)]
struct OwSys {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    sunrise: Option<i64>,
    #[serde(default)]
    sunset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    coord: OwCoord,
    name: String,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    visibility: Option<f64>,
    #[serde(default)]
    clouds: OwClouds,
    #[serde(default)]
    rain: OwPrecip,
    #[serde(default)]
    snow: OwPrecip,
    #[serde(default)]
    sys: OwSys,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    name: String,
    #[serde(default)]
    country: Option<String>,
    coord: OwCoord,
    #[serde(default)]
    timezone: i32,
    #[serde(default)]
    sunrise: Option<i64>,
    #[serde(default)]
    sunset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    pop: f64,
    #[serde(default)]
    rain: OwPrecip,
    #[serde(default)]
    snow: OwPrecip,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    city: OwCity,
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwAirMain {
    aqi: u8,
}

#[derive(Debug, Deserialize)]
struct OwComponents {
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
}

#[derive(Debug, Deserialize)]
struct OwAirEntry {
    dt: i64,
    main: OwAirMain,
    components: OwComponents,
}

#[derive(Debug, Deserialize)]
struct OwAirResponse {
    list: Vec<OwAirEntry>,
}

#[derive(Debug, Deserialize)]
struct OwGeoEntry {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

fn first_condition(weather: &[OwWeather]) -> (WeatherCondition, String) {
    weather
        .first()
        .map(|w| (WeatherCondition::from_openweather_id(w.id), w.description.clone()))
        .unwrap_or_else(|| (WeatherCondition::Unknown, "Unknown".to_string()))
}

fn convert_current(parsed: OwCurrentResponse) -> CurrentConditions {
    let (condition, description) = first_condition(&parsed.weather);
    let observed_at = unix_to_utc(parsed.dt).unwrap_or_else(Utc::now);

    CurrentConditions {
        provider: ID,
        place: Place {
            name: parsed.name,
            region: None,
            country: parsed.sys.country,
            coordinates: Coordinates { lat: parsed.coord.lat, lon: parsed.coord.lon },
        },
        observed_at,
        temperature_c: parsed.main.temp,
        feels_like_c: parsed.main.feels_like,
        humidity_pct: parsed.main.humidity,
        pressure_hpa: parsed.main.pressure,
        wind_speed_mps: parsed.wind.speed,
        wind_gust_mps: parsed.wind.gust,
        wind_direction_deg: parsed.wind.deg,
        visibility_km: parsed.visibility.map(|m| m / 1000.0),
        uv_index: None,
        cloud_cover_pct: Some(parsed.clouds.all),
        precipitation_mm: parsed.rain.amount() + parsed.snow.amount(),
        condition,
        description,
        sunrise: parsed.sys.sunrise.and_then(unix_to_utc),
        sunset: parsed.sys.sunset.and_then(unix_to_utc),
    }
}

fn convert_forecast(parsed: OwForecastResponse, days: u8) -> Forecast {
    let offset = FixedOffset::east_opt(parsed.city.timezone).unwrap_or(Utc.fix());
    let local_date = |t: DateTime<Utc>| t.with_timezone(&offset).date_naive();

    let hourly: Vec<HourlyForecast> = parsed
        .list
        .iter()
        .filter_map(|e| {
            let time = unix_to_utc(e.dt)?;
            let (condition, description) = first_condition(&e.weather);
            Some(HourlyForecast {
                time,
                temperature_c: e.main.temp,
                feels_like_c: Some(e.main.feels_like),
                condition,
                description,
                precipitation_probability_pct: pct(e.pop * 100.0),
                precipitation_mm: e.rain.amount() + e.snow.amount(),
                wind_speed_mps: e.wind.speed,
                wind_gust_mps: e.wind.gust,
                wind_direction_deg: e.wind.deg,
                humidity_pct: Some(e.main.humidity),
                uv_index: None,
            })
        })
        .collect();

    // Daily values are aggregated from the 3-hour steps, per local calendar day.
    let mut by_day: BTreeMap<NaiveDate, Vec<(&OwForecastEntry, DateTime<Utc>)>> = BTreeMap::new();
    for entry in &parsed.list {
        if let Some(t) = unix_to_utc(entry.dt) {
            by_day.entry(local_date(t)).or_default().push((entry, t));
        }
    }

    let sunrise = parsed.city.sunrise.and_then(unix_to_utc);
    let sunset = parsed.city.sunset.and_then(unix_to_utc);

    let daily = by_day
        .into_iter()
        .take(usize::from(days))
        .map(|(date, entries)| {
            let high_c = entries
                .iter()
                .map(|(e, _)| e.main.temp_max.unwrap_or(e.main.temp))
                .fold(f64::MIN, f64::max);
            let low_c = entries
                .iter()
                .map(|(e, _)| e.main.temp_min.unwrap_or(e.main.temp))
                .fold(f64::MAX, f64::min);
            let pop = entries.iter().map(|(e, _)| e.pop).fold(0.0, f64::max);
            let precipitation_mm = entries.iter().map(|(e, _)| e.rain.amount() + e.snow.amount()).sum();
            let max_wind = entries.iter().map(|(e, _)| e.wind.speed).fold(0.0, f64::max);
            let humidity = entries.iter().map(|(e, _)| f64::from(e.main.humidity)).sum::<f64>()
                / entries.len() as f64;

            // Represent the day by the step closest to local noon.
            let (condition, description) = entries
                .iter()
                .min_by_key(|(_, t)| (i64::from(t.with_timezone(&offset).hour()) - 12).abs())
                .map(|(e, _)| first_condition(&e.weather))
                .unwrap_or_else(|| (WeatherCondition::Unknown, "Unknown".to_string()));

            let on_day = |t: Option<DateTime<Utc>>| t.filter(|t| local_date(*t) == date);

            DailyForecast {
                date,
                high_c,
                low_c,
                condition,
                description,
                precipitation_probability_pct: pct(pop * 100.0),
                precipitation_mm,
                max_wind_mps: Some(max_wind),
                humidity_pct: Some(pct(humidity)),
                uv_index: None,
                sunrise: on_day(sunrise),
                sunset: on_day(sunset),
            }
        })
        .collect();

    Forecast {
        provider: ID,
        place: Place {
            name: parsed.city.name,
            region: None,
            country: parsed.city.country,
            coordinates: Coordinates { lat: parsed.city.coord.lat, lon: parsed.city.coord.lon },
        },
        hourly,
        daily,
        fetched_at: Utc::now(),
    }
}

fn convert_air(parsed: OwAirResponse) -> Result<AirQuality> {
    let entry = parsed
        .list
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("OpenWeather air pollution response contained no data"))?;

    let c = entry.components;
    let (aqi, category) = aqi::resolve_aqi(
        c.pm2_5,
        c.pm10,
        aqi::category_from_openweather_index(entry.main.aqi),
    )
    .ok_or_else(|| anyhow!("OpenWeather air pollution response had no usable index"))?;

    Ok(AirQuality {
        provider: ID,
        measured_at: unix_to_utc(entry.dt).unwrap_or_else(Utc::now),
        aqi,
        category,
        pm2_5: c.pm2_5,
        pm10: c.pm10,
        o3: c.o3,
        no2: c.no2,
        so2: c.so2,
        co: c.co,
    })
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn current(&self, at: Coordinates) -> Result<CurrentConditions> {
        let (lat, lon) = (at.lat.to_string(), at.lon.to_string());
        let parsed: OwCurrentResponse = get_json(
            &self.http,
            ID,
            "current weather",
            &self.url("/data/2.5/weather"),
            &[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ],
        )
        .await?;

        Ok(convert_current(parsed))
    }

    async fn forecast(&self, at: Coordinates, days: u8) -> Result<Forecast> {
        let (lat, lon) = (at.lat.to_string(), at.lon.to_string());
        let cnt = days.saturating_mul(8).clamp(1, MAX_FORECAST_STEPS).to_string();
        let parsed: OwForecastResponse = get_json(
            &self.http,
            ID,
            "5-day forecast",
            &self.url("/data/2.5/forecast"),
            &[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
                ("cnt", cnt.as_str()),
            ],
        )
        .await?;

        if parsed.list.is_empty() {
            return Err(anyhow!("OpenWeather forecast response contained no data"));
        }

        Ok(convert_forecast(parsed, days))
    }

    async fn air_quality(&self, at: Coordinates) -> Result<AirQuality> {
        let (lat, lon) = (at.lat.to_string(), at.lon.to_string());
        let parsed: OwAirResponse = get_json(
            &self.http,
            ID,
            "air pollution",
            &self.url("/data/2.5/air_pollution"),
            &[("lat", lat.as_str()), ("lon", lon.as_str()), ("appid", self.api_key.as_str())],
        )
        .await?;

        convert_air(parsed)
    }

    // Alerts need the paid One Call API; the default "unsupported" applies.

    async fn search(&self, query: &str) -> Result<Vec<Place>> {
        let parsed: Vec<OwGeoEntry> = get_json(
            &self.http,
            ID,
            "geocoding",
            &self.url("/geo/1.0/direct"),
            &[("q", query), ("limit", "5"), ("appid", self.api_key.as_str())],
        )
        .await?;

        Ok(parsed
            .into_iter()
            .map(|g| Place {
                name: g.name,
                region: g.state,
                country: g.country,
                coordinates: Coordinates { lat: g.lat, lon: g.lon },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(dt: i64, temp: f64, pop: f64, id: u32) -> serde_json::Value {
        serde_json::json!({
            "dt": dt,
            "main": { "temp": temp, "feels_like": temp - 1.0, "temp_min": temp - 2.0,
                      "temp_max": temp + 2.0, "humidity": 60 },
            "weather": [{ "id": id, "description": "desc" }],
            "wind": { "speed": 3.0 },
            "pop": pop,
            "rain": { "3h": 1.5 }
        })
    }

    #[test]
    fn forecast_groups_steps_into_local_days() {
        // 2024-06-01T00:00Z .. in 3h steps, UTC city
        let start = 1_717_200_000;
        let list: Vec<_> = (0..12)
            .map(|i| entry(start + i * 3 * 3600, 20.0 + i as f64, 0.1 * (i % 5) as f64, 800))
            .collect();
        let json = serde_json::json!({
            "city": { "name": "Nowhere", "country": "XX", "coord": { "lat": 1.0, "lon": 2.0 },
                      "timezone": 0 },
            "list": list
        });
        let parsed: OwForecastResponse = serde_json::from_value(json).unwrap();
        let forecast = convert_forecast(parsed, 5);

        assert_eq!(forecast.hourly.len(), 12);
        assert_eq!(forecast.daily.len(), 2);

        let first = &forecast.daily[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(first.low_c, 18.0);
        assert_eq!(first.high_c, 29.0);
        assert_eq!(first.precipitation_probability_pct, 40);
        assert!((first.precipitation_mm - 12.0).abs() < 1e-9);
        assert_eq!(first.condition, WeatherCondition::Clear);
    }

    #[test]
    fn forecast_respects_day_limit() {
        let start = 1_717_200_000;
        let list: Vec<_> = (0..24).map(|i| entry(start + i * 3 * 3600, 10.0, 0.0, 500)).collect();
        let json = serde_json::json!({
            "city": { "name": "X", "coord": { "lat": 0.0, "lon": 0.0 } },
            "list": list
        });
        let parsed: OwForecastResponse = serde_json::from_value(json).unwrap();
        assert_eq!(convert_forecast(parsed, 1).daily.len(), 1);
    }

    #[test]
    fn air_quality_prefers_concentrations() {
        let json = serde_json::json!({
            "list": [{ "dt": 1_717_200_000, "main": { "aqi": 1 },
                       "components": { "pm2_5": 40.0, "pm10": 20.0, "o3": 30.0 } }]
        });
        let parsed: OwAirResponse = serde_json::from_value(json).unwrap();
        let air = convert_air(parsed).unwrap();
        assert!(air.aqi > 100);
        assert_eq!(air.category, aqi::AqiCategory::UnhealthyForSensitiveGroups);
    }
}
