use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    condition::WeatherCondition,
    model::{Coordinates, CurrentConditions, DailyForecast, Forecast, HourlyForecast, Place},
    provider::{ProviderId, get_json, http_client, pct},
};

use super::WeatherProvider;

const BASE_URL: &str = "https://api.tomorrow.io";
const ID: ProviderId = ProviderId::TomorrowIo;
const MAX_DAYS: usize = 5;

#[derive(Debug, Clone)]
pub struct TomorrowIoProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TomorrowIoProvider {
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
}

#[derive(Debug, Deserialize)]
struct TmLocation {
    lat: f64,
    lon: f64,
    #[serde(default)]
    name: Option<String>,
}

impl TmLocation {
    fn place(&self) -> Place {
        let coordinates = Coordinates { lat: self.lat, lon: self.lon };
        match &self.name {
            // Names look like "Chicago, Cook County, Illinois, United States".
            Some(name) => {
                let parts: Vec<&str> = name.split(", ").collect();
                Place {
                    name: parts.first().map(|s| s.to_string()).unwrap_or_default(),
                    region: (parts.len() > 2).then(|| parts[parts.len() - 2].to_string()),
                    country: (parts.len() > 1).then(|| parts[parts.len() - 1].to_string()),
                    coordinates,
                }
            }
            None => Place::from_coordinates(coordinates),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TmValues {
    temperature: f64,
    #[serde(default)]
    temperature_apparent: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    #[serde(default)]
    wind_speed: f64,
    #[serde(default)]
    wind_gust: Option<f64>,
    #[serde(default)]
    wind_direction: Option<f64>,
    #[serde(default)]
    pressure_surface_level: Option<f64>,
    #[serde(default)]
    visibility: Option<f64>,
    #[serde(default)]
    uv_index: Option<f64>,
    #[serde(default)]
    cloud_cover: Option<f64>,
    #[serde(default)]
    precipitation_probability: f64,
    #[serde(default)]
    rain_intensity: f64,
    #[serde(default)]
    snow_intensity: f64,
    #[serde(default)]
    rain_accumulation: Option<f64>,
    weather_code: u32,
}

#[derive(Debug, Deserialize)]
struct TmInterval<V> {
    time: DateTime<Utc>,
    values: V,
}

#[derive(Debug, Deserialize)]
struct TmRealtimeResponse {
    data: TmInterval<TmValues>,
    location: TmLocation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TmDailyValues {
    temperature_max: f64,
    temperature_min: f64,
    #[serde(default)]
    precipitation_probability_max: f64,
    #[serde(default)]
    rain_accumulation_sum: f64,
    #[serde(default)]
    snow_accumulation_sum: f64,
    #[serde(default)]
    wind_speed_max: Option<f64>,
    #[serde(default)]
    humidity_avg: Option<f64>,
    #[serde(default)]
    uv_index_max: Option<f64>,
    #[serde(default)]
    weather_code_max: u32,
    #[serde(default)]
    sunrise_time: Option<DateTime<Utc>>,
    #[serde(default)]
    sunset_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TmTimelines {
    #[serde(default)]
    hourly: Vec<TmInterval<TmValues>>,
    #[serde(default)]
    daily: Vec<TmInterval<TmDailyValues>>,
}

#[derive(Debug, Deserialize)]
struct TmForecastResponse {
    timelines: TmTimelines,
    location: TmLocation,
}

fn direction(deg: Option<f64>) -> Option<u16> {
    deg.map(|d| d.rem_euclid(360.0).round() as u16 % 360)
}

fn convert_current(parsed: TmRealtimeResponse) -> CurrentConditions {
    let v = parsed.data.values;
    let condition = WeatherCondition::from_tomorrow_code(v.weather_code);

    CurrentConditions {
        provider: ID,
        place: parsed.location.place(),
        observed_at: parsed.data.time,
        temperature_c: v.temperature,
        feels_like_c: v.temperature_apparent.unwrap_or(v.temperature),
        humidity_pct: v.humidity.map(pct).unwrap_or(0),
        pressure_hpa: v.pressure_surface_level,
        wind_speed_mps: v.wind_speed,
        wind_gust_mps: v.wind_gust,
        wind_direction_deg: direction(v.wind_direction),
        visibility_km: v.visibility,
        uv_index: v.uv_index,
        cloud_cover_pct: v.cloud_cover.map(pct),
        // Intensities are mm/hr; one hour of the current rate.
        precipitation_mm: v.rain_intensity + v.snow_intensity,
        condition,
        description: condition.description().to_string(),
        sunrise: None,
        sunset: None,
    }
}

fn convert_forecast(parsed: TmForecastResponse, days: u8) -> Forecast {
    let hourly = parsed
        .timelines
        .hourly
        .into_iter()
        .map(|h| {
            let v = h.values;
            let condition = WeatherCondition::from_tomorrow_code(v.weather_code);
            HourlyForecast {
                time: h.time,
                temperature_c: v.temperature,
                feels_like_c: v.temperature_apparent,
                condition,
                description: condition.description().to_string(),
                precipitation_probability_pct: pct(v.precipitation_probability),
                precipitation_mm: v.rain_accumulation.unwrap_or(v.rain_intensity),
                wind_speed_mps: v.wind_speed,
                wind_gust_mps: v.wind_gust,
                wind_direction_deg: direction(v.wind_direction),
                humidity_pct: v.humidity.map(pct),
                uv_index: v.uv_index,
            }
        })
        .collect();

    let daily = parsed
        .timelines
        .daily
        .into_iter()
        .take(usize::from(days).min(MAX_DAYS))
        .map(|d| {
            let v = d.values;
            let condition = WeatherCondition::from_tomorrow_code(v.weather_code_max);
            DailyForecast {
                date: d.time.date_naive(),
                high_c: v.temperature_max,
                low_c: v.temperature_min,
                condition,
                description: condition.description().to_string(),
                precipitation_probability_pct: pct(v.precipitation_probability_max),
                precipitation_mm: v.rain_accumulation_sum + v.snow_accumulation_sum,
                max_wind_mps: v.wind_speed_max,
                humidity_pct: v.humidity_avg.map(pct),
                uv_index: v.uv_index_max,
                sunrise: v.sunrise_time,
                sunset: v.sunset_time,
            }
        })
        .collect();

    Forecast {
        provider: ID,
        place: parsed.location.place(),
        hourly,
        daily,
        fetched_at: Utc::now(),
    }
}

#[async_trait]
impl WeatherProvider for TomorrowIoProvider {
    fn id(&self) -> ProviderId {
        ID
    }

    async fn current(&self, at: Coordinates) -> Result<CurrentConditions> {
        let location = at.query();
        let parsed: TmRealtimeResponse = get_json(
            &self.http,
            ID,
            "realtime",
            &self.url("/v4/weather/realtime"),
            &[
                ("location", location.as_str()),
                ("apikey", self.api_key.as_str()),
                ("units", "metric"),
            ],
        )
        .await?;

        Ok(convert_current(parsed))
    }

    async fn forecast(&self, at: Coordinates, days: u8) -> Result<Forecast> {
        let location = at.query();
        let parsed: TmForecastResponse = get_json(
            &self.http,
            ID,
            "forecast",
            &self.url("/v4/weather/forecast"),
            &[
                ("location", location.as_str()),
                ("apikey", self.api_key.as_str()),
                ("units", "metric"),
                ("timesteps", "1h,1d"),
            ],
        )
        .await?;

        Ok(convert_forecast(parsed, days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_name_is_split_into_parts() {
        let loc = TmLocation {
            lat: 41.88,
            lon: -87.62,
            name: Some("Chicago, Cook County, Illinois, United States".into()),
        };
        let place = loc.place();
        assert_eq!(place.name, "Chicago");
        assert_eq!(place.region.as_deref(), Some("Illinois"));
        assert_eq!(place.country.as_deref(), Some("United States"));

        let anon = TmLocation { lat: 1.5, lon: 2.5, name: None }.place();
        assert_eq!(anon.name, "1.5,2.5");
    }

    #[test]
    fn realtime_values_are_already_metric() {
        let parsed: TmRealtimeResponse = serde_json::from_value(serde_json::json!({
            "data": { "time": "2024-06-01T12:00:00Z", "values": {
                "temperature": 30.5, "temperatureApparent": 33.0, "humidity": 71.4,
                "windSpeed": 4.2, "windDirection": 359.7, "weatherCode": 1101,
                "precipitationProbability": 0, "rainIntensity": 0, "snowIntensity": 0
            }},
            "location": { "lat": 41.88, "lon": -87.62 }
        }))
        .unwrap();

        let c = convert_current(parsed);
        assert_eq!(c.humidity_pct, 71);
        assert_eq!(c.wind_direction_deg, Some(0));
        assert_eq!(c.condition, WeatherCondition::PartlyCloudy);
        assert_eq!(c.feels_like_c, 33.0);
    }
}
