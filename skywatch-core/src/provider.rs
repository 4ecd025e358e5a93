use crate::{
    Config, WeatherError,
    model::{AirQuality, Coordinates, CurrentConditions, Forecast, Place, VendorAlert},
    provider::{
        accuweather::AccuWeatherProvider, openweather::OpenWeatherProvider,
        tomorrow::TomorrowIoProvider, weatherapi::WeatherApiProvider,
    },
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections::HashMap, convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};

pub mod accuweather;
pub mod openweather;
pub mod tomorrow;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
    AccuWeather,
    TomorrowIo,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
            ProviderId::AccuWeather => "accuweather",
            ProviderId::TomorrowIo => "tomorrowio",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenWeather,
            ProviderId::WeatherApi,
            ProviderId::AccuWeather,
            ProviderId::TomorrowIo,
        ]
    }

    /// Name used in environment variables, e.g. `SKYWATCH_OPENWEATHER_API_KEY`.
    pub fn env_var(&self) -> String {
        format!("SKYWATCH_{}_API_KEY", self.as_str().to_uppercase())
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" | "openweathermap" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            "accuweather" => Ok(ProviderId::AccuWeather),
            "tomorrowio" | "tomorrow" => Ok(ProviderId::TomorrowIo),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi, accuweather, tomorrowio."
            )),
        }
    }
}

/// A third-party weather vendor, converted to the unified shape.
///
/// Vendors that do not offer a feature return [`WeatherError::Unsupported`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> ProviderId;

    async fn current(&self, at: Coordinates) -> Result<CurrentConditions>;

    async fn forecast(&self, at: Coordinates, days: u8) -> Result<Forecast>;

    async fn air_quality(&self, _at: Coordinates) -> Result<AirQuality> {
        Err(WeatherError::Unsupported { provider: self.id(), feature: "air quality" }.into())
    }

    async fn alerts(&self, _at: Coordinates) -> Result<Vec<VendorAlert>> {
        Err(WeatherError::Unsupported { provider: self.id(), feature: "alerts" }.into())
    }

    async fn search(&self, _query: &str) -> Result<Vec<Place>> {
        Err(WeatherError::Unsupported { provider: self.id(), feature: "location search" }.into())
    }
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(id: ProviderId, config: &Config) -> Result<Arc<dyn WeatherProvider>> {
    let api_key = config
        .provider_api_key(id)
        .ok_or(WeatherError::MissingApiKey(id))?;

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenWeather => Arc::new(OpenWeatherProvider::new(api_key)),
        ProviderId::WeatherApi => Arc::new(WeatherApiProvider::new(api_key)),
        ProviderId::AccuWeather => Arc::new(AccuWeatherProvider::new(api_key)),
        ProviderId::TomorrowIo => Arc::new(TomorrowIoProvider::new(api_key)),
    };

    Ok(provider)
}

/// Every provider that has credentials, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn WeatherProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::default();
        for id in ProviderId::all() {
            if let Ok(provider) = provider_from_config(*id, config) {
                registry.insert(provider);
            }
        }
        registry
    }

    pub fn insert(&mut self, provider: Arc<dyn WeatherProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn WeatherProvider>> {
        self.providers.get(&id).cloned()
    }

    pub fn contains(&self, id: ProviderId) -> bool {
        self.providers.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.providers.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

const USER_AGENT: &str = concat!("skywatch/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 10;

pub(crate) fn http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// GET `url`, check the status and parse the body as `T`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &Client,
    provider: ProviderId,
    endpoint: &'static str,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T> {
    tracing::debug!(%provider, endpoint, "sending request");

    let res = http
        .get(url)
        .query(query)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {provider} ({endpoint})"))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .with_context(|| format!("Failed to read {provider} {endpoint} response body"))?;

    if !status.is_success() {
        return Err(WeatherError::Status {
            provider,
            endpoint,
            status: status.as_u16(),
            body: truncate_body(&body),
        }
        .into());
    }

    serde_json::from_str(&body).with_context(|| format!("Failed to parse {provider} {endpoint} JSON"))
}

pub(crate) fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Clamp a vendor percentage (sometimes fractional, sometimes > 100) into `u8`.
pub(crate) fn pct(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}
