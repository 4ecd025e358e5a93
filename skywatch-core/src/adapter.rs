//! Compatibility layer for callers of the older single-provider API.
//!
//! [`LegacyWeather`] keeps the flat shape those callers read, already in the
//! user's units. [`FallbackChain`] tries the active provider first, then the
//! configured fallback.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    WeatherError,
    model::{Coordinates, CurrentConditions, Forecast},
    provider::ProviderId,
    service::{DEFAULT_FORECAST_DAYS, FetchPolicy, Fetched, Origin, WeatherService},
    units::UnitSystem,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDay {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub description: String,
    pub icon: String,
    pub precipitation_chance: u8,
}

/// Temperatures in °C or °F and wind in km/h or mph, per `units`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyWeather {
    pub temperature: f64,
    pub feels_like: f64,
    pub humidity: u8,
    pub wind_speed: f64,
    pub description: String,
    pub icon: String,
    pub city: String,
    pub country: String,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub units: UnitSystem,
    pub provider: ProviderId,
    pub stale: bool,
    pub forecast: Vec<LegacyDay>,
}

impl LegacyWeather {
    pub fn from_unified(current: &CurrentConditions, forecast: &Forecast, units: UnitSystem) -> Self {
        let round = |v: f64| (v * 10.0).round() / 10.0;
        Self {
            temperature: round(units.temperature(current.temperature_c)),
            feels_like: round(units.temperature(current.feels_like_c)),
            humidity: current.humidity_pct,
            wind_speed: round(units.speed(current.wind_speed_mps)),
            description: current.description.clone(),
            icon: current.condition.icon_name().to_string(),
            city: current.place.name.clone(),
            country: current.place.country.clone().unwrap_or_default(),
            sunrise: current.sunrise,
            sunset: current.sunset,
            units,
            provider: current.provider,
            stale: false,
            forecast: forecast
                .daily
                .iter()
                .take(5)
                .map(|d| LegacyDay {
                    date: d.date,
                    high: round(units.temperature(d.high_c)),
                    low: round(units.temperature(d.low_c)),
                    description: d.description.clone(),
                    icon: d.condition.icon_name().to_string(),
                    precipitation_chance: d.precipitation_probability_pct,
                })
                .collect(),
        }
    }
}

pub struct FallbackChain {
    service: Arc<WeatherService>,
    fallback: Option<ProviderId>,
}

impl FallbackChain {
    pub fn new(service: Arc<WeatherService>, fallback: Option<ProviderId>) -> Self {
        Self { service, fallback }
    }

    /// Active provider, then the fallback, skipping providers without credentials.
    pub async fn order(&self) -> Vec<ProviderId> {
        let mut order = vec![self.service.active_provider().await];
        if let Some(fallback) = self.fallback {
            if !order.contains(&fallback) {
                order.push(fallback);
            }
        }
        order.retain(|id| self.service.registry().contains(*id));
        order
    }

    /// Current conditions plus forecast from the first provider that answers.
    ///
    /// Each provider is called at most once. Only when every call fails is
    /// stale cached data considered, read without touching the network.
    pub async fn fetch(&self, at: Coordinates) -> Result<Fetched<(CurrentConditions, Forecast)>> {
        let order = self.order().await;
        let mut failures = Vec::new();

        for &id in &order {
            match self.fetch_from(id, at, FetchPolicy::default().no_stale()).await {
                Ok(found) => {
                    if order.first() != Some(&id) {
                        tracing::warn!(provider = %id, "served by fallback provider");
                    }
                    return Ok(found);
                }
                Err(e) => {
                    tracing::debug!(provider = %id, error = %e, "provider failed in fallback chain");
                    failures.push((id, format!("{e:#}")));
                }
            }
        }

        for &id in &order {
            if let Ok(cached) = self.fetch_from(id, at, FetchPolicy::default().cache_only()).await {
                tracing::warn!(provider = %id, "every provider failed, serving cached data");
                return Ok(cached);
            }
        }

        Err(WeatherError::AllProvidersFailed(failures).into())
    }

    async fn fetch_from(
        &self,
        id: ProviderId,
        at: Coordinates,
        policy: FetchPolicy,
    ) -> Result<Fetched<(CurrentConditions, Forecast)>> {
        let (current, forecast) = tokio::try_join!(
            self.service.current_from(id, at, policy),
            self.service.forecast_from(id, at, DEFAULT_FORECAST_DAYS, policy),
        )?;
        Ok(Fetched {
            origin: current.origin.max(forecast.origin),
            as_of: current.as_of.min(forecast.as_of),
            value: (current.value, forecast.value),
        })
    }

    pub async fn legacy_weather(&self, at: Coordinates, units: UnitSystem) -> Result<LegacyWeather> {
        let fetched = self.fetch(at).await?;
        let (current, forecast) = &fetched.value;
        let mut legacy = LegacyWeather::from_unified(current, forecast, units);
        legacy.stale = fetched.origin == Origin::Stale;
        Ok(legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::fixtures,
        service::tests::{FakeProvider, service_with},
    };
    use std::sync::atomic::Ordering;

    fn here() -> Coordinates {
        fixtures::place().coordinates
    }

    #[test]
    fn legacy_shape_in_imperial() {
        let mut current = fixtures::current();
        current.temperature_c = 30.0;
        current.wind_speed_mps = 10.0;
        let legacy = LegacyWeather::from_unified(&current, &fixtures::forecast(), UnitSystem::Imperial);

        assert_eq!(legacy.temperature, 86.0);
        assert_eq!(legacy.wind_speed, 22.4);
        assert_eq!(legacy.city, "Lyon");
        assert_eq!(legacy.country, "FR");
        assert_eq!(legacy.forecast.len(), 5);
        assert_eq!(legacy.icon, current.condition.icon_name());

        let json = serde_json::to_value(&legacy).unwrap();
        assert!(json.get("feelsLike").is_some());
    }

    #[tokio::test]
    async fn falls_back_when_active_fails() {
        let active = FakeProvider::new(ProviderId::TomorrowIo);
        let fallback = FakeProvider::new(ProviderId::OpenWeather);
        active.fail(true);
        let service = Arc::new(service_with(&[active, fallback]));

        let chain = FallbackChain::new(service, Some(ProviderId::OpenWeather));
        let legacy = chain.legacy_weather(here(), UnitSystem::Metric).await.unwrap();
        assert_eq!(legacy.provider, ProviderId::OpenWeather);
        assert!(!legacy.stale);
    }

    #[tokio::test]
    async fn all_failures_are_listed() {
        let active = FakeProvider::new(ProviderId::TomorrowIo);
        let fallback = FakeProvider::new(ProviderId::OpenWeather);
        active.fail(true);
        fallback.fail(true);
        let service = Arc::new(service_with(&[active, fallback]));

        let chain = FallbackChain::new(service, Some(ProviderId::OpenWeather));
        let err = chain.fetch(here()).await.unwrap_err();
        match err.downcast_ref::<WeatherError>() {
            Some(WeatherError::AllProvidersFailed(failures)) => {
                let ids: Vec<_> = failures.iter().map(|(id, _)| *id).collect();
                assert_eq!(ids, vec![ProviderId::TomorrowIo, ProviderId::OpenWeather]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn total_outage_serves_stale_cache_calling_each_provider_once() {
        let active = FakeProvider::new(ProviderId::TomorrowIo);
        let fallback = FakeProvider::new(ProviderId::OpenWeather);
        active.fail(true);
        fallback.fail(true);
        let service = Arc::new(service_with(&[active.clone(), fallback.clone()]));

        let offline = service.offline_storage();
        let key = here().cache_key();
        let expired = chrono::Duration::minutes(-5);
        let current = CurrentConditions { provider: ProviderId::OpenWeather, ..fixtures::current() };
        offline
            .cache_weather_with_ttl(&format!("current:openweather:{key}"), &current, expired)
            .await
            .unwrap();
        offline
            .cache_weather_with_ttl(&format!("forecast5:openweather:{key}"), &fixtures::forecast(), expired)
            .await
            .unwrap();

        let chain = FallbackChain::new(service, Some(ProviderId::OpenWeather));
        let fetched = chain.fetch(here()).await.unwrap();

        assert!(fetched.is_stale());
        assert_eq!(fetched.value.0.provider, ProviderId::OpenWeather);
        assert_eq!(active.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_fallback_is_skipped() {
        let active = FakeProvider::new(ProviderId::WeatherApi);
        let service = Arc::new(service_with(&[active]));
        let chain = FallbackChain::new(service, Some(ProviderId::AccuWeather));
        assert_eq!(chain.order().await, vec![ProviderId::WeatherApi]);
    }
}
