//! The unified weather service.
//!
//! Reads go cache first. On a miss the active provider is called and the
//! result cached. When the call fails, or the device is offline, an expired
//! entry still inside the grace period is served and flagged as stale.

use std::{future::Future, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{RwLock, watch};

use crate::{
    Config, WeatherError,
    model::{AirQuality, Coordinates, CurrentConditions, Forecast, Place, VendorAlert, WeatherReport},
    offline::OfflineStorage,
    provider::{ProviderId, ProviderRegistry, WeatherProvider},
    sync::NetworkState,
};

pub const DEFAULT_FORECAST_DAYS: u8 = 5;

/// Where a value came from, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Network,
    Cache,
    Stale,
}

#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub origin: Origin,
    /// When the value was obtained from the provider.
    pub as_of: DateTime<Utc>,
}

impl<T> Fetched<T> {
    pub fn is_stale(&self) -> bool {
        self.origin == Origin::Stale
    }
}

/// How a single read treats the cache.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Skip fresh cache entries and go to the network.
    pub refresh: bool,
    /// Serve expired entries when the network cannot be used.
    pub allow_stale: bool,
    /// Call the provider on a cache miss.
    pub use_network: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self { refresh: false, allow_stale: true, use_network: true }
    }
}

impl FetchPolicy {
    pub fn refresh(mut self) -> Self {
        self.refresh = true;
        self
    }

    pub fn no_stale(mut self) -> Self {
        self.allow_stale = false;
        self
    }

    /// Answer from fresh or stale cache entries only.
    pub fn cache_only(mut self) -> Self {
        self.use_network = false;
        self.allow_stale = true;
        self
    }
}

pub struct WeatherService {
    registry: ProviderRegistry,
    active: RwLock<ProviderId>,
    offline: OfflineStorage,
    network: Option<watch::Receiver<NetworkState>>,
}

impl WeatherService {
    pub fn new(registry: ProviderRegistry, active: ProviderId, offline: OfflineStorage) -> Result<Self> {
        if !registry.contains(active) {
            return Err(WeatherError::MissingApiKey(active).into());
        }
        Ok(Self { registry, active: RwLock::new(active), offline, network: None })
    }

    pub fn from_config(config: &Config, offline: OfflineStorage) -> Result<Self> {
        Self::new(ProviderRegistry::from_config(config), config.default_provider_id()?, offline)
    }

    /// Consult `network` before each network call.
    pub fn with_network(mut self, network: watch::Receiver<NetworkState>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn offline_storage(&self) -> &OfflineStorage {
        &self.offline
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn is_offline(&self) -> bool {
        self.network.as_ref().is_some_and(|rx| !rx.borrow().is_online())
    }

    pub async fn active_provider(&self) -> ProviderId {
        *self.active.read().await
    }

    /// Switch the active provider. Providers without credentials are rejected.
    pub async fn set_active_provider(&self, id: ProviderId) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(WeatherError::MissingApiKey(id).into());
        }
        let mut active = self.active.write().await;
        if *active != id {
            tracing::info!(from = %*active, to = %id, "switching weather provider");
            *active = id;
        }
        Ok(())
    }

    fn provider(&self, id: ProviderId) -> Result<Arc<dyn WeatherProvider>> {
        Ok(self.registry.get(id).ok_or(WeatherError::MissingApiKey(id))?)
    }

    async fn fetch<T, F, Fut>(
        &self,
        id: ProviderId,
        kind: &str,
        at: Coordinates,
        policy: FetchPolicy,
        call: F,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(Arc<dyn WeatherProvider>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let provider = self.provider(id)?;
        let key = format!("{kind}:{id}:{}", at.cache_key());

        if !policy.refresh {
            if let Some(hit) = self.offline.get_cached_weather::<T>(&key).await? {
                tracing::debug!(%key, "cache hit");
                return Ok(Fetched { value: hit.value, origin: Origin::Cache, as_of: hit.stored_at });
            }
        }

        if !policy.use_network || self.is_offline() {
            tracing::debug!(%key, "not calling provider");
            return match self.stale(&key, policy).await? {
                Some(stale) => Ok(stale),
                None => Err(WeatherError::OfflineCacheMiss(key).into()),
            };
        }

        match call(provider).await {
            Ok(value) => {
                let now = Utc::now();
                if let Err(e) = self.offline.cache_weather(&key, &value).await {
                    tracing::warn!(%key, error = %e, "failed to cache response");
                }
                if let Err(e) = self.offline.set_last_sync(now).await {
                    tracing::warn!(error = %e, "failed to record last sync time");
                }
                Ok(Fetched { value, origin: Origin::Network, as_of: now })
            }
            Err(e) => {
                if e.downcast_ref::<WeatherError>().is_some_and(WeatherError::is_unsupported) {
                    return Err(e);
                }
                match self.stale(&key, policy).await? {
                    Some(stale) => {
                        tracing::warn!(%key, error = %e, "provider failed, serving cached data");
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn stale<T: DeserializeOwned>(&self, key: &str, policy: FetchPolicy) -> Result<Option<Fetched<T>>> {
        if !policy.allow_stale {
            return Ok(None);
        }
        Ok(self.offline.get_stale_weather::<T>(key).await?.map(|c| Fetched {
            value: c.value,
            origin: if c.stale { Origin::Stale } else { Origin::Cache },
            as_of: c.stored_at,
        }))
    }

    pub async fn current_from(
        &self,
        id: ProviderId,
        at: Coordinates,
        policy: FetchPolicy,
    ) -> Result<Fetched<CurrentConditions>> {
        self.fetch(id, "current", at, policy, |p| async move { p.current(at).await }).await
    }

    pub async fn forecast_from(
        &self,
        id: ProviderId,
        at: Coordinates,
        days: u8,
        policy: FetchPolicy,
    ) -> Result<Fetched<Forecast>> {
        let kind = format!("forecast{days}");
        self.fetch(id, &kind, at, policy, |p| async move { p.forecast(at, days).await }).await
    }

    pub async fn air_quality_from(
        &self,
        id: ProviderId,
        at: Coordinates,
        policy: FetchPolicy,
    ) -> Result<Fetched<AirQuality>> {
        self.fetch(id, "air", at, policy, |p| async move { p.air_quality(at).await }).await
    }

    pub async fn alerts_from(
        &self,
        id: ProviderId,
        at: Coordinates,
        policy: FetchPolicy,
    ) -> Result<Fetched<Vec<VendorAlert>>> {
        self.fetch(id, "alerts", at, policy, |p| async move { p.alerts(at).await }).await
    }

    pub async fn current(&self, at: Coordinates) -> Result<Fetched<CurrentConditions>> {
        self.current_from(self.active_provider().await, at, FetchPolicy::default()).await
    }

    pub async fn forecast(&self, at: Coordinates, days: u8) -> Result<Fetched<Forecast>> {
        self.forecast_from(self.active_provider().await, at, days, FetchPolicy::default()).await
    }

    pub async fn air_quality(&self, at: Coordinates) -> Result<Fetched<AirQuality>> {
        self.air_quality_from(self.active_provider().await, at, FetchPolicy::default()).await
    }

    pub async fn alerts(&self, at: Coordinates) -> Result<Fetched<Vec<VendorAlert>>> {
        self.alerts_from(self.active_provider().await, at, FetchPolicy::default()).await
    }

    pub async fn report(&self, at: Coordinates) -> Result<Fetched<WeatherReport>> {
        self.report_from(self.active_provider().await, at, FetchPolicy::default()).await
    }

    /// Like [`Self::report`] but ignores fresh cache entries.
    pub async fn refresh(&self, at: Coordinates) -> Result<Fetched<WeatherReport>> {
        self.report_from(self.active_provider().await, at, FetchPolicy::default().refresh()).await
    }

    /// Current conditions, forecast, air quality and vendor alerts in parallel.
    /// Air quality and alert failures leave those parts empty.
    pub async fn report_from(
        &self,
        id: ProviderId,
        at: Coordinates,
        policy: FetchPolicy,
    ) -> Result<Fetched<WeatherReport>> {
        let (current, forecast, air, alerts) = tokio::join!(
            self.current_from(id, at, policy),
            self.forecast_from(id, at, DEFAULT_FORECAST_DAYS, policy),
            self.air_quality_from(id, at, policy),
            self.alerts_from(id, at, policy),
        );
        let current = current?;
        let forecast = forecast?;

        let air_quality = optional_part("air quality", air).map(|f| f.value);
        let alerts = optional_part("alerts", alerts).map(|f| f.value).unwrap_or_default();

        let origin = current.origin.max(forecast.origin);
        let as_of = current.as_of.min(forecast.as_of);
        Ok(Fetched {
            value: WeatherReport { current: current.value, forecast: forecast.value, air_quality, alerts },
            origin,
            as_of,
        })
    }

    /// Place search through the active provider; never cached.
    pub async fn search(&self, query: &str) -> Result<Vec<Place>> {
        if self.is_offline() {
            return Err(WeatherError::OfflineCacheMiss(format!("search:{query}")).into());
        }
        let provider = self.provider(self.active_provider().await)?;
        provider.search(query).await
    }
}

fn optional_part<T>(what: &str, result: Result<Fetched<T>>) -> Option<Fetched<T>> {
    match result {
        Ok(v) => Some(v),
        Err(e) if e.downcast_ref::<WeatherError>().is_some_and(WeatherError::is_unsupported) => {
            tracing::debug!("{e}");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "{what} unavailable");
            None
        }
    }
}
