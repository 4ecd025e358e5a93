use anyhow::{Context, Result, anyhow};
use chrono::TimeDelta;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    WeatherError,
    alerts::{AlertRule, RuleScope},
    provider::ProviderId,
    units::UnitSystem,
};

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a cached payload counts as fresh.
    pub ttl_minutes: i64,
    /// How long past expiry a payload may still be served while offline.
    pub stale_grace_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_minutes: 30, stale_grace_hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    /// An identical alert is not re-sent within this window.
    pub dedupe_window_minutes: i64,
    /// How far into the hourly forecast forecast-scoped rules look.
    pub forecast_hours: i64,
    /// Ids of built-in rules to switch off.
    pub disabled_rules: Vec<String>,
    /// Extra rules; a rule with a built-in id replaces the built-in.
    pub rules: Vec<AlertRule>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedupe_window_minutes: 360,
            forecast_hours: 24,
            disabled_rules: Vec::new(),
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Where queued offline actions are posted. Without one, actions stay local.
    pub endpoint: Option<String>,
    /// URL fetched to decide whether the network is reachable.
    pub probe_url: String,
    pub poll_interval_secs: u64,
    /// Queued actions are dropped after this many failed replays.
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            probe_url: "https://clients3.google.com/generate_204".to_string(),
            poll_interval_secs: 30,
            max_attempts: 5,
        }
    }
}

const MAX_TTL_MINUTES: i64 = 7 * 24 * 60;
const MAX_STALE_GRACE_HOURS: i64 = 30 * 24;
const MAX_DEDUPE_WINDOW_MINUTES: i64 = 30 * 24 * 60;
const MAX_FORECAST_HOURS: i64 = 16 * 24;

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Active provider id, e.g. "openweather" or "weatherapi".
    pub default_provider: Option<String>,

    /// Provider the compat adapter falls back to. Defaults to openweather.
    #[serde(default)]
    pub fallback_provider: Option<String>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub units: UnitSystem,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    /// Overrides the platform data directory for cache and queue files.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Problems found by [`Config::validate`].
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Config {
    /// Return the default provider as a strongly-typed ProviderId.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        let s = self.default_provider.as_ref().ok_or_else(|| {
            anyhow::anyhow!(
                "No default provider configured.\n\
                 Hint: run `skywatch configure <provider>` (e.g. `skywatch configure openweather`) first."
            )
        })?;

        ProviderId::try_from(s.as_str())
    }

    pub fn fallback_provider_id(&self) -> Result<ProviderId> {
        match &self.fallback_provider {
            Some(s) => ProviderId::try_from(s.as_str()),
            None => Ok(ProviderId::OpenWeather),
        }
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return empty.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "skywatch", "skywatch")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Directory for cached payloads, the offline queue and the alert log.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::project_dirs()?.data_dir().to_path_buf()),
        }
    }

    /// Convenience helper: set/replace a provider API key and optionally set default provider.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers.insert(provider_id.as_str().to_string(), ProviderConfig { api_key });

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present. The environment variable wins over the file.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<String> {
        std::env::var(provider_id.env_var())
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.provider_config(provider_id).map(|cfg| cfg.api_key.clone()))
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }

    pub fn cache_ttl(&self) -> Result<TimeDelta> {
        Ok(TimeDelta::try_minutes(self.cache.ttl_minutes).ok_or(WeatherError::OutOfRange("cache.ttl_minutes"))?)
    }

    pub fn stale_grace(&self) -> Result<TimeDelta> {
        Ok(TimeDelta::try_hours(self.cache.stale_grace_hours)
            .ok_or(WeatherError::OutOfRange("cache.stale_grace_hours"))?)
    }

    pub fn validate(&self) -> Validation {
        let mut v = Validation::default();

        for name in self.providers.keys() {
            if ProviderId::try_from(name.as_str()).is_err() {
                v.errors.push(format!("providers.{name}: unknown provider"));
            }
        }

        match self.default_provider_id() {
            Ok(id) if !self.is_provider_configured(id) => v
                .warnings
                .push(format!("default_provider: '{id}' has no API key")),
            Err(_) if self.default_provider.is_some() => {
                v.errors.push("default_provider: unknown provider".to_string())
            }
            _ => {}
        }

        if self.fallback_provider_id().is_err() {
            v.errors.push("fallback_provider: unknown provider".to_string());
        }

        if !(1..=MAX_TTL_MINUTES).contains(&self.cache.ttl_minutes) {
            v.errors.push(format!("cache.ttl_minutes: must be between 1 and {MAX_TTL_MINUTES}"));
        }
        if !(0..=MAX_STALE_GRACE_HOURS).contains(&self.cache.stale_grace_hours) {
            v.errors.push(format!("cache.stale_grace_hours: must be between 0 and {MAX_STALE_GRACE_HOURS}"));
        }
        if !(0..=MAX_DEDUPE_WINDOW_MINUTES).contains(&self.alerts.dedupe_window_minutes) {
            v.errors.push(format!(
                "alerts.dedupe_window_minutes: must be between 0 and {MAX_DEDUPE_WINDOW_MINUTES}"
            ));
        }
        if !(1..=MAX_FORECAST_HOURS).contains(&self.alerts.forecast_hours) {
            v.errors.push(format!("alerts.forecast_hours: must be between 1 and {MAX_FORECAST_HOURS}"));
        }
        if self.sync.max_attempts == 0 {
            v.errors.push("sync.max_attempts: must be at least 1".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for rule in &self.alerts.rules {
            if !seen.insert(rule.id.as_str()) {
                v.errors.push(format!("alerts.rules: duplicate rule id '{}'", rule.id));
            }
            if let RuleScope::Forecast { hours: Some(hours) } = rule.scope {
                if !(1..=MAX_FORECAST_HOURS).contains(&hours) {
                    v.errors.push(format!(
                        "alerts.rules.{}: forecast hours must be between 1 and {MAX_FORECAST_HOURS}",
                        rule.id
                    ));
                }
            }
        }

        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn default_provider_id_errors_when_not_set() {
        let cfg = Config::default();
        let err = cfg.default_provider_id().unwrap_err();

        assert!(err.to_string().contains("No default provider configured"));
    }

    #[test]
    fn set_api_key_and_default_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenWeather);

        let key = cfg.provider_api_key(ProviderId::OpenWeather);
        assert_eq!(key.as_deref(), Some("OPEN_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
    }

    #[test]
    fn upsert_does_not_override_existing_default() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");

        assert_eq!(default, ProviderId::OpenWeather);
        assert!(cfg.is_provider_configured(ProviderId::OpenWeather));
        assert!(cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn set_default_provider_overrides_default() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::OpenWeather, "OPEN_KEY".into());
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        cfg.set_default_provider(ProviderId::WeatherApi);

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::WeatherApi);
    }

    #[test]
    fn fallback_defaults_to_openweather() {
        let mut cfg = Config::default();
        assert_eq!(cfg.fallback_provider_id().unwrap(), ProviderId::OpenWeather);

        cfg.fallback_provider = Some("weatherapi".into());
        assert_eq!(cfg.fallback_provider_id().unwrap(), ProviderId::WeatherApi);
    }

    #[test]
    fn save_and_load_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::AccuWeather, "AW".into());
        cfg.units = UnitSystem::Imperial;
        cfg.cache.ttl_minutes = 10;
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_provider_id().unwrap(), ProviderId::AccuWeather);
        assert_eq!(loaded.units, UnitSystem::Imperial);
        assert_eq!(loaded.cache.ttl_minutes, 10);
        assert_eq!(loaded.cache.stale_grace_hours, 24);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(cfg.default_provider.is_none());
        assert_eq!(cfg.cache_ttl().unwrap(), TimeDelta::minutes(30));
    }

    #[test]
    fn partial_toml_fills_section_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            default_provider = "tomorrowio"
            units = "imperial"

            [alerts]
            dedupe_window_minutes = 60

            [[alerts.rules]]
            id = "hot-greenhouse"
            name = "Greenhouse heat"
            metric = "temperature"
            comparison = "gt"
            threshold = 30.0
            severity = "moderate"
            message = "Vent the greenhouse: {value} at {location}"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.default_provider_id().unwrap(), ProviderId::TomorrowIo);
        assert!(cfg.alerts.enabled);
        assert_eq!(cfg.alerts.forecast_hours, 24);
        assert_eq!(cfg.alerts.dedupe_window_minutes, 60);
        assert_eq!(cfg.alerts.rules.len(), 1);
        assert_eq!(cfg.sync.max_attempts, 5);
    }

    #[test]
    fn validate_reports_errors_and_warnings() {
        let mut cfg = Config::default();
        cfg.default_provider = Some("tomorrowio".into());
        cfg.providers.insert("darksky".into(), ProviderConfig { api_key: "x".into() });
        cfg.cache.ttl_minutes = 0;

        let v = cfg.validate();
        assert!(!v.is_valid());
        assert!(v.errors.iter().any(|e| e.contains("darksky")));
        assert!(v.errors.iter().any(|e| e.contains("ttl_minutes")));
        assert!(v.warnings.iter().any(|w| w.contains("tomorrowio")));
    }

    #[test]
    fn validate_rejects_durations_past_upper_bounds() {
        let mut cfg = Config::default();
        cfg.cache.ttl_minutes = 1_000_000_000_000;
        cfg.cache.stale_grace_hours = i64::MAX;
        cfg.alerts.dedupe_window_minutes = i64::MAX;
        cfg.alerts.forecast_hours = 1_000_000;

        let v = cfg.validate();
        assert!(!v.is_valid());
        for field in ["ttl_minutes", "stale_grace_hours", "dedupe_window_minutes", "forecast_hours"] {
            assert!(v.errors.iter().any(|e| e.contains(field)), "no error for {field}");
        }

        let err = cfg.cache_ttl().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WeatherError>(),
            Some(WeatherError::OutOfRange("cache.ttl_minutes"))
        ));
        assert!(cfg.stale_grace().is_err());
    }

    #[test]
    fn validate_checks_forecast_hours_of_custom_rules() {
        let cfg: Config = toml::from_str(
            r#"
            [[alerts.rules]]
            id = "rain-next-month"
            name = "Rain"
            metric = "precipitation_probability"
            comparison = "gte"
            threshold = 50.0
            severity = "low"
            message = "Rain"
            scope = { kind = "forecast", hours = 100000 }
            "#,
        )
        .unwrap();

        let v = cfg.validate();
        assert!(v.errors.iter().any(|e| e.contains("rain-next-month")));
    }
}
