//! Threshold rules over a [`WeatherReport`], merged with vendor alerts and
//! deduplicated against what was already sent.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::AlertsConfig,
    model::{CurrentConditions, HourlyForecast, Severity, WeatherReport},
    store::KeyValueStore,
    units::UnitSystem,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    FeelsLike,
    WindSpeed,
    WindGust,
    Humidity,
    PrecipitationProbability,
    PrecipitationAmount,
    UvIndex,
    Aqi,
    Visibility,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::FeelsLike => "feels-like temperature",
            Metric::WindSpeed => "wind speed",
            Metric::WindGust => "wind gusts",
            Metric::Humidity => "humidity",
            Metric::PrecipitationProbability => "chance of precipitation",
            Metric::PrecipitationAmount => "precipitation",
            Metric::UvIndex => "UV index",
            Metric::Aqi => "air quality index",
            Metric::Visibility => "visibility",
        }
    }

    /// Render a metric value (always stored in metric units) for display.
    pub fn format(&self, value: f64, units: UnitSystem) -> String {
        match self {
            Metric::Temperature | Metric::FeelsLike => units.format_temperature(value),
            Metric::WindSpeed | Metric::WindGust => units.format_speed(value),
            Metric::PrecipitationAmount => units.format_precipitation(value),
            Metric::Visibility => units.format_distance(value),
            Metric::Humidity | Metric::PrecipitationProbability => format!("{value:.0}%"),
            Metric::UvIndex | Metric::Aqi => format!("{value:.0}"),
        }
    }

    fn from_current(&self, current: &CurrentConditions, aqi: Option<u16>) -> Option<f64> {
        match self {
            Metric::Temperature => Some(current.temperature_c),
            Metric::FeelsLike => Some(current.feels_like_c),
            Metric::WindSpeed => Some(current.wind_speed_mps),
            Metric::WindGust => current.wind_gust_mps,
            Metric::Humidity => Some(f64::from(current.humidity_pct)),
            Metric::PrecipitationProbability => None,
            Metric::PrecipitationAmount => Some(current.precipitation_mm),
            Metric::UvIndex => current.uv_index,
            Metric::Aqi => aqi.map(f64::from),
            Metric::Visibility => current.visibility_km,
        }
    }

    fn from_hour(&self, hour: &HourlyForecast) -> Option<f64> {
        match self {
            Metric::Temperature => Some(hour.temperature_c),
            Metric::FeelsLike => hour.feels_like_c,
            Metric::WindSpeed => Some(hour.wind_speed_mps),
            Metric::WindGust => hour.wind_gust_mps,
            Metric::Humidity => hour.humidity_pct.map(f64::from),
            Metric::PrecipitationProbability => Some(f64::from(hour.precipitation_probability_pct)),
            Metric::PrecipitationAmount => Some(hour.precipitation_mm),
            Metric::UvIndex => hour.uv_index,
            Metric::Aqi | Metric::Visibility => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Gte => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Lte => value <= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }

    /// Of two triggering values, the one further past the threshold.
    fn worse(&self, a: f64, b: f64) -> f64 {
        match self {
            Comparison::Gt | Comparison::Gte => a.max(b),
            Comparison::Lt | Comparison::Lte => a.min(b),
        }
    }
}

/// What part of the report a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleScope {
    #[default]
    Current,
    /// The hourly forecast; `hours` defaults to `alerts.forecast_hours`.
    Forecast {
        #[serde(default)]
        hours: Option<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric: Metric,
    pub comparison: Comparison,
    /// In metric units: °C, m/s, mm, km, percent, index.
    pub threshold: f64,
    pub severity: Severity,
    /// Supports `{value}`, `{threshold}` and `{location}`.
    pub message: String,
    #[serde(default)]
    pub scope: RuleScope,
}

impl AlertRule {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: &str,
        name: &str,
        metric: Metric,
        comparison: Comparison,
        threshold: f64,
        severity: Severity,
        message: &str,
        scope: RuleScope,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            metric,
            comparison,
            threshold,
            severity,
            message: message.into(),
            scope,
        }
    }

    pub fn render(&self, value: f64, location: &str, units: UnitSystem) -> String {
        self.message
            .replace("{value}", &self.metric.format(value, units))
            .replace("{threshold}", &self.metric.format(self.threshold, units))
            .replace("{location}", location)
    }
}

pub fn default_rules() -> Vec<AlertRule> {
    use Comparison::*;
    use Metric::*;

    vec![
        AlertRule::new(
            "extreme-heat",
            "Extreme heat",
            Temperature,
            Gt,
            35.0,
            Severity::High,
            "Extreme heat in {location}: {value}. Limit outdoor work and keep animals shaded.",
            RuleScope::Current,
        ),
        AlertRule::new(
            "freeze",
            "Freezing temperatures",
            Temperature,
            Lt,
            0.0,
            Severity::Moderate,
            "Freezing in {location}: {value}. Protect pipes and sensitive plants.",
            RuleScope::Current,
        ),
        AlertRule::new(
            "high-wind",
            "High wind",
            WindSpeed,
            Gt,
            11.2,
            Severity::Moderate,
            "Strong wind in {location}: {value}. Secure loose equipment.",
            RuleScope::Current,
        ),
        AlertRule::new(
            "damaging-gusts",
            "Damaging gusts",
            WindGust,
            Gt,
            20.0,
            Severity::High,
            "Gusts up to {value} in {location}. Stay clear of trees and power lines.",
            RuleScope::Current,
        ),
        AlertRule::new(
            "heavy-rain",
            "Heavy rain likely",
            PrecipitationProbability,
            Gte,
            80.0,
            Severity::Moderate,
            "Rain is very likely in {location} ({value} chance). Postpone spraying and fieldwork.",
            RuleScope::Forecast { hours: None },
        ),
        AlertRule::new(
            "high-uv",
            "High UV",
            UvIndex,
            Gte,
            8.0,
            Severity::Moderate,
            "UV index {value} in {location}. Cover up and avoid midday sun.",
            RuleScope::Current,
        ),
        AlertRule::new(
            "unhealthy-air",
            "Unhealthy air",
            Aqi,
            Gt,
            150.0,
            Severity::High,
            "Air quality index {value} in {location}. Reduce prolonged outdoor exertion.",
            RuleScope::Current,
        ),
        AlertRule::new(
            "dense-fog",
            "Dense fog",
            Visibility,
            Lt,
            1.0,
            Severity::Moderate,
            "Visibility down to {value} in {location}. Drive carefully.",
            RuleScope::Current,
        ),
    ]
}

/// Built-in rules, overridden or extended by configured ones, minus disabled ids.
pub fn rules_from_config(config: &AlertsConfig) -> Vec<AlertRule> {
    let mut rules = default_rules();
    for custom in &config.rules {
        match rules.iter_mut().find(|r| r.id == custom.id) {
            Some(existing) => *existing = custom.clone(),
            None => rules.push(custom.clone()),
        }
    }
    rules.retain(|r| !config.disabled_rules.contains(&r.id));
    rules
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSource {
    Rule { rule_id: String },
    Vendor { provider: crate::provider::ProviderId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Identity used for deduplication.
    pub key: String,
    pub source: AlertSource,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub location: String,
    /// When the condition is expected; `None` means now.
    pub expected_at: Option<DateTime<Utc>>,
}

const LOG_KEY: &str = "alerts:sent";

/// When each alert key was last delivered.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<Mutex<()>>,
}

impl NotificationLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store, lock: Arc::new(Mutex::new(())) }
    }

    async fn read(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        match self.store.get(LOG_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to parse notification log"),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn write(&self, log: &BTreeMap<String, DateTime<Utc>>) -> Result<()> {
        let json = serde_json::to_string(log).context("Failed to serialize notification log")?;
        self.store.set(LOG_KEY, &json).await
    }

    pub async fn last_sent(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.get(key).copied())
    }

    pub async fn record_sent(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut log = self.read().await?;
        log.insert(key.to_string(), at);
        self.write(&log).await
    }

    /// Forget deliveries older than `max_age`. Returns how many were removed.
    pub async fn prune(&self, max_age: Duration, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut log = self.read().await?;
        let before = log.len();
        log.retain(|_, sent| now - *sent <= max_age);
        let removed = before - log.len();
        if removed > 0 {
            self.write(&log).await?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
pub struct AlertEngine {
    rules: Vec<AlertRule>,
    units: UnitSystem,
    forecast_hours: i64,
    dedupe_window: Duration,
    log: NotificationLog,
}

impl AlertEngine {
    pub fn new(config: &AlertsConfig, units: UnitSystem, log: NotificationLog) -> Self {
        Self {
            rules: rules_from_config(config),
            units,
            forecast_hours: config.forecast_hours,
            dedupe_window: Duration::try_minutes(config.dedupe_window_minutes).unwrap_or(Duration::MAX),
            log,
        }
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    pub fn log(&self) -> &NotificationLog {
        &self.log
    }

    pub fn dedupe_window(&self) -> Duration {
        self.dedupe_window
    }

    /// Every alert the report triggers, most severe first, without deduplication.
    pub fn triggered(&self, report: &WeatherReport, now: DateTime<Utc>) -> Vec<Alert> {
        let place = &report.current.place;
        let location = place.display_name();
        let location_key = place.coordinates.cache_key();
        let aqi = report.air_quality.as_ref().map(|a| a.aqi);

        let mut alerts: Vec<Alert> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let (value, expected_at) = match rule.scope {
                    RuleScope::Current => {
                        let v = rule.metric.from_current(&report.current, aqi)?;
                        rule.comparison.holds(v, rule.threshold).then_some((v, None))?
                    }
                    RuleScope::Forecast { hours } => {
                        let hours = hours.unwrap_or(self.forecast_hours);
                        self.forecast_trigger(rule, report.forecast.hours_ahead(now, hours))?
                    }
                };
                Some(Alert {
                    key: format!("{}@{}", rule.id, location_key),
                    source: AlertSource::Rule { rule_id: rule.id.clone() },
                    title: rule.name.clone(),
                    message: rule.render(value, &location, self.units),
                    severity: rule.severity,
                    location: location.clone(),
                    expected_at,
                })
            })
            .collect();

        alerts.extend(report.alerts.iter().filter(|v| v.is_active(now)).map(|v| Alert {
            key: format!("vendor:{}:{}", v.provider, v.id),
            source: AlertSource::Vendor { provider: v.provider },
            title: v.title.clone(),
            message: v.description.clone(),
            severity: v.severity,
            location: location.clone(),
            expected_at: v.starts.filter(|s| *s > now),
        }));

        alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.title.cmp(&b.title)));
        alerts
    }

    /// Worst triggering value in the window and the first hour it triggers.
    fn forecast_trigger<'a>(
        &self,
        rule: &AlertRule,
        hours: impl Iterator<Item = &'a HourlyForecast>,
    ) -> Option<(f64, Option<DateTime<Utc>>)> {
        hours
            .filter_map(|h| rule.metric.from_hour(h).map(|v| (v, h.time)))
            .filter(|(v, _)| rule.comparison.holds(*v, rule.threshold))
            .fold(None, |acc, (v, at)| match acc {
                None => Some((v, Some(at))),
                Some((worst, first)) => Some((rule.comparison.worse(worst, v), first)),
            })
    }

    /// Triggered alerts not already delivered within the dedupe window.
    pub async fn evaluate(&self, report: &WeatherReport, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut fresh = Vec::new();
        for alert in self.triggered(report, now) {
            match self.log.last_sent(&alert.key).await? {
                Some(sent) if now - sent < self.dedupe_window => {
                    tracing::debug!(key = %alert.key, %sent, "suppressing duplicate alert");
                }
                _ => fresh.push(alert),
            }
        }
        Ok(fresh)
    }

    pub async fn record_sent(&self, alerts: &[Alert], now: DateTime<Utc>) -> Result<()> {
        for alert in alerts {
            self.log.record_sent(&alert.key, now).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Delivers alerts as log events.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            Severity::High | Severity::Extreme => {
                tracing::warn!(severity = %alert.severity, title = %alert.title, "{}", alert.message)
            }
            Severity::Low | Severity::Moderate => {
                tracing::info!(severity = %alert.severity, title = %alert.title, "{}", alert.message)
            }
        }
        Ok(())
    }
}

pub struct AlertService {
    engine: AlertEngine,
    notifier: Arc<dyn Notifier>,
    enabled: bool,
}

impl AlertService {
    pub fn new(engine: AlertEngine, notifier: Arc<dyn Notifier>) -> Self {
        Self { engine, notifier, enabled: true }
    }

    pub fn from_config(
        config: &AlertsConfig,
        units: UnitSystem,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let engine = AlertEngine::new(config, units, NotificationLog::new(store));
        Self { engine, notifier, enabled: config.enabled }
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Evaluate, deliver and record. Returns the alerts that were delivered.
    pub async fn check(&self, report: &WeatherReport, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let mut delivered = Vec::new();
        for alert in self.engine.evaluate(report, now).await? {
            match self.notifier.notify(&alert).await {
                Ok(()) => delivered.push(alert),
                Err(e) => tracing::warn!(key = %alert.key, error = %e, "failed to deliver alert"),
            }
        }

        self.engine.record_sent(&delivered, now).await?;
        self.engine.log.prune(self.engine.dedupe_window, now).await?;
        Ok(delivered)
    }
}
