use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, PasswordDisplayMode};
use skywatch_core::{
    Config, Coordinates, Place, ProviderId, WeatherError, WeatherService,
    adapter::FallbackChain,
    advisory,
    alerts::{Alert, AlertEngine, AlertService, NotificationLog, Notifier},
    locations::SavedLocations,
    offline::{OfflineAction, OfflineStorage},
    provider::ProviderRegistry,
    store::FileStore,
    sync::{ConnectivityProbe, Connectivity, HttpSyncClient, NetworkMonitor, NetworkState, SyncCoordinator},
};
use tokio::sync::watch;

use crate::output;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "skywatch", version, about = "Weather, alerts and farm advice from several providers")]
pub struct Cli {
    /// Use this provider instead of the configured default.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Never touch the network; answer from cached data only.
    #[arg(long, global = true)]
    pub offline: bool,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// Show providers, or switch the default one.
    Provider {
        id: Option<String>,
    },

    /// Current conditions. PLACE is "lat,lon" or a name.
    Now { place: String },

    /// Daily forecast.
    Forecast {
        place: String,

        #[arg(long, default_value_t = 5)]
        days: u8,
    },

    /// Air quality.
    Air { place: String },

    /// Rule-based and vendor alerts active right now.
    Alerts { place: String },

    /// Weather-based farm advice.
    Advice { place: String },

    /// Current weather and forecast as legacy JSON, falling back to
    /// another provider when the active one fails.
    Legacy { place: String },

    /// Find places by name.
    Search { query: String },

    /// Saved cities.
    Cities {
        #[command(subcommand)]
        action: CitiesCommand,
    },

    /// Inspect or clear the offline cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },

    /// Replay queued changes and prune the cache.
    Sync,

    /// Watch a place and print new alerts until interrupted.
    Monitor {
        place: String,

        /// Seconds between weather checks.
        #[arg(long, default_value_t = 900)]
        interval: u64,
    },
}

#[derive(Debug, Subcommand)]
pub enum CitiesCommand {
    List,
    Add { place: String },
    /// Remove by name or "lat,lon".
    Remove { place: String },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    Stats,
    Clear,
    /// Delete entries too old to be served even offline.
    Prune,
}

/// State shared by every command, built once from the config file.
struct App {
    config: Config,
    offline: OfflineStorage,
    network: Arc<NetworkMonitor>,
    forced_offline: bool,
}

impl App {
    fn load(forced_offline: bool) -> Result<Self> {
        let config = Config::load()?;
        let validation = config.validate();
        for warning in &validation.warnings {
            tracing::warn!("config: {warning}");
        }
        if !validation.is_valid() {
            bail!(
                "Invalid configuration in {}:\n  {}",
                Config::config_file_path()?.display(),
                validation.errors.join("\n  ")
            );
        }

        let store = FileStore::new(config.data_dir()?);
        let offline = OfflineStorage::new(Arc::new(store))
            .with_ttl(config.cache_ttl()?)
            .with_stale_grace(config.stale_grace()?);
        let initial = if forced_offline { NetworkState::Offline } else { NetworkState::Online };

        Ok(Self {
            config,
            offline,
            network: Arc::new(NetworkMonitor::new(initial)),
            forced_offline,
        })
    }

    fn service(&self, provider: Option<&str>) -> Result<WeatherService> {
        let active = match provider {
            Some(name) => ProviderId::try_from(name)?,
            None => self.config.default_provider_id()?,
        };
        Ok(WeatherService::new(ProviderRegistry::from_config(&self.config), active, self.offline.clone())?
            .with_network(self.network.subscribe()))
    }

    fn saved_locations(&self) -> SavedLocations {
        let saved = SavedLocations::new(self.offline.clone());
        if self.config.sync.endpoint.is_some() { saved } else { saved.local_only() }
    }

    /// Replays to the configured endpoint, or only prunes the cache without one.
    fn sync_coordinator(&self) -> SyncCoordinator {
        match &self.config.sync.endpoint {
            Some(endpoint) => SyncCoordinator::new(
                self.offline.clone(),
                Arc::new(HttpSyncClient::new(endpoint.clone())),
                self.config.sync.max_attempts,
            ),
            None => SyncCoordinator::local(self.offline.clone()),
        }
    }

    fn alert_service(&self, notifier: Arc<dyn Notifier>) -> AlertService {
        AlertService::from_config(&self.config.alerts, self.config.units, self.offline.store(), notifier)
    }

    /// A "lat,lon" pair, a saved city, or the first search hit.
    async fn resolve_place(&self, service: &WeatherService, input: &str) -> Result<Place> {
        if let Some(coordinates) = Coordinates::parse(input) {
            return Ok(Place::from_coordinates(coordinates));
        }

        let saved = self.saved_locations().list().await?;
        if let Some(place) = saved.into_iter().find(|p| p.name.eq_ignore_ascii_case(input)) {
            return Ok(place);
        }

        let found = service
            .search(input)
            .await
            .with_context(|| format!("Could not look up '{input}'. Try \"lat,lon\" instead."))?;
        found
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No place found for '{input}'"))
    }
}

/// Prints each delivered alert to stdout.
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        output::print_alert(alert);
        Ok(())
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let Cli { provider, offline, command, .. } = self;
        let command = match command {
            Command::Configure { provider } => return configure(&provider),
            other => other,
        };

        let ctx = App::load(offline)?;
        let units = ctx.config.units;
        let provider = provider.as_deref();

        match command {
            Command::Configure { .. } => {}

            Command::Provider { id } => switch_provider(ctx, id).await?,

            Command::Now { place } => {
                let service = ctx.service(provider)?;
                let place = ctx.resolve_place(&service, &place).await?;
                let current = service.current(place.coordinates).await?;
                output::print_current(&current, units);
            }

            Command::Forecast { place, days } => {
                let service = ctx.service(provider)?;
                let place = ctx.resolve_place(&service, &place).await?;
                let forecast = service.forecast(place.coordinates, days).await?;
                output::print_forecast(&forecast, units);
            }

            Command::Air { place } => {
                let service = ctx.service(provider)?;
                let place = ctx.resolve_place(&service, &place).await?;
                let air = service.air_quality(place.coordinates).await?;
                output::print_air(&air);
            }

            Command::Alerts { place } => {
                let service = ctx.service(provider)?;
                let place = ctx.resolve_place(&service, &place).await?;
                let report = service.report(place.coordinates).await?;
                let engine = AlertEngine::new(
                    &ctx.config.alerts,
                    units,
                    NotificationLog::new(ctx.offline.store()),
                );
                println!("{}{}", report.value.current.place.display_name(), output::freshness(&report));
                output::print_alerts(&engine.triggered(&report.value, chrono::Utc::now()));
            }

            Command::Advice { place } => {
                let service = ctx.service(provider)?;
                let place = ctx.resolve_place(&service, &place).await?;
                let report = service.report(place.coordinates).await?;
                println!("{}{}", report.value.current.place.display_name(), output::freshness(&report));
                output::print_advice(&advisory::advise(&report.value, chrono::Utc::now(), units));
            }

            Command::Legacy { place } => {
                let service = Arc::new(ctx.service(provider)?);
                let place = ctx.resolve_place(&service, &place).await?;
                let chain = FallbackChain::new(service, ctx.config.fallback_provider_id().ok());
                let legacy = chain.legacy_weather(place.coordinates, units).await?;
                println!("{}", serde_json::to_string_pretty(&legacy)?);
            }

            Command::Search { query } => {
                let service = ctx.service(provider)?;
                output::print_places(&service.search(&query).await?);
            }

            Command::Cities { action } => cities(&ctx, provider, action).await?,

            Command::Cache { action } => cache(&ctx, action).await?,

            Command::Sync => sync(&ctx).await?,

            Command::Monitor { place, interval } => {
                monitor(&ctx, provider, &place, Duration::from_secs(interval.max(60))).await?
            }
        }

        Ok(())
    }
}

fn configure(provider: &str) -> Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("{id} API key:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("No API key entered")?;
    if api_key.trim().is_empty() {
        bail!("API key must not be empty");
    }

    config.upsert_provider_api_key(id, api_key.trim().to_string());

    if config.default_provider_id().ok() != Some(id) {
        let make_default = Confirm::new(&format!("Make {id} the default provider?"))
            .with_default(false)
            .prompt()
            .unwrap_or(false);
        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save()?;
    println!("Saved {id} credentials to {}", Config::config_file_path()?.display());
    Ok(())
}

async fn switch_provider(ctx: App, id: Option<String>) -> Result<()> {
    let Some(name) = id else {
        let active = ctx.config.default_provider_id().ok();
        for &id in ProviderId::all() {
            let marker = if Some(id) == active { "*" } else { " " };
            let status = if ctx.config.is_provider_configured(id) { "configured" } else { "no API key" };
            println!("{marker} {:<12} {status}", id.as_str());
        }
        return Ok(());
    };

    let id = ProviderId::try_from(name.as_str())?;
    if !ctx.config.is_provider_configured(id) {
        return Err(WeatherError::MissingApiKey(id).into());
    }

    let mut config = ctx.config;
    config.set_default_provider(id);
    config.save()?;

    if config.sync.endpoint.is_some() {
        ctx.offline
            .queue_action(OfflineAction::UpdateSetting {
                key: "default_provider".into(),
                value: serde_json::Value::String(id.as_str().into()),
            })
            .await?;
    }

    println!("Default provider is now {id}");
    Ok(())
}

async fn cities(ctx: &App, provider: Option<&str>, action: CitiesCommand) -> Result<()> {
    let saved = ctx.saved_locations();
    match action {
        CitiesCommand::List => output::print_places(&saved.list().await?),
        CitiesCommand::Add { place } => {
            let service = ctx.service(provider)?;
            let place = ctx.resolve_place(&service, &place).await?;
            let name = place.display_name();
            if saved.add(place).await? {
                println!("Added {name}");
            } else {
                println!("{name} is already saved");
            }
        }
        CitiesCommand::Remove { place } => match saved.remove(&place).await? {
            Some(removed) => println!("Removed {}", removed.display_name()),
            None => bail!("No saved city matches '{place}'"),
        },
    }
    Ok(())
}

async fn cache(ctx: &App, action: CacheCommand) -> Result<()> {
    match action {
        CacheCommand::Stats => {
            let stats = ctx.offline.cache_stats().await?;
            let last_sync = ctx.offline.last_sync().await?;
            let queued = ctx.offline.pending_actions().await?.len();
            output::print_cache_stats(&stats, last_sync, queued);
        }
        CacheCommand::Clear => println!("Removed {} cached entries", ctx.offline.clear_cache().await?),
        CacheCommand::Prune => println!("Pruned {} expired entries", ctx.offline.clear_expired().await?),
    }
    Ok(())
}

async fn sync(ctx: &App) -> Result<()> {
    if ctx.config.sync.endpoint.is_none() {
        let pruned = ctx.offline.clear_expired().await?;
        println!("No sync endpoint configured; pruned {pruned} expired cache entries.");
        return Ok(());
    }

    if ctx.forced_offline {
        bail!("Cannot sync while --offline is set");
    }
    let probe = ConnectivityProbe::new(ctx.config.sync.probe_url.clone());
    if !probe.check().await.is_online() {
        let queued = ctx.offline.pending_actions().await?.len();
        println!("Network unavailable; {queued} actions stay queued.");
        return Ok(());
    }

    output::print_sync_report(&ctx.sync_coordinator().sync_now().await?);
    Ok(())
}

async fn monitor(ctx: &App, provider: Option<&str>, place: &str, interval: Duration) -> Result<()> {
    let service = ctx.service(provider)?;
    let place = ctx.resolve_place(&service, place).await?;
    let alerts = ctx.alert_service(Arc::new(ConsoleNotifier));

    let (stop_tx, stop_rx) = watch::channel(false);
    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let mut tasks = Vec::new();
    if !ctx.forced_offline {
        let network = Arc::clone(&ctx.network);
        let probe = ConnectivityProbe::new(ctx.config.sync.probe_url.clone());
        let poll = Duration::from_secs(ctx.config.sync.poll_interval_secs.max(5));
        let shutdown = stopped(stop_rx.clone());
        tasks.push(tokio::spawn(async move { network.run(&probe, poll, shutdown).await }));
    }
    let coordinator = ctx.sync_coordinator();
    let network = ctx.network.subscribe();
    let shutdown = stopped(stop_rx.clone());
    tasks.push(tokio::spawn(async move { coordinator.run(network, shutdown).await }));

    println!("Monitoring {} every {} s. Press Ctrl-C to stop.", place.display_name(), interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.report(place.coordinates).await {
                    Ok(report) => {
                        if let Err(e) = alerts.check(&report.value, chrono::Utc::now()).await {
                            tracing::warn!(error = %e, "alert check failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "weather check failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = stop_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
