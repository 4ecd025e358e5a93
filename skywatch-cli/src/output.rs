//! Human-readable rendering of core results.

use chrono::{DateTime, Local, Utc};
use skywatch_core::{
    Place, UnitSystem,
    advisory::{Advice, AdviceLevel},
    alerts::Alert,
    model::{AirQuality, CurrentConditions, Forecast},
    offline::CacheStats,
    service::{Fetched, Origin},
    sync::SyncReport,
    units::cardinal,
};

fn local_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%H:%M").to_string()
}

fn age(since: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - since).num_minutes().max(0);
    match minutes {
        0 => "just now".to_string(),
        1..=119 => format!("{minutes} min ago"),
        _ => format!("{} h ago", minutes / 60),
    }
}

/// A note on where the data came from, empty for live data.
pub fn freshness<T>(fetched: &Fetched<T>) -> String {
    match fetched.origin {
        Origin::Network => String::new(),
        Origin::Cache => format!(" (cached {})", age(fetched.as_of)),
        Origin::Stale => format!(" (outdated: last updated {})", age(fetched.as_of)),
    }
}

pub fn print_current(fetched: &Fetched<CurrentConditions>, units: UnitSystem) {
    let c = &fetched.value;
    println!("{} via {}{}", c.place.display_name(), c.provider, freshness(fetched));
    println!(
        "  {}  {} (feels like {})",
        c.description,
        units.format_temperature(c.temperature_c),
        units.format_temperature(c.feels_like_c)
    );

    let direction = c
        .wind_direction_deg
        .map(|d| format!(" from {}", cardinal(f64::from(d))))
        .unwrap_or_default();
    let gusts = c
        .wind_gust_mps
        .map(|g| format!(", gusts {}", units.format_speed(g)))
        .unwrap_or_default();
    println!("  Wind       {}{direction}{gusts}", units.format_speed(c.wind_speed_mps));
    println!("  Humidity   {}%", c.humidity_pct);
    if let Some(p) = c.pressure_hpa {
        println!("  Pressure   {}", units.format_pressure(p));
    }
    if let Some(v) = c.visibility_km {
        println!("  Visibility {}", units.format_distance(v));
    }
    if let Some(uv) = c.uv_index {
        println!("  UV index   {uv:.0}");
    }
    if c.precipitation_mm > 0.0 {
        println!("  Precip.    {}", units.format_precipitation(c.precipitation_mm));
    }
    if let (Some(rise), Some(set)) = (c.sunrise, c.sunset) {
        println!("  Sun        {} - {}", local_time(rise), local_time(set));
    }
}

pub fn print_forecast(fetched: &Fetched<Forecast>, units: UnitSystem) {
    let f = &fetched.value;
    println!("{} via {}{}", f.place.display_name(), f.provider, freshness(fetched));
    for day in &f.daily {
        println!(
            "  {}  {:>6} / {:<6} {:>3}% {:>8}  {}",
            day.date.format("%a %d %b"),
            units.format_temperature(day.high_c),
            units.format_temperature(day.low_c),
            day.precipitation_probability_pct,
            units.format_precipitation(day.precipitation_mm),
            day.description
        );
    }
}

pub fn print_air(fetched: &Fetched<AirQuality>) {
    let a = &fetched.value;
    println!("Air quality via {}{}", a.provider, freshness(fetched));
    println!("  AQI {} ({})", a.aqi, a.category.label());
    let pollutants = [
        ("PM2.5", a.pm2_5),
        ("PM10", a.pm10),
        ("O3", a.o3),
        ("NO2", a.no2),
        ("SO2", a.so2),
        ("CO", a.co),
    ];
    for (name, value) in pollutants {
        if let Some(v) = value {
            println!("  {name:<6} {v:.1} µg/m³");
        }
    }
}

pub fn print_alert(alert: &Alert) {
    let when = alert
        .expected_at
        .map(|t| format!(" (from {})", t.with_timezone(&Local).format("%a %H:%M")))
        .unwrap_or_default();
    println!("[{}] {}{when}", alert.severity.as_str().to_uppercase(), alert.title);
    if !alert.message.is_empty() {
        println!("  {}", alert.message);
    }
}

pub fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No alerts.");
    }
    for alert in alerts {
        print_alert(alert);
    }
}

pub fn print_advice(advice: &[Advice]) {
    for item in advice {
        let marker = match item.level {
            AdviceLevel::Favourable => "+",
            AdviceLevel::Caution => "~",
            AdviceLevel::Unfavourable => "-",
        };
        println!("{marker} {:<22} {}", item.kind.title(), item.message);
    }
}

pub fn print_places(places: &[Place]) {
    if places.is_empty() {
        println!("No places.");
    }
    for place in places {
        println!("  {:<40} {}", place.display_name(), place.coordinates.cache_key());
    }
}

pub fn print_cache_stats(stats: &CacheStats, last_sync: Option<DateTime<Utc>>, queued: usize) {
    println!("Cached entries: {} ({} fresh, {} outdated)", stats.entries, stats.fresh, stats.stale);
    println!("Size:           {:.1} KiB", stats.bytes as f64 / 1024.0);
    if let Some(oldest) = stats.oldest {
        println!("Oldest entry:   {}", age(oldest));
    }
    match last_sync {
        Some(t) => println!("Last sync:      {}", age(t)),
        None => println!("Last sync:      never"),
    }
    println!("Queued actions: {queued}");
}

pub fn print_sync_report(report: &SyncReport) {
    let r = &report.replay;
    println!(
        "Sent {}, failed {}, dropped {}, still queued {}; pruned {} cache entries.",
        r.sent, r.failed, r.dropped, r.remaining, report.pruned
    );
}
