//! Farm advice derived from the weather alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{model::WeatherReport, units::UnitSystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceKind {
    SprayWindow,
    FrostRisk,
    Irrigation,
    HeatStress,
    FieldWork,
}

impl AdviceKind {
    pub fn title(&self) -> &'static str {
        match self {
            AdviceKind::SprayWindow => "Spraying",
            AdviceKind::FrostRisk => "Frost risk",
            AdviceKind::Irrigation => "Irrigation",
            AdviceKind::HeatStress => "Livestock heat stress",
            AdviceKind::FieldWork => "Field work",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceLevel {
    Favourable,
    Caution,
    Unfavourable,
}

impl AdviceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceLevel::Favourable => "favourable",
            AdviceLevel::Caution => "caution",
            AdviceLevel::Unfavourable => "unfavourable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub kind: AdviceKind,
    pub level: AdviceLevel,
    pub message: String,
}

// Drift limits for ground spraying.
const SPRAY_MAX_WIND_MPS: f64 = 4.5;
const SPRAY_CAUTION_WIND_MPS: f64 = 6.7;
const SPRAY_MIN_TEMP_C: f64 = 10.0;
const SPRAY_MAX_TEMP_C: f64 = 30.0;
const SPRAY_LOOKAHEAD_HOURS: i64 = 6;

const FROST_DAYS: usize = 3;
const FROST_CAUTION_C: f64 = 3.0;

const IRRIGATION_DAYS: usize = 3;
const IRRIGATION_WET_MM: f64 = 10.0;
const IRRIGATION_DRY_MM: f64 = 2.0;
const IRRIGATION_HOT_C: f64 = 30.0;

const FIELD_WET_MM: f64 = 10.0;

/// Temperature-humidity index used for cattle heat stress.
pub fn temperature_humidity_index(temp_c: f64, humidity_pct: f64) -> f64 {
    (1.8 * temp_c + 32.0) - (0.55 - 0.0055 * humidity_pct) * (1.8 * temp_c - 26.0)
}

pub fn advise(report: &WeatherReport, now: DateTime<Utc>, units: UnitSystem) -> Vec<Advice> {
    vec![
        spray_window(report, now, units),
        frost_risk(report, units),
        irrigation(report, units),
        heat_stress(report),
        field_work(report, now, units),
    ]
}

fn spray_window(report: &WeatherReport, now: DateTime<Utc>, units: UnitSystem) -> Advice {
    let current = &report.current;
    let window: Vec<_> = report.forecast.hours_ahead(now, SPRAY_LOOKAHEAD_HOURS).collect();

    let max_wind = window
        .iter()
        .map(|h| h.wind_speed_mps)
        .fold(current.wind_speed_mps, f64::max);
    let max_pop = window.iter().map(|h| h.precipitation_probability_pct).max().unwrap_or(0);
    let temp = current.temperature_c;

    let (level, message) = if current.condition.is_wet() || max_pop > 60 {
        (
            AdviceLevel::Unfavourable,
            format!("Rain likely within {SPRAY_LOOKAHEAD_HOURS} h ({max_pop}%). Product may wash off."),
        )
    } else if max_wind > SPRAY_CAUTION_WIND_MPS {
        (
            AdviceLevel::Unfavourable,
            format!("Wind up to {}. Drift risk is high.", units.format_speed(max_wind)),
        )
    } else if !(SPRAY_MIN_TEMP_C..=SPRAY_MAX_TEMP_C).contains(&temp) {
        (
            AdviceLevel::Caution,
            format!("{} is outside the ideal spraying range.", units.format_temperature(temp)),
        )
    } else if max_wind > SPRAY_MAX_WIND_MPS || max_pop > 40 {
        (
            AdviceLevel::Caution,
            format!(
                "Marginal: wind up to {}, {max_pop}% chance of rain.",
                units.format_speed(max_wind)
            ),
        )
    } else {
        (
            AdviceLevel::Favourable,
            format!(
                "Good spraying conditions for the next {SPRAY_LOOKAHEAD_HOURS} h (wind {}).",
                units.format_speed(max_wind)
            ),
        )
    };

    Advice { kind: AdviceKind::SprayWindow, level, message }
}

fn frost_risk(report: &WeatherReport, units: UnitSystem) -> Advice {
    let coldest = report
        .forecast
        .daily
        .iter()
        .take(FROST_DAYS)
        .min_by(|a, b| a.low_c.total_cmp(&b.low_c));

    let (level, message) = match coldest {
        None => (AdviceLevel::Caution, "No forecast available to judge frost risk.".to_string()),
        Some(day) if day.low_c <= 0.0 => (
            AdviceLevel::Unfavourable,
            format!(
                "Frost expected on {} (low {}). Cover sensitive crops.",
                day.date.format("%a %d %b"),
                units.format_temperature(day.low_c)
            ),
        ),
        Some(day) if day.low_c <= FROST_CAUTION_C => (
            AdviceLevel::Caution,
            format!(
                "Near-freezing low of {} on {}. Ground frost possible.",
                units.format_temperature(day.low_c),
                day.date.format("%a %d %b")
            ),
        ),
        Some(day) => (
            AdviceLevel::Favourable,
            format!("No frost expected (lowest {}).", units.format_temperature(day.low_c)),
        ),
    };

    Advice { kind: AdviceKind::FrostRisk, level, message }
}

fn irrigation(report: &WeatherReport, units: UnitSystem) -> Advice {
    let days = report.forecast.daily.iter().take(IRRIGATION_DAYS);
    let (rain_mm, hottest) = days.fold((0.0, f64::MIN), |(rain, hot), d| {
        (rain + d.precipitation_mm, hot.max(d.high_c))
    });

    let (level, message) = if rain_mm >= IRRIGATION_WET_MM {
        (
            AdviceLevel::Favourable,
            format!("{} of rain expected over {IRRIGATION_DAYS} days. No irrigation needed.", units.format_precipitation(rain_mm)),
        )
    } else if rain_mm < IRRIGATION_DRY_MM && hottest >= IRRIGATION_HOT_C {
        (
            AdviceLevel::Unfavourable,
            format!(
                "Dry and hot (up to {}). Irrigate early morning or evening.",
                units.format_temperature(hottest)
            ),
        )
    } else {
        (
            AdviceLevel::Caution,
            format!(
                "Only {} of rain expected. Check soil moisture.",
                units.format_precipitation(rain_mm)
            ),
        )
    };

    Advice { kind: AdviceKind::Irrigation, level, message }
}

fn heat_stress(report: &WeatherReport) -> Advice {
    let thi = temperature_humidity_index(report.current.temperature_c, f64::from(report.current.humidity_pct));

    let (level, message) = if thi >= 79.0 {
        (
            AdviceLevel::Unfavourable,
            format!("THI {thi:.0}: severe heat stress. Provide shade, water and avoid handling."),
        )
    } else if thi >= 72.0 {
        (AdviceLevel::Caution, format!("THI {thi:.0}: mild heat stress. Ensure water and shade."))
    } else {
        (AdviceLevel::Favourable, format!("THI {thi:.0}: no heat stress."))
    };

    Advice { kind: AdviceKind::HeatStress, level, message }
}

fn field_work(report: &WeatherReport, now: DateTime<Utc>, units: UnitSystem) -> Advice {
    let current = &report.current;
    let next_day_mm: f64 = report.forecast.hours_ahead(now, 24).map(|h| h.precipitation_mm).sum();

    let (level, message) = if current.precipitation_mm > 0.0 || current.condition.is_wet() {
        (
            AdviceLevel::Unfavourable,
            "It is raining now. Soil is too wet for machinery.".to_string(),
        )
    } else if next_day_mm >= FIELD_WET_MM {
        (
            AdviceLevel::Caution,
            format!(
                "{} of rain expected in the next 24 h. Plan work for the dry hours.",
                units.format_precipitation(next_day_mm)
            ),
        )
    } else {
        (AdviceLevel::Favourable, "Dry conditions suit field work.".to_string())
    };

    Advice { kind: AdviceKind::FieldWork, level, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{condition::WeatherCondition, model::fixtures};

    fn find(advice: &[Advice], kind: AdviceKind) -> &Advice {
        advice.iter().find(|a| a.kind == kind).unwrap()
    }

    #[test]
    fn calm_day_is_favourable_for_spraying_and_field_work() {
        let advice = advise(&fixtures::report(), fixtures::now(), UnitSystem::Metric);
        assert_eq!(advice.len(), 5);
        assert_eq!(find(&advice, AdviceKind::SprayWindow).level, AdviceLevel::Favourable);
        assert_eq!(find(&advice, AdviceKind::FieldWork).level, AdviceLevel::Favourable);
        assert_eq!(find(&advice, AdviceKind::FrostRisk).level, AdviceLevel::Favourable);
        assert_eq!(find(&advice, AdviceKind::HeatStress).level, AdviceLevel::Favourable);
    }

    #[test]
    fn rain_ahead_blocks_spraying() {
        let mut report = fixtures::report();
        report.forecast.hourly[3].precipitation_probability_pct = 70;
        let advice = advise(&report, fixtures::now(), UnitSystem::Metric);
        let spray = find(&advice, AdviceKind::SprayWindow);
        assert_eq!(spray.level, AdviceLevel::Unfavourable);
        assert!(spray.message.contains("70%"));
    }

    #[test]
    fn wind_makes_spraying_marginal_or_bad() {
        let mut report = fixtures::report();
        report.forecast.hourly[2].wind_speed_mps = 5.0;
        assert_eq!(spray_window(&report, fixtures::now(), UnitSystem::Metric).level, AdviceLevel::Caution);

        report.current.wind_speed_mps = 8.0;
        assert_eq!(spray_window(&report, fixtures::now(), UnitSystem::Metric).level, AdviceLevel::Unfavourable);
    }

    #[test]
    fn frost_levels() {
        let mut report = fixtures::report();
        report.forecast.daily[1].low_c = 2.0;
        assert_eq!(frost_risk(&report, UnitSystem::Metric).level, AdviceLevel::Caution);

        report.forecast.daily[2].low_c = -3.0;
        let advice = frost_risk(&report, UnitSystem::Imperial);
        assert_eq!(advice.level, AdviceLevel::Unfavourable);
        assert!(advice.message.contains("27°F"));

        // beyond the lookahead
        let mut later = fixtures::report();
        later.forecast.daily[4].low_c = -5.0;
        assert_eq!(frost_risk(&later, UnitSystem::Metric).level, AdviceLevel::Favourable);
    }

    #[test]
    fn irrigation_levels() {
        let mut report = fixtures::report();
        assert_eq!(irrigation(&report, UnitSystem::Metric).level, AdviceLevel::Caution);

        report.forecast.daily[0].high_c = 33.0;
        assert_eq!(irrigation(&report, UnitSystem::Metric).level, AdviceLevel::Unfavourable);

        report.forecast.daily[1].precipitation_mm = 12.0;
        assert_eq!(irrigation(&report, UnitSystem::Metric).level, AdviceLevel::Favourable);
    }

    #[test]
    fn thi_thresholds() {
        assert!(temperature_humidity_index(20.0, 50.0) < 72.0);
        let hot = temperature_humidity_index(35.0, 60.0);
        assert!(hot > 85.0 && hot < 90.0, "{hot}");

        let mut report = fixtures::report();
        report.current.temperature_c = 35.0;
        report.current.humidity_pct = 60;
        assert_eq!(heat_stress(&report).level, AdviceLevel::Unfavourable);
    }

    #[test]
    fn field_work_when_wet() {
        let mut report = fixtures::report();
        report.current.condition = WeatherCondition::Rain;
        assert_eq!(field_work(&report, fixtures::now(), UnitSystem::Metric).level, AdviceLevel::Unfavourable);

        let mut report = fixtures::report();
        for h in report.forecast.hourly.iter_mut().take(4) {
            h.precipitation_mm = 3.0;
        }
        assert_eq!(field_work(&report, fixtures::now(), UnitSystem::Metric).level, AdviceLevel::Caution);
    }
}
