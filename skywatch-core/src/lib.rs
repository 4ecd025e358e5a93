//! Core library for the `skywatch` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Weather providers and the unified shape they are converted into
//! - The weather service with its offline cache, action queue and sync
//! - Rule-based alerts and weather-derived farm advice
//!
//! It is used by `skywatch-cli`, but can also be reused by other binaries or services.

pub mod adapter;
pub mod advisory;
pub mod alerts;
pub mod aqi;
pub mod condition;
pub mod config;
pub mod error;
pub mod locations;
pub mod model;
pub mod offline;
pub mod provider;
pub mod service;
pub mod store;
pub mod sync;
pub mod units;

pub use config::{Config, ProviderConfig};
pub use error::WeatherError;
pub use model::{Coordinates, Place, WeatherReport};
pub use provider::{ProviderId, WeatherProvider};
pub use service::WeatherService;
pub use units::UnitSystem;
