use thiserror::Error;

use crate::provider::ProviderId;

/// Failures callers may want to match on.
///
/// These travel inside `anyhow::Error`; use `err.downcast_ref::<WeatherError>()`
/// to recover them.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error(
        "No API key configured for provider '{0}'.\n\
         Hint: run `skywatch configure {0}` and enter your API key."
    )]
    MissingApiKey(ProviderId),

    #[error("{provider} does not provide {feature}")]
    Unsupported {
        provider: ProviderId,
        feature: &'static str,
    },

    #[error("{provider} {endpoint} request failed with status {status}: {body}")]
    Status {
        provider: ProviderId,
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("All providers failed: {}", format_failures(.0))]
    AllProvidersFailed(Vec<(ProviderId, String)>),

    #[error("Offline and no cached data for '{0}'")]
    OfflineCacheMiss(String),

    #[error("{0} is out of range")]
    OutOfRange(&'static str),
}

impl WeatherError {
    /// True for failures where retrying against another provider cannot help.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, WeatherError::Unsupported { .. })
    }
}

fn format_failures(failures: &[(ProviderId, String)]) -> String {
    failures
        .iter()
        .map(|(id, msg)| format!("{id}: {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_providers_failed_lists_every_provider() {
        let err = WeatherError::AllProvidersFailed(vec![
            (ProviderId::TomorrowIo, "timeout".into()),
            (ProviderId::OpenWeather, "status 401".into()),
        ]);

        let msg = err.to_string();
        assert!(msg.contains("tomorrowio: timeout"));
        assert!(msg.contains("openweather: status 401"));
    }

    #[test]
    fn missing_key_has_hint() {
        let msg = WeatherError::MissingApiKey(ProviderId::AccuWeather).to_string();
        assert!(msg.contains("skywatch configure accuweather"));
    }
}
