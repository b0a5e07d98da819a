use rocket::figment::{Figment, providers::Env};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    /// Lifetime of a login session and its cookies.
    pub session_hours: i64,
    /// Interval between expired-session sweeps.
    pub session_sweep_secs: u64,
    /// OTLP/gRPC collector. Spans are only exported when this is set.
    pub otlp_endpoint: Option<String>,
    /// Sent as the `x-api-key` header to the collector.
    pub otlp_api_key: Option<String>,
    pub service_environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://outcomes.db?mode=rwc".to_string(),
            session_hours: 1,
            session_sweep_secs: 3600,
            otlp_endpoint: None,
            otlp_api_key: None,
            service_environment: "development".to_string(),
        }
    }
}

impl AppConfig {
    /// Rocket's own sources (`Rocket.toml`, `ROCKET_*`) overridden by the
    /// unprefixed variables written by the env files. Missing keys fall back
    /// to the defaults.
    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        figment
            .clone()
            .merge(Env::raw().only(&[
                "DATABASE_URL",
                "OTLP_ENDPOINT",
                "OTLP_API_KEY",
                "SERVICE_ENVIRONMENT",
            ]).global())
            .extract()
    }

    pub fn load() -> Result<Self, rocket::figment::Error> {
        Self::from_figment(&rocket::Config::figment())
    }

    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_hours)
    }
}
