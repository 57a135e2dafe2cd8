use std::path::PathBuf;

use lifecycle::EngineConfig;

/// Twilio REST credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    /// API base, overridable for test doubles
    pub api_url: String,
}

/// Default Twilio REST base URL
pub const TWILIO_API_URL: &str = "https://api.twilio.com";

/// Runtime configuration for the service binary.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    /// TOML file seeding installations and buttons into the in-memory store
    pub seed_path: Option<PathBuf>,
    /// Twilio credentials; outbound SMS is only logged when unset
    pub twilio: Option<TwilioCredentials>,
    pub engine: EngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            seed_path: std::env::var("BUTTON_ALERTS_SEED").ok().map(PathBuf::from),
            twilio: Self::twilio_from_env(),
            engine: EngineConfig::from_env(),
        }
    }
}

impl ServiceConfig {
    fn twilio_from_env() -> Option<TwilioCredentials> {
        let account_sid = std::env::var("TWILIO_SID").ok()?;
        let auth_token = std::env::var("TWILIO_TOKEN").ok()?;
        let api_url =
            std::env::var("TWILIO_API_URL").unwrap_or_else(|_| TWILIO_API_URL.to_string());
        Some(TwilioCredentials {
            account_sid,
            auth_token,
            api_url,
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_overrides(
        mut self,
        database_url: Option<String>,
        seed_path: Option<PathBuf>,
        dry_run: bool,
    ) -> Self {
        if database_url.is_some() {
            self.database_url = database_url;
        }
        if seed_path.is_some() {
            self.seed_path = seed_path;
        }
        if dry_run {
            self.twilio = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare() -> ServiceConfig {
        ServiceConfig {
            database_url: None,
            seed_path: None,
            twilio: Some(TwilioCredentials {
                account_sid: "AC123".into(),
                auth_token: "secret".into(),
                api_url: TWILIO_API_URL.into(),
            }),
            engine: EngineConfig::default(),
        }
    }

    #[test]
    fn test_overrides_replace_environment() {
        let config = bare().with_overrides(
            Some("postgres://localhost/alerts".into()),
            Some(PathBuf::from("seed.toml")),
            false,
        );
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/alerts")
        );
        assert_eq!(config.seed_path, Some(PathBuf::from("seed.toml")));
        assert!(config.twilio.is_some());
    }

    #[test]
    fn test_dry_run_drops_credentials() {
        let config = bare().with_overrides(None, None, true);
        assert!(config.twilio.is_none());
        assert!(config.database_url.is_none());
    }
}
