use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Signature used by the static signer when no key is configured.
pub const DEFAULT_MOCK_JWS_SIGNATURE: &str = "mock-signature-not-for-production-use";

/// Fulfilment placed in re-emitted fulfil events unless overridden.
pub const DEFAULT_TRANSFERS_FULFILMENT: &str = "kqN4bX9vT2mRz7LwY3cP8sHdF6jUe1aG5nQoVtBiZ0E";

pub const DEFAULT_TOPIC_TEMPLATE: &str = "topic-{{functionality}}-{{action}}";

/// Service configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub mock_jws_signature: String,
    /// RS256 key; when set it replaces the static signature.
    pub jws_signing_key_path: Option<PathBuf>,
    pub transfers_fulfilment: String,
    pub log_enabled: bool,

    pub nats_url: String,
    pub consumer_auto_commit: bool,
    pub consumer_batch_size: usize,
    pub consumer_fetch_timeout: Duration,
    pub topic_template: String,

    pub host: String,
    pub port: u16,

    pub switch_endpoint: String,
    pub endpoint_cache_expires_in: Duration,
    pub endpoint_cache_generate_timeout: Duration,
    pub callback_timeout: Duration,

    pub tracestate_vendor: String,
    pub metrics_disabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Self {
            mock_jws_signature: var("MOCK_JWS_SIGNATURE", DEFAULT_MOCK_JWS_SIGNATURE),
            jws_signing_key_path: lookup("JWS_SIGNING_KEY_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            transfers_fulfilment: var("TRANSFERS_FULFILMENT", DEFAULT_TRANSFERS_FULFILMENT),
            log_enabled: parse_bool(&var("LOG_ENABLED", "false"))
                .context("LOG_ENABLED must be true or false")?,

            nats_url: var("NATS_URL", "nats://localhost:4222"),
            consumer_auto_commit: parse_bool(&var("CONSUMER_AUTO_COMMIT", "false"))
                .context("CONSUMER_AUTO_COMMIT must be true or false")?,
            consumer_batch_size: parse(&var("CONSUMER_BATCH_SIZE", "10"))
                .context("CONSUMER_BATCH_SIZE must be a positive number")?,
            consumer_fetch_timeout: millis(&var("CONSUMER_FETCH_TIMEOUT_MS", "1000"))
                .context("CONSUMER_FETCH_TIMEOUT_MS must be a number of milliseconds")?,
            topic_template: var("TOPIC_TEMPLATE", DEFAULT_TOPIC_TEMPLATE),

            host: var("HOST", "0.0.0.0"),
            port: parse(&var("PORT", "3003")).context("PORT must be a valid number")?,

            switch_endpoint: var("SWITCH_ENDPOINT", "http://localhost:3001"),
            endpoint_cache_expires_in: millis(&var("ENDPOINT_CACHE_EXPIRES_IN_MS", "4320000"))
                .context("ENDPOINT_CACHE_EXPIRES_IN_MS must be a number of milliseconds")?,
            endpoint_cache_generate_timeout: millis(&var("ENDPOINT_CACHE_GENERATE_TIMEOUT_MS", "30000"))
                .context("ENDPOINT_CACHE_GENERATE_TIMEOUT_MS must be a number of milliseconds")?,
            callback_timeout: millis(&var("CALLBACK_TIMEOUT_MS", "20000"))
                .context("CALLBACK_TIMEOUT_MS must be a number of milliseconds")?,

            tracestate_vendor: var("TRACESTATE_VENDOR", crate::span::DEFAULT_TRACESTATE_VENDOR),
            metrics_disabled: parse_bool(&var("INSTRUMENTATION_METRICS_DISABLED", "false"))
                .context("INSTRUMENTATION_METRICS_DISABLED must be true or false")?,
        })
    }

    /// Address of the health/metrics server.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Render a topic name from the template.
pub fn render_topic(template: &str, functionality: &str, action: &str) -> String {
    template
        .replace("{{functionality}}", &functionality.to_ascii_lowercase())
        .replace("{{action}}", &action.to_ascii_lowercase())
}

fn parse<T>(raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(raw.trim().parse::<T>()?)
}

fn millis(raw: &str) -> Result<Duration> {
    Ok(Duration::from_millis(parse::<u64>(raw)?))
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mock_jws_signature, DEFAULT_MOCK_JWS_SIGNATURE);
        assert_eq!(config.transfers_fulfilment.len(), 43);
        assert!(!config.consumer_auto_commit);
        assert_eq!(config.port, 3003);
        assert_eq!(config.bind_address(), "0.0.0.0:3003");
        assert_eq!(config.tracestate_vendor, "acmevendor");
        assert!(config.jws_signing_key_path.is_none());
        assert!(!config.metrics_disabled);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("MOCK_JWS_SIGNATURE", "sig"),
            ("TRANSFERS_FULFILMENT", "fulfil-me"),
            ("LOG_ENABLED", "TRUE"),
            ("CONSUMER_AUTO_COMMIT", "1"),
            ("CONSUMER_FETCH_TIMEOUT_MS", "250"),
            ("JWS_SIGNING_KEY_PATH", "/secrets/jws.pem"),
            ("PORT", "8080"),
        ])
        .unwrap();
        assert_eq!(config.mock_jws_signature, "sig");
        assert_eq!(config.transfers_fulfilment, "fulfil-me");
        assert!(config.log_enabled);
        assert!(config.consumer_auto_commit);
        assert_eq!(config.consumer_fetch_timeout, Duration::from_millis(250));
        assert_eq!(config.jws_signing_key_path, Some(PathBuf::from("/secrets/jws.pem")));
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_values_fail() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("CONSUMER_AUTO_COMMIT", "maybe")]).is_err());
    }

    #[test]
    fn test_render_topic() {
        assert_eq!(
            render_topic(DEFAULT_TOPIC_TEMPLATE, "notification", "EVENT"),
            "topic-notification-event"
        );
        assert_eq!(render_topic(DEFAULT_TOPIC_TEMPLATE, "transfer", "fulfil"), "topic-transfer-fulfil");
    }
}
