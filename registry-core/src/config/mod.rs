use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Listener and telemetry settings shared by every registry process.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector endpoint. Spans are only exported when this is set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Upper bound applied to every store, storage and provider call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            otlp_endpoint: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Loads `T` from an optional `configuration.*` file overlaid with `APP__*`
/// environment variables (`APP__DATABASE__BACKEND=mongo`).
pub fn load<T: DeserializeOwned>() -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default)]
        server: ServerConfig,
    }

    #[test]
    #[serial]
    fn defaults_apply_without_sources() {
        let sample: Sample = load().unwrap();
        assert_eq!(sample.server.port, 8080);
        assert_eq!(sample.server.request_timeout_secs, 30);
        assert!(sample.server.otlp_endpoint.is_none());
    }

    #[test]
    #[serial]
    fn environment_overrides_nested_values() {
        unsafe {
            std::env::set_var("APP__SERVER__PORT", "9191");
        }
        let sample: Sample = load().unwrap();
        unsafe {
            std::env::remove_var("APP__SERVER__PORT");
        }
        assert_eq!(sample.server.port, 9191);
    }
}
