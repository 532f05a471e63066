use crate::error::Error;
use crate::proxy::types::{
    MaxInFlightShadows, RequestSizeLimit, ResponseSizeLimit, SampleRate, ShadowConfig, TargetUrl,
    DEFAULT_EXCLUDED_METHODS, DEFAULT_HEADER_WHITELIST,
};
use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use http::{HeaderName, Method};
use serde::Deserialize;
use std::env;
use std::time::Duration;

const DEFAULT_BODY_LIMIT: i64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub shadow: ShadowSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

/// Raw shadowing options, validated by [`Settings::shadow_config`]
#[derive(Debug, Deserialize, Clone)]
pub struct ShadowSettings {
    pub authoritative_url: String,
    pub candidate_url: String,
    pub sample_rate: f64,
    pub candidate_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub excluded_methods: Vec<String>,
    pub header_whitelist: Vec<String>,
    pub max_in_flight_shadows: usize,
    pub max_request_size: usize,
    pub max_response_size: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Self::defaults()?
            .set_default("application.environment", environment.clone())?
            // Add configuration file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix
            .add_source(
                Environment::with_prefix("SHADOW_PROXY")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("shadow.excluded_methods")
                    .with_list_parse_key("shadow.header_whitelist"),
            )
            .build()?
            .try_deserialize()
    }

    /// Builder pre-populated with every default value
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("application.host", "0.0.0.0")?
            .set_default("application.port", 8080)?
            .set_default("application.environment", "development")?
            .set_default("shadow.authoritative_url", "http://localhost:8081")?
            .set_default("shadow.candidate_url", "http://localhost:8082")?
            .set_default("shadow.sample_rate", 0.1)?
            .set_default("shadow.candidate_timeout_ms", 5000)?
            .set_default("shadow.request_timeout_ms", 30000)?
            .set_default("shadow.excluded_methods", DEFAULT_EXCLUDED_METHODS.to_vec())?
            .set_default("shadow.header_whitelist", DEFAULT_HEADER_WHITELIST.to_vec())?
            .set_default("shadow.max_in_flight_shadows", 64)?
            .set_default("shadow.max_request_size", DEFAULT_BODY_LIMIT)?
            .set_default("shadow.max_response_size", DEFAULT_BODY_LIMIT)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Validate the raw shadow options into an immutable [`ShadowConfig`]
    pub fn shadow_config(&self) -> Result<ShadowConfig, Error> {
        let shadow = &self.shadow;

        let excluded_methods = shadow
            .excluded_methods
            .iter()
            .map(|name| {
                Method::from_bytes(name.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|e| Error::invalid_config("shadow.excluded_methods", e))
            })
            .collect::<Result<_, _>>()?;

        let header_whitelist = shadow
            .header_whitelist
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.trim().to_ascii_lowercase().as_bytes())
                    .map_err(|e| Error::invalid_config("shadow.header_whitelist", e))
            })
            .collect::<Result<_, _>>()?;

        Ok(ShadowConfig {
            authoritative_url: TargetUrl::try_new(shadow.authoritative_url.clone())
                .map_err(|e| Error::invalid_config("shadow.authoritative_url", e))?,
            candidate_url: TargetUrl::try_new(shadow.candidate_url.clone())
                .map_err(|e| Error::invalid_config("shadow.candidate_url", e))?,
            sample_rate: SampleRate::try_new(shadow.sample_rate)
                .map_err(|e| Error::invalid_config("shadow.sample_rate", e))?,
            candidate_timeout: Duration::from_millis(shadow.candidate_timeout_ms),
            request_timeout: Duration::from_millis(shadow.request_timeout_ms),
            excluded_methods,
            header_whitelist,
            max_in_flight_shadows: MaxInFlightShadows::try_new(shadow.max_in_flight_shadows)
                .map_err(|e| Error::invalid_config("shadow.max_in_flight_shadows", e))?,
            max_request_size: RequestSizeLimit::try_new(shadow.max_request_size)
                .map_err(|e| Error::invalid_config("shadow.max_request_size", e))?,
            max_response_size: ResponseSizeLimit::try_new(shadow.max_response_size)
                .map_err(|e| Error::invalid_config("shadow.max_response_size", e))?,
        })
    }
}
