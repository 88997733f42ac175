//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, str::FromStr, time::Duration};

use axum::http::HeaderName;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{DurationSpec, IsrConfig};

mod cli;
#[cfg(test)]
mod tests;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "isr-cache";
const ENV_PREFIX: &str = "ISR";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ORIGIN_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub origin: OriginSettings,
    pub isr: IsrSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub public_url: Url,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IsrSettings {
    pub key: String,
    pub cache_name: Option<String>,
    pub long_term_cache_duration: DurationSpec,
    pub long_term_kv_duration: DurationSpec,
    /// Fresh window for proxied requests; `None` bypasses the cache.
    pub default_duration: Option<DurationSpec>,
    pub stale_while_revalidate: bool,
    pub enable_durable_tier: bool,
    pub fast_tier_capacity: usize,
    pub revalidation_concurrency: usize,
    pub refresh_header: Option<HeaderName>,
    pub avoid_cookie: Option<(String, String)>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    origin: RawOriginSettings,
    isr: RawIsrSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.public_url.as_ref() {
            self.server.public_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.origin_url.as_ref() {
            self.origin.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.origin_timeout_seconds {
            self.origin.timeout_seconds = Some(seconds);
        }
        if let Some(key) = overrides.isr_key.as_ref() {
            self.isr.key = Some(key.clone());
        }
        if let Some(name) = overrides.isr_cache_name.as_ref() {
            self.isr.cache_name = Some(name.clone());
        }
        if let Some(duration) = overrides.isr_default_duration.as_ref() {
            self.isr.default_duration = Some(DurationSpec::from(duration.as_str()));
        }
        if let Some(enabled) = overrides.isr_stale_while_revalidate {
            self.isr.stale_while_revalidate = Some(enabled);
        }
        if let Some(enabled) = overrides.isr_enable_durable_tier {
            self.isr.enable_durable_tier = Some(enabled);
        }
        if let Some(capacity) = overrides.isr_fast_tier_capacity {
            self.isr.fast_tier_capacity = Some(capacity);
        }
        if let Some(concurrency) = overrides.isr_revalidation_concurrency {
            self.isr.revalidation_concurrency = Some(concurrency);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            origin,
            isr,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let origin = build_origin_settings(origin)?;
        let isr = build_isr_settings(isr)?;

        Ok(Self {
            server,
            logging,
            origin,
            isr,
        })
    }
}

impl IsrSettings {
    pub fn cache_config(&self) -> IsrConfig {
        IsrConfig::from(self)
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let public_url = match server.public_url {
        Some(value) => parse_url(&value, "server.public_url")?,
        None => parse_url(&format!("http://{addr}"), "server.public_url")?,
    };

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        public_url,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let base_url = origin
        .base_url
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .ok_or_else(|| LoadError::invalid("origin.base_url", "an origin URL is required"))?;
    let base_url = parse_url(&base_url, "origin.base_url")?;
    if base_url.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "origin.base_url",
            "must be an absolute http(s) URL",
        ));
    }

    let timeout_secs = origin
        .timeout_seconds
        .unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "origin.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(OriginSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_isr_settings(isr: RawIsrSettings) -> Result<IsrSettings, LoadError> {
    let defaults = IsrConfig::default();

    let key = isr.key.unwrap_or(defaults.key);
    if key.trim().is_empty() {
        return Err(LoadError::invalid("isr.key", "must not be empty"));
    }

    let cache_name = isr.cache_name.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let long_term_cache_duration = checked_duration(
        isr.long_term_cache_duration
            .unwrap_or(defaults.long_term_cache_duration),
        "isr.long_term_cache_duration",
    )?;
    let long_term_kv_duration = checked_duration(
        isr.long_term_kv_duration
            .unwrap_or(defaults.long_term_kv_duration),
        "isr.long_term_kv_duration",
    )?;
    let default_duration = isr
        .default_duration
        .map(|spec| checked_duration(spec, "isr.default_duration"))
        .transpose()?;

    let fast_tier_capacity = isr.fast_tier_capacity.unwrap_or(defaults.fast_tier_capacity);
    if fast_tier_capacity == 0 {
        return Err(LoadError::invalid(
            "isr.fast_tier_capacity",
            "must be greater than zero",
        ));
    }

    let revalidation_concurrency = isr
        .revalidation_concurrency
        .unwrap_or(defaults.revalidation_concurrency);
    if revalidation_concurrency == 0 {
        return Err(LoadError::invalid(
            "isr.revalidation_concurrency",
            "must be greater than zero",
        ));
    }

    let refresh_header = isr
        .refresh_header
        .map(|name| {
            HeaderName::from_str(name.trim()).map_err(|err| {
                LoadError::invalid("isr.refresh_header", format!("invalid header name: {err}"))
            })
        })
        .transpose()?;

    let avoid_cookie = isr
        .avoid_cookie
        .map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| LoadError::invalid("isr.avoid_cookie", "expected `name=value`"))
        })
        .transpose()?;

    Ok(IsrSettings {
        key,
        cache_name,
        long_term_cache_duration,
        long_term_kv_duration,
        default_duration,
        stale_while_revalidate: isr.stale_while_revalidate.unwrap_or(true),
        enable_durable_tier: isr.enable_durable_tier.unwrap_or(false),
        fast_tier_capacity,
        revalidation_concurrency,
        refresh_header,
        avoid_cookie,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    public_url: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIsrSettings {
    key: Option<String>,
    cache_name: Option<String>,
    long_term_cache_duration: Option<DurationSpec>,
    long_term_kv_duration: Option<DurationSpec>,
    default_duration: Option<DurationSpec>,
    stale_while_revalidate: Option<bool>,
    enable_durable_tier: Option<bool>,
    fast_tier_capacity: Option<usize>,
    revalidation_concurrency: Option<usize>,
    refresh_header: Option<String>,
    avoid_cookie: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    Url::parse(value).map_err(|err| LoadError::invalid(key, format!("invalid URL: {err}")))
}

fn checked_duration(spec: DurationSpec, key: &'static str) -> Result<DurationSpec, LoadError> {
    spec.to_millis()
        .map_err(|err| LoadError::invalid(key, err.to_string()))?;
    Ok(spec)
}
