use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the isr-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "isr-cache",
    version,
    about = "Stale-while-revalidate caching proxy"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "ISR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the public URL used for revalidation self-fetches.
    #[arg(long = "server-public-url", value_name = "URL")]
    pub public_url: Option<String>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the origin base URL.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the origin request timeout.
    #[arg(long = "origin-timeout-seconds", value_name = "SECONDS")]
    pub origin_timeout_seconds: Option<u64>,

    /// Override the name the request fetcher is registered under.
    #[arg(long = "isr-key", value_name = "NAME")]
    pub isr_key: Option<String>,

    /// Override the fast-tier partition name.
    #[arg(long = "isr-cache-name", value_name = "NAME")]
    pub isr_cache_name: Option<String>,

    /// Override the fresh window applied to proxied requests.
    #[arg(long = "isr-default-duration", value_name = "DURATION")]
    pub isr_default_duration: Option<String>,

    /// Toggle stale-while-revalidate.
    #[arg(
        long = "isr-stale-while-revalidate",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub isr_stale_while_revalidate: Option<bool>,

    /// Toggle the durable tier.
    #[arg(
        long = "isr-enable-durable-tier",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub isr_enable_durable_tier: Option<bool>,

    /// Override the fast-tier capacity.
    #[arg(long = "isr-fast-tier-capacity", value_name = "COUNT")]
    pub isr_fast_tier_capacity: Option<usize>,

    /// Override the background revalidation concurrency.
    #[arg(long = "isr-revalidation-concurrency", value_name = "COUNT")]
    pub isr_revalidation_concurrency: Option<usize>,
}
