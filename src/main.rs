use std::{process, sync::Arc};

use isr_cache::{
    application::error::AppError,
    cache::{
        CachePolicy, CacheStorage, CacheHooks, HeaderHooks, IsrCache, IsrState, MemoryDurableTier,
    },
    config::{self, IsrSettings},
    infra::{
        error::InfraError,
        http::{self, ProxyState},
        origin::HttpOrigin,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let isr = &settings.isr;
    let cache_config = isr.cache_config();

    let storage = CacheStorage::new(cache_config.fast_tier_capacity_non_zero());
    let fast = storage.select(cache_config.cache_name.as_deref());
    let origin = Arc::new(HttpOrigin::new(settings.origin.timeout)?);

    let mut builder = IsrCache::builder(cache_config, fast, origin.clone()).hooks(build_hooks(isr));
    if isr.enable_durable_tier {
        builder = builder.durable(Arc::new(MemoryDurableTier::new()));
    }
    let (cache, worker) = builder.build()?;
    let worker_handle = tokio::spawn(worker.run());

    info!(
        key = cache.key(),
        durable_tier = cache.has_durable_tier(),
        origin = %settings.origin.base_url,
        "ISR cache ready"
    );

    let state = ProxyState {
        isr: IsrState {
            isr: cache,
            client: origin.client().clone(),
            public_url: settings.server.public_url.clone(),
        },
        origin_base: settings.origin.base_url.clone(),
        policy: CachePolicy {
            duration: isr.default_duration.clone(),
            stale_while_revalidate: isr.stale_while_revalidate,
            ..CachePolicy::default()
        },
    };

    let result = serve_http(&settings, state).await;

    // Queue handles drop with the router; queued and in-flight refreshes get a bounded drain.
    let abort = worker_handle.abort_handle();
    if tokio::time::timeout(settings.server.graceful_shutdown, worker_handle)
        .await
        .is_err()
    {
        warn!("Revalidation worker did not drain in time");
        abort.abort();
    }

    result
}

fn build_hooks(isr: &IsrSettings) -> Arc<dyn CacheHooks> {
    let mut hooks = HeaderHooks::new();
    if let Some(name) = isr.refresh_header.clone() {
        hooks = hooks.refresh_on_header(name);
    }
    if let Some((name, value)) = isr.avoid_cookie.clone() {
        hooks = hooks.avoid_on_cookie(name, value);
    }
    Arc::new(hooks)
}

async fn serve_http(settings: &config::Settings, state: ProxyState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "Listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
