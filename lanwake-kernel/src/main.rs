/**
 * LANWAKE KERNEL - Wake-on-LAN and power control for named LAN hosts
 *
 * ROLE: wires the target registry, the audit log, the wake and power
 * dispatchers and the HTTP API, then serves until killed.
 *
 * STARTUP ORDER: the local UTC offset is read before the tokio runtime
 * exists (the platform lookup is refused once other threads run), so the
 * runtime is built by hand instead of with #[tokio::main].
 */

mod clock;
mod config;
mod error;
mod http;
mod logs;
mod net;
mod persist;
mod power;
mod runner;
mod targets;
mod wol;

#[cfg(test)]
mod testing;

use crate::clock::{format_ts, SharedClock, SystemClock};
use crate::config::load_settings;
use crate::http::AppState;
use crate::logs::LogStore;
use crate::net::{NetProbe, SystemProbe};
use crate::power::PowerDispatcher;
use crate::runner::{CommandRunner, SystemRunner};
use crate::targets::{seed_target, Registry};
use crate::wol::{WakeConfig, WakeDispatcher};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let clock = SystemClock::detect();

    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lanwake_kernel=info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(clock))
}

async fn run(system_clock: SystemClock) -> Result<()> {
    info!(offset = %system_clock.offset(), "lanwake kernel starting");
    let clock: SharedClock = Arc::new(system_clock);
    let settings = load_settings().await;

    let logs = Arc::new(
        LogStore::new(&settings.log_path, clock.clone())
            .with_retention_days(settings.log_retention_days)
            .with_max_limit(settings.log_max_limit),
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let probe: Arc<dyn NetProbe> = Arc::new(SystemProbe::new(runner.clone()));

    let seed = settings.seed.as_ref().and_then(|seed| {
        let target = seed_target(&seed.label, &seed.ip, seed.mac.as_deref(), &format_ts(clock.now()));
        if target.is_none() {
            warn!(label = %seed.label, ip = %seed.ip, "ignoring invalid seed target");
        }
        target
    });
    let registry = Arc::new(
        Registry::new(&settings.targets_path, logs.clone(), clock.clone())
            .with_seed(seed)
            .with_probe(probe.clone()),
    );
    // creates (and seeds) the registry file on first start
    let known = registry
        .list()
        .with_context(|| format!("failed to load targets from {}", settings.targets_path.display()))?;
    info!(targets = known.len(), path = %settings.targets_path.display(), "registry loaded");

    let wake = Arc::new(WakeDispatcher::new(
        registry.clone(),
        logs.clone(),
        runner.clone(),
        WakeConfig::from_settings(&settings),
    ));
    info!(
        method = wake.config().method.as_str(),
        broadcast = %wake.config().broadcast,
        iface = %wake.config().iface,
        "wake dispatcher ready"
    );
    let power = Arc::new(PowerDispatcher::new(registry.clone(), logs.clone(), runner));

    let app = http::build_router(AppState { registry, logs, wake, power, probe });

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await.context("http server failed")?;
    Ok(())
}
