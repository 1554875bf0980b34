//! TRex stateless daemon
//!
//! Configures the process-wide port registry, then refreshes port stats on
//! a fixed interval and applies link events until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trex_driver::{PortProperties, SimDriver};
use trex_stateless::{configure_with, get_instance, load_config, PortRegistry, StatelessConfig};

/// Port count used when neither the command line nor the config sets one.
const DEFAULT_PORT_COUNT: u8 = 4;

/// TRex stateless port daemon
#[derive(Parser, Debug)]
#[command(name = "trex-statelessd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Number of ports (overrides the configuration file)
    #[arg(short = 'p', long)]
    ports: Option<u8>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    info!("trex-statelessd: starting");
    let result = run(args).await;
    match &result {
        Ok(()) => info!("trex-statelessd: exiting normally"),
        Err(e) => error!(error = %e, "trex-statelessd: exiting with error"),
    }
    result
}

/// `RUST_LOG` takes precedence over `--log-level`.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => StatelessConfig::default(),
    };
    let port_count = args
        .ports
        .or(config.port_count)
        .unwrap_or(DEFAULT_PORT_COUNT);
    anyhow::ensure!(port_count > 0, "port count must be greater than 0");

    let driver = Arc::new(SimDriver::with_properties(
        port_count,
        PortProperties {
            driver: config.driver_name.clone(),
            speed: config.port_speed(),
        },
    ));
    let link_events = driver.subscribe();

    configure_with(
        PortRegistry::builder(port_count)
            .driver(driver)
            .config(&config)
            .build(),
    )?;
    let registry = get_instance()?;

    for port in registry.ports() {
        let props = port.get_properties();
        let state = port.get_state().await;
        info!(
            port = %port.id(),
            driver = %props.driver,
            speed = %props.speed,
            state = %state,
            "port ready"
        );
    }
    info!(
        port_count,
        owner_policy = %config.owner_policy,
        "trex-statelessd: running, press Ctrl-C to stop"
    );

    let mut ticker = tokio::time::interval(config.stats_interval());
    let dispatch = registry.dispatch_link_events(link_events);
    let shutdown = signal::ctrl_c();
    tokio::pin!(dispatch, shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for (id, result) in registry.update_all_stats().await {
                    let Ok(stats) = result else { continue };
                    match stats.to_json() {
                        Ok(json) => debug!(port = %id, stats = %json, "port stats"),
                        Err(e) => error!(port = %id, error = %e, "failed to render stats"),
                    }
                }
            }
            applied = &mut dispatch => {
                info!(applied, "link event source closed");
                break;
            }
            res = &mut shutdown => {
                res.context("failed to listen for Ctrl-C")?;
                info!("trex-statelessd: received shutdown signal");
                break;
            }
        }
    }

    for port in registry.ports() {
        if let Err(e) = port.stop_traffic().await {
            error!(port = %port.id(), error = %e, "failed to stop traffic on shutdown");
        }
    }
    Ok(())
}
