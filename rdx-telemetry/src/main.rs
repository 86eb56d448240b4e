use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::path::PathBuf;
use telemetry::engine_room::{self, Drivers};
use telemetry::prelude::*;
use telemetry::{AGENT_NAME, VERSION};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load configuration: an optional TOML file plus TELEMETRY_* variables.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = TelemetryConfig::load(config_path.as_deref())
        .with_context(|| format!("failed to load configuration from {config_path:?}"))?;
    info!(
        "{} v{} starting as {}",
        AGENT_NAME,
        VERSION,
        config.hostname.cyan()
    );
    if let Some(server) = &config.server {
        info!(host = %server.host, port = server.port, "Using configured aggregation server.");
    }

    // 3. Create the transport and the listeners that consume it.
    let transport = BroadcastTransport::new(256);
    spawn_delta_printer(&transport, config.console, config.hostname.clone());

    // 4. Create the app and wire the engine room.
    let drivers = Drivers::simulated(&config.simulation);
    let tick_period = config.resolution.tick_period();
    let mut app = TelemetryApp::new(config, SystemClock::new(), transport);
    spawn_event_listener(&app);

    let state = app
        .initialize(|setup| engine_room::build(setup, &drivers).map(|_| ()))?
        .clone();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    if let AppState::Halted { reason } = state {
        // Fail-stop: never proceed with a partial pipeline.
        warn!(%reason, "Device halted. Waiting for reset (Ctrl+C).");
        shutdown.await?;
        return Ok(());
    }

    // 5. Run the main loop until Ctrl+C.
    let mut ticker = tokio::time::interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            result = &mut shutdown => {
                result?;
                break;
            }
            _ = ticker.tick() => {
                app.tick();
            }
        }
    }

    info!("Shutdown signal received. Exiting.");
    Ok(())
}

/// Prints every delivered delta in the configured console format.
fn spawn_delta_printer(transport: &BroadcastTransport, format: ConsoleFormat, source: String) {
    let mut delta_rx = transport.subscribe();
    tokio::spawn(async move {
        let mut units: HashMap<String, String> = HashMap::new();
        loop {
            let delivery = match delta_rx.recv().await {
                Ok(delivery) => delivery,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Delta printer lagged behind.");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let delta = &delivery.delta;
            if let Some(meta) = &delta.meta {
                units.insert(delta.path.clone(), meta.units.clone());
            }
            match format {
                ConsoleFormat::Pretty => {
                    let unit = units.get(&delta.path).map(String::as_str).unwrap_or("");
                    println!(
                        "{} {} = {} {}",
                        delivery.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
                        delta.path.cyan(),
                        delta.value.to_string().bold(),
                        unit.dimmed()
                    );
                }
                ConsoleFormat::Json => {
                    println!("{}", delta.to_signalk(&source, delivery.timestamp));
                }
                ConsoleFormat::Quiet => {}
            }
        }
    });
}

/// Logs the app's lifecycle events.
fn spawn_event_listener(app: &TelemetryApp) {
    let mut system_rx = app.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });
}
