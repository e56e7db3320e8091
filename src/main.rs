use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use facegate::config::{GatewayConfig, LoggingConfig};
use facegate::dispatch::{build_dispatch_table, CommandRouter};
use facegate::mqtt::message_manager::MsgManager;
use facegate::mqtt::mqtt_handler::{ConnectionState, MqttHandle, MqttHandler};
use facegate::services::memory::MemoryStore;
use facegate::services::Services;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let config = setup().await?;

    let store = Arc::new(MemoryStore::new(&config.store));
    let table = build_dispatch_table(&Services::from_shared(store));
    info!(commands = table.len(), "Dispatch table ready");
    let router = Arc::new(CommandRouter::new(table));

    let (inbound_tx, msg_manager) = MsgManager::new(config.mqtt.inbound_capacity.max(1));
    let dispatcher = msg_manager.spawn_dispatcher(router);

    let handler = MqttHandler::new(config.mqtt.clone(), inbound_tx)
        .map_err(|e| eyre!("Invalid MQTT configuration: {}", e))?;
    let mqtt = match handler.connect().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to initialize MQTT");
            return Err(eyre!("Failed to initialize MQTT: {}", e));
        }
    };
    info!("MQTT Client initialized and connected");

    let state_task = spawn_state_log(mqtt.clone());
    let status_task = spawn_status_log(mqtt.clone());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("Failed to listen for shutdown signal: {}", e))?;
    info!("Shutting down gracefully...");

    status_task.abort();
    state_task.abort();
    if let Err(e) = mqtt.disconnect().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
    // The driver held the last inbound sender, so the dispatcher drains and stops.
    if let Err(e) = dispatcher.await {
        warn!(error = %e, "Inbound dispatcher ended abnormally");
    }

    Ok(())
}

async fn setup() -> Result<GatewayConfig> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let config = GatewayConfig::load().await?;
    setup_logging_env(&config.logging);
    info!(broker = %config.mqtt.broker_url, "Configuration ready");
    Ok(config)
}

fn setup_logging_env(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if logging.pretty {
        builder.pretty().init();
    } else {
        builder.compact().init();
    }
}

fn spawn_state_log(mqtt: MqttHandle) -> JoinHandle<()> {
    let mut states = mqtt.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::Offline => warn!("MQTT broker unreachable, retrying"),
                ConnectionState::Connected => info!("MQTT connection restored"),
                other => info!(state = ?other, "MQTT state changed"),
            }
        }
    })
}

fn spawn_status_log(mqtt: MqttHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let status = mqtt.status().await;
            info!(
                state = ?status.connection_state,
                received = status.messages_received,
                sent = status.messages_sent,
                errors = status.error_messages.len(),
                last_activity = ?status.last_activity,
                "MQTT status"
            );
        }
    })
}
