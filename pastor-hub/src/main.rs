use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pastor_hub::{
    api::api_router,
    broadcast::{Broadcaster, MqttBroadcaster, NullBroadcaster},
    config::{Config, PushConfig, PushKind, RegistryConfig},
    geofence::GeofencePolicy,
    ingest::{IngestSettings, Ingestor},
    notify::{HttpPushGateway, LogPushGateway, PushGateway},
    registry::Registries,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "pastor-hub")]
#[command(about = "Livestock telemetry hub")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "pastor-hub.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    let registries = match &config.registry {
        RegistryConfig::Memory => {
            info!("Using in-memory registries");
            Registries::memory()
        }
        RegistryConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite registries");
            Registries::sqlite(path).await?
        }
    };

    let cancel = CancellationToken::new();

    let broadcaster: Arc<dyn Broadcaster> = match &config.mqtt {
        Some(mqtt) => {
            let client = MqttBroadcaster::connect(mqtt, cancel.clone())?;
            for filter in &mqtt.subscribe {
                client
                    .on_message(
                        filter.clone(),
                        Arc::new(|topic: &str, payload: &serde_json::Value| {
                            tracing::debug!(topic, %payload, "mqtt message received");
                        }),
                    )
                    .await;
            }
            Arc::new(client)
        }
        None => {
            info!("MQTT not configured, fan-out disabled");
            Arc::new(NullBroadcaster)
        }
    };

    let ingestor = Ingestor::builder(registries)
        .push(push_gateway(&config.push))
        .broadcaster(broadcaster)
        .cooldown(config.cooldown.mode, config.cooldown.window())
        .dedupe_window(config.orders.dedupe_window())
        .geofence_policy(GeofencePolicy {
            treat_missing_as_inside: config.ingest.treat_missing_as_inside,
        })
        .settings(IngestSettings {
            default_farm_id: config.ingest.default_farm_id.clone(),
            breach_contact_phone: config.ingest.breach_contact_phone.clone(),
            push_topic: config.push.topic.clone(),
            push_title: config.push.title.clone(),
            batch_timeout: config.ingest.batch_timeout(),
        })
        .build();
    let ingestor = Arc::new(ingestor);

    spawn_cooldown_eviction(ingestor.clone(), config.cooldown.window(), cancel.clone());

    run_server(ingestor, config.server.http_addr, cancel).await
}

fn push_gateway(config: &PushConfig) -> Arc<dyn PushGateway> {
    match (&config.kind, &config.endpoint) {
        (PushKind::Http, Some(endpoint)) => {
            info!(endpoint = %endpoint, "Using HTTP push gateway");
            match HttpPushGateway::new(endpoint.clone(), config.token.clone(), config.timeout()) {
                Ok(gateway) => Arc::new(gateway),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to build HTTP push client, logging notifications instead");
                    Arc::new(LogPushGateway)
                }
            }
        }
        (PushKind::Http, None) => {
            tracing::warn!("HTTP push configured without endpoint, logging notifications instead");
            Arc::new(LogPushGateway)
        }
        (PushKind::Log, _) => Arc::new(LogPushGateway),
    }
}

fn spawn_cooldown_eviction(ingestor: Arc<Ingestor>, window: Duration, cancel: CancellationToken) {
    let period = window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let evicted = ingestor.cooldown().evict_expired();
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted expired cooldown entries");
                    }
                }
            }
        }
    });
}

async fn run_server(
    ingestor: Arc<Ingestor>,
    http_addr: SocketAddr,
    cancel: CancellationToken,
) -> color_eyre::Result<()> {
    let app = api_router(ingestor);

    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_clone = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_clone.cancelled().await;
        }) => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    Ok(())
}
