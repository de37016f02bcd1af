use std::sync::Arc;

use tempsensor::cloud::WebSocketCloudService;
use tempsensor::config::{Settings, load_config};
use tempsensor::publisher::TemperaturePublisher;
use tempsensor::sensor::W1SensorSource;
use tempsensor::utils::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logger.level);

    if let Err(e) = run(settings).await {
        error!("tempsensor failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let sensors = Arc::new(W1SensorSource::new(&settings.sensors.devices_path));
    let cloud = Arc::new(WebSocketCloudService::new(settings.cloud.clone()));
    let component = Arc::new(TemperaturePublisher::new(cloud, sensors));

    component.activate(settings.to_properties()).await?;

    let mut reload = reload_signal()?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
            Some(()) = reload.recv() => {
                match load_config() {
                    Ok(settings) => {
                        if let Err(e) = component.updated(settings.to_properties()).await {
                            error!("Configuration update rejected: {}", e);
                        }
                    }
                    Err(e) => error!("Cannot reload configuration: {}", e),
                }
            }
        }
    }

    component.deactivate().await;
    Ok(())
}

/// Yields once per SIGHUP. Closed right away on platforms without it.
fn reload_signal() -> std::io::Result<tokio::sync::mpsc::Receiver<()>> {
    let (tx, rx) = tokio::sync::mpsc::channel(1);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("SIGHUP received, reloading configuration");
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });
    }
    #[cfg(not(unix))]
    drop(tx);

    Ok(rx)
}
