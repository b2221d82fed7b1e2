//! Portcullis API Gateway Server
//!
//! Server entry point: loads and validates configuration, builds the shared
//! gateway value and the request pipeline, and runs the Actix Web server
//! with the control surface, probe endpoints and the catch-all forwarder.

use std::sync::Arc;

use portcullis_rs::config::settings::load_settings;
use portcullis_rs::logs::logger::configure_logger;
use portcullis_rs::middleware::chain::Pipeline;
use portcullis_rs::models::settings::Settings;
use portcullis_rs::routes::{forward, health, management, metrics};
use portcullis_rs::services::gateway::Gateway;

use actix_web::{web, App, HttpServer};
use log::{error, info};
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings: Settings = load_settings().expect("Failed to load settings");

    info!(
        "Starting Portcullis API Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(message) = settings.validate() {
        error!("Configuration validation failed: {}", message);
        std::process::exit(1);
    }
    info!(
        "Configuration validated: {} backends, listen port {}",
        settings.backends.len(),
        settings.server.port
    );

    // Environment overrides for containerised deployments.
    let host = std::env::var("GATEWAY_HOST").unwrap_or_else(|_| settings.server.host.clone());
    let port = std::env::var("GATEWAY_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(settings.server.port);

    let gateway = Gateway::new(settings);
    let pipeline = Arc::new(Pipeline::standard(gateway.clone()));

    info!("Starting server on {}:{}", host, port);

    let server = HttpServer::new({
        let gateway = gateway.clone();
        let pipeline = pipeline.clone();
        move || {
            App::new()
                .app_data(web::Data::new(gateway.clone()))
                .app_data(web::Data::new(pipeline.clone()))
                .configure(health::configure_health)
                .configure(metrics::configure_metrics)
                .configure(management::configure_management)
                .default_service(web::to(forward::forward))
        }
    })
    .bind((host.as_str(), port))?
    .run();

    info!("Server started successfully");

    // Graceful shutdown handling
    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("Server stopped gracefully"),
                Err(e) => error!("Server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal, stopping server...");
        }
    }

    Ok(())
}
