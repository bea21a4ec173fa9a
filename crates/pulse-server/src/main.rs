//! `pulsed` — the Pulse gateway daemon.

use std::sync::Arc;

use tracing::{error, info};

use pulse_server::metrics;
use pulse_server::server::PulseServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = match pulse_settings::load_settings() {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "failed to load settings");
            std::process::exit(1);
        }
    };

    let prometheus = metrics::install_recorder();
    let server = Arc::new(PulseServer::new(settings.clone()).with_prometheus(prometheus));
    server.start();

    let app = server.router();
    let listener = match tokio::net::TcpListener::bind((
        settings.server.host.as_str(),
        settings.server.port,
    ))
    .await
    {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, host = settings.server.host, port = settings.server.port, "failed to bind");
            std::process::exit(1);
        }
    };
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "pulse gateway listening"),
        Err(err) => error!(%err, "failed to read local address"),
    }

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });
    if let Err(err) = serve.await {
        error!(%err, "server error");
    }

    server.stop().await;
    info!("pulse gateway stopped");
}
