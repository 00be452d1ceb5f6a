use anyhow::Result;
use router_core::registry::build_registry;
use router_core::{LogFormat, Router, RouterConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod http;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ROUTER_CONFIG").ok())
        .map(PathBuf::from);
    let config = RouterConfig::load(config_path.as_deref())?;

    init_tracing(config.log_format);

    info!("Starting router-controller...");
    if let Some(path) = &config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let registry = build_registry(&config.registry).await?;
    info!("Registry initialized ({})", registry.name());

    let metrics_address = config.metrics_address.clone();
    let router = Router::new(config.into_options(registry))?;
    router.start().await?;

    // Adverts go to the log until a transport is attached
    let mut adverts = router.advertise().await?;
    tokio::spawn(async move {
        while let Some(advert) = adverts.recv().await {
            info!(
                "Advert {} from {}: {} events",
                advert.advert_type,
                advert.id,
                advert.events.len()
            );
            for event in &advert.events {
                debug!("  {}", event);
            }
        }
        debug!("Advert subscription closed");
    });

    if let Some(address) = metrics_address {
        let addr: SocketAddr = address.parse()?;
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP server listening on {}", addr);

        let router = router.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(listener, router).await {
                error!("HTTP server error: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping router...");
    router.stop().await?;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
