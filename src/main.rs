use sealbus::{
    config::AppConfig,
    context::{ChannelContext, CommandBindings},
    secrets::TrustStore,
    transport::{responder_router, ResponderState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging first; SEALBUS_LOG_FORMAT=json for structured output
    let json_logs = std::env::var("SEALBUS_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealbus=debug,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    info!("Starting sealbus responder v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    if config.trust.private_value.is_none() {
        error!("No trusted private value configured!");
        error!("Generate keys with: sealbus-cli key-pair --params group.dh --prefix keys/bob");
        error!("Then set trust.private_value in config/default.toml or SEALBUS_TRUST__PRIVATE_VALUE env var");
        return Err(anyhow::anyhow!("Trusted private value not configured"));
    }

    let trust = Arc::new(TrustStore::load(&config.trust)?);
    let commands = CommandBindings::from_config(&config.commands)?;
    info!("Command bindings: {:?}", commands);

    let context = Arc::new(ChannelContext::new(trust, commands)?);
    let preshared = context.register_preshared(&config.trust.preshared)?;
    if preshared > 0 {
        info!("Registered {} pre-shared channel(s)", preshared);
    }
    let state = Arc::new(ResponderState::new(context, config.server.silent));

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Responder listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, responder_router(state)).await {
        error!("Responder server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
