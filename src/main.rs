use proxyshim::config::Config;
use proxyshim::gateway::Gateway;
use proxyshim::provider::AliyunClient;
use proxyshim::server::{ShimServer, PKG_NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("proxyshim=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let client = AliyunClient::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to create provider client: {}", e))?;
    let gateway = Arc::new(Gateway::from_config(&config, Arc::new(client)));

    let bind_addr = config.server.socket_addr().map_err(|e| {
        error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
        e
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = ShimServer::bind(bind_addr, gateway, shutdown_rx).await?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Command endpoint error");
        }
    });

    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);

    // In-flight commands are not cancelled; give the accept loop a moment to exit
    if tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .is_err()
    {
        warn!("Command endpoint did not stop within 5 seconds");
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting command endpoint");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        serialize_commands = config.server.serialize_commands,
        "Server configuration"
    );
    info!(
        replay_window_secs = config.auth.replay_window_secs,
        control_header = %config.platform.control_header,
        fault_status_header = %config.platform.fault_status_header,
        "Request handling settings"
    );
    info!(
        region = %config.provider.region_id,
        vpc_endpoint = %config.provider.vpc_endpoint(),
        eci_endpoint = %config.provider.eci_endpoint(),
        request_timeout_secs = config.provider.request_timeout_secs,
        "Provider settings"
    );
    info!(
        image = %config.workload.image,
        group_name = %config.workload.group_name,
        cpu = config.workload.cpu,
        memory = config.workload.memory,
        "Workload settings"
    );
    if !config.server.serialize_commands {
        warn!("Concurrent start/stop commands are not serialized (server.serialize_commands = false)");
    }
}
