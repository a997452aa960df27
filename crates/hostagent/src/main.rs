//! Remote Session Gateway host agent.
//!
//! Headless background process that exposes local PTYs and managed child
//! services to paired remote clients over an authenticated, TLS-terminated
//! WebSocket link.

mod auth_gate;
mod cert_manager;
mod client;
mod config;
mod gateway;
mod origin_filter;
mod pty_pool;
mod router;
mod secret_store;
mod service_supervisor;
mod session_registry;
mod tailscale;

use crate::auth_gate::AuthGate;
use crate::cert_manager::CertManager;
use crate::config::AgentConfig;
use crate::gateway::Gateway;
use crate::origin_filter::OriginFilter;
use crate::pty_pool::PtyPool;
use crate::router::Router;
use crate::secret_store::SecretStore;
use crate::service_supervisor::ServiceSupervisor;
use crate::session_registry::SessionRegistry;

use anyhow::{Context, Result};
use clap::Parser;
use gateway_core::types::PairingPayload;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Remote Session Gateway host agent.
#[derive(Parser, Debug)]
#[command(name = "gateway-agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Headless agent exposing local PTYs and services over an authenticated WebSocket link")]
struct Args {
    /// Bind address for the gateway listener.
    #[arg(long, default_value = "0.0.0.0:9876")]
    bind: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to config.json; defaults to the platform data directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accept connections from any origin, not just loopback/Tailscale CGNAT.
    #[arg(long, default_value = "false")]
    no_tailscale: bool,

    /// Regenerate the TLS certificate even if one already exists.
    #[arg(long, default_value = "false")]
    regenerate_cert: bool,

    /// Generate a new auth token, invalidating the old one, and print a
    /// fresh pairing QR code instead of reusing the stored token.
    #[arg(long, default_value = "false")]
    rotate_token: bool,
}

fn data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("remote-session-gateway"))
        .ok_or_else(|| gateway_core::AgentError::NoDataDir.into())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    setup_logging(&args.log_level)?;
    info!("starting gateway-agent v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;

    let config_path = args.config.unwrap_or_else(|| data_dir.join("config.json"));
    let mut agent_config = AgentConfig::load(&config_path).context("failed to load config.json")?;
    if args.no_tailscale {
        agent_config.connection.restrict_to_tailscale = false;
    }

    let secret_store = SecretStore::new(&data_dir);
    if let Some(legacy) = agent_config.take_legacy_auth_token() {
        info!("migrating legacy auth token out of config.json");
        if let Ok(token) = gateway_core::AuthToken::from_hex(&legacy) {
            secret_store.adopt_token(&token)?;
        } else {
            warn!("legacy auth token in config.json was not valid hex, discarding it");
        }
        agent_config.save(&config_path).context("failed to persist migrated config")?;
    }
    let auth_token = if args.rotate_token {
        info!("rotating auth token");
        secret_store.rotate_auth_token()?
    } else {
        secret_store.get_auth_token()?
    };

    let tailscale_ip = tailscale::detect_ipv4();
    if tailscale_ip.is_none() && agent_config.connection.restrict_to_tailscale {
        warn!("tailscale IP not detected; pairing will rely on loopback access only");
    }

    let cert_manager = CertManager::new(&data_dir);
    let cert_info = if args.regenerate_cert {
        cert_manager.regenerate(tailscale_ip)?
    } else {
        cert_manager.initialize(tailscale_ip)?
    };
    info!(fingerprint = %cert_info.fingerprint, "certificate ready");

    let bind_addr: SocketAddr = args.bind.parse().with_context(|| format!("invalid bind address: {}", args.bind))?;

    let pairing = PairingPayload::new(
        tailscale_ip.map(|ip| ip.to_string()).unwrap_or_else(|| "127.0.0.1".to_string()),
        bind_addr.port(),
        auth_token.to_hex(),
        cert_info.fingerprint.clone(),
    );
    print_pairing_banner(&pairing);

    let (pty_events_tx, pty_events_rx) = tokio::sync::mpsc::channel(256);
    let (service_events_tx, service_events_rx) = tokio::sync::mpsc::channel(256);

    let pty_pool = Arc::new(PtyPool::new(pty_events_tx));
    let supervisor = Arc::new(ServiceSupervisor::new(service_events_tx));
    let session_registry = Arc::new(SessionRegistry::new());
    let auth_gate = Arc::new(AuthGate::new(auth_token));
    let router = Arc::new(Router::new(pty_pool.clone(), supervisor.clone(), session_registry.clone(), auth_gate));

    spawn_event_pumps(router.clone(), pty_events_rx, service_events_rx);

    for definition in &agent_config.services {
        let auto_start = definition.auto_start;
        if let Err(e) = supervisor.register(definition.clone()).await {
            warn!(service = %definition.id, error = %e, "failed to register configured service");
            continue;
        }
        if auto_start {
            if let Err(e) = supervisor.start(&definition.id).await {
                warn!(service = %definition.id, error = %e, "failed to auto-start service");
            }
        }
    }

    let origin_filter = OriginFilter::new(agent_config.connection.restrict_to_tailscale);
    let gateway = Arc::new(Gateway::new(router, origin_filter));

    let gateway_task = {
        let gateway = gateway.clone();
        let cert_pem = cert_info.cert_pem.clone().into_bytes();
        let key_pem = cert_info.key_pem.clone().into_bytes();
        tokio::spawn(async move { gateway.serve(bind_addr, &cert_pem, &key_pem).await })
    };

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        result = gateway_task => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "gateway exited with error");
            }
        }
    }

    info!("stopping services");
    supervisor.stop_all().await;
    info!("closing gateway");
    gateway.close();

    info!("shutdown complete");
    Ok(())
}

fn spawn_event_pumps(
    router: Arc<Router>,
    mut pty_events: tokio::sync::mpsc::Receiver<pty_pool::PtyEvent>,
    mut service_events: tokio::sync::mpsc::Receiver<service_supervisor::ServiceEvent>,
) {
    let pty_router = router.clone();
    tokio::spawn(async move {
        while let Some(event) = pty_events.recv().await {
            pty_router.dispatch_pty_event(event).await;
        }
    });

    tokio::spawn(async move {
        while let Some(event) = service_events.recv().await {
            router.dispatch_service_event(event).await;
        }
    });
}

fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::builder().with_default_directive(log_level.into()).from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn print_pairing_banner(pairing: &PairingPayload) {
    println!("============================================");
    println!("Remote Session Gateway pairing info");
    println!("============================================");
    match pairing.to_qr_unicode() {
        Ok(qr) => println!("{qr}"),
        Err(e) => warn!(error = %e, "failed to render pairing QR code"),
    }
    println!("Host:        {}", pairing.host);
    println!("Port:        {}", pairing.port);
    println!("Token:       {}", pairing.token);
    println!("Fingerprint: {}", pairing.cert_fingerprint);
    println!("============================================");
}
