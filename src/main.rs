use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use picam_rtc::config::AppConfig;
use picam_rtc::state::AppState;
use picam_rtc::web;
use picam_rtc::webrtc::SessionManager;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// picam-rtc command line arguments
///
/// Capture settings come from the `PI_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "picam-rtc")]
#[command(version, about = "Raspberry Pi camera and microphone over WebRTC", long_about = None)]
struct CliArgs {
    /// Listen address
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting picam-rtc v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::from_env()?;
    if let Some(addr) = args.address {
        config.web.bind_address = addr;
    }
    if let Some(port) = args.port {
        config.web.http_port = port;
    }

    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.http_port);

    tracing::info!(
        "Camera {} default {}x{} @ {} fps, awb {}",
        config.video.device.display(),
        config.video.width,
        config.video.height,
        config.video.fps,
        config.video.awb_mode.as_deref().unwrap_or("default")
    );
    tracing::info!(
        "ICE: {} STUN, {} TURN server(s)",
        config.stream.stun_servers.len(),
        config.stream.turn_servers.len()
    );

    let sessions = Arc::new(SessionManager::with_system_devices(&config));
    let state = AppState::new(config, sessions);
    let app = web::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on http://{}", listener.local_addr()?);

    let shutdown_signal = async move {
        wait_for_signal().await;
        tracing::info!("Shutdown signal received");
    };

    tokio::select! {
        _ = shutdown_signal => {
            cleanup(&state).await;
        }
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
            cleanup(&state).await;
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "picam_rtc=error,tower_http=error",
        LogLevel::Warn => "picam_rtc=warn,tower_http=warn",
        LogLevel::Info => "picam_rtc=info,tower_http=info",
        LogLevel::Verbose => "picam_rtc=debug,tower_http=info",
        LogLevel::Debug => "picam_rtc=debug,tower_http=debug",
        LogLevel::Trace => "picam_rtc=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Ctrl-C, or SIGTERM on unix
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Close every session before exit so the camera and microphone are released
async fn cleanup(state: &Arc<AppState>) {
    state.signaling.handle_shutdown().await;
    tracing::info!("All sessions closed");
}
