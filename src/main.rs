use std::path::PathBuf;

use lenz_bridge::config::{BridgeConfig, CONFIG_ENV};
use lenz_bridge::peer::{start_peer, InvokeRouter, PeerConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from));
    let config = BridgeConfig::load(config_path).unwrap_or_else(|err| {
        eprintln!("Failed to load bridge configuration: {err}");
        std::process::exit(1);
    });

    let bootstrap = config.bootstrap().unwrap_or_else(|err| {
        eprintln!("Invalid bridge configuration: {err}");
        std::process::exit(1);
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| {
            eprintln!("Failed to start async runtime: {err}");
            std::process::exit(1);
        });

    rt.block_on(async move {
        let peer = start_peer(
            config.listen,
            PeerConfig {
                router: InvokeRouter::with_builtins(),
                bootstrap,
                asset_root: config.asset_root.clone(),
            },
        )
        .await
        .unwrap_or_else(|err| {
            eprintln!("Failed to start invoke peer on {}: {err}", config.listen);
            std::process::exit(1);
        });

        tracing::info!(
            window_id = %config.window_id,
            protocol = ?config.protocol,
            "bridge ready at http://{}/",
            peer.addr
        );

        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to wait for ctrl-c");
        }

        tracing::info!("shutting down");
        peer.shutdown().await;
    });
}
