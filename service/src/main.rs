//! `featureboard-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): open the configured store, bind the socket
//!   and serve until Ctrl+C.
//! - **`--ping`**: connect to the running service socket, send a hello
//!   handshake, verify the response, then exit.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use featureboard_core::{FeatureEngine, FeatureboardConfig};
use featureboard_service::manager::FeatureboardManager;

fn socket_path(config: &FeatureboardConfig) -> PathBuf {
    config
        .resolved_socket_path()
        .unwrap_or_else(featureboard_service::default_socket_path)
}

fn ping(path: &Path) -> std::io::Result<()> {
    let mut stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
        std::io::Error::other(format!("ping: cannot connect to {}: {e}", path.display()))
    })?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(std::time::Duration::from_secs(5)))?;

    let hello = format!(
        r#"{{"id":0,"method":"hello","params":{{"protocol_version":"{}","client_version":"ping"}}}}"#,
        featureboard_service::PROTOCOL_VERSION,
    );
    stream.write_all(hello.as_bytes())?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = std::io::BufReader::new(&stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    let resp: serde_json::Value = serde_json::from_str(line.trim())
        .map_err(|e| std::io::Error::other(format!("ping: invalid response JSON: {e}")))?;
    if resp.get("result").is_some() {
        eprintln!("ping: service is alive");
        Ok(())
    } else {
        let msg = resp
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        Err(std::io::Error::other(format!("ping: hello failed: {msg}")))
    }
}

fn main() -> std::io::Result<()> {
    let config = FeatureboardConfig::load()
        .map_err(|e| std::io::Error::other(format!("Failed to load config: {e}")))?;

    if std::env::args().nth(1).as_deref() == Some("--ping") {
        return ping(&socket_path(&config));
    }

    run_service(config)
}

#[tokio::main]
async fn run_service(config: FeatureboardConfig) -> std::io::Result<()> {
    let default_filter = config.log_filter.clone();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("featureboard-service v{} starting", env!("CARGO_PKG_VERSION"));

    let store = config
        .store
        .open()
        .map_err(|e| std::io::Error::other(format!("Failed to open feature store: {e}")))?;
    tracing::info!(backend = store.backend(), "Feature store ready");

    let engine = FeatureEngine::with_config(store, config.engine_config());
    let path = socket_path(&config);
    let manager = Arc::new(FeatureboardManager::new(engine, path.clone()));

    let listener = featureboard_service::ipc::bind_socket(&path)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mgr_signal = Arc::clone(&manager);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(
            "Signal received, shutting down (open connections: {})",
            mgr_signal.connection_count()
        );
        let _ = shutdown_tx.send(true);
    });

    featureboard_service::ipc::serve(manager, listener, shutdown_rx).await?;

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::warn!(path = %path.display(), "Could not remove socket: {e}");
    }
    tracing::info!("featureboard-service exiting cleanly");
    Ok(())
}
