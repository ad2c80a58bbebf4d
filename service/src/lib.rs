//! `featureboard-service`: per-user feature board service.
//!
//! Listens on a Unix domain socket at `$XDG_RUNTIME_DIR/featureboard.sock`
//! and speaks newline-delimited JSON-RPC-lite. Every request is dispatched
//! to a [`featureboard_core::FeatureEngine`].

pub mod ipc;
pub mod jsonrpc;
pub mod manager;
pub mod protocol;

/// Protocol version for the service IPC.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Default socket filename.
pub const SOCKET_FILENAME: &str = "featureboard.sock";

/// Default socket path under `XDG_RUNTIME_DIR`.
///
/// Falls back to `/tmp/featureboard-<username>.sock` if XDG_RUNTIME_DIR is not set.
pub fn default_socket_path() -> std::path::PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        std::path::PathBuf::from(runtime_dir).join(SOCKET_FILENAME)
    } else {
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        std::path::PathBuf::from(format!("/tmp/featureboard-{user}.sock"))
    }
}
