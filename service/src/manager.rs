//! Service-wide state shared by every connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use featureboard_core::FeatureEngine;

pub struct FeatureboardManager {
    engine: FeatureEngine,
    socket_path: PathBuf,
    started_at: Instant,
    connection_count: AtomicU32,
}

impl FeatureboardManager {
    pub fn new(engine: FeatureEngine, socket_path: PathBuf) -> Self {
        Self {
            engine,
            socket_path,
            started_at: Instant::now(),
            connection_count: AtomicU32::new(0),
        }
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn connection_count(&self) -> u32 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Count a connection until the returned guard is dropped.
    pub fn track_connection(&self) -> ConnectionGuard<'_> {
        self.connection_count.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            count: &self.connection_count,
        }
    }
}

pub struct ConnectionGuard<'a> {
    count: &'a AtomicU32,
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
