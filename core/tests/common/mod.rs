#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]
//! Shared fixtures: every scenario runs once per store backend.

use std::sync::Arc;
use std::time::Duration;

use featureboard_core::{
    EngineConfig, Feature, FeatureEngine, MemoryStore, NewFeature, SqliteStore, Stage,
};
use tempfile::TempDir;

pub struct Harness {
    pub label: &'static str,
    pub engine: FeatureEngine,
    _dir: Option<TempDir>,
}

pub fn harnesses() -> Vec<Harness> {
    let dir = TempDir::new().expect("tempdir");
    let sqlite = SqliteStore::open(&dir.path().join("features.db"), Duration::from_secs(2))
        .expect("open sqlite store");
    let config = EngineConfig {
        conflict_retries: 10,
        conflict_backoff: Duration::from_millis(1),
    };
    vec![
        Harness {
            label: "memory",
            engine: FeatureEngine::with_config(Arc::new(MemoryStore::new()), config),
            _dir: None,
        },
        Harness {
            label: "sqlite",
            engine: FeatureEngine::with_config(Arc::new(sqlite), config),
            _dir: Some(dir),
        },
    ]
}

pub async fn create(engine: &FeatureEngine, title: &str, stage: Stage) -> Feature {
    engine
        .create_feature(NewFeature::new(title, format!("{title} description"), "alice").in_stage(stage))
        .await
        .expect("create feature")
}
