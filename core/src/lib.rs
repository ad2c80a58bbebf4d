//! `featureboard-core`: feature request lifecycle and voting engine.
//!
//! Tracks user-suggested features through review stages, records one vote
//! per (feature, user) and keeps the cached up/down counters equal to the
//! ledger. Callers go through [`FeatureEngine`]; persistence sits behind the
//! [`FeatureStore`] trait with in-memory and SQLite implementations.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod model;
pub mod stage;
pub mod store;

pub use config::{ConfigError, FeatureboardConfig, StoreBackend};
pub use engine::{
    Clock, EngineConfig, FeatureEngine, ManualClock, StageListing, SystemClock,
};
pub use error::{FeatureError, Result};
pub use ledger::{VoteChange, VoteDelta, VoteLedger, VoteOutcome, VoteTally};
pub use model::{Feature, FeatureId, FeaturePatch, NewFeature, Vote, VoteDirection};
pub use stage::Stage;
pub use store::{AppliedVote, FeatureStore, MemoryStore, SqliteStore, StoreError};
