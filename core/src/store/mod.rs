//! Persistence seam for features and the vote ledger.
//!
//! Two backends ship: [`MemoryStore`] for tests and ephemeral services, and
//! [`SqliteStore`] for durable single-host deployments. Both uphold the same
//! contract:
//!
//! - `replace_feature` is a compare-and-swap on `Feature::version`.
//! - `apply_vote` reads the prior ledger row, resolves it, writes the row and
//!   applies the counter delta in one atomic unit. Concurrent calls for the
//!   same (feature, user) pair serialize; the second observes the first.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::FeatureError;
use crate::ledger::{LedgerWrite, VoteChange, VoteDelta, VoteOutcome, VoteTally, resolve};
use crate::model::{Feature, FeatureId, Vote};
use crate::stage::Stage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("feature not found: {id}")]
    NotFound { id: FeatureId },

    /// Version mismatch, duplicate id, or a lock held by another writer.
    #[error("conflicting write on {id}")]
    Conflict { id: FeatureId },

    #[error("{reason}")]
    Unavailable {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Stored data violates a model invariant.
    #[error("corrupt data: {detail}")]
    Corrupt { detail: String },
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn unavailable_with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for FeatureError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => FeatureError::NotFound { id },
            StoreError::Conflict { id } => FeatureError::Conflict { id, attempts: 1 },
            StoreError::Unavailable { reason, source } => {
                FeatureError::Unavailable { reason, source }
            }
            StoreError::Corrupt { detail } => FeatureError::InvariantViolation { detail },
        }
    }
}

/// A committed vote change together with the feature it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedVote {
    pub outcome: VoteOutcome,
    /// Feature after the counter delta; unchanged (same version) for no-ops.
    pub feature: Feature,
}

#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Short backend name for status output.
    fn backend(&self) -> &'static str;

    /// Insert a new feature. Fails with `Conflict` if the id is taken.
    async fn insert_feature(&self, feature: &Feature) -> Result<(), StoreError>;

    async fn get_feature(&self, id: &FeatureId) -> Result<Option<Feature>, StoreError>;

    /// Overwrite `feature` if the stored version still equals
    /// `expected_version`.
    async fn replace_feature(
        &self,
        feature: &Feature,
        expected_version: u64,
    ) -> Result<(), StoreError>;

    async fn get_vote(&self, id: &FeatureId, user_id: &str) -> Result<Option<Vote>, StoreError>;

    /// Atomically resolve and commit `change` for (`id`, `user_id`).
    async fn apply_vote(
        &self,
        id: &FeatureId,
        user_id: &str,
        change: VoteChange,
        at: DateTime<Utc>,
    ) -> Result<AppliedVote, StoreError>;

    /// Features in `stage`, newest first (`created_at` desc, then `id` desc).
    async fn list_by_stage(&self, stage: Stage) -> Result<Vec<Feature>, StoreError>;

    /// Count ledger rows for `id` by direction.
    async fn tally_votes(&self, id: &FeatureId) -> Result<VoteTally, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Resolve `change` against `prior` and apply its delta to `feature`.
///
/// Shared by the backends so the vote rules stay in [`crate::ledger`].
/// A non-empty delta also bumps the version. Votes leave
/// `last_modified_*` alone; those track edits and stage moves.
pub(crate) fn stage_vote(
    feature: &mut Feature,
    prior: Option<&Vote>,
    user_id: &str,
    change: VoteChange,
    at: DateTime<Utc>,
) -> Result<(VoteOutcome, LedgerWrite), StoreError> {
    let (outcome, write) = resolve(prior, change, &feature.id, user_id, at);
    if !outcome.delta.is_empty() {
        apply_delta(&outcome.delta, feature)?;
        feature.bump_version();
    }
    Ok((outcome, write))
}

fn apply_delta(delta: &VoteDelta, feature: &mut Feature) -> Result<(), StoreError> {
    delta.apply_to(feature).map_err(|err| match err {
        FeatureError::InvariantViolation { detail } => StoreError::Corrupt { detail },
        other => StoreError::corrupt(other.to_string()),
    })
}

/// Newest first, ties broken by id descending.
pub(crate) fn sort_newest_first(features: &mut [Feature]) {
    features.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
