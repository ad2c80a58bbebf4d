//! Vote Ledger: one vote per (feature, user), and the deltas that keep the
//! cached counters on [`Feature`] equal to the ledger contents.
//!
//! Resolution is pure ([`resolve`]); committing the resolved row write and the
//! counter delta as a single atomic unit is the store's job
//! ([`FeatureStore::apply_vote`]). Every store implementation calls
//! [`resolve`] inside its critical section so the rules live in one place.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeatureError, Result};
use crate::model::{Feature, FeatureId, Vote, VoteDirection};
use crate::store::{AppliedVote, FeatureStore};

/// Requested change to a user's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChange {
    Cast(VoteDirection),
    Remove,
}

/// Signed change to the up/down counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDelta {
    pub up: i64,
    pub down: i64,
}

impl VoteDelta {
    fn single(direction: VoteDirection, amount: i64) -> Self {
        let mut delta = Self::default();
        delta.add(direction, amount);
        delta
    }

    fn add(&mut self, direction: VoteDirection, amount: i64) {
        match direction {
            VoteDirection::Up => self.up += amount,
            VoteDirection::Down => self.down += amount,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.up == 0 && self.down == 0
    }

    /// Apply to the cached counters on `feature`.
    ///
    /// Fails instead of clamping when a counter would go negative: that can
    /// only happen if the cache already disagrees with the ledger.
    pub fn apply_to(&self, feature: &mut Feature) -> Result<()> {
        let up = apply_signed(feature.votes_up, self.up);
        let down = apply_signed(feature.votes_down, self.down);
        match (up, down) {
            (Some(up), Some(down)) => {
                feature.votes_up = up;
                feature.votes_down = down;
                Ok(())
            }
            _ => Err(FeatureError::invariant(format!(
                "vote delta {self:?} would make counters of {} negative (up={}, down={})",
                feature.id, feature.votes_up, feature.votes_down
            ))),
        }
    }
}

fn apply_signed(counter: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        counter.checked_add(delta.unsigned_abs())
    } else {
        counter.checked_sub(delta.unsigned_abs())
    }
}

/// Result of a ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    /// Direction now held by the user, `None` after a removal.
    pub applied: Option<VoteDirection>,
    pub delta: VoteDelta,
}

/// Row-level write produced by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerWrite {
    /// Nothing to persist.
    Keep,
    /// Insert or overwrite the (feature, user) row.
    Upsert(Vote),
    /// Delete the (feature, user) row.
    Delete,
}

/// Resolve `change` against the user's current ledger row.
///
/// - no prior vote + cast: insert, `+1` on the cast direction
/// - same direction: no-op, empty delta
/// - opposite direction: flip, `-1` old / `+1` new
/// - remove: delete if present, negative delta; no-op otherwise
pub fn resolve(
    prior: Option<&Vote>,
    change: VoteChange,
    feature_id: &FeatureId,
    user_id: &str,
    at: DateTime<Utc>,
) -> (VoteOutcome, LedgerWrite) {
    let row = |direction| Vote {
        feature_id: feature_id.clone(),
        user_id: user_id.to_string(),
        direction,
        cast_at: at,
    };

    match (prior, change) {
        (None, VoteChange::Cast(direction)) => (
            VoteOutcome {
                applied: Some(direction),
                delta: VoteDelta::single(direction, 1),
            },
            LedgerWrite::Upsert(row(direction)),
        ),
        (Some(prior), VoteChange::Cast(direction)) if prior.direction == direction => (
            VoteOutcome {
                applied: Some(direction),
                delta: VoteDelta::default(),
            },
            LedgerWrite::Keep,
        ),
        (Some(prior), VoteChange::Cast(direction)) => {
            let mut delta = VoteDelta::single(prior.direction, -1);
            delta.add(direction, 1);
            (
                VoteOutcome {
                    applied: Some(direction),
                    delta,
                },
                LedgerWrite::Upsert(row(direction)),
            )
        }
        (Some(prior), VoteChange::Remove) => (
            VoteOutcome {
                applied: None,
                delta: VoteDelta::single(prior.direction, -1),
            },
            LedgerWrite::Delete,
        ),
        (None, VoteChange::Remove) => (
            VoteOutcome {
                applied: None,
                delta: VoteDelta::default(),
            },
            LedgerWrite::Keep,
        ),
    }
}

/// Ledger row counts for one feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub up: u64,
    pub down: u64,
}

impl VoteTally {
    /// Whether the cached counters on `feature` agree with this tally.
    pub fn matches(&self, feature: &Feature) -> bool {
        self.up == feature.votes_up && self.down == feature.votes_down
    }
}

/// Authoritative per-user voting record.
#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn FeatureStore>,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self { store }
    }

    /// Cast (or flip) `user_id`'s vote. The counter delta is committed in the
    /// same atomic unit; the returned feature carries the updated counters.
    pub async fn cast_vote(
        &self,
        feature_id: &FeatureId,
        user_id: &str,
        direction: VoteDirection,
        at: DateTime<Utc>,
    ) -> Result<AppliedVote> {
        self.commit(feature_id, user_id, VoteChange::Cast(direction), at)
            .await
    }

    /// Delete `user_id`'s vote if present.
    pub async fn remove_vote(
        &self,
        feature_id: &FeatureId,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<AppliedVote> {
        self.commit(feature_id, user_id, VoteChange::Remove, at)
            .await
    }

    pub async fn get_vote(
        &self,
        feature_id: &FeatureId,
        user_id: &str,
    ) -> Result<Option<VoteDirection>> {
        let user_id = validate_user(user_id)?;
        if self.store.get_feature(feature_id).await?.is_none() {
            return Err(FeatureError::NotFound {
                id: feature_id.clone(),
            });
        }
        Ok(self
            .store
            .get_vote(feature_id, user_id)
            .await?
            .map(|vote| vote.direction))
    }

    /// Recount ledger rows for `feature_id`.
    pub async fn tally(&self, feature_id: &FeatureId) -> Result<VoteTally> {
        Ok(self.store.tally_votes(feature_id).await?)
    }

    async fn commit(
        &self,
        feature_id: &FeatureId,
        user_id: &str,
        change: VoteChange,
        at: DateTime<Utc>,
    ) -> Result<AppliedVote> {
        let user_id = validate_user(user_id)?;
        let applied = self
            .store
            .apply_vote(feature_id, user_id, change, at)
            .await?;
        tracing::debug!(
            feature_id = %feature_id,
            user_id,
            ?change,
            delta_up = applied.outcome.delta.up,
            delta_down = applied.outcome.delta.down,
            "Vote committed"
        );
        Ok(applied)
    }
}

fn validate_user(user_id: &str) -> Result<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(FeatureError::invalid_argument("user_id must not be empty"));
    }
    Ok(trimmed)
}
