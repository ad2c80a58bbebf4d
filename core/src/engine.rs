//! Feature Lifecycle Engine.
//!
//! Owns the rules: the transition table, vote application and publishing.
//! Holds no state between calls; everything shared lives in the
//! [`FeatureStore`]. Stage moves, edits and publish use an optimistic
//! compare-and-swap on `Feature::version` and are retried on conflict a
//! bounded number of times, re-reading and re-validating on each attempt.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use chrono::{DateTime, SubsecRound, Utc};

use crate::error::{FeatureError, Result};
use crate::ledger::{VoteLedger, VoteTally};
use crate::model::{
    Feature, FeatureId, FeaturePatch, NewFeature, VoteDirection, normalize_subfeatures,
    require_text,
};
use crate::stage::Stage;
use crate::store::FeatureStore;

/// Time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retries after the first attempt when a write loses a version race.
    pub conflict_retries: usize,
    /// Pause between conflict retries.
    pub conflict_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
            conflict_backoff: Duration::from_millis(5),
        }
    }
}

#[derive(Clone)]
pub struct FeatureEngine {
    store: Arc<dyn FeatureStore>,
    ledger: VoteLedger,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl FeatureEngine {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn FeatureStore>, config: EngineConfig) -> Self {
        Self {
            ledger: VoteLedger::new(Arc::clone(&store)),
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn FeatureStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_feature(&self, new: NewFeature) -> Result<Feature> {
        let stage = new.initial_stage.unwrap_or(Stage::Inbox);
        if stage == Stage::Published {
            return Err(FeatureError::invalid_argument(
                "features cannot be created as published; use publish",
            ));
        }
        let title = require_text("title", &new.title)?;
        let description = require_text("description", &new.description)?;
        let created_by = require_text("created_by", &new.created_by)?;
        let subfeatures = normalize_subfeatures(&new.subfeatures)?;
        let quarter = new
            .quarter
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_string);

        let now = self.now();
        let feature = Feature {
            id: FeatureId::generate(),
            title,
            description,
            stage,
            progress: 0,
            votes_up: 0,
            votes_down: 0,
            subfeatures,
            quarter,
            expected_date: new.expected_date,
            created_by: created_by.clone(),
            created_at: now,
            last_modified_by: created_by,
            last_modified_at: now,
            version: 1,
        };
        self.store.insert_feature(&feature).await?;

        tracing::info!(
            feature_id = %feature.id,
            stage = %feature.stage,
            created_by = %feature.created_by,
            "Feature created"
        );
        Ok(feature)
    }

    pub async fn get_feature(&self, id: &FeatureId) -> Result<Feature> {
        self.load(id).await
    }

    /// Field-level edit. Never touches `stage` or the vote counters.
    pub async fn update_feature(
        &self,
        id: &FeatureId,
        patch: &FeaturePatch,
        acting_user: &str,
    ) -> Result<Feature> {
        let acting = require_text("acting_user", acting_user)?;
        let acting_user = acting.as_str();
        if patch.is_empty() {
            return Err(FeatureError::invalid_argument("patch contains no fields"));
        }

        let updated = self
            .with_conflict_retry(id, "update", || async move {
                let mut feature = self.load(id).await?;
                let expected = feature.version;
                patch.apply(&mut feature)?;
                feature.touch(acting_user, self.now());
                self.store.replace_feature(&feature, expected).await?;
                Ok(feature)
            })
            .await?;

        tracing::info!(feature_id = %id, version = updated.version, "Feature updated");
        Ok(updated)
    }

    /// Move along one edge of the transition table.
    ///
    /// `Upcoming -> Published` here has the same side effects as
    /// [`FeatureEngine::publish`] but is not idempotent: a second move fails
    /// with `InvalidTransition`.
    pub async fn move_stage(
        &self,
        id: &FeatureId,
        target: Stage,
        acting_user: &str,
    ) -> Result<Feature> {
        let acting = require_text("acting_user", acting_user)?;
        let acting_user = acting.as_str();

        let (from, moved) = self
            .with_conflict_retry(id, "move", || async move {
                let mut feature = self.load(id).await?;
                let from = feature.stage;
                if !from.can_transition_to(target) {
                    return Err(FeatureError::InvalidTransition {
                        id: id.clone(),
                        from,
                        to: target,
                    });
                }
                let expected = feature.version;
                feature.stage = target;
                if target == Stage::Published {
                    feature.progress = 100;
                }
                feature.touch(acting_user, self.now());
                self.store.replace_feature(&feature, expected).await?;
                Ok((from, feature))
            })
            .await?;

        tracing::info!(
            feature_id = %id,
            from = %from,
            to = %target,
            acting_user = %acting_user,
            "Stage moved"
        );
        Ok(moved)
    }

    /// Publish an `Upcoming` feature. Publishing an already published feature
    /// succeeds and changes nothing.
    pub async fn publish(&self, id: &FeatureId, acting_user: &str) -> Result<Feature> {
        let acting = require_text("acting_user", acting_user)?;
        let acting_user = acting.as_str();

        let (changed, feature) = self
            .with_conflict_retry(id, "publish", || async move {
                let mut feature = self.load(id).await?;
                match feature.stage {
                    Stage::Published => Ok((false, feature)),
                    Stage::Upcoming => {
                        let expected = feature.version;
                        feature.stage = Stage::Published;
                        feature.progress = 100;
                        feature.touch(acting_user, self.now());
                        self.store.replace_feature(&feature, expected).await?;
                        Ok((true, feature))
                    }
                    from => Err(FeatureError::InvalidTransition {
                        id: id.clone(),
                        from,
                        to: Stage::Published,
                    }),
                }
            })
            .await?;

        if changed {
            tracing::info!(feature_id = %id, acting_user = %acting_user, "Feature published");
        } else {
            tracing::debug!(feature_id = %id, "Publish is a no-op; already published");
        }
        Ok(feature)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Voting
    // ─────────────────────────────────────────────────────────────────────

    /// Cast or flip `user_id`'s vote. Allowed in every stage.
    pub async fn vote(
        &self,
        id: &FeatureId,
        user_id: &str,
        direction: VoteDirection,
    ) -> Result<Feature> {
        let applied = self
            .with_conflict_retry(id, "vote", || async move {
                self.ledger
                    .cast_vote(id, user_id, direction, self.now())
                    .await
            })
            .await?;
        Ok(applied.feature)
    }

    /// Withdraw `user_id`'s vote; a no-op when there is none.
    pub async fn remove_vote(&self, id: &FeatureId, user_id: &str) -> Result<Feature> {
        let applied = self
            .with_conflict_retry(id, "unvote", || async move {
                self.ledger
                    .remove_vote(id, user_id, self.now())
                    .await
            })
            .await?;
        Ok(applied.feature)
    }

    pub async fn user_vote(
        &self,
        id: &FeatureId,
        user_id: &str,
    ) -> Result<Option<VoteDirection>> {
        self.ledger.get_vote(id, user_id).await
    }

    /// Recount the ledger and compare it with the cached counters.
    pub async fn audit_votes(&self, id: &FeatureId) -> Result<VoteTally> {
        self.with_conflict_retry(id, "audit", || async move {
            let before = self.load(id).await?;
            let tally = self.ledger.tally(id).await?;
            let after = self.load(id).await?;
            // A vote landed between the reads; the comparison is meaningless.
            if before.version != after.version {
                return Err(FeatureError::Conflict {
                    id: id.clone(),
                    attempts: 1,
                });
            }
            if !tally.matches(&after) {
                tracing::error!(
                    feature_id = %id,
                    cached_up = after.votes_up,
                    cached_down = after.votes_down,
                    ledger_up = tally.up,
                    ledger_down = tally.down,
                    "Vote counters disagree with ledger"
                );
                return Err(FeatureError::invariant(format!(
                    "feature {id}: counters up={} down={} but ledger has up={} down={}",
                    after.votes_up, after.votes_down, tally.up, tally.down
                )));
            }
            Ok(tally)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Snapshot of the features in `stage`, newest first.
    pub async fn list_by_stage(&self, stage: Stage) -> Result<StageListing> {
        let features = self.store.list_by_stage(stage).await?;
        Ok(StageListing {
            stage,
            items: features.into(),
        })
    }

    /// Current time at storage precision (microseconds).
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    async fn load(&self, id: &FeatureId) -> Result<Feature> {
        self.store
            .get_feature(id)
            .await?
            .ok_or_else(|| FeatureError::NotFound { id: id.clone() })
    }

    /// Run `op`, retrying only `Conflict` with a constant backoff.
    async fn with_conflict_retry<T, F, Fut>(
        &self,
        id: &FeatureId,
        op_name: &'static str,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff = ConstantBuilder::default()
            .with_delay(self.config.conflict_backoff)
            .with_max_times(self.config.conflict_retries);

        op.retry(backoff)
            .when(FeatureError::is_conflict)
            .notify(|err: &FeatureError, delay: Duration| {
                tracing::warn!(
                    feature_id = %id,
                    op = op_name,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Conflicting write, retrying"
                );
            })
            .await
            .map_err(|err| match err {
                FeatureError::Conflict { id, .. } => FeatureError::Conflict {
                    id,
                    attempts: self.config.conflict_retries + 1,
                },
                other => other,
            })
    }
}

/// Restartable snapshot of one stage.
///
/// Iteration is lazy over the captured rows; iterating twice yields the same
/// items, and features created after the snapshot never appear.
#[derive(Debug, Clone)]
pub struct StageListing {
    stage: Stage,
    items: Arc<[Feature]>,
}

impl StageListing {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.items.iter()
    }

    /// Window of at most `limit` items starting at `offset`.
    pub fn page(&self, offset: usize, limit: usize) -> &[Feature] {
        let start = offset.min(self.items.len());
        let end = start.saturating_add(limit).min(self.items.len());
        &self.items[start..end]
    }
}

impl<'a> IntoIterator for &'a StageListing {
    type Item = &'a Feature;
    type IntoIter = std::slice::Iter<'a, Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for StageListing {
    type Item = Feature;
    type IntoIter = StageListingIter;

    fn into_iter(self) -> Self::IntoIter {
        StageListingIter {
            items: self.items,
            next: 0,
        }
    }
}

/// Owning iterator over a [`StageListing`]; clones one feature per step.
#[derive(Debug, Clone)]
pub struct StageListingIter {
    items: Arc<[Feature]>,
    next: usize,
}

impl Iterator for StageListingIter {
    type Item = Feature;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.get(self.next)?.clone();
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.items.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for StageListingIter {}
