//! In-memory [`FeatureStore`]. State is lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AppliedVote, FeatureStore, StoreError, sort_newest_first, stage_vote};
use crate::ledger::{LedgerWrite, VoteChange, VoteTally};
use crate::model::{Feature, FeatureId, Vote, VoteDirection};
use crate::stage::Stage;

#[derive(Default)]
struct Tables {
    features: HashMap<FeatureId, Feature>,
    votes: HashMap<(FeatureId, String), Vote>,
}

/// Features and ledger rows behind a single lock, so a vote and its counter
/// delta are always observed together.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn vote_key(id: &FeatureId, user_id: &str) -> (FeatureId, String) {
    (id.clone(), user_id.to_string())
}

#[async_trait]
impl FeatureStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn insert_feature(&self, feature: &Feature) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.features.contains_key(&feature.id) {
            return Err(StoreError::Conflict {
                id: feature.id.clone(),
            });
        }
        tables.features.insert(feature.id.clone(), feature.clone());
        Ok(())
    }

    async fn get_feature(&self, id: &FeatureId) -> Result<Option<Feature>, StoreError> {
        Ok(self.tables.read().await.features.get(id).cloned())
    }

    async fn replace_feature(
        &self,
        feature: &Feature,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let Some(current) = tables.features.get_mut(&feature.id) else {
            return Err(StoreError::NotFound {
                id: feature.id.clone(),
            });
        };
        if current.version != expected_version {
            return Err(StoreError::Conflict {
                id: feature.id.clone(),
            });
        }
        *current = feature.clone();
        Ok(())
    }

    async fn get_vote(&self, id: &FeatureId, user_id: &str) -> Result<Option<Vote>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .votes
            .get(&vote_key(id, user_id))
            .cloned())
    }

    async fn apply_vote(
        &self,
        id: &FeatureId,
        user_id: &str,
        change: VoteChange,
        at: DateTime<Utc>,
    ) -> Result<AppliedVote, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(current) = tables.features.get(id) else {
            return Err(StoreError::NotFound { id: id.clone() });
        };
        let key = vote_key(id, user_id);

        // Work on a copy; nothing is written unless every step succeeds.
        let mut feature = current.clone();
        let (outcome, write) = stage_vote(
            &mut feature,
            tables.votes.get(&key),
            user_id,
            change,
            at,
        )?;

        match write {
            LedgerWrite::Keep => {}
            LedgerWrite::Upsert(vote) => {
                tables.votes.insert(key, vote);
            }
            LedgerWrite::Delete => {
                tables.votes.remove(&key);
            }
        }
        tables.features.insert(id.clone(), feature.clone());
        Ok(AppliedVote { outcome, feature })
    }

    async fn list_by_stage(&self, stage: Stage) -> Result<Vec<Feature>, StoreError> {
        let tables = self.tables.read().await;
        let mut features: Vec<Feature> = tables
            .features
            .values()
            .filter(|f| f.stage == stage)
            .cloned()
            .collect();
        sort_newest_first(&mut features);
        Ok(features)
    }

    async fn tally_votes(&self, id: &FeatureId) -> Result<VoteTally, StoreError> {
        let tables = self.tables.read().await;
        if !tables.features.contains_key(id) {
            return Err(StoreError::NotFound { id: id.clone() });
        }
        let mut tally = VoteTally::default();
        for vote in tables.votes.values().filter(|v| &v.feature_id == id) {
            match vote.direction {
                VoteDirection::Up => tally.up += 1,
                VoteDirection::Down => tally.down += 1,
            }
        }
        Ok(tally)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feature(id: &str, stage: Stage, created_at: DateTime<Utc>) -> Feature {
        Feature {
            id: FeatureId::from(id),
            title: format!("title {id}"),
            description: "desc".to_string(),
            stage,
            progress: 0,
            votes_up: 0,
            votes_down: 0,
            subfeatures: vec![],
            quarter: None,
            expected_date: None,
            created_by: "alice".to_string(),
            created_at,
            last_modified_by: "alice".to_string(),
            last_modified_at: created_at,
            version: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryStore::new();
        let f = feature("a", Stage::Inbox, Utc::now());
        store
            .insert_feature(&f)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        assert!(matches!(
            store.insert_feature(&f).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn replace_rejects_stale_version() {
        let store = MemoryStore::new();
        let mut f = feature("a", Stage::Inbox, Utc::now());
        store
            .insert_feature(&f)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));

        f.title = "renamed".to_string();
        f.version = 2;
        store
            .replace_feature(&f, 1)
            .await
            .unwrap_or_else(|e| panic!("replace: {e}"));
        assert!(matches!(
            store.replace_feature(&f, 1).await,
            Err(StoreError::Conflict { .. })
        ));

        let missing = feature("missing", Stage::Inbox, Utc::now());
        assert!(matches!(
            store.replace_feature(&missing, 1).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn listing_is_newest_first_with_id_tiebreak() {
        let store = MemoryStore::new();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(1);
        for f in [
            feature("a", Stage::Suggested, t0),
            feature("b", Stage::Suggested, t1),
            feature("c", Stage::Suggested, t1),
            feature("d", Stage::Maybe, t1),
        ] {
            store
                .insert_feature(&f)
                .await
                .unwrap_or_else(|e| panic!("insert: {e}"));
        }
        let ids: Vec<String> = store
            .list_by_stage(Stage::Suggested)
            .await
            .unwrap_or_else(|e| panic!("list: {e}"))
            .into_iter()
            .map(|f| f.id.to_string())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn vote_and_counter_commit_together() {
        let store = MemoryStore::new();
        let f = feature("a", Stage::CollectingVotes, Utc::now());
        store
            .insert_feature(&f)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));

        let applied = store
            .apply_vote(&f.id, "bob", VoteChange::Cast(VoteDirection::Up), Utc::now())
            .await
            .unwrap_or_else(|e| panic!("vote: {e}"));
        assert_eq!(applied.feature.votes_up, 1);
        assert_eq!(applied.feature.version, 2);

        let tally = store
            .tally_votes(&f.id)
            .await
            .unwrap_or_else(|e| panic!("tally: {e}"));
        assert!(tally.matches(&applied.feature));
    }

    #[tokio::test]
    async fn corrupt_counters_abort_without_writing_the_row() {
        let store = MemoryStore::new();
        let mut f = feature("a", Stage::CollectingVotes, Utc::now());
        // ledger row exists but the cached counter says zero
        f.votes_up = 0;
        store
            .insert_feature(&f)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        {
            let mut tables = store.tables.write().await;
            tables.votes.insert(
                vote_key(&f.id, "bob"),
                Vote {
                    feature_id: f.id.clone(),
                    user_id: "bob".to_string(),
                    direction: VoteDirection::Up,
                    cast_at: Utc::now(),
                },
            );
        }

        let result = store
            .apply_vote(&f.id, "bob", VoteChange::Remove, Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        let still_there = store
            .get_vote(&f.id, "bob")
            .await
            .unwrap_or_else(|e| panic!("get_vote: {e}"));
        assert!(still_there.is_some());
    }
}
