//! SQLite-backed [`FeatureStore`].
//!
//! One connection guarded by a mutex; every call runs on the blocking pool.
//! Writes use `BEGIN IMMEDIATE` so the write lock is taken before the first
//! read, which keeps read-resolve-write sequences serialized across
//! processes sharing the file. `SQLITE_BUSY` after the busy timeout surfaces
//! as [`StoreError::Conflict`].
//!
//! Schema versions are tracked in `PRAGMA user_version`; each entry in
//! [`MIGRATIONS`] moves the database forward by one.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};

use super::{AppliedVote, FeatureStore, StoreError, stage_vote};
use crate::ledger::{LedgerWrite, VoteChange, VoteTally};
use crate::model::{Feature, FeatureId, Vote, VoteDirection};
use crate::stage::Stage;

const MIGRATIONS: &[&str] = &[
    // 1: features + vote ledger
    r#"
    CREATE TABLE features (
        id               TEXT PRIMARY KEY,
        title            TEXT NOT NULL,
        description      TEXT NOT NULL,
        stage            TEXT NOT NULL,
        progress         INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
        votes_up         INTEGER NOT NULL DEFAULT 0 CHECK (votes_up >= 0),
        votes_down       INTEGER NOT NULL DEFAULT 0 CHECK (votes_down >= 0),
        subfeatures      TEXT NOT NULL DEFAULT '[]',
        quarter          TEXT,
        expected_date    TEXT,
        created_by       TEXT NOT NULL,
        created_at       INTEGER NOT NULL,
        last_modified_by TEXT NOT NULL,
        last_modified_at INTEGER NOT NULL,
        version          INTEGER NOT NULL
    );
    CREATE INDEX idx_features_stage_created
        ON features (stage, created_at DESC, id DESC);

    CREATE TABLE votes (
        feature_id TEXT NOT NULL REFERENCES features (id) ON DELETE CASCADE,
        user_id    TEXT NOT NULL,
        direction  TEXT NOT NULL CHECK (direction IN ('up', 'down')),
        cast_at    INTEGER NOT NULL,
        PRIMARY KEY (feature_id, user_id)
    );
    "#,
];

const FEATURE_COLUMNS: &str = "id, title, description, stage, progress, votes_up, votes_down, \
     subfeatures, quarter, expected_date, created_by, created_at, last_modified_by, \
     last_modified_at, version";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::unavailable_with_source(
                    format!("failed to create db directory: {}", parent.display()),
                    e,
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            StoreError::unavailable_with_source(
                format!("failed to open db at {}", path.display()),
                e,
            )
        })?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::unavailable_with_source("failed to set journal_mode", e))?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(
                path = %path.display(),
                journal_mode,
                "SQLite refused WAL mode; continuing with reduced concurrency"
            );
        }

        let store = Self::init(conn, busy_timeout)?;
        tracing::debug!(path = %path.display(), "Feature store opened");
        Ok(store)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::unavailable_with_source("failed to open in-memory db", e))?;
        Self::init(conn, Duration::ZERO)
    }

    fn init(mut conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)
            .map_err(|e| StoreError::unavailable_with_source("failed to set busy_timeout", e))?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")
            .map_err(|e| StoreError::unavailable_with_source("failed to configure pragmas", e))?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `op` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::unavailable("sqlite connection mutex poisoned"))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| StoreError::unavailable_with_source("sqlite worker task failed", e))?
    }
}

fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let current: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| StoreError::unavailable_with_source("failed to read schema version", e))?;
    let latest = MIGRATIONS.len() as i64;
    if current > latest {
        return Err(StoreError::unavailable(format!(
            "database schema version {current} is newer than supported version {latest}"
        )));
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i64 + 1;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::unavailable_with_source("failed to begin migration", e))?;
        tx.execute_batch(sql).map_err(|e| {
            StoreError::unavailable_with_source(format!("migration {version} failed"), e)
        })?;
        tx.execute_batch(&format!("PRAGMA user_version = {version}"))
            .map_err(|e| StoreError::unavailable_with_source("failed to bump schema version", e))?;
        tx.commit()
            .map_err(|e| StoreError::unavailable_with_source("failed to commit migration", e))?;
        tracing::debug!(version, "Applied feature store migration");
    }
    Ok(())
}

/// Run `op` inside an IMMEDIATE transaction; rolls back on error via drop.
fn in_write_tx<T>(
    conn: &mut Connection,
    id: &FeatureId,
    op: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_err(Some(id), "begin transaction"))?;
    let value = op(&tx)?;
    tx.commit().map_err(db_err(Some(id), "commit"))?;
    Ok(value)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_constraint(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Map a rusqlite error. Lock contention on a known feature is a conflict;
/// everything else is an availability problem.
fn db_err(
    id: Option<&FeatureId>,
    context: &'static str,
) -> impl FnOnce(rusqlite::Error) -> StoreError {
    let id = id.cloned();
    move |err| match id {
        Some(id) if is_busy(&err) => StoreError::Conflict { id },
        _ => StoreError::unavailable_with_source(format!("sqlite {context} failed"), err),
    }
}

fn to_db_int(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::corrupt(format!("{field} out of range: {value}")))
}

/// Column values as stored, before domain validation.
struct FeatureRow {
    id: String,
    title: String,
    description: String,
    stage: String,
    progress: i64,
    votes_up: i64,
    votes_down: i64,
    subfeatures: String,
    quarter: Option<String>,
    expected_date: Option<String>,
    created_by: String,
    created_at: i64,
    last_modified_by: String,
    last_modified_at: i64,
    version: i64,
}

impl FeatureRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            stage: row.get(3)?,
            progress: row.get(4)?,
            votes_up: row.get(5)?,
            votes_down: row.get(6)?,
            subfeatures: row.get(7)?,
            quarter: row.get(8)?,
            expected_date: row.get(9)?,
            created_by: row.get(10)?,
            created_at: row.get(11)?,
            last_modified_by: row.get(12)?,
            last_modified_at: row.get(13)?,
            version: row.get(14)?,
        })
    }

    fn into_feature(self) -> Result<Feature, StoreError> {
        let id = self.id;
        let corrupt = |what: &str| StoreError::corrupt(format!("feature {id}: invalid {what}"));

        let stage = Stage::parse(&self.stage).ok_or_else(|| corrupt("stage"))?;
        let progress = u8::try_from(self.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| corrupt("progress"))?;
        let votes_up = u64::try_from(self.votes_up).map_err(|_| corrupt("votes_up"))?;
        let votes_down = u64::try_from(self.votes_down).map_err(|_| corrupt("votes_down"))?;
        let version = u64::try_from(self.version).map_err(|_| corrupt("version"))?;
        let subfeatures: Vec<String> =
            serde_json::from_str(&self.subfeatures).map_err(|_| corrupt("subfeatures"))?;
        let expected_date = self
            .expected_date
            .as_deref()
            .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
            .transpose()
            .map_err(|_| corrupt("expected_date"))?;
        let created_at =
            DateTime::from_timestamp_micros(self.created_at).ok_or_else(|| corrupt("created_at"))?;
        let last_modified_at = DateTime::from_timestamp_micros(self.last_modified_at)
            .ok_or_else(|| corrupt("last_modified_at"))?;

        Ok(Feature {
            id: FeatureId::from(id),
            title: self.title,
            description: self.description,
            stage,
            progress,
            votes_up,
            votes_down,
            subfeatures,
            quarter: self.quarter,
            expected_date,
            created_by: self.created_by,
            created_at,
            last_modified_by: self.last_modified_by,
            last_modified_at,
            version,
        })
    }
}

fn load_feature(conn: &Connection, id: &FeatureId) -> Result<Option<Feature>, StoreError> {
    let sql = format!("SELECT {FEATURE_COLUMNS} FROM features WHERE id = ?1");
    conn.query_row(&sql, params![id.as_str()], FeatureRow::from_row)
        .optional()
        .map_err(db_err(Some(id), "load feature"))?
        .map(FeatureRow::into_feature)
        .transpose()
}

fn load_vote(conn: &Connection, id: &FeatureId, user_id: &str) -> Result<Option<Vote>, StoreError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT direction, cast_at FROM votes WHERE feature_id = ?1 AND user_id = ?2",
            params![id.as_str(), user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db_err(Some(id), "load vote"))?;

    row.map(|(direction, cast_at)| {
        let direction = VoteDirection::parse(&direction).ok_or_else(|| {
            StoreError::corrupt(format!("vote {id}/{user_id}: invalid direction {direction:?}"))
        })?;
        let cast_at = DateTime::from_timestamp_micros(cast_at).ok_or_else(|| {
            StoreError::corrupt(format!("vote {id}/{user_id}: invalid cast_at"))
        })?;
        Ok(Vote {
            feature_id: id.clone(),
            user_id: user_id.to_string(),
            direction,
            cast_at,
        })
    })
    .transpose()
}

/// Write every mutable column of `feature`, guarded by `expected_version`.
/// Returns the number of rows changed.
fn write_feature(
    conn: &Connection,
    feature: &Feature,
    expected_version: u64,
) -> Result<usize, StoreError> {
    let subfeatures = serde_json::to_string(&feature.subfeatures)
        .map_err(|e| StoreError::unavailable_with_source("failed to encode subfeatures", e))?;
    conn.execute(
        "UPDATE features SET
            title = ?2, description = ?3, stage = ?4, progress = ?5,
            votes_up = ?6, votes_down = ?7, subfeatures = ?8, quarter = ?9,
            expected_date = ?10, last_modified_by = ?11, last_modified_at = ?12,
            version = ?13
         WHERE id = ?1 AND version = ?14",
        params![
            feature.id.as_str(),
            feature.title,
            feature.description,
            feature.stage.as_str(),
            i64::from(feature.progress),
            to_db_int(feature.votes_up, "votes_up")?,
            to_db_int(feature.votes_down, "votes_down")?,
            subfeatures,
            feature.quarter,
            feature.expected_date.map(|d| d.format("%Y-%m-%d").to_string()),
            feature.last_modified_by,
            feature.last_modified_at.timestamp_micros(),
            to_db_int(feature.version, "version")?,
            to_db_int(expected_version, "version")?,
        ],
    )
    .map_err(db_err(Some(&feature.id), "update feature"))
}

#[async_trait]
impl FeatureStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn insert_feature(&self, feature: &Feature) -> Result<(), StoreError> {
        let feature = feature.clone();
        self.with_conn(move |conn| {
            let subfeatures = serde_json::to_string(&feature.subfeatures).map_err(|e| {
                StoreError::unavailable_with_source("failed to encode subfeatures", e)
            })?;
            let sql = format!(
                "INSERT INTO features ({FEATURE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            );
            conn.execute(
                &sql,
                params![
                    feature.id.as_str(),
                    feature.title,
                    feature.description,
                    feature.stage.as_str(),
                    i64::from(feature.progress),
                    to_db_int(feature.votes_up, "votes_up")?,
                    to_db_int(feature.votes_down, "votes_down")?,
                    subfeatures,
                    feature.quarter,
                    feature.expected_date.map(|d| d.format("%Y-%m-%d").to_string()),
                    feature.created_by,
                    feature.created_at.timestamp_micros(),
                    feature.last_modified_by,
                    feature.last_modified_at.timestamp_micros(),
                    to_db_int(feature.version, "version")?,
                ],
            )
            .map_err(|err| {
                if is_constraint(&err) {
                    StoreError::Conflict {
                        id: feature.id.clone(),
                    }
                } else {
                    db_err(Some(&feature.id), "insert feature")(err)
                }
            })?;
            Ok(())
        })
        .await
    }

    async fn get_feature(&self, id: &FeatureId) -> Result<Option<Feature>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| load_feature(conn, &id)).await
    }

    async fn replace_feature(
        &self,
        feature: &Feature,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let feature = feature.clone();
        self.with_conn(move |conn| {
            in_write_tx(conn, &feature.id, |tx| {
                if write_feature(tx, &feature, expected_version)? == 1 {
                    return Ok(());
                }
                let exists: bool = tx
                    .query_row(
                        "SELECT EXISTS (SELECT 1 FROM features WHERE id = ?1)",
                        params![feature.id.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(db_err(Some(&feature.id), "check feature"))?;
                let id = feature.id.clone();
                Err(if exists {
                    StoreError::Conflict { id }
                } else {
                    StoreError::NotFound { id }
                })
            })
        })
        .await
    }

    async fn get_vote(&self, id: &FeatureId, user_id: &str) -> Result<Option<Vote>, StoreError> {
        let id = id.clone();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| load_vote(conn, &id, &user_id))
            .await
    }

    async fn apply_vote(
        &self,
        id: &FeatureId,
        user_id: &str,
        change: VoteChange,
        at: DateTime<Utc>,
    ) -> Result<AppliedVote, StoreError> {
        let id = id.clone();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            in_write_tx(conn, &id, |tx| {
                let mut feature =
                    load_feature(tx, &id)?.ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
                let prior = load_vote(tx, &id, &user_id)?;
                let expected_version = feature.version;
                let (outcome, write) =
                    stage_vote(&mut feature, prior.as_ref(), &user_id, change, at)?;

                match write {
                    LedgerWrite::Keep => {}
                    LedgerWrite::Upsert(vote) => {
                        tx.execute(
                            "INSERT INTO votes (feature_id, user_id, direction, cast_at)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT (feature_id, user_id) DO UPDATE SET
                                direction = excluded.direction,
                                cast_at = excluded.cast_at",
                            params![
                                id.as_str(),
                                user_id,
                                vote.direction.as_str(),
                                vote.cast_at.timestamp_micros(),
                            ],
                        )
                        .map_err(db_err(Some(&id), "upsert vote"))?;
                    }
                    LedgerWrite::Delete => {
                        tx.execute(
                            "DELETE FROM votes WHERE feature_id = ?1 AND user_id = ?2",
                            params![id.as_str(), user_id],
                        )
                        .map_err(db_err(Some(&id), "delete vote"))?;
                    }
                }

                if feature.version != expected_version
                    && write_feature(tx, &feature, expected_version)? != 1
                {
                    return Err(StoreError::Conflict { id: id.clone() });
                }
                Ok(AppliedVote { outcome, feature })
            })
        })
        .await
    }

    async fn list_by_stage(&self, stage: Stage) -> Result<Vec<Feature>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {FEATURE_COLUMNS} FROM features WHERE stage = ?1
                 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(db_err(None, "prepare listing"))?;
            let rows = stmt
                .query_map(params![stage.as_str()], FeatureRow::from_row)
                .map_err(db_err(None, "list features"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err(None, "read feature rows"))?;
            rows.into_iter().map(FeatureRow::into_feature).collect()
        })
        .await
    }

    async fn tally_votes(&self, id: &FeatureId) -> Result<VoteTally, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| {
            if load_feature(conn, &id)?.is_none() {
                return Err(StoreError::NotFound { id });
            }
            let (up, down): (i64, i64) = conn
                .query_row(
                    "SELECT
                        COALESCE(SUM(direction = 'up'), 0),
                        COALESCE(SUM(direction = 'down'), 0)
                     FROM votes WHERE feature_id = ?1",
                    params![id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(db_err(Some(&id), "tally votes"))?;
            Ok(VoteTally {
                up: u64::try_from(up).unwrap_or_default(),
                down: u64::try_from(down).unwrap_or_default(),
            })
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(db_err(None, "ping"))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample(id: &str) -> Feature {
        let now = DateTime::from_timestamp_micros(Utc::now().timestamp_micros())
            .unwrap_or_else(Utc::now);
        Feature {
            id: FeatureId::from(id),
            title: "Dark Mode".to_string(),
            description: "Let the dashboard go dark".to_string(),
            stage: Stage::Upcoming,
            progress: 30,
            votes_up: 0,
            votes_down: 0,
            subfeatures: vec!["toggle".to_string(), "schedule".to_string()],
            quarter: Some("Q4 2026".to_string()),
            expected_date: NaiveDate::from_ymd_opt(2026, 12, 1),
            created_by: "alice".to_string(),
            created_at: now,
            last_modified_by: "alice".to_string(),
            last_modified_at: now,
            version: 1,
        }
    }

    #[tokio::test]
    async fn features_and_votes_survive_reopen() {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("nested").join("features.db");
        let feature = sample("f-1");

        {
            let store = SqliteStore::open(&path, Duration::from_millis(500))
                .unwrap_or_else(|e| panic!("open: {e}"));
            store
                .insert_feature(&feature)
                .await
                .unwrap_or_else(|e| panic!("insert: {e}"));
            store
                .apply_vote(
                    &feature.id,
                    "bob",
                    VoteChange::Cast(VoteDirection::Down),
                    Utc::now(),
                )
                .await
                .unwrap_or_else(|e| panic!("vote: {e}"));
        }

        let store = SqliteStore::open(&path, Duration::from_millis(500))
            .unwrap_or_else(|e| panic!("reopen: {e}"));
        let loaded = store
            .get_feature(&feature.id)
            .await
            .unwrap_or_else(|e| panic!("get: {e}"))
            .unwrap_or_else(|| panic!("feature missing after reopen"));
        assert_eq!(loaded.subfeatures, feature.subfeatures);
        assert_eq!(loaded.expected_date, feature.expected_date);
        assert_eq!(loaded.created_at, feature.created_at);
        assert_eq!((loaded.votes_up, loaded.votes_down), (0, 1));
        assert_eq!(loaded.version, 2);

        let vote = store
            .get_vote(&feature.id, "bob")
            .await
            .unwrap_or_else(|e| panic!("get_vote: {e}"));
        assert_eq!(vote.map(|v| v.direction), Some(VoteDirection::Down));
    }

    #[tokio::test]
    async fn schema_version_is_recorded() {
        let store = SqliteStore::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let version = store
            .with_conn(|conn| {
                conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
                    .map_err(db_err(None, "read version"))
            })
            .await
            .unwrap_or_else(|e| panic!("version: {e}"));
        assert_eq!(version, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn stale_replace_conflicts_and_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let mut feature = sample("f-1");
        store
            .insert_feature(&feature)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        assert!(matches!(
            store.insert_feature(&feature).await,
            Err(StoreError::Conflict { .. })
        ));

        feature.progress = 60;
        feature.version = 2;
        store
            .replace_feature(&feature, 1)
            .await
            .unwrap_or_else(|e| panic!("replace: {e}"));
        assert!(matches!(
            store.replace_feature(&feature, 1).await,
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store.replace_feature(&sample("nope"), 1).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_stage_in_row_is_corrupt() {
        let store = SqliteStore::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let feature = sample("f-1");
        store
            .insert_feature(&feature)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        store
            .with_conn(|conn| {
                conn.execute("UPDATE features SET stage = 'collecting'", [])
                    .map_err(db_err(None, "corrupt row"))?;
                Ok(())
            })
            .await
            .unwrap_or_else(|e| panic!("update: {e}"));
        assert!(matches!(
            store.get_feature(&feature.id).await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn tally_counts_ledger_rows() {
        let store = SqliteStore::open_in_memory().unwrap_or_else(|e| panic!("open: {e}"));
        let feature = sample("f-1");
        store
            .insert_feature(&feature)
            .await
            .unwrap_or_else(|e| panic!("insert: {e}"));
        for (user, direction) in [
            ("u1", VoteDirection::Up),
            ("u2", VoteDirection::Up),
            ("u3", VoteDirection::Down),
        ] {
            store
                .apply_vote(&feature.id, user, VoteChange::Cast(direction), Utc::now())
                .await
                .unwrap_or_else(|e| panic!("vote: {e}"));
        }
        let tally = store
            .tally_votes(&feature.id)
            .await
            .unwrap_or_else(|e| panic!("tally: {e}"));
        assert_eq!(tally, VoteTally { up: 2, down: 1 });
    }
}
