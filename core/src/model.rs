//! Feature aggregate and vote ledger entry types.
//!
//! Immutable fields: `id`, `created_by`, `created_at`. Vote counters are a
//! cache of the ledger and only ever change together with a ledger write.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FeatureError, Result};
use crate::stage::Stage;

/// Opaque feature identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Direction of a single user's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(VoteDirection::Up),
            "down" => Some(VoteDirection::Down),
            _ => None,
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteDirection {
    type Err = FeatureError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        VoteDirection::parse(s.trim()).ok_or_else(|| {
            FeatureError::invalid_argument(format!("unknown vote direction: {s:?}"))
        })
    }
}

/// A proposed product capability tracked through review and release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub title: String,
    pub description: String,
    pub stage: Stage,
    /// 0-100; only meaningful in `Upcoming` and `Published`.
    pub progress: u8,
    pub votes_up: u64,
    pub votes_down: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subfeatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_date: Option<NaiveDate>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: String,
    pub last_modified_at: DateTime<Utc>,
    /// Optimistic concurrency version, bumped on every mutation.
    pub version: u64,
}

impl Feature {
    /// Stamp modification metadata and bump the row version.
    pub(crate) fn touch(&mut self, acting_user: &str, at: DateTime<Utc>) {
        self.last_modified_by = acting_user.to_string();
        self.last_modified_at = at;
        self.bump_version();
    }

    /// Bump the row version without restamping modification metadata.
    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Total number of users holding an active vote.
    pub fn total_votes(&self) -> u64 {
        self.votes_up + self.votes_down
    }
}

/// One user's vote on one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub feature_id: FeatureId,
    pub user_id: String,
    pub direction: VoteDirection,
    pub cast_at: DateTime<Utc>,
}

/// Input for creating a feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFeature {
    pub title: String,
    pub description: String,
    pub created_by: String,
    /// Defaults to [`Stage::Inbox`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_stage: Option<Stage>,
    #[serde(default)]
    pub subfeatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_date: Option<NaiveDate>,
}

impl NewFeature {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            created_by: created_by.into(),
            ..Self::default()
        }
    }

    pub fn in_stage(mut self, stage: Stage) -> Self {
        self.initial_stage = Some(stage);
        self
    }
}

/// Field-level edit. `None` leaves the field untouched; for the optional
/// metadata fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfeatures: Option<Vec<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub quarter: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "double_option"
    )]
    pub expected_date: Option<Option<NaiveDate>>,
}

impl FeaturePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch to `feature` after validating every field.
    ///
    /// Validation happens before any field is written, so a rejected patch
    /// leaves the feature untouched.
    pub(crate) fn apply(&self, feature: &mut Feature) -> Result<()> {
        if self.is_empty() {
            return Err(FeatureError::invalid_argument("patch contains no fields"));
        }
        let title = self.title.as_deref().map(|t| require_text("title", t)).transpose()?;
        let description = self
            .description
            .as_deref()
            .map(|d| require_text("description", d))
            .transpose()?;
        let subfeatures = self
            .subfeatures
            .as_deref()
            .map(normalize_subfeatures)
            .transpose()?;
        if let Some(progress) = self.progress {
            validate_progress(progress)?;
            if !feature.stage.progress_editable() {
                return Err(FeatureError::invalid_argument(format!(
                    "progress can only be edited while upcoming (feature is {})",
                    feature.stage
                )));
            }
        }

        if let Some(title) = title {
            feature.title = title;
        }
        if let Some(description) = description {
            feature.description = description;
        }
        if let Some(subfeatures) = subfeatures {
            feature.subfeatures = subfeatures;
        }
        if let Some(progress) = self.progress {
            feature.progress = progress;
        }
        if let Some(quarter) = &self.quarter {
            feature.quarter = quarter
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string);
        }
        if let Some(expected_date) = self.expected_date {
            feature.expected_date = expected_date;
        }
        Ok(())
    }
}

/// Trim `value` and reject it when nothing is left.
pub(crate) fn require_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FeatureError::invalid_argument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_progress(progress: u8) -> Result<()> {
    if progress > 100 {
        return Err(FeatureError::invalid_argument(format!(
            "progress must be between 0 and 100, got {progress}"
        )));
    }
    Ok(())
}

pub(crate) fn normalize_subfeatures(items: &[String]) -> Result<Vec<String>> {
    items
        .iter()
        .map(|item| require_text("subfeature", item))
        .collect()
}

/// Serde helper distinguishing an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
