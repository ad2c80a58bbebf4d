//! IPC protocol types for the featureboard service.
//!
//! Stage and vote direction travel as plain strings and are parsed by the
//! handlers, so an unknown value is a domain `InvalidArgument` (code 10)
//! rather than a params decoding error.

use chrono::NaiveDate;
use featureboard_core::{Feature, FeaturePatch, VoteDirection};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (JSON-RPC error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Domain error codes.
pub const ERR_INVALID_ARGUMENT: i64 = 10;
pub const ERR_NOT_FOUND: i64 = 11;
pub const ERR_INVALID_TRANSITION: i64 = 12;
pub const ERR_INVARIANT: i64 = 13;
pub const ERR_CONFLICT: i64 = 100;
pub const ERR_UNAVAILABLE: i64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub capabilities: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// feature.*
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCreateParams {
    pub title: String,
    pub description: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subfeatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_date: Option<NaiveDate>,
}

/// Params for methods that only address a feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureIdParams {
    pub id: String,
}

/// Params for methods that address a feature on behalf of a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureUserParams {
    pub id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureUpdateParams {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub patch: FeaturePatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureMoveParams {
    pub id: String,
    pub stage: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVoteParams {
    pub id: String,
    pub user_id: String,
    pub direction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureListParams {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureListResult {
    pub features: Vec<Feature>,
    /// Size of the whole stage, independent of `limit`/`offset`.
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyVoteResult {
    pub direction: Option<VoteDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResult {
    pub votes_up: u64,
    pub votes_down: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusResult {
    pub uptime_s: u64,
    pub connections: u32,
    /// Store backend name.
    pub store: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// service.doctor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DoctorCheck {
    pub fn ok(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: "ok".to_string(),
            detail: Some(detail.into()),
        }
    }

    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: "fail".to_string(),
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDoctorResult {
    pub checks: Vec<DoctorCheck>,
}
