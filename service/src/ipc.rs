//! Unix domain socket IPC listener.
//!
//! Accepts connections, reads newline-delimited JSON-RPC-lite messages,
//! dispatches them to the [`FeatureEngine`](featureboard_core::FeatureEngine)
//! and writes one response line per request. A connection must complete the
//! `hello` handshake before any other method is served.

use std::path::Path;
use std::sync::Arc;

use featureboard_core::{FeatureError, FeatureId, NewFeature, Stage, VoteDirection};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use crate::PROTOCOL_VERSION;
use crate::jsonrpc::{JSONRPCError, JSONRPCErrorError, JSONRPCRequest, JSONRPCResponse, RequestId};
use crate::manager::FeatureboardManager;
use crate::protocol::*;

/// Methods advertised in the `hello` result.
pub const CAPABILITIES: &[&str] = &[
    "feature.create",
    "feature.get",
    "feature.update",
    "feature.move",
    "feature.vote",
    "feature.unvote",
    "feature.publish",
    "feature.list",
    "feature.my_vote",
    "feature.audit",
    "service.status",
    "service.doctor",
];

/// Error half of a handler result, rendered into `error` on the wire.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<FeatureError> for RpcError {
    fn from(err: FeatureError) -> Self {
        let code = match &err {
            FeatureError::InvalidArgument { .. } => ERR_INVALID_ARGUMENT,
            FeatureError::NotFound { .. } => ERR_NOT_FOUND,
            FeatureError::InvalidTransition { .. } => ERR_INVALID_TRANSITION,
            FeatureError::Conflict { .. } => ERR_CONFLICT,
            FeatureError::Unavailable { .. } => ERR_UNAVAILABLE,
            FeatureError::InvariantViolation { .. } => ERR_INVARIANT,
        };
        let data = match &err {
            FeatureError::InvalidTransition { from, to, .. } => Some(serde_json::json!({
                "current": from,
                "attempted": to,
            })),
            _ => None,
        };
        Self {
            code,
            message: err.to_string(),
            data,
        }
    }
}

type RpcResult = Result<serde_json::Value, RpcError>;

/// Per-connection protocol state.
#[derive(Debug, Default)]
pub struct Session {
    greeted: bool,
}

/// Remove a stale socket file, create the parent directory and bind.
pub fn bind_socket(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    tracing::info!(path = %path.display(), "Featureboard service listening");
    Ok(listener)
}

/// Serve connections until `shutdown` flips to `true` (or its sender drops).
pub async fn serve(
    manager: Arc<FeatureboardManager>,
    listener: UnixListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let mgr = Arc::clone(&manager);
                    tokio::spawn(async move {
                        let _guard = mgr.track_connection();
                        if let Err(e) = handle_connection(&mgr, stream).await {
                            tracing::warn!("Connection error: {e}");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Accept error: {e}");
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    manager: &FeatureboardManager,
    stream: UnixStream,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut session = Session::default();
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch_message(manager, &mut session, trimmed).await;
        let mut response_bytes = serde_json::to_vec(&response).unwrap_or_else(|_| b"{}".to_vec());
        response_bytes.push(b'\n');
        writer.write_all(&response_bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Parse and dispatch a single JSON-RPC message.
pub async fn dispatch_message(
    manager: &FeatureboardManager,
    session: &mut Session,
    raw: &str,
) -> serde_json::Value {
    let request: JSONRPCRequest = match serde_json::from_str(raw) {
        Ok(req) => req,
        Err(e) => {
            return error_value(
                RequestId::Integer(0),
                RpcError::new(ERR_INVALID_REQUEST, format!("Invalid JSON-RPC: {e}")),
            );
        }
    };

    let id = request.id.clone();
    let result = if request.method == "hello" {
        handle_hello(request.params).inspect(|_| session.greeted = true)
    } else if !session.greeted {
        Err(RpcError::new(
            ERR_INVALID_REQUEST,
            "Handshake required: send hello first",
        ))
    } else {
        dispatch_method(manager, &request.method, request.params).await
    };

    match result {
        Ok(value) => {
            serde_json::to_value(JSONRPCResponse { id, result: value }).unwrap_or_default()
        }
        Err(err) => {
            tracing::debug!(
                request_id = %id,
                method = %request.method,
                code = err.code,
                "Request failed: {}",
                err.message
            );
            error_value(id, err)
        }
    }
}

fn error_value(id: RequestId, err: RpcError) -> serde_json::Value {
    serde_json::to_value(JSONRPCError {
        id,
        error: JSONRPCErrorError {
            code: err.code,
            message: err.message,
            data: err.data,
        },
    })
    .unwrap_or_default()
}

async fn dispatch_method(
    manager: &FeatureboardManager,
    method: &str,
    params: Option<serde_json::Value>,
) -> RpcResult {
    match method {
        "feature.create" => handle_create(manager, parse_params(method, params)?).await,
        "feature.get" => handle_get(manager, parse_params(method, params)?).await,
        "feature.update" => handle_update(manager, parse_params(method, params)?).await,
        "feature.move" => handle_move(manager, parse_params(method, params)?).await,
        "feature.vote" => handle_vote(manager, parse_params(method, params)?).await,
        "feature.unvote" => handle_unvote(manager, parse_params(method, params)?).await,
        "feature.publish" => handle_publish(manager, parse_params(method, params)?).await,
        "feature.list" => handle_list(manager, parse_params(method, params)?).await,
        "feature.my_vote" => handle_my_vote(manager, parse_params(method, params)?).await,
        "feature.audit" => handle_audit(manager, parse_params(method, params)?).await,
        "service.status" => handle_service_status(manager),
        "service.doctor" => handle_service_doctor(manager).await,
        _ => Err(RpcError::new(
            ERR_METHOD_NOT_FOUND,
            format!("Unknown method: {method}"),
        )),
    }
}

fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<T, RpcError> {
    let value = params.ok_or_else(|| RpcError::new(ERR_INVALID_PARAMS, "Missing params"))?;
    serde_json::from_value(value)
        .map_err(|e| RpcError::new(ERR_INVALID_PARAMS, format!("Invalid {method} params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> RpcResult {
    serde_json::to_value(value)
        .map_err(|e| RpcError::new(ERR_UNAVAILABLE, format!("Serialize error: {e}")))
}

fn handle_hello(params: Option<serde_json::Value>) -> RpcResult {
    let hello: HelloParams = parse_params("hello", params)?;

    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(RpcError::new(
            ERR_INVALID_PARAMS,
            format!(
                "Incompatible protocol version: client={}, service={PROTOCOL_VERSION}",
                hello.protocol_version
            ),
        ));
    }
    tracing::debug!(client_version = %hello.client_version, "Client handshake");

    to_result(&HelloResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        service_version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: CAPABILITIES.iter().map(|m| (*m).to_string()).collect(),
    })
}

async fn handle_create(manager: &FeatureboardManager, params: FeatureCreateParams) -> RpcResult {
    let initial_stage = params
        .stage
        .as_deref()
        .map(str::parse::<Stage>)
        .transpose()?;
    let feature = manager
        .engine()
        .create_feature(NewFeature {
            title: params.title,
            description: params.description,
            created_by: params.user_id,
            initial_stage,
            subfeatures: params.subfeatures,
            quarter: params.quarter,
            expected_date: params.expected_date,
        })
        .await?;
    to_result(&feature)
}

async fn handle_get(manager: &FeatureboardManager, params: FeatureIdParams) -> RpcResult {
    let feature = manager
        .engine()
        .get_feature(&FeatureId::from(params.id))
        .await?;
    to_result(&feature)
}

async fn handle_update(manager: &FeatureboardManager, params: FeatureUpdateParams) -> RpcResult {
    let feature = manager
        .engine()
        .update_feature(&FeatureId::from(params.id), &params.patch, &params.user_id)
        .await?;
    to_result(&feature)
}

async fn handle_move(manager: &FeatureboardManager, params: FeatureMoveParams) -> RpcResult {
    let target: Stage = params.stage.parse()?;
    let feature = manager
        .engine()
        .move_stage(&FeatureId::from(params.id), target, &params.user_id)
        .await?;
    to_result(&feature)
}

async fn handle_vote(manager: &FeatureboardManager, params: FeatureVoteParams) -> RpcResult {
    let direction: VoteDirection = params.direction.parse()?;
    let feature = manager
        .engine()
        .vote(&FeatureId::from(params.id), &params.user_id, direction)
        .await?;
    to_result(&feature)
}

async fn handle_unvote(manager: &FeatureboardManager, params: FeatureUserParams) -> RpcResult {
    let feature = manager
        .engine()
        .remove_vote(&FeatureId::from(params.id), &params.user_id)
        .await?;
    to_result(&feature)
}

async fn handle_publish(manager: &FeatureboardManager, params: FeatureUserParams) -> RpcResult {
    let feature = manager
        .engine()
        .publish(&FeatureId::from(params.id), &params.user_id)
        .await?;
    to_result(&feature)
}

async fn handle_list(manager: &FeatureboardManager, params: FeatureListParams) -> RpcResult {
    let stage: Stage = params.stage.parse()?;
    let listing = manager.engine().list_by_stage(stage).await?;
    let offset = params.offset.map_or(0, |o| o as usize);
    let limit = params.limit.map_or(usize::MAX, |l| l as usize);
    to_result(&FeatureListResult {
        features: listing.page(offset, limit).to_vec(),
        total: listing.len(),
    })
}

async fn handle_my_vote(manager: &FeatureboardManager, params: FeatureUserParams) -> RpcResult {
    let direction = manager
        .engine()
        .user_vote(&FeatureId::from(params.id), &params.user_id)
        .await?;
    to_result(&MyVoteResult { direction })
}

async fn handle_audit(manager: &FeatureboardManager, params: FeatureIdParams) -> RpcResult {
    let id = FeatureId::from(params.id);
    let tally = manager.engine().audit_votes(&id).await.inspect_err(|e| {
        if matches!(e, FeatureError::InvariantViolation { .. }) {
            tracing::error!(feature_id = %id, code = e.code(), "Audit failed: {e}");
        }
    })?;
    to_result(&AuditResult {
        votes_up: tally.up,
        votes_down: tally.down,
    })
}

fn handle_service_status(manager: &FeatureboardManager) -> RpcResult {
    to_result(&ServiceStatusResult {
        uptime_s: manager.uptime_s(),
        connections: manager.connection_count(),
        store: manager.engine().store().backend().to_string(),
    })
}

async fn handle_service_doctor(manager: &FeatureboardManager) -> RpcResult {
    let store = manager.engine().store();
    let store_check = match store.ping().await {
        Ok(()) => DoctorCheck::ok("store", format!("{} store reachable", store.backend())),
        Err(e) => DoctorCheck::fail("store", format!("{} store unreachable: {e}", store.backend())),
    };
    let config = manager.engine().config();
    let checks = vec![
        DoctorCheck::ok("service", "Service is running"),
        DoctorCheck::ok(
            "socket",
            format!("Listening on {}", manager.socket_path().display()),
        ),
        store_check,
        DoctorCheck::ok(
            "engine",
            format!(
                "conflict retries: {}, backoff: {}ms",
                config.conflict_retries,
                config.conflict_backoff.as_millis()
            ),
        ),
    ];
    to_result(&ServiceDoctorResult { checks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use featureboard_core::{FeatureEngine, MemoryStore};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn manager() -> FeatureboardManager {
        FeatureboardManager::new(
            FeatureEngine::new(Arc::new(MemoryStore::new())),
            PathBuf::from("/tmp/featureboard-test.sock"),
        )
    }

    async fn greeted(manager: &FeatureboardManager) -> Session {
        let mut session = Session::default();
        let hello = serde_json::json!({
            "id": 0,
            "method": "hello",
            "params": { "protocol_version": "1.0", "client_version": "0.1.0" }
        });
        let resp = dispatch_message(manager, &mut session, &hello.to_string()).await;
        assert!(resp.get("result").is_some(), "hello failed: {resp}");
        session
    }

    async fn call(
        manager: &FeatureboardManager,
        session: &mut Session,
        method: &str,
        params: serde_json::Value,
    ) -> serde_json::Value {
        let msg = serde_json::json!({ "id": 1, "method": method, "params": params });
        dispatch_message(manager, session, &msg.to_string()).await
    }

    #[tokio::test]
    async fn requests_before_hello_are_rejected() {
        let mgr = manager();
        let mut session = Session::default();
        let resp = call(&mgr, &mut session, "service.status", serde_json::json!({})).await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn incompatible_hello_is_rejected() {
        let mgr = manager();
        let mut session = Session::default();
        let resp = call(
            &mgr,
            &mut session,
            "hello",
            serde_json::json!({ "protocol_version": "9.9", "client_version": "x" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_PARAMS);
        let resp = call(&mgr, &mut session, "service.status", serde_json::json!({})).await;
        assert!(resp.get("error").is_some(), "still not greeted: {resp}");
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_request() {
        let mgr = manager();
        let mut session = Session::default();
        let resp = dispatch_message(&mgr, &mut session, "{not json").await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_REQUEST);
    }

    #[tokio::test]
    async fn unknown_method_and_missing_params() {
        let mgr = manager();
        let mut session = greeted(&mgr).await;
        let resp = call(&mgr, &mut session, "feature.explode", serde_json::json!({})).await;
        assert_eq!(resp["error"]["code"], ERR_METHOD_NOT_FOUND);

        let msg = serde_json::json!({ "id": 2, "method": "feature.get" });
        let resp = dispatch_message(&mgr, &mut session, &msg.to_string()).await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn illegal_move_reports_both_stages() {
        let mgr = manager();
        let mut session = greeted(&mgr).await;
        let created = call(
            &mgr,
            &mut session,
            "feature.create",
            serde_json::json!({ "title": "Dark Mode", "description": "d", "user_id": "alice" }),
        )
        .await;
        let id = created["result"]["id"].clone();

        let resp = call(
            &mgr,
            &mut session,
            "feature.move",
            serde_json::json!({ "id": id, "stage": "published", "user_id": "admin" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_TRANSITION);
        assert_eq!(
            resp["error"]["data"],
            serde_json::json!({ "current": "inbox", "attempted": "published" })
        );
    }

    #[tokio::test]
    async fn unknown_stage_or_direction_is_invalid_argument() {
        let mgr = manager();
        let mut session = greeted(&mgr).await;
        let created = call(
            &mgr,
            &mut session,
            "feature.create",
            serde_json::json!({ "title": "t", "description": "d", "user_id": "alice" }),
        )
        .await;
        let id = created["result"]["id"].clone();

        let resp = call(
            &mgr,
            &mut session,
            "feature.move",
            serde_json::json!({ "id": id, "stage": "collecting", "user_id": "admin" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_ARGUMENT);

        let resp = call(
            &mgr,
            &mut session,
            "feature.vote",
            serde_json::json!({ "id": id, "user_id": "bob", "direction": "sideways" }),
        )
        .await;
        assert_eq!(resp["error"]["code"], ERR_INVALID_ARGUMENT);
    }

    #[tokio::test]
    async fn list_pages_but_reports_total() {
        let mgr = manager();
        let mut session = greeted(&mgr).await;
        for title in ["a", "b", "c"] {
            call(
                &mgr,
                &mut session,
                "feature.create",
                serde_json::json!({
                    "title": title, "description": "d", "user_id": "alice", "stage": "suggested"
                }),
            )
            .await;
        }
        let resp = call(
            &mgr,
            &mut session,
            "feature.list",
            serde_json::json!({ "stage": "suggested", "limit": 2, "offset": 1 }),
        )
        .await;
        assert_eq!(resp["result"]["total"], 3);
        assert_eq!(resp["result"]["features"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn update_accepts_flattened_patch_fields() {
        let mgr = manager();
        let mut session = greeted(&mgr).await;
        let created = call(
            &mgr,
            &mut session,
            "feature.create",
            serde_json::json!({
                "title": "t", "description": "d", "user_id": "alice", "quarter": "Q1 2027"
            }),
        )
        .await;
        let id = created["result"]["id"].clone();

        let resp = call(
            &mgr,
            &mut session,
            "feature.update",
            serde_json::json!({ "id": id, "user_id": "bob", "title": "New", "quarter": null }),
        )
        .await;
        assert_eq!(resp["result"]["title"], "New");
        assert!(resp["result"].get("quarter").is_none(), "{resp}");
        assert_eq!(resp["result"]["last_modified_by"], "bob");
    }

    #[tokio::test]
    async fn doctor_checks_pass_on_memory_store() {
        let mgr = manager();
        let mut session = greeted(&mgr).await;
        let resp = call(&mgr, &mut session, "service.doctor", serde_json::json!({})).await;
        let checks = resp["result"]["checks"].as_array().cloned().unwrap_or_default();
        assert!(!checks.is_empty());
        for check in checks {
            assert_eq!(check["status"], "ok", "{check}");
        }
    }
}
