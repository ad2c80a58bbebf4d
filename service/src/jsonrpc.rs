//! Wire envelopes for JSON-RPC-lite.
//!
//! Like JSON-RPC 2.0 but without the `"jsonrpc": "2.0"` member. Messages
//! are single-line JSON objects terminated by `\n`.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Integer(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Integer(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub id: RequestId,
    pub error: JSONRPCErrorError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JSONRPCErrorError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_id_accepts_numbers_and_strings() {
        let numeric: JSONRPCRequest =
            serde_json::from_str(r#"{"id": 7, "method": "hello"}"#).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(numeric.id, RequestId::Integer(7));
        assert_eq!(numeric.params, None);

        let named: JSONRPCRequest = serde_json::from_str(r#"{"id": "abc", "method": "hello"}"#)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(named.id, RequestId::String("abc".to_string()));
    }

    #[test]
    fn error_omits_absent_data() {
        let err = JSONRPCError {
            id: RequestId::Integer(1),
            error: JSONRPCErrorError {
                code: -32601,
                message: "Unknown method: nope".to_string(),
                data: None,
            },
        };
        let json = serde_json::to_value(&err).unwrap_or_default();
        assert!(json["error"].get("data").is_none(), "{json}");
    }
}
