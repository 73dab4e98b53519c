//! Wire protocol for the gateway channel
//!
//! All frames are JSON text messages. Outbound traffic is either a call
//! envelope (correlated by `id`) or a control frame (handshake and
//! subscription management, never correlated). Inbound traffic is tagged
//! by `kind` and demultiplexed by the session dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::progress::Direction;

/// HTTP-style method of a gateway operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Description of what the server-side operation should do,
/// independent of the channel carrying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Server-side endpoint the operation targets
    pub endpoint: String,
    /// Operation method
    pub method: Method,
    /// Request body, when the operation carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Query-style parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    /// Extra headers forwarded to the endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl OperationRequest {
    pub fn new(endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            body: None,
            params: None,
            headers: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Outbound call frame: one per invocation, tagged with the
/// per-invocation correlation key and the operation name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Correlation key, unique per invocation (never per operation name)
    pub id: u64,
    /// Operation name, e.g. `file.read`
    pub operation: String,
    #[serde(flatten)]
    pub request: OperationRequest,
}

/// Outbound control frames: never correlated, never time-bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Bearer-token handshake, sent once right after the channel opens
    Authenticate {
        token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    /// Register interest in change notifications for a resource
    Subscribe { path: String },
    /// Drop interest in change notifications for a resource
    Unsubscribe { path: String },
}

/// What happened to a watched resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

/// Inbound frames, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Handshake acknowledgement
    Ready,
    /// Terminal success for the call keyed by `id`
    Result { id: u64, payload: Value },
    /// Terminal failure for the call keyed by `id`
    Error { id: u64, message: String },
    /// Incremental update for the call keyed by `id`; never settles it
    Progress {
        id: u64,
        loaded: u64,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        percent: Option<f64>,
        direction: Direction,
    },
    /// Change notification for a watched resource; not correlated
    Change {
        path: String,
        event: ChangeKind,
        #[serde(default)]
        entry: Option<Value>,
    },
}

pub fn encode_call(envelope: &CallEnvelope) -> Result<String, crate::error::GatewayError> {
    serde_json::to_string(envelope)
        .map_err(|e| crate::error::GatewayError::Transport(format!("Failed to encode call: {}", e)))
}

pub fn encode_control(frame: &ControlFrame) -> Result<String, crate::error::GatewayError> {
    serde_json::to_string(frame).map_err(|e| {
        crate::error::GatewayError::Transport(format!("Failed to encode control frame: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_envelope_round_trip() {
        let envelope = CallEnvelope {
            id: 7,
            operation: "file.read".to_string(),
            request: OperationRequest::new("/storage/files", Method::Get)
                .with_param("path", "/a.txt"),
        };

        let encoded = encode_call(&envelope).unwrap();
        assert!(encoded.contains("\"id\":7"));
        assert!(encoded.contains("\"operation\":\"file.read\""));
        assert!(encoded.contains("\"method\":\"get\""));
        // Absent optionals stay off the wire
        assert!(!encoded.contains("\"body\""));

        let decoded: CallEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.request.endpoint, "/storage/files");
        assert_eq!(
            decoded.request.params.unwrap().get("path").unwrap(),
            "/a.txt"
        );
    }

    #[test]
    fn test_authenticate_frame_shape() {
        let frame = ControlFrame::Authenticate {
            token: "secret".to_string(),
            context: Some("pool-1".to_string()),
        };
        let encoded = encode_control(&frame).unwrap();
        assert!(encoded.contains("\"type\":\"authenticate\""));
        assert!(encoded.contains("\"context\":\"pool-1\""));

        let frame = ControlFrame::Authenticate {
            token: "secret".to_string(),
            context: None,
        };
        let encoded = encode_control(&frame).unwrap();
        assert!(!encoded.contains("context"));
    }

    #[test]
    fn test_inbound_result_frame() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"kind":"result","id":3,"payload":"hello"}"#).unwrap();
        match frame {
            InboundFrame::Result { id, payload } => {
                assert_eq!(id, 3);
                assert_eq!(payload, json!("hello"));
            }
            other => panic!("Expected result frame, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_error_frame() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"kind":"error","id":3,"message":"disk full"}"#).unwrap();
        match frame {
            InboundFrame::Error { id, message } => {
                assert_eq!(id, 3);
                assert_eq!(message, "disk full");
            }
            other => panic!("Expected error frame, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_progress_frame_optionals() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"kind":"progress","id":9,"loaded":512,"direction":"download"}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Progress {
                id,
                loaded,
                total,
                percent,
                direction,
            } => {
                assert_eq!(id, 9);
                assert_eq!(loaded, 512);
                assert_eq!(total, None);
                assert_eq!(percent, None);
                assert_eq!(direction, Direction::Download);
            }
            other => panic!("Expected progress frame, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_change_frame() {
        let frame: InboundFrame = serde_json::from_str(
            r#"{"kind":"change","path":"/docs","event":"created","entry":{"name":"a.txt"}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Change { path, event, entry } => {
                assert_eq!(path, "/docs");
                assert_eq!(event, ChangeKind::Created);
                assert_eq!(entry.unwrap()["name"], "a.txt");
            }
            other => panic!("Expected change frame, got {:?}", other),
        }
    }
}
