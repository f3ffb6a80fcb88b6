// crates/server/src/progress/frame.rs
//! Progress frame shapes relayed to websocket subscribers (spec.md 4.K).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transformed progress message, forwarded to every subscriber of a job's
/// `/ws/jobs/:id` stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressFrame {
    ExecutionStart,
    Executing {
        node: Option<String>,
        message: Option<String>,
    },
    Progress {
        value: u64,
        max: u64,
        label: String,
    },
    Executed { node: String, output: Value },
    Status { queue_remaining: u64 },
    Error { message: String },
    /// Sent by the proxy itself when no upstream traffic has arrived for the
    /// subscriber's idle window (spec.md 4.K's 30-second keepalive).
    Keepalive,
}

/// Raw message shape emitted by the diffusion backend's websocket, keyed by
/// `type` with a free-form `data` payload (spec.md §6).
#[derive(Debug, Deserialize)]
pub struct UpstreamFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl UpstreamFrame {
    pub fn prompt_id(&self) -> Option<&str> {
        self.data.get("prompt_id").and_then(Value::as_str)
    }

    /// Translate into a client-facing [`ProgressFrame`], or `None` for
    /// message kinds with no transformed representation (e.g.
    /// `execution_cached`).
    pub fn into_progress_frame(self) -> Option<ProgressFrame> {
        match self.kind.as_str() {
            "execution_start" => Some(ProgressFrame::ExecutionStart),
            "executing" => {
                let node = self.data.get("node").and_then(Value::as_str).map(str::to_string);
                let message = if node.is_none() {
                    Some("Execution complete".to_string())
                } else {
                    None
                };
                Some(ProgressFrame::Executing { node, message })
            }
            "progress" => {
                let value = self.data.get("value").and_then(Value::as_u64).unwrap_or(0);
                let max = self.data.get("max").and_then(Value::as_u64).unwrap_or(0);
                Some(ProgressFrame::Progress {
                    value,
                    max,
                    label: format!("Step {value} of {max}"),
                })
            }
            "executed" => Some(ProgressFrame::Executed {
                node: self.data.get("node").and_then(Value::as_str).unwrap_or_default().to_string(),
                output: self.data.get("output").cloned().unwrap_or(Value::Null),
            }),
            "status" => {
                let queue_remaining = self
                    .data
                    .get("status")
                    .and_then(|s| s.get("exec_info"))
                    .and_then(|e| e.get("queue_remaining"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                Some(ProgressFrame::Status { queue_remaining })
            }
            "execution_error" => Some(ProgressFrame::Error {
                message: self
                    .data
                    .get("exception_message")
                    .and_then(Value::as_str)
                    .unwrap_or("execution failed")
                    .to_string(),
            }),
            _ => None,
        }
    }

    /// "executing" with a null node signals that this prompt id finished
    /// running (spec.md 4.K) — the proxy task can shut down after relaying it.
    pub fn signals_completion(&self) -> bool {
        self.kind == "executing" && self.data.get("node").map(Value::is_null).unwrap_or(false)
    }
}

/// Message a client may send over `/ws/jobs/:id`.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_frame_extracts_value_and_max() {
        let raw = serde_json::json!({"type": "progress", "data": {"value": 3, "max": 20, "prompt_id": "p1"}});
        let frame: UpstreamFrame = serde_json::from_value(raw).unwrap();
        assert_eq!(frame.prompt_id(), Some("p1"));
        match frame.into_progress_frame() {
            Some(ProgressFrame::Progress { value, max, label }) => {
                assert_eq!(value, 3);
                assert_eq!(max, 20);
                assert_eq!(label, "Step 3 of 20");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn executing_with_null_node_signals_completion() {
        let raw = serde_json::json!({"type": "executing", "data": {"node": null, "prompt_id": "p1"}});
        let frame: UpstreamFrame = serde_json::from_value(raw).unwrap();
        assert!(frame.signals_completion());
    }

    #[test]
    fn unknown_kind_has_no_transformed_frame() {
        let raw = serde_json::json!({"type": "execution_cached", "data": {}});
        let frame: UpstreamFrame = serde_json::from_value(raw).unwrap();
        assert!(frame.into_progress_frame().is_none());
    }
}
