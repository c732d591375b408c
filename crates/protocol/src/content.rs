//! Typed content for the message kinds the collector consumes.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::message::MsgType;

/// Kernel execution state carried by `status` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Busy,
    Idle,
    Starting,
    #[serde(other)]
    Unknown,
}

/// Decoded message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Stream { name: String, text: String },
    /// `execute_result`, reduced to its `text/plain` representation.
    ExecuteResult { repr: String },
    Error { ename: String, evalue: String },
    Status { state: ExecutionState },
    /// Anything else, including malformed content for a known type.
    Ignored,
}

#[derive(Deserialize)]
struct StreamContent {
    #[serde(default)]
    name: String,
    text: String,
}

#[derive(Deserialize)]
struct ExecuteResultContent {
    #[serde(default)]
    data: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct ErrorContent {
    ename: String,
    evalue: String,
}

#[derive(Deserialize)]
struct StatusContent {
    execution_state: ExecutionState,
}

impl Content {
    pub fn from_message(msg_type: &MsgType, content: &Value) -> Self {
        let parsed = match msg_type {
            MsgType::Stream => serde_json::from_value::<StreamContent>(content.clone())
                .map(|c| Content::Stream {
                    name: c.name,
                    text: c.text,
                }),
            MsgType::ExecuteResult => {
                serde_json::from_value::<ExecuteResultContent>(content.clone()).map(|c| {
                    let repr = match c.data.get("text/plain") {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => String::new(),
                    };
                    Content::ExecuteResult { repr }
                })
            }
            MsgType::Error => serde_json::from_value::<ErrorContent>(content.clone())
                .map(|c| Content::Error {
                    ename: c.ename,
                    evalue: c.evalue,
                }),
            MsgType::Status => serde_json::from_value::<StatusContent>(content.clone())
                .map(|c| Content::Status {
                    state: c.execution_state,
                }),
            _ => return Content::Ignored,
        };

        parsed.unwrap_or_else(|e| {
            tracing::debug!(
                msg_type = msg_type.as_str(),
                error = %e,
                "malformed message content, ignoring"
            );
            Content::Ignored
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream() {
        let c = Content::from_message(
            &MsgType::Stream,
            &json!({"name": "stdout", "text": "Hello, World!\n"}),
        );
        assert_eq!(
            c,
            Content::Stream {
                name: "stdout".into(),
                text: "Hello, World!\n".into()
            }
        );
    }

    #[test]
    fn execute_result_uses_text_plain() {
        let c = Content::from_message(
            &MsgType::ExecuteResult,
            &json!({"data": {"text/plain": "42", "text/html": "<b>42</b>"}, "execution_count": 1}),
        );
        assert_eq!(c, Content::ExecuteResult { repr: "42".into() });
    }

    #[test]
    fn error() {
        let c = Content::from_message(
            &MsgType::Error,
            &json!({"ename": "NameError", "evalue": "name 'x' is not defined", "traceback": []}),
        );
        assert_eq!(
            c,
            Content::Error {
                ename: "NameError".into(),
                evalue: "name 'x' is not defined".into()
            }
        );
    }

    #[test]
    fn status_states() {
        let idle = Content::from_message(&MsgType::Status, &json!({"execution_state": "idle"}));
        assert_eq!(idle, Content::Status { state: ExecutionState::Idle });
        let odd = Content::from_message(&MsgType::Status, &json!({"execution_state": "restarting"}));
        assert_eq!(odd, Content::Status { state: ExecutionState::Unknown });
    }

    #[test]
    fn malformed_known_type_is_ignored() {
        let c = Content::from_message(&MsgType::Stream, &json!({"name": "stdout"}));
        assert_eq!(c, Content::Ignored);
    }

    #[test]
    fn unknown_type_is_ignored() {
        let c = Content::from_message(
            &MsgType::Other("display_data".into()),
            &json!({"data": {"text/plain": "<Figure>"}}),
        );
        assert_eq!(c, Content::Ignored);
    }
}
