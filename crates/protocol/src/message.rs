//! Message envelope and request constructors.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::content::Content;

/// Messaging protocol version stamped on every outbound header.
pub const PROTOCOL_VERSION: &str = "5.3";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Header
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Message header. Also used for `parent_header`, which arrives as `{}`
/// on unsolicited messages, hence every field defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    pub msg_id: String,
    pub session: String,
    pub username: String,
    pub date: String,
    pub msg_type: String,
    pub version: String,
}

impl Header {
    fn new(msg_type: MsgType, session: &str) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            session: session.to_owned(),
            username: String::new(),
            date: Utc::now().to_rfc3339(),
            msg_type: msg_type.as_str().to_owned(),
            version: PROTOCOL_VERSION.to_owned(),
        }
    }

    /// An all-default header serializes as a full object; the wire wants
    /// `{}` for "no parent".
    pub fn is_empty(&self) -> bool {
        *self == Header::default()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The message kinds this client sends or consumes. Everything else maps
/// to [`MsgType::Other`] and is ignored by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgType {
    ExecuteRequest,
    ExecuteReply,
    KernelInfoRequest,
    KernelInfoReply,
    Stream,
    ExecuteResult,
    Error,
    Status,
    Other(String),
}

impl MsgType {
    pub fn as_str(&self) -> &str {
        match self {
            MsgType::ExecuteRequest => "execute_request",
            MsgType::ExecuteReply => "execute_reply",
            MsgType::KernelInfoRequest => "kernel_info_request",
            MsgType::KernelInfoReply => "kernel_info_reply",
            MsgType::Stream => "stream",
            MsgType::ExecuteResult => "execute_result",
            MsgType::Error => "error",
            MsgType::Status => "status",
            MsgType::Other(s) => s,
        }
    }
}

impl From<&str> for MsgType {
    fn from(s: &str) -> Self {
        match s {
            "execute_request" => MsgType::ExecuteRequest,
            "execute_reply" => MsgType::ExecuteReply,
            "kernel_info_request" => MsgType::KernelInfoRequest,
            "kernel_info_reply" => MsgType::KernelInfoReply,
            "stream" => MsgType::Stream,
            "execute_result" => MsgType::ExecuteResult,
            "error" => MsgType::Error,
            "status" => MsgType::Status,
            other => MsgType::Other(other.to_owned()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A kernel message as it travels over either transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub header: Header,
    #[serde(default, serialize_with = "serialize_parent")]
    pub parent_header: Header,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(default = "empty_object")]
    pub content: Value,
    /// Relay-only channel tag. ZMQ readers fill it in from the socket the
    /// frames arrived on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn serialize_parent<S: serde::Serializer>(parent: &Header, s: S) -> Result<S::Ok, S::Error> {
    if parent.is_empty() {
        s.collect_map(std::iter::empty::<(&str, &str)>())
    } else {
        parent.serialize(s)
    }
}

/// Flags for an `execute_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Kernel suppresses output and does not bump the execution counter.
    pub silent: bool,
    pub store_history: bool,
    /// Abort queued executions once this one raises.
    pub stop_on_error: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            silent: false,
            store_history: true,
            stop_on_error: true,
        }
    }
}

impl ExecuteOptions {
    /// Fire-and-forget programs (history dumps).
    pub fn silent() -> Self {
        Self {
            silent: true,
            store_history: false,
            stop_on_error: false,
        }
    }

    /// Internal programs whose output is read back but which must not show
    /// up in the kernel's own history.
    pub fn internal() -> Self {
        Self {
            silent: false,
            store_history: false,
            stop_on_error: true,
        }
    }
}

impl Message {
    /// Build an `execute_request` on the shell channel with a fresh msg_id.
    pub fn execute_request(code: &str, opts: ExecuteOptions, session: &str) -> Self {
        Self {
            header: Header::new(MsgType::ExecuteRequest, session),
            parent_header: Header::default(),
            metadata: empty_object(),
            content: serde_json::json!({
                "code": code,
                "silent": opts.silent,
                "store_history": opts.store_history,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": opts.stop_on_error,
            }),
            channel: Some("shell".into()),
        }
    }

    /// Build a `kernel_info_request`, used to probe kernel readiness.
    pub fn kernel_info_request(session: &str) -> Self {
        Self {
            header: Header::new(MsgType::KernelInfoRequest, session),
            parent_header: Header::default(),
            metadata: empty_object(),
            content: empty_object(),
            channel: Some("shell".into()),
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> MsgType {
        MsgType::from(self.header.msg_type.as_str())
    }

    /// The msg_id of the request this message answers (empty if none).
    pub fn parent_id(&self) -> &str {
        &self.parent_header.msg_id
    }

    /// Whether this message answers the request with the given id.
    pub fn is_reply_to(&self, msg_id: &str) -> bool {
        !msg_id.is_empty() && self.parent_id() == msg_id
    }

    /// Decode the content according to the message type.
    pub fn typed_content(&self) -> Content {
        Content::from_message(&self.msg_type(), &self.content)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
