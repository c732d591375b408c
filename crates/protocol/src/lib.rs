//! Kernel messaging protocol: the message envelope shared by the relay
//! (WebSocket) and ZMQ paths, typed content for the message kinds the
//! client consumes, the reply collector that correlates and aggregates
//! output, and the kernel connection descriptor.
//!
//! # Envelope
//!
//! ```text
//! { header:        { msg_id, session, username, date, msg_type, version },
//!   parent_header: { ... header of the request being answered ... },
//!   metadata:      { },
//!   content:       { ... variant by msg_type ... },
//!   channel:       "shell" | "iopub" | ... }      (relay only)
//! ```

pub mod collector;
pub mod content;
pub mod descriptor;
pub mod message;

pub use collector::{ExecutionOutcome, OutputEvent, Progress, ReplyCollector};
pub use content::{Content, ExecutionState};
pub use descriptor::{ConnectionDescriptor, REQUIRED_FIELDS};
pub use message::{ExecuteOptions, Header, Message, MsgType, PROTOCOL_VERSION};
