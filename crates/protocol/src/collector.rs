//! Reply correlation and output aggregation.
//!
//! A [`ReplyCollector`] is fed every inbound message in arrival order.
//! It drops anything not parented to the outstanding request, records
//! output-bearing messages, and reports [`Progress::Idle`] once the
//! request's `status: idle` sentinel arrives.

use serde::{Deserialize, Serialize};

use crate::content::{Content, ExecutionState};
use crate::message::Message;

/// One output-bearing message, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stream(String),
    Result(String),
    Error { ename: String, evalue: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    /// The kernel finished the request.
    Idle,
}

/// Aggregated result of one `execute`. Success is `errors.is_empty()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub errors: Vec<String>,
    pub outputs: Vec<String>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Outcome for an execution that never produced a kernel reply.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ReplyCollector {
    msg_id: String,
    events: Vec<OutputEvent>,
    errored: bool,
    idle: bool,
}

impl ReplyCollector {
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            events: Vec::new(),
            errored: false,
            idle: false,
        }
    }

    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Feed one inbound message.
    ///
    /// After the first `error`, further output for the same request is
    /// dropped (stop-on-error); the collector still waits for idle so the
    /// channel stays in step with the kernel.
    pub fn accept(&mut self, msg: &Message) -> Progress {
        if self.idle {
            return Progress::Idle;
        }
        if !msg.is_reply_to(&self.msg_id) {
            tracing::trace!(
                expected = %self.msg_id,
                parent = %msg.parent_id(),
                msg_type = msg.msg_type().as_str(),
                "dropping uncorrelated message"
            );
            return Progress::Pending;
        }

        match msg.typed_content() {
            Content::Status {
                state: ExecutionState::Idle,
            } => {
                self.idle = true;
                return Progress::Idle;
            }
            Content::Stream { text, .. } if !self.errored => {
                self.events.push(OutputEvent::Stream(text));
            }
            Content::ExecuteResult { repr } if !self.errored => {
                self.events.push(OutputEvent::Result(repr));
            }
            Content::Error { ename, evalue } if !self.errored => {
                self.errored = true;
                self.events.push(OutputEvent::Error { ename, evalue });
            }
            _ => {}
        }
        Progress::Pending
    }

    /// Labeled outcome: results become `"Execution Result: <repr>"`, errors
    /// `"Error: <ename>: <evalue>"`, streams pass through verbatim.
    pub fn into_outcome(self) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::default();
        for event in self.events {
            match event {
                OutputEvent::Stream(text) => outcome.outputs.push(text),
                OutputEvent::Result(repr) => {
                    outcome.outputs.push(format!("Execution Result: {repr}"))
                }
                OutputEvent::Error { ename, evalue } => {
                    outcome.errors.push(format!("Error: {ename}: {evalue}"))
                }
            }
        }
        outcome
    }

    /// Unlabeled stdout + result text, concatenated. Used when the output
    /// of a one-shot program is parsed rather than shown.
    pub fn plain_text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Stream(t) | OutputEvent::Result(t) => Some(t.as_str()),
                OutputEvent::Error { .. } => None,
            })
            .collect()
    }

    /// `"<ename>: <evalue>"` for every recorded kernel error.
    pub fn kernel_errors(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Error { ename, evalue } => Some(format!("{ename}: {evalue}")),
                _ => None,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
