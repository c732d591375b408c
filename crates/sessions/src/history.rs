//! Replay-based persistence programs.
//!
//! There is no way to snapshot a kernel's memory from outside, so a
//! session persists the code that built its state and replays it. Both
//! programs run inside the kernel and touch the kernel's filesystem, not
//! ours. Every value is embedded as a JSON literal, which Python parses as
//! a string or list literal, so paths and code never need escaping here.

use serde_json::Value;

/// Printed by the load program when the history file does not exist.
pub const NOT_FOUND_TOKEN: &str = "__JI_HISTORY_NOT_FOUND__";

/// Program that writes `entries` to `path`, one entry per line, creating
/// parent directories.
pub fn dump_program(path: &str, entries: &[String]) -> String {
    format!(
        r#"def _ji_dump(path, entries):
    import os
    parent = os.path.dirname(path)
    if parent:
        os.makedirs(parent, exist_ok=True)
    with open(path, "w") as f:
        for entry in entries:
            f.write(entry + "\n")
_ji_dump({path}, {entries})
del _ji_dump
"#,
        path = literal(path),
        entries = Value::from(entries.to_vec()),
    )
}

/// Sentinel pair wrapping the file contents in the load program's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub begin: String,
    pub end: String,
}

impl Markers {
    /// Fresh markers; the random part keeps file contents from faking them.
    pub fn new() -> Self {
        Self::with_nonce(&uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn with_nonce(nonce: &str) -> Self {
        Self {
            begin: format!("__JI_HISTORY_BEGIN_{nonce}__"),
            end: format!("__JI_HISTORY_END_{nonce}__"),
        }
    }
}

impl Default for Markers {
    fn default() -> Self {
        Self::new()
    }
}

/// Program that prints [`NOT_FOUND_TOKEN`] when `path` is absent, else the
/// file contents between the markers.
pub fn load_program(path: &str, markers: &Markers) -> String {
    format!(
        r#"def _ji_load(path, begin, end):
    import os, sys
    if not os.path.exists(path):
        print({not_found})
        return
    with open(path) as f:
        data = f.read()
    sys.stdout.write(begin + data + end + "\n")
    sys.stdout.flush()
_ji_load({path}, {begin}, {end})
del _ji_load
"#,
        not_found = literal(NOT_FOUND_TOKEN),
        path = literal(path),
        begin = literal(&markers.begin),
        end = literal(&markers.end),
    )
}

/// What the load program reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutput {
    NotFound,
    Found(String),
    /// Neither the token nor a complete marker pair was printed.
    Unrecognized,
}

pub fn parse_load_output(output: &str, markers: &Markers) -> LoadOutput {
    if let Some(start) = output.find(&markers.begin) {
        let body = &output[start + markers.begin.len()..];
        return match body.rfind(&markers.end) {
            Some(end) => LoadOutput::Found(body[..end].to_owned()),
            None => LoadOutput::Unrecognized,
        };
    }
    if output.trim() == NOT_FOUND_TOKEN {
        return LoadOutput::NotFound;
    }
    LoadOutput::Unrecognized
}

fn literal(s: &str) -> String {
    Value::String(s.to_owned()).to_string()
}
