/// Shared error type used across all jupyter-interpreter crates.
///
/// Per-execution code faults are *not* represented here: they are carried
/// as data in an execution outcome so a bad snippet never tears a session
/// down.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Network unreachable, request timeout, relay failure, or a missing /
    /// malformed kernel connection descriptor.
    #[error("connection: {0}")]
    Connection(String),

    /// The control plane rejected the credential (401 / 403).
    #[error("auth: {0}")]
    Auth(String),

    /// Any other non-2xx control-plane response.
    #[error("control plane: {0}")]
    ControlPlane(String),

    /// The kernel reported a fault while running a one-shot program.
    #[error("execution: {0}")]
    Execution(String),

    /// Malformed frames, bad signatures, or a channel that went away.
    #[error("protocol: {0}")]
    Protocol(String),

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Connectivity and credential failures gate whether the process should
    /// run at all.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_fatal_classification() {
        assert!(Error::Connection("refused".into()).is_fatal_at_startup());
        assert!(Error::Auth("401".into()).is_fatal_at_startup());
        assert!(!Error::ControlPlane("500".into()).is_fatal_at_startup());
        assert!(!Error::Protocol("bad frame".into()).is_fatal_at_startup());
    }

    #[test]
    fn display_prefixes() {
        assert_eq!(
            Error::Connection("missing required field: key".into()).to_string(),
            "connection: missing required field: key"
        );
        assert_eq!(Error::Auth("nope".into()).to_string(), "auth: nope");
    }
}
