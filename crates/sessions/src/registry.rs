//! Process-wide map from session id to live [`Session`].
//!
//! Concurrency discipline:
//! - the map sits behind a `parking_lot::Mutex` that is never held across
//!   an await;
//! - each entry is a `tokio::sync::OnceCell`, so racing first uses of one
//!   id provision exactly one kernel;
//! - each session sits behind its own `tokio::sync::Mutex`, so executes on
//!   one session are serialized while different sessions run in parallel.
//!
//! Sessions are never evicted; closing is up to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;

use ji_domain::config::Config;
use ji_domain::error::{Error, Result};
use ji_domain::trace::TraceEvent;
use ji_kernel::{ControlPlane, KernelConnector, RemoteConnector, RestControlPlane};
use ji_protocol::ExecutionOutcome;

use crate::session::{Session, SessionSettings};

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

type SessionCell = Arc<OnceCell<SharedSession>>;

const MAX_ID_LEN: usize = 128;

/// Clients that cannot omit the id send this instead.
const UNSET_ID: &str = "0";

/// Outcome of [`SessionRegistry::resolve`].
pub struct Resolved {
    pub session_id: String,
    /// Created by this call (possibly restored from saved history).
    pub is_new: bool,
    pub session: SharedSession,
}

/// Result of [`SessionRegistry::execute`], shaped for callers that print
/// or forward it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteResponse {
    pub session_id: String,
    pub is_new: bool,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

pub struct SessionRegistry {
    control: Arc<dyn ControlPlane>,
    connector: Arc<dyn KernelConnector>,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, SessionCell>>,
}

impl SessionRegistry {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        connector: Arc<dyn KernelConnector>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            control,
            connector,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the REST control plane and the configured data plane.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let control = Arc::new(RestControlPlane::new(&cfg.control_plane)?);
        let connector = Arc::new(RemoteConnector::from_config(cfg));
        Ok(Self::new(control, connector, SessionSettings::from_config(cfg)))
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control
    }

    /// Look up a session, creating it on first use.
    ///
    /// `None`, an empty id, or `"0"` mints a fresh identifier and starts a clean
    /// session. A caller-supplied id not yet seen by this process starts a
    /// session and then tries to restore its saved history; a failed
    /// restore still yields a usable, empty session.
    pub async fn resolve(&self, id: Option<&str>) -> Result<Resolved> {
        let (session_id, restore) = match id.filter(|s| !is_unset(s)) {
            Some(id) => {
                validate_session_id(id)?;
                (id.to_owned(), true)
            }
            None => (generate_id(), false),
        };

        let cell = {
            let mut sessions = self.sessions.lock();
            sessions
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut created = false;
        let flag = &mut created;
        let id = session_id.as_str();
        let result = cell
            .get_or_try_init(|| async move {
                *flag = true;
                let mut session = Session::start(
                    id,
                    self.control.clone(),
                    self.connector.as_ref(),
                    &self.settings,
                )
                .await?;
                if restore {
                    let restored = session.load().await;
                    tracing::info!(session_id = %id, restored, "session restore attempted");
                }
                Ok::<_, Error>(Arc::new(tokio::sync::Mutex::new(session)))
            })
            .await;

        let session = match result {
            Ok(session) => session.clone(),
            Err(e) => {
                self.forget_uninitialized(&session_id, &cell);
                return Err(e);
            }
        };

        TraceEvent::SessionResolved {
            session_id: session_id.clone(),
            is_new: created,
        }
        .emit();

        Ok(Resolved {
            session_id,
            is_new: created,
            session,
        })
    }

    /// Resolve, execute, and persist on success.
    ///
    /// Never fails: provisioning faults come back in `errors`. A newly
    /// created session announces its id in `outputs` so the caller can
    /// reuse it.
    pub async fn execute(&self, id: Option<&str>, code: &str) -> ExecuteResponse {
        let resolved = match self.resolve(id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(session_id = ?id, error = %e, "session unavailable");
                return ExecuteResponse {
                    session_id: id.unwrap_or_default().to_owned(),
                    is_new: false,
                    outcome: ExecutionOutcome::failed(format!("Error: {e}")),
                };
            }
        };

        let mut outcome = {
            let mut session = resolved.session.lock().await;
            let outcome = session.execute(code).await;
            if outcome.is_success() {
                if let Err(e) = session.dump().await {
                    tracing::warn!(session_id = %resolved.session_id, error = %e, "history dump failed");
                }
            }
            outcome
        };

        if resolved.is_new {
            outcome.outputs.push(format!(
                "Your session_id for this chat is {}. You should provide it for subsequent requests.",
                resolved.session_id
            ));
        }

        ExecuteResponse {
            session_id: resolved.session_id,
            is_new: resolved.is_new,
            outcome,
        }
    }

    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.sessions.lock().get(id).and_then(|cell| cell.get().cloned())
    }

    /// Remove and close one session. Returns whether it existed.
    pub async fn close(&self, id: &str) -> bool {
        let cell = self.sessions.lock().remove(id);
        match cell.and_then(|cell| cell.get().cloned()) {
            Some(session) => {
                session.lock().await.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let cells: Vec<SessionCell> = self.sessions.lock().drain().map(|(_, c)| c).collect();
        for session in cells.iter().filter_map(|c| c.get()) {
            session.lock().await.close().await;
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .values()
            .filter(|c| c.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, c)| c.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop the entry for a failed first use, unless another caller is
    /// still waiting on the same cell and will retry the provisioning.
    /// Handles are only cloned under the map lock, so the count is exact
    /// here: one for the map, one for `cell`.
    fn forget_uninitialized(&self, id: &str, cell: &SessionCell) {
        let mut sessions = self.sessions.lock();
        if let Some(current) = sessions.get(id) {
            if Arc::ptr_eq(current, cell)
                && !current.initialized()
                && Arc::strong_count(current) == 2
            {
                sessions.remove(id);
            }
        }
    }
}

/// Ids that ask for a new session rather than name one.
fn is_unset(id: &str) -> bool {
    id.is_empty() || id == UNSET_ID
}

/// A fresh collision-resistant session identifier.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ids name history files on the kernel host, so they are restricted to a
/// path-safe alphabet.
pub fn validate_session_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidSessionId(format!(
            "{id:?} (expected 1-{MAX_ID_LEN} of [A-Za-z0-9_.-])"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::*;

    fn registry(kernel: &FakeKernel) -> (SessionRegistry, Arc<FakeControlPlane>) {
        let control = Arc::new(FakeControlPlane::default());
        let connector = Arc::new(FakeConnector::new(kernel.clone()));
        (
            SessionRegistry::new(control.clone(), connector, settings()),
            control,
        )
    }

    #[test]
    fn id_validation() {
        assert!(validate_session_id("1700000000").is_ok());
        assert!(validate_session_id("my-session_2.v1").is_ok());
        for bad in ["", ".", "..", "../etc/passwd", "a/b", "a b", "ü"] {
            assert!(
                matches!(validate_session_id(bad), Err(Error::InvalidSessionId(_))),
                "{bad}"
            );
        }
        assert!(validate_session_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn generated_ids_are_distinct_and_valid() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(validate_session_id(&a).is_ok());
    }

    #[tokio::test]
    async fn unset_id_creates_fresh_session_without_restore() {
        let kernel = FakeKernel::new();
        let (reg, _) = registry(&kernel);

        let r = reg.resolve(None).await.unwrap();
        assert!(r.is_new);
        assert!(validate_session_id(&r.session_id).is_ok());
        // No load program was sent.
        assert!(kernel.sent().is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn known_id_returns_same_session() {
        let kernel = FakeKernel::new();
        let (reg, control) = registry(&kernel);

        let first = reg.resolve(Some("abc")).await.unwrap();
        let second = reg.resolve(Some("abc")).await.unwrap();
        assert!(first.is_new);
        assert!(!second.is_new);
        assert!(Arc::ptr_eq(&first.session, &second.session));
        assert_eq!(control.created(), 1);
    }

    #[tokio::test]
    async fn invalid_id_is_rejected_before_provisioning() {
        let kernel = FakeKernel::new();
        let (reg, control) = registry(&kernel);

        assert!(reg.resolve(Some("../x")).await.is_err());
        assert_eq!(control.created(), 0);
        assert!(reg.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_use_provisions_once() {
        let kernel = FakeKernel::new();
        let control = Arc::new(FakeControlPlane::default());
        let connector = Arc::new(FakeConnector::new(kernel.clone()).with_delay(Duration::from_millis(50)));
        let reg = Arc::new(SessionRegistry::new(control.clone(), connector.clone(), settings()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                reg.resolve(Some("shared")).await.unwrap().is_new
            }));
        }
        let mut new_count = 0;
        for h in handles {
            if h.await.unwrap() {
                new_count += 1;
            }
        }

        assert_eq!(new_count, 1);
        assert_eq!(control.created(), 1);
        assert_eq!(connector.connects(), 1);
        assert_eq!(reg.session_ids(), vec!["shared".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_use_hands_over_to_waiting_caller() {
        let kernel = FakeKernel::new();
        let control = Arc::new(FakeControlPlane::default());
        let connector = Arc::new(
            FakeConnector::new(kernel.clone())
                .with_delay(Duration::from_millis(50))
                .failing_first(1),
        );
        let reg = Arc::new(SessionRegistry::new(control.clone(), connector.clone(), settings()));

        let first = tokio::spawn({
            let reg = reg.clone();
            async move { reg.resolve(Some("x")).await.map(|r| r.session) }
        });
        let second = tokio::spawn({
            let reg = reg.clone();
            async move { reg.resolve(Some("x")).await.map(|r| r.session) }
        });

        assert!(first.await.unwrap().is_err());
        let session = second.await.unwrap().unwrap();

        // The surviving session is the one the registry tracks.
        assert_eq!(reg.len(), 1);
        assert!(Arc::ptr_eq(&reg.get("x").unwrap(), &session));

        let again = reg.resolve(Some("x")).await.unwrap();
        assert!(!again.is_new);
        assert!(Arc::ptr_eq(&again.session, &session));
        assert_eq!(control.created(), 2);

        reg.close_all().await;
        assert_eq!(
            control.shutdowns(),
            vec!["kernel-1".to_string(), "kernel-2".to_string()]
        );
    }

    #[tokio::test]
    async fn zero_id_means_unset() {
        let kernel = FakeKernel::new();
        kernel.put_file("/notebooks/0.txt", "x = 1\n");
        let (reg, _) = registry(&kernel);

        let r = reg.resolve(Some("0")).await.unwrap();
        assert!(r.is_new);
        assert_ne!(r.session_id, "0");
        assert!(kernel.sent().is_empty());
        assert!(kernel.executed().is_empty());
    }

    #[tokio::test]
    async fn execute_dumps_on_success_and_announces_new_id() {
        let kernel = FakeKernel::new();
        let (reg, _) = registry(&kernel);

        let resp = reg.execute(Some("s1"), "print('Hello, World!')").await;
        assert!(resp.is_new);
        assert!(resp.outcome.errors.is_empty());
        assert_eq!(resp.outcome.outputs[0], "Hello, World!\n");
        assert!(resp.outcome.outputs[1].contains("Your session_id for this chat is s1"));
        assert_eq!(
            kernel.file("/notebooks/s1.txt").as_deref(),
            Some("print('Hello, World!')\n")
        );

        let resp = reg.execute(Some("s1"), "21 + 21").await;
        assert!(!resp.is_new);
        assert_eq!(resp.outcome.outputs, vec!["Execution Result: 42"]);
    }

    #[tokio::test]
    async fn failed_execute_does_not_dump() {
        let kernel = FakeKernel::new();
        let (reg, _) = registry(&kernel);

        reg.execute(Some("s1"), "x = 1").await;
        let resp = reg.execute(Some("s1"), "print(x)").await;
        assert_eq!(resp.outcome.errors, vec!["Error: NameError: name 'x' is not defined"]);
        assert_eq!(kernel.file("/notebooks/s1.txt").as_deref(), Some("x = 1\n"));
    }

    #[tokio::test]
    async fn provisioning_failure_is_returned_as_data() {
        let control = Arc::new(FakeControlPlane::default());
        let reg = SessionRegistry::new(control.clone(), Arc::new(FakeConnector::failing()), settings());

        let resp = reg.execute(Some("s1"), "x = 1").await;
        assert_eq!(resp.outcome.errors.len(), 1);
        assert!(resp.outcome.errors[0].contains("missing required field: key"));
        assert!(resp.outcome.outputs.is_empty());
        assert!(reg.is_empty());
        // The half-provisioned kernel was cleaned up.
        assert_eq!(control.shutdowns(), vec!["kernel-1".to_string()]);
    }

    #[tokio::test]
    async fn restart_restores_by_replaying_history() {
        let kernel = FakeKernel::new();

        let (first, _) = registry(&kernel);
        first.execute(Some("persist"), "a = 1").await;
        first.execute(Some("persist"), "b = 2").await;
        first.close_all().await;

        // A new process sees the id for the first time and replays the
        // saved commands: they run again, they are not skipped.
        let before = kernel.executed().len();
        let (second, _) = registry(&kernel);
        let r = second.resolve(Some("persist")).await.unwrap();
        assert!(r.is_new);
        assert_eq!(kernel.executed()[before..], ["a = 1\nb = 2".to_string()]);
        assert_eq!(r.session.lock().await.history(), ["a = 1\nb = 2"]);
    }

    #[tokio::test]
    async fn close_removes_and_shuts_down() {
        let kernel = FakeKernel::new();
        let (reg, control) = registry(&kernel);

        reg.resolve(Some("a")).await.unwrap();
        reg.resolve(Some("b")).await.unwrap();
        assert_eq!(reg.session_ids(), vec!["a".to_string(), "b".to_string()]);

        assert!(reg.close("a").await);
        assert!(!reg.close("a").await);
        assert!(reg.get("a").is_none());
        assert_eq!(reg.len(), 1);

        reg.close_all().await;
        assert!(reg.is_empty());
        assert_eq!(control.shutdowns().len(), 2);
    }
}
