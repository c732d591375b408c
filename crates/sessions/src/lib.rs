//! Kernel-backed interpreter sessions.
//!
//! A [`Session`] owns one remote kernel and the channel into it, keeps the
//! code that ran successfully, and persists that history by replay. The
//! [`SessionRegistry`] maps caller-facing ids to sessions.

pub mod history;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use history::{dump_program, load_program, Markers, NOT_FOUND_TOKEN};
pub use registry::{generate_id, validate_session_id, ExecuteResponse, Resolved, SessionRegistry, SharedSession};
pub use session::{Session, SessionSettings};
