//! Shared types for the jupyter-interpreter crates: the error taxonomy,
//! structured trace events, and configuration.

pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};
