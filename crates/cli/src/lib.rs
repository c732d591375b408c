//! Process wiring for the `jupyter-interpreter` binary.

pub mod cli;
