//! Lumen Service Library Crate
//!
//! Configuration and console rendering for the `lumen` binary, which wires
//! the core pipeline to stdin and a speech backend.

pub mod config;
pub mod console;
