//! gmf-pipeline library crate
//!
//! Exposes the orchestrator, agents, tools and session state for
//! integration tests. The CLI entrypoint is in `main.rs`.

pub mod agent;
pub mod ai;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod tools;
