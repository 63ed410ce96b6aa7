//! Task orchestrator
//!
//! The central dispatcher: wraps fallible async operations with
//! per-operation-type timeouts, tracks them in a live registry, and on
//! timeout or failure notifies the owner and optionally runs a fallback.

mod core;
mod task;

pub use core::{OrchestratorConfig, OrchestratorError, OrchestratorHealth, TaskOrchestrator};
pub use task::{TaskSnapshot, TaskStatus, TrackedTask};
