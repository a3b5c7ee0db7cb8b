//! healingctl - unprivileged client for the Luminous healing executor
//!
//! `PermissionHandler` is the entry point: it resolves the execution mode once
//! and routes every action either to healingd (`ServiceExecutor`) or to local
//! execution (`DevelopmentExecutor`).

pub mod commands;
pub mod development;
pub mod errors;
pub mod executor;
pub mod permission;
pub mod service;

pub use development::DevelopmentExecutor;
pub use executor::{ExecutionMode, ExecutionResult, Executor};
pub use permission::{HandlerStatus, PermissionHandler};
pub use service::ServiceExecutor;
