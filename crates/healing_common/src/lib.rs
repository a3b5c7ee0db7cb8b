//! Healing Common - shared types for the Luminous healing executor
//!
//! Action whitelist, wire protocol, request signing, rate limiting, audit
//! log and the command runner used by both the daemon and the client.

pub mod action;
pub mod audit;
pub mod command_exec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod ratelimit;
pub mod registry;
pub mod signing;

pub use action::{Action, ActionName};
pub use audit::{AuditEntry, AuditLog};
pub use command_exec::{CommandRunner, CommandSpec, Privilege, SystemRunner};
pub use config::{HealingConfig, RateLimitConfig};
pub use error::{FailureKind, HealingError, Result};
pub use protocol::{HealingRequest, HealingResponse};
pub use ratelimit::{Clock, ManualClock, RateLimiter, SystemClock};
pub use registry::ActionRegistry;
