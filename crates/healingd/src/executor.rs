//! Privileged Executor - verifies, rate-limits, executes and audits requests
//!
//! Pipeline per request: parse, verify signature and freshness, resolve and
//! validate the action, rate-limit, execute, respond. Every attempt produces
//! exactly one response and exactly one audit entry, whichever stage stops it.
//!
//! Once an action has been dispatched it runs to completion even if the
//! client disconnects; there is no cancellation path.

use chrono::Utc;
use futures::FutureExt;
use healing_common::error::{FailureKind, HealingError, Result};
use healing_common::protocol::{elapsed_ms, HealingRequest, HealingResponse, MAX_REQUEST_BYTES};
use healing_common::{
    signing, Action, ActionRegistry, AuditLog, HealingConfig, Privilege, RateLimiter,
    SystemRunner,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct PrivilegedExecutor {
    secret: String,
    max_request_age_secs: u64,
    registry: ActionRegistry,
    limiter: RateLimiter,
    audit: AuditLog,
}

impl PrivilegedExecutor {
    /// Production wiring: real processes, system clock, audit file from config.
    pub async fn from_config(config: &HealingConfig) -> anyhow::Result<Self> {
        let privilege = Privilege::detect().await;
        if privilege != Privilege::Root {
            warn!(
                "healingd is not running as root (privilege: {}), actions may fail",
                privilege.as_str()
            );
        }

        let registry = ActionRegistry::new(Arc::new(SystemRunner), privilege);
        let limiter = RateLimiter::new(&config.rate_limit);
        let audit = AuditLog::open(&config.audit_log_path).await?;

        Ok(Self::new(config, registry, limiter, audit))
    }

    pub fn new(
        config: &HealingConfig,
        registry: ActionRegistry,
        limiter: RateLimiter,
        audit: AuditLog,
    ) -> Self {
        Self {
            secret: config.secret.clone(),
            max_request_age_secs: config.max_request_age_secs,
            registry,
            limiter,
            audit,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Handle raw request bytes as read from the socket
    pub async fn handle_raw(&self, bytes: &[u8]) -> HealingResponse {
        if bytes.len() > MAX_REQUEST_BYTES {
            return self.reject("Request too large").await;
        }

        match serde_json::from_slice::<HealingRequest>(bytes) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!("Invalid request JSON: {}", e);
                self.reject(&HealingError::InvalidRequest.to_string()).await
            }
        }
    }

    /// Answer input that never became a request. Audited with the nil id.
    pub async fn reject(&self, message: &str) -> HealingResponse {
        let response = HealingResponse::rejected(message, FailureKind::InvalidRequest);
        self.audit.record_malformed(&response).await;
        response
    }

    pub async fn handle(&self, request: HealingRequest) -> HealingResponse {
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.process(&request))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(output)) => {
                info!("{} {} succeeded", request.id, request.action);
                HealingResponse::success(request.id, output, elapsed_ms(start))
            }
            Ok(Err(e)) => {
                match e.kind() {
                    FailureKind::ExecutionFailed
                    | FailureKind::ExecutionTimeout
                    | FailureKind::InternalError => {
                        error!("{} {} failed: {}", request.id, request.action, e)
                    }
                    _ => warn!("{} {} rejected: {}", request.id, request.action, e),
                }
                HealingResponse::failure(request.id, &e, elapsed_ms(start))
            }
            Err(_) => {
                error!("{} {} panicked", request.id, request.action);
                let e = HealingError::Internal("action handler panicked".to_string());
                HealingResponse::failure(request.id, &e, elapsed_ms(start))
            }
        };

        self.audit.record(&request, &response).await;
        response
    }

    async fn process(&self, request: &HealingRequest) -> Result<String> {
        signing::verify(&self.secret, request)?;
        signing::check_freshness(request, Utc::now(), self.max_request_age_secs)?;

        let action = Action::parse(&request.action, &request.parameters)?;
        self.limiter.check_and_record(action.name())?;

        self.registry.execute(&action).await
    }
}
