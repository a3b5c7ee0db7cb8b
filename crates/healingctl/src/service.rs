//! Service Executor - talks to healingd over its Unix socket
//!
//! One signed request per connection. A request that times out on the client
//! side may still complete in the daemon: there is no cancel message and no
//! retry.

use crate::executor::{ExecutionMode, ExecutionResult, Executor};
use async_trait::async_trait;
use healing_common::{
    ActionName, HealingConfig, HealingError, HealingRequest, HealingResponse, Result,
};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

/// Extra time allowed on top of the action's own timeout
const RESPONSE_MARGIN: Duration = Duration::from_secs(30);

/// Used when the action name is unknown locally; the daemon will reject it
const FALLBACK_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceExecutor {
    socket_path: PathBuf,
    socket_group: String,
    secret: String,
    connect_timeout: Duration,
}

impl ServiceExecutor {
    pub fn new(config: &HealingConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            socket_group: config.socket_group.clone(),
            secret: config.secret.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// The daemon's socket exists
    pub fn is_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// How long to wait for the daemon to answer a request for `action`
    pub fn response_timeout(action: &str) -> Duration {
        ActionName::from_str(action)
            .map(|name| name.timeout())
            .unwrap_or(FALLBACK_ACTION_TIMEOUT)
            + RESPONSE_MARGIN
    }

    /// Sign and send one request, wait for its response.
    pub async fn send(&self, request: HealingRequest) -> Result<HealingResponse> {
        let request = request.signed(&self.secret);
        let wait = Self::response_timeout(&request.action);

        let mut stream = self.connect().await?;
        let body = serde_json::to_vec(&request)?;

        debug!("Sending {} ({}) to {}", request.action, request.id, self.socket_path.display());

        let exchange = async {
            stream.write_all(&body).await?;
            stream.shutdown().await?;
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };

        let buf = match tokio::time::timeout(wait, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(HealingError::ExecutionTimeout {
                    command: request.action.clone(),
                    timeout_secs: wait.as_secs(),
                })
            }
        };

        let response: HealingResponse = serde_json::from_slice(&buf)
            .map_err(|e| HealingError::InvalidResponse(e.to_string()))?;
        if response.request_id != request.id {
            return Err(HealingError::Internal(format!(
                "response for {} does not match request {}",
                response.request_id, request.id
            )));
        }
        Ok(response)
    }

    async fn connect(&self) -> Result<UnixStream> {
        match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(self.connect_error(e)),
            Err(_) => Err(HealingError::ServiceUnavailable(format!(
                "connection to {} timed out",
                self.socket_path.display()
            ))),
        }
    }

    fn connect_error(&self, error: std::io::Error) -> HealingError {
        match error.kind() {
            ErrorKind::PermissionDenied => HealingError::SocketPermissionDenied {
                path: self.socket_path.display().to_string(),
                group: self.socket_group.clone(),
            },
            ErrorKind::NotFound => HealingError::ServiceUnavailable(format!(
                "socket not found at {}",
                self.socket_path.display()
            )),
            ErrorKind::ConnectionRefused => HealingError::ServiceUnavailable(format!(
                "nothing is listening on {}",
                self.socket_path.display()
            )),
            _ => HealingError::ServiceUnavailable(error.to_string()),
        }
    }
}

#[async_trait]
impl Executor for ServiceExecutor {
    fn executor_type(&self) -> &'static str {
        "ServiceExecutor"
    }

    fn capabilities(&self) -> Vec<String> {
        ActionName::ALL.iter().map(|a| a.as_str().to_string()).collect()
    }

    async fn execute(&self, action: &str, params: &Map<String, Value>) -> Result<ExecutionResult> {
        if !self.is_available() {
            return Err(HealingError::ServiceUnavailable(
                "This is required for production mode".to_string(),
            ));
        }

        let request = HealingRequest::new(action, params.clone());
        let response = self.send(request).await?;
        Ok(ExecutionResult::from_response(ExecutionMode::Service, response))
    }
}
