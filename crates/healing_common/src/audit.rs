//! Audit Log - Append-only JSONL record of every execution attempt
//!
//! `record` never fails the caller: persistence errors are logged and the
//! entry is still kept in memory.

use crate::error::FailureKind;
use crate::protocol::{HealingRequest, HealingResponse};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

/// Action name recorded for input that never parsed as a request
pub const MALFORMED_ACTION: &str = "<malformed>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub success: bool,
    pub duration_ms: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl AuditEntry {
    pub fn from_exchange(request: &HealingRequest, response: &HealingResponse) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: request.id,
            action: request.action.clone(),
            parameters: request.parameters.clone(),
            success: response.success,
            duration_ms: response.duration_ms,
            error: response.error.clone(),
            error_kind: response.error_kind,
        }
    }

    /// Entry for bytes that could not be parsed as a request
    pub fn malformed(response: &HealingResponse) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: response.request_id,
            action: MALFORMED_ACTION.to_string(),
            parameters: Map::new(),
            success: false,
            duration_ms: response.duration_ms,
            error: response.error.clone(),
            error_kind: response.error_kind,
        }
    }
}

pub struct AuditLog {
    log_path: PathBuf,
    // Held across the file append so lines never interleave
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Open the log, creating its parent directory.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let log_path = path.into();
        if let Some(parent) = log_path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)
                    .await
                    .context("Failed to create audit log directory")?;
            }
        }

        info!("Audit log initialized: {}", log_path.display());

        Ok(Self {
            log_path,
            entries: Mutex::new(Vec::new()),
        })
    }

    pub async fn record(&self, request: &HealingRequest, response: &HealingResponse) {
        self.append(AuditEntry::from_exchange(request, response))
            .await;
    }

    pub async fn record_malformed(&self, response: &HealingResponse) {
        self.append(AuditEntry::malformed(response)).await;
    }

    /// Append an entry. Never fails; disk errors are logged.
    pub async fn append(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock().await;
        if let Err(e) = self.write_line(&entry).await {
            error!(
                "Failed to persist audit entry for {}: {:#}",
                entry.request_id, e
            );
        }
        entries.push(entry);
    }

    async fn write_line(&self, entry: &AuditEntry) -> Result<()> {
        let json = serde_json::to_string(entry)? + "\n";

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .context("Failed to open audit log")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write audit entry")?;

        file.flush().await.context("Failed to flush audit log")?;
        file.sync_all().await.context("Failed to sync audit log")?;

        Ok(())
    }

    /// Snapshot of entries recorded by this process
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Read all entries from disk, skipping unparseable lines
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>> {
        read_entries(&self.log_path).await
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Read an NDJSON audit file written by any process
pub async fn read_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    if !path.exists() {
        return Ok(vec![]);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read audit log")?;

    Ok(content
        .lines()
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
