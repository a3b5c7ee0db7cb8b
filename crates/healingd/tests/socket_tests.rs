//! Socket tests for healingd
//!
//! Drive a real `SocketServer` over a Unix socket in a temp directory, with a
//! scripted command runner standing in for systemctl and friends.

use healing_common::command_exec::FakeRunner;
use healing_common::protocol::{HealingRequest, HealingResponse, MAX_REQUEST_BYTES};
use healing_common::ratelimit::ManualClock;
use healing_common::{
    ActionRegistry, AuditLog, FailureKind, HealingConfig, Privilege, RateLimitConfig,
    RateLimiter,
};
use healingd::{PrivilegedExecutor, SocketServer};
use serde_json::{json, Map, Value};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const SECRET: &str = "socket-test-secret";

struct Harness {
    _dir: TempDir,
    socket: PathBuf,
    runner: Arc<FakeRunner>,
    executor: Arc<PrivilegedExecutor>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<anyhow::Result<()>>>,
}

impl Harness {
    async fn start(max_requests: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let config = HealingConfig {
            socket_path: dir.path().join("run/healing.sock"),
            socket_group: "luminous-test-group-that-does-not-exist".to_string(),
            audit_log_path: dir.path().join("log/audit.jsonl"),
            secret: SECRET.to_string(),
            rate_limit: RateLimitConfig {
                max_requests,
                window_secs: 300,
            },
            ..HealingConfig::default()
        };

        let runner = Arc::new(FakeRunner::new());
        let executor = Arc::new(PrivilegedExecutor::new(
            &config,
            ActionRegistry::new(runner.clone(), Privilege::Root),
            RateLimiter::with_clock(&config.rate_limit, Box::new(ManualClock::new())),
            AuditLog::open(&config.audit_log_path).await.unwrap(),
        ));

        let server = SocketServer::bind(&config, executor.clone()).unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        Self {
            socket: config.socket_path.clone(),
            _dir: dir,
            runner,
            executor,
            stop: Some(tx),
            task: Some(task),
        }
    }

    async fn stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.unwrap().unwrap();
        }
    }
}

async fn send_raw(socket: &Path, bytes: &[u8]) -> HealingResponse {
    let mut stream = UnixStream::connect(socket).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    serde_json::from_slice(&buf).unwrap()
}

async fn send(socket: &Path, request: &HealingRequest) -> HealingResponse {
    send_raw(socket, &serde_json::to_vec(request).unwrap()).await
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_socket_permissions_and_stale_socket() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("healing.sock");
    std::fs::write(&socket, b"stale").unwrap();

    let config = HealingConfig {
        socket_path: socket.clone(),
        socket_group: "luminous-test-group-that-does-not-exist".to_string(),
        audit_log_path: dir.path().join("audit.jsonl"),
        ..HealingConfig::default()
    };
    let executor = Arc::new(PrivilegedExecutor::new(
        &config,
        ActionRegistry::new(Arc::new(FakeRunner::new()), Privilege::Root),
        RateLimiter::new(&config.rate_limit),
        AuditLog::open(&config.audit_log_path).await.unwrap(),
    ));

    let server = SocketServer::bind(&config, executor).unwrap();
    let mode = std::fs::metadata(server.path()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o660, "Socket should have 0660 permissions");
}

#[tokio::test]
async fn test_restart_service_over_socket() {
    let mut h = Harness::start(10).await;

    let req = HealingRequest::new("restart_service", params(json!({"service": "nginx"})))
        .signed(SECRET);
    let resp = send(&h.socket, &req).await;

    assert!(resp.success, "{:?}", resp.error);
    assert_eq!(resp.request_id, req.id);
    assert_eq!(h.runner.calls()[0].command_line(), "systemctl restart nginx");

    let entries = h.executor.audit().read_all().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].request_id, req.id);
    assert!(entries[0].success);

    h.stop().await;
}

#[tokio::test]
async fn test_malformed_request_over_socket() {
    let mut h = Harness::start(10).await;

    let resp = send_raw(&h.socket, b"this is not json").await;
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("Invalid request format"));
    assert_eq!(resp.request_id, uuid::Uuid::nil());

    let resp = send_raw(&h.socket, b"").await;
    assert_eq!(resp.error_kind, Some(FailureKind::InvalidRequest));

    assert_eq!(h.runner.call_count(), 0);
    assert_eq!(h.executor.audit().entries().await.len(), 2);

    h.stop().await;
}

#[tokio::test]
async fn test_oversize_request_over_socket() {
    let mut h = Harness::start(10).await;

    let mut big = b"{\"padding\":\"".to_vec();
    big.extend(std::iter::repeat(b'a').take(MAX_REQUEST_BYTES + 1024));
    big.extend_from_slice(b"\"}");

    let resp = send_raw(&h.socket, &big).await;
    assert!(!resp.success);
    assert_eq!(resp.error.as_deref(), Some("Request too large"));
    assert_eq!(h.runner.call_count(), 0);

    h.stop().await;
}

#[tokio::test]
async fn test_tampered_requests_never_execute() {
    let mut h = Harness::start(10).await;

    let original = HealingRequest::new("kill_process", params(json!({"pid": 4242})))
        .signed(SECRET);

    let mut wrong_id = original.clone();
    wrong_id.id = uuid::Uuid::new_v4();

    let mut wrong_action = original.clone();
    wrong_action.action = "rollback_generation".to_string();

    let mut wrong_time = original.clone();
    wrong_time.timestamp = wrong_time.timestamp.replace('T', "t");

    let mut wrong_sig = original.clone();
    wrong_sig.signature = Some("0".repeat(64));

    let mut no_sig = original.clone();
    no_sig.signature = None;

    let wrong_secret = HealingRequest::new("kill_process", params(json!({"pid": 4242})))
        .signed("some-other-secret");

    for req in [wrong_id, wrong_action, wrong_time, wrong_sig, no_sig, wrong_secret] {
        let resp = send(&h.socket, &req).await;
        assert!(!resp.success);
        assert_eq!(resp.error_kind, Some(FailureKind::AuthenticationFailure));
        assert_eq!(resp.request_id, req.id);
    }

    assert_eq!(h.runner.call_count(), 0, "no command may run for a bad signature");
    assert_eq!(h.executor.audit().entries().await.len(), 6);

    h.stop().await;
}

#[tokio::test]
async fn test_rate_limit_over_socket() {
    let mut h = Harness::start(3).await;

    for _ in 0..3 {
        let req = HealingRequest::new("clean_nix_store", Map::new()).signed(SECRET);
        assert!(send(&h.socket, &req).await.success);
    }

    let req = HealingRequest::new("clean_nix_store", Map::new()).signed(SECRET);
    let resp = send(&h.socket, &req).await;
    assert_eq!(resp.error_kind, Some(FailureKind::RateLimitExceeded));
    assert_eq!(resp.error.as_deref(), Some("Rate limit exceeded for clean_nix_store"));

    // Other actions keep their own budget
    let other = HealingRequest::new("rollback_generation", Map::new()).signed(SECRET);
    assert!(send(&h.socket, &other).await.success);

    assert_eq!(h.runner.call_count(), 4);
    h.stop().await;
}

#[tokio::test]
async fn test_every_request_is_audited_once() {
    let mut h = Harness::start(10).await;

    let requests = vec![
        HealingRequest::new("restart_service", params(json!({"service": "sshd"}))).signed(SECRET),
        HealingRequest::new("restart_service", params(json!({"service": "a;b"}))).signed(SECRET),
        HealingRequest::new("Restart_Service", Map::new()).signed(SECRET),
        HealingRequest::new("set_cpu_governor", Map::new()),
    ];

    for req in &requests {
        send(&h.socket, req).await;
    }

    let entries = h.executor.audit().read_all().await.unwrap();
    assert_eq!(entries.len(), requests.len());
    for req in &requests {
        assert_eq!(
            entries.iter().filter(|e| e.request_id == req.id).count(),
            1,
            "exactly one entry for {}",
            req.action
        );
    }

    h.stop().await;
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let mut h = Harness::start(10).await;
    assert!(h.socket.exists());

    h.stop().await;
    assert!(!h.socket.exists());
}

#[tokio::test]
async fn test_concurrent_connections() {
    let mut h = Harness::start(50).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let socket = h.socket.clone();
        handles.push(tokio::spawn(async move {
            let req = HealingRequest::new(
                "adjust_swappiness",
                params(json!({ "value": i * 10 })),
            )
            .signed(SECRET);
            send(&socket, &req).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().success);
    }
    assert_eq!(h.executor.audit().entries().await.len(), 10);

    h.stop().await;
}
