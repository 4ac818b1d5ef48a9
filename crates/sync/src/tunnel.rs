// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Runicorn Contributors

//! Tunneled Viewer Session: launches a
//! remote `runicorn viewer --remote-mode` process and forwards a local
//! port to it over SSH, trying interchangeable tunnel backends in
//! order until one works.

use std::collections::HashMap;
use std::io::Read as _;
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use runicorn_core::{Result, RunicornError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ssh_pool::{ConnectionConfig, ConnectionPool};

const REMOTE_PORT_RANGE: std::ops::Range<u16> = 8080..9000;
const EARLY_FAILURE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelBackendKind {
    /// Shells out to the system `ssh -N -L ...` binary.
    OpensshProcess,
    /// An async-capable native SSH library path.
    NativeAsync,
    /// A synchronous native SSH library path (`ssh2`, used throughout
    /// this workspace).
    NativeSync,
}

/// External-introspection shape for a viewer session (the write-path contract
/// §4.6.6 "Session state").
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: String,
    pub host: String,
    pub ssh_port: u16,
    pub username: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub remote_root: String,
    pub remote_pid: Option<u32>,
    pub status: SessionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl SessionState {
    pub fn uptime_seconds(&self) -> i64 {
        (chrono::Utc::now() - self.started_at).num_seconds().max(0)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Running
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.local_port)
    }
}

/// Remote-side operations a viewer session needs: resolving a Python
/// interpreter, verifying `runicorn` is importable, launching the
/// remote viewer process, and probing/killing it (the write-path contract
/// steps 1-4).
pub trait RemoteProcessHost: Send + Sync {
    fn resolve_python(&self, explicit: Option<&str>) -> Result<String>;
    /// Returns the importable `runicorn` version string.
    fn verify_runicorn(&self, python: &str) -> Result<String>;
    fn find_free_port(&self, range: std::ops::Range<u16>) -> Result<u16>;
    fn launch_viewer(
        &self,
        python: &str,
        bind_host: &str,
        port: u16,
        storage_root: &str,
        log_path: &str,
    ) -> Result<u32>;
    fn probe_tcp(&self, host: &str, port: u16) -> Result<bool>;
    fn kill(&self, pid: u32) -> Result<()>;
}

/// A running (or failed-to-start) tunnel, owned by the caller so it can
/// be stopped and polled for early failure.
pub trait TunnelHandle: Send {
    fn stop(&mut self);
    /// Poll for an early failure (bind failure, host-key mismatch)
    /// within a bounded window.
    fn poll_early_failure(&mut self, within: Duration) -> Option<RunicornError>;
}

pub trait TunnelBackend: Send + Sync {
    fn kind(&self) -> TunnelBackendKind;
    fn create_tunnel(
        &self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelHandle>>;
}

/// Tries backends in order, falling back on any non-host-key error
///. A host-key confirmation error propagates to the
/// caller unchanged rather than triggering fallback.
pub struct AutoBackend {
    backends: Vec<Arc<dyn TunnelBackend>>,
}

impl AutoBackend {
    pub fn new(backends: Vec<Arc<dyn TunnelBackend>>) -> Self {
        Self { backends }
    }

    fn create_tunnel(
        &self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelHandle>> {
        let mut last_err = None;
        for backend in &self.backends {
            match backend.create_tunnel(local_port, remote_host, remote_port) {
                Ok(mut handle) => match handle.poll_early_failure(EARLY_FAILURE_WINDOW) {
                    None => return Ok(handle),
                    Some(err @ RunicornError::Conflict(_)) => return Err(err),
                    Some(err) => {
                        warn!(backend = ?backend.kind(), error = %err, "tunnel backend failed early, falling back");
                        handle.stop();
                        last_err = Some(err);
                    }
                },
                Err(err @ RunicornError::Conflict(_)) => return Err(err),
                Err(err) => {
                    warn!(backend = ?backend.kind(), error = %err, "tunnel backend unavailable, falling back");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| RunicornError::Fatal("no tunnel backend available".to_string())))
    }
}

pub struct StartSessionRequest {
    pub host: String,
    pub ssh_port: u16,
    pub username: String,
    pub remote_root: String,
    pub python_interpreter: Option<String>,
    pub timeout: Duration,
}

struct ManagedSession {
    state: SessionState,
    tunnel: Box<dyn TunnelHandle>,
}

/// Owns the lifecycle of tunneled viewer sessions: start, introspect,
/// stop.
pub struct ViewerSessionManager {
    process_host: Arc<dyn RemoteProcessHost>,
    tunnel_backend: Arc<AutoBackend>,
    sessions: Mutex<HashMap<String, ManagedSession>>,
}

impl ViewerSessionManager {
    pub fn new(process_host: Arc<dyn RemoteProcessHost>, tunnel_backend: Arc<AutoBackend>) -> Self {
        Self { process_host, tunnel_backend, sessions: Mutex::new(HashMap::new()) }
    }

    /// Execute the startup sequence Any failed
    /// step rolls back everything started by earlier steps.
    pub fn start_session(&self, req: StartSessionRequest) -> Result<SessionState> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let python = self.process_host.resolve_python(req.python_interpreter.as_deref())?;
        let _version = self.process_host.verify_runicorn(&python)?;

        let remote_port = self.process_host.find_free_port(REMOTE_PORT_RANGE)?;
        let local_port = find_free_local_port(REMOTE_PORT_RANGE)?;

        let log_path = format!("/tmp/runicorn_viewer_{session_id}.log");
        let pid = self.process_host.launch_viewer(
            &python,
            "127.0.0.1",
            remote_port,
            &req.remote_root,
            &log_path,
        )?;

        if let Err(e) = self.wait_for_remote_port(remote_port, req.timeout) {
            let _ = self.process_host.kill(pid);
            return Err(e);
        }

        let tunnel = match self.tunnel_backend.create_tunnel(local_port, "127.0.0.1", remote_port) {
            Ok(t) => t,
            Err(e) => {
                let _ = self.process_host.kill(pid);
                return Err(e);
            }
        };

        let state = SessionState {
            session_id: session_id.clone(),
            host: req.host,
            ssh_port: req.ssh_port,
            username: req.username,
            local_port,
            remote_port,
            remote_root: req.remote_root,
            remote_pid: Some(pid),
            status: SessionStatus::Running,
            started_at: chrono::Utc::now(),
        };

        info!(session_id = %session_id, local_port, remote_port, "viewer session started");
        self.sessions.lock().insert(
            session_id,
            ManagedSession { state: state.clone(), tunnel },
        );
        Ok(state)
    }

    fn wait_for_remote_port(&self, remote_port: u16, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.process_host.probe_tcp("127.0.0.1", remote_port)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RunicornError::Timeout(format!(
                    "remote viewer did not start listening on port {remote_port} within {timeout:?}"
                )));
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    pub fn stop_session(&self, session_id: &str) -> Result<()> {
        let mut managed = self
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| RunicornError::NotFound(format!("no viewer session {session_id}")))?;
        managed.tunnel.stop();
        if let Some(pid) = managed.state.remote_pid {
            self.process_host.kill(pid)?;
        }
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|m| m.state.clone())
    }

    pub fn list_sessions(&self) -> Vec<SessionState> {
        self.sessions.lock().values().map(|m| m.state.clone()).collect()
    }
}

impl Clone for SessionState {
    fn clone(&self) -> Self {
        Self {
            session_id: self.session_id.clone(),
            host: self.host.clone(),
            ssh_port: self.ssh_port,
            username: self.username.clone(),
            local_port: self.local_port,
            remote_port: self.remote_port,
            remote_root: self.remote_root.clone(),
            remote_pid: self.remote_pid,
            status: self.status,
            started_at: self.started_at,
        }
    }
}

/// Bind-probe a free local port in `range`, the same way the source
/// finds a free remote port (the write-path contract step 3) — tried locally
/// since this half never crosses the SSH channel.
fn find_free_local_port(range: std::ops::Range<u16>) -> Result<u16> {
    for port in range.clone() {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    Err(RunicornError::Rejected(format!("no free local port in {range:?}")))
}

/// SSH-exec-backed [`RemoteProcessHost`]: every operation is a short
/// remote command run to completion over a pooled connection
/// (the write-path contract steps 1-4).
pub struct SshProcessHost {
    pool: Arc<ConnectionPool>,
    config: ConnectionConfig,
}

impl SshProcessHost {
    pub fn new(pool: Arc<ConnectionPool>, config: ConnectionConfig) -> Self {
        Self { pool, config }
    }

    fn exec(&self, command: &str) -> Result<(String, String, i32)> {
        let conn = self.pool.get_or_create(&self.config)?;
        let guard = conn.lock();
        let mut channel = guard
            .session
            .channel_session()
            .map_err(|e| RunicornError::IoFailure(format!("open channel: {e}")))?;
        channel.exec(command).map_err(|e| RunicornError::IoFailure(format!("exec: {e}")))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|e| RunicornError::IoFailure(format!("read stdout: {e}")))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|e| RunicornError::IoFailure(format!("read stderr: {e}")))?;
        channel.wait_close().map_err(|e| RunicornError::IoFailure(format!("wait close: {e}")))?;
        let status = channel.exit_status().unwrap_or(-1);
        Ok((stdout, stderr, status))
    }
}

impl RemoteProcessHost for SshProcessHost {
    fn resolve_python(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(p) = explicit {
            return Ok(p.to_string());
        }
        let (out, _, status) = self.exec("which python3")?;
        if status == 0 && !out.trim().is_empty() {
            return Ok(out.trim().to_string());
        }
        let (out, _, status) = self.exec("command -v conda >/dev/null 2>&1 && conda info --base")?;
        if status == 0 && !out.trim().is_empty() {
            return Ok(format!("{}/bin/python3", out.trim()));
        }
        Err(RunicornError::NotFound("no python3 interpreter found on remote host".to_string()))
    }

    fn verify_runicorn(&self, python: &str) -> Result<String> {
        let cmd = format!(r#"{python} -c "import runicorn; print(runicorn.__version__)""#);
        let (out, err, status) = self.exec(&cmd)?;
        if status != 0 {
            return Err(RunicornError::NotFound(format!("runicorn not importable: {err}")));
        }
        Ok(out.trim().to_string())
    }

    fn find_free_port(&self, range: std::ops::Range<u16>) -> Result<u16> {
        for port in range.clone() {
            let cmd = format!(
                r#"python3 -c "import socket,sys; s=socket.socket(); sys.exit(0 if s.connect_ex(('127.0.0.1',{port}))!=0 else 1)""#
            );
            if let Ok((_, _, status)) = self.exec(&cmd) {
                if status == 0 {
                    return Ok(port);
                }
            }
        }
        Err(RunicornError::Rejected(format!("no free remote port in {range:?}")))
    }

    fn launch_viewer(
        &self,
        python: &str,
        bind_host: &str,
        port: u16,
        storage_root: &str,
        log_path: &str,
    ) -> Result<u32> {
        let cmd = format!(
            "nohup {python} -m runicorn viewer --host {bind_host} --port {port} --storage {storage_root} --remote-mode > {log_path} 2>&1 & echo $!"
        );
        let (out, err, status) = self.exec(&cmd)?;
        if status != 0 {
            return Err(RunicornError::IoFailure(format!("failed to launch remote viewer: {err}")));
        }
        out.trim()
            .parse::<u32>()
            .map_err(|_| RunicornError::IoFailure(format!("could not parse remote pid from: {out}")))
    }

    fn probe_tcp(&self, host: &str, port: u16) -> Result<bool> {
        let cmd = format!(
            r#"python3 -c "import socket,sys; s=socket.socket(); sys.exit(0 if s.connect_ex(('{host}',{port}))==0 else 1)""#
        );
        match self.exec(&cmd) {
            Ok((_, _, status)) => Ok(status == 0),
            Err(_) => Ok(false),
        }
    }

    fn kill(&self, pid: u32) -> Result<()> {
        let (_, err, status) = self.exec(&format!("kill {pid}"))?;
        if status != 0 {
            warn!(pid, error = %err, "failed to kill remote viewer process");
        }
        Ok(())
    }
}

/// `ssh2`-backed native tunnel: forwards `127.0.0.1:<local_port>` to
/// `remote_host:remote_port` through `direct-tcpip` channels opened on
/// a pooled connection (the write-path contract, "async native" and "sync
/// native" both resolve to this implementation — this workspace has a
/// single native SSH library, `ssh2`; see `DESIGN.md`).
pub struct NativeSshTunnelBackend {
    pool: Arc<ConnectionPool>,
    config: ConnectionConfig,
    kind: TunnelBackendKind,
}

impl NativeSshTunnelBackend {
    pub fn new(pool: Arc<ConnectionPool>, config: ConnectionConfig, kind: TunnelBackendKind) -> Self {
        Self { pool, config, kind }
    }
}

struct NativeTunnelHandle {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
    early_failure: Arc<Mutex<Option<String>>>,
}

impl TunnelHandle for NativeTunnelHandle {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    fn poll_early_failure(&mut self, within: Duration) -> Option<RunicornError> {
        let deadline = Instant::now() + within;
        loop {
            if let Some(msg) = self.early_failure.lock().take() {
                return Some(RunicornError::IoFailure(msg));
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl TunnelBackend for NativeSshTunnelBackend {
    fn kind(&self) -> TunnelBackendKind {
        self.kind
    }

    fn create_tunnel(
        &self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelHandle>> {
        let listener = TcpListener::bind(("127.0.0.1", local_port))
            .map_err(|e| RunicornError::IoFailure(format!("bind 127.0.0.1:{local_port}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| RunicornError::IoFailure(format!("listener nonblocking: {e}")))?;

        let pool = self.pool.clone();
        let config = self.config.clone();
        let remote_host = remote_host.to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let early_failure = Arc::new(Mutex::new(None));

        let thread_stop = stop.clone();
        let thread_failure = early_failure.clone();
        let join = std::thread::Builder::new()
            .name("runicorn-tunnel".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    match listener.accept() {
                        Ok((client, _addr)) => {
                            let pool = pool.clone();
                            let config = config.clone();
                            let remote_host = remote_host.clone();
                            let stop = thread_stop.clone();
                            std::thread::spawn(move || {
                                if let Err(e) =
                                    forward_client(client, &pool, &config, &remote_host, remote_port, stop)
                                {
                                    warn!(error = %e, "tunnel client forwarding ended");
                                }
                            });
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            std::thread::sleep(Duration::from_millis(50));
                        }
                        Err(e) => {
                            *thread_failure.lock() =
                                Some(format!("accept failed: {e}"));
                            break;
                        }
                    }
                }
            })
            .map_err(|e| RunicornError::Fatal(format!("spawn tunnel thread: {e}")))?;

        Ok(Box::new(NativeTunnelHandle { stop, join: Some(join), early_failure }))
    }
}

fn forward_client(
    mut client: TcpStream,
    pool: &ConnectionPool,
    config: &ConnectionConfig,
    remote_host: &str,
    remote_port: u16,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    use std::io::Write as _;

    let conn = pool.get_or_create(config)?;
    let peer = client.peer_addr().map(|a| (a.ip().to_string(), a.port())).unwrap_or(("0.0.0.0".into(), 0));
    let mut channel = {
        let guard = conn.lock();
        guard
            .session
            .channel_direct_tcpip(remote_host, remote_port, Some((peer.0.as_str(), peer.1)))
            .map_err(|e| RunicornError::IoFailure(format!("direct-tcpip: {e}")))?
    };

    client
        .set_read_timeout(Some(Duration::from_millis(200)))
        .map_err(|e| RunicornError::IoFailure(e.to_string()))?;
    let mut buf = [0u8; 4096];
    while !stop.load(Ordering::SeqCst) {
        match client.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                channel.write_all(&buf[..n]).map_err(|e| RunicornError::IoFailure(e.to_string()))?;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(RunicornError::IoFailure(e.to_string())),
        }
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => client.write_all(&buf[..n]).map_err(|e| RunicornError::IoFailure(e.to_string()))?,
            Err(_) => {}
        }
    }
    let _ = channel.close();
    Ok(())
}

/// Shells out to the system `ssh` binary: `-N -L
/// 127.0.0.1:<lp>:<rh>:<rp>` with `BatchMode` and strict host-key
/// checking against the process-managed known-hosts file. Parses
/// stderr for host-key failures so the 409 payload can be completed
/// via `ssh-keyscan`.
pub struct OpensshProcessTunnelBackend {
    pub ssh_binary: String,
    pub known_hosts_path: std::path::PathBuf,
    pub ssh_port: u16,
    pub username: String,
    pub host: String,
}

struct OpensshTunnelHandle {
    child: Child,
    early_failure: Option<RunicornError>,
}

impl TunnelHandle for OpensshTunnelHandle {
    fn stop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }

    fn poll_early_failure(&mut self, _within: Duration) -> Option<RunicornError> {
        self.early_failure.take()
    }
}

impl TunnelBackend for OpensshProcessTunnelBackend {
    fn kind(&self) -> TunnelBackendKind {
        TunnelBackendKind::OpensshProcess
    }

    fn create_tunnel(
        &self,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Box<dyn TunnelHandle>> {
        let forward = format!("127.0.0.1:{local_port}:{remote_host}:{remote_port}");
        let mut child = Command::new(&self.ssh_binary)
            .args([
                "-N",
                "-L",
                &forward,
                "-o",
                "BatchMode=yes",
                "-o",
                "ExitOnForwardFailure=yes",
                "-o",
                "StrictHostKeyChecking=yes",
                "-o",
                &format!("UserKnownHostsFile={}", self.known_hosts_path.display()),
                "-o",
                "ServerAliveInterval=30",
                "-p",
                &self.ssh_port.to_string(),
                &format!("{}@{}", self.username, self.host),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RunicornError::IoFailure(format!("spawn ssh: {e}")))?;

        std::thread::sleep(EARLY_FAILURE_WINDOW);
        let early_failure = match child.try_wait() {
            Ok(Some(_status)) => {
                let mut stderr_text = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut stderr_text);
                }
                Some(classify_ssh_failure(&stderr_text, &self.host, self.ssh_port))
            }
            Ok(None) => None,
            Err(e) => Some(RunicornError::IoFailure(format!("wait ssh child: {e}"))),
        };

        Ok(Box::new(OpensshTunnelHandle { child, early_failure }))
    }
}

/// Capped recent stderr lines, so a runaway process can't flood
/// diagnostics.
const MAX_STDERR_LINES: usize = 20;

fn classify_ssh_failure(stderr: &str, host: &str, port: u16) -> RunicornError {
    let tail: Vec<&str> = stderr.lines().rev().take(MAX_STDERR_LINES).collect();
    let joined = tail.join("\n");
    if joined.contains("Host key verification failed") || joined.contains("REMOTE HOST IDENTIFICATION HAS CHANGED") {
        // The caller is expected to retrieve the presented key via
        // `ssh-keyscan -p <port> -T 5 <host>` to complete the 409
        // payload; this classification only establishes the reason.
        RunicornError::Conflict(format!("host key verification failed for {host}:{port}"))
    } else {
        RunicornError::IoFailure(format!("ssh tunnel exited early: {joined}"))
    }
}

/// Retrieves the key currently presented by `host:port` via
/// `ssh-keyscan`, used to complete a [`RunicornError::Conflict`]'s
/// `HostKeyProblem` payload when the OpenSSH-process backend detects a
/// mismatch.
pub fn keyscan_presented_key(host: &str, port: u16) -> Result<String> {
    let output = Command::new("ssh-keyscan")
        .args(["-p", &port.to_string(), "-T", "5", host])
        .output()
        .map_err(|e| RunicornError::IoFailure(format!("ssh-keyscan: {e}")))?;
    if !output.status.success() {
        return Err(RunicornError::IoFailure("ssh-keyscan exited non-zero".to_string()));
    }
    String::from_utf8(output.stdout).map_err(|e| RunicornError::Corrupt(format!("ssh-keyscan output: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHost {
        remote_port: u16,
        listening_after: Mutex<u32>,
        killed: Mutex<Vec<u32>>,
        fail_verify: bool,
    }

    impl FakeHost {
        fn new(remote_port: u16) -> Self {
            Self { remote_port, listening_after: Mutex::new(0), killed: Mutex::new(Vec::new()), fail_verify: false }
        }
    }

    impl RemoteProcessHost for FakeHost {
        fn resolve_python(&self, explicit: Option<&str>) -> Result<String> {
            Ok(explicit.unwrap_or("/usr/bin/python3").to_string())
        }

        fn verify_runicorn(&self, _python: &str) -> Result<String> {
            if self.fail_verify {
                Err(RunicornError::NotFound("runicorn not importable".to_string()))
            } else {
                Ok("0.2.0".to_string())
            }
        }

        fn find_free_port(&self, _range: std::ops::Range<u16>) -> Result<u16> {
            Ok(self.remote_port)
        }

        fn launch_viewer(&self, _python: &str, _host: &str, _port: u16, _root: &str, _log: &str) -> Result<u32> {
            Ok(4242)
        }

        fn probe_tcp(&self, _host: &str, _port: u16) -> Result<bool> {
            let mut n = self.listening_after.lock();
            if *n == 0 {
                Ok(true)
            } else {
                *n -= 1;
                Ok(false)
            }
        }

        fn kill(&self, pid: u32) -> Result<()> {
            self.killed.lock().push(pid);
            Ok(())
        }
    }

    struct FakeTunnel {
        kind: TunnelBackendKind,
        fail: Option<RunicornError>,
    }

    struct FakeHandle {
        stopped: bool,
        early_failure: Option<RunicornError>,
    }

    impl TunnelHandle for FakeHandle {
        fn stop(&mut self) {
            self.stopped = true;
        }
        fn poll_early_failure(&mut self, _within: Duration) -> Option<RunicornError> {
            self.early_failure.take()
        }
    }

    impl TunnelBackend for FakeTunnel {
        fn kind(&self) -> TunnelBackendKind {
            self.kind
        }
        fn create_tunnel(&self, _lp: u16, _rh: &str, _rp: u16) -> Result<Box<dyn TunnelHandle>> {
            match &self.fail {
                Some(RunicornError::Conflict(m)) => Err(RunicornError::Conflict(m.clone())),
                Some(_) => Ok(Box::new(FakeHandle { stopped: false, early_failure: Some(RunicornError::IoFailure("bind failed".into())) })),
                None => Ok(Box::new(FakeHandle { stopped: false, early_failure: None })),
            }
        }
    }

    fn manager(host: FakeHost, backends: Vec<Arc<dyn TunnelBackend>>) -> ViewerSessionManager {
        ViewerSessionManager::new(Arc::new(host), Arc::new(AutoBackend::new(backends)))
    }

    fn request() -> StartSessionRequest {
        StartSessionRequest {
            host: "example.com".into(),
            ssh_port: 22,
            username: "trainer".into(),
            remote_root: "/data/runicorn".into(),
            python_interpreter: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn happy_path_registers_running_session() {
        let m = manager(
            FakeHost::new(8090),
            vec![Arc::new(FakeTunnel { kind: TunnelBackendKind::NativeSync, fail: None })],
        );
        let state = m.start_session(request()).unwrap();
        assert_eq!(state.status, SessionStatus::Running);
        assert_eq!(state.remote_pid, Some(4242));
        assert_eq!(m.list_sessions().len(), 1);
        assert_eq!(state.url(), format!("http://localhost:{}", state.local_port));
    }

    #[test]
    fn falls_back_to_next_backend_on_bind_failure() {
        let m = manager(
            FakeHost::new(8091),
            vec![
                Arc::new(FakeTunnel { kind: TunnelBackendKind::OpensshProcess, fail: Some(RunicornError::IoFailure("x".into())) }),
                Arc::new(FakeTunnel { kind: TunnelBackendKind::NativeSync, fail: None }),
            ],
        );
        let state = m.start_session(request()).unwrap();
        assert_eq!(state.status, SessionStatus::Running);
    }

    #[test]
    fn host_key_conflict_propagates_without_fallback() {
        let m = manager(
            FakeHost::new(8092),
            vec![
                Arc::new(FakeTunnel { kind: TunnelBackendKind::OpensshProcess, fail: Some(RunicornError::Conflict("host key changed".into())) }),
                Arc::new(FakeTunnel { kind: TunnelBackendKind::NativeSync, fail: None }),
            ],
        );
        let err = m.start_session(request()).unwrap_err();
        assert!(matches!(err, RunicornError::Conflict(_)));
    }

    #[test]
    fn stop_session_kills_remote_pid() {
        let host = FakeHost::new(8093);
        let m = manager(host, vec![Arc::new(FakeTunnel { kind: TunnelBackendKind::NativeSync, fail: None })]);
        let state = m.start_session(request()).unwrap();
        m.stop_session(&state.session_id).unwrap();
        assert!(m.get_session(&state.session_id).is_none());
    }

    #[test]
    fn verify_failure_aborts_before_launching_anything() {
        let mut host = FakeHost::new(8095);
        host.fail_verify = true;
        let m = manager(host, vec![Arc::new(FakeTunnel { kind: TunnelBackendKind::NativeSync, fail: None })]);
        let err = m.start_session(request()).unwrap_err();
        assert!(matches!(err, RunicornError::NotFound(_)));
        assert_eq!(m.list_sessions().len(), 0);
    }

    #[test]
    fn timeout_waiting_for_remote_port_kills_process_and_rolls_back() {
        let mut host = FakeHost::new(8094);
        *host.listening_after.get_mut() = 1000; // never reports listening within the timeout
        let m = manager(host, vec![Arc::new(FakeTunnel { kind: TunnelBackendKind::NativeSync, fail: None })]);
        let err = m.start_session(StartSessionRequest { timeout: Duration::from_millis(50), ..request() }).unwrap_err();
        assert!(matches!(err, RunicornError::Timeout(_)));
        assert_eq!(m.list_sessions().len(), 0);
    }
}
