//! Process-backed tunnel manager
//!
//! Every plan (user name plus options) maps to at most one tunnel process.
//! Opening a plan that is already open adds a reference to the running
//! process; the process is terminated once the last reference is closed.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

use od_core::config::TunnelBinaries;
use od_core::traits::{SharedSink, TunnelManager, TunnelProcess};
use od_core::{TunnelStartError, TunnelStopError};
use od_protocol::{StartRequest, TunnelGeneration};

/// Line the native tunnel prints once it accepts connections
pub const CURRENT_READY_MARKER: &str = "Sauce Connect is up, you may start your tests.";

/// Line the Java tunnel prints once it accepts connections
pub const LEGACY_READY_MARKER: &str = "Connected! You may start your tests.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PlanKey {
    username: String,
    options: String,
}

impl PlanKey {
    fn new(username: &str, options: &str) -> Self {
        Self {
            username: username.to_string(),
            options: options.to_string(),
        }
    }
}

struct RunningTunnel {
    child: Child,
    references: usize,
}

#[derive(Default)]
struct PlanSlot {
    tunnel: Option<RunningTunnel>,
}

/// Forgets a plan slot on drop when it holds no process and nobody else uses it
///
/// Runs on every exit from `open` and `close_for_plan`, including when the
/// caller drops the future mid-launch. Must be declared before the slot and
/// its lock guard so those are released first.
struct SlotRelease<'a> {
    plans: &'a DashMap<PlanKey, Arc<AsyncMutex<PlanSlot>>>,
    key: PlanKey,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.plans.remove_if(&self.key, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .map(|guard| guard.tunnel.is_none())
                    .unwrap_or(false)
        });
    }
}

/// Tunnel manager for one generation, running tunnels as child processes
pub struct ProcessTunnelManager {
    generation: TunnelGeneration,
    binaries: TunnelBinaries,
    java: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    plans: DashMap<PlanKey, Arc<AsyncMutex<PlanSlot>>>,
}

impl ProcessTunnelManager {
    /// Manager for the native tunnel binary
    pub fn current(binaries: TunnelBinaries, working_dir: Option<PathBuf>) -> Self {
        Self {
            generation: TunnelGeneration::Current,
            binaries,
            java: None,
            working_dir,
            plans: DashMap::new(),
        }
    }

    /// Manager for the Java tunnel, run with `java`
    pub fn legacy(binaries: TunnelBinaries, java: PathBuf, working_dir: Option<PathBuf>) -> Self {
        Self {
            generation: TunnelGeneration::Legacy,
            binaries,
            java: Some(java),
            working_dir,
            plans: DashMap::new(),
        }
    }

    /// Number of plans currently known
    pub fn open_plans(&self) -> usize {
        self.plans.len()
    }

    fn ready_marker(&self) -> &'static str {
        match self.generation {
            TunnelGeneration::Current => CURRENT_READY_MARKER,
            TunnelGeneration::Legacy => LEGACY_READY_MARKER,
        }
    }

    fn slot(&self, key: &PlanKey) -> Arc<AsyncMutex<PlanSlot>> {
        Arc::clone(&self.plans.entry(key.clone()).or_default())
    }

    fn release(&self, key: &PlanKey) -> SlotRelease<'_> {
        SlotRelease {
            plans: &self.plans,
            key: key.clone(),
        }
    }

    fn command(&self, request: &StartRequest) -> Command {
        let binary = request
            .binary_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.binaries.binary_path(self.generation));
        let port = request.port.to_string();

        let mut command = match self.generation {
            TunnelGeneration::Current => {
                let mut command = Command::new(&binary);
                command.args([
                    "-u",
                    request.username.as_str(),
                    "-k",
                    request.access_key.as_str(),
                    "-P",
                    port.as_str(),
                ]);
                command
            }
            TunnelGeneration::Legacy => {
                let java = self.java.clone().unwrap_or_else(|| PathBuf::from("java"));
                let mut command = Command::new(java);
                if let Some(protocol) = request.https_protocol.as_deref().filter(|p| !p.is_empty()) {
                    command.arg(format!("-Dhttps.protocols={}", protocol));
                }
                command
                    .arg("-jar")
                    .arg(&binary)
                    .args([request.username.as_str(), request.access_key.as_str()])
                    .args(["-P", port.as_str()]);
                command
            }
        };

        command.args(request.options.split_whitespace());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Spawn the tunnel process and wait for its ready marker
    async fn launch(&self, request: &StartRequest, sink: &SharedSink) -> Result<Child, TunnelStartError> {
        let mut child = self.command(request).spawn().map_err(|e| {
            TunnelStartError::Process(format!("Failed to spawn {} tunnel: {}", self.generation, e))
        })?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let ready = Arc::new(Mutex::new(Some(ready_tx)));
        let marker = self.ready_marker();
        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, Arc::clone(sink), request.verbose, marker, Arc::clone(&ready));
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, Arc::clone(sink), request.verbose, marker, Arc::clone(&ready));
        }
        drop(ready);

        let timeout = self.binaries.startup_timeout;
        tokio::select! {
            ready = ready_rx => match ready {
                Ok(()) => Ok(child),
                Err(_) => Err(exited_early(child.wait().await)),
            },
            status = child.wait() => Err(exited_early(status)),
            _ = tokio::time::sleep(timeout) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill unresponsive tunnel: {}", e);
                }
                Err(TunnelStartError::Process(format!(
                    "Tunnel did not become ready within {}s",
                    timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl TunnelManager for ProcessTunnelManager {
    fn generation(&self) -> TunnelGeneration {
        self.generation
    }

    async fn open(
        &self,
        request: &StartRequest,
        sink: SharedSink,
    ) -> Result<TunnelProcess, TunnelStartError> {
        let key = PlanKey::new(&request.username, &request.options);
        let _release = self.release(&key);
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        if let Some(tunnel) = guard.tunnel.as_mut() {
            match tunnel.child.try_wait() {
                Ok(None) => {
                    tunnel.references += 1;
                    tracing::info!(
                        "Reusing {} tunnel for {} ({} references)",
                        self.generation,
                        request.username,
                        tunnel.references
                    );
                    return Ok(TunnelProcess {
                        pid: tunnel.child.id(),
                        reused: true,
                    });
                }
                _ => {
                    tracing::warn!("Tunnel process for {} is gone, starting a new one", request.username);
                    guard.tunnel = None;
                }
            }
        }

        tracing::info!("Starting {} tunnel for {}", self.generation, request.username);
        let child = self.launch(request, &sink).await?;
        let pid = child.id();
        sink.line(&format!("Tunnel is up (pid {})", pid.unwrap_or_default()));
        guard.tunnel = Some(RunningTunnel {
            child,
            references: 1,
        });
        Ok(TunnelProcess { pid, reused: false })
    }

    async fn close_for_plan(
        &self,
        username: &str,
        options: &str,
        sink: SharedSink,
    ) -> Result<(), TunnelStopError> {
        let key = PlanKey::new(username, options);
        let release = self.release(&key);
        let Some(slot) = self.plans.get(&key).map(|s| Arc::clone(&s)) else {
            tracing::warn!("No open {} tunnel for {}", self.generation, username);
            return Ok(());
        };

        let mut guard = slot.lock().await;
        let remaining = match guard.tunnel.as_mut() {
            Some(tunnel) => {
                tunnel.references = tunnel.references.saturating_sub(1);
                tunnel.references
            }
            None => 0,
        };
        if remaining > 0 {
            tracing::info!("Tunnel for {} still has {} references", username, remaining);
            return Ok(());
        }

        let tunnel = guard.tunnel.take();
        drop(guard);
        drop(slot);
        drop(release);

        match tunnel {
            Some(tunnel) => {
                let result = terminate(tunnel.child, self.binaries.shutdown_grace).await;
                if result.is_ok() {
                    sink.line("Tunnel process stopped");
                }
                result
            }
            None => Ok(()),
        }
    }
}

fn exited_early(status: io::Result<ExitStatus>) -> TunnelStartError {
    match status {
        Ok(status) => TunnelStartError::Process(format!(
            "Tunnel exited before becoming ready ({})",
            status
        )),
        Err(e) => TunnelStartError::Process(format!("Failed to wait for tunnel: {}", e)),
    }
}

/// Copy a tunnel output stream to the job log and watch for readiness
fn forward_output<R>(
    stream: R,
    sink: SharedSink,
    verbose: bool,
    marker: &'static str,
    ready: Arc<Mutex<Option<oneshot::Sender<()>>>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!("tunnel: {}", line);
                    if verbose {
                        sink.line(&line);
                    }
                    if line.contains(marker) {
                        if let Some(tx) = ready.lock().take() {
                            let _ = tx.send(());
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Tunnel output closed: {}", e);
                    break;
                }
            }
        }
    });
}

/// SIGTERM, then kill after `grace`
async fn terminate(mut child: Child, grace: Duration) -> Result<(), TunnelStopError> {
    if let Some(result) = request_exit(&mut child, grace).await {
        return result;
    }

    child
        .kill()
        .await
        .map_err(|e| TunnelStopError::Process(format!("Failed to kill tunnel process: {}", e)))
}

/// Ask the process to exit; `None` when it has to be killed
#[cfg(unix)]
async fn request_exit(child: &mut Child, grace: Duration) -> Option<Result<(), TunnelStopError>> {
    let pid = child.id()?;

    // SAFETY: the pid belongs to our own child, which has not been reaped yet
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } != 0 {
        return None;
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!("Tunnel process {} exited with {}", pid, status);
            Some(Ok(()))
        }
        Ok(Err(e)) => Some(Err(TunnelStopError::Process(e.to_string()))),
        Err(_) => {
            tracing::warn!("Tunnel process {} ignored SIGTERM, killing it", pid);
            None
        }
    }
}

#[cfg(not(unix))]
async fn request_exit(_child: &mut Child, _grace: Duration) -> Option<Result<(), TunnelStopError>> {
    None
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(path: &Path, body: &str) {
        std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn request(username: &str, options: &str) -> StartRequest {
        StartRequest {
            generation: TunnelGeneration::Current,
            username: username.to_string(),
            access_key: "key".to_string(),
            port: 4445,
            binary_path: None,
            options: options.to_string(),
            https_protocol: None,
            verbose: true,
        }
    }

    fn log_text(log: &Mutex<Vec<u8>>) -> String {
        String::from_utf8(log.lock().clone()).unwrap()
    }

    // All process scenarios share one test so scripts are never written
    // while another test thread is forking.
    #[tokio::test]
    async fn test_process_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path();
        write_script(
            &bin.join("sc"),
            &format!("echo \"args: $*\"\necho \"{}\"\nexec sleep 30", CURRENT_READY_MARKER),
        );
        write_script(&bin.join("crash"), "echo boom >&2\nexit 3");
        write_script(&bin.join("silent"), "exec sleep 30");
        write_script(
            &bin.join("java"),
            &format!("echo \"java: $*\"\necho \"{}\"\nexec sleep 30", LEGACY_READY_MARKER),
        );

        let binaries = TunnelBinaries {
            binary_dir: bin.to_path_buf(),
            java_path: None,
            startup_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
        };
        let log = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink: SharedSink = log.clone();

        // Same plan twice shares one process
        let manager = ProcessTunnelManager::current(binaries.clone(), None);
        let plan = request("alice", "--tunnel-identifier t1");
        let first = manager.open(&plan, sink.clone()).await.unwrap();
        let second = manager.open(&plan, sink.clone()).await.unwrap();
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.pid, second.pid);
        assert_eq!(manager.open_plans(), 1);
        assert!(log_text(&log).contains("args: -u alice -k key -P 4445 --tunnel-identifier t1"));

        manager
            .close_for_plan("alice", "--tunnel-identifier t1", sink.clone())
            .await
            .unwrap();
        assert_eq!(manager.open_plans(), 1);
        manager
            .close_for_plan("alice", "--tunnel-identifier t1", sink.clone())
            .await
            .unwrap();
        assert_eq!(manager.open_plans(), 0);
        assert!(log_text(&log).contains("Tunnel process stopped"));

        // Unknown plans close quietly
        manager.close_for_plan("nobody", "", sink.clone()).await.unwrap();

        // Exit before readiness
        let mut crash = request("alice", "crash");
        crash.binary_path = Some(bin.join("crash").display().to_string());
        let err = manager.open(&crash, sink.clone()).await.unwrap_err();
        assert!(matches!(err, TunnelStartError::Process(_)));
        assert_eq!(manager.open_plans(), 0);

        // No readiness within the startup timeout
        let mut silent = request("alice", "silent");
        silent.binary_path = Some(bin.join("silent").display().to_string());
        let err = manager.open(&silent, sink.clone()).await.unwrap_err();
        assert!(err.to_string().contains("did not become ready"));
        assert_eq!(manager.open_plans(), 0);

        // Opens abandoned mid-launch leave no plan behind
        for n in 0..3 {
            let mut plan = request("alice", &format!("--tunnel-identifier abandoned-{}", n));
            plan.binary_path = Some(bin.join("silent").display().to_string());
            let open = manager.open(&plan, sink.clone());
            assert!(tokio::time::timeout(Duration::from_millis(100), open).await.is_err());
        }
        assert_eq!(manager.open_plans(), 0);

        // Legacy command line
        let legacy = ProcessTunnelManager::legacy(binaries, bin.join("java"), None);
        let mut plan = request("bob", "-v");
        plan.generation = TunnelGeneration::Legacy;
        plan.https_protocol = Some("TLSv1.2".to_string());
        legacy.open(&plan, sink.clone()).await.unwrap();
        let expected = format!(
            "java: -Dhttps.protocols=TLSv1.2 -jar {} bob key -P 4445 -v",
            bin.join("Sauce-Connect.jar").display()
        );
        assert!(log_text(&log).contains(&expected));
        legacy.close_for_plan("bob", "-v", sink).await.unwrap();
        assert_eq!(legacy.open_plans(), 0);
    }
}
