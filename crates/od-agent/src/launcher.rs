//! Start, stop and staging as executed on the machine running the tunnel
//!
//! The same [`NodeLauncher`] serves jobs placed on the controller (called
//! in-process) and jobs placed on a node (called by the agent server on
//! behalf of a remote controller).

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use od_core::traits::{ManagerBinder, SharedSink};
use od_core::{TunnelStartError, TunnelStopError};
use od_protocol::{StartRequest, TunnelHandle};

/// Runs tunnel operations on this machine
pub struct NodeLauncher {
    binder: Arc<dyn ManagerBinder>,
    staging_dir: PathBuf,
    binary_dirs: Vec<PathBuf>,
    hostname: String,
}

impl NodeLauncher {
    /// Create a launcher using the local hostname
    pub fn new(binder: Arc<dyn ManagerBinder>, staging_dir: impl Into<PathBuf>) -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        Self::with_hostname(binder, staging_dir, hostname)
    }

    /// Create a launcher reporting `hostname` in its handles
    pub fn with_hostname(
        binder: Arc<dyn ManagerBinder>,
        staging_dir: impl Into<PathBuf>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            binder,
            staging_dir: staging_dir.into(),
            binary_dirs: Vec::new(),
            hostname: hostname.into(),
        }
    }

    /// Also accept remote binary paths inside `dir`
    pub fn with_binary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binary_dirs.push(dir.into());
        self
    }

    /// Hostname reported in handles
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Directory receiving staged binaries
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Resolve a binary path sent by a remote controller
    ///
    /// The path must name an existing file inside the staging directory or
    /// one of the extra binary directories once symlinks are resolved.
    pub async fn confine_binary_path(&self, path: &str) -> Result<PathBuf, TunnelStartError> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| TunnelStartError::Staging(format!("Binary {} is not available: {}", path, e)))?;

        for dir in std::iter::once(&self.staging_dir).chain(&self.binary_dirs) {
            match tokio::fs::canonicalize(dir).await {
                Ok(dir) if resolved.starts_with(&dir) => return Ok(resolved),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping binary directory {}: {}", dir.display(), e),
            }
        }

        Err(TunnelStartError::Staging(format!(
            "Binary {} is outside the staging and binary directories of {}",
            path, self.hostname
        )))
    }

    /// Bind the request's manager and open the tunnel
    pub async fn start(
        &self,
        request: &StartRequest,
        sink: SharedSink,
    ) -> Result<TunnelHandle, TunnelStartError> {
        sink.line(&format!("Launching Sauce Connect on {}", self.hostname));
        let manager = self.binder.bind(request.generation)?;

        let process = manager.open(request, sink).await?;
        tracing::info!(
            "Tunnel for {} running on {} (pid {:?}, reused: {})",
            request.username,
            self.hostname,
            process.pid,
            process.reused
        );

        Ok(TunnelHandle {
            generation: request.generation,
            username: request.username.clone(),
            options: request.options.clone(),
            hostname: self.hostname.clone(),
        })
    }

    /// Close the plan the handle was opened under
    pub async fn stop(&self, handle: &TunnelHandle, sink: SharedSink) -> Result<(), TunnelStopError> {
        let manager = self.binder.bind(handle.generation)?;
        manager
            .close_for_plan(&handle.username, &handle.options, sink)
            .await
    }

    /// Write a binary into the staging directory
    ///
    /// Only the final path component of `file_name` is used. The file is
    /// made executable on unix.
    pub async fn stage(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf, TunnelStartError> {
        let name = match Path::new(file_name).components().next_back() {
            Some(Component::Normal(name)) => name.to_owned(),
            _ => {
                return Err(TunnelStartError::Staging(format!(
                    "Invalid binary file name '{}'",
                    file_name
                )))
            }
        };

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| {
                TunnelStartError::Staging(format!(
                    "Failed to create {}: {}",
                    self.staging_dir.display(),
                    e
                ))
            })?;

        let path = self.staging_dir.join(name);
        tokio::fs::write(&path, contents).await.map_err(|e| {
            TunnelStartError::Staging(format!("Failed to write {}: {}", path.display(), e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| {
                    TunnelStartError::Staging(format!(
                        "Failed to make {} executable: {}",
                        path.display(),
                        e
                    ))
                })?;
        }

        tracing::info!("Staged {} ({} bytes)", path.display(), contents.len());
        Ok(path)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeBinder, FakeManager};
    use super::*;
    use od_protocol::TunnelGeneration;
    use parking_lot::Mutex;

    fn request() -> StartRequest {
        StartRequest {
            generation: TunnelGeneration::Current,
            username: "alice".to_string(),
            access_key: "key".to_string(),
            port: 4445,
            binary_path: None,
            options: "-v".to_string(),
            https_protocol: None,
            verbose: false,
        }
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let manager = Arc::new(FakeManager::default());
        let launcher = NodeLauncher::with_hostname(
            Arc::new(FakeBinder(manager.clone())),
            std::env::temp_dir(),
            "node-7",
        );
        let log = Arc::new(Mutex::new(Vec::<u8>::new()));

        let handle = launcher.start(&request(), log.clone()).await.unwrap();
        assert_eq!(handle.hostname, "node-7");
        assert_eq!(handle.options, "-v");
        let text = String::from_utf8(log.lock().clone()).unwrap();
        assert!(text.starts_with("Launching Sauce Connect on node-7\n"));

        launcher.stop(&handle, log.clone()).await.unwrap();
        assert_eq!(
            *manager.closed.lock(),
            vec![("alice".to_string(), "-v".to_string())]
        );
    }

    #[tokio::test]
    async fn test_stage_writes_executable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(FakeManager::default());
        let launcher = NodeLauncher::new(Arc::new(FakeBinder(manager)), dir.path().join("staging"));

        let path = launcher.stage("../../etc/sc", b"binary").await.unwrap();
        assert_eq!(path, dir.path().join("staging").join("sc"));
        assert_eq!(std::fs::read(&path).unwrap(), b"binary");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[tokio::test]
    async fn test_confine_binary_path() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("staging");
        let installed = dir.path().join("installed");
        std::fs::create_dir_all(&installed).unwrap();
        std::fs::write(installed.join("sc"), b"bin").unwrap();
        std::fs::write(dir.path().join("elsewhere"), b"bin").unwrap();

        let launcher = NodeLauncher::new(
            Arc::new(FakeBinder(Arc::new(FakeManager::default()))),
            &staging,
        )
        .with_binary_dir(&installed);

        let staged = launcher.stage("sc", b"bin").await.unwrap();
        let resolved = launcher
            .confine_binary_path(&staged.to_string_lossy())
            .await
            .unwrap();
        assert_eq!(resolved, staged.canonicalize().unwrap());
        assert!(launcher
            .confine_binary_path(&installed.join("sc").to_string_lossy())
            .await
            .is_ok());

        for path in [
            dir.path().join("elsewhere"),
            staging.join("..").join("elsewhere"),
            dir.path().join("missing"),
        ] {
            let err = launcher
                .confine_binary_path(&path.to_string_lossy())
                .await
                .unwrap_err();
            assert!(matches!(err, TunnelStartError::Staging(_)));
        }
    }

    #[tokio::test]
    async fn test_stage_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = NodeLauncher::new(
            Arc::new(FakeBinder(Arc::new(FakeManager::default()))),
            dir.path(),
        );

        for name in ["", "..", "/"] {
            let err = launcher.stage(name, b"x").await.unwrap_err();
            assert!(matches!(err, TunnelStartError::Staging(_)));
        }
    }
}
