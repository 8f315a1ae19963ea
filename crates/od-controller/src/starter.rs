//! Single-shot start and stop operations
//!
//! A [`TunnelStarter`] captures everything its start needs, credentials
//! included, when it is built. Whatever happens to the controller's stored
//! credentials between job setup and dispatch to the node does not change
//! what the start uses.

use std::path::PathBuf;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use od_core::config::TunnelBinaries;
use od_core::traits::SharedSink;
use od_core::{Credentials, TunnelStartError};
use od_protocol::{StartRequest, TunnelGeneration, TunnelHandle};

use crate::launcher::ProcessLauncher;

/// Per-job start parameters other than credentials
#[derive(Debug, Clone)]
pub struct StartSettings {
    pub generation: TunnelGeneration,
    pub port: u16,
    /// Binary already present on the target machine
    pub binary_path: Option<String>,
    /// Resolved options
    pub options: String,
    pub https_protocol: Option<String>,
    pub verbose: bool,
    /// Where the controller keeps its own copy of the binary
    pub local_binary: PathBuf,
}

/// Start operation with credentials bound at construction
#[derive(Debug)]
pub struct TunnelStarter {
    request: StartRequest,
    local_binary: PathBuf,
}

impl TunnelStarter {
    /// Bind `credentials` and `settings` into a start request
    pub fn new(credentials: &Credentials, settings: StartSettings) -> Self {
        Self {
            request: StartRequest {
                generation: settings.generation,
                username: credentials.username.clone(),
                access_key: credentials.access_key.expose().to_string(),
                port: settings.port,
                binary_path: settings.binary_path,
                options: settings.options,
                https_protocol: settings.https_protocol,
                verbose: settings.verbose,
            },
            local_binary: settings.local_binary,
        }
    }

    /// The request that will be sent
    pub fn request(&self) -> &StartRequest {
        &self.request
    }

    /// Run the start through `launcher`
    ///
    /// On a remote placement without a binary path, the controller's binary
    /// is staged onto the node first; a staging failure aborts the start.
    pub async fn call(
        mut self,
        launcher: &dyn ProcessLauncher,
        sink: SharedSink,
        cancel: &CancellationToken,
    ) -> Result<TunnelHandle, TunnelStartError> {
        if launcher.placement().is_remote() && self.request.binary_path.is_none() {
            let staged = self.stage(launcher).await?;
            tracing::info!("Staged tunnel binary at {} on {}", staged, launcher.placement());
            self.request.binary_path = Some(staged);
        }

        launcher.start(&self.request, sink, cancel).await
    }

    async fn stage(&self, launcher: &dyn ProcessLauncher) -> Result<String, TunnelStartError> {
        let file_name = self
            .local_binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| TunnelBinaries::file_name(self.request.generation).to_string());

        let contents = tokio::fs::read(&self.local_binary).await.map_err(|e| {
            TunnelStartError::Staging(format!(
                "Failed to read {}: {}",
                self.local_binary.display(),
                e
            ))
        })?;

        launcher.stage_binary(&file_name, Bytes::from(contents)).await
    }
}

/// Stop operation; never fails past its boundary
#[derive(Debug, Clone)]
pub struct TunnelCloser {
    handle: TunnelHandle,
}

impl TunnelCloser {
    /// Closer for `handle`
    pub fn new(handle: TunnelHandle) -> Self {
        Self { handle }
    }

    /// Close the tunnel, logging any failure
    pub async fn call(self, launcher: &dyn ProcessLauncher, sink: SharedSink) {
        if let Err(e) = launcher.stop(&self.handle, sink.clone()).await {
            tracing::warn!(
                "Failed to close tunnel for {} on {}: {}",
                self.handle.username,
                self.handle.hostname,
                e
            );
            sink.line(&format!("Failed to close Sauce Connect: {}", e));
        }
    }
}
