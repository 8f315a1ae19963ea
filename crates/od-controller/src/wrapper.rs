//! Per-job tunnel lifecycle
//!
//! [`TunnelWrapper::set_up`] runs once before the job body and returns a
//! [`JobEnvironment`]: it contributes the job's environment variables and
//! owns the teardown, which runs once after the body whatever its outcome.
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Closed
//!            |
//!            +-> Failed
//! ```

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use od_core::config::{BrowserSelections, GlobalConfig, JobConfig};
use od_core::environment::{self, EnvironmentInputs, HostPolicy};
use od_core::options::{generate_tunnel_identifier, resolve_options};
use od_core::traits::SharedSink;
use od_core::{
    CapturedOutputRegistry, CredentialResolver, Credentials, JobContext, JobId, OutputInterceptor,
    Placement, TunnelOptions, TunnelStartError, TunnelState,
};
use od_protocol::TunnelHandle;

use crate::launcher::{LauncherProvider, ProcessLauncher};
use crate::report::{BuildReporter, JobReport};
use crate::starter::{StartSettings, TunnelCloser, TunnelStarter};

/// Tunnel lifecycle wrapper for jobs sharing one job configuration
pub struct TunnelWrapper {
    job: JobConfig,
    global: Arc<GlobalConfig>,
    resolver: CredentialResolver,
    launchers: Arc<dyn LauncherProvider>,
    registry: Arc<CapturedOutputRegistry>,
    reporter: Arc<dyn BuildReporter>,
}

impl TunnelWrapper {
    /// Create a wrapper over a configuration snapshot
    pub fn new(
        job: JobConfig,
        global: Arc<GlobalConfig>,
        launchers: Arc<dyn LauncherProvider>,
        registry: Arc<CapturedOutputRegistry>,
        reporter: Arc<dyn BuildReporter>,
    ) -> Self {
        let resolver = CredentialResolver::for_config(&global);
        Self {
            job,
            global,
            resolver,
            launchers,
            registry,
            reporter,
        }
    }

    /// Use `resolver` instead of the one derived from the configuration
    pub fn with_resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Job configuration
    pub fn job_config(&self) -> &JobConfig {
        &self.job
    }

    /// Credentials a job would run with right now
    pub fn credentials(&self) -> Credentials {
        let explicit = self.job.credentials.as_ref().map(Credentials::from);
        self.resolver.resolve(explicit.as_ref(), &self.global)
    }

    /// Wrap the job's log so its lines are captured for the report
    pub fn decorate_output<W: Write>(&self, ctx: &JobContext, sink: Option<W>) -> OutputInterceptor<W> {
        let buffer = self.registry.attach(&ctx.id);
        OutputInterceptor::new(sink, ctx.encoding, buffer)
    }

    /// Prepare the job's tunnel
    ///
    /// The environment is returned even when the start fails, so teardown
    /// can still run and hand over the captured output.
    pub async fn set_up(
        &self,
        ctx: &JobContext,
        sink: SharedSink,
        cancel: &CancellationToken,
    ) -> (JobEnvironment, Result<(), TunnelStartError>) {
        tracing::info!(job = %ctx.id, "Setting up tunnel wrapper");
        let credentials = self.credentials();
        if credentials.is_unconfigured() {
            tracing::warn!(job = %ctx.id, "No credentials configured");
        }

        let mut env = JobEnvironment {
            job: ctx.id.clone(),
            state: TunnelState::Idle,
            handle: None,
            launcher: None,
            options: None,
            port: environment::resolve_port(&self.job.port, self.job.enable_tunnel),
            host: self.job.host.clone(),
            tunnel_enabled: self.job.enable_tunnel,
            browsers: self.job.browsers.clone(),
            starting_url: self.job.starting_url.clone(),
            build_variables: ctx.build_variables.clone(),
            credentials,
            registry: Arc::clone(&self.registry),
            reporter: Arc::clone(&self.reporter),
            torn_down: false,
        };

        if !self.job.enable_tunnel {
            return (env, Ok(()));
        }

        let identifier = self
            .job
            .generate_identifier
            .then(|| generate_tunnel_identifier(&ctx.id));
        let options = resolve_options(&self.job.options, &ctx.env, identifier);

        let placement = if self.job.launch_on_node {
            ctx.placement
        } else {
            Placement::Controller
        };
        let launcher = self.launchers.launcher_for(placement);

        let generation = self.job.generation();
        let starter = TunnelStarter::new(
            &env.credentials,
            StartSettings {
                generation,
                port: env.port,
                binary_path: self.job.binary_path.clone(),
                options: options.resolved.clone(),
                https_protocol: self.job.https_protocol.clone(),
                verbose: self.job.verbose,
                local_binary: self.global.binaries.binary_path(generation),
            },
        );

        env.transition(TunnelState::Starting);
        sink.line(&format!("Starting Sauce OnDemand SSH tunnel on {}", placement));
        let result = starter.call(launcher.as_ref(), Arc::clone(&sink), cancel).await;

        match result {
            Ok(handle) => {
                tracing::info!(job = %ctx.id, "Tunnel running on {}", handle.hostname);
                env.handle = Some(handle);
                env.launcher = Some(launcher);
                env.options = Some(options);
                env.transition(TunnelState::Running);
                (env, Ok(()))
            }
            Err(e) => {
                tracing::error!(job = %ctx.id, "Tunnel start failed: {}", e);
                sink.line(&format!("Failed to start Sauce Connect: {}", e));
                env.transition(TunnelState::Failed);
                (env, Err(e))
            }
        }
    }
}

/// A job's view of its tunnel between setup and teardown
pub struct JobEnvironment {
    job: JobId,
    state: TunnelState,
    handle: Option<TunnelHandle>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    options: Option<TunnelOptions>,
    port: u16,
    host: Option<String>,
    tunnel_enabled: bool,
    browsers: BrowserSelections,
    starting_url: Option<String>,
    build_variables: HashMap<String, String>,
    credentials: Credentials,
    registry: Arc<CapturedOutputRegistry>,
    reporter: Arc<dyn BuildReporter>,
    torn_down: bool,
}

impl JobEnvironment {
    /// Job this environment belongs to
    pub fn job(&self) -> &JobId {
        &self.job
    }

    /// Lifecycle state
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Handle of the running tunnel, if one is running
    pub fn handle(&self) -> Option<&TunnelHandle> {
        self.handle.as_ref()
    }

    /// Options the tunnel was started with
    pub fn options(&self) -> Option<&TunnelOptions> {
        self.options.as_ref()
    }

    /// Whether teardown already ran
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Write the job's variables into `env`
    ///
    /// The tunnel identifier is only written while a tunnel is running.
    pub fn build_env_vars(&self, env: &mut HashMap<String, String>) {
        let host = HostPolicy {
            configured: self.host.clone(),
            tunnel_enabled: self.tunnel_enabled,
            node_hostname: self.handle.as_ref().map(|h| h.hostname.clone()),
        }
        .resolve();

        let identifier = self.handle.as_ref().map(|_| {
            self.options
                .as_ref()
                .and_then(TunnelOptions::tunnel_identifier)
                .unwrap_or_default()
        });

        environment::populate(
            env,
            &EnvironmentInputs {
                job: &self.job,
                browsers: &self.browsers,
                credentials: &self.credentials,
                host,
                port: self.port,
                tunnel_identifier: identifier.as_deref(),
                starting_url: self.starting_url.as_deref(),
                build_variables: &self.build_variables,
            },
        );
    }

    /// Close the tunnel if one runs and hand the captured output over
    ///
    /// Runs once; later calls only warn.
    pub async fn tear_down(&mut self, sink: SharedSink) {
        if self.torn_down {
            tracing::warn!(job = %self.job, "Teardown already ran");
            return;
        }
        self.torn_down = true;

        if let (Some(handle), Some(launcher)) = (self.handle.take(), self.launcher.take()) {
            self.transition(TunnelState::Stopping);
            sink.line("Shutting down Sauce Connect SSH tunnels");
            TunnelCloser::new(handle).call(launcher.as_ref(), Arc::clone(&sink)).await;
            sink.line("Sauce Connect closed");
            self.transition(TunnelState::Closed);
        }

        let lines = self.registry.take(&self.job).unwrap_or_default();
        tracing::info!(job = %self.job, "Reporting {} captured lines", lines.len());
        self.reporter
            .report(JobReport {
                job: self.job.clone(),
                username: self.credentials.username.clone(),
                access_key: self.credentials.access_key.clone(),
                lines,
            })
            .await;
    }

    fn transition(&mut self, next: TunnelState) {
        if let Err(e) = self.state.advance(next) {
            tracing::error!(job = %self.job, "{}", e);
        }
    }
}
