//! Run command: wrap a build command in a tunnel lifecycle
//!
//! The command's stdout and stderr go through the job's output
//! interceptor, so the tunnel messages and the command output end up in
//! one log and one capture buffer.

use std::collections::HashMap;
use std::io::{Stdout, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use encoding_rs::Encoding;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use od_controller::cleanup::run_capture_eviction;
use od_controller::{BuildReporter, ControllerState, JobEnvironment, LogReporter, RestReporter};
use od_core::config::{self, ConfigFile, JobConfig};
use od_core::traits::SharedSink;
use od_core::types::JobId;
use od_core::{JobContext, OutputInterceptor, Placement};

use super::resolve_config_path;

type JobLog = Arc<Mutex<OutputInterceptor<Stdout>>>;

/// Options of one `run` invocation
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Job configuration file (defaults apply when absent)
    pub job: Option<PathBuf>,
    /// Project name of the job
    pub project: String,
    /// Build number of the job
    pub number: u64,
    /// Agent address when the job runs on an execution node
    pub node: Option<SocketAddr>,
    /// Per-axis variables
    pub axes: Vec<(String, String)>,
    /// Encoding label of the command's output
    pub encoding: Option<String>,
    /// Push session build numbers to the REST API at teardown
    pub report: bool,
    /// Command and arguments
    pub command: Vec<String>,
}

/// Parse an `--axis KEY=VALUE` argument
pub fn parse_axis(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", arg)),
    }
}

fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        None => Ok(encoding_rs::UTF_8),
        Some(label) => {
            Encoding::for_label(label.as_bytes()).ok_or_else(|| anyhow!("Unknown encoding '{}'", label))
        }
    }
}

/// Run `args.command` inside a tunnel lifecycle and return its exit code
///
/// Teardown runs however the command ends. A failed setup skips the
/// command and yields exit code 1.
pub async fn run_command(config_path: Option<&PathBuf>, args: RunArgs) -> Result<i32> {
    let path = resolve_config_path(config_path);
    let file: ConfigFile = config::load_config_or_default(&path)
        .with_context(|| format!("Failed to load config file: {:?}", path))?;
    let job: JobConfig = match &args.job {
        Some(job_path) => config::load_config(job_path)
            .with_context(|| format!("Failed to load job file: {:?}", job_path))?,
        None => JobConfig::default(),
    };
    let encoding = resolve_encoding(args.encoding.as_deref())?;

    let mut ctx = JobContext::new(JobId::new(args.project.clone(), args.number), std::env::current_dir()?)
        .with_env(std::env::vars().collect())
        .with_placement(args.node.map_or(Placement::Controller, Placement::Node))
        .with_encoding(Some(encoding));
    for (key, value) in &args.axes {
        ctx = ctx.with_build_variable(key.clone(), value.clone());
    }

    let state = ControllerState::new(file.global);
    let cancel = CancellationToken::new();
    tokio::spawn(run_capture_eviction(
        Arc::clone(&state.registry),
        state.global.capture_retention,
        cancel.clone(),
    ));

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received interrupt, aborting job");
            interrupt.cancel();
        }
    });

    let reporter: Arc<dyn BuildReporter> = if args.report {
        Arc::new(RestReporter::new(state.global.api_url.clone()))
    } else {
        Arc::new(LogReporter)
    };
    let wrapper = state.wrapper(job, reporter);

    let log: JobLog = Arc::new(Mutex::new(wrapper.decorate_output(&ctx, Some(std::io::stdout()))));
    let sink: SharedSink = log.clone();

    let (mut env, started) = wrapper.set_up(&ctx, Arc::clone(&sink), &cancel).await;
    let code = match started {
        Ok(()) => match run_job(&args.command, &ctx, &env, &log, &cancel).await {
            Ok(code) => code,
            Err(e) => {
                sink.line(&format!("Build command failed: {:#}", e));
                1
            }
        },
        Err(_) => 1,
    };

    env.tear_down(Arc::clone(&sink)).await;
    cancel.cancel();

    log.lock().close().context("Failed to flush job log")?;
    Ok(code)
}

async fn run_job(
    command: &[String],
    ctx: &JobContext,
    env: &JobEnvironment,
    log: &JobLog,
    cancel: &CancellationToken,
) -> Result<i32> {
    let (program, program_args) = command.split_first().context("No command given")?;

    let mut vars: HashMap<String, String> = HashMap::new();
    env.build_env_vars(&mut vars);
    tracing::debug!("Contributing {} environment variables", vars.len());

    let mut child = Command::new(program)
        .args(program_args)
        .envs(&vars)
        .current_dir(&ctx.workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;

    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, Arc::clone(log))));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, Arc::clone(log))));
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = cancel.cancelled() => {
            tracing::warn!("Killing '{}'", program);
            child.kill().await?;
            child.wait().await?
        }
    };

    for pump in pumps {
        match pump.await {
            Ok(Err(e)) => tracing::debug!("Output pump stopped: {}", e),
            Err(e) => tracing::debug!("Output pump panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    Ok(status.code().unwrap_or(1))
}

async fn pump<R: AsyncRead + Unpin>(reader: R, log: JobLog) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        log.lock().write_all(&buf)?;
    }
}
