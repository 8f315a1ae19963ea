//! Build reporting
//!
//! At teardown the wrapper hands a job's captured output to a
//! [`BuildReporter`]. Test frameworks print a marker line per remote
//! session; reporters use those to tie sessions back to the build.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use od_core::environment::sanitise_build_number;
use od_core::{Credentials, JobId, Secret};

use crate::rest::SauceRestClient;

#[allow(clippy::expect_used)]
static SESSION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SauceOnDemandSessionID=(\S+) job-name=(.*)").expect("constant regex pattern is valid")
});

/// What teardown hands to the reporter for one job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: JobId,
    pub username: String,
    pub access_key: Secret,
    /// Captured output lines, in order
    pub lines: Vec<String>,
}

impl JobReport {
    /// Credentials the job ran with
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.access_key.clone())
    }
}

/// A remote session announced in a job's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCorrelation {
    pub session_id: String,
    pub job_name: String,
}

impl SessionCorrelation {
    /// Every session marker in `lines`, in order of appearance
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Vec<Self> {
        lines
            .iter()
            .filter_map(|line| SESSION_MARKER.captures(line.as_ref()))
            .map(|caps| Self {
                session_id: caps[1].to_string(),
                job_name: caps[2].trim().to_string(),
            })
            .collect()
    }
}

/// Receives a job's captured output at teardown
#[async_trait]
pub trait BuildReporter: Send + Sync {
    /// Consume one job's report
    async fn report(&self, report: JobReport);
}

/// Reporter that only logs the sessions it finds
#[derive(Debug, Clone, Default)]
pub struct LogReporter;

#[async_trait]
impl BuildReporter for LogReporter {
    async fn report(&self, report: JobReport) {
        let sessions = SessionCorrelation::parse(&report.lines);
        tracing::info!(
            job = %report.job,
            "{} captured lines, {} sessions",
            report.lines.len(),
            sessions.len()
        );
        for session in sessions {
            tracing::info!(job = %report.job, "Session {} ({})", session.session_id, session.job_name);
        }
    }
}

/// Reporter tagging each session with the build it ran in
#[derive(Debug, Clone)]
pub struct RestReporter {
    api_url: String,
}

impl RestReporter {
    /// Reporter pushing to the API at `api_url`
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl BuildReporter for RestReporter {
    async fn report(&self, report: JobReport) {
        let sessions = SessionCorrelation::parse(&report.lines);
        if sessions.is_empty() {
            return;
        }

        let client = match SauceRestClient::new(&self.api_url, report.credentials()) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("Cannot report sessions for {}: {}", report.job, e);
                return;
            }
        };

        let info = serde_json::json!({ "build": sanitise_build_number(&report.job.to_string()) });
        for session in sessions {
            if let Err(e) = client.update_job_info(&session.session_id, &info).await {
                tracing::warn!("Failed to update session {}: {}", session.session_id, e);
            }
        }
    }
}
