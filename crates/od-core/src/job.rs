//! Job execution context borrowed from the job framework

use encoding_rs::Encoding;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::types::{JobId, Placement};

/// One job run as seen by the tunnel wrapper
///
/// The framework owns it; setup, run and teardown only borrow it. The job's
/// output sink travels next to it as a [`crate::traits::SharedSink`].
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job identity
    pub id: JobId,
    /// Job environment (keys unique, last write wins)
    pub env: HashMap<String, String>,
    /// Per-axis variables from a multi-configuration fan-out
    pub build_variables: HashMap<String, String>,
    /// Where the job's steps run
    pub placement: Placement,
    /// Job workspace on the execution machine
    pub workspace: PathBuf,
    /// Text encoding of the job's output, if known
    pub encoding: Option<&'static Encoding>,
}

impl JobContext {
    /// Create a context with an empty environment running on the controller
    pub fn new(id: JobId, workspace: impl Into<PathBuf>) -> Self {
        Self {
            id,
            env: HashMap::new(),
            build_variables: HashMap::new(),
            placement: Placement::Controller,
            workspace: workspace.into(),
            encoding: Some(encoding_rs::UTF_8),
        }
    }

    /// Set the placement
    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Replace the environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Add a per-axis variable
    pub fn with_build_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_variables.insert(key.into(), value.into());
        self
    }

    /// Set the output encoding; `None` disables capture decoding
    pub fn with_encoding(mut self, encoding: Option<&'static Encoding>) -> Self {
        self.encoding = encoding;
        self
    }
}
