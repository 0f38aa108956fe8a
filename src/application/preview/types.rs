use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One preview attempt as submitted by the HTTP surface or the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    /// Source document to render.
    pub document: PathBuf,
    /// Per-request override of the configured link-fix default.
    #[serde(default)]
    pub fix_links: Option<bool>,
}

impl PreviewRequest {
    pub fn new(document: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
            fix_links: None,
        }
    }

    pub fn with_fix_links(mut self, fix_links: bool) -> Self {
        self.fix_links = Some(fix_links);
        self
    }
}

/// What a preview request produced. The orchestrator never propagates a
/// failure: supersession is a silent yield, and every build failure is
/// carried as data for the surface layer to turn into a diagnostic page.
#[derive(Debug)]
pub enum PreviewOutcome {
    /// The build succeeded; `html` is the (optionally link-rewritten)
    /// artifact text.
    Rendered { html: String },
    /// A newer request took the reservation, or a build was already
    /// running; nothing was spawned for this request.
    Superseded,
    /// The build failed; the error selects the diagnostic page class.
    Failed { error: PreviewError },
}

/// Internal failure taxonomy of the orchestrator; every variant maps onto
/// one diagnostic page class.
#[derive(Debug, Error)]
pub enum PreviewError {
    /// The builder or converter executable could not be started at all.
    #[error("failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The external process reported a nonzero exit.
    #[error("builder exited with {exit_code:?}")]
    BuildFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// The process exited cleanly but its stderr carries the recognizable
    /// exception marker (the silent failure historically observed on
    /// Windows).
    #[error("builder reported an exception on stderr despite a clean exit")]
    BuildException { stderr: String },
    /// The build reported success but the expected artifact cannot be read.
    #[error("cannot read generated artifact `{path}`: {source}")]
    ArtifactUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
