//! Diagnostic pages shown on the preview surface.
//!
//! Every preview request ends in HTML: the rendered artifact on success, or
//! one of the pages below. Template rendering itself must not be able to
//! fail the contract, so a plain-text fallback stands in if askama ever
//! rejects a template.

use askama::Template;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::error;

use crate::application::preview::PreviewError;

const TROUBLESHOOTING_URL: &str =
    "https://www.sphinx-doc.org/en/master/usage/installation.html";

/// Headline carried by every build-failure page.
pub const BUILD_FAILURE_HEADLINE: &str = "Cannot generate preview page.";

const SPAWN_CAUSES: &[&str] = &[
    "The configured builder or converter executable was not found.",
    "The external interpreter is not installed or not on PATH.",
    "The build-path setting points at the wrong executable.",
];

const BUILD_FAILURE_CAUSES: &[&str] = &[
    "The external interpreter is missing.",
    "The Sphinx builder (sphinx-build) is missing.",
    "The build-path setting is wrong.",
    "The project configuration directory (conf.py) is wrong.",
    "The docutils converter library is missing.",
];

const BUILD_EXCEPTION_CAUSES: &[&str] = &[
    "The builder raised an exception without setting an exit code (observed on Windows).",
    "The project configuration directory (conf.py) is wrong.",
    "A Sphinx extension named in conf.py failed to import.",
];

const ARTIFACT_CAUSES: &[&str] = &[
    "The project configuration directory (conf.py) is wrong.",
    "The output-path setting does not match where the builder writes.",
];

#[derive(Template)]
#[template(path = "preview_failure.html")]
struct PreviewFailureTemplate {
    headline: String,
    causes: &'static [&'static str],
    error_text: String,
    troubleshooting_url: &'static str,
    generated_at: String,
}

#[derive(Template)]
#[template(path = "preview_busy.html")]
struct PreviewBusyTemplate;

/// Render the diagnostic page for a failed preview build.
pub fn failure_page(failure: &PreviewError) -> String {
    let (headline, causes, error_text) = match failure {
        PreviewError::SpawnFailed { program, source } => (
            BUILD_FAILURE_HEADLINE.to_string(),
            SPAWN_CAUSES,
            format!("failed to spawn `{}`: {source}", program.display()),
        ),
        PreviewError::BuildFailed { exit_code, stderr } => (
            BUILD_FAILURE_HEADLINE.to_string(),
            BUILD_FAILURE_CAUSES,
            match exit_code {
                Some(code) => format!("builder exited with status {code}\n\n{stderr}"),
                None => format!("builder was terminated by a signal\n\n{stderr}"),
            },
        ),
        PreviewError::BuildException { stderr } => (
            BUILD_FAILURE_HEADLINE.to_string(),
            BUILD_EXCEPTION_CAUSES,
            stderr.clone(),
        ),
        // The artifact page deliberately omits process stderr: the build
        // itself reported success.
        PreviewError::ArtifactUnreadable { path, .. } => (
            format!("Cannot read the generated preview page at {}.", path.display()),
            ARTIFACT_CAUSES,
            String::new(),
        ),
    };

    let template = PreviewFailureTemplate {
        headline,
        causes,
        error_text,
        troubleshooting_url: TROUBLESHOOTING_URL,
        generated_at: timestamp(),
    };
    template.render().unwrap_or_else(|err| {
        error!(
            target = "presentation::views",
            error = %err,
            "diagnostic template rendering failed; falling back to plain text"
        );
        format!("{}\n\n{failure}\n", BUILD_FAILURE_HEADLINE)
    })
}

/// Notice shown when a request was coalesced away by a newer one.
pub fn busy_page() -> String {
    PreviewBusyTemplate.render().unwrap_or_else(|err| {
        error!(
            target = "presentation::views",
            error = %err,
            "busy template rendering failed; falling back to plain text"
        );
        "Another preview build is in progress.".to_string()
    })
}

fn timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
