//! Adapter around an external doc8-style linter.
//!
//! No markup parsing happens here: the configured linter runs against one
//! document and its `path:line: CODE message` report lines are mapped into
//! structured diagnostics.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::LintSettings;

#[derive(Debug, Error)]
pub enum LintError {
    #[error("linting is disabled by configuration")]
    Disabled,
    #[error("failed to spawn linter `{program}`: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("linter exited with {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

/// One finding reported by the external linter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintDiagnostic {
    pub file: String,
    pub line: u32,
    pub code: String,
    pub message: String,
}

/// Runs the configured linter over single documents.
pub struct LintService {
    settings: LintSettings,
}

impl LintService {
    pub fn new(settings: LintSettings) -> Self {
        Self { settings }
    }

    /// Lint one document. Exit code 0 means clean, 1 means findings were
    /// reported on stdout; anything else is a linter failure.
    pub async fn lint(&self, document: &Path) -> Result<Vec<LintDiagnostic>, LintError> {
        if !self.settings.enabled {
            return Err(LintError::Disabled);
        }

        let started_at = Instant::now();
        let output = Command::new(&self.settings.program)
            .arg(document)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| LintError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        counter!("anteprima_lint_runs_total").increment(1);
        if !matches!(output.status.code(), Some(0 | 1)) {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "application::lint",
                op = "lint::run",
                result = "error",
                exit_code = output.status.code().map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "linter failed"
            );
            return Err(LintError::Failed {
                exit_code: output.status.code(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let diagnostics: Vec<LintDiagnostic> = stdout.lines().filter_map(parse_line).collect();
        info!(
            target = "application::lint",
            op = "lint::run",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            document = %document.display(),
            findings = diagnostics.len(),
            "lint finished"
        );
        Ok(diagnostics)
    }
}

/// Parse one `path:line: CODE message` report line; anything else (summary
/// lines, blank lines) is skipped.
fn parse_line(line: &str) -> Option<LintDiagnostic> {
    let mut parts = line.splitn(3, ':');
    let file = parts.next()?.trim();
    let line_no: u32 = parts.next()?.trim().parse().ok()?;
    let rest = parts.next()?.trim();
    if file.is_empty() || rest.is_empty() {
        return None;
    }
    let (code, message) = match rest.split_once(' ') {
        Some((code, message)) => (code, message.trim()),
        None => (rest, ""),
    };
    Some(LintDiagnostic {
        file: file.to_string(),
        line: line_no,
        code: code.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_doc8_style_lines() {
        let diagnostic = parse_line("docs/index.rst:12: D001 Line too long").expect("diagnostic");
        assert_eq!(
            diagnostic,
            LintDiagnostic {
                file: "docs/index.rst".to_string(),
                line: 12,
                code: "D001".to_string(),
                message: "Line too long".to_string(),
            }
        );
    }

    #[test]
    fn skips_summary_and_blank_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("Total files scanned = 1"), None);
        assert_eq!(parse_line("1 total accumulated errors"), None);
    }

    #[test]
    fn keeps_colons_inside_the_message() {
        let diagnostic =
            parse_line("a.rst:3: D000 Inline literal start-string without end-string: `x").expect("diagnostic");
        assert_eq!(diagnostic.line, 3);
        assert!(diagnostic.message.contains("end-string: `x"));
    }
}
