use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::PreviewSettings;
use crate::domain::document::ProjectLayout;

use super::admission::BuildSlot;
use super::types::PreviewError;

/// Marker Sphinx prints to stderr when a build blows up without setting an
/// exit code (historically observed on Windows).
pub const EXCEPTION_MARKER: &str = "Exception occurred:";

/// Fully resolved invocation for one preview build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
    /// Where the generated HTML is expected afterwards.
    pub artifact: PathBuf,
}

impl BuildPlan {
    /// Resolve the command line for `document`.
    ///
    /// Project documents build through `<builder> -b html . <output-dir>`
    /// with the working directory set to the configuration directory;
    /// everything else goes through the direct single-file converter into
    /// the scratch directory. A project document living outside its
    /// configured directory falls back to the converter as well.
    pub fn resolve(document: &Path, settings: &PreviewSettings) -> Self {
        let layout = ProjectLayout::resolve(
            document,
            settings.conf_dir.as_deref(),
            settings.output_dir.as_deref(),
        );

        if let ProjectLayout::Sphinx {
            conf_dir,
            output_dir,
        } = &layout
            && let Some(artifact) = layout.artifact_for(document)
        {
            let (program, mut args) = match settings.interpreter.as_deref() {
                Some(interpreter) => (
                    interpreter.to_path_buf(),
                    vec![OsString::from("-m"), OsString::from("sphinx")],
                ),
                None => (settings.builder_path.clone(), Vec::new()),
            };
            args.extend([
                OsString::from("-b"),
                OsString::from("html"),
                OsString::from("."),
                output_dir.clone().into_os_string(),
            ]);
            return Self {
                program,
                args,
                cwd: conf_dir.clone(),
                artifact,
            };
        }

        let file_name = document.file_name().unwrap_or_default();
        let artifact = settings
            .scratch_dir
            .join(Path::new(file_name).with_extension("html"));
        let (program, mut args) = match settings.interpreter.as_deref() {
            Some(interpreter) => (
                interpreter.to_path_buf(),
                vec![OsString::from("-m"), OsString::from("docutils")],
            ),
            None => (settings.converter_path.clone(), Vec::new()),
        };
        args.extend([
            document.as_os_str().to_os_string(),
            artifact.clone().into_os_string(),
        ]);
        let cwd = document
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            program,
            args,
            cwd,
            artifact,
        }
    }
}

/// Captured result of a finished build process.
#[derive(Debug)]
pub struct BuildOutput {
    pub stderr: String,
}

/// Spawn the planned process, record its pid on the slot, and wait for it.
///
/// Only the spawn itself and a clean exit with a clean stderr count as
/// success; a nonzero exit or the exception marker on stderr surface as the
/// corresponding [`PreviewError`] without the artifact ever being read.
pub async fn run_build(plan: &BuildPlan, slot: &BuildSlot) -> Result<BuildOutput, PreviewError> {
    let started_at = Instant::now();
    let mut command = Command::new(&plan.program);
    command
        .args(&plan.args)
        .current_dir(&plan.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let child = command.spawn().map_err(|err| {
        warn!(
            target = "application::preview::builder",
            op = "builder::run_build",
            result = "error",
            error_code = "spawn",
            program = %plan.program.display(),
            error = %err,
            "failed to spawn preview builder"
        );
        PreviewError::SpawnFailed {
            program: plan.program.clone(),
            source: err,
        }
    })?;

    if let Some(pid) = child.id() {
        slot.record_pid(pid);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|err| PreviewError::SpawnFailed {
            program: plan.program.clone(),
            source: err,
        })?;
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        let exit_code = output.status.code();
        warn!(
            target = "application::preview::builder",
            op = "builder::run_build",
            result = "error",
            error_code = "exit_status",
            exit_code = exit_code.map(i64::from).unwrap_or(-1),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            stderr = %stderr,
            "preview builder failed"
        );
        return Err(PreviewError::BuildFailed { exit_code, stderr });
    }

    if stderr.contains(EXCEPTION_MARKER) {
        warn!(
            target = "application::preview::builder",
            op = "builder::run_build",
            result = "error",
            error_code = "silent_exception",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            stderr = %stderr,
            "preview builder exited cleanly but reported an exception"
        );
        return Err(PreviewError::BuildException { stderr });
    }

    info!(
        target = "application::preview::builder",
        op = "builder::run_build",
        result = "ok",
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        artifact = %plan.artifact.display(),
        "preview builder finished"
    );
    Ok(BuildOutput { stderr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn settings() -> PreviewSettings {
        PreviewSettings {
            conf_dir: Some(PathBuf::from("/docs")),
            ..PreviewSettings::default()
        }
    }

    fn args_strings(plan: &BuildPlan) -> Vec<&OsStr> {
        plan.args.iter().map(OsString::as_os_str).collect()
    }

    #[test]
    fn project_build_runs_the_builder_from_the_conf_dir() {
        let plan = BuildPlan::resolve(Path::new("/docs/guide/index.rst"), &settings());
        assert_eq!(plan.program, PathBuf::from("sphinx-build"));
        assert_eq!(
            args_strings(&plan),
            ["-b", "html", ".", "/docs/_build/html"]
                .map(OsStr::new)
                .to_vec()
        );
        assert_eq!(plan.cwd, PathBuf::from("/docs"));
        assert_eq!(plan.artifact, PathBuf::from("/docs/_build/html/guide/index.html"));
    }

    #[test]
    fn interpreter_wraps_the_project_build() {
        let mut settings = settings();
        settings.interpreter = Some(PathBuf::from("/usr/bin/python3"));
        let plan = BuildPlan::resolve(Path::new("/docs/index.rst"), &settings);
        assert_eq!(plan.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(
            args_strings(&plan),
            ["-m", "sphinx", "-b", "html", ".", "/docs/_build/html"]
                .map(OsStr::new)
                .to_vec()
        );
    }

    #[test]
    fn standalone_document_uses_the_converter_into_scratch() {
        let mut settings = PreviewSettings::default();
        settings.conf_dir = Some(PathBuf::from(""));
        settings.scratch_dir = PathBuf::from("/tmp/anteprima-scratch");
        let plan = BuildPlan::resolve(Path::new("/notes/todo.rst"), &settings);
        assert_eq!(plan.program, PathBuf::from("rst2html5"));
        assert_eq!(
            args_strings(&plan),
            ["/notes/todo.rst", "/tmp/anteprima-scratch/todo.html"]
                .map(OsStr::new)
                .to_vec()
        );
        assert_eq!(plan.cwd, PathBuf::from("/notes"));
        assert_eq!(plan.artifact, PathBuf::from("/tmp/anteprima-scratch/todo.html"));
    }

    #[test]
    fn document_outside_the_project_falls_back_to_the_converter() {
        let plan = BuildPlan::resolve(Path::new("/elsewhere/note.rst"), &settings());
        assert_eq!(plan.program, PathBuf::from("rst2html5"));
    }
}
