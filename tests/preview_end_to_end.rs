#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anteprima::application::preview::{
    PreviewError, PreviewOutcome, PreviewRequest, PreviewService,
};
use anteprima::config::PreviewSettings;
use anteprima::presentation::views;
use tempfile::TempDir;

fn write_script(path: &Path, contents: &str) {
    fs::write(path, contents).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("set perms");
}

/// A stand-in `sphinx-build` that records each invocation and writes an
/// `index.html` with a mix of relative, absolute, and anchor links.
fn fake_builder(dir: &Path, invocations: &Path) -> PathBuf {
    let script_path = dir.join("fake-sphinx-build");
    let script = format!(
        r##"#!/bin/sh
set -eu
echo "$@" >> "{invocations}"
for arg in "$@"; do out="$arg"; done
mkdir -p "$out"
cat > "$out/index.html" <<'HTML'
<html><body>
<img src="pic.png">
<a href="http://example.com">external</a>
<a href="#sec1">anchor</a>
</body></html>
HTML
"##,
        invocations = invocations.display()
    );
    write_script(&script_path, &script);
    script_path
}

fn project(dir: &TempDir) -> PathBuf {
    let conf_dir = dir.path().join("docs");
    fs::create_dir_all(&conf_dir).expect("mkdir");
    fs::write(conf_dir.join("conf.py"), "project = 'demo'\n").expect("conf.py");
    fs::write(conf_dir.join("index.rst"), "Demo\n====\n").expect("index.rst");
    conf_dir
}

fn settings(dir: &TempDir, conf_dir: &Path, builder: &Path, debounce_ms: u64) -> PreviewSettings {
    PreviewSettings {
        builder_path: builder.to_path_buf(),
        conf_dir: Some(conf_dir.to_path_buf()),
        debounce: Duration::from_millis(debounce_ms),
        scratch_dir: dir.path().join("scratch"),
        ..PreviewSettings::default()
    }
}

#[tokio::test]
async fn successful_build_rewrites_relative_links_only() {
    let dir = TempDir::new().expect("temp dir");
    let invocations = dir.path().join("invocations.log");
    let conf_dir = project(&dir);
    let builder = fake_builder(dir.path(), &invocations);
    let service =
        PreviewService::new(settings(&dir, &conf_dir, &builder, 0)).expect("service");

    let outcome = service
        .render(&PreviewRequest::new(conf_dir.join("index.rst")))
        .await;

    let PreviewOutcome::Rendered { html } = outcome else {
        panic!("expected a rendered preview, got {outcome:?}");
    };
    let artifact_dir = conf_dir.join("_build/html");
    assert!(
        html.contains(&format!(
            r#"<img src="vscode-resource:{}/pic.png">"#,
            artifact_dir.display()
        )),
        "relative link not rewritten: {html}"
    );
    assert!(html.contains(r#"<a href="http://example.com">"#));
    assert!(html.contains(r##"<a href="#sec1">"##));
}

#[tokio::test]
async fn link_rewriting_can_be_disabled_per_request() {
    let dir = TempDir::new().expect("temp dir");
    let invocations = dir.path().join("invocations.log");
    let conf_dir = project(&dir);
    let builder = fake_builder(dir.path(), &invocations);
    let service =
        PreviewService::new(settings(&dir, &conf_dir, &builder, 0)).expect("service");

    let request = PreviewRequest::new(conf_dir.join("index.rst")).with_fix_links(false);
    let PreviewOutcome::Rendered { html } = service.render(&request).await else {
        panic!("expected a rendered preview");
    };
    assert!(html.contains(r#"<img src="pic.png">"#));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn burst_of_two_requests_launches_only_the_latest_build() {
    let dir = TempDir::new().expect("temp dir");
    let invocations = dir.path().join("invocations.log");
    let conf_dir = project(&dir);
    let builder = fake_builder(dir.path(), &invocations);
    let service = std::sync::Arc::new(
        PreviewService::new(settings(&dir, &conf_dir, &builder, 300)).expect("service"),
    );

    let first = {
        let service = service.clone();
        let document = conf_dir.join("index.rst");
        tokio::spawn(async move { service.render(&PreviewRequest::new(document)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = {
        let service = service.clone();
        let document = conf_dir.join("index.rst");
        tokio::spawn(async move { service.render(&PreviewRequest::new(document)).await })
    };

    let first = first.await.expect("first task");
    let second = second.await.expect("second task");

    assert!(
        matches!(first, PreviewOutcome::Superseded),
        "first request should yield silently, got {first:?}"
    );
    assert!(matches!(second, PreviewOutcome::Rendered { .. }));

    let log = fs::read_to_string(&invocations).expect("invocation log");
    assert_eq!(log.lines().count(), 1, "exactly one build process: {log}");
}

#[tokio::test]
async fn nonzero_exit_produces_the_build_failure_page_with_stderr() {
    let dir = TempDir::new().expect("temp dir");
    let conf_dir = project(&dir);
    let builder = dir.path().join("failing-sphinx-build");
    write_script(
        &builder,
        "#!/bin/sh\necho \"conf.py does not exist\" >&2\nexit 2\n",
    );
    let service =
        PreviewService::new(settings(&dir, &conf_dir, &builder, 0)).expect("service");

    let outcome = service
        .render(&PreviewRequest::new(conf_dir.join("index.rst")))
        .await;
    let PreviewOutcome::Failed { error } = outcome else {
        panic!("expected a failed preview, got {outcome:?}");
    };
    assert!(matches!(
        error,
        PreviewError::BuildFailed {
            exit_code: Some(2),
            ..
        }
    ));

    let page = views::failure_page(&error);
    assert!(page.contains("Cannot generate preview page."));
    assert!(page.contains("conf.py does not exist"));
}

#[tokio::test]
async fn clean_exit_with_exception_marker_is_a_failure() {
    let dir = TempDir::new().expect("temp dir");
    let conf_dir = project(&dir);
    let builder = dir.path().join("silently-failing-sphinx-build");
    write_script(
        &builder,
        "#!/bin/sh\necho \"Exception occurred: ImportError\" >&2\nexit 0\n",
    );
    let service =
        PreviewService::new(settings(&dir, &conf_dir, &builder, 0)).expect("service");

    let outcome = service
        .render(&PreviewRequest::new(conf_dir.join("index.rst")))
        .await;
    let PreviewOutcome::Failed { error } = outcome else {
        panic!("expected a failed preview, got {outcome:?}");
    };
    assert!(matches!(error, PreviewError::BuildException { .. }));

    let page = views::failure_page(&error);
    assert!(page.contains("Cannot generate preview page."));
    assert!(page.contains("Exception occurred: ImportError"));
}

#[tokio::test]
async fn missing_artifact_cites_the_path_and_omits_stderr() {
    let dir = TempDir::new().expect("temp dir");
    let conf_dir = project(&dir);
    let builder = dir.path().join("no-output-sphinx-build");
    // Exits cleanly, chatters on stderr, writes nothing.
    write_script(
        &builder,
        "#!/bin/sh\necho \"writing output... done\" >&2\nexit 0\n",
    );
    let service =
        PreviewService::new(settings(&dir, &conf_dir, &builder, 0)).expect("service");

    let outcome = service
        .render(&PreviewRequest::new(conf_dir.join("index.rst")))
        .await;
    let PreviewOutcome::Failed { error } = outcome else {
        panic!("expected a failed preview, got {outcome:?}");
    };
    let expected_artifact = conf_dir.join("_build/html/index.html");
    assert!(matches!(
        &error,
        PreviewError::ArtifactUnreadable { path, .. } if path == &expected_artifact
    ));

    let page = views::failure_page(&error);
    assert!(page.contains(&format!(
        "Cannot read the generated preview page at {}.",
        expected_artifact.display()
    )));
    assert!(!page.contains("writing output"));
    assert!(!page.contains("Captured error output"));
}

#[tokio::test]
async fn standalone_document_goes_through_the_converter() {
    let dir = TempDir::new().expect("temp dir");
    let invocations = dir.path().join("invocations.log");
    let converter = dir.path().join("fake-rst2html5");
    let script = format!(
        r#"#!/bin/sh
set -eu
echo "$@" >> "{invocations}"
cat > "$2" <<'HTML'
<html><body><p>standalone</p></body></html>
HTML
"#,
        invocations = invocations.display()
    );
    write_script(&converter, &script);

    let document = dir.path().join("note.rst");
    fs::write(&document, "Note\n====\n").expect("note.rst");

    let settings = PreviewSettings {
        converter_path: converter,
        conf_dir: Some(PathBuf::new()),
        debounce: Duration::from_millis(0),
        scratch_dir: dir.path().join("scratch"),
        ..PreviewSettings::default()
    };
    let service = PreviewService::new(settings).expect("service");

    let outcome = service.render(&PreviewRequest::new(&document)).await;
    let PreviewOutcome::Rendered { html } = outcome else {
        panic!("expected a rendered preview, got {outcome:?}");
    };
    assert!(html.contains("standalone"));

    let log = fs::read_to_string(&invocations).expect("invocation log");
    assert!(log.contains("note.rst"));
    assert!(log.contains("scratch/note.html"));
}
