use std::path::{Path, PathBuf};

/// Name of the Sphinx project configuration file that marks a project root.
pub const SPHINX_CONF_FILE: &str = "conf.py";

/// Default output location for project builds, relative to the configuration
/// directory.
pub const DEFAULT_BUILD_SUBDIR: &str = "_build/html";

/// How a document should be turned into HTML: through a full Sphinx project
/// build, or through a direct single-file conversion when no project
/// configuration applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectLayout {
    /// The document belongs to a Sphinx project rooted at `conf_dir`.
    Sphinx {
        conf_dir: PathBuf,
        output_dir: PathBuf,
    },
    /// No project configuration applies; convert the file on its own.
    Standalone,
}

impl ProjectLayout {
    /// Resolve the layout for `document`.
    ///
    /// An explicitly configured directory wins; otherwise the ancestors of
    /// the document are searched for a `conf.py`. A configured empty path
    /// means "no project file; use the direct converter" and is treated the
    /// same as `None` with discovery skipped.
    pub fn resolve(
        document: &Path,
        configured_conf_dir: Option<&Path>,
        output_override: Option<&Path>,
    ) -> Self {
        let conf_dir = match configured_conf_dir {
            Some(dir) if dir.as_os_str().is_empty() => None,
            Some(dir) => Some(dir.to_path_buf()),
            None => discover_conf_dir(document),
        };

        match conf_dir {
            Some(conf_dir) => {
                let output_dir = output_override
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| conf_dir.join(DEFAULT_BUILD_SUBDIR));
                Self::Sphinx {
                    conf_dir,
                    output_dir,
                }
            }
            None => Self::Standalone,
        }
    }

    /// Expected output artifact for `document` under this layout.
    ///
    /// For project builds this is `<output_dir>/<docname>.html`, where the
    /// docname is the document's path relative to the configuration
    /// directory. Returns `None` for standalone layouts and for documents
    /// that live outside the configuration directory (callers fall back to
    /// standalone conversion in that case).
    pub fn artifact_for(&self, document: &Path) -> Option<PathBuf> {
        match self {
            Self::Sphinx {
                conf_dir,
                output_dir,
            } => {
                let docname = document.strip_prefix(conf_dir).ok()?;
                Some(output_dir.join(docname.with_extension("html")))
            }
            Self::Standalone => None,
        }
    }
}

/// Walk up from the document toward the filesystem root looking for the
/// directory that carries `conf.py`.
fn discover_conf_dir(document: &Path) -> Option<PathBuf> {
    document
        .ancestors()
        .skip(1)
        .find(|dir| dir.join(SPHINX_CONF_FILE).is_file())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn explicit_conf_dir_wins_over_discovery() {
        let layout = ProjectLayout::resolve(
            Path::new("/docs/guide/index.rst"),
            Some(Path::new("/docs")),
            None,
        );
        assert_eq!(
            layout,
            ProjectLayout::Sphinx {
                conf_dir: PathBuf::from("/docs"),
                output_dir: PathBuf::from("/docs/_build/html"),
            }
        );
    }

    #[test]
    fn empty_conf_dir_means_standalone() {
        let layout =
            ProjectLayout::resolve(Path::new("/docs/readme.rst"), Some(Path::new("")), None);
        assert_eq!(layout, ProjectLayout::Standalone);
    }

    #[test]
    fn output_override_replaces_default_build_dir() {
        let layout = ProjectLayout::resolve(
            Path::new("/docs/index.rst"),
            Some(Path::new("/docs")),
            Some(Path::new("/tmp/out")),
        );
        let ProjectLayout::Sphinx { output_dir, .. } = layout else {
            panic!("expected a project layout");
        };
        assert_eq!(output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn discovers_conf_py_in_ancestor() {
        let dir = TempDir::new().expect("temp dir");
        let project = dir.path().join("docs");
        let nested = project.join("guide");
        fs::create_dir_all(&nested).expect("mkdir");
        fs::write(project.join(SPHINX_CONF_FILE), "project = 'x'\n").expect("conf.py");
        let document = nested.join("install.rst");
        fs::write(&document, "Install\n=======\n").expect("doc");

        let layout = ProjectLayout::resolve(&document, None, None);
        assert_eq!(
            layout,
            ProjectLayout::Sphinx {
                conf_dir: project.clone(),
                output_dir: project.join(DEFAULT_BUILD_SUBDIR),
            }
        );
    }

    #[test]
    fn no_conf_py_anywhere_is_standalone() {
        let dir = TempDir::new().expect("temp dir");
        let document = dir.path().join("note.rst");
        fs::write(&document, "Note\n====\n").expect("doc");
        assert_eq!(ProjectLayout::resolve(&document, None, None), ProjectLayout::Standalone);
    }

    #[test]
    fn artifact_preserves_nested_docname() {
        let layout = ProjectLayout::Sphinx {
            conf_dir: PathBuf::from("/docs"),
            output_dir: PathBuf::from("/docs/_build/html"),
        };
        assert_eq!(
            layout.artifact_for(Path::new("/docs/guide/install.rst")),
            Some(PathBuf::from("/docs/_build/html/guide/install.html"))
        );
    }

    #[test]
    fn artifact_outside_conf_dir_is_none() {
        let layout = ProjectLayout::Sphinx {
            conf_dir: PathBuf::from("/docs"),
            output_dir: PathBuf::from("/docs/_build/html"),
        };
        assert_eq!(layout.artifact_for(Path::new("/elsewhere/readme.rst")), None);
    }
}
