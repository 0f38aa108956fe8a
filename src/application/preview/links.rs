use std::path::Path;

use lol_html::{RewriteStrSettings, element, rewrite_str};
use tracing::warn;
use url::Url;

/// Rewrite relative `src=` / `href=` attribute values in generated HTML so
/// they resolve through a host-addressable scheme.
///
/// A relative value `rel` becomes `<scheme>:<artifact-dir>/<rel>`. Values
/// that are already absolute URIs (`http://…`, `https://…`, `data:…`, an
/// earlier pass's `<scheme>:…`) or in-page anchors (`#…`) pass through
/// byte-identical. The transformation is pure text; if the streaming
/// rewriter rejects the input, the original HTML is returned unchanged.
pub fn rewrite_links(html: &str, artifact: &Path, scheme: &str) -> String {
    let dir = artifact.parent().unwrap_or_else(|| Path::new(""));
    let rewrite = |value: &str| -> Option<String> {
        if value.is_empty() || is_external(value) {
            return None;
        }
        Some(format!("{scheme}:{}", dir.join(value).display()))
    };

    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("[src]", |el| {
                    if let Some(value) = el.get_attribute("src")
                        && let Some(resolved) = rewrite(&value)
                    {
                        el.set_attribute("src", &resolved)?;
                    }
                    Ok(())
                }),
                element!("[href]", |el| {
                    if let Some(value) = el.get_attribute("href")
                        && let Some(resolved) = rewrite(&value)
                    {
                        el.set_attribute("href", &resolved)?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => rewritten,
        Err(err) => {
            warn!(
                target = "application::preview::links",
                artifact = %artifact.display(),
                error = %err,
                "link rewriting failed; returning artifact unchanged"
            );
            html.to_string()
        }
    }
}

/// Anchor-only values and anything that already carries a URI scheme stay
/// untouched.
fn is_external(value: &str) -> bool {
    value.starts_with('#') || Url::parse(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEME: &str = "vscode-resource";

    fn artifact() -> &'static Path {
        Path::new("/a/b/out.html")
    }

    #[test]
    fn relative_src_is_resolved_against_the_artifact_directory() {
        let html = rewrite_links(r#"<img src="pic.png">"#, artifact(), SCHEME);
        assert_eq!(html, r#"<img src="vscode-resource:/a/b/pic.png">"#);
    }

    #[test]
    fn relative_href_is_resolved() {
        let html = rewrite_links(r#"<link rel="stylesheet" href="_static/basic.css">"#, artifact(), SCHEME);
        assert_eq!(
            html,
            r#"<link rel="stylesheet" href="vscode-resource:/a/b/_static/basic.css">"#
        );
    }

    #[test]
    fn absolute_urls_are_byte_identical() {
        let input = r#"<a href="http://example.com">x</a><a href="https://example.com/y">y</a>"#;
        assert_eq!(rewrite_links(input, artifact(), SCHEME), input);
    }

    #[test]
    fn anchors_are_byte_identical() {
        let input = r##"<a href="#sec1">section</a>"##;
        assert_eq!(rewrite_links(input, artifact(), SCHEME), input);
    }

    #[test]
    fn data_uris_and_mailto_are_untouched() {
        let input = r#"<img src="data:image/png;base64,AAAA"><a href="mailto:a@b.c">m</a>"#;
        assert_eq!(rewrite_links(input, artifact(), SCHEME), input);
    }

    #[test]
    fn already_rewritten_values_are_untouched() {
        let input = r#"<img src="vscode-resource:/a/b/pic.png">"#;
        assert_eq!(rewrite_links(input, artifact(), SCHEME), input);
    }

    #[test]
    fn nested_relative_paths_keep_their_subdirectories() {
        let html = rewrite_links(r#"<img src="images/shot.png">"#, artifact(), SCHEME);
        assert_eq!(html, r#"<img src="vscode-resource:/a/b/images/shot.png">"#);
    }

    #[test]
    fn empty_values_are_left_alone() {
        let input = r#"<a href="">empty</a>"#;
        assert_eq!(rewrite_links(input, artifact(), SCHEME), input);
    }
}
