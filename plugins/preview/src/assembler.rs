//! Builds one self-contained HTML document from the flattened file tree

use atelier_core::flat::{is_external_reference, FlatFileMap};
use regex::Regex;
use serde::Serialize;

use crate::PreviewError;

/// Panel shown inside the preview when its scripts throw
const ERROR_CONSOLE: &str = r#"<div id="error-console" style="background:#111;color:#ff6b6b;font-family:monospace;padding:8px;white-space:pre;font-size:13px;display:none;"></div>"#;

/// An assembled, runnable preview document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewDocument {
    pub html: String,
    /// md5 of `html`, hex encoded
    pub content_hash: String,
    /// Resolved stylesheet paths in inclusion order
    pub css_sources: Vec<String>,
    /// Resolved script paths in inclusion order
    pub script_sources: Vec<String>,
}

/// Combines an HTML entry file with the stylesheets and scripts it references
pub struct PreviewAssembler {
    stylesheet_link: Regex,
    script_source: Regex,
    href_value: Regex,
    src_value: Regex,
    external_script: Regex,
}

impl PreviewAssembler {
    pub fn new() -> Self {
        Self {
            stylesheet_link: Regex::new(r#"<link[^>]*href=["']([^"']*)["'][^>]*>"#)
                .expect("link pattern is valid"),
            script_source: Regex::new(r#"<script[^>]*src=["']([^"']*)["'][^>]*>"#)
                .expect("script pattern is valid"),
            href_value: Regex::new(r#"href=["']([^"']*)["']"#).expect("href pattern is valid"),
            src_value: Regex::new(r#"src=["']([^"']*)["']"#).expect("src pattern is valid"),
            external_script: Regex::new(r#"<script[^>]*src=["'][^"']*["'][^>]*></script>"#)
                .expect("external script pattern is valid"),
        }
    }

    /// Assemble a preview for the file at `entry_path`.
    ///
    /// Stylesheets and scripts that cannot be resolved are skipped without error;
    /// the validator already reports them as warnings.
    pub fn assemble(
        &self,
        files: &FlatFileMap,
        entry_path: &str,
    ) -> Result<PreviewDocument, PreviewError> {
        let entry = files
            .get(entry_path)
            .ok_or_else(|| PreviewError::EntryNotFound(entry_path.to_string()))?;

        let hrefs = self.references(entry, &self.stylesheet_link, &self.href_value);
        let srcs = self.references(entry, &self.script_source, &self.src_value);

        let (css, css_sources) = concatenate(files, &hrefs);
        let (js, script_sources) = concatenate(files, &srcs);

        let body = self.external_script.replace_all(entry, "");
        let html = render_document(&css, &body, &js);
        let content_hash = format!("{:x}", md5::compute(html.as_bytes()));

        tracing::debug!(
            "Assembled preview for {} with {} stylesheets and {} scripts ({})",
            entry_path,
            css_sources.len(),
            script_sources.len(),
            content_hash
        );

        Ok(PreviewDocument {
            html,
            content_hash,
            css_sources,
            script_sources,
        })
    }

    /// Attribute values of every tag matching `tag`, in document order
    fn references(&self, entry: &str, tag: &Regex, attribute: &Regex) -> Vec<String> {
        tag.find_iter(entry)
            .filter_map(|m| {
                attribute
                    .captures(m.as_str())
                    .and_then(|captures| captures.get(1))
                    .map(|value| value.as_str().to_string())
            })
            .filter(|value| !value.is_empty())
            .collect()
    }
}

impl Default for PreviewAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Concatenate resolved files as `/* path */\ncontent\n\n`
fn concatenate(files: &FlatFileMap, references: &[String]) -> (String, Vec<String>) {
    let mut blob = String::new();
    let mut sources = Vec::new();

    for reference in references {
        if is_external_reference(reference) {
            continue;
        }
        match files.resolve(reference) {
            Some((path, content)) => {
                blob.push_str(&format!("/* {} */\n{}\n\n", path, content));
                sources.push(path.to_string());
            }
            None => tracing::trace!("Skipping unresolved reference {}", reference),
        }
    }

    (blob, sources)
}

/// Case-insensitively escape `</tag` so inlined text cannot end its element early
fn escape_closing_tag(text: &str, tag: &str) -> String {
    let needle = format!("</{}", tag);
    let lower = text.to_ascii_lowercase();
    let mut escaped = String::with_capacity(text.len());
    let mut last = 0;

    for (index, _) in lower.match_indices(&needle) {
        escaped.push_str(&text[last..index]);
        escaped.push_str("<\\/");
        last = index + 2;
    }
    escaped.push_str(&text[last..]);
    escaped
}

fn render_document(css: &str, body: &str, js: &str) -> String {
    let css = escape_closing_tag(css, "style");
    let js = escape_closing_tag(js, "script");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <style>{css}</style>
</head>
<body>
  {body}
  {console}
  <script>
    const errorConsole = document.getElementById('error-console');
    window.onerror = (msg, src, line, col, err) => {{
      errorConsole.style.display = 'block';
      errorConsole.innerText = 'JavaScript Error: ' + msg + '\n at ' + src + ':' + line + ':' + col;
    }};
    try {{
      {js}
    }} catch (e) {{
      errorConsole.style.display = 'block';
      errorConsole.innerText = 'JavaScript Error: ' + e.message;
    }}
  </script>
</body>
</html>"#,
        css = css,
        body = body,
        console = ERROR_CONSOLE,
        js = js,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::tree::FileTree;

    fn map(entries: &[(&str, &str)]) -> FlatFileMap {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_scaffold_assembles() {
        let files = FileTree::scaffold().flatten();
        let document = PreviewAssembler::new().assemble(&files, "index.html").unwrap();

        assert_eq!(document.css_sources, vec!["src/style.css"]);
        assert_eq!(document.script_sources, vec!["src/script.js"]);
        assert!(document
            .html
            .contains("<style>/* src/style.css */\nbody { color: blue; }\n\n</style>"));
        assert!(document.html.contains("/* src/script.js */\nconsole.log('Hi');"));
        // the external tag is gone, the guard script stays
        assert!(!document.html.contains(r#"<script src="src/script.js"></script>"#));
        assert!(document.html.contains(r#"<div id="error-console""#));
        assert!(document.html.contains("window.onerror"));
        assert_eq!(document.content_hash.len(), 32);
    }

    #[test]
    fn test_missing_entry() {
        let err = PreviewAssembler::new()
            .assemble(&map(&[("a.css", "")]), "index.html")
            .unwrap_err();
        assert!(matches!(err, PreviewError::EntryNotFound(path) if path == "index.html"));
    }

    #[test]
    fn test_resolution_order_and_skips() {
        let files = map(&[
            (
                "pages/home.html",
                concat!(
                    r#"<link rel="stylesheet" href="/b.css">"#,
                    r#"<link rel="stylesheet" href="https://cdn.example.com/x.css">"#,
                    r#"<link rel="stylesheet" href="a.css">"#,
                    r#"<link rel="stylesheet" href="gone.css">"#,
                    r#"<script>inline()</script>"#,
                    r#"<script src="lib/app.js"></script>"#,
                ),
            ),
            ("styles/a.css", "a{}"),
            ("b.css", "b{}"),
            ("vendor/lib/app.js", "app()"),
        ]);
        let document = PreviewAssembler::new()
            .assemble(&files, "pages/home.html")
            .unwrap();

        assert_eq!(document.css_sources, vec!["b.css", "styles/a.css"]);
        assert_eq!(document.script_sources, vec!["vendor/lib/app.js"]);
        assert!(document.html.contains("/* b.css */\nb{}\n\n/* styles/a.css */\na{}\n\n"));
        // inline scripts survive
        assert!(document.html.contains("<script>inline()</script>"));
    }

    #[test]
    fn test_script_terminators_are_escaped() {
        let files = map(&[
            ("index.html", r#"<script src="x.js"></script>"#),
            ("x.js", "document.write('</SCRIPT>');"),
        ]);
        let document = PreviewAssembler::new().assemble(&files, "index.html").unwrap();

        assert!(document.html.contains(r"document.write('<\/SCRIPT>');"));
        assert_eq!(document.html.matches("</script>").count(), 1);
    }

    #[test]
    fn test_identical_input_hashes_identically() {
        let files = FileTree::scaffold().flatten();
        let assembler = PreviewAssembler::new();
        let first = assembler.assemble(&files, "index.html").unwrap();
        let second = assembler.assemble(&files, "index.html").unwrap();
        assert_eq!(first.content_hash, second.content_hash);
    }
}
