//! Structural HTML validation
//!
//! [`HtmlValidator`] checks one document line by line and reports, in this order:
//! unbalanced tags, tags left open, attribute values without quotes, and local
//! `href`/`src` references that do not resolve against the flattened file tree.
//! Only the last kind is a warning; everything else blocks a preview run.

use atelier_core::diagnostic::Diagnostic;
use atelier_core::flat::{is_external_reference, FlatFileMap};
use regex::Regex;

/// Elements that never take a closing tag
const VOID_ELEMENTS: &[&str] = &["meta", "link", "img", "br", "hr", "input", "!doctype"];

/// An opening tag waiting for its close
#[derive(Debug)]
struct OpenTag {
    name: String,
    line: usize,
    column: usize,
}

/// Static HTML analyzer producing positioned diagnostics
pub struct HtmlValidator {
    tag_token: Regex,
    tag_name: Regex,
    reference: Regex,
}

impl HtmlValidator {
    pub fn new() -> Self {
        Self {
            tag_token: Regex::new(r"<[^>]+>").expect("tag token pattern is valid"),
            tag_name: Regex::new(r"^<(/?)([a-zA-Z][a-zA-Z0-9]*)")
                .expect("tag name pattern is valid"),
            reference: Regex::new(r#"(?i)\b(?:href|src)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
                .expect("reference pattern is valid"),
        }
    }

    /// Validate `source`, labelling diagnostics with `file_name`.
    ///
    /// `files` is used to resolve `href`/`src` references.
    pub fn validate(&self, source: &str, file_name: &str, files: &FlatFileMap) -> Vec<Diagnostic> {
        let lines: Vec<&str> = source
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .collect();

        let mut diagnostics = self.check_tag_balance(&lines, file_name);
        diagnostics.extend(self.check_attribute_quotes(&lines, file_name));
        diagnostics.extend(self.check_references(&lines, file_name, files));

        tracing::debug!(
            "Validated {}: {} diagnostics",
            file_name,
            diagnostics.len()
        );
        diagnostics
    }

    fn check_tag_balance(&self, lines: &[&str], file_name: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut stack: Vec<OpenTag> = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            for token in self.tag_token.find_iter(line) {
                let Some(captures) = self.tag_name.captures(token.as_str()) else {
                    continue;
                };
                let is_closing = &captures[1] == "/";
                let name = captures[2].to_ascii_lowercase();
                let column = char_column(line, token.start());

                if is_closing {
                    if stack.last().is_some_and(|open| open.name == name) {
                        stack.pop();
                    } else {
                        diagnostics.push(Diagnostic::error(
                            file_name,
                            index + 1,
                            column,
                            format!("closing tag </{}> without matching opening tag", name),
                        ));
                    }
                } else if !token.as_str().ends_with("/>") && !VOID_ELEMENTS.contains(&name.as_str())
                {
                    stack.push(OpenTag {
                        name,
                        line: index + 1,
                        column,
                    });
                }
            }
        }

        diagnostics.extend(stack.into_iter().map(|open| {
            Diagnostic::error(
                file_name,
                open.line,
                open.column,
                format!("tag <{}> not closed", open.name),
            )
        }));
        diagnostics
    }

    fn check_attribute_quotes(&self, lines: &[&str], file_name: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            for token in self.tag_token.find_iter(line) {
                let is_opening = self
                    .tag_name
                    .captures(token.as_str())
                    .is_some_and(|captures| &captures[1] != "/");
                if !is_opening {
                    continue;
                }

                let tag_column = char_column(line, token.start());
                for offset in unquoted_attribute_offsets(token.as_str()) {
                    diagnostics.push(Diagnostic::error(
                        file_name,
                        index + 1,
                        tag_column + offset,
                        "attribute must use quotes",
                    ));
                }
            }
        }

        diagnostics
    }

    fn check_references(
        &self,
        lines: &[&str],
        file_name: &str,
        files: &FlatFileMap,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for (index, line) in lines.iter().enumerate() {
            for captures in self.reference.captures_iter(line) {
                let Some(value) = captures.get(1).or_else(|| captures.get(2)) else {
                    continue;
                };
                let value = value.as_str();
                if value.is_empty() || is_external_reference(value) {
                    continue;
                }
                if files.resolve(value).is_some() {
                    continue;
                }

                let start = captures.get(0).map_or(0, |m| m.start());
                diagnostics.push(Diagnostic::warning(
                    file_name,
                    index + 1,
                    char_column(line, start),
                    format!("file not found: {}", value),
                ));
            }
        }

        diagnostics
    }
}

impl Default for HtmlValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// 1-based character column of a byte offset within `line`
fn char_column(line: &str, byte_offset: usize) -> usize {
    line[..byte_offset].chars().count() + 1
}

/// Character offsets (relative to the tag start) of attributes whose value is
/// not wrapped in quotes. Quoted values are skipped whole, so `=` inside them
/// is never mistaken for an assignment.
fn unquoted_attribute_offsets(tag: &str) -> Vec<usize> {
    let chars: Vec<char> = tag.chars().collect();
    let end = chars.len().saturating_sub(1);
    let mut offsets = Vec::new();

    // past '<' and the tag name
    let mut i = 1;
    while i < end && chars[i].is_ascii_alphanumeric() {
        i += 1;
    }

    while i < end {
        let c = chars[i];
        if c.is_whitespace() || c == '/' {
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            i = skip_quoted(&chars, i);
            continue;
        }

        let name_start = i;
        while i < end && !chars[i].is_whitespace() && !matches!(chars[i], '=' | '/' | '"' | '\'')
        {
            i += 1;
        }

        let mut j = i;
        while j < end && chars[j].is_whitespace() {
            j += 1;
        }
        if j >= end || chars[j] != '=' {
            i = j;
            continue;
        }

        j += 1;
        while j < end && chars[j].is_whitespace() {
            j += 1;
        }
        if j < end && (chars[j] == '"' || chars[j] == '\'') {
            i = skip_quoted(&chars, j);
        } else {
            offsets.push(name_start);
            while j < end && !chars[j].is_whitespace() {
                j += 1;
            }
            i = j;
        }
    }

    offsets
}

/// Index just past the quote closing the one at `start`
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() && chars[i] != quote {
        i += 1;
    }
    i + 1
}
