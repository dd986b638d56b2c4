//! Positioned validation diagnostics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic severity; only errors block a preview run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One reported issue with a 1-based source position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(
        file: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(
        file: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.file, self.line, self.column, self.severity, self.message
        )
    }
}

/// True when any diagnostic has error severity
pub fn has_blocking(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

/// Count of (errors, warnings)
pub fn tally(diagnostics: &[Diagnostic]) -> (usize, usize) {
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    (errors, diagnostics.len() - errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_and_tally() {
        let diagnostics = vec![
            Diagnostic::warning("index.html", 3, 5, "file not found: a.css"),
            Diagnostic::error("index.html", 7, 1, "attribute must use quotes"),
        ];

        assert!(has_blocking(&diagnostics));
        assert!(!has_blocking(&diagnostics[..1]));
        assert_eq!(tally(&diagnostics), (1, 1));
    }

    #[test]
    fn test_display_and_serde() {
        let diagnostic = Diagnostic::error("index.html", 2, 4, "tag <p> not closed");
        assert_eq!(
            diagnostic.to_string(),
            "index.html:2:4: error: tag <p> not closed"
        );

        let json = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(json["severity"], "error");
    }
}
