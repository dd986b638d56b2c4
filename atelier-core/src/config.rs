//! Configuration management for the Atelier system

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AtelierError, Result};

/// Main system configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub editor: EditorConfig,
}

impl Config {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file; missing sections fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AtelierError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| AtelierError::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AtelierError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| AtelierError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration, failing on the first hard error
    pub fn validate(&self) -> Result<()> {
        let result = self.validate_comprehensive();
        match result.errors.first() {
            Some(error) => Err(AtelierError::Config(format!(
                "{}: {}",
                error.field_path, error.message
            ))),
            None => Ok(()),
        }
    }

    /// Collect every configuration error and warning
    pub fn validate_comprehensive(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.server.port == 0 {
            result.error("server.port", "Port must be between 1 and 65535");
        }
        if self.server.hostname.trim().is_empty() {
            result.error("server.hostname", "Hostname must not be empty");
        } else if self.server.hostname == "0.0.0.0" {
            result.warning(
                "server.hostname",
                "Binding to all interfaces exposes the workspace to the network",
            );
        }

        if self.storage.path.as_os_str().is_empty() {
            result.error("storage.path", "Storage path must not be empty");
        } else if self.storage.path.is_dir() {
            result.error("storage.path", "Storage path points to a directory");
        }

        if self.editor.preview_ttl_ms == 0 {
            result.error(
                "editor.preview_ttl_ms",
                "Preview references must stay alive for at least 1 ms",
            );
        } else if self.editor.preview_ttl_ms > 60_000 {
            result.warning(
                "editor.preview_ttl_ms",
                "Long-lived previews accumulate across repeated runs",
            );
        }
        if self.editor.max_live_previews == 0 {
            result.error("editor.max_live_previews", "At least one live preview is required");
        }
        if self.editor.highlight_duration_ms == 0 {
            result.warning(
                "editor.highlight_duration_ms",
                "Diagnostic highlights will disappear immediately",
            );
        }
        if self.editor.html_extensions.is_empty() {
            result.error(
                "editor.html_extensions",
                "At least one HTML extension is required to run previews",
            );
        }
        for extension in &self.editor.html_extensions {
            if extension.starts_with('.') || extension.is_empty() {
                result.error(
                    "editor.html_extensions",
                    &format!("Extension '{}' must be given without a leading dot", extension),
                );
            }
        }
        if self.editor.legacy_delete_by_name {
            result.warning(
                "editor.legacy_delete_by_name",
                "Deleting by name removes every node sharing that name",
            );
        }

        result.is_valid = result.errors.is_empty();
        result
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 3000,
            enable_cors: true,
        }
    }
}

/// Where durable state lives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let path = dirs::data_dir()
            .map(|dir| dir.join("atelier").join("storage.json"))
            .unwrap_or_else(|| PathBuf::from("atelier-storage.json"));
        Self { path }
    }
}

/// Editor session behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// How long a navigated-to line stays highlighted
    pub highlight_duration_ms: u64,
    /// How long an assembled preview stays addressable
    pub preview_ttl_ms: u64,
    /// Upper bound of previews held at once; the oldest is evicted first
    pub max_live_previews: usize,
    /// Clear diagnostics as soon as the user edits after a run
    pub clear_diagnostics_on_edit: bool,
    /// Allow the global delete-by-name operation
    pub legacy_delete_by_name: bool,
    /// Extensions (without dot, case-insensitive) that can be run
    pub html_extensions: Vec<String>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            highlight_duration_ms: 2000,
            preview_ttl_ms: 1000,
            max_live_previews: 16,
            clear_diagnostics_on_edit: false,
            legacy_delete_by_name: false,
            html_extensions: vec!["html".to_string(), "htm".to_string()],
        }
    }
}

impl EditorConfig {
    /// Whether `name` ends in one of the runnable HTML extensions
    pub fn is_html_file(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((_, extension)) => self
                .html_extensions
                .iter()
                .any(|candidate| candidate.eq_ignore_ascii_case(extension)),
            None => false,
        }
    }
}

/// Outcome of [`Config::validate_comprehensive`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn error(&mut self, field_path: &str, message: &str) {
        self.errors.push(ValidationIssue::new(field_path, message));
    }

    fn warning(&mut self, field_path: &str, message: &str) {
        self.warnings.push(ValidationIssue::new(field_path, message));
    }
}

/// One configuration problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field_path: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field_path: &str, message: &str) -> Self {
        Self {
            field_path: field_path.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::new();
        let result = config.validate_comprehensive();

        assert!(result.is_valid, "{:?}", result.errors);
        assert_eq!(config.editor.highlight_duration_ms, 2000);
        assert_eq!(config.editor.preview_ttl_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_collected() {
        let mut config = Config::new();
        config.server.port = 0;
        config.editor.preview_ttl_ms = 0;
        config.editor.html_extensions = vec![".html".to_string()];
        config.editor.legacy_delete_by_name = true;

        let result = config.validate_comprehensive();
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.warnings.len(), 1);
        assert!(matches!(config.validate(), Err(AtelierError::Config(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atelier.json");
        std::fs::write(&path, r#"{"server": {"port": 8080}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.hostname, "127.0.0.1");
        assert_eq!(config.editor.max_live_previews, 16);

        config.save_to_file(&path).unwrap();
        let reloaded = Config::from_file(&path).unwrap();
        assert_eq!(reloaded.server.port, 8080);
    }

    #[test]
    fn test_html_extension_matching() {
        let editor = EditorConfig::default();

        assert!(editor.is_html_file("index.html"));
        assert!(editor.is_html_file("PAGE.HTM"));
        assert!(!editor.is_html_file("style.css"));
        assert!(!editor.is_html_file("html"));
        // a bare extension is still an HTML file name
        assert!(editor.is_html_file(".html"));
    }
}
