//! Error handling for the Atelier system

use thiserror::Error;

use crate::tree::TreeError;

/// Result type alias for Atelier operations
pub type Result<T> = std::result::Result<T, AtelierError>;

/// Main error type for the Atelier system
#[derive(Error, Debug)]
pub enum AtelierError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plugin-related errors
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Event bus errors
    #[error("Event bus error: {0}")]
    EventBus(String),

    /// Persistent storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The storage backend refused a write because it would exceed its quota
    #[error("Storage quota exceeded: {needed} bytes needed, {quota} bytes available")]
    QuotaExceeded { needed: usize, quota: usize },

    /// File tree errors
    #[error("File tree error: {0}")]
    Tree(#[from] TreeError),

    /// Network/server errors
    #[error("Server error: {0}")]
    Server(String),

    /// Preview assembly errors
    #[error("Preview error: {0}")]
    Preview(String),

    /// Archive export errors
    #[error("Export error: {0}")]
    Export(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Caller supplied a value the operation cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic errors
    #[error("Error: {0}")]
    Generic(String),
}

impl AtelierError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new plugin error
    pub fn plugin<S: Into<String>>(msg: S) -> Self {
        Self::Plugin(msg.into())
    }

    /// Create a new event bus error
    pub fn event_bus<S: Into<String>>(msg: S) -> Self {
        Self::EventBus(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new server error
    pub fn server<S: Into<String>>(msg: S) -> Self {
        Self::Server(msg.into())
    }

    /// Create a new preview error
    pub fn preview<S: Into<String>>(msg: S) -> Self {
        Self::Preview(msg.into())
    }

    /// Create a new export error
    pub fn export<S: Into<String>>(msg: S) -> Self {
        Self::Export(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a generic error
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Self::Generic(msg.into())
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        match self {
            AtelierError::Config(_) => false,
            AtelierError::Plugin(_) => true,
            AtelierError::EventBus(_) => true,
            AtelierError::Storage(_) => true,
            AtelierError::QuotaExceeded { .. } => true,
            AtelierError::Tree(_) => true,
            AtelierError::Server(_) => true,
            AtelierError::Preview(_) => true,
            AtelierError::Export(_) => true,
            AtelierError::Io(_) => true,
            AtelierError::Json(_) => false,
            AtelierError::InvalidInput(_) => true,
            AtelierError::Generic(_) => true,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AtelierError::Config(_) => ErrorSeverity::High,
            AtelierError::Plugin(_) => ErrorSeverity::Medium,
            AtelierError::EventBus(_) => ErrorSeverity::Medium,
            AtelierError::Storage(_) => ErrorSeverity::Medium,
            AtelierError::QuotaExceeded { .. } => ErrorSeverity::Medium,
            AtelierError::Tree(_) => ErrorSeverity::Low,
            AtelierError::Server(_) => ErrorSeverity::High,
            AtelierError::Preview(_) => ErrorSeverity::Low,
            AtelierError::Export(_) => ErrorSeverity::Medium,
            AtelierError::Io(_) => ErrorSeverity::Medium,
            AtelierError::Json(_) => ErrorSeverity::Low,
            AtelierError::InvalidInput(_) => ErrorSeverity::Low,
            AtelierError::Generic(_) => ErrorSeverity::Low,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSeverity::Low => write!(f, "LOW"),
            ErrorSeverity::Medium => write!(f, "MEDIUM"),
            ErrorSeverity::High => write!(f, "HIGH"),
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}
