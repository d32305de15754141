//! Error types for RemoteView

use thiserror::Error;

/// Result type alias using RemoteViewError
pub type Result<T> = std::result::Result<T, RemoteViewError>;

/// Main error type for RemoteView operations
#[derive(Debug, Clone, Error)]
pub enum RemoteViewError {
    /// Null, empty or placeholder input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No matching device, profile, module or subscription
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation invoked in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure code reported by an underlying asynchronous call
    #[error("Platform error {code:#010x}: {message}")]
    Platform { code: u32, message: String },

    /// A blocking wait exceeded its budget
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RemoteViewError>,
    },
}

/// Status code for an operation that was abandoned before completing
pub const CODE_ABANDONED: u32 = 0x8000_FFFF;

/// Status code for a generic platform failure
pub const CODE_FAIL: u32 = 0x8000_4005;

impl RemoteViewError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a platform error with an explicit status code
    pub fn platform(code: u32, msg: impl Into<String>) -> Self {
        Self::Platform {
            code,
            message: msg.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &RemoteViewError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable status code for this error, in the platform's HRESULT space
    pub fn code(&self) -> u32 {
        match self.root() {
            Self::InvalidArgument(_) => 0x8007_0057,
            Self::NotFound(_) => 0x8007_048F,
            Self::InvalidState(_) => 0x8000_000E,
            Self::Platform { code, .. } => *code,
            Self::Timeout(_) => 0x8007_05B4,
            Self::Config(_) => 0x8007_000D,
            Self::Io(_) => 0x8007_001F,
            Self::WithContext { .. } => CODE_FAIL,
        }
    }

    /// Whether this error means the capture session can no longer be used
    pub fn is_session_fatal(&self) -> bool {
        matches!(self.root(), Self::Platform { .. })
    }

    /// Whether the user can likely fix this without code changes
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::NotFound(_) | Self::InvalidState(_) | Self::Timeout(_) | Self::Config(_)
        )
    }

    /// A short hint for the user, if there is an obvious next step
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::NotFound(_) => {
                Some("Check that a capture device is connected; run `remoteview devices`")
            }
            Self::InvalidState(_) => {
                Some("Initialize the session before starting it, and stop it before closing")
            }
            Self::Timeout(_) => Some("Raise the wait budget in the [effects] section of config.toml"),
            Self::Config(_) => Some("Check ~/.config/remoteview/config.toml for errors"),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl From<std::io::Error> for RemoteViewError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<toml::de::Error> for RemoteViewError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config file: {}", err))
    }
}

impl From<toml::ser::Error> for RemoteViewError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Config(format!("Failed to serialize config: {}", err))
    }
}
