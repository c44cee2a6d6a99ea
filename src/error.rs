use std::fmt;

use crate::message::MessageId;

/// Main error type for the gossamer scheduling core
#[derive(Debug)]
pub enum GossamerError {
    /// Configuration or CLI argument errors
    Config(String),

    /// Scheduling precondition violations
    Scheduling(SchedulingError),

    /// System I/O errors
    Io(std::io::Error),

    /// Serialization/deserialization errors
    Serialization(serde_json::Error),
}

/// Caller bugs detected by the transmission queue or peer scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// A message identifier was enqueued while a live entry already exists
    DuplicateMessage(MessageId),

    /// Any other violated scheduling precondition
    Precondition(String),
}

impl fmt::Display for GossamerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GossamerError::Config(msg) => write!(f, "Configuration error: {}", msg),
            GossamerError::Scheduling(err) => write!(f, "Scheduling error: {}", err),
            GossamerError::Io(err) => write!(f, "I/O error: {}", err),
            GossamerError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingError::DuplicateMessage(id) => {
                write!(f, "message {} is already queued", id)
            }
            SchedulingError::Precondition(msg) => write!(f, "Precondition: {}", msg),
        }
    }
}

impl std::error::Error for GossamerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GossamerError::Io(err) => Some(err),
            GossamerError::Serialization(err) => Some(err),
            GossamerError::Scheduling(err) => Some(err),
            GossamerError::Config(_) => None,
        }
    }
}

impl std::error::Error for SchedulingError {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, GossamerError>;

impl GossamerError {
    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            GossamerError::Config(_) => "configuration_error",
            GossamerError::Scheduling(_) => "scheduling_error",
            GossamerError::Io(_) => "io_error",
            GossamerError::Serialization(_) => "serialization_error",
        }
    }

    /// True when the error reports a duplicate enqueue
    pub fn is_duplicate_message(&self) -> bool {
        matches!(
            self,
            GossamerError::Scheduling(SchedulingError::DuplicateMessage(_))
        )
    }
}

impl From<std::io::Error> for GossamerError {
    fn from(err: std::io::Error) -> Self {
        GossamerError::Io(err)
    }
}

impl From<serde_json::Error> for GossamerError {
    fn from(err: serde_json::Error) -> Self {
        GossamerError::Serialization(err)
    }
}

impl From<SchedulingError> for GossamerError {
    fn from(err: SchedulingError) -> Self {
        GossamerError::Scheduling(err)
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::GossamerError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GossamerError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! scheduling_error {
    ($msg:expr) => {
        $crate::error::GossamerError::Scheduling(
            $crate::error::SchedulingError::Precondition($msg.to_string()),
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::GossamerError::Scheduling(
            $crate::error::SchedulingError::Precondition(format!($fmt, $($arg)*)),
        )
    };
}
