use thiserror::Error;

/// An error raised by managed code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// The callback raised an exception of the given kind.
    #[error("{kind}: {message}")]
    Raised { kind: String, message: String },

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The callback panicked. Only produced at the native boundary.
    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl ScriptError {
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised { kind: kind.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("runtime has been finalized")]
    Finalized,
}
