use thiserror::Error;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt data: {0}")]
    CorruptData(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("pipeline run was cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("{stage} worker panicked while processing a chunk")]
    WorkerPanic { stage: &'static str },
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<SealError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SealError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptData(message.into())
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Returns true when the error (or the error it wraps) is a cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Returns true when the error reports malformed or tampered input.
    pub fn is_corrupt_data(&self) -> bool {
        match self {
            Self::CorruptData(_) => true,
            Self::Context { source, .. } => source.is_corrupt_data(),
            _ => false,
        }
    }
}
