#![forbid(unsafe_code)]

use cdr_storage::StoreError;

use crate::engine::EngineError;

#[derive(Debug)]
pub enum FilterError {
    Store(StoreError),
    /// The transform engine itself reported failure.
    Engine { code: i32, message: String },
    /// A filter, set, title, or version could not be resolved, or a resolver
    /// callback surfaced a fatal condition through the run context.
    Resolution(String),
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "store: {err}"),
            Self::Engine { code, message } => write!(f, "transform engine ({code}): {message}"),
            Self::Resolution(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for FilterError {}

impl From<StoreError> for FilterError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<EngineError> for FilterError {
    fn from(value: EngineError) -> Self {
        Self::Engine {
            code: value.code,
            message: value.message,
        }
    }
}
