#![forbid(unsafe_code)]

pub mod chain;
pub mod context;
pub mod engine;
pub mod error;
pub mod profile;
pub mod resolver;

pub use chain::{ChainRequest, FilterExecutor, FilterOutcome};
pub use context::RunContext;
pub use engine::{
    EngineCallbacks, EngineError, MessageLevel, NullEngine, STATUS_NOT_OK, STATUS_OK,
    STATUS_UNSUPPORTED_SCHEME, XsltEngine, XsltProcessor,
};
pub use error::FilterError;
pub use profile::FilterProfiler;
pub use resolver::{NO_DOC_FOUND, NoPrettyUrls, PrettyUrlProvider, TermCache, UriResolver};
