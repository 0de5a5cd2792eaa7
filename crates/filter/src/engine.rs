#![forbid(unsafe_code)]

use cdr_core::FilterParms;

/// Status codes spoken across the engine callback boundary. The boundary is
/// foreign-call territory: no panics, no Results, integers only.
pub const STATUS_OK: i32 = 0;
pub const STATUS_NOT_OK: i32 = 1;
pub const STATUS_UNSUPPORTED_SCHEME: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Callbacks the engine invokes while evaluating `document()` references.
///
/// `Err` values carry a status code back to the engine; any human-readable
/// detail must be stashed on the run context instead, because nothing richer
/// survives the crossing.
pub trait EngineCallbacks {
    /// Opens a URI for chunked reading; returns a handle.
    fn uri_open(&mut self, uri: &str) -> Result<i32, i32>;
    /// Reads the next chunk into `buf`; 0 means end of document.
    fn uri_read(&mut self, handle: i32, buf: &mut [u8]) -> Result<usize, i32>;
    fn uri_close(&mut self, handle: i32) -> i32;
    /// Opens, fully reads, and closes in one step.
    fn uri_get_all(&mut self, uri: &str) -> Result<String, i32>;
    /// Diagnostic messages from the running stylesheet.
    fn message(&mut self, level: MessageLevel, text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// One single-use transform run. Processors must never be shared across
/// threads or reused for a second call; construct one per invocation and let
/// it drop inside the same call frame.
pub trait XsltProcessor {
    fn transform(
        &mut self,
        stylesheet: &str,
        input: &str,
        parms: &FilterParms,
        callbacks: &mut dyn EngineCallbacks,
    ) -> Result<String, EngineError>;
}

/// Factory for single-use processors. This is the seam where an external
/// XSLT 1.0 implementation plugs in.
pub trait XsltEngine: Send + Sync {
    fn new_processor(&self) -> Box<dyn XsltProcessor>;
}

/// Placeholder engine for deployments without a transform library wired in:
/// every run fails with a clear diagnostic instead of silently passing
/// documents through.
pub struct NullEngine;

struct NullProcessor;

impl XsltProcessor for NullProcessor {
    fn transform(
        &mut self,
        _stylesheet: &str,
        _input: &str,
        _parms: &FilterParms,
        _callbacks: &mut dyn EngineCallbacks,
    ) -> Result<String, EngineError> {
        Err(EngineError {
            code: STATUS_NOT_OK,
            message: String::from("no transform engine configured"),
        })
    }
}

impl XsltEngine for NullEngine {
    fn new_processor(&self) -> Box<dyn XsltProcessor> {
        Box::new(NullProcessor)
    }
}
