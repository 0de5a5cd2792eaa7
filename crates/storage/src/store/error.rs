#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    UnknownDocument(i32),
    UnknownTitle(String),
    AmbiguousTitle(String),
    UnknownFilterSet(String),
    FilterSetExists(String),
    FilterSetInUse(String),
    FilterSetDepthExceeded {
        set_id: i32,
    },
    CorruptSetMember {
        set_id: i32,
        position: i32,
    },
    VersionNotFound {
        doc_id: i32,
        requested: String,
    },
    UnknownMapUsage(String),
    UnsafeQuery,
    PlaceholderMismatch {
        expected: usize,
        supplied: usize,
    },
    UnknownUser(String),
    BadPassword,
    UnknownSession(String),
    SessionEnded(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownDocument(id) => write!(f, "unknown document: CDR{id:010}"),
            Self::UnknownTitle(title) => write!(f, "no document found with title: {title}"),
            Self::AmbiguousTitle(title) => {
                write!(f, "title does not identify a unique document: {title}")
            }
            Self::UnknownFilterSet(name) => write!(f, "unknown filter set: {name}"),
            Self::FilterSetExists(name) => write!(f, "filter set already exists: {name}"),
            Self::FilterSetInUse(name) => {
                write!(f, "filter set is nested in another set: {name}")
            }
            Self::FilterSetDepthExceeded { set_id } => write!(
                f,
                "filter set nesting exceeds maximum depth (probable cycle, set id={set_id})"
            ),
            Self::CorruptSetMember { set_id, position } => write!(
                f,
                "filter set member has neither filter nor subset (set id={set_id}, position={position})"
            ),
            Self::VersionNotFound { doc_id, requested } => write!(
                f,
                "no matching version for document CDR{doc_id:010} (requested={requested})"
            ),
            Self::UnknownMapUsage(usage) => write!(f, "unknown external map usage: {usage}"),
            Self::UnsafeQuery => write!(f, "query not permitted through read-only facility"),
            Self::PlaceholderMismatch { expected, supplied } => write!(
                f,
                "placeholder count mismatch (query has {expected}, {supplied} values supplied)"
            ),
            Self::UnknownUser(name) => write!(f, "unknown user: {name}"),
            Self::BadPassword => write!(f, "invalid credentials"),
            Self::UnknownSession(name) => write!(f, "unknown session: {name}"),
            Self::SessionEnded(name) => write!(f, "session has ended: {name}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
