#![forbid(unsafe_code)]

pub mod dedup;
pub mod ids;
pub mod sets;
pub mod uri;
pub mod version;

pub use ids::{DocId, DocIdError};
pub use sets::FilterSetMember;
pub use version::{MAX_VERSION_DATE, VersionSpec, VersionSpecError};

/// Ordered name/value pairs passed verbatim to every filter in a chain.
/// Duplicate names are legal; last-applied semantics belong to the
/// transform engine, not this layer.
pub type FilterParms = Vec<(String, String)>;
