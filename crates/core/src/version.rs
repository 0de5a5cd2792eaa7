#![forbid(unsafe_code)]

use std::fmt;

/// Sentinel "no ceiling" date: any version filed before this date qualifies.
pub const MAX_VERSION_DATE: &str = "9000-01-01";

/// Which stored rendition of a document a caller wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionSpec {
    /// Current working copy from the document table.
    Current,
    /// Highest version number filed at or before the date ceiling.
    Last,
    /// Highest publishable version filed at or before the date ceiling.
    Lastp,
    /// An absolute version number.
    Number(i32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionSpecError(pub String);

impl fmt::Display for VersionSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid version specifier: {}", self.0)
    }
}

impl std::error::Error for VersionSpecError {}

impl VersionSpec {
    pub fn parse(value: &str) -> Result<Self, VersionSpecError> {
        match value {
            "" => Ok(Self::Current),
            "last" => Ok(Self::Last),
            "lastp" => Ok(Self::Lastp),
            other => {
                if other.bytes().all(|b| b.is_ascii_digit()) {
                    other
                        .parse()
                        .map(Self::Number)
                        .map_err(|_| VersionSpecError(value.to_string()))
                } else {
                    Err(VersionSpecError(value.to_string()))
                }
            }
        }
    }

    /// Whether a path segment can be a version specifier at all. Used by the
    /// URI grammar, where a non-version middle segment is a projection.
    pub fn looks_like_version(segment: &str) -> bool {
        segment == "last"
            || segment == "lastp"
            || segment
                .bytes()
                .next()
                .is_some_and(|b| b.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_symbolic_and_numeric() {
        assert_eq!(VersionSpec::parse(""), Ok(VersionSpec::Current));
        assert_eq!(VersionSpec::parse("last"), Ok(VersionSpec::Last));
        assert_eq!(VersionSpec::parse("lastp"), Ok(VersionSpec::Lastp));
        assert_eq!(VersionSpec::parse("7"), Ok(VersionSpec::Number(7)));
        assert!(VersionSpec::parse("latest").is_err());
    }

    #[test]
    fn segment_classification_matches_grammar() {
        assert!(VersionSpec::looks_like_version("last"));
        assert!(VersionSpec::looks_like_version("3"));
        assert!(!VersionSpec::looks_like_version("CdrCtl"));
        assert!(!VersionSpec::looks_like_version("DocTitle"));
    }
}
