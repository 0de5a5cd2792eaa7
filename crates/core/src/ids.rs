#![forbid(unsafe_code)]

use std::fmt;

/// Numeric identifier of a repository document.
///
/// The canonical wire form is `CDR0000012345` (ten digits, zero padded); a
/// bare integer is accepted on input. An optional `#fragment` suffix is
/// ignored, matching how clients pass linking references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(i32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocIdError {
    Empty,
    NotANumber(String),
    OutOfRange(String),
}

impl fmt::Display for DocIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty document id"),
            Self::NotANumber(value) => write!(f, "invalid document id: {value}"),
            Self::OutOfRange(value) => write!(f, "document id out of range: {value}"),
        }
    }
}

impl std::error::Error for DocIdError {}

impl DocId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn parse(value: &str) -> Result<Self, DocIdError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DocIdError::Empty);
        }
        let without_fragment = match trimmed.find('#') {
            Some(pos) => &trimmed[..pos],
            None => trimmed,
        };
        let digits = without_fragment
            .strip_prefix("CDR")
            .or_else(|| without_fragment.strip_prefix("cdr"))
            .unwrap_or(without_fragment);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DocIdError::NotANumber(value.to_string()));
        }
        let id: i32 = digits
            .parse()
            .map_err(|_| DocIdError::OutOfRange(value.to_string()))?;
        Ok(Self(id))
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CDR{:010}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_bare_and_fragment_forms() {
        assert_eq!(DocId::parse("CDR0000012345"), Ok(DocId::new(12345)));
        assert_eq!(DocId::parse("12345"), Ok(DocId::new(12345)));
        assert_eq!(DocId::parse("CDR0000012345#f1"), Ok(DocId::new(12345)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(DocId::parse("").is_err());
        assert!(DocId::parse("CDR").is_err());
        assert!(DocId::parse("name:foo").is_err());
        assert!(DocId::parse("99999999999999").is_err());
    }

    #[test]
    fn canonical_display_is_zero_padded() {
        assert_eq!(DocId::new(42).to_string(), "CDR0000000042");
    }
}
