#![forbid(unsafe_code)]

use std::fmt;

use crate::ids::DocId;
use crate::version::VersionSpec;

/// URI schemes a stylesheet can reference through `document()` calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Cdr,
    Cdrx,
    CdrUtil,
}

impl Scheme {
    /// Splits `cdr:/...` into the scheme and the remainder after the colon.
    /// Returns `None` for any scheme this resolver does not own, so the
    /// engine can fall back to its built-in handling.
    pub fn split(uri: &str) -> Option<(Scheme, &str)> {
        let colon = uri.find(':')?;
        let (scheme, rest) = uri.split_at(colon);
        let rest = &rest[1..];
        if scheme.eq_ignore_ascii_case("cdr") {
            Some((Scheme::Cdr, rest))
        } else if scheme.eq_ignore_ascii_case("cdrx") {
            Some((Scheme::Cdrx, rest))
        } else if scheme.eq_ignore_ascii_case("cdrutil") {
            Some((Scheme::CdrUtil, rest))
        } else {
            None
        }
    }
}

/// What a `cdr:`/`cdrx:` URI names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocTarget {
    Id(DocId),
    /// `name:<title>` lookup; `@@SLASH@@` in the title decodes to `/`.
    Title(String),
    /// `*`, the document currently being filtered.
    CurrentDoc,
}

/// Optional trailing path segment selecting part of a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    CdrCtl,
    DocTitle,
}

impl Projection {
    // Unrecognized segments fall through to the full body.
    fn parse(segment: &str) -> Option<Self> {
        match segment {
            "CdrCtl" => Some(Self::CdrCtl),
            "DocTitle" => Some(Self::DocTitle),
            _ => None,
        }
    }
}

/// Parsed form of a `cdr:` or `cdrx:` document reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CdrUri {
    pub target: DocTarget,
    pub version: VersionSpec,
    pub projection: Option<Projection>,
    /// True for `cdrx:`, whose misses degrade to a `<NotFound>` marker
    /// instead of aborting the run.
    pub soft: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UriError {
    EmptyPath,
    BadTarget(String),
    BadVersion(String),
    UnknownFunction(String),
    MissingParameter(&'static str),
}

impl fmt::Display for UriError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "empty URI path"),
            Self::BadTarget(t) => write!(f, "unparsable document reference: {t}"),
            Self::BadVersion(v) => write!(f, "invalid version in URI: {v}"),
            Self::UnknownFunction(name) => write!(f, "unknown cdrutil function: {name}"),
            Self::MissingParameter(what) => write!(f, "missing parameter: {what}"),
        }
    }
}

impl std::error::Error for UriError {}

impl CdrUri {
    /// Parses the path portion of a `cdr:`/`cdrx:` URI, already stripped of
    /// its scheme. Grammar:
    ///
    /// ```text
    /// /<id>[/<version>][/<projection>]
    /// /name:<title>[/<version>][/<projection>]
    /// /*[/<version>][/<projection>]
    /// ```
    ///
    /// A middle segment that cannot be a version specifier is taken as the
    /// projection instead, so `cdr:/1234/CdrCtl` works without an empty
    /// version slot.
    pub fn parse(path: &str, soft: bool) -> Result<Self, UriError> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(UriError::EmptyPath);
        }
        let mut segments = path.splitn(3, '/');
        let head = segments.next().unwrap_or("");
        let second = segments.next();
        let third = segments.next();

        let target = if head == "*" {
            DocTarget::CurrentDoc
        } else if let Some(title) = head.strip_prefix("name:") {
            if title.is_empty() {
                return Err(UriError::BadTarget(head.to_string()));
            }
            DocTarget::Title(title.replace("@@SLASH@@", "/"))
        } else {
            DocTarget::Id(
                DocId::parse(head).map_err(|_| UriError::BadTarget(head.to_string()))?,
            )
        };

        let (version, projection) = match (second, third) {
            (None, _) => (VersionSpec::Current, None),
            (Some(seg), None) => {
                if VersionSpec::looks_like_version(seg) {
                    let version = VersionSpec::parse(seg)
                        .map_err(|_| UriError::BadVersion(seg.to_string()))?;
                    (version, None)
                } else {
                    (VersionSpec::Current, Projection::parse(seg))
                }
            }
            (Some(ver), Some(proj)) => {
                let version = VersionSpec::parse(ver)
                    .map_err(|_| UriError::BadVersion(ver.to_string()))?;
                (version, Projection::parse(proj))
            }
        };

        Ok(Self {
            target,
            version,
            projection,
            soft,
        })
    }
}

/// One `cdrutil:` invocation, parsed into its typed shape at the boundary.
/// Parameter strings are tilde-delimited on the wire; the split happens here
/// so nothing downstream handles delimited text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UtilRequest {
    DocId,
    Date { format: Option<String> },
    PrettyUrl { external_id: String },
    GetPvNum { doc: String },
    DenormalizeTerm { term_ref: String },
    ValidZip { zip: String },
    ExternMap { usage: String, value: String },
    VerificationDate { date: String, last_mod: Option<String> },
    SqlQuery { query: String, parms: Vec<String> },
    DedupIds { primary: Vec<String>, secondary: Vec<String> },
}

impl UtilRequest {
    /// Parses the path portion of a `cdrutil:` URI, already stripped of its
    /// scheme. The first segment names the function; everything after the
    /// next `/` is that function's parameter string.
    pub fn parse(path: &str) -> Result<Self, UriError> {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Err(UriError::EmptyPath);
        }
        let (function, parms) = match path.find('/') {
            Some(pos) => (&path[..pos], Some(&path[pos + 1..])),
            None => (path, None),
        };
        match function {
            "docid" => Ok(Self::DocId),
            "date" => Ok(Self::Date {
                format: parms.filter(|p| !p.is_empty()).map(percent_decode),
            }),
            "pretty-url" => Ok(Self::PrettyUrl {
                external_id: required(parms, "pretty-url external id")?.to_string(),
            }),
            "get-pv-num" => Ok(Self::GetPvNum {
                doc: required(parms, "get-pv-num document id")?.to_string(),
            }),
            "denormalizeTerm" => Ok(Self::DenormalizeTerm {
                term_ref: required(parms, "denormalizeTerm reference")?.to_string(),
            }),
            "valid-zip" => Ok(Self::ValidZip {
                zip: required(parms, "valid-zip value")?.to_string(),
            }),
            "extern-map" => {
                let parm = required(parms, "extern-map usage/value")?;
                let slash = parm
                    .find('/')
                    .ok_or(UriError::MissingParameter("extern-map value"))?;
                Ok(Self::ExternMap {
                    usage: parm[..slash].to_string(),
                    value: parm[slash + 1..].to_string(),
                })
            }
            // The date parameter may be absent entirely; the resolver then
            // falls through to the stored import/mailer/first-pub dates.
            "verification-date" => {
                let parm = parms.unwrap_or("");
                let (date, last_mod) = match parm.find('/') {
                    Some(pos) => (&parm[..pos], Some(parm[pos + 1..].to_string())),
                    None => (parm, None),
                };
                Ok(Self::VerificationDate {
                    date: date.to_string(),
                    last_mod: last_mod.filter(|d| !d.is_empty()),
                })
            }
            "sql-query" => {
                let parm = required(parms, "sql-query text")?;
                let mut pieces = parm.split('~');
                let query = pieces.next().unwrap_or("").to_string();
                if query.is_empty() {
                    return Err(UriError::MissingParameter("sql-query text"));
                }
                Ok(Self::SqlQuery {
                    query,
                    parms: pieces.map(str::to_string).collect(),
                })
            }
            "dedup-ids" => {
                let parm = required(parms, "dedup-ids lists")?;
                let (primary, secondary) = match parm.find("~~") {
                    Some(pos) => (&parm[..pos], &parm[pos + 2..]),
                    None => (parm, ""),
                };
                Ok(Self::DedupIds {
                    primary: split_ids(primary),
                    secondary: split_ids(secondary),
                })
            }
            other => Err(UriError::UnknownFunction(other.to_string())),
        }
    }
}

fn required<'a>(parms: Option<&'a str>, what: &'static str) -> Result<&'a str, UriError> {
    match parms {
        Some(p) if !p.is_empty() => Ok(p),
        _ => Err(UriError::MissingParameter(what)),
    }
}

fn split_ids(list: &str) -> Vec<String> {
    list.split('~')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Form-style percent decoding: `+` becomes a space, `%XX` decodes from hex.
/// Malformed escapes pass through untouched.
pub fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte {
        Some(b @ b'0'..=b'9') => Some(b - b'0'),
        Some(b @ b'a'..=b'f') => Some(b - b'a' + 10),
        Some(b @ b'A'..=b'F') => Some(b - b'A' + 10),
        _ => None,
    }
}
