#![forbid(unsafe_code)]

use crate::ids::DocId;

/// One entry in a filter set's ordered membership: either a filter document
/// or a nested subset, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterSetMember {
    Filter(DocId),
    Subset(i32),
}
