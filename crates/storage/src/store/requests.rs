#![forbid(unsafe_code)]

use cdr_core::DocId;

#[derive(Debug, Clone)]
pub struct AddDocumentRequest {
    pub id: DocId,
    pub title: String,
    pub doc_type: String,
    pub active_status: String,
    pub first_pub: Option<String>,
    pub xml: String,
}

#[derive(Debug, Clone)]
pub struct AddVersionRequest {
    pub id: DocId,
    pub num: i32,
    pub dt: String,
    pub publishable: bool,
    pub xml: String,
}
