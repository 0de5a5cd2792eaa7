#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::format::{Item, StrftimeItems};
use quick_xml::escape::escape;

use cdr_core::uri::{CdrUri, DocTarget, Projection, Scheme, UtilRequest};
use cdr_core::{DocId, MAX_VERSION_DATE, VersionSpec, dedup};
use cdr_storage::{CdrStore, ExternMapOutcome, SqlResultTable};

use crate::context::RunContext;
use crate::engine::{EngineCallbacks, MessageLevel, STATUS_NOT_OK, STATUS_UNSUPPORTED_SCHEME};

/// Marker document a `cdrx:` miss degrades to, so stylesheets can branch on
/// absence instead of aborting the run.
pub const NO_DOC_FOUND: &str = "<CdrDocCtl><NotFound>Y</NotFound></CdrDocCtl>";

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000";

/// Reverse lookup from an external identifier to a public URL. The live
/// deployment calls an external service; failures degrade to empty.
pub trait PrettyUrlProvider: Send + Sync {
    fn lookup(&self, external_id: &str) -> Option<String>;
}

/// Default provider: every lookup comes back empty.
pub struct NoPrettyUrls;

impl PrettyUrlProvider for NoPrettyUrls {
    fn lookup(&self, _external_id: &str) -> Option<String> {
        None
    }
}

/// Process-wide cache of denormalized term fragments. Readers clone the
/// current snapshot; writers build a replacement aside and swap it in.
pub struct TermCache {
    snapshot: RwLock<Arc<HashMap<i32, String>>>,
}

impl TermCache {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn get(&self, id: DocId) -> Option<String> {
        let current = match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(_) => return None,
        };
        current.get(&id.value()).cloned()
    }

    pub fn insert(&self, id: DocId, xml: String) {
        if let Ok(mut guard) = self.snapshot.write() {
            let mut replacement = HashMap::clone(&guard);
            replacement.insert(id.value(), xml);
            *guard = Arc::new(replacement);
        }
    }
}

impl Default for TermCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements the engine callback protocol over the repository store. One
/// resolver per transform call, borrowing the run context for the duration.
pub struct UriResolver<'a> {
    store: &'a mut CdrStore,
    ctx: &'a mut RunContext,
    pretty: &'a dyn PrettyUrlProvider,
    terms: &'a TermCache,
}

impl<'a> UriResolver<'a> {
    pub fn new(
        store: &'a mut CdrStore,
        ctx: &'a mut RunContext,
        pretty: &'a dyn PrettyUrlProvider,
        terms: &'a TermCache,
    ) -> Self {
        Self {
            store,
            ctx,
            pretty,
            terms,
        }
    }

    /// Full resolution, two-channel error discipline: `Ok(None)` hands the
    /// URI back to the engine as an unsupported scheme, `Err` carries the
    /// fatal detail for the run context.
    fn resolve(&mut self, uri: &str) -> Result<Option<String>, String> {
        let Some((scheme, rest)) = Scheme::split(uri) else {
            return Ok(None);
        };
        match scheme {
            Scheme::Cdr => self.resolve_doc(rest, false).map(Some),
            Scheme::Cdrx => match self.resolve_doc(rest, true) {
                Ok(doc) => Ok(Some(doc)),
                Err(_) => Ok(Some(NO_DOC_FOUND.to_string())),
            },
            Scheme::CdrUtil => self.resolve_util(rest).map(Some),
        }
    }

    fn resolve_doc(&mut self, rest: &str, soft: bool) -> Result<String, String> {
        let uri = CdrUri::parse(rest, soft).map_err(|err| err.to_string())?;

        let mut version = uri.version;
        let mut ceiling = self.ctx.max_doc_date.clone();
        let id = match uri.target {
            DocTarget::Id(id) => id,
            DocTarget::CurrentDoc => self
                .ctx
                .doc_id
                .ok_or("no current document in this filter run")?,
            DocTarget::Title(title) => {
                // Title references fetch filters; the filter-date ceiling
                // governs every title fetch, and additionally upgrades an
                // unversioned request to `last` at that ceiling.
                if self.ctx.max_filter_date != MAX_VERSION_DATE {
                    ceiling = self.ctx.max_filter_date.clone();
                    if version == VersionSpec::Current {
                        version = VersionSpec::Last;
                    }
                }
                self.store
                    .unique_id_for_title(&title)
                    .map_err(|err| err.to_string())?
            }
        };

        match uri.projection {
            None => self
                .store
                .doc_xml(id, version, &ceiling)
                .map_err(|err| err.to_string()),
            Some(Projection::DocTitle) => {
                let title = self.store.doc_title(id).map_err(|err| err.to_string())?;
                Ok(format!("<CdrDocTitle>{}</CdrDocTitle>", escape(&title)))
            }
            Some(Projection::CdrCtl) => self.doc_ctl_string(id),
        }
    }

    fn doc_ctl_string(&self, id: DocId) -> Result<String, String> {
        let doc = self.store.document(id).map_err(|err| err.to_string())?;
        let mut out = String::from("<CdrDocCtl>");
        out.push_str(&format!("<DocId>{id}</DocId>"));
        out.push_str(&format!("<DocTitle>{}</DocTitle>", escape(&doc.title)));
        out.push_str(&format!(
            "<DocActiveStatus>{}</DocActiveStatus>",
            escape(&doc.active_status)
        ));
        if let Some(first_pub) = &doc.first_pub {
            out.push_str(&format!("<DocFirstPub>{}</DocFirstPub>", escape(first_pub)));
        }
        out.push_str("</CdrDocCtl>");
        Ok(out)
    }

    fn resolve_util(&mut self, rest: &str) -> Result<String, String> {
        let request = UtilRequest::parse(rest).map_err(|err| err.to_string())?;
        match request {
            UtilRequest::DocId => {
                let id = self
                    .ctx
                    .doc_id
                    .ok_or("docid requested outside a document filter run")?;
                Ok(format!("<DocId>{id}</DocId>"))
            }
            UtilRequest::Date { format } => {
                let format = format.unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());
                let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
                if items.iter().any(|item| matches!(item, Item::Error)) {
                    return Err(format!("invalid date format: {format}"));
                }
                let now = chrono::Local::now();
                Ok(format!(
                    "<Date>{}</Date>",
                    now.format_with_items(items.into_iter())
                ))
            }
            UtilRequest::PrettyUrl { external_id } => {
                match self.pretty.lookup(&external_id) {
                    Some(url) => Ok(format!("<PrettyUrl>{}</PrettyUrl>", escape(&url))),
                    None => Ok(String::from("<PrettyUrl/>")),
                }
            }
            UtilRequest::GetPvNum { doc } => {
                let id = DocId::parse(&doc).map_err(|err| err.to_string())?;
                let num = self.store.get_pv_num(id).map_err(|err| err.to_string())?;
                Ok(format!("<PubVerNumber>{num}</PubVerNumber>"))
            }
            UtilRequest::DenormalizeTerm { term_ref } => self.denormalize_term(&term_ref),
            UtilRequest::ValidZip { zip } => {
                match self.store.valid_zip(&zip).map_err(|err| err.to_string())? {
                    Some(five) => Ok(format!("<ValidZip>{five}</ValidZip>")),
                    None => Ok(String::from("<ValidZip/>")),
                }
            }
            UtilRequest::ExternMap { usage, value } => {
                let outcome = self
                    .store
                    .map_external_value(&usage, &value)
                    .map_err(|err| err.to_string())?;
                Ok(match outcome {
                    ExternMapOutcome::Mapped(id) => format!("<DocId>{id}</DocId>"),
                    ExternMapOutcome::Drop => String::from("<DocId>DROP</DocId>"),
                    ExternMapOutcome::Unmapped => String::from("<DocId/>"),
                })
            }
            UtilRequest::VerificationDate { date, last_mod } => {
                self.verification_date(&date, last_mod.as_deref())
            }
            UtilRequest::SqlQuery { query, parms } => {
                let table = self
                    .store
                    .run_query(&query, &parms)
                    .map_err(|err| err.to_string())?;
                Ok(sql_result_xml(&table))
            }
            UtilRequest::DedupIds { primary, secondary } => {
                let survivors = dedup::dedup_ids(&primary, &secondary);
                let mut out =
                    String::from("<?xml version='1.0' encoding='UTF-8'?>\n<result>\n");
                for id in survivors {
                    out.push_str(&format!(" <id>{}</id>\n", escape(&id)));
                }
                out.push_str("</result>\n");
                Ok(out)
            }
        }
    }

    fn denormalize_term(&mut self, term_ref: &str) -> Result<String, String> {
        let id = DocId::parse(term_ref).map_err(|err| err.to_string())?;
        if let Some(cached) = self.terms.get(id) {
            return Ok(cached);
        }
        let title = self.store.doc_title(id).map_err(|err| err.to_string())?;
        let xml = format!(
            "<Term cdr:ref='{id}' xmlns:cdr='cips.nci.nih.gov/cdr'><PreferredName>{}</PreferredName></Term>",
            escape(&title)
        );
        self.terms.insert(id, xml.clone());
        Ok(xml)
    }

    /// Latest of the caller-supplied verification date and the stored import
    /// and mailer-response dates; falling back to the last-modified date,
    /// then first publication, then empty.
    fn verification_date(
        &self,
        date: &str,
        last_mod: Option<&str>,
    ) -> Result<String, String> {
        let id = self
            .ctx
            .doc_id
            .ok_or("verification-date requested outside a document filter run")?;
        let mut latest: Option<String> = if date.is_empty() {
            None
        } else {
            Some(date.to_string())
        };
        let import = self
            .store
            .latest_import_event(id)
            .map_err(|err| err.to_string())?;
        let mailer = self
            .store
            .latest_mailer_response(id)
            .map_err(|err| err.to_string())?;
        for candidate in [import, mailer].into_iter().flatten() {
            if latest.as_deref().is_none_or(|current| candidate.as_str() > current) {
                latest = Some(candidate);
            }
        }

        let chosen = latest
            .or_else(|| last_mod.map(str::to_string))
            .or_else(|| self.store.document(id).ok().and_then(|doc| doc.first_pub));
        Ok(match chosen {
            Some(value) => {
                let day = value.get(..10).unwrap_or(&value);
                format!("<VerificationDate>{}</VerificationDate>", escape(day))
            }
            None => String::from("<VerificationDate/>"),
        })
    }
}

impl EngineCallbacks for UriResolver<'_> {
    fn uri_open(&mut self, uri: &str) -> Result<i32, i32> {
        match self.resolve(uri) {
            Ok(Some(doc)) => Ok(self.ctx.open_slot(doc.into_bytes())),
            Ok(None) => Err(STATUS_UNSUPPORTED_SCHEME),
            Err(detail) => {
                self.ctx.set_fatal(detail);
                Err(STATUS_NOT_OK)
            }
        }
    }

    fn uri_read(&mut self, handle: i32, buf: &mut [u8]) -> Result<usize, i32> {
        self.ctx.read_slot(handle, buf).ok_or(STATUS_NOT_OK)
    }

    fn uri_close(&mut self, handle: i32) -> i32 {
        if self.ctx.close_slot(handle) {
            crate::engine::STATUS_OK
        } else {
            STATUS_NOT_OK
        }
    }

    fn uri_get_all(&mut self, uri: &str) -> Result<String, i32> {
        match self.resolve(uri) {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => Err(STATUS_UNSUPPORTED_SCHEME),
            Err(detail) => {
                self.ctx.set_fatal(detail);
                Err(STATUS_NOT_OK)
            }
        }
    }

    fn message(&mut self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Error => self.ctx.set_fatal(text),
            MessageLevel::Warning | MessageLevel::Info => self.ctx.add_message(text),
        }
    }
}

/// Serializes a query result the way stylesheets consume it: one `col`
/// element per cell, `null='Y'` marking SQL NULL.
fn sql_result_xml(table: &SqlResultTable) -> String {
    let mut out = String::from("<?xml version='1.0' encoding='UTF-8'?>\n<SqlResult>");
    for (row_index, row) in table.rows.iter().enumerate() {
        out.push_str(&format!("\n <row id='{}'>", row_index + 1));
        for (col_index, cell) in row.iter().enumerate() {
            let name = table
                .columns
                .get(col_index)
                .map(|name| escape(name.as_str()).into_owned())
                .unwrap_or_default();
            match cell {
                Some(value) => out.push_str(&format!(
                    "\n  <col id='{}' name='{}'>{}</col>",
                    col_index + 1,
                    name,
                    escape(value.as_str())
                )),
                None => out.push_str(&format!(
                    "\n  <col id='{}' name='{}' null='Y'/>",
                    col_index + 1,
                    name
                )),
            }
        }
        out.push_str("\n </row>");
    }
    out.push_str("\n</SqlResult>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_result_marks_nulls_and_escapes() {
        let table = SqlResultTable {
            columns: vec!["title".to_string(), "first_pub".to_string()],
            rows: vec![vec![Some("A & B".to_string()), None]],
        };
        let xml = sql_result_xml(&table);
        assert!(xml.contains("<col id='1' name='title'>A &amp; B</col>"));
        assert!(xml.contains("<col id='2' name='first_pub' null='Y'/>"));
        assert!(xml.starts_with("<?xml version='1.0' encoding='UTF-8'?>\n<SqlResult>"));
    }

    #[test]
    fn term_cache_swaps_snapshots() {
        let cache = TermCache::new();
        assert_eq!(cache.get(DocId::new(1)), None);
        cache.insert(DocId::new(1), "<Term/>".to_string());
        assert_eq!(cache.get(DocId::new(1)).as_deref(), Some("<Term/>"));
    }
}
