#![forbid(unsafe_code)]

use std::time::Instant;

use cdr_core::{DocId, FilterParms, MAX_VERSION_DATE, VersionSpec};
use cdr_storage::CdrStore;

use crate::context::RunContext;
use crate::engine::XsltEngine;
use crate::error::FilterError;
use crate::profile::FilterProfiler;
use crate::resolver::{PrettyUrlProvider, TermCache, UriResolver};

/// Inputs shared by every entry variant: the document to filter plus the
/// state seeding the chain's run context.
pub struct ChainRequest<'p> {
    pub document: &'p str,
    pub parms: &'p FilterParms,
    pub doc_id: Option<DocId>,
    pub max_doc_date: Option<String>,
    pub max_filter_date: Option<String>,
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub output: String,
    pub messages: Vec<String>,
}

/// Runs ordered filter chains against the store through a pluggable engine.
/// Borrows its collaborators for the duration of one command.
pub struct FilterExecutor<'a> {
    engine: &'a dyn XsltEngine,
    store: &'a mut CdrStore,
    pretty: &'a dyn PrettyUrlProvider,
    terms: &'a TermCache,
    profiler: Option<&'a FilterProfiler>,
}

impl<'a> FilterExecutor<'a> {
    pub fn new(
        engine: &'a dyn XsltEngine,
        store: &'a mut CdrStore,
        pretty: &'a dyn PrettyUrlProvider,
        terms: &'a TermCache,
    ) -> Self {
        Self {
            engine,
            store,
            pretty,
            terms,
            profiler: None,
        }
    }

    pub fn with_profiler(mut self, profiler: &'a FilterProfiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// The core primitive: one run context for the whole chain, each stage's
    /// output piped into the next, abort on first failure with no partial
    /// output.
    pub fn filter_vector(
        &mut self,
        request: &ChainRequest<'_>,
        stylesheets: &[String],
    ) -> Result<FilterOutcome, FilterError> {
        let mut ctx = RunContext::new(
            request.doc_id,
            request.max_doc_date.clone(),
            request.max_filter_date.clone(),
        );
        let mut current = request.document.to_string();
        for stylesheet in stylesheets {
            current = self.run_one(stylesheet, &current, request.parms, &mut ctx)?;
        }
        Ok(FilterOutcome {
            output: current,
            messages: ctx.into_messages(),
        })
    }

    pub fn filter_by_id(
        &mut self,
        request: &ChainRequest<'_>,
        filter_id: DocId,
        version: VersionSpec,
    ) -> Result<FilterOutcome, FilterError> {
        let stylesheet =
            self.stylesheet_by_id(filter_id, version, request.max_filter_date.as_deref())?;
        self.filter_vector(request, &[stylesheet])
    }

    /// Title lookup must land on exactly one document. A filter-date ceiling
    /// upgrades the unversioned request to `last` at that ceiling.
    pub fn filter_by_title(
        &mut self,
        request: &ChainRequest<'_>,
        title: &str,
    ) -> Result<FilterOutcome, FilterError> {
        let stylesheet = self.stylesheet_by_title(title, request.max_filter_date.as_deref())?;
        self.filter_vector(request, &[stylesheet])
    }

    pub fn filter_by_set(
        &mut self,
        request: &ChainRequest<'_>,
        name: &str,
        version: Option<&str>,
        set_max_date: Option<&str>,
    ) -> Result<FilterOutcome, FilterError> {
        let stylesheets = self.filter_set_stylesheets(name, version, set_max_date)?;
        self.filter_vector(request, &stylesheets)
    }

    /// Expands a named set and fetches each member's XML under the set-level
    /// version policy: no version and no ceiling means current working copy;
    /// a ceiling with no explicit version upgrades the request to `last`.
    pub fn filter_set_stylesheets(
        &self,
        name: &str,
        version: Option<&str>,
        max_filter_date: Option<&str>,
    ) -> Result<Vec<String>, FilterError> {
        let spec = match version {
            None | Some("") => {
                if max_filter_date.is_some() {
                    VersionSpec::Last
                } else {
                    VersionSpec::Current
                }
            }
            Some("last") => VersionSpec::Last,
            Some("lastp") => VersionSpec::Lastp,
            Some(other) => {
                return Err(FilterError::Resolution(format!(
                    "unknown filter set version: {other}"
                )));
            }
        };
        let ceiling = max_filter_date.unwrap_or(MAX_VERSION_DATE);

        let ids = self.store.filters_in_set(name)?;
        let mut stylesheets = Vec::with_capacity(ids.len());
        for id in ids {
            stylesheets.push(self.store.doc_xml(id, spec, ceiling)?);
        }
        Ok(stylesheets)
    }

    pub fn stylesheet_by_id(
        &self,
        filter_id: DocId,
        version: VersionSpec,
        max_filter_date: Option<&str>,
    ) -> Result<String, FilterError> {
        let ceiling = max_filter_date.unwrap_or(MAX_VERSION_DATE);
        Ok(self.store.doc_xml(filter_id, version, ceiling)?)
    }

    /// Same upgrade rule as `filter_by_title`, exposed for callers that
    /// assemble a mixed stylesheet list before running the chain.
    pub fn stylesheet_by_title(
        &self,
        title: &str,
        max_filter_date: Option<&str>,
    ) -> Result<String, FilterError> {
        let filter_id = self.store.unique_id_for_title(title)?;
        let version = if max_filter_date.is_some() {
            VersionSpec::Last
        } else {
            VersionSpec::Current
        };
        self.stylesheet_by_id(filter_id, version, max_filter_date)
    }

    /// One engine processor per stage, torn down inside this frame. The
    /// fatal flag is inspected before the engine's own result so resolver
    /// diagnostics are not masked by a generic engine error.
    fn run_one(
        &mut self,
        stylesheet: &str,
        input: &str,
        parms: &FilterParms,
        ctx: &mut RunContext,
    ) -> Result<String, FilterError> {
        let started = Instant::now();
        let result = {
            let mut processor = self.engine.new_processor();
            let mut resolver = UriResolver::new(self.store, ctx, self.pretty, self.terms);
            processor.transform(stylesheet, input, parms, &mut resolver)
        };

        if let Some(fatal) = ctx.take_fatal() {
            return Err(FilterError::Resolution(fatal));
        }
        let output = result.map_err(FilterError::from)?;

        if let Some(profiler) = self.profiler {
            profiler.record(self.store, stylesheet, started.elapsed());
        }
        Ok(output)
    }
}
