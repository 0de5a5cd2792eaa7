#![forbid(unsafe_code)]

use cdr_core::{DocId, FilterParms, MAX_VERSION_DATE, VersionSpec};
use cdr_filter::{ChainRequest, FilterExecutor};

use crate::dispatch::{CommandError, CommandReply};
use crate::xml::{cdata, child, child_text, esc, node_text};

use super::CommandCtx;

/// Filter references are run strictly in document order; a set reference
/// expands in place.
enum FilterSpec {
    Inline(String),
    ById(DocId, VersionSpec),
    ByTitle(String),
    Set {
        name: String,
        version: Option<String>,
        max_date: Option<String>,
    },
}

pub(crate) fn filter(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let output_wanted = body
        .attribute("Output")
        .is_none_or(|value| !value.eq_ignore_ascii_case("N"));

    let doc_node = child(body, "Document")
        .ok_or_else(|| CommandError::Malformed("CdrFilter needs a Document".to_string()))?;
    let max_doc_date = doc_node.attribute("maxDate").map(str::to_string);
    // maxDate covers both ceilings unless the filter ceiling is overridden.
    let max_filter_date = doc_node
        .attribute("maxFilterDate")
        .map(str::to_string)
        .or_else(|| max_doc_date.clone());

    let specs = parse_filter_specs(body)?;
    let parms = parse_parms(body);
    let (document, doc_id) = resolve_document(ctx, doc_node, max_doc_date.as_deref())?;

    let shared = ctx.shared;
    let mut executor = FilterExecutor::new(
        shared.engine.as_ref(),
        ctx.store,
        shared.pretty.as_ref(),
        &shared.terms,
    );
    if let Some(profiler) = shared.profiler.as_ref() {
        executor = executor.with_profiler(profiler);
    }

    let mut stylesheets = Vec::new();
    for spec in &specs {
        match spec {
            FilterSpec::Inline(text) => stylesheets.push(text.clone()),
            FilterSpec::ById(id, version) => stylesheets.push(executor.stylesheet_by_id(
                *id,
                *version,
                max_filter_date.as_deref(),
            )?),
            FilterSpec::ByTitle(title) => {
                stylesheets.push(executor.stylesheet_by_title(title, max_filter_date.as_deref())?);
            }
            FilterSpec::Set {
                name,
                version,
                max_date,
            } => {
                let ceiling = max_date.as_deref().or(max_filter_date.as_deref());
                stylesheets.extend(executor.filter_set_stylesheets(
                    name,
                    version.as_deref(),
                    ceiling,
                )?);
            }
        }
    }

    let request = ChainRequest {
        document: &document,
        parms: &parms,
        doc_id,
        max_doc_date,
        max_filter_date,
    };
    let outcome = executor.filter_vector(&request, &stylesheets)?;
    let warning = !outcome.messages.is_empty();

    let mut response = String::from("<CdrFilterResp>");
    if output_wanted {
        response.push_str("<Document>");
        response.push_str(&cdata(&outcome.output));
        response.push_str("</Document>");
    }
    if !outcome.messages.is_empty() {
        response.push_str("<Messages>");
        for message in &outcome.messages {
            response.push_str(&format!("<message>{}</message>", esc(message)));
        }
        response.push_str("</Messages>");
    }
    response.push_str("</CdrFilterResp>");
    Ok(CommandReply {
        payload: response,
        warning,
    })
}

fn parse_filter_specs(
    body: roxmltree::Node<'_, '_>,
) -> Result<Vec<FilterSpec>, CommandError> {
    let mut specs = Vec::new();
    for node in body.children().filter(|node| node.is_element()) {
        match node.tag_name().name() {
            "Filter" => {
                if let Some(href) = node.attribute("href") {
                    let id = parse_doc_id(href)?;
                    let version = parse_version(node.attribute("version"))?;
                    specs.push(FilterSpec::ById(id, version));
                } else if let Some(name) = node.attribute("Name") {
                    specs.push(FilterSpec::ByTitle(name.to_string()));
                } else {
                    specs.push(FilterSpec::Inline(node_text(node)));
                }
            }
            "FilterSet" => {
                let name = node.attribute("Name").ok_or_else(|| {
                    CommandError::Malformed("FilterSet reference needs a Name".to_string())
                })?;
                specs.push(FilterSpec::Set {
                    name: name.to_string(),
                    version: node.attribute("Version").map(str::to_string),
                    max_date: node.attribute("maxDate").map(str::to_string),
                });
            }
            _ => {}
        }
    }
    Ok(specs)
}

fn parse_parms(body: roxmltree::Node<'_, '_>) -> FilterParms {
    let mut parms = Vec::new();
    if let Some(container) = child(body, "Parms") {
        for parm in container
            .children()
            .filter(|node| node.is_element() && node.has_tag_name("Parm"))
        {
            let name = child_text(parm, "Name").unwrap_or_default();
            let value = child_text(parm, "Value").unwrap_or_default();
            if !name.is_empty() {
                parms.push((name, value));
            }
        }
    }
    parms
}

/// A `href` document is fetched under the requested version and date
/// ceiling; otherwise the element's (usually CDATA) content is the document.
/// `ctl='y'` asks for the control wrapper around a fetched document.
fn resolve_document(
    ctx: &CommandCtx<'_>,
    node: roxmltree::Node<'_, '_>,
    max_doc_date: Option<&str>,
) -> Result<(String, Option<DocId>), CommandError> {
    match node.attribute("href") {
        Some(href) => {
            let id = parse_doc_id(href)?;
            let version = parse_version(node.attribute("version"))?;
            let ceiling = max_doc_date.unwrap_or(MAX_VERSION_DATE);
            let mut xml = ctx.store.doc_xml(id, version, ceiling)?;
            if node
                .attribute("ctl")
                .is_some_and(|value| value.eq_ignore_ascii_case("y"))
            {
                let title = ctx.store.doc_title(id)?;
                xml = format!(
                    "<CdrDoc><CdrDocCtl><DocId>{id}</DocId><DocTitle>{}</DocTitle></CdrDocCtl>{xml}</CdrDoc>",
                    esc(&title)
                );
            }
            Ok((xml, Some(id)))
        }
        None => {
            let text = node_text(node);
            if text.trim().is_empty() {
                return Err(CommandError::Malformed(
                    "Document element carries neither href nor content".to_string(),
                ));
            }
            Ok((text, None))
        }
    }
}

fn parse_doc_id(href: &str) -> Result<DocId, CommandError> {
    DocId::parse(href)
        .map_err(|err| CommandError::Malformed(format!("bad document id {href}: {err}")))
}

fn parse_version(attr: Option<&str>) -> Result<VersionSpec, CommandError> {
    VersionSpec::parse(attr.unwrap_or(""))
        .map_err(|err| CommandError::Malformed(format!("bad version: {err}")))
}
