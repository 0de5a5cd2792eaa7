#![forbid(unsafe_code)]

use cdr_core::{DocId, FilterSetMember};
use cdr_storage::FilterSetContent;

use crate::dispatch::{CommandError, CommandReply};
use crate::xml::{child, esc, node_text};

use super::CommandCtx;

pub(crate) fn add(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    ctx.require("ADD FILTER SET")?;
    let content = parse_set_content(ctx, body)?;
    let total = ctx.store.add_filter_set(content)?;
    Ok(CommandReply::ok(format!(
        "<CdrAddFilterSetResp TotalFilters='{total}'/>"
    )))
}

pub(crate) fn replace(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    ctx.require("MODIFY FILTER SET")?;
    let content = parse_set_content(ctx, body)?;
    let total = ctx.store.rep_filter_set(content)?;
    Ok(CommandReply::ok(format!(
        "<CdrRepFilterSetResp TotalFilters='{total}'/>"
    )))
}

pub(crate) fn get(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let name = set_name(body)?;
    let (info, members) = ctx.store.get_filter_set(&name)?;

    let mut response = format!(
        "<CdrGetFilterSetResp><Name>{}</Name><Description>{}</Description>",
        esc(&info.name),
        esc(&info.description)
    );
    if let Some(notes) = &info.notes {
        response.push_str(&format!("<Notes>{}</Notes>", esc(notes)));
    }
    for member in &members {
        match member {
            FilterSetMember::Filter(id) => {
                let title = ctx.store.doc_title(*id)?;
                response.push_str(&format!("<Filter DocId='{id}'>{}</Filter>", esc(&title)));
            }
            FilterSetMember::Subset(set_id) => {
                let subset_name = ctx.store.filter_set_name(*set_id)?;
                response.push_str(&format!("<Subset Name='{}'/>", esc(&subset_name)));
            }
        }
    }
    response.push_str("</CdrGetFilterSetResp>");
    Ok(CommandReply::ok(response))
}

pub(crate) fn del(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    ctx.require("DELETE FILTER SET")?;
    let name = set_name(body)?;
    ctx.store.del_filter_set(&name)?;
    Ok(CommandReply::ok("<CdrDelFilterSetResp/>"))
}

pub(crate) fn list(
    ctx: &mut CommandCtx<'_>,
    _body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let mut response = String::from("<CdrGetFilterSetsResp>");
    for info in ctx.store.list_filter_sets()? {
        response.push_str(&format!("<FilterSet>{}</FilterSet>", esc(&info.name)));
    }
    response.push_str("</CdrGetFilterSetsResp>");
    Ok(CommandReply::ok(response))
}

pub(crate) fn list_filters(
    ctx: &mut CommandCtx<'_>,
    _body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let mut response = String::from("<CdrGetFiltersResp>");
    for (id, title) in ctx.store.filter_titles()? {
        response.push_str(&format!("<Filter DocId='{id}'>{}</Filter>", esc(&title)));
    }
    response.push_str("</CdrGetFiltersResp>");
    Ok(CommandReply::ok(response))
}

/// `<FilterSet Name='..' Description='..' [Notes='..']>` with ordered
/// `<Filter DocId=>` and `<Subset Name=>` member children. Subset names are
/// resolved to ids here so storage only deals in references that exist.
fn parse_set_content(
    ctx: &CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<FilterSetContent, CommandError> {
    let set = child(body, "FilterSet")
        .ok_or_else(|| CommandError::Malformed("command needs a FilterSet element".to_string()))?;
    let name = set
        .attribute("Name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CommandError::Malformed("FilterSet needs a Name".to_string()))?
        .to_string();
    let description = set.attribute("Description").unwrap_or_default().to_string();
    let notes = set
        .attribute("Notes")
        .filter(|notes| !notes.is_empty())
        .map(str::to_string);

    let mut members = Vec::new();
    for node in set.children().filter(|node| node.is_element()) {
        match node.tag_name().name() {
            "Filter" => {
                let raw = node.attribute("DocId").unwrap_or_default();
                let id = DocId::parse(raw).map_err(|err| {
                    CommandError::Malformed(format!("bad member DocId {raw}: {err}"))
                })?;
                members.push(FilterSetMember::Filter(id));
            }
            "Subset" => {
                let subset_name = node.attribute("Name").ok_or_else(|| {
                    CommandError::Malformed("Subset member needs a Name".to_string())
                })?;
                let info = ctx.store.filter_set_info(subset_name)?;
                members.push(FilterSetMember::Subset(info.id));
            }
            other => {
                return Err(CommandError::Malformed(format!(
                    "unexpected FilterSet member: {other}"
                )));
            }
        }
    }
    Ok(FilterSetContent {
        name,
        description,
        notes,
        members,
    })
}

fn set_name(body: roxmltree::Node<'_, '_>) -> Result<String, CommandError> {
    child(body, "FilterSetName")
        .map(node_text)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CommandError::Malformed("command needs a FilterSetName".to_string()))
}
