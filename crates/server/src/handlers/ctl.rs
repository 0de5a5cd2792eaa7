#![forbid(unsafe_code)]

use cdr_core::DocId;
use cdr_storage::CtlAction;

use crate::dispatch::{CommandError, CommandReply};
use crate::xml::{child, child_text, node_text};

use super::CommandCtx;

/// Create and Inactivate mutate rows only; Install republishes the live
/// rows as the in-memory snapshot, so edits become visible in one step.
pub(crate) fn set_ctl(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    ctx.require("SET_SYS_VALUE")?;
    let ctl = child(body, "Ctl")
        .ok_or_else(|| CommandError::Malformed("CdrSetCtl needs a Ctl element".to_string()))?;
    let action = child_text(ctl, "Action")
        .filter(|action| !action.is_empty())
        .ok_or_else(|| CommandError::Malformed("Ctl needs an Action".to_string()))?;

    match action.as_str() {
        "Create" => {
            let grp = required(ctl, "Group")?;
            let key = required(ctl, "Key")?;
            let val = child_text(ctl, "Value").unwrap_or_default();
            let comment = child_text(ctl, "Comment").filter(|comment| !comment.is_empty());
            ctx.store.set_ctl(CtlAction::Create {
                grp,
                key,
                val,
                comment,
            })?;
        }
        "Inactivate" => {
            let grp = required(ctl, "Group")?;
            let key = required(ctl, "Key")?;
            ctx.store.set_ctl(CtlAction::Inactivate { grp, key })?;
        }
        "Install" => {
            ctx.shared.ctl.install(ctx.store.ctl_values()?);
        }
        other => {
            return Err(CommandError::Malformed(format!(
                "unknown Ctl action: {other}"
            )));
        }
    }
    Ok(CommandReply::ok("<CdrSetCtlResp/>"))
}

pub(crate) fn last_versions(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let raw = child_text(body, "DocId")
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| CommandError::Malformed("CdrLastVersions needs a DocId".to_string()))?;
    let id = DocId::parse(&raw)
        .map_err(|err| CommandError::Malformed(format!("bad document id {raw}: {err}")))?;
    let info = ctx.store.version_info(id)?;
    Ok(CommandReply::ok(format!(
        "<CdrLastVersionsResp>\
         <LastVersionNum>{}</LastVersionNum>\
         <LastPubVersionNum>{}</LastPubVersionNum>\
         <IsChanged>{}</IsChanged>\
         </CdrLastVersionsResp>",
        info.last_any,
        info.last_pub,
        if info.is_changed { "Y" } else { "N" }
    )))
}

/// The response still goes out on this connection; the accept loop observes
/// the flag on its next poll.
pub(crate) fn shutdown(
    ctx: &mut CommandCtx<'_>,
    _body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    ctx.require("SHUTDOWN")?;
    log::info!("shutdown requested by user {}", ctx.session()?.usr);
    ctx.shared.request_shutdown();
    Ok(CommandReply::ok("<CdrShutdownResp/>"))
}

fn required(node: roxmltree::Node<'_, '_>, name: &str) -> Result<String, CommandError> {
    child(node, name)
        .map(node_text)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CommandError::Malformed(format!("Ctl needs a {name}")))
}
