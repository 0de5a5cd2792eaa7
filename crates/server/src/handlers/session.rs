#![forbid(unsafe_code)]

use crate::dispatch::{CommandError, CommandReply};
use crate::xml::{child_text, esc};

use super::CommandCtx;

pub(crate) fn logon(
    ctx: &mut CommandCtx<'_>,
    body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let name = child_text(body, "Name")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CommandError::Malformed("CdrLogon needs a Name".to_string()))?;
    let password = child_text(body, "Password").unwrap_or_default();
    let token = ctx.store.logon(&name, &password)?;
    Ok(CommandReply::ok(format!(
        "<CdrLogonResp><SessionId>{}</SessionId></CdrLogonResp>",
        esc(&token)
    )))
}

pub(crate) fn dup_session(
    ctx: &mut CommandCtx<'_>,
    _body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let current = ctx.session()?.name.clone();
    let duplicate = ctx.store.dup_session(&current)?;
    Ok(CommandReply::ok(format!(
        "<CdrDupSessionResp><SessionId>{}</SessionId><NewSessionId>{}</NewSessionId></CdrDupSessionResp>",
        esc(&current),
        esc(&duplicate)
    )))
}

pub(crate) fn logoff(
    ctx: &mut CommandCtx<'_>,
    _body: roxmltree::Node<'_, '_>,
) -> Result<CommandReply, CommandError> {
    let current = ctx.session()?.name.clone();
    ctx.store.logoff(&current)?;
    Ok(CommandReply::ok("<CdrLogoffResp/>"))
}
