#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cdr_filter::{FilterError, FilterProfiler, PrettyUrlProvider, TermCache, XsltEngine};
use cdr_storage::{CdrStore, SessionInfo, StoreError};

use crate::config::Config;
use crate::ctl_cache::CtlCache;
use crate::handlers::{self, CommandCtx};
use crate::xml::{child_text, esc};

/// State shared by every connection thread. The engine and resolver hooks
/// are chosen once at startup; the caches swap snapshots internally.
pub(crate) struct Shared {
    pub config: Config,
    pub ctl: CtlCache,
    pub terms: TermCache,
    pub profiler: Option<FilterProfiler>,
    pub engine: Box<dyn XsltEngine>,
    pub pretty: Box<dyn PrettyUrlProvider>,
    shutdown: AtomicBool,
}

impl Shared {
    pub fn new(
        config: Config,
        ctl: CtlCache,
        profiler: Option<FilterProfiler>,
        engine: Box<dyn XsltEngine>,
        pretty: Box<dyn PrettyUrlProvider>,
    ) -> Self {
        Self {
            config,
            ctl,
            terms: TermCache::new(),
            profiler,
            engine,
            pretty,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Env suppression wins; otherwise the control table can turn logging
    /// off at runtime.
    pub fn command_logging_enabled(&self) -> bool {
        if self.config.suppress_command_log {
            return false;
        }
        self.ctl
            .get("Logging", "SuppressCommandLog")
            .is_none_or(|value| value != "Y")
    }
}

/// Successful handler output. `warning` downgrades the envelope status for
/// runs that produced non-fatal messages.
pub(crate) struct CommandReply {
    pub payload: String,
    pub warning: bool,
}

impl CommandReply {
    pub fn ok(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            warning: false,
        }
    }
}

#[derive(Debug)]
pub(crate) enum CommandError {
    Store(StoreError),
    Filter(FilterError),
    Malformed(String),
    MissingSession,
    NotAuthorized(&'static str),
    UnknownCommand(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Filter(err) => write!(f, "{err}"),
            Self::Malformed(detail) => write!(f, "malformed command: {detail}"),
            Self::MissingSession => write!(f, "missing or invalid session"),
            Self::NotAuthorized(action) => {
                write!(f, "session not authorized for action: {action}")
            }
            Self::UnknownCommand(name) => write!(f, "unknown command: {name}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<StoreError> for CommandError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<FilterError> for CommandError {
    fn from(value: FilterError) -> Self {
        Self::Filter(value)
    }
}

/// The full command surface, kept in sync with `dispatch` by test.
pub(crate) const COMMAND_NAMES: &[&str] = &[
    "CdrLogon",
    "CdrDupSession",
    "CdrLogoff",
    "CdrFilter",
    "CdrAddFilterSet",
    "CdrRepFilterSet",
    "CdrGetFilterSet",
    "CdrDelFilterSet",
    "CdrGetFilterSets",
    "CdrGetFilters",
    "CdrSetCtl",
    "CdrLastVersions",
    "CdrShutdown",
];

/// One request payload in, one response payload out. Batch-level failures
/// (bad XML, wrong top element) produce a batch-level error envelope.
pub(crate) fn process_batch(
    shared: &Shared,
    store: &mut CdrStore,
    payload: &str,
    thread_label: &str,
) -> String {
    if shared.command_logging_enabled() {
        if let Err(err) = store.log_command(thread_label, payload) {
            log::warn!("command log write failed: {err}");
        }
    }

    let parsed = match roxmltree::Document::parse(payload) {
        Ok(parsed) => parsed,
        Err(err) => return batch_error(&format!("unparsable XML: {err}")),
    };
    let root = parsed.root_element();
    if !root.has_tag_name("CdrCommandSet") {
        return batch_error("top-level element must be CdrCommandSet");
    }

    let session_token = child_text(root, "SessionId")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    let mut responses = String::new();
    for command in root
        .children()
        .filter(|node| node.is_element() && node.has_tag_name("CdrCommand"))
    {
        responses.push_str(&process_command(
            shared,
            store,
            command,
            session_token.as_deref(),
        ));
    }

    format!(
        "<CdrResponseSet Time='{}'>{responses}</CdrResponseSet>",
        now_rfc3339()
    )
}

fn process_command(
    shared: &Shared,
    store: &mut CdrStore,
    command: roxmltree::Node<'_, '_>,
    session_token: Option<&str>,
) -> String {
    let started = Instant::now();
    let cmd_id = command.attribute("CmdId").map(str::to_string);

    let result = run_command(shared, store, command, session_token);
    if result.is_err() {
        // Never leave a failing handler's transaction open across commands.
        if let Err(rollback_err) = store.rollback_if_open() {
            log::error!("rollback after failed command also failed: {rollback_err}");
        }
    }
    envelope(cmd_id.as_deref(), started, result)
}

fn run_command(
    shared: &Shared,
    store: &mut CdrStore,
    command: roxmltree::Node<'_, '_>,
    session_token: Option<&str>,
) -> Result<CommandReply, CommandError> {
    let body = command
        .children()
        .find(|node| node.is_element())
        .ok_or_else(|| CommandError::Malformed("empty CdrCommand element".to_string()))?;
    let name = body.tag_name().name().to_string();

    // Reset to autocommit before the handler runs.
    store.rollback_if_open()?;

    let session = authenticate(store, &name, session_token)?;
    let mut ctx = CommandCtx {
        shared,
        store,
        session: session.as_ref(),
    };
    dispatch(&mut ctx, &name, body).ok_or(CommandError::UnknownCommand(name))?
}

/// Logon is the only command valid without a session; everything else needs
/// an open, unexpired one.
fn authenticate(
    store: &mut CdrStore,
    name: &str,
    session_token: Option<&str>,
) -> Result<Option<SessionInfo>, CommandError> {
    if name == "CdrLogon" {
        return Ok(None);
    }
    let token = session_token.ok_or(CommandError::MissingSession)?;
    Ok(Some(store.validate_session(token)?))
}

pub(crate) fn dispatch(
    ctx: &mut CommandCtx<'_>,
    name: &str,
    body: roxmltree::Node<'_, '_>,
) -> Option<Result<CommandReply, CommandError>> {
    Some(match name {
        "CdrLogon" => handlers::session::logon(ctx, body),
        "CdrDupSession" => handlers::session::dup_session(ctx, body),
        "CdrLogoff" => handlers::session::logoff(ctx, body),
        "CdrFilter" => handlers::filter::filter(ctx, body),
        "CdrAddFilterSet" => handlers::filter_sets::add(ctx, body),
        "CdrRepFilterSet" => handlers::filter_sets::replace(ctx, body),
        "CdrGetFilterSet" => handlers::filter_sets::get(ctx, body),
        "CdrDelFilterSet" => handlers::filter_sets::del(ctx, body),
        "CdrGetFilterSets" => handlers::filter_sets::list(ctx, body),
        "CdrGetFilters" => handlers::filter_sets::list_filters(ctx, body),
        "CdrSetCtl" => handlers::ctl::set_ctl(ctx, body),
        "CdrLastVersions" => handlers::ctl::last_versions(ctx, body),
        "CdrShutdown" => handlers::ctl::shutdown(ctx, body),
        _ => return None,
    })
}

fn envelope(
    cmd_id: Option<&str>,
    started: Instant,
    result: Result<CommandReply, CommandError>,
) -> String {
    let elapsed = started.elapsed();
    let elapsed = format!("{}.{:03}", elapsed.as_secs(), elapsed.subsec_millis());
    let id_attr = match cmd_id {
        Some(id) => format!(" CmdId='{}'", esc(id)),
        None => String::new(),
    };
    match result {
        Ok(reply) => {
            let status = if reply.warning { "warning" } else { "success" };
            format!(
                "<CdrResponse{id_attr} Status='{status}' Elapsed='{elapsed}'>{}</CdrResponse>",
                reply.payload
            )
        }
        Err(err) => format!(
            "<CdrResponse{id_attr} Status='error' Elapsed='{elapsed}'><Errors><Err>{}</Err></Errors></CdrResponse>",
            esc(&err.to_string())
        ),
    }
}

pub(crate) fn batch_error(message: &str) -> String {
    format!(
        "<CdrResponseSet Time='{}'><Errors><Err>{}</Err></Errors></CdrResponseSet>",
        now_rfc3339(),
        esc(message)
    )
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
