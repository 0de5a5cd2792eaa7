#![forbid(unsafe_code)]

pub(crate) mod ctl;
pub(crate) mod filter;
pub(crate) mod filter_sets;
pub(crate) mod session;

use cdr_storage::{CdrStore, SessionInfo};

use crate::dispatch::{CommandError, Shared};

/// Everything a handler may touch for one command.
pub(crate) struct CommandCtx<'a> {
    pub shared: &'a Shared,
    pub store: &'a mut CdrStore,
    pub session: Option<&'a SessionInfo>,
}

impl CommandCtx<'_> {
    pub fn session(&self) -> Result<&SessionInfo, CommandError> {
        self.session.ok_or(CommandError::MissingSession)
    }

    /// Guards privileged commands behind the session user's grants.
    pub fn require(&self, action: &'static str) -> Result<(), CommandError> {
        let usr = &self.session()?.usr;
        if self.store.can_do(usr, action)? {
            Ok(())
        } else {
            Err(CommandError::NotAuthorized(action))
        }
    }
}
