#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cdr_storage::CdrStore;

use crate::dispatch::Shared;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const TICKS_PER_SWEEP: u32 = 300;

/// Ends idle sessions in the background, on its own store connection.
/// Polls the shutdown flag between sleeps so process exit stays prompt.
pub(crate) fn spawn(shared: Arc<Shared>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("session-sweeper".to_string())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    let mut store = match CdrStore::open(&shared.config.storage_dir) {
        Ok(store) => store,
        Err(err) => {
            log::error!("session sweeper could not open the store: {err}");
            return;
        }
    };

    let mut ticks = 0u32;
    while !shared.shutdown_requested() {
        thread::sleep(POLL_INTERVAL);
        ticks += 1;
        if ticks < TICKS_PER_SWEEP {
            continue;
        }
        ticks = 0;
        match store.sweep_sessions() {
            Ok(0) => {}
            Ok(closed) => log::info!("ended {closed} idle sessions"),
            Err(err) => log::warn!("session sweep failed: {err}"),
        }
    }
}
