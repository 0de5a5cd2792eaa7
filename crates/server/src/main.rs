#![forbid(unsafe_code)]

mod config;
mod ctl_cache;
mod dispatch;
mod handlers;
mod sweep;
mod wire;
mod xml;

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cdr_filter::{FilterProfiler, NoPrettyUrls, NullEngine};
use cdr_storage::{CdrStore, StoreError};

use crate::ctl_cache::CtlCache;
use crate::dispatch::Shared;
use crate::wire::WireError;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Grants seeded onto the admin account so a fresh deployment can manage
/// itself.
const ADMIN_ACTIONS: &[&str] = &[
    "ADD FILTER SET",
    "MODIFY FILTER SET",
    "DELETE FILTER SET",
    "SET_SYS_VALUE",
    "SHUTDOWN",
];

fn main() {
    env_logger::init();
    let config = config::from_env();
    if let Err(err) = run(config) {
        log::error!("fatal: {err}");
        std::process::exit(1);
    }
}

fn run(config: config::Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = CdrStore::open(&config.storage_dir)?;
    bootstrap_accounts(&mut store, config.seed_admin_password.as_deref())?;

    let profiler = if config.profiling {
        log::info!("filter profiling enabled");
        Some(FilterProfiler::build(&store)?)
    } else {
        None
    };
    let ctl = CtlCache::new(store.ctl_values()?);
    drop(store);

    let listener = TcpListener::bind(("0.0.0.0", config.port))?;
    listener.set_nonblocking(true)?;
    log::info!("listening on port {}", config.port);

    let shared = Arc::new(Shared::new(
        config,
        ctl,
        profiler,
        Box::new(NullEngine),
        Box::new(NoPrettyUrls),
    ));
    let _sweeper = sweep::spawn(Arc::clone(&shared))?;

    while !shared.shutdown_requested() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let shared = Arc::clone(&shared);
                let builder = thread::Builder::new().name(format!("conn-{peer}"));
                if let Err(err) = builder.spawn(move || handle_connection(&shared, stream)) {
                    log::error!("could not spawn connection thread: {err}");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::warn!("accept failed: {err}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    // Give the connection that carried the shutdown command time to flush
    // its response before the process exits.
    thread::sleep(ACCEPT_POLL);
    log::info!("shut down");
    Ok(())
}

/// The guest account always exists; the admin account is (re)seeded only
/// when the deployment asks for it.
fn bootstrap_accounts(
    store: &mut CdrStore,
    seed_admin_password: Option<&str>,
) -> Result<(), StoreError> {
    if !store.user_exists("guest")? {
        store.add_user("guest", "")?;
    }
    if let Some(password) = seed_admin_password {
        store.add_user("admin", password)?;
        for action in ADMIN_ACTIONS {
            store.grant_action("admin", action)?;
        }
        log::info!("seeded admin account");
    }
    Ok(())
}

fn handle_connection(shared: &Shared, stream: TcpStream) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(_) => String::from("unknown"),
    };
    log::debug!("connection from {peer}");
    if let Err(err) = serve(shared, stream, &peer) {
        log::warn!("connection {peer} failed: {err}");
    }
}

/// One store per connection thread; requests on the stream are served
/// sequentially until the peer goes away.
fn serve(
    shared: &Shared,
    mut stream: TcpStream,
    peer: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let mut store = CdrStore::open(&shared.config.storage_dir)?;

    loop {
        if shared.shutdown_requested() {
            break;
        }
        match wire::read_request(&mut stream) {
            Ok(payload) => {
                let response = dispatch::process_batch(shared, &mut store, &payload, peer);
                wire::send_response(&mut stream, &response)?;
            }
            Err(WireError::Closed) => break,
            Err(WireError::Io(err)) => return Err(err.into()),
            Err(err) => {
                // Framing-level rejection: the stream position can no
                // longer be trusted, so answer and drop the connection.
                let response = dispatch::batch_error(&err.to_string());
                let _ = wire::send_response(&mut stream, &response);
                break;
            }
        }
    }
    Ok(())
}
