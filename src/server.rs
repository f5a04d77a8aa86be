//! Connection acceptor: one listener thread, one thread per session.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::logger::{stamp, EventSink};
use crate::session::{Session, SessionEnd};

/// What the registry knows about a live session.
#[derive(Debug)]
struct SessionInfo {
    peer: SocketAddr,
    // Second handle on the session socket, used only to shut it down on stop
    control: TcpStream,
}

/// Live sessions, keyed by id. Entries are removed when their session ends.
///
/// Count notifications are sent while the lock is held, so a front end sees
/// them in the same order the registry changed.
#[derive(Debug, Default)]
struct Registry {
    sessions: Mutex<HashMap<Uuid, SessionInfo>>,
}

impl Registry {
    fn insert(&self, id: Uuid, info: SessionInfo, events: &dyn EventSink) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.insert(id, info);
        events.client_count_changed(sessions.len());
        sessions.len()
    }

    /// Notifies only if `id` was still registered.
    fn remove(&self, id: &Uuid, events: &dyn EventSink) {
        let mut sessions = self.sessions.lock();
        if let Some(info) = sessions.remove(id) {
            debug!(peer = %info.peer, "session unregistered");
            events.client_count_changed(sessions.len());
        }
    }

    fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    // Drop every entry and shut its socket down so the session thread exits.
    fn shutdown_all(&self, events: &dyn EventSink) {
        let mut sessions = self.sessions.lock();
        for (_, info) in sessions.drain() {
            let _ = info.control.shutdown(Shutdown::Both);
        }
        events.client_count_changed(0);
    }
}

// State shared between the server handle, the accept thread and sessions
struct Shared {
    root: PathBuf,
    io_timeout: Option<Duration>,
    events: Arc<dyn EventSink>,
    registry: Registry,
    running: AtomicBool,
}

impl Shared {
    fn log(&self, msg: &str) {
        info!("{msg}");
        self.events.log(&stamp(msg));
    }
}

pub struct Server {
    config: ServerConfig,
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Prepare a server; creates the shared folder if it does not exist.
    pub fn new(config: ServerConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        std::fs::create_dir_all(&config.shared_folder)
            .with_context(|| format!("create shared folder {}", config.shared_folder.display()))?;
        let root = std::fs::canonicalize(&config.shared_folder)
            .with_context(|| format!("canonicalize {}", config.shared_folder.display()))?;
        if !root.is_dir() {
            anyhow::bail!("shared folder is not a directory: {}", root.display());
        }
        let shared = Arc::new(Shared {
            root,
            io_timeout: config.io_timeout(),
            events,
            registry: Registry::default(),
            running: AtomicBool::new(false),
        });
        Ok(Self {
            config,
            shared,
            local_addr: None,
            accept_thread: None,
        })
    }

    /// Bind and start accepting. Calling it on a running server is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let bind = self.config.bind_addr();
        let listener = match TcpListener::bind(&bind) {
            Ok(l) => l,
            Err(e) => {
                self.shared.log(&format!("Failed to start server: {e}"));
                return Err(e).with_context(|| format!("bind {bind}"));
            }
        };
        let local = listener.local_addr()?;
        self.local_addr = Some(local);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("accept".into())
            .spawn(move || accept_loop(listener, shared))
            .context("spawn accept thread")?;
        self.accept_thread = Some(handle);

        self.shared.log(&format!("Server started on port {}", local.port()));
        self.shared
            .log(&format!("Shared folder: {}", self.shared.root.display()));
        Ok(())
    }

    /// Close the listener and every live session. Idempotent.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // The accept loop polls `running`; it exits within one poll interval
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("accept thread panicked");
            }
        }
        self.shared.registry.shutdown_all(self.shared.events.as_ref());
        self.shared.log("Server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.map(|a| a.port()).unwrap_or(self.config.port)
    }

    pub fn shared_folder(&self) -> &Path {
        &self.shared.root
    }

    pub fn client_count(&self) -> usize {
        self.shared.registry.count()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How long the accept loop sleeps when no connection is pending.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    // Non-blocking so stop() never depends on a connection arriving
    if let Err(e) = listener.set_nonblocking(true) {
        shared.log(&format!("Failed to start server: {e}"));
        shared.running.store(false, Ordering::SeqCst);
        return;
    }
    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = spawn_session(stream, &shared) {
                    shared.log(&format!("Error accepting client: {e:#}"));
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                shared.log(&format!("Error accepting client: {e}"));
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("accept loop finished");
    // listener dropped here: the port is released
}

fn spawn_session(stream: TcpStream, shared: &Arc<Shared>) -> Result<()> {
    let peer = stream.peer_addr().context("peer address")?;
    stream.set_nonblocking(false).context("blocking session socket")?;
    let _ = stream.set_nodelay(true);
    stream.set_read_timeout(shared.io_timeout)?;
    stream.set_write_timeout(shared.io_timeout)?;

    let id = Uuid::new_v4();
    let control = stream.try_clone().context("clone session socket")?;
    let count = shared
        .registry
        .insert(id, SessionInfo { peer, control }, shared.events.as_ref());
    shared.log(&format!("New client accepted. Total clients: {count}"));

    let worker = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("session-{peer}"))
        .spawn(move || {
            let mut session = Session::new(
                stream,
                worker.root.clone(),
                peer.to_string(),
                Arc::clone(&worker.events),
            );
            let end = session.run();
            debug!(%peer, handled = session.handled(), ?end, "session finished");
            if let SessionEnd::Failed(e) = &end {
                debug!(%peer, error = %e, "session ended with error");
            }
            worker.registry.remove(&id, worker.events.as_ref());
        });
    if let Err(e) = spawned {
        shared.registry.remove(&id, shared.events.as_ref());
        return Err(e).context("spawn session thread");
    }
    Ok(())
}
