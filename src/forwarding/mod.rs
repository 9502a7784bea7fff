//! Port forwarding over one session
//!
//! Local forwarding listens on a local port and opens a `direct-tcpip`
//! channel per accepted socket. Remote forwarding asks the server to listen
//! and bridges every `forwarded-tcpip` channel it opens to a local destination.
//! X11 forwarding does the same for `x11` channels, swapping the fake cookie
//! the server saw for the real one.
//!
//! Every forwarding is identified by a key, see [generate_key].

mod local;
mod remote;
mod tunnel;
mod x11;

pub use tunnel::{ActiveTunnel, LocalSocket, TunnelDirection};
pub use x11::{X11Display, XAuthEntry, XAuthority};

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, RwLock},
};

use tracing::*;

use crate::{
    error::{SshError, SshResult},
    event::EventDispatcher,
    session::SessionHandle,
    util,
};

use self::local::LocalListener;
use self::remote::RemoteForwarding;
use self::x11::X11Forwarding;

/// The lookup key of a forwarding: the port alone for an empty host,
/// `host:port` otherwise.
pub fn generate_key(host: &str, port: u16) -> String {
    if host.is_empty() {
        port.to_string()
    } else {
        format!("{}:{}", host, port)
    }
}

/// Decides whether a socket accepted by a local forwarding may be forwarded
///
/// Called with the address of the connecting socket and the forwarding
/// destination. A policy returning false, or panicking, vetoes the socket.
pub trait AcceptPolicy: Send + Sync {
    fn accept(&self, remote: SocketAddr, destination: &str) -> bool;
}

impl<F> AcceptPolicy for F
where
    F: Fn(SocketAddr, &str) -> bool + Send + Sync,
{
    fn accept(&self, remote: SocketAddr, destination: &str) -> bool {
        self(remote, destination)
    }
}

type TunnelTable = Mutex<HashMap<String, Vec<Arc<ActiveTunnel>>>>;

pub(crate) struct Inner {
    session: SessionHandle,
    events: EventDispatcher,
    listeners: Mutex<HashMap<String, LocalListener>>,
    outgoing: TunnelTable,
    incoming: TunnelTable,
    remote: Mutex<HashMap<String, RemoteForwarding>>,
    /// whether the forwarded-tcpip handler was installed
    remote_handler: Mutex<bool>,
    x11: Mutex<Option<X11Forwarding>>,
    policies: RwLock<Vec<Arc<dyn AcceptPolicy>>>,
}

impl Inner {
    pub(crate) fn new(session: SessionHandle, events: EventDispatcher) -> Self {
        Self {
            session,
            events,
            listeners: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            remote_handler: Mutex::new(false),
            x11: Mutex::new(None),
            policies: RwLock::new(vec![]),
        }
    }

    pub(crate) fn tunnels(&self, direction: TunnelDirection) -> &TunnelTable {
        match direction {
            TunnelDirection::Outgoing => &self.outgoing,
            TunnelDirection::Incoming => &self.incoming,
        }
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub(crate) fn session(&self) -> &SessionHandle {
        &self.session
    }

    #[cfg(test)]
    pub(crate) fn tunnel_count(&self, direction: TunnelDirection, key: &str) -> usize {
        self.tunnels(direction)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|t| t.len())
            .unwrap_or_default()
    }

    /// every policy must agree, a panicking one counts as a veto
    fn accepted(&self, remote: SocketAddr, destination: &str) -> bool {
        let snapshot = self
            .policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        snapshot.iter().all(|policy| {
            util::guarded("accept policy", || policy.accept(remote, destination))
                .unwrap_or(false)
        })
    }

    /// stop the tunnels of one key, over a snapshot as stopping edits the table
    fn stop_tunnels(&self, direction: TunnelDirection, key: &str) {
        let snapshot = self
            .tunnels(direction)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .unwrap_or_default();
        for tunnel in snapshot {
            tunnel.stop();
        }
    }

    fn snapshot(&self, direction: TunnelDirection) -> Vec<Arc<ActiveTunnel>> {
        self.tunnels(direction)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Manages the forwardings of one session
///
/// Cheap to clone; all clones share the same tables.
#[derive(Clone)]
pub struct ForwardingClient {
    inner: Arc<Inner>,
}

impl ForwardingClient {
    pub(crate) fn new(session: SessionHandle) -> Self {
        let events = session.events().clone();
        Self {
            inner: Arc::new(Inner::new(session, events)),
        }
    }

    pub fn add_accept_policy<P>(&self, policy: P)
    where
        P: AcceptPolicy + 'static,
    {
        self.inner
            .policies
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(policy));
    }

    /// keys of the running local forwardings
    pub fn local_forwardings(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// keys of the remote forwardings the server accepted
    pub fn remote_forwardings(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .inner
            .remote
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// tunnels started by local listeners
    pub fn outgoing_tunnels(&self) -> Vec<Arc<ActiveTunnel>> {
        self.inner.snapshot(TunnelDirection::Outgoing)
    }

    /// tunnels for channels the server opened
    pub fn incoming_tunnels(&self) -> Vec<Arc<ActiveTunnel>> {
        self.inner.snapshot(TunnelDirection::Incoming)
    }

    /// stop everything, errors are only logged
    pub(crate) fn shutdown(&self) {
        if let Err(e) = self.stop_all_local_forwarding() {
            debug!("Stop local forwardings: {}", e);
        }
        if !self.inner.session.is_closed() {
            if let Err(e) = self.cancel_all_remote_forwarding() {
                debug!("Cancel remote forwardings: {}", e);
            }
        }
        self.stop_x11_forwarding();
        for tunnel in self.incoming_tunnels() {
            tunnel.stop();
        }
    }
}

/// the outcome of a bulk stop, `Err` only if there was something to stop
/// and none of it could be
fn aggregate(what: &str, attempted: usize, failures: Vec<SshError>) -> SshResult<()> {
    if attempted > 0 && failures.len() == attempted {
        let err_msg = format!(
            "none of the {} {} could be stopped: {}",
            attempted,
            what,
            failures
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        );
        error!(err_msg);
        return Err(SshError::ForwardingError(err_msg));
    }
    for e in failures {
        warn!("{}", e);
    }
    Ok(())
}
