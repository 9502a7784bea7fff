mod backend;

use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    ops::Deref,
    path::Path,
    sync::{
        mpsc::{self, Sender},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use tracing::*;

use crate::{
    algorithm::{public_key::KeyPair, Compress, ComponentRegistry, Enc, Kex, Mac, PubKey},
    channel::{
        ChannelHandle, ChannelKind, ChannelMultiplexer, GlobalRequestHandler,
        IncomingChannelHandler,
    },
    config::{algorithm::NegotiatedAlgorithms, ChannelDefaults, Config, RekeyPolicy},
    error::{Phase, SshError, SshResult},
    event::{EventDispatcher, EventListener},
    forwarding::ForwardingClient,
    model::{BackendResp, BackendRqst, Data},
    transport::{Role, Transport},
    verifier::HostKeyVerifier,
};

/// State the backend shares with every handle of the connection
pub(crate) struct Shared {
    /// why the backend stopped, if it did so on an error
    fatal: Mutex<Option<(Phase, String)>>,
    finished: Mutex<bool>,
    session_id: Vec<u8>,
    negotiated: Mutex<Option<NegotiatedAlgorithms>>,
    defaults: ChannelDefaults,
    events: EventDispatcher,
}

impl Shared {
    fn finish(&self, fatal: Option<(Phase, String)>) {
        if let Ok(mut f) = self.fatal.lock() {
            if f.is_none() {
                *f = fatal;
            }
        }
        if let Ok(mut finished) = self.finished.lock() {
            *finished = true;
        }
    }

    fn set_negotiated(&self, negotiated: Option<NegotiatedAlgorithms>) {
        if let Ok(mut n) = self.negotiated.lock() {
            *n = negotiated;
        }
    }
}

/// A cheap, cloneable reference to one authenticated connection
///
/// Every clone talks to the same backend thread; they can be moved to other
/// threads freely.
#[derive(Clone)]
pub struct SessionHandle {
    snd: Sender<BackendRqst>,
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub(crate) fn request(&self, rqst: BackendRqst) -> SshResult<()> {
        self.snd.send(rqst).map_err(|_| self.lost())
    }

    /// the error to report once the backend went away
    pub(crate) fn lost(&self) -> SshError {
        match self.shared.fatal.lock().ok().and_then(|f| f.clone()) {
            Some((phase, reason)) => SshError::ConnectionLost { phase, reason },
            None => SshError::SessionClosed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.finished.lock().map(|f| *f).unwrap_or(true)
    }

    pub fn session_id(&self) -> &[u8] {
        &self.shared.session_id
    }

    /// the algorithms of the most recent key exchange
    pub fn negotiated(&self) -> Option<NegotiatedAlgorithms> {
        self.shared.negotiated.lock().ok().and_then(|n| n.clone())
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.shared.events
    }

    /// open a channel of any kind, with the configured window and packet size
    pub fn open_channel(&self, kind: ChannelKind) -> SshResult<ChannelHandle> {
        let defaults = self.shared.defaults;
        let (resp_send, resp_recv) = mpsc::channel();
        self.request(BackendRqst::OpenChannel {
            kind,
            window: defaults.window_size,
            max_packet: defaults.max_packet,
            sender: resp_send,
        })?;

        // get the response
        match resp_recv.recv() {
            Ok(BackendResp::Opened(id)) => Ok(ChannelHandle::new(id, resp_recv, self.clone())),
            Ok(BackendResp::OpenFailed(reason, description)) => {
                Err(SshError::ChannelOpenFailed {
                    reason,
                    description,
                })
            }
            Ok(_) => Err(SshError::ProtocolViolation(
                "unexpected answer to a channel open".to_owned(),
            )),
            Err(_) => Err(self.lost()),
        }
    }

    /// open a session channel, ready for `exec`, `shell` or `subsystem`
    pub fn open_session(&self) -> SshResult<ChannelHandle> {
        self.open_channel(ChannelKind::Session)
    }

    /// open a direct-tcpip channel to `host:port` as seen from the server
    pub fn open_direct_tcpip(
        &self,
        host: &str,
        port: u32,
        originator_address: &str,
        originator_port: u32,
    ) -> SshResult<ChannelHandle> {
        self.open_channel(ChannelKind::DirectTcpip {
            host: host.to_owned(),
            port,
            originator_address: originator_address.to_owned(),
            originator_port,
        })
    }

    /// Send a global request and wait for the answer.
    ///
    /// `Some` carries the response payload of a success, `None` means the
    /// server refused.
    pub fn global_request(&self, name: &str, payload: &[u8]) -> SshResult<Option<Vec<u8>>> {
        let (resp_send, resp_recv) = mpsc::channel();
        self.request(BackendRqst::GlobalRequest {
            name: name.to_owned(),
            payload: Data::from(payload),
            sender: Some(resp_send),
        })?;
        match resp_recv.recv() {
            Ok(BackendResp::Success(data)) => Ok(Some(data.into_inner())),
            Ok(_) => Ok(None),
            Err(_) => Err(self.lost()),
        }
    }

    /// a global request with `want_reply` unset
    pub fn global_request_no_reply(&self, name: &str, payload: &[u8]) -> SshResult<()> {
        self.request(BackendRqst::GlobalRequest {
            name: name.to_owned(),
            payload: Data::from(payload),
            sender: None,
        })
    }

    /// Route channels of `kind` the peer opens to `handler`, `None` removes it.
    ///
    /// Without a handler such channels are refused with UNKNOWN_CHANNEL_TYPE.
    pub fn set_channel_open_handler<H>(&self, kind: &str, handler: Option<H>) -> SshResult<()>
    where
        H: IncomingChannelHandler + 'static,
    {
        self.request(BackendRqst::SetOpenHandler(
            kind.to_owned(),
            handler.map(|h| Box::new(h) as Box<dyn IncomingChannelHandler>),
        ))
    }

    pub fn set_global_request_handler<H>(&self, name: &str, handler: Option<H>) -> SshResult<()>
    where
        H: GlobalRequestHandler + 'static,
    {
        self.request(BackendRqst::SetGlobalHandler(
            name.to_owned(),
            handler.map(|h| Box::new(h) as Box<dyn GlobalRequestHandler>),
        ))
    }

    /// start a key exchange now instead of waiting for the thresholds
    pub fn rekey(&self) -> SshResult<()> {
        self.request(BackendRqst::Rekey)
    }

    /// a handle without backend, the receiver sees what it would be asked
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<BackendRqst>) {
        let (snd, rcv) = mpsc::channel();
        let shared = Arc::new(Shared {
            fatal: Mutex::new(None),
            finished: Mutex::new(false),
            session_id: vec![],
            negotiated: Mutex::new(None),
            defaults: ChannelDefaults::default(),
            events: EventDispatcher::default(),
        });
        (Self { snd, shared }, rcv)
    }
}

/// An authenticated SSH connection
///
/// Dropping it stops all forwardings, says goodbye to the server and waits
/// for the backend thread.
pub struct Session {
    handle: SessionHandle,
    forwarding: ForwardingClient,
    backend: Option<JoinHandle<()>>,
}

impl Deref for Session {
    type Target = SessionHandle;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl Session {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn forwarding(&self) -> &ForwardingClient {
        &self.forwarding
    }

    /// close the backend session and consume the session itself
    pub fn close(self) {
        info!("Client close");
        drop(self)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.forwarding.shutdown();
        let _ = self.handle.request(BackendRqst::Disconnect);
        if let Some(backend) = self.backend.take() {
            if backend.join().is_err() {
                error!("Session backend panicked");
            }
        }
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    config: Config,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            ..Default::default()
        }
    }

    /// `None` waits forever during the handshake
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn username(mut self, username: &str) -> Self {
        let _ = self.config.auth.username(username);
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        let _ = self.config.auth.password(password);
        self
    }

    pub fn private_key<K>(mut self, private_key: K) -> Self
    where
        K: ToString,
    {
        match self.config.auth.private_key(private_key) {
            Ok(_) => (),
            Err(e) => error!(
                "Parse private key from string: {}, will fallback to password authentication",
                e
            ),
        }
        self
    }

    pub fn private_key_path<P>(mut self, key_path: P) -> Self
    where
        P: AsRef<Path>,
    {
        match self.config.auth.private_key_path(key_path) {
            Ok(_) => (),
            Err(e) => error!(
                "Parse private key from file: {}, will fallback to password authentication",
                e
            ),
        }
        self
    }

    pub fn key_pair(mut self, key_pair: KeyPair) -> Self {
        self.config.auth.key_pair = Some(key_pair);
        self
    }

    /// the name the host key verifier sees, the peer address by default
    pub fn host_name(mut self, host: &str) -> Self {
        self.config.host = host.to_owned();
        self
    }

    pub fn preferred_kex(mut self, alg: Kex) -> Self {
        self.config.algs.kex = Some(alg.as_ref().to_owned());
        self
    }

    pub fn preferred_pubkey(mut self, alg: PubKey) -> Self {
        self.config.algs.host_key = Some(alg.as_ref().to_owned());
        self
    }

    pub fn preferred_enc(mut self, alg: Enc) -> Self {
        self.config.algs.cipher = Some(alg.as_ref().to_owned());
        self
    }

    pub fn preferred_mac(mut self, alg: Mac) -> Self {
        self.config.algs.mac = Some(alg.as_ref().to_owned());
        self
    }

    pub fn preferred_compress(mut self, alg: Compress) -> Self {
        self.config.algs.compression = Some(alg.as_ref().to_owned());
        self
    }

    /// offer the "none" cipher and MAC, never do this outside of tests
    pub fn allow_none(mut self, allow: bool) -> Self {
        self.config.algs.allow_none = allow;
        self
    }

    pub fn rekey_policy(mut self, policy: RekeyPolicy) -> Self {
        self.config.rekey = policy;
        self
    }

    pub fn channel_defaults(mut self, defaults: ChannelDefaults) -> Self {
        self.config.channel = defaults;
        self
    }

    pub fn host_key_verifier<V>(mut self, verifier: V) -> Self
    where
        V: HostKeyVerifier + 'static,
    {
        self.config.verifier = Arc::new(verifier);
        self
    }

    pub fn event_listener<L>(self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.config.events.add(listener);
        self
    }

    /// negotiate from `registry` instead of the process wide one
    pub fn registry(mut self, registry: ComponentRegistry) -> Self {
        self.config.registry = registry;
        self
    }

    /// give the connection a private copy of the registry, later changes
    /// to the shared one do not affect it
    pub fn clone_registry(mut self, clone: bool) -> Self {
        self.config.clone_registry = clone;
        self
    }

    pub fn connect<A>(mut self, addr: A) -> SshResult<Session>
    where
        A: ToSocketAddrs,
    {
        // connect tcp by default
        let tcp = TcpStream::connect(addr)?;
        if self.config.host.is_empty() {
            self.config.host = tcp.peer_addr()?.to_string();
        }
        // default nonblocking
        tcp.set_nonblocking(true)?;
        tcp.set_nodelay(true)?;
        self.connect_bio(tcp)
    }

    /// run the handshake over any non-blocking stream
    pub fn connect_bio<S>(self, stream: S) -> SshResult<Session>
    where
        S: Read + Write + Send + 'static,
    {
        let mut transport = Transport::new(stream, Role::Client, self.config);

        let established = transport
            .handshake()
            .and_then(|_| transport.authenticate());
        if let Err(e) = established {
            let phase = transport.phase();
            error!("Connection failed during {}: {}", phase, e);
            if !matches!(e, SshError::Disconnected(_)) {
                transport.disconnect(&e.to_string());
            }
            return Err(e);
        }
        info!("Session established");

        let (handle, backend) = start_backend(transport)?;
        let forwarding = ForwardingClient::new(handle.clone());
        Ok(Session {
            handle,
            forwarding,
            backend: Some(backend),
        })
    }
}

/// hand an established transport over to a backend thread
pub(crate) fn start_backend<S>(transport: Transport<S>) -> SshResult<(SessionHandle, JoinHandle<()>)>
where
    S: Read + Write + Send + 'static,
{
    let events = transport.config().events.clone();
    let defaults = transport.config().channel;
    let shared = Arc::new(Shared {
        fatal: Mutex::new(None),
        finished: Mutex::new(false),
        session_id: transport.session_id().map(|s| s.to_vec()).unwrap_or_default(),
        negotiated: Mutex::new(transport.negotiated().cloned()),
        defaults,
        events: events.clone(),
    });
    let (rqst_snd, rqst_rcv) = mpsc::channel();
    let handle = SessionHandle {
        snd: rqst_snd,
        shared: shared.clone(),
    };
    let mut mux = ChannelMultiplexer::new(defaults, events);
    mux.attach(handle.clone());
    let backend = backend::spawn(transport, mux, rqst_rcv, shared)?;
    Ok((handle, backend))
}
