use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
};

use rand::{rngs::OsRng, Rng};
use tracing::*;

use crate::{
    constant::forwarding::{EPHEMERAL_PORT_MAX, EPHEMERAL_PORT_MIN},
    error::{SshError, SshResult},
    event::SshEvent,
    model::Timeout,
};

use super::{aggregate, generate_key, ActiveTunnel, ForwardingClient, Inner, TunnelDirection};

/// One listening socket of a local forwarding
pub(super) struct LocalListener {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LocalListener {
    fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Listener on {} panicked", self.local_addr);
            }
        }
    }
}

fn bind_addr(host: &str, port: u16) -> String {
    if host.is_empty() {
        format!("0.0.0.0:{}", port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn accept_loop(
    owner: Weak<Inner>,
    listener: TcpListener,
    stop: Arc<AtomicBool>,
    key: String,
    dest_host: String,
    dest_port: u16,
) {
    let destination = format!("{}:{}", dest_host, dest_port);
    let mut idle = Timeout::idle();
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((socket, remote)) => {
                idle.renew();
                let Some(owner) = owner.upgrade() else {
                    break;
                };
                if !owner.accepted(remote, &destination) {
                    info!("Connection from {} to {} was vetoed", remote, destination);
                    continue;
                }
                let (key, dest_host) = (key.clone(), dest_host.clone());
                let spawned = thread::Builder::new()
                    .name(format!("forward-{}", key))
                    .spawn(move || {
                        if let Err(e) =
                            open_tunnel(&owner, &key, socket, remote, &dest_host, dest_port)
                        {
                            warn!("Forwarding {} to {}:{} failed: {}", remote, dest_host, dest_port, e);
                        }
                    });
                if let Err(e) = spawned {
                    error!("Can not start a tunnel thread: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let _ = idle.till_next_tick();
            }
            Err(e) => {
                error!("Listener {} failed: {}", key, e);
                break;
            }
        }
    }
    debug!("Listener {} stopped", key);
}

/// one accepted socket, on its own thread so a slow open never stalls accepting
fn open_tunnel(
    owner: &Arc<Inner>,
    key: &str,
    socket: TcpStream,
    remote: SocketAddr,
    dest_host: &str,
    dest_port: u16,
) -> SshResult<()> {
    socket.set_nonblocking(false)?;
    let channel = owner.session().open_direct_tcpip(
        dest_host,
        dest_port as u32,
        &remote.ip().to_string(),
        remote.port() as u32,
    )?;
    ActiveTunnel::start(
        owner,
        TunnelDirection::Outgoing,
        key,
        remote.to_string(),
        socket,
        channel,
    )?;
    Ok(())
}

impl ForwardingClient {
    /// Listen on `bind_host:bind_port` and forward every connection to
    /// `dest_host:dest_port` as seen from the server.
    ///
    /// Returns the key of the forwarding. A key that already has a listener
    /// is refused.
    pub fn start_local_forwarding(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> SshResult<String> {
        let key = generate_key(bind_host, bind_port);
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if listeners.contains_key(&key) {
            let err_msg = format!("local forwarding {} is already running", key);
            error!(err_msg);
            return Err(SshError::ForwardingError(err_msg));
        }

        let listener = TcpListener::bind(bind_addr(bind_host, bind_port)).map_err(|e| {
            SshError::ForwardingError(format!("can not listen on {}: {}", key, e))
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let (owner, stop) = (Arc::downgrade(&self.inner), stop.clone());
            let (key, dest_host) = (key.clone(), dest_host.to_owned());
            thread::Builder::new()
                .name(format!("listen-{}", key))
                .spawn(move || accept_loop(owner, listener, stop, key, dest_host, dest_port))?
        };
        listeners.insert(
            key.clone(),
            LocalListener {
                local_addr,
                stop,
                thread: Some(thread),
            },
        );
        drop(listeners);

        info!(
            "Local forwarding {} listening on {} -> {}:{}",
            key, local_addr, dest_host, dest_port
        );
        self.inner.events().emit(&SshEvent::ForwardingStarted {
            key: key.clone(),
            remote: false,
        });
        Ok(key)
    }

    /// Like [ForwardingClient::start_local_forwarding] on a random port of
    /// [49152, 65535].
    ///
    /// A taken port is retried up to `max_attempts` times in total, the
    /// chosen port is returned.
    pub fn start_local_forwarding_on_random_port(
        &self,
        bind_host: &str,
        dest_host: &str,
        dest_port: u16,
        max_attempts: u32,
    ) -> SshResult<u16> {
        for attempt in 1..=max_attempts {
            let port = OsRng.gen_range(EPHEMERAL_PORT_MIN..=EPHEMERAL_PORT_MAX);
            match self.start_local_forwarding(bind_host, port, dest_host, dest_port) {
                Ok(_) => return Ok(port),
                Err(SshError::ForwardingError(e)) => {
                    debug!("attempt {} on port {}: {}", attempt, port, e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(SshError::PortUnavailable(max_attempts))
    }

    /// the socket a local forwarding listens on
    pub fn local_address(&self, key: &str) -> Option<SocketAddr> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|l| l.local_addr)
    }

    /// stop listening and tear down the tunnels the listener started
    pub fn stop_local_forwarding(&self, key: &str) -> SshResult<()> {
        let listener = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        let Some(listener) = listener else {
            let err_msg = format!("no local forwarding {}", key);
            error!(err_msg);
            return Err(SshError::ForwardingError(err_msg));
        };
        listener.shutdown();
        self.inner.stop_tunnels(TunnelDirection::Outgoing, key);

        info!("Local forwarding {} stopped", key);
        self.inner.events().emit(&SshEvent::ForwardingStopped {
            key: key.to_owned(),
            remote: false,
        });
        Ok(())
    }

    pub fn stop_all_local_forwarding(&self) -> SshResult<()> {
        let keys = self.local_forwardings();
        let failures: Vec<SshError> = keys
            .iter()
            .filter_map(|key| self.stop_local_forwarding(key).err())
            .collect();
        aggregate("local forwardings", keys.len(), failures)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::session::SessionHandle;

    fn client() -> (ForwardingClient, std::sync::mpsc::Receiver<crate::model::BackendRqst>) {
        let (session, rqst) = SessionHandle::detached();
        (ForwardingClient::new(session), rqst)
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let (forwarding, _rqst) = client();
        let port = forwarding
            .start_local_forwarding_on_random_port("127.0.0.1", "db", 5432, 20)
            .unwrap();
        let key = generate_key("127.0.0.1", port);
        assert_eq!(forwarding.local_forwardings(), vec![key.clone()]);

        let again = forwarding.start_local_forwarding("127.0.0.1", port, "other", 1);
        assert!(matches!(again, Err(SshError::ForwardingError(_))));
        // the first listener is untouched
        assert!(forwarding.local_address(&key).is_some());

        forwarding.stop_local_forwarding(&key).unwrap();
        assert!(forwarding.local_forwardings().is_empty());
        assert!(matches!(
            forwarding.stop_local_forwarding(&key),
            Err(SshError::ForwardingError(_))
        ));
    }

    #[test]
    fn random_port_gives_up() {
        let (forwarding, _rqst) = client();
        // an address that can never be bound
        let result =
            forwarding.start_local_forwarding_on_random_port("192.0.2.255", "db", 5432, 3);
        assert!(matches!(result, Err(SshError::PortUnavailable(3))));
    }

    #[test]
    fn vetoed_socket_is_dropped() {
        let (forwarding, rqst) = client();
        forwarding.add_accept_policy(|_: SocketAddr, _: &str| false);
        let port = forwarding
            .start_local_forwarding_on_random_port("127.0.0.1", "db", 5432, 20)
            .unwrap();

        let mut socket = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let mut buf = [0_u8; 1];
        // closed without a channel being opened
        assert_eq!(socket.read(&mut buf).unwrap_or(0), 0);
        assert!(rqst.try_recv().is_err());

        forwarding.stop_all_local_forwarding().unwrap();
    }
}
