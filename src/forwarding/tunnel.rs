use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
    thread,
};

use tracing::*;

use crate::{
    channel::{ChannelCloser, ChannelHandle, ChannelReader, ChannelWriter},
    constant::size,
    error::SshResult,
    event::SshEvent,
};

use super::Inner;

/// A local socket one end of a tunnel is attached to
pub trait LocalSocket: Read + Write + Send {
    fn try_clone_socket(&self) -> io::Result<Box<dyn LocalSocket>>;
    fn shutdown_socket(&self, how: Shutdown) -> io::Result<()>;
}

impl LocalSocket for TcpStream {
    fn try_clone_socket(&self) -> io::Result<Box<dyn LocalSocket>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_socket(&self, how: Shutdown) -> io::Result<()> {
        self.shutdown(how)
    }
}

#[cfg(unix)]
impl LocalSocket for std::os::unix::net::UnixStream {
    fn try_clone_socket(&self) -> io::Result<Box<dyn LocalSocket>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown_socket(&self, how: Shutdown) -> io::Result<()> {
        self.shutdown(how)
    }
}

/// which table of the manager owns a tunnel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TunnelDirection {
    /// a local listener accepted the socket
    Outgoing,
    /// the peer opened the channel
    Incoming,
}

/// One socket bridged to one channel, pumped by a thread per direction
///
/// Either direction may reach end of file on its own; the tunnel goes away
/// once both did, when its channel closes, or on [ActiveTunnel::stop].
pub struct ActiveTunnel {
    key: String,
    peer: String,
    direction: TunnelDirection,
    owner: Weak<Inner>,
    socket: Mutex<Option<Box<dyn LocalSocket>>>,
    closer: ChannelCloser,
    running_pumps: AtomicUsize,
    stopped: AtomicBool,
}

impl ActiveTunnel {
    /// register the tunnel with its owner and start both pumps
    pub(crate) fn start<L>(
        owner: &Arc<Inner>,
        direction: TunnelDirection,
        key: &str,
        peer: String,
        socket: L,
        channel: ChannelHandle,
    ) -> SshResult<Arc<ActiveTunnel>>
    where
        L: LocalSocket + 'static,
    {
        let upstream = socket.try_clone_socket()?;
        let downstream = socket.try_clone_socket()?;
        let closer = channel.closer();
        let (reader, writer) = channel.split();

        let tunnel = Arc::new(ActiveTunnel {
            key: key.to_owned(),
            peer,
            direction,
            owner: Arc::downgrade(owner),
            socket: Mutex::new(Some(Box::new(socket))),
            closer,
            running_pumps: AtomicUsize::new(2),
            stopped: AtomicBool::new(false),
        });
        owner
            .tunnels(direction)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.to_owned())
            .or_default()
            .push(tunnel.clone());
        info!("Tunnel {} opened for {}", tunnel.key, tunnel.peer);
        owner.events().emit(&SshEvent::TunnelOpened {
            key: tunnel.key.clone(),
            peer: tunnel.peer.clone(),
        });

        let t = tunnel.clone();
        thread::Builder::new()
            .name(format!("tunnel-up-{}", key))
            .spawn(move || t.pump_upstream(upstream, writer))?;
        let t = tunnel.clone();
        thread::Builder::new()
            .name(format!("tunnel-down-{}", key))
            .spawn(move || t.pump_downstream(reader, downstream))?;
        Ok(tunnel)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// where the local socket is connected to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn direction(&self) -> TunnelDirection {
        self.direction
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// socket to channel, the channel gets EOF when the socket has none left
    fn pump_upstream(self: Arc<Self>, mut from: Box<dyn LocalSocket>, mut to: ChannelWriter) {
        let mut buf = vec![0; size::BUF_SIZE];
        loop {
            match from.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = to.write_all(&buf[..n]) {
                        debug!("Tunnel {} channel write failed: {}", self.key, e);
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Tunnel {} socket read failed: {}", self.key, e);
                    break;
                }
            }
        }
        let _ = to.send_eof();
        self.pump_closed();
    }

    /// Channel to socket, the socket's write half is shut once the channel had EOF.
    ///
    /// A closed channel takes the whole tunnel with it, which also ends the
    /// upstream pump blocked on the socket.
    fn pump_downstream(self: Arc<Self>, mut from: ChannelReader, mut to: Box<dyn LocalSocket>) {
        let mut buf = vec![0; size::BUF_SIZE];
        loop {
            match from.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = to.write_all(&buf[..n]) {
                        debug!("Tunnel {} socket write failed: {}", self.key, e);
                        break;
                    }
                }
                Err(e) => {
                    debug!("Tunnel {} channel read failed: {}", self.key, e);
                    break;
                }
            }
        }
        if from.is_closed() {
            debug!("Tunnel {} channel closed", self.key);
            self.stop();
        } else {
            let _ = to.shutdown_socket(Shutdown::Write);
        }
        self.pump_closed();
    }

    fn pump_closed(&self) {
        if self.running_pumps.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stop();
        }
    }

    /// Tear the tunnel down; safe to call any number of times from any thread.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.closer.close() {
            debug!("Tunnel {} channel close failed: {}", self.key, e);
        }
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(socket) = socket {
            let _ = socket.shutdown_socket(Shutdown::Both);
        }

        if let Some(owner) = self.owner.upgrade() {
            let mut table = owner
                .tunnels(self.direction)
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(tunnels) = table.get_mut(&self.key) {
                tunnels.retain(|t| !std::ptr::eq(Arc::as_ptr(t), self));
                if tunnels.is_empty() {
                    table.remove(&self.key);
                }
            }
            drop(table);
            owner.events().emit(&SshEvent::TunnelClosed {
                key: self.key.clone(),
            });
        }
        info!("Tunnel {} closed", self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, sync::mpsc, time::Duration};

    use super::*;
    use crate::{event::EventDispatcher, model::BackendResp, session::SessionHandle};

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn stop_is_idempotent() {
        let (session, _rqst) = SessionHandle::detached();
        let inner = Arc::new(Inner::new(session.clone(), EventDispatcher::default()));
        let (resp_snd, resp_rcv) = mpsc::channel();
        let channel = ChannelHandle::new(3, resp_rcv, session);
        let (local, _far) = socket_pair();

        let tunnel = ActiveTunnel::start(
            &inner,
            TunnelDirection::Outgoing,
            "8080",
            "127.0.0.1:1".to_owned(),
            local,
            channel,
        )
        .unwrap();
        assert_eq!(inner.tunnel_count(TunnelDirection::Outgoing, "8080"), 1);

        let racers: Vec<_> = (0..2)
            .map(|_| {
                let t = tunnel.clone();
                thread::spawn(move || t.stop())
            })
            .collect();
        for r in racers {
            r.join().unwrap();
        }
        tunnel.stop();

        assert!(tunnel.is_stopped());
        assert_eq!(inner.tunnel_count(TunnelDirection::Outgoing, "8080"), 0);
        // lets the downstream pump finish
        drop(resp_snd);
    }

    #[test]
    fn both_pumps_ending_stops_the_tunnel() {
        let (session, _rqst) = SessionHandle::detached();
        let inner = Arc::new(Inner::new(session.clone(), EventDispatcher::default()));
        let (resp_snd, resp_rcv) = mpsc::channel();
        let channel = ChannelHandle::new(4, resp_rcv, session);
        let (local, far) = socket_pair();

        let tunnel = ActiveTunnel::start(
            &inner,
            TunnelDirection::Incoming,
            "x11",
            "unix".to_owned(),
            local,
            channel,
        )
        .unwrap();

        // the far end of the socket goes away and so does the channel
        drop(far);
        drop(resp_snd);
        for _ in 0..200 {
            if tunnel.is_stopped() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(tunnel.is_stopped());
        assert_eq!(inner.tunnel_count(TunnelDirection::Incoming, "x11"), 0);
    }

    #[test]
    fn channel_close_stops_the_tunnel() {
        let (session, _rqst) = SessionHandle::detached();
        let inner = Arc::new(Inner::new(session.clone(), EventDispatcher::default()));
        let (resp_snd, resp_rcv) = mpsc::channel();
        let channel = ChannelHandle::new(5, resp_rcv, session);
        let (local, mut far) = socket_pair();
        far.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let tunnel = ActiveTunnel::start(
            &inner,
            TunnelDirection::Outgoing,
            "2222",
            "127.0.0.1:22".to_owned(),
            local,
            channel,
        )
        .unwrap();

        // the far end of the socket stays open, only the peer closes
        resp_snd.send(BackendResp::Close).unwrap();
        for _ in 0..200 {
            if tunnel.is_stopped() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(tunnel.is_stopped());
        assert_eq!(inner.tunnel_count(TunnelDirection::Outgoing, "2222"), 0);

        // the local socket was shut down with it
        let mut buf = [0_u8; 1];
        assert_eq!(far.read(&mut buf).unwrap(), 0);
    }
}
