use std::{
    collections::hash_map::Entry,
    net::TcpStream,
    sync::{Arc, Weak},
    thread,
};

use tracing::*;

use crate::{
    channel::{ChannelKind, IncomingChannel},
    constant::{ssh_str, ssh_str::FORWARDED_TCPIP},
    error::{OpenFailureReason, SshError, SshResult},
    event::SshEvent,
    model::Data,
};

use super::{aggregate, generate_key, ActiveTunnel, ForwardingClient, Inner, TunnelDirection};

/// A port the server listens on for us
#[derive(Clone, Debug)]
pub(super) struct RemoteForwarding {
    bind_host: String,
    bind_port: u16,
    dest_host: String,
    dest_port: u16,
}

fn forward_payload(bind_host: &str, bind_port: u16) -> Data {
    let mut data = Data::new();
    data.put_str(bind_host).put_u32(bind_port as u32);
    data
}

/// the registration a forwarded-tcpip channel belongs to
fn lookup(owner: &Inner, address: &str, port: u16) -> Option<(String, RemoteForwarding)> {
    let table = owner.remote.lock().unwrap_or_else(|e| e.into_inner());
    [generate_key(address, port), generate_key("", port)]
        .into_iter()
        .find_map(|key| table.get(&key).map(|r| (key, r.clone())))
}

/// runs on the backend, the connect happens on a thread of its own
fn on_forwarded_open(owner: &Weak<Inner>, incoming: IncomingChannel) {
    let Some(owner) = owner.upgrade() else {
        return;
    };
    let ChannelKind::ForwardedTcpip {
        connected_address,
        connected_port,
        originator_address,
        originator_port,
    } = incoming.kind().clone()
    else {
        return;
    };
    let Some((key, forwarding)) = lookup(&owner, &connected_address, connected_port as u16) else {
        warn!(
            "Server forwarded {}:{} which we never asked for",
            connected_address, connected_port
        );
        let _ = incoming.reject(
            OpenFailureReason::AdministrativelyProhibited,
            "no such forwarding",
        );
        return;
    };
    let peer = format!("{}:{}", originator_address, originator_port);

    let spawned = thread::Builder::new()
        .name(format!("remote-{}", key))
        .spawn(move || {
            let destination = (forwarding.dest_host.as_str(), forwarding.dest_port);
            let socket = match TcpStream::connect(destination) {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("Connect {:?} for {} failed: {}", destination, key, e);
                    let _ = incoming.reject(OpenFailureReason::ConnectFailed, &e.to_string());
                    return;
                }
            };
            let started = incoming.accept().and_then(|channel| {
                ActiveTunnel::start(&owner, TunnelDirection::Incoming, &key, peer, socket, channel)
            });
            if let Err(e) = started {
                warn!("Remote forwarding {} tunnel failed: {}", key, e);
            }
        });
    if let Err(e) = spawned {
        error!("Can not start a tunnel thread: {}", e);
    }
}

impl ForwardingClient {
    fn install_remote_handler(&self) -> SshResult<()> {
        let mut installed = self
            .inner
            .remote_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !*installed {
            let owner = Arc::downgrade(&self.inner);
            self.inner.session().set_channel_open_handler(
                FORWARDED_TCPIP,
                Some(move |incoming: IncomingChannel| on_forwarded_open(&owner, incoming)),
            )?;
            *installed = true;
        }
        Ok(())
    }

    /// Ask the server to listen on `bind_host:bind_port` and forward every
    /// connection to `dest_host:dest_port` on our side.
    ///
    /// Port 0 lets the server pick; the port actually listened on is returned.
    pub fn request_remote_forwarding(
        &self,
        bind_host: &str,
        bind_port: u16,
        dest_host: &str,
        dest_port: u16,
    ) -> SshResult<u16> {
        let registration = |port: u16| RemoteForwarding {
            bind_host: bind_host.to_owned(),
            bind_port: port,
            dest_host: dest_host.to_owned(),
            dest_port,
        };
        // a fixed port is reserved before asking, so a second request for it
        // fails right away instead of replacing this one
        let reserved = if bind_port != 0 {
            let key = generate_key(bind_host, bind_port);
            match self
                .inner
                .remote
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(key.clone())
            {
                Entry::Occupied(_) => {
                    let err_msg = format!("remote forwarding {} is already registered", key);
                    error!(err_msg);
                    return Err(SshError::ForwardingError(err_msg));
                }
                Entry::Vacant(v) => {
                    v.insert(registration(bind_port));
                }
            }
            Some(key)
        } else {
            None
        };

        let port = match self.ask_remote_forwarding(bind_host, bind_port) {
            Ok(port) => port,
            Err(e) => {
                if let Some(key) = &reserved {
                    self.inner
                        .remote
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(key);
                }
                return Err(e);
            }
        };

        let key = generate_key(bind_host, port);
        if reserved.is_none() {
            match self
                .inner
                .remote
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(key.clone())
            {
                Entry::Occupied(_) => {
                    let err_msg = format!("server assigned {} which is already registered", key);
                    error!(err_msg);
                    return Err(SshError::ForwardingError(err_msg));
                }
                Entry::Vacant(v) => {
                    v.insert(registration(port));
                }
            }
        }
        info!(
            "Remote forwarding {} -> {}:{} accepted",
            key, dest_host, dest_port
        );
        self.inner
            .events()
            .emit(&SshEvent::ForwardingStarted { key, remote: true });
        Ok(port)
    }

    /// send `tcpip-forward`, returns the port the server listens on
    fn ask_remote_forwarding(&self, bind_host: &str, bind_port: u16) -> SshResult<u16> {
        self.install_remote_handler()?;

        let payload = forward_payload(bind_host, bind_port);
        let Some(reply) = self
            .inner
            .session()
            .global_request(ssh_str::TCPIP_FORWARD, &payload)?
        else {
            let err_msg = format!(
                "server refused to listen on {}",
                generate_key(bind_host, bind_port)
            );
            error!(err_msg);
            return Err(SshError::ForwardingError(err_msg));
        };
        if bind_port == 0 {
            Ok(Data::from(reply).get_u32()? as u16)
        } else {
            Ok(bind_port)
        }
    }

    /// withdraw a remote forwarding and tear down its tunnels
    pub fn cancel_remote_forwarding(&self, bind_host: &str, bind_port: u16) -> SshResult<()> {
        let key = generate_key(bind_host, bind_port);
        let forwarding = self
            .inner
            .remote
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        let Some(forwarding) = forwarding else {
            let err_msg = format!("no remote forwarding {}", key);
            error!(err_msg);
            return Err(SshError::ForwardingError(err_msg));
        };
        self.inner.stop_tunnels(TunnelDirection::Incoming, &key);

        let payload = forward_payload(&forwarding.bind_host, forwarding.bind_port);
        let accepted = self
            .inner
            .session()
            .global_request(ssh_str::CANCEL_TCPIP_FORWARD, &payload)?
            .is_some();

        self.inner.events().emit(&SshEvent::ForwardingStopped {
            key: key.clone(),
            remote: true,
        });
        if accepted {
            info!("Remote forwarding {} cancelled", key);
            Ok(())
        } else {
            let err_msg = format!("server refused to cancel {}", key);
            warn!(err_msg);
            Err(SshError::ForwardingError(err_msg))
        }
    }

    pub fn cancel_all_remote_forwarding(&self) -> SshResult<()> {
        let snapshot: Vec<(String, u16)> = self
            .inner
            .remote
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|r| (r.bind_host.clone(), r.bind_port))
            .collect();
        let failures: Vec<SshError> = snapshot
            .iter()
            .filter_map(|(host, port)| self.cancel_remote_forwarding(host, *port).err())
            .collect();
        aggregate("remote forwardings", snapshot.len(), failures)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::{
        model::{BackendResp, BackendRqst},
        session::SessionHandle,
    };

    #[test]
    fn cancel_unknown_forwarding_fails() {
        let (session, _rqst) = SessionHandle::detached();
        let forwarding = ForwardingClient::new(session);
        assert!(matches!(
            forwarding.cancel_remote_forwarding("", 9000),
            Err(SshError::ForwardingError(_))
        ));
        // nothing registered, nothing to fail
        assert!(forwarding.cancel_all_remote_forwarding().is_ok());
    }

    /// answer the next `tcpip-forward` the way `reply` says
    fn answer_forward(rqst: &mpsc::Receiver<BackendRqst>, reply: Option<u32>) {
        loop {
            if let BackendRqst::GlobalRequest {
                name,
                sender: Some(sender),
                ..
            } = rqst.recv().unwrap()
            {
                assert_eq!(name, ssh_str::TCPIP_FORWARD);
                let resp = match reply {
                    Some(port) => {
                        let mut data = Data::new();
                        data.put_u32(port);
                        BackendResp::Success(data)
                    }
                    None => BackendResp::Failure,
                };
                sender.send(resp).unwrap();
                return;
            }
        }
    }

    #[test]
    fn same_port_twice_is_refused() {
        let (session, rqst) = SessionHandle::detached();
        let forwarding = ForwardingClient::new(session);
        let first = {
            let forwarding = forwarding.clone();
            thread::spawn(move || forwarding.request_remote_forwarding("", 9000, "localhost", 80))
        };

        // the first request is still waiting for the server
        let mut waited = 0;
        while forwarding.remote_forwardings().is_empty() && waited < 500 {
            thread::sleep(std::time::Duration::from_millis(10));
            waited += 1;
        }
        assert!(matches!(
            forwarding.request_remote_forwarding("", 9000, "localhost", 81),
            Err(SshError::ForwardingError(_))
        ));

        answer_forward(&rqst, Some(0));
        assert_eq!(first.join().unwrap().unwrap(), 9000);
        assert_eq!(forwarding.remote_forwardings(), vec!["9000".to_owned()]);
    }

    #[test]
    fn refused_request_frees_the_key() {
        let (session, rqst) = SessionHandle::detached();
        let forwarding = ForwardingClient::new(session);
        let server = thread::spawn(move || {
            answer_forward(&rqst, None);
            answer_forward(&rqst, Some(0));
            answer_forward(&rqst, Some(40022));
            rqst
        });

        assert!(forwarding
            .request_remote_forwarding("", 9000, "localhost", 80)
            .is_err());
        assert!(forwarding.remote_forwardings().is_empty());
        assert_eq!(
            forwarding
                .request_remote_forwarding("", 9000, "localhost", 80)
                .unwrap(),
            9000
        );
        // port 0, the server picks one
        assert_eq!(
            forwarding
                .request_remote_forwarding("localhost", 0, "localhost", 80)
                .unwrap(),
            40022
        );
        let mut keys = forwarding.remote_forwardings();
        keys.sort();
        assert_eq!(keys, vec!["9000".to_owned(), "localhost:40022".to_owned()]);
        drop(server.join().unwrap());
    }

    #[test]
    fn lookup_falls_back_to_the_port() {
        let (session, _rqst) = SessionHandle::detached();
        let inner = Inner::new(session, crate::event::EventDispatcher::default());
        inner.remote.lock().unwrap().insert(
            "9000".to_owned(),
            RemoteForwarding {
                bind_host: String::new(),
                bind_port: 9000,
                dest_host: "localhost".to_owned(),
                dest_port: 80,
            },
        );
        let (key, found) = lookup(&inner, "0.0.0.0", 9000).unwrap();
        assert_eq!(key, "9000");
        assert_eq!(found.dest_port, 80);
        assert!(lookup(&inner, "0.0.0.0", 9001).is_none());
    }
}
