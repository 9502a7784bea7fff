mod auth;
pub(crate) mod codec;
pub(crate) mod io;
mod kex;

pub use kex::KexPhase;

use std::collections::VecDeque;
use std::io::{Read, Write};

use tracing::*;

use crate::{
    algorithm::ComponentRegistry,
    config::{algorithm::NegotiatedAlgorithms, version::SshVersion, Config},
    constant::{ssh_disconnection_code, ssh_transport_code},
    error::{Phase, SshError, SshResult},
    event::SshEvent,
    model::{Data, Timeout},
};

use self::codec::PacketCodec;
use self::io::{try_read, write_with_timeout};
use self::kex::KexState;

const READ_CHUNK: usize = 16 * 1024;

/// Which end of the connection this transport plays
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// messages that may still be sent while a key exchange is running
fn allowed_during_kex(code: u8) -> bool {
    matches!(code, 1..=4 | 20..=49)
}

/// The SSH transport layer over one non-blocking stream
///
/// Transport messages (key exchange, ignore, debug, disconnect) are handled
/// here; everything else is handed to the caller in arrival order.
pub(crate) struct Transport<S>
where
    S: Read + Write,
{
    stream: S,
    role: Role,
    config: Config,
    registry: ComponentRegistry,
    codec: PacketCodec,
    kex: KexState,
    session_id: Option<Vec<u8>>,
    negotiated: Option<NegotiatedAlgorithms>,
    /// held back while a key exchange runs, sent after our NEWKEYS
    queued: VecDeque<Data>,
    authenticated: bool,
}

impl<S> Transport<S>
where
    S: Read + Write,
{
    pub fn new(stream: S, role: Role, config: Config) -> Self {
        let registry = config.connection_registry();
        Self {
            stream,
            role,
            config,
            registry,
            codec: PacketCodec::new(),
            kex: KexState::new(),
            session_id: None,
            negotiated: None,
            queued: VecDeque::new(),
            authenticated: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    pub fn negotiated(&self) -> Option<&NegotiatedAlgorithms> {
        self.negotiated.as_ref()
    }

    pub fn kex_phase(&self) -> KexPhase {
        self.kex.phase
    }

    pub fn kex_rounds(&self) -> u32 {
        self.kex.rounds()
    }

    /// the stage a failure at this point belongs to
    pub fn phase(&self) -> Phase {
        match self.kex.phase {
            KexPhase::Idle => Phase::Handshake,
            KexPhase::Established if self.authenticated => Phase::Connection,
            KexPhase::Established => Phase::Authentication,
            _ if self.session_id.is_none() => Phase::Handshake,
            _ => Phase::KeyExchange,
        }
    }

    /// version exchange then the first key exchange
    pub fn handshake(&mut self) -> SshResult<()> {
        let ver = SshVersion::exchange(&mut self.stream, self.config.timeout)?;
        self.config.ver = ver;
        self.start_kex()?;

        let mut timeout = Timeout::new(self.config.timeout);
        while self.kex.phase != KexPhase::Established {
            match self.recv()? {
                Some(mut data) => {
                    let code = data.get_u8()?;
                    let err_msg = format!("unexpected message {} before the key exchange", code);
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                }
                None => timeout.till_next_tick()?,
            }
        }
        Ok(())
    }

    /// send one message, holding it back while a key exchange is running
    pub fn send(&mut self, payload: Data) -> SshResult<()> {
        let code = payload.first().copied().unwrap_or_default();
        if self.kex.holds_back() && !allowed_during_kex(code) {
            trace!("queue message {} until the key exchange finished", code);
            self.queued.push_back(payload);
            return Ok(());
        }
        self.write_packet(&payload)?;
        self.check_rekey()
    }

    fn write_packet(&mut self, payload: &[u8]) -> SshResult<()> {
        let buf = self.codec.outbound.encode(payload)?;
        write_with_timeout(&mut self.stream, self.config.timeout, &buf)
    }

    fn flush_queued(&mut self) -> SshResult<()> {
        while let Some(payload) = self.queued.pop_front() {
            self.write_packet(&payload)?;
        }
        Ok(())
    }

    /// The next message for the upper layers, `None` if no complete one is
    /// available without blocking.
    pub fn recv(&mut self) -> SshResult<Option<Data>> {
        loop {
            if let Some(payload) = self.codec.inbound.decode()? {
                let handled = self.handle(payload);
                if let Err(e) = &handled {
                    if !matches!(self.kex.phase, KexPhase::Idle | KexPhase::Established) {
                        self.config.events.emit(&SshEvent::KexFailed {
                            reason: e.to_string(),
                        });
                    }
                }
                self.check_rekey()?;
                match handled? {
                    Some(payload) => return Ok(Some(payload)),
                    None => continue,
                }
            }
            let mut buf = [0_u8; READ_CHUNK];
            let len = try_read(&mut self.stream, &mut buf)?;
            if len == 0 {
                return Ok(None);
            }
            self.codec.inbound.feed(&buf[..len]);
        }
    }

    /// wait for the next message, up to the configured timeout
    pub fn recv_blocking(&mut self) -> SshResult<Data> {
        let mut timeout = Timeout::new(self.config.timeout);
        loop {
            if let Some(data) = self.recv()? {
                return Ok(data);
            }
            timeout.till_next_tick()?;
        }
    }

    fn handle(&mut self, mut payload: Data) -> SshResult<Option<Data>> {
        let code = payload.first().copied().unwrap_or_default();
        match code {
            ssh_transport_code::DISCONNECT => {
                payload.get_u8()?;
                let reason = payload.get_u32()?;
                let description = payload.get_string().unwrap_or_default();
                let err_msg = format!("{} (reason {})", description, reason);
                warn!("Peer disconnected: {}", err_msg);
                Err(SshError::Disconnected(err_msg))
            }
            ssh_transport_code::IGNORE => Ok(None),
            ssh_transport_code::DEBUG => {
                payload.get_u8()?;
                let _always_display = payload.get_bool()?;
                debug!("Peer debug message: {}", payload.get_string().unwrap_or_default());
                Ok(None)
            }
            ssh_transport_code::UNIMPLEMENTED => {
                payload.get_u8()?;
                warn!("Peer does not implement our packet {}", payload.get_u32()?);
                Ok(None)
            }
            ssh_transport_code::EXT_INFO => {
                debug!("Ignore the extension info");
                Ok(None)
            }
            ssh_transport_code::KEXINIT..=49 => {
                self.on_kex_message(payload)?;
                Ok(None)
            }
            _ => {
                if self.kex.peer_in_kex() {
                    let err_msg = format!("message {} in the middle of a key exchange", code);
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                }
                Ok(Some(payload))
            }
        }
    }

    fn check_rekey(&mut self) -> SshResult<()> {
        if self.kex.phase != KexPhase::Established {
            return Ok(());
        }
        let policy = &self.config.rekey;
        let (out, inb) = (self.codec.outbound_counter(), self.codec.inbound_counter());
        if out.bytes >= policy.max_bytes
            || inb.bytes >= policy.max_bytes
            || out.packets >= policy.max_packets
            || inb.packets >= policy.max_packets
        {
            info!(
                "re-key threshold reached, out: {:?}, in: {:?}",
                out, inb
            );
            self.start_kex()?;
        }
        Ok(())
    }

    /// start a new key exchange now, a no-op while one is running
    pub fn rekey(&mut self) -> SshResult<()> {
        if self.kex.phase == KexPhase::Established {
            self.start_kex()?;
        }
        Ok(())
    }

    /// a message the peer sent us is not understood
    pub fn unimplemented(&mut self) -> SshResult<()> {
        let seq = self.codec.inbound_sequence().wrapping_sub(1);
        let mut data = Data::new();
        data.put_u8(ssh_transport_code::UNIMPLEMENTED).put_u32(seq);
        self.send(data)
    }

    pub fn enable_delayed_compression(&mut self) {
        self.authenticated = true;
        self.codec.enable_delayed_compression();
    }

    /// say goodbye, errors are ignored as the connection is going away
    pub fn disconnect(&mut self, description: &str) {
        let mut data = Data::new();
        data.put_u8(ssh_transport_code::DISCONNECT)
            .put_u32(ssh_disconnection_code::BY_APPLICATION)
            .put_str(description)
            .put_str("");
        if let Err(e) = self.write_packet(&data) {
            debug!("Failed to send disconnect: {}", e);
        }
    }

    pub(crate) fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn role(&self) -> Role {
        self.role
    }
}
