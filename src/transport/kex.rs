use std::io::{Read, Write};
use std::str::FromStr;

use tracing::*;

use crate::{
    algorithm::{
        encryption::CipherMode,
        hash::{self, Direction, HashCtx, KeySizes, SessionKeys},
        key_exchange::KeyExchange,
        PubKey,
    },
    config::algorithm::{AlgList, NegotiatedAlgorithms},
    constant::ssh_transport_code,
    error::{SshError, SshResult},
    event::SshEvent,
    model::Data,
    util,
    verifier::fingerprint,
};

use super::codec::DirectionKeys;
use super::{Role, Transport};

/// Where a key exchange round stands
///
/// A re-key goes from `Established` back to `KexInitSent` or
/// `KexInitReceived`, the channels stay open meanwhile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KexPhase {
    Idle,
    KexInitSent,
    KexInitReceived,
    AlgorithmsNegotiated,
    KexInProgress,
    NewKeysPending,
    Established,
}

/// The bookkeeping of the running round, reset once it completes
pub(crate) struct KexState {
    pub phase: KexPhase,
    local_init: Option<Vec<u8>>,
    remote_init: Option<Vec<u8>>,
    negotiated: Option<NegotiatedAlgorithms>,
    exchange: Option<Box<dyn KeyExchange>>,
    /// installed when the peer's NEWKEYS arrives
    inbound_keys: Option<DirectionKeys>,
    /// the peer guessed wrong and its next kex packet must be dropped
    ignore_next: bool,
    newkeys_sent: bool,
    rounds: u32,
}

impl KexState {
    pub fn new() -> Self {
        Self {
            phase: KexPhase::Idle,
            local_init: None,
            remote_init: None,
            negotiated: None,
            exchange: None,
            inbound_keys: None,
            ignore_next: false,
            newkeys_sent: false,
            rounds: 0,
        }
    }

    /// our side must not send anything but transport messages
    pub fn holds_back(&self) -> bool {
        self.local_init.is_some() && !self.newkeys_sent
    }

    /// completed key exchanges
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// the peer sent KEXINIT but not yet NEWKEYS
    pub fn peer_in_kex(&self) -> bool {
        self.remote_init.is_some()
    }

    fn reset(&mut self) {
        self.local_init = None;
        self.remote_init = None;
        self.negotiated = None;
        self.exchange = None;
        self.inbound_keys = None;
        self.ignore_next = false;
        self.newkeys_sent = false;
    }
}

fn kex_error(err_msg: String) -> SshError {
    error!(err_msg);
    SshError::KexError(err_msg)
}

impl<S> Transport<S>
where
    S: Read + Write,
{
    /// send our KEXINIT unless this round already did
    pub(super) fn start_kex(&mut self) -> SshResult<()> {
        if self.kex.local_init.is_some() {
            return Ok(());
        }
        info!("start for key negotiation.");
        let host_keys = match self.role {
            Role::Client => None,
            Role::Server => match &self.config.host_key {
                Some(key) => Some(
                    key.algorithms()
                        .iter()
                        .map(|x| x.as_ref().to_owned())
                        .collect::<Vec<String>>(),
                ),
                None => return Err(kex_error("The server role needs a host key".to_owned())),
            },
        };
        let offer = AlgList::from_registry(&self.registry, &self.config.algs, host_keys.as_deref());
        debug!("our algorithms: [{:?}]", offer);
        let payload = offer.as_kexinit();
        self.write_packet(&payload)?;
        self.kex.local_init = Some(payload.into_inner());
        self.kex.phase = KexPhase::KexInitSent;
        if self.kex.remote_init.is_some() {
            self.negotiate_round()?;
        }
        Ok(())
    }

    pub(super) fn on_kex_message(&mut self, mut data: Data) -> SshResult<()> {
        let code = data.first().copied().unwrap_or_default();
        if code != ssh_transport_code::KEXINIT && code != ssh_transport_code::NEWKEYS && self.kex.ignore_next {
            debug!("Drop the wrongly guessed kex packet {}", code);
            self.kex.ignore_next = false;
            return Ok(());
        }
        match code {
            ssh_transport_code::KEXINIT => {
                if self.kex.remote_init.is_some() {
                    let err_msg = "KEXINIT received twice in one key exchange".to_owned();
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                }
                self.kex.remote_init = Some(data.to_vec());
                if self.kex.local_init.is_none() {
                    // the peer started a re-key
                    self.start_kex()
                } else {
                    self.kex.phase = KexPhase::KexInitReceived;
                    self.negotiate_round()
                }
            }
            ssh_transport_code::KEXDH_INIT if self.role == Role::Server => {
                data.get_u8()?;
                let e = data.get_u8s()?;
                self.reply_exchange(e)
            }
            ssh_transport_code::KEXDH_REPLY if self.role == Role::Client => {
                data.get_u8()?;
                self.verify_reply(data)
            }
            ssh_transport_code::NEWKEYS => self.on_newkeys(),
            x => {
                let err_msg = format!("unexpected key exchange message {} in {:?}", x, self.kex.phase);
                error!(err_msg);
                Err(SshError::ProtocolViolation(err_msg))
            }
        }
    }

    fn negotiate_round(&mut self) -> SshResult<()> {
        let (Some(local_init), Some(remote_init)) = (&self.kex.local_init, &self.kex.remote_init) else {
            return Ok(());
        };
        let (local, _) = AlgList::from_kexinit(local_init)?;
        let (remote, follows) = AlgList::from_kexinit(remote_init)?;
        debug!("peer algorithms: [{:?}]", remote);

        let (client, server) = match self.role {
            Role::Client => (&local, &remote),
            Role::Server => (&remote, &local),
        };
        let registry = &self.registry;
        let negotiated = AlgList::negotiate(client, server, |name| {
            registry
                .ciphers()
                .instantiate(name)
                .map(|c| c.is_aead())
                .unwrap_or(false)
        })?;

        if follows {
            let guessed = remote.key_exchange.first() == Some(&negotiated.kex)
                && remote.public_key.first() == Some(&negotiated.host_key);
            if !guessed {
                info!("The peer guessed the wrong algorithms, its first kex packet is ignored");
                self.kex.ignore_next = true;
            }
        }
        self.kex.phase = KexPhase::AlgorithmsNegotiated;

        let exchange = self
            .registry
            .key_exchanges()
            .instantiate(&negotiated.kex)
            .map_err(|e| kex_error(e.to_string()))?;
        if self.role == Role::Client {
            let mut data = Data::new();
            data.put_u8(ssh_transport_code::KEXDH_INIT);
            if exchange.public_is_mpint() {
                data.put_mpint(exchange.public_key());
            } else {
                data.put_u8s(exchange.public_key());
            }
            self.write_packet(&data)?;
        }
        self.kex.exchange = Some(exchange);
        self.kex.negotiated = Some(negotiated);
        self.kex.phase = KexPhase::KexInProgress;
        Ok(())
    }

    /// H = hash(V_C || V_S || I_C || I_S || K_S || e || f || K)
    fn exchange_hash(&self, k_s: &[u8], e: &[u8], f: &[u8], k: &[u8]) -> SshResult<Vec<u8>> {
        let (Some(exchange), Some(local_init), Some(remote_init)) =
            (&self.kex.exchange, &self.kex.local_init, &self.kex.remote_init)
        else {
            return Err(kex_error("The key exchange has not been negotiated".to_owned()));
        };
        let ver = &self.config.ver;
        let mpint = exchange.public_is_mpint();
        let mut ctx = HashCtx::new();
        match self.role {
            Role::Client => {
                ctx.set_v_c(ver.ours());
                ctx.set_v_s(ver.theirs());
                ctx.set_i_c(local_init);
                ctx.set_i_s(remote_init);
            }
            Role::Server => {
                ctx.set_v_c(ver.theirs());
                ctx.set_v_s(ver.ours());
                ctx.set_i_c(remote_init);
                ctx.set_i_s(local_init);
            }
        }
        ctx.set_k_s(k_s);
        ctx.set_e(e, mpint);
        ctx.set_f(f, mpint);
        ctx.set_k(k);
        let digest = self
            .registry
            .digests()
            .instantiate(exchange.digest().as_ref())
            .map_err(|e| kex_error(e.to_string()))?;
        Ok(hash::digest(digest, &ctx.as_bytes()))
    }

    /// client: check the server's KEXDH_REPLY, then switch our keys
    fn verify_reply(&mut self, mut data: Data) -> SshResult<()> {
        let k_s = data.get_u8s()?;
        let f = data.get_u8s()?;
        let sig = data.get_u8s()?;

        let (k, e) = match self.kex.exchange.as_mut() {
            Some(exchange) => (exchange.shared_secret(&f)?, exchange.public_key().to_vec()),
            None => return Err(kex_error("KEXDH_REPLY before the negotiation".to_owned())),
        };
        let h = self.exchange_hash(&k_s, &e, &f, &k)?;

        let host_key_alg = match &self.kex.negotiated {
            Some(n) => n.host_key.clone(),
            None => return Err(kex_error("KEXDH_REPLY before the negotiation".to_owned())),
        };
        let verifier = self
            .registry
            .host_keys()
            .instantiate(&host_key_alg)
            .map_err(|e| kex_error(e.to_string()))?;
        if !verifier.verify_signature(&k_s, &h, &sig)? {
            return Err(kex_error("signature verification failure.".to_owned()));
        }
        info!("signature verification success.");

        let host = self.config.host.clone();
        let policy = self.config.verifier.clone();
        let trusted = util::guarded("host key verifier", || {
            policy.verify(&host, &host_key_alg, &k_s)
        });
        if trusted != Some(true) {
            let reason = format!("{} key {} is not trusted", host_key_alg, fingerprint(&k_s));
            error!("Host key of {} was rejected: {}", host, reason);
            return Err(SshError::HostKeyVerificationFailed { host, reason });
        }

        self.finish_exchange(&k, &h)
    }

    /// server: answer the client's KEXDH_INIT with our host key signature
    fn reply_exchange(&mut self, e: Vec<u8>) -> SshResult<()> {
        let (k, f, mpint) = match self.kex.exchange.as_mut() {
            Some(exchange) => (
                exchange.shared_secret(&e)?,
                exchange.public_key().to_vec(),
                exchange.public_is_mpint(),
            ),
            None => return Err(kex_error("KEXDH_INIT before the negotiation".to_owned())),
        };
        let (Some(key), Some(negotiated)) = (&self.config.host_key, &self.kex.negotiated) else {
            return Err(kex_error("The server role needs a host key".to_owned()));
        };
        let k_s = key.public_blob()?;
        let alg = PubKey::from_str(&negotiated.host_key)
            .map_err(|_| SshError::unsupported("host key", &negotiated.host_key))?;
        let h = self.exchange_hash(&k_s, &e, &f, &k)?;
        let sig = key.sign(alg, &h)?;

        let mut data = Data::new();
        data.put_u8(ssh_transport_code::KEXDH_REPLY).put_u8s(&k_s);
        if mpint {
            data.put_mpint(&f);
        } else {
            data.put_u8s(&f);
        }
        data.put_u8s(&sig);
        self.write_packet(&data)?;

        self.finish_exchange(&k, &h)
    }

    fn direction_keys(
        &self,
        keys: &SessionKeys,
        direction: Direction,
        mode: CipherMode,
    ) -> SshResult<DirectionKeys> {
        let Some(n) = &self.kex.negotiated else {
            return Err(kex_error("No negotiated algorithms".to_owned()));
        };
        let (enc, mac, comp) = match direction {
            Direction::ClientToServer => (&n.enc_c2s, &n.mac_c2s, &n.comp_c2s),
            Direction::ServerToClient => (&n.enc_s2c, &n.mac_s2c, &n.comp_s2c),
        };
        let (iv, ek, ik) = keys.of(direction);

        let mut cipher = self.registry.ciphers().instantiate(enc)?;
        cipher.init(mode, ek, iv)?;
        let mac = match mac {
            Some(name) => {
                let mut mac = self.registry.macs().instantiate(name)?;
                mac.init(ik);
                Some(mac)
            }
            None => None,
        };
        let compress = self.registry.compressions().instantiate(comp)?;
        Ok(DirectionKeys {
            cipher,
            mac,
            compress,
        })
    }

    fn key_sizes(&self) -> SshResult<KeySizes> {
        let Some(n) = &self.kex.negotiated else {
            return Err(kex_error("No negotiated algorithms".to_owned()));
        };
        let ciphers = self.registry.ciphers();
        let (c2s, s2c) = (ciphers.instantiate(&n.enc_c2s)?, ciphers.instantiate(&n.enc_s2c)?);
        let mac_size = |name: &Option<String>| -> SshResult<usize> {
            match name {
                Some(name) => Ok(self.registry.macs().instantiate(name)?.key_size()),
                None => Ok(0),
            }
        };
        Ok(KeySizes {
            iv_c_s: c2s.iv_size(),
            iv_s_c: s2c.iv_size(),
            ek_c_s: c2s.key_size(),
            ek_s_c: s2c.key_size(),
            ik_c_s: mac_size(&n.mac_c2s)?,
            ik_s_c: mac_size(&n.mac_s2c)?,
        })
    }

    /// derive the keys, send NEWKEYS and switch the outbound direction
    fn finish_exchange(&mut self, k: &[u8], h: &[u8]) -> SshResult<()> {
        let session_id = self.session_id.get_or_insert_with(|| h.to_vec()).clone();
        let digest = match &self.kex.exchange {
            Some(exchange) => self.registry.digests().factory(exchange.digest().as_ref())?,
            None => return Err(kex_error("No key exchange algorithm".to_owned())),
        };
        let keys = SessionKeys::derive(&digest, k, h, &session_id, self.key_sizes()?)?;

        let (out_dir, in_dir) = match self.role {
            Role::Client => (Direction::ClientToServer, Direction::ServerToClient),
            Role::Server => (Direction::ServerToClient, Direction::ClientToServer),
        };
        let outbound = self.direction_keys(&keys, out_dir, CipherMode::Encrypt)?;
        let inbound = self.direction_keys(&keys, in_dir, CipherMode::Decrypt)?;
        drop(keys);

        let mut data = Data::new();
        data.put_u8(ssh_transport_code::NEWKEYS);
        info!("send new keys");
        self.write_packet(&data)?;
        self.codec.install_outbound(outbound);
        self.kex.inbound_keys = Some(inbound);
        self.kex.newkeys_sent = true;
        self.kex.phase = KexPhase::NewKeysPending;
        self.flush_queued()
    }

    fn on_newkeys(&mut self) -> SshResult<()> {
        let Some(inbound) = self.kex.inbound_keys.take() else {
            let err_msg = format!("NEWKEYS received in {:?}", self.kex.phase);
            error!(err_msg);
            return Err(SshError::ProtocolViolation(err_msg));
        };
        self.codec.install_inbound(inbound);

        let rekey = self.kex.rounds > 0;
        self.kex.rounds += 1;
        self.negotiated = self.kex.negotiated.take();
        self.kex.reset();
        self.kex.phase = KexPhase::Established;

        let kex = self
            .negotiated
            .as_ref()
            .map(|n| n.kex.clone())
            .unwrap_or_default();
        info!("key negotiation successful, kex: {}, re-key: {}", kex, rekey);
        self.config
            .events
            .emit(&SshEvent::KexCompleted { kex, rekey });
        Ok(())
    }
}
