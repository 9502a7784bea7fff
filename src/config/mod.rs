pub(crate) mod algorithm;
pub(crate) mod auth;
pub(crate) mod version;

use std::sync::Arc;
use std::time::Duration;

use crate::algorithm::public_key::KeyPair;
use crate::algorithm::ComponentRegistry;
use crate::constant::{rekey, size};
use crate::event::EventDispatcher;
use crate::verifier::{AcceptAll, HostKeyVerifier};

/// Thresholds that make the transport renegotiate its keys
///
/// Counted per direction since the last key exchange; whichever is hit first
/// starts a new one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RekeyPolicy {
    pub max_bytes: u64,
    pub max_packets: u64,
}

impl Default for RekeyPolicy {
    fn default() -> Self {
        Self {
            max_bytes: rekey::ONE_GB,
            max_packets: rekey::MAX_PACKETS,
        }
    }
}

/// Window and packet size advertised for channels we open or accept
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelDefaults {
    pub window_size: u32,
    pub max_packet: u32,
}

impl Default for ChannelDefaults {
    fn default() -> Self {
        Self {
            window_size: size::LOCAL_WINDOW_SIZE,
            max_packet: size::BUF_SIZE as u32,
        }
    }
}

#[derive(Clone)]
pub(crate) struct Config {
    pub ver: version::SshVersion,
    pub auth: auth::AuthInfo,
    pub algs: algorithm::AlgorithmPreferences,
    pub rekey: RekeyPolicy,
    pub channel: ChannelDefaults,
    pub timeout: Option<Duration>,
    pub registry: ComponentRegistry,
    /// give every connection its own copy of the registry
    pub clone_registry: bool,
    pub verifier: Arc<dyn HostKeyVerifier>,
    pub events: EventDispatcher,
    /// the name the host key is verified against
    pub host: String,
    /// only used in the server role
    pub host_key: Option<KeyPair>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ver: version::SshVersion::default(),
            auth: auth::AuthInfo::default(),
            algs: algorithm::AlgorithmPreferences::default(),
            rekey: RekeyPolicy::default(),
            channel: ChannelDefaults::default(),
            timeout: Some(Duration::from_secs(30)),
            registry: ComponentRegistry::default(),
            clone_registry: false,
            verifier: Arc::new(AcceptAll),
            events: EventDispatcher::default(),
            host: String::new(),
            host_key: None,
        }
    }
}

impl Config {
    /// the registry one connection negotiates from
    pub fn connection_registry(&self) -> ComponentRegistry {
        if self.clone_registry {
            self.registry.deep_clone()
        } else {
            self.registry.clone()
        }
    }
}
