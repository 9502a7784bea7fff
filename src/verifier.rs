use std::collections::HashMap;
use std::sync::Mutex;

use ring::constant_time::verify_slices_are_equal;
use ssh_key::HashAlg;
use tracing::*;

/// Decides whether the host key a server presented is trusted.
///
/// Called once per key exchange, after the signature over the exchange hash
/// was checked. `key_blob` is the raw `K_S` of the server. Returning false, or
/// panicking, aborts the connection with `HostKeyVerificationFailed`.
pub trait HostKeyVerifier: Send + Sync {
    fn verify(&self, host: &str, algorithm: &str, key_blob: &[u8]) -> bool;
}

impl<F> HostKeyVerifier for F
where
    F: Fn(&str, &str, &[u8]) -> bool + Send + Sync,
{
    fn verify(&self, host: &str, algorithm: &str, key_blob: &[u8]) -> bool {
        self(host, algorithm, key_blob)
    }
}

/// Trust every host key
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl HostKeyVerifier for AcceptAll {
    fn verify(&self, host: &str, algorithm: &str, key_blob: &[u8]) -> bool {
        warn!(
            "Accepting {} host key {} of {} without verification",
            algorithm,
            fingerprint(key_blob),
            host
        );
        true
    }
}

/// In-memory table of the host keys we know
///
/// A host whose key differs from the recorded one is always rejected. Unknown
/// hosts are rejected too, unless trust on first use is enabled, in which case
/// their key is recorded.
#[derive(Debug, Default)]
pub struct KnownHosts {
    keys: Mutex<HashMap<String, Vec<u8>>>,
    tofu: bool,
}

impl KnownHosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// record the key of unknown hosts instead of rejecting them
    pub fn trust_on_first_use(mut self, enable: bool) -> Self {
        self.tofu = enable;
        self
    }

    pub fn add<H>(&self, host: H, key_blob: &[u8])
    where
        H: ToString,
    {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.to_string(), key_blob.to_vec());
    }

    pub fn get(&self, host: &str) -> Option<Vec<u8>> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .cloned()
    }
}

impl HostKeyVerifier for KnownHosts {
    fn verify(&self, host: &str, algorithm: &str, key_blob: &[u8]) -> bool {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        match keys.get(host) {
            Some(known) if verify_slices_are_equal(known, key_blob).is_ok() => {
                debug!("Host key of {} matches the known one", host);
                true
            }
            Some(known) => {
                error!(
                    "Host key of {} has changed from {} to {}",
                    host,
                    fingerprint(known),
                    fingerprint(key_blob)
                );
                false
            }
            None if self.tofu => {
                info!(
                    "Learning {} host key {} of {}",
                    algorithm,
                    fingerprint(key_blob),
                    host
                );
                keys.insert(host.to_owned(), key_blob.to_vec());
                true
            }
            None => {
                error!("Host {} is unknown", host);
                false
            }
        }
    }
}

/// `SHA256:...` fingerprint of a public key blob, hex when it can not be parsed
pub fn fingerprint(key_blob: &[u8]) -> String {
    match ssh_key::PublicKey::from_bytes(key_blob) {
        Ok(key) => key.fingerprint(HashAlg::Sha256).to_string(),
        Err(_) => hex::encode(key_blob),
    }
}
