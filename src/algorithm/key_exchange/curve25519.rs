use ring::agreement::{EphemeralPrivateKey, PublicKey, UnparsedPublicKey, X25519};

use super::KeyExchange;
use crate::algorithm::DigestAlg;
use crate::error::SshError;
use crate::SshResult;

/// curve25519-sha256 and curve25519-sha256@libssh.org
pub(crate) struct Curve25519 {
    private_key: Option<EphemeralPrivateKey>,
    public_key: PublicKey,
}

impl Curve25519 {
    pub fn new() -> SshResult<Self> {
        let rng = ring::rand::SystemRandom::new();
        let private_key = EphemeralPrivateKey::generate(&X25519, &rng)
            .map_err(|e| SshError::KexError(e.to_string()))?;
        let public_key = private_key
            .compute_public_key()
            .map_err(|e| SshError::KexError(e.to_string()))?;
        Ok(Curve25519 {
            private_key: Some(private_key),
            public_key,
        })
    }
}

impl KeyExchange for Curve25519 {
    fn digest(&self) -> DigestAlg {
        DigestAlg::Sha256
    }

    fn public_key(&self) -> &[u8] {
        self.public_key.as_ref()
    }

    fn shared_secret(&mut self, peer: &[u8]) -> SshResult<Vec<u8>> {
        if peer.len() != 32 {
            return Err(SshError::KexError(format!(
                "curve25519 public key must be 32 bytes, got {}",
                peer.len()
            )));
        }
        let peer = UnparsedPublicKey::new(&X25519, peer);
        super::agree_ephemeral(self.private_key.take(), &peer)
    }
}
