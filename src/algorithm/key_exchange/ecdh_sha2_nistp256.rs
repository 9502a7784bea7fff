use ring::agreement::{EphemeralPrivateKey, PublicKey, UnparsedPublicKey, ECDH_P256};

use super::KeyExchange;
use crate::algorithm::DigestAlg;
use crate::{SshError, SshResult};

/// ecdh-sha2-nistp256, the points travel uncompressed (65 bytes)
pub(crate) struct EcdhP256 {
    private_key: Option<EphemeralPrivateKey>,
    public_key: PublicKey,
}

impl EcdhP256 {
    pub fn new() -> SshResult<Self> {
        let rng = ring::rand::SystemRandom::new();
        let private_key = EphemeralPrivateKey::generate(&ECDH_P256, &rng)
            .map_err(|e| SshError::KexError(e.to_string()))?;
        let public_key = private_key
            .compute_public_key()
            .map_err(|e| SshError::KexError(e.to_string()))?;
        Ok(EcdhP256 {
            private_key: Some(private_key),
            public_key,
        })
    }
}

impl KeyExchange for EcdhP256 {
    fn digest(&self) -> DigestAlg {
        DigestAlg::Sha256
    }

    fn public_key(&self) -> &[u8] {
        self.public_key.as_ref()
    }

    fn shared_secret(&mut self, peer: &[u8]) -> SshResult<Vec<u8>> {
        let peer = UnparsedPublicKey::new(&ECDH_P256, peer);
        super::agree_ephemeral(self.private_key.take(), &peer)
    }
}
