use ring::signature;

use super::PublicKey;
use crate::SshResult;

pub(crate) struct Ed25519;

impl PublicKey for Ed25519 {
    fn verify_signature(&self, ks: &[u8], message: &[u8], sig: &[u8]) -> SshResult<bool> {
        let host_key = super::key_fields(ks, "ssh-ed25519")?.get_u8s()?;
        let sig = super::parse_signature(sig, "ssh-ed25519")?;
        let pub_key = signature::UnparsedPublicKey::new(&signature::ED25519, host_key);
        Ok(pub_key.verify(message, &sig).is_ok())
    }
}
