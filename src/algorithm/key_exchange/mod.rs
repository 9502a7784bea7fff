use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey};
use tracing::*;

use crate::algorithm::DigestAlg;
use crate::{SshError, SshResult};

/// # 密钥交换方法
///
/// 密钥交换方法规定如何生成用于加密和验证的一次性会话密钥，以及如何进行服务器验证。
///
mod curve25519;
mod dh;
mod ecdh_sha2_nistp256;

pub(crate) use curve25519::Curve25519;
pub(crate) use dh::DhGroup14;
pub(crate) use ecdh_sha2_nistp256::EcdhP256;

/// One ephemeral key agreement, both roles use the same instance shape:
/// publish [KeyExchange::public_key], then feed the peer value to
/// [KeyExchange::shared_secret] exactly once.
pub trait KeyExchange: Send {
    /// the digest used for the exchange hash and key derivation
    fn digest(&self) -> DigestAlg;
    fn public_key(&self) -> &[u8];
    /// finite field groups send `mpint e`, curves send `string Q_C`
    fn public_is_mpint(&self) -> bool {
        false
    }
    /// the raw shared secret K, big endian
    fn shared_secret(&mut self, peer: &[u8]) -> SshResult<Vec<u8>>;
}

pub(crate) fn agree_ephemeral<B: AsRef<[u8]>>(
    private_key: Option<EphemeralPrivateKey>,
    peer_public_key: &UnparsedPublicKey<B>,
) -> SshResult<Vec<u8>> {
    let Some(private_key) = private_key else {
        let err_msg = "The ephemeral key has already been used".to_owned();
        error!(err_msg);
        return Err(SshError::KexError(err_msg));
    };
    agreement::agree_ephemeral(private_key, peer_public_key, |key_material| {
        key_material.to_vec()
    })
    .map_err(|_| {
        let err_msg = "Key agreement failed, the peer public key is invalid".to_owned();
        error!(err_msg);
        SshError::KexError(err_msg)
    })
}
