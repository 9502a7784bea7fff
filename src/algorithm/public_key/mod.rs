use tracing::*;

use crate::model::Data;
use crate::{SshError, SshResult};

mod ed25519;
mod key_pair;
mod rsa;

pub(crate) use self::ed25519::Ed25519;
pub(crate) use self::rsa::{RsaSha256, RsaSha512};
pub use key_pair::KeyPair;

/// # 公钥算法
/// 主要用于对服务端签名的验证
pub trait PublicKey: Send {
    /// `key_blob` is the raw K_S, `sig_blob` is `string alg || string signature`
    fn verify_signature(&self, key_blob: &[u8], message: &[u8], sig_blob: &[u8])
        -> SshResult<bool>;
}

/// split a signature blob, refusing one made by another algorithm
pub(crate) fn parse_signature(sig_blob: &[u8], expected: &str) -> SshResult<Vec<u8>> {
    let mut data = Data::from(sig_blob);
    let alg = data.get_string()?;
    if alg != expected {
        let err_msg = format!("Signature algorithm {} does not match {}", alg, expected);
        error!(err_msg);
        return Err(SshError::KexError(err_msg));
    }
    data.get_u8s()
}

/// skip the key type of a public key blob, checking it on the way
pub(crate) fn key_fields(key_blob: &[u8], key_type: &str) -> SshResult<Data> {
    let mut data = Data::from(key_blob);
    let t = data.get_string()?;
    if t != key_type {
        let err_msg = format!("Host key type {} does not match {}", t, key_type);
        error!(err_msg);
        return Err(SshError::KexError(err_msg));
    }
    Ok(data)
}
