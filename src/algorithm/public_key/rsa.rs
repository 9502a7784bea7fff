use rsa::Pkcs1v15Sign;

use super::PublicKey;
use crate::{SshError, SshResult};

fn verify(
    ks: &[u8],
    scheme: Pkcs1v15Sign,
    alg: &str,
    digest: &'static ring::digest::Algorithm,
    message: &[u8],
    sig: &[u8],
) -> SshResult<bool> {
    let mut data = super::key_fields(ks, "ssh-rsa")?;
    let e = rsa::BigUint::from_bytes_be(data.get_u8s()?.as_slice());
    let n = rsa::BigUint::from_bytes_be(data.get_u8s()?.as_slice());
    let public_key =
        rsa::RsaPublicKey::new(n, e).map_err(|e| SshError::KexError(e.to_string()))?;
    let sig = super::parse_signature(sig, alg)?;

    let digest = ring::digest::digest(digest, message);
    Ok(public_key.verify(scheme, digest.as_ref(), &sig).is_ok())
}

pub(crate) struct RsaSha256;

impl PublicKey for RsaSha256 {
    fn verify_signature(&self, ks: &[u8], message: &[u8], sig: &[u8]) -> SshResult<bool> {
        verify(
            ks,
            Pkcs1v15Sign::new::<sha2::Sha256>(),
            "rsa-sha2-256",
            &ring::digest::SHA256,
            message,
            sig,
        )
    }
}

pub(crate) struct RsaSha512;

impl PublicKey for RsaSha512 {
    fn verify_signature(&self, ks: &[u8], message: &[u8], sig: &[u8]) -> SshResult<bool> {
        verify(
            ks,
            Pkcs1v15Sign::new::<sha2::Sha512>(),
            "rsa-sha2-512",
            &ring::digest::SHA512,
            message,
            sig,
        )
    }
}
