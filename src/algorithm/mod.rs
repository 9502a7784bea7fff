pub mod compression;
mod component;
pub mod encryption;
pub mod hash;
pub mod key_exchange;
pub mod mac;
pub mod public_key;
mod registry;

pub use component::ComponentRegistry;
pub use registry::{AlgorithmRegistry, Factory};

use strum_macros::{AsRefStr, EnumIter, EnumString};

/// symmetrical encryption algorithm
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr, EnumString, EnumIter)]
pub enum Enc {
    #[strum(serialize = "chacha20-poly1305@openssh.com")]
    Chacha20Poly1305Openssh,
    #[strum(serialize = "aes256-ctr")]
    Aes256Ctr,
    #[strum(serialize = "aes192-ctr")]
    Aes192Ctr,
    #[strum(serialize = "aes128-ctr")]
    Aes128Ctr,
    #[strum(serialize = "none")]
    None,
}

/// key exchange algorithm
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr, EnumString, EnumIter)]
pub enum Kex {
    #[strum(serialize = "curve25519-sha256")]
    Curve25519Sha256,
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,
    #[strum(serialize = "ecdh-sha2-nistp256")]
    EcdhSha2Nistrp256,
    #[strum(serialize = "diffie-hellman-group14-sha256")]
    DiffieHellmanGroup14Sha256,
    #[strum(serialize = "diffie-hellman-group14-sha1")]
    DiffieHellmanGroup14Sha1,
}

/// pubkey hash algorithm
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr, EnumString, EnumIter)]
pub enum PubKey {
    #[strum(serialize = "ssh-ed25519")]
    SshEd25519,
    #[strum(serialize = "rsa-sha2-512")]
    RsaSha2_512,
    #[strum(serialize = "rsa-sha2-256")]
    RsaSha2_256,
}

/// MAC(message authentication code) algorithm
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr, EnumString, EnumIter)]
pub enum Mac {
    #[strum(serialize = "hmac-sha2-256-etm@openssh.com")]
    HmacSha2_256Etm,
    #[strum(serialize = "hmac-sha2-512-etm@openssh.com")]
    HmacSha2_512Etm,
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha2_256,
    #[strum(serialize = "hmac-sha2-512")]
    HmacSha2_512,
    #[strum(serialize = "hmac-sha1")]
    HmacSha1,
    #[strum(serialize = "none")]
    None,
}

/// compression algorithm
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr, EnumString, EnumIter)]
pub enum Compress {
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "zlib@openssh.com")]
    ZlibOpenSsh,
    #[strum(serialize = "zlib")]
    Zlib,
}

/// digests used by key exchange and key derivation
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr, EnumString, EnumIter)]
pub enum DigestAlg {
    #[strum(serialize = "sha1")]
    Sha1,
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha384")]
    Sha384,
    #[strum(serialize = "sha512")]
    Sha512,
}

/// The algorithm categories negotiated or looked up by name
#[derive(Copy, Clone, PartialEq, Eq, Debug, AsRefStr)]
pub enum Category {
    #[strum(serialize = "cipher")]
    Cipher,
    #[strum(serialize = "mac")]
    Mac,
    #[strum(serialize = "compression")]
    Compression,
    #[strum(serialize = "key exchange")]
    KeyExchange,
    #[strum(serialize = "host key")]
    HostKey,
    #[strum(serialize = "digest")]
    Digest,
}

/// Pick the first entry of `ours` that `theirs` also offers.
///
/// `ours` is the client side list: SSH always honours the client preference,
/// whichever side runs the negotiation.
pub fn negotiate<'a, S: AsRef<str>>(ours: &'a [S], theirs: &[S]) -> Option<&'a str> {
    ours.iter()
        .map(|x| x.as_ref())
        .find(|x| theirs.iter().any(|t| t.as_ref() == *x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn names_round_trip() {
        assert_eq!(Enc::Aes128Ctr.as_ref(), "aes128-ctr");
        assert_eq!(
            Kex::from_str("curve25519-sha256@libssh.org").unwrap(),
            Kex::Curve25519Sha256Libssh
        );
        assert!(Mac::from_str("hmac-md5").is_err());
    }

    #[test]
    fn negotiation_is_client_driven() {
        let client = ["b", "a"];
        let server = ["a", "b"];
        assert_eq!(negotiate(&client, &server), Some("b"));
        assert_eq!(negotiate(&server, &client), Some("a"));
        assert_eq!(negotiate(&["x"], &["y"]), None);
        assert_eq!(negotiate::<&str>(&[], &["y"]), None);
    }
}
