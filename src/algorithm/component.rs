use std::sync::{Arc, OnceLock};

use tracing::*;

use super::compression::{CompressNone, CompressZlib, Compression};
use super::encryption::{ChaCha20Poly1305, Ctr128, Ctr192, Ctr256, Encryption, EncryptionNone};
use super::hash::{Digest, RingDigest};
use super::key_exchange::{Curve25519, DhGroup14, EcdhP256, KeyExchange};
use super::mac::{Hmac, Mac, MacNone};
use super::public_key::{Ed25519, PublicKey, RsaSha256, RsaSha512};
use super::{AlgorithmRegistry, Category, Compress, DigestAlg, Enc, Kex, PubKey};
use crate::error::SshResult;

static GLOBAL: OnceLock<ComponentRegistry> = OnceLock::new();

/// The algorithm registries of every category, one value handed to each
/// connection.
///
/// Cloning shares the underlying registries; [ComponentRegistry::deep_clone]
/// copies them so a connection may tune its own preference order.
#[derive(Clone, Debug)]
pub struct ComponentRegistry {
    ciphers: Arc<AlgorithmRegistry<dyn Encryption>>,
    macs: Arc<AlgorithmRegistry<dyn Mac>>,
    compressions: Arc<AlgorithmRegistry<dyn Compression>>,
    key_exchanges: Arc<AlgorithmRegistry<dyn KeyExchange>>,
    host_keys: Arc<AlgorithmRegistry<dyn PublicKey>>,
    digests: Arc<AlgorithmRegistry<dyn Digest>>,
}

macro_rules! boxed {
    ($t: ty, $e: expr) => {
        || -> SshResult<Box<$t>> { Ok(Box::new($e)) }
    };
}

impl ComponentRegistry {
    /// registries without any algorithm, unlocked
    pub fn empty() -> Self {
        Self {
            ciphers: Arc::new(AlgorithmRegistry::new(Category::Cipher)),
            macs: Arc::new(AlgorithmRegistry::new(Category::Mac)),
            compressions: Arc::new(AlgorithmRegistry::new(Category::Compression)),
            key_exchanges: Arc::new(AlgorithmRegistry::new(Category::KeyExchange)),
            host_keys: Arc::new(AlgorithmRegistry::new(Category::HostKey)),
            digests: Arc::new(AlgorithmRegistry::new(Category::Digest)),
        }
    }

    /// every built-in algorithm registered, unlocked
    pub fn builtin_unlocked() -> Self {
        let r = Self::empty();
        // registering into fresh registries can not fail
        if let Err(e) = r.register_builtin() {
            error!("Failed to register the built-in algorithms: {}", e);
        }
        r
    }

    /// every built-in algorithm registered, locked
    pub fn builtin() -> Self {
        let r = Self::builtin_unlocked();
        r.lock();
        r
    }

    /// the built-in set without the algorithms FIPS 140 does not approve
    pub fn fips() -> Self {
        let r = Self::builtin_unlocked();
        let result = (|| -> SshResult<()> {
            r.key_exchanges.retain(|n| !n.starts_with("curve25519"))?;
            r.key_exchanges.retain(|n| !n.ends_with("sha1"))?;
            r.ciphers.retain(|n| !n.starts_with("chacha20"))?;
            r.host_keys.retain(|n| n != PubKey::SshEd25519.as_ref())?;
            r.macs.retain(|n| !n.starts_with("hmac-sha1"))?;
            r.digests.retain(|n| n != DigestAlg::Sha1.as_ref())?;
            Ok(())
        })();
        if let Err(e) = result {
            error!("Failed to apply the FIPS policy: {}", e);
        }
        r.lock();
        r
    }

    /// lazily built process wide default, locked
    pub fn global() -> &'static ComponentRegistry {
        GLOBAL.get_or_init(Self::builtin)
    }

    fn register_builtin(&self) -> SshResult<()> {
        let c = &self.ciphers;
        c.add(Enc::Chacha20Poly1305Openssh.as_ref(), boxed!(dyn Encryption, ChaCha20Poly1305::default()))?;
        c.add(Enc::Aes256Ctr.as_ref(), boxed!(dyn Encryption, Ctr256::default()))?;
        c.add(Enc::Aes192Ctr.as_ref(), boxed!(dyn Encryption, Ctr192::default()))?;
        c.add(Enc::Aes128Ctr.as_ref(), boxed!(dyn Encryption, Ctr128::default()))?;
        c.add(Enc::None.as_ref(), boxed!(dyn Encryption, EncryptionNone::default()))?;

        let m = &self.macs;
        m.add(super::Mac::HmacSha2_256Etm.as_ref(), boxed!(dyn Mac, Hmac::sha2_256(true)))?;
        m.add(super::Mac::HmacSha2_512Etm.as_ref(), boxed!(dyn Mac, Hmac::sha2_512(true)))?;
        m.add(super::Mac::HmacSha2_256.as_ref(), boxed!(dyn Mac, Hmac::sha2_256(false)))?;
        m.add(super::Mac::HmacSha2_512.as_ref(), boxed!(dyn Mac, Hmac::sha2_512(false)))?;
        m.add(super::Mac::HmacSha1.as_ref(), boxed!(dyn Mac, Hmac::sha1(false)))?;
        m.add(super::Mac::None.as_ref(), boxed!(dyn Mac, MacNone::default()))?;

        let z = &self.compressions;
        z.add(Compress::None.as_ref(), boxed!(dyn Compression, CompressNone::default()))?;
        z.add(Compress::ZlibOpenSsh.as_ref(), boxed!(dyn Compression, CompressZlib::new(true)))?;
        z.add(Compress::Zlib.as_ref(), boxed!(dyn Compression, CompressZlib::new(false)))?;

        let k = &self.key_exchanges;
        k.add(Kex::Curve25519Sha256.as_ref(), || {
            Ok(Box::new(Curve25519::new()?) as Box<dyn KeyExchange>)
        })?;
        k.add(Kex::Curve25519Sha256Libssh.as_ref(), || {
            Ok(Box::new(Curve25519::new()?) as Box<dyn KeyExchange>)
        })?;
        k.add(Kex::EcdhSha2Nistrp256.as_ref(), || {
            Ok(Box::new(EcdhP256::new()?) as Box<dyn KeyExchange>)
        })?;
        k.add(Kex::DiffieHellmanGroup14Sha256.as_ref(), || {
            Ok(Box::new(DhGroup14::new(DigestAlg::Sha256)?) as Box<dyn KeyExchange>)
        })?;
        k.add(Kex::DiffieHellmanGroup14Sha1.as_ref(), || {
            Ok(Box::new(DhGroup14::new(DigestAlg::Sha1)?) as Box<dyn KeyExchange>)
        })?;

        let h = &self.host_keys;
        h.add(PubKey::SshEd25519.as_ref(), boxed!(dyn PublicKey, Ed25519))?;
        h.add(PubKey::RsaSha2_512.as_ref(), boxed!(dyn PublicKey, RsaSha512))?;
        h.add(PubKey::RsaSha2_256.as_ref(), boxed!(dyn PublicKey, RsaSha256))?;

        let d = &self.digests;
        d.add(DigestAlg::Sha1.as_ref(), boxed!(dyn Digest, RingDigest::new(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY)))?;
        d.add(DigestAlg::Sha256.as_ref(), boxed!(dyn Digest, RingDigest::new(&ring::digest::SHA256)))?;
        d.add(DigestAlg::Sha384.as_ref(), boxed!(dyn Digest, RingDigest::new(&ring::digest::SHA384)))?;
        d.add(DigestAlg::Sha512.as_ref(), boxed!(dyn Digest, RingDigest::new(&ring::digest::SHA512)))?;
        Ok(())
    }

    /// independent, unlocked copies of every registry
    pub fn deep_clone(&self) -> Self {
        Self {
            ciphers: Arc::new(self.ciphers.as_ref().clone()),
            macs: Arc::new(self.macs.as_ref().clone()),
            compressions: Arc::new(self.compressions.as_ref().clone()),
            key_exchanges: Arc::new(self.key_exchanges.as_ref().clone()),
            host_keys: Arc::new(self.host_keys.as_ref().clone()),
            digests: Arc::new(self.digests.as_ref().clone()),
        }
    }

    pub fn lock(&self) {
        self.ciphers.lock();
        self.macs.lock();
        self.compressions.lock();
        self.key_exchanges.lock();
        self.host_keys.lock();
        self.digests.lock();
    }

    pub fn ciphers(&self) -> &AlgorithmRegistry<dyn Encryption> {
        &self.ciphers
    }

    pub fn macs(&self) -> &AlgorithmRegistry<dyn Mac> {
        &self.macs
    }

    pub fn compressions(&self) -> &AlgorithmRegistry<dyn Compression> {
        &self.compressions
    }

    pub fn key_exchanges(&self) -> &AlgorithmRegistry<dyn KeyExchange> {
        &self.key_exchanges
    }

    pub fn host_keys(&self) -> &AlgorithmRegistry<dyn PublicKey> {
        &self.host_keys
    }

    pub fn digests(&self) -> &AlgorithmRegistry<dyn Digest> {
        &self.digests
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::global().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SshError;

    #[test]
    fn builtin_is_locked_and_complete() {
        let r = ComponentRegistry::builtin();
        assert!(r.ciphers().is_locked());
        assert_eq!(r.ciphers().list(None)[0], "chacha20-poly1305@openssh.com");
        assert_eq!(r.key_exchanges().list(None).len(), 5);
        assert!(matches!(
            r.macs().remove("hmac-sha1"),
            Err(SshError::RegistryLocked(_))
        ));
        assert!(r.digests().instantiate("sha384").is_ok());
    }

    #[test]
    fn fips_drops_unapproved() {
        let r = ComponentRegistry::fips();
        assert!(r.key_exchanges().is_locked());
        assert_eq!(
            r.key_exchanges().list(None),
            vec!["ecdh-sha2-nistp256", "diffie-hellman-group14-sha256"]
        );
        assert!(!r.ciphers().contains("chacha20-poly1305@openssh.com"));
        assert!(!r.host_keys().contains("ssh-ed25519"));
        assert!(!r.macs().contains("hmac-sha1"));
        assert!(!r.digests().contains("sha1"));
    }

    #[test]
    fn deep_clone_is_isolated() {
        let base = ComponentRegistry::builtin();
        let own = base.deep_clone();
        own.ciphers().reorder("aes128-ctr", 0).unwrap();
        assert_eq!(own.ciphers().list(None)[0], "aes128-ctr");
        assert_eq!(base.ciphers().list(None)[0], "chacha20-poly1305@openssh.com");

        let shared = base.clone();
        assert!(shared.ciphers().is_locked());
    }
}
