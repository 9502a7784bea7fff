use ring::hmac::{self, Context};

use super::Mac;

/// hmac-sha1, hmac-sha2-256, hmac-sha2-512 and their `-etm@openssh.com` forms
pub(crate) struct Hmac {
    algorithm: hmac::Algorithm,
    size: usize,
    etm: bool,
    key: Option<hmac::Key>,
}

impl Hmac {
    pub fn sha1(etm: bool) -> Self {
        Self::with(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, 20, etm)
    }

    pub fn sha2_256(etm: bool) -> Self {
        Self::with(hmac::HMAC_SHA256, 32, etm)
    }

    pub fn sha2_512(etm: bool) -> Self {
        Self::with(hmac::HMAC_SHA512, 64, etm)
    }

    fn with(algorithm: hmac::Algorithm, size: usize, etm: bool) -> Self {
        Self {
            algorithm,
            size,
            etm,
            key: None,
        }
    }
}

impl Mac for Hmac {
    fn size(&self) -> usize {
        self.size
    }

    fn key_size(&self) -> usize {
        self.size
    }

    fn is_etm(&self) -> bool {
        self.etm
    }

    fn init(&mut self, key: &[u8]) {
        let key = &key[..self.size.min(key.len())];
        self.key = Some(hmac::Key::new(self.algorithm, key));
    }

    fn sign(&self, sequence_number: u32, buf: &[u8]) -> Vec<u8> {
        match &self.key {
            Some(key) => {
                let mut c = Context::with_key(key);
                c.update(sequence_number.to_be_bytes().as_slice());
                c.update(buf);
                c.sign().as_ref().to_vec()
            }
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(Hmac::sha1(false).size(), 20);
        assert_eq!(Hmac::sha2_256(true).size(), 32);
        assert!(Hmac::sha2_256(true).is_etm());
        assert_eq!(Hmac::sha2_512(false).key_size(), 64);
    }

    #[test]
    fn sequence_number_is_signed() {
        let mut mac = Hmac::sha2_256(false);
        mac.init(&[1; 32]);
        let tag = mac.sign(0, b"payload");
        assert_eq!(tag.len(), 32);
        assert!(mac.verify(0, b"payload", &tag));
        assert!(!mac.verify(1, b"payload", &tag));
        assert!(!mac.verify(0, b"payloaD", &tag));
    }
}
