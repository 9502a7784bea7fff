use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;

use super::KeyExchange;
use crate::algorithm::DigestAlg;
use crate::{SshError, SshResult};

/// 2048-bit MODP group, RFC 3526 section 3
const GROUP14_PRIME: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
83655D23DCA3AD961C62F356208552BB9ED529077096966D\
670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
15728E5A8AACAA68FFFFFFFFFFFFFFFF";

const GENERATOR: u32 = 2;

/// diffie-hellman-group14-sha1 / diffie-hellman-group14-sha256
///
/// <https://www.rfc-editor.org/rfc/rfc4253#section-8>
pub(crate) struct DhGroup14 {
    digest: DigestAlg,
    p: BigUint,
    x: Option<BigUint>,
    e: Vec<u8>,
}

impl DhGroup14 {
    pub fn new(digest: DigestAlg) -> SshResult<Self> {
        let p = BigUint::parse_bytes(GROUP14_PRIME, 16)
            .ok_or_else(|| SshError::KexError("Invalid group14 prime".to_owned()))?;
        // 1 < x < p - 1
        let x = OsRng.gen_biguint_range(&BigUint::from(2_u32), &(&p - 1_u32));
        let e = BigUint::from(GENERATOR).modpow(&x, &p).to_bytes_be();
        Ok(Self {
            digest,
            p,
            x: Some(x),
            e,
        })
    }
}

impl KeyExchange for DhGroup14 {
    fn digest(&self) -> DigestAlg {
        self.digest
    }

    fn public_key(&self) -> &[u8] {
        &self.e
    }

    fn public_is_mpint(&self) -> bool {
        true
    }

    fn shared_secret(&mut self, peer: &[u8]) -> SshResult<Vec<u8>> {
        let f = BigUint::from_bytes_be(peer);
        if f <= BigUint::from(1_u32) || f >= &self.p - 1_u32 {
            return Err(SshError::KexError(
                "DH public value is out of range".to_owned(),
            ));
        }
        let x = self
            .x
            .take()
            .ok_or_else(|| SshError::KexError("The ephemeral key has already been used".to_owned()))?;
        Ok(f.modpow(&x, &self.p).to_bytes_be())
    }
}
