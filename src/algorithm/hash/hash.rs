use crate::algorithm::Factory;
use crate::constant::ALPHABET;
use crate::error::SshResult;
use crate::model::Data;

use super::Digest;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Key lengths required by the negotiated cipher and MAC of each direction
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct KeySizes {
    pub iv_c_s: usize,
    pub iv_s_c: usize,
    pub ek_c_s: usize,
    pub ek_s_c: usize,
    pub ik_c_s: usize,
    pub ik_s_c: usize,
}

/// 加密密钥必须是对一个已知值和 K 的 HASH 结果，方法如下：
/// ○ 客户端到服务器的初始 IV：HASH(K || H || "A" || session_id)（这里 K 为 mpint
/// 格式，"A"为 byte 格式，session_id 为原始数据（raw data）。
/// ○ 服务器到客户端的初始 IV：HASH(K || H || "B" || session_id)
/// ○ 客户端到服务器的加密密钥：HASH(K || H || "C" || session_id)
/// ○ 服务器到客户端的加密密钥：HASH(K || H || "D" || session_id)
/// ○ 客户端到服务器的完整性密钥：HASH(K || H || "E" || session_id)
/// ○ 服务器到客户端的完整性密钥：HASH(K || H || "F" || session_id)
/// 如果需要的密钥长度超过 HASH 输出，则拼接 K、H 和当前的整个密钥并计算其 HASH：
/// K1 = HASH(K || H || X || session_id)（X 表示"A"等）
/// K2 = HASH(K || H || K1)
/// K3 = HASH(K || H || K1 || K2)
/// key = K1 || K2 || K3 || ...
pub(crate) struct SessionKeys {
    /// 数据加密时只使用一次的随机数  number used once
    pub iv_c_s: Vec<u8>,
    pub iv_s_c: Vec<u8>,

    /// 数据加密的 key
    pub ek_c_s: Vec<u8>,
    pub ek_s_c: Vec<u8>,

    /// Hmac时候用到的 key
    pub ik_c_s: Vec<u8>,
    pub ik_s_c: Vec<u8>,
}

impl SessionKeys {
    /// `k` is the raw shared secret, it is mpint encoded here
    pub fn derive(
        digest: &Factory<dyn Digest>,
        k: &[u8],
        h: &[u8],
        session_id: &[u8],
        sizes: KeySizes,
    ) -> SshResult<Self> {
        let mut k_mpint = Data::new();
        k_mpint.put_mpint(k);

        let lens = [
            sizes.iv_c_s,
            sizes.iv_s_c,
            sizes.ek_c_s,
            sizes.ek_s_c,
            sizes.ik_c_s,
            sizes.ik_s_c,
        ];
        let mut keys = Vec::with_capacity(6);
        for (letter, len) in ALPHABET.iter().zip(lens) {
            keys.push(Self::mix(digest, &k_mpint, h, *letter, session_id, len)?);
        }
        k_mpint.iter_mut().for_each(|b| *b = 0);

        let mut keys = keys.into_iter();
        let mut next = || keys.next().unwrap_or_default();
        Ok(SessionKeys {
            iv_c_s: next(),
            iv_s_c: next(),
            ek_c_s: next(),
            ek_s_c: next(),
            ik_c_s: next(),
            ik_s_c: next(),
        })
    }

    fn mix(
        digest: &Factory<dyn Digest>,
        k: &[u8],
        h: &[u8],
        key_char: u8,
        session_id: &[u8],
        len: usize,
    ) -> SshResult<Vec<u8>> {
        let mut d = digest()?;
        d.update(k);
        d.update(h);
        d.update(&[key_char]);
        d.update(session_id);
        let mut key = d.finish();

        while key.len() < len {
            let mut d = digest()?;
            d.update(k);
            d.update(h);
            d.update(&key);
            key.extend(d.finish());
        }
        key.truncate(len);
        Ok(key)
    }

    /// (iv, encryption key, integrity key) of one direction
    pub fn of(&self, direction: Direction) -> (&[u8], &[u8], &[u8]) {
        match direction {
            Direction::ClientToServer => (&self.iv_c_s, &self.ek_c_s, &self.ik_c_s),
            Direction::ServerToClient => (&self.iv_s_c, &self.ek_s_c, &self.ik_s_c),
        }
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        for key in [
            &mut self.iv_c_s,
            &mut self.iv_s_c,
            &mut self.ek_c_s,
            &mut self.ek_s_c,
            &mut self.ik_c_s,
            &mut self.ik_s_c,
        ] {
            key.iter_mut().for_each(|b| *b = 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::hash::RingDigest;
    use std::sync::Arc;

    fn sha256() -> Factory<dyn Digest> {
        Arc::new(|| Ok(Box::new(RingDigest::new(&ring::digest::SHA256)) as Box<dyn Digest>))
    }

    fn sizes(n: usize) -> KeySizes {
        KeySizes {
            iv_c_s: n,
            iv_s_c: n,
            ek_c_s: n,
            ek_s_c: n,
            ik_c_s: n,
            ik_s_c: n,
        }
    }

    #[test]
    fn deterministic_and_letter_separated() {
        let a = SessionKeys::derive(&sha256(), &[1, 2, 3], b"hash", b"sid", sizes(16)).unwrap();
        let b = SessionKeys::derive(&sha256(), &[1, 2, 3], b"hash", b"sid", sizes(16)).unwrap();
        assert_eq!(a.ek_c_s, b.ek_c_s);
        assert_eq!(a.ek_c_s.len(), 16);
        assert_ne!(a.ek_c_s, a.ek_s_c);
        assert_ne!(a.iv_c_s, a.ik_c_s);

        let c = SessionKeys::derive(&sha256(), &[1, 2, 3], b"hash", b"other", sizes(16)).unwrap();
        assert_ne!(a.ek_c_s, c.ek_c_s);
    }

    #[test]
    fn extension_follows_the_kdf() {
        let keys = SessionKeys::derive(&sha256(), &[0x80], b"H", b"S", sizes(64)).unwrap();

        let k = [0_u8, 0, 0, 2, 0, 0x80];
        let k1 = ring::digest::digest(&ring::digest::SHA256, &[&k[..], b"H", b"C", b"S"].concat());
        let k2 = ring::digest::digest(&ring::digest::SHA256, &[&k[..], b"H", k1.as_ref()].concat());
        assert_eq!(&keys.ek_c_s[..32], k1.as_ref());
        assert_eq!(&keys.ek_c_s[32..], k2.as_ref());
    }

    #[test]
    fn zero_length_keys() {
        let keys = SessionKeys::derive(&sha256(), &[9], b"H", b"S", sizes(0)).unwrap();
        let (iv, ek, ik) = keys.of(Direction::ServerToClient);
        assert!(iv.is_empty() && ek.is_empty() && ik.is_empty());
    }
}
