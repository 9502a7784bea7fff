mod aes_ctr;
mod chacha20_poly1305_openssh;

pub(crate) use aes_ctr::{Ctr128, Ctr192, Ctr256};
pub(crate) use chacha20_poly1305_openssh::ChaCha20Poly1305;

use crate::SshResult;

/// Which way a cipher instance will be used
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

/// # 加密算法
/// 在密钥交互中将协商出一种加密算法和一个密钥。当加密生效时，每个数据包的数据包长度、填
/// 充长度、有效载荷和填充域必须使用给定的算法加密。
/// 所有从一个方向发送的数据包中的加密数据应被认为是一个数据流。
/// 两个方向上的加密器必须独立运行，所以每个方向各自拥有一个实例。
///
/// An instance is created by the registry factory, then keyed once with
/// [Encryption::init] after a key exchange.
pub trait Encryption: Send {
    /// cipher block size, the packet alignment is max(8, block_size)
    fn block_size(&self) -> usize;
    fn key_size(&self) -> usize;
    fn iv_size(&self) -> usize;
    /// authentication tag length of an AEAD cipher, 0 otherwise
    fn tag_size(&self) -> usize {
        0
    }
    fn is_aead(&self) -> bool {
        self.tag_size() > 0
    }
    fn init(&mut self, mode: CipherMode, key: &[u8], iv: &[u8]) -> SshResult<()>;
    /// encrypt in place, an AEAD cipher returns its tag
    ///
    /// For an AEAD cipher `buf` holds the length field too.
    fn encrypt(&mut self, sequence_number: u32, buf: &mut [u8]) -> SshResult<Vec<u8>>;
    /// decrypt in place, an AEAD cipher verifies `tag`
    fn decrypt(&mut self, sequence_number: u32, buf: &mut [u8], tag: &[u8]) -> SshResult<()>;
    /// ciphers that encrypt the length field separately reveal it here
    fn decrypt_length(&mut self, _sequence_number: u32, len: [u8; 4]) -> [u8; 4] {
        len
    }
}

/// Before the first NEWKEYS nothing is encrypted
#[derive(Default)]
pub(crate) struct EncryptionNone {}

impl Encryption for EncryptionNone {
    fn block_size(&self) -> usize {
        8
    }

    fn key_size(&self) -> usize {
        0
    }

    fn iv_size(&self) -> usize {
        0
    }

    fn init(&mut self, _mode: CipherMode, _key: &[u8], _iv: &[u8]) -> SshResult<()> {
        Ok(())
    }

    fn encrypt(&mut self, _sequence_number: u32, _buf: &mut [u8]) -> SshResult<Vec<u8>> {
        // do nothing
        Ok(vec![])
    }

    fn decrypt(&mut self, _sequence_number: u32, _buf: &mut [u8], _tag: &[u8]) -> SshResult<()> {
        Ok(())
    }
}
