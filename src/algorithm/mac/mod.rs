mod hmac;

pub(crate) use self::hmac::Hmac;

/// # MAC 算法
/// 数据完整性保护，`mac = MAC(key, sequence_number || data)`。
///
/// Plain MACs sign the unencrypted packet; `-etm@openssh.com` variants sign
/// the length field and the ciphertext instead.
pub trait Mac: Send {
    /// output length
    fn size(&self) -> usize;
    fn key_size(&self) -> usize;
    /// encrypt-then-mac framing
    fn is_etm(&self) -> bool {
        false
    }
    fn init(&mut self, key: &[u8]);
    fn sign(&self, sequence_number: u32, buf: &[u8]) -> Vec<u8>;
    fn verify(&self, sequence_number: u32, buf: &[u8], tag: &[u8]) -> bool {
        ring::constant_time::verify_slices_are_equal(&self.sign(sequence_number, buf), tag).is_ok()
    }
}

#[derive(Default)]
pub(crate) struct MacNone {}

impl Mac for MacNone {
    fn size(&self) -> usize {
        0
    }

    fn key_size(&self) -> usize {
        0
    }

    fn init(&mut self, _key: &[u8]) {}

    fn sign(&self, _sequence_number: u32, _buf: &[u8]) -> Vec<u8> {
        vec![]
    }
}
