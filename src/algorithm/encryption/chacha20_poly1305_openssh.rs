use ring::aead::chacha20_poly1305_openssh::{OpeningKey, SealingKey, KEY_LEN, TAG_LEN};

use crate::algorithm::encryption::{CipherMode, Encryption};
use crate::error::{SshError, SshResult};

enum Key {
    Sealing(SealingKey),
    Opening(OpeningKey),
}

/// chacha20-poly1305@openssh.com
///
/// The packet length is encrypted with its own key and the whole packet is
/// authenticated by the poly1305 tag, no separate MAC is negotiated.
#[derive(Default)]
pub(crate) struct ChaCha20Poly1305 {
    key: Option<Key>,
}

impl Encryption for ChaCha20Poly1305 {
    fn block_size(&self) -> usize {
        8
    }

    fn key_size(&self) -> usize {
        KEY_LEN
    }

    fn iv_size(&self) -> usize {
        0
    }

    fn tag_size(&self) -> usize {
        TAG_LEN
    }

    fn init(&mut self, mode: CipherMode, key: &[u8], _iv: &[u8]) -> SshResult<()> {
        if key.len() < KEY_LEN {
            return Err(SshError::KexError(format!(
                "chacha20-poly1305 needs {} bytes of key, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        let mut k = [0_u8; KEY_LEN];
        k.copy_from_slice(&key[..KEY_LEN]);
        self.key = Some(match mode {
            CipherMode::Encrypt => Key::Sealing(SealingKey::new(&k)),
            CipherMode::Decrypt => Key::Opening(OpeningKey::new(&k)),
        });
        k.iter_mut().for_each(|b| *b = 0);
        Ok(())
    }

    fn encrypt(&mut self, sequence_number: u32, buf: &mut [u8]) -> SshResult<Vec<u8>> {
        match &self.key {
            Some(Key::Sealing(key)) => {
                let mut tag = [0_u8; TAG_LEN];
                key.seal_in_place(sequence_number, buf, &mut tag);
                Ok(tag.to_vec())
            }
            _ => Err(SshError::from("chacha20-poly1305 is not keyed for sealing")),
        }
    }

    fn decrypt(&mut self, sequence_number: u32, buf: &mut [u8], tag: &[u8]) -> SshResult<()> {
        match &self.key {
            Some(Key::Opening(key)) => {
                let mut t = [0_u8; TAG_LEN];
                if tag.len() != TAG_LEN {
                    return Err(SshError::ProtocolViolation("bad tag length".to_owned()));
                }
                t.copy_from_slice(tag);
                key.open_in_place(sequence_number, buf, &t)
                    .map(|_| ())
                    .map_err(|_| SshError::ProtocolViolation("message authentication failed".to_owned()))
            }
            _ => Err(SshError::from("chacha20-poly1305 is not keyed for opening")),
        }
    }

    fn decrypt_length(&mut self, sequence_number: u32, len: [u8; 4]) -> [u8; 4] {
        match &self.key {
            Some(Key::Opening(key)) => key.decrypt_packet_length(sequence_number, len),
            _ => len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open() {
        let key = [3_u8; KEY_LEN];
        let mut seal = ChaCha20Poly1305::default();
        let mut open = ChaCha20Poly1305::default();
        seal.init(CipherMode::Encrypt, &key, &[]).unwrap();
        open.init(CipherMode::Decrypt, &key, &[]).unwrap();

        let mut packet = vec![0, 0, 0, 12, 4, b'h', b'e', b'l', b'l', b'o', b'!', b'!', 0, 0, 0, 0];
        let plain = packet.clone();
        let tag = seal.encrypt(3, &mut packet).unwrap();
        assert_ne!(packet, plain);

        let mut len = [0_u8; 4];
        len.copy_from_slice(&packet[..4]);
        assert_eq!(open.decrypt_length(3, len), [0, 0, 0, 12]);

        let mut tampered = packet.clone();
        tampered[6] ^= 1;
        assert!(open.decrypt(3, &mut tampered, &tag).is_err());

        open.decrypt(3, &mut packet, &tag).unwrap();
        assert_eq!(&packet[4..], &plain[4..]);
    }
}
