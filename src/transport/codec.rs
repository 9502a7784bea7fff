use rand::{rngs::OsRng, Rng};
use tracing::*;

use crate::{
    algorithm::{
        compression::{CompressNone, Compression},
        encryption::{Encryption, EncryptionNone},
        mac::Mac,
    },
    constant::size,
    error::{SshError, SshResult},
    model::Data,
    util,
};

/// ## Binary Packet Protocol
///
/// <https://www.rfc-editor.org/rfc/rfc4253#section-6>
///
/// uint32 `packet_length`
///
/// byte `padding_length`
///
/// byte[[n1]] `payload`; n1 = packet_length - padding_length - 1
///
/// byte[[n2]] `random padding`; n2 = padding_length
///
/// byte[[m]] `mac` (Message Authentication Code - MAC); m = mac_length
///
/// ---
///
/// **random padding**
/// Arbitrary-length padding, such that the total length of
/// (packet_length || padding_length || payload || random padding)
/// is a multiple of the cipher block size or 8, whichever is
/// larger.  There MUST be at least four bytes of padding.  The
/// maximum amount of padding is 255 bytes.
///
/// With an `-etm@openssh.com` MAC or an AEAD cipher the length field stays
/// out of the alignment, it is sent in the clear (etm) or encrypted on its own
/// (chacha20-poly1305).
fn get_align(bsize: usize) -> usize {
    if bsize > 8 {
        bsize
    } else {
        8
    }
}

/// The algorithms of one direction, swapped as a whole on NEWKEYS
pub(crate) struct DirectionKeys {
    pub cipher: Box<dyn Encryption>,
    pub mac: Option<Box<dyn Mac>>,
    pub compress: Box<dyn Compression>,
}

impl DirectionKeys {
    pub fn none() -> Self {
        Self {
            cipher: Box::new(EncryptionNone::default()),
            mac: None,
            compress: Box::new(CompressNone::default()),
        }
    }

    fn length_in_clear(&self) -> bool {
        self.cipher.is_aead() || self.mac.as_ref().map(|m| m.is_etm()).unwrap_or(false)
    }

    fn mac_size(&self) -> usize {
        if self.cipher.is_aead() {
            self.cipher.tag_size()
        } else {
            self.mac.as_ref().map(|m| m.size()).unwrap_or(0)
        }
    }
}

/// Traffic accounted since the keys of a direction were installed
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counter {
    pub bytes: u64,
    pub packets: u64,
}

impl Counter {
    fn count(&mut self, bytes: usize) {
        self.bytes += bytes as u64;
        self.packets += 1;
    }
}

/// state shared by both directions
struct Direction {
    sequence: u32,
    keys: DirectionKeys,
    compress_active: bool,
    counter: Counter,
}

impl Direction {
    fn new() -> Self {
        Self {
            sequence: 0,
            keys: DirectionKeys::none(),
            compress_active: false,
            counter: Counter::default(),
        }
    }

    /// atomically replace the algorithms, the sequence number carries on
    fn install(&mut self, keys: DirectionKeys, authenticated: bool) {
        self.compress_active = !keys.compress.is_delayed() || authenticated;
        self.keys = keys;
        self.counter = Counter::default();
    }

    fn next_sequence(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }
}

pub(crate) struct Outbound {
    inner: Direction,
}

impl Outbound {
    /// frame, compress, encrypt and sign one payload
    pub fn encode(&mut self, payload: &[u8]) -> SshResult<Vec<u8>> {
        let d = &mut self.inner;
        let payload = if d.compress_active {
            d.keys.compress.compress(payload)?
        } else {
            payload.to_vec()
        };

        let bsize = get_align(d.keys.cipher.block_size());
        let in_clear = d.keys.length_in_clear();
        let aligned = payload.len() + 1 + if in_clear { 0 } else { 4 };
        let mut pad_len = bsize - aligned % bsize;
        if pad_len < size::MIN_PADDING {
            pad_len += bsize;
        }
        let extra = OsRng.gen_range(0..=size::MAX_EXTRA_PADDING_BLOCKS);
        for _ in 0..extra {
            if pad_len + bsize > u8::MAX as usize {
                break;
            }
            pad_len += bsize;
        }

        let packet_len = (1 + payload.len() + pad_len) as u32;
        let mut buf = Vec::with_capacity(4 + packet_len as usize + d.keys.mac_size());
        buf.extend(packet_len.to_be_bytes());
        buf.push(pad_len as u8);
        buf.extend(&payload);
        buf.extend(util::random_bytes(pad_len));

        let seq = d.next_sequence();
        if d.keys.cipher.is_aead() {
            let tag = d.keys.cipher.encrypt(seq, &mut buf)?;
            buf.extend(tag);
        } else if in_clear {
            d.keys.cipher.encrypt(seq, &mut buf[4..])?;
            if let Some(mac) = &d.keys.mac {
                let tag = mac.sign(seq, &buf);
                buf.extend(tag);
            }
        } else {
            let tag = d.keys.mac.as_ref().map(|mac| mac.sign(seq, &buf));
            d.keys.cipher.encrypt(seq, &mut buf)?;
            if let Some(tag) = tag {
                buf.extend(tag);
            }
        }
        d.counter.count(buf.len());
        trace!("encode packet {}, {} bytes on the wire", seq, buf.len());
        Ok(buf)
    }
}

/// the first block of an encrypt-and-mac packet, already decrypted
struct Pending {
    packet_len: usize,
    first_block: Vec<u8>,
}

pub(crate) struct Inbound {
    inner: Direction,
    buf: Vec<u8>,
    pending: Option<Pending>,
}

fn violation(err_msg: String) -> SshError {
    error!(err_msg);
    SshError::ProtocolViolation(err_msg)
}

impl Inbound {
    /// queue raw bytes read from the wire
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn check_len(packet_len: usize, bsize: usize, aligned: bool) -> SshResult<()> {
        if packet_len > size::MAX_PACKET_LEN {
            return Err(violation(format!(
                "packet length {} exceeds {}",
                packet_len,
                size::MAX_PACKET_LEN
            )));
        }
        if packet_len < 1 + size::MIN_PADDING {
            return Err(violation(format!("packet length {} is too small", packet_len)));
        }
        let framed = if aligned { packet_len + 4 } else { packet_len };
        if framed % bsize != 0 {
            return Err(violation(format!(
                "packet length {} is not aligned to {}",
                packet_len, bsize
            )));
        }
        Ok(())
    }

    /// decode the next complete packet, `None` until enough bytes were fed
    pub fn decode(&mut self) -> SshResult<Option<Data>> {
        let bsize = get_align(self.inner.keys.cipher.block_size());
        let mac_size = self.inner.keys.mac_size();
        let seq = self.inner.sequence;

        let plain = if self.inner.keys.cipher.is_aead() {
            if self.buf.len() < 4 {
                return Ok(None);
            }
            let mut len = [0_u8; 4];
            len.copy_from_slice(&self.buf[..4]);
            let packet_len = u32::from_be_bytes(self.inner.keys.cipher.decrypt_length(seq, len)) as usize;
            Self::check_len(packet_len, bsize, false)?;
            if self.buf.len() < 4 + packet_len + mac_size {
                return Ok(None);
            }
            let mut packet = self.buf.drain(..4 + packet_len + mac_size).collect::<Vec<u8>>();
            let tag = packet.split_off(4 + packet_len);
            self.inner.keys.cipher.decrypt(seq, &mut packet, &tag)?;
            packet[..4].copy_from_slice(&(packet_len as u32).to_be_bytes());
            packet
        } else if self.inner.keys.length_in_clear() {
            if self.buf.len() < 4 {
                return Ok(None);
            }
            let mut len = [0_u8; 4];
            len.copy_from_slice(&self.buf[..4]);
            let packet_len = u32::from_be_bytes(len) as usize;
            Self::check_len(packet_len, bsize, false)?;
            if self.buf.len() < 4 + packet_len + mac_size {
                return Ok(None);
            }
            let mut packet = self.buf.drain(..4 + packet_len + mac_size).collect::<Vec<u8>>();
            let tag = packet.split_off(4 + packet_len);
            if let Some(mac) = &self.inner.keys.mac {
                if !mac.verify(seq, &packet, &tag) {
                    return Err(violation(format!("MAC mismatch on packet {}", seq)));
                }
            }
            self.inner.keys.cipher.decrypt(seq, &mut packet[4..], &[])?;
            packet
        } else {
            if self.pending.is_none() {
                if self.buf.len() < bsize {
                    return Ok(None);
                }
                let mut first_block = self.buf[..bsize].to_vec();
                self.inner.keys.cipher.decrypt(seq, &mut first_block, &[])?;
                let mut len = [0_u8; 4];
                len.copy_from_slice(&first_block[..4]);
                let packet_len = u32::from_be_bytes(len) as usize;
                Self::check_len(packet_len, bsize, true)?;
                self.pending = Some(Pending {
                    packet_len,
                    first_block,
                });
            }
            let packet_len = match &self.pending {
                Some(p) => p.packet_len,
                None => return Ok(None),
            };
            if self.buf.len() < 4 + packet_len + mac_size {
                return Ok(None);
            }
            let mut packet = self.buf.drain(..4 + packet_len + mac_size).collect::<Vec<u8>>();
            let tag = packet.split_off(4 + packet_len);
            if let Some(p) = self.pending.take() {
                packet[..bsize].copy_from_slice(&p.first_block);
            }
            self.inner.keys.cipher.decrypt(seq, &mut packet[bsize..], &[])?;
            if let Some(mac) = &self.inner.keys.mac {
                if !mac.verify(seq, &packet, &tag) {
                    return Err(violation(format!("MAC mismatch on packet {}", seq)));
                }
            }
            packet
        };

        let packet_len = plain.len() - 4;
        let pad_len = plain[4] as usize;
        if pad_len < size::MIN_PADDING {
            return Err(violation(format!("padding of {} bytes is too short", pad_len)));
        }
        if pad_len + 1 > packet_len {
            return Err(violation(format!(
                "padding of {} bytes overruns the packet of {}",
                pad_len, packet_len
            )));
        }
        let payload_len = packet_len - pad_len - 1;
        let payload = &plain[5..5 + payload_len];
        let payload = if self.inner.compress_active {
            self.inner.keys.compress.decompress(payload)?
        } else {
            payload.to_vec()
        };

        self.inner.next_sequence();
        self.inner.counter.count(plain.len() + mac_size);
        trace!("decode packet {}, {} bytes payload", seq, payload.len());
        Ok(Some(payload.into()))
    }
}

/// Both directions of the binary packet protocol
///
/// Each direction owns its sequence number, cipher, MAC and compressor;
/// the two are switched to new keys independently.
pub(crate) struct PacketCodec {
    pub outbound: Outbound,
    pub inbound: Inbound,
    authenticated: bool,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            outbound: Outbound {
                inner: Direction::new(),
            },
            inbound: Inbound {
                inner: Direction::new(),
                buf: vec![],
                pending: None,
            },
            authenticated: false,
        }
    }

    pub fn install_outbound(&mut self, keys: DirectionKeys) {
        debug!("switch outbound keys at packet {}", self.outbound.inner.sequence);
        self.outbound.inner.install(keys, self.authenticated);
    }

    pub fn install_inbound(&mut self, keys: DirectionKeys) {
        debug!("switch inbound keys at packet {}", self.inbound.inner.sequence);
        self.inbound.inner.install(keys, self.authenticated);
    }

    /// user authentication succeeded, delayed compression may start
    pub fn enable_delayed_compression(&mut self) {
        self.authenticated = true;
        self.outbound.inner.compress_active = true;
        self.inbound.inner.compress_active = true;
    }

    pub fn outbound_counter(&self) -> Counter {
        self.outbound.inner.counter
    }

    pub fn inbound_counter(&self) -> Counter {
        self.inbound.inner.counter
    }

    pub fn outbound_sequence(&self) -> u32 {
        self.outbound.inner.sequence
    }

    pub fn inbound_sequence(&self) -> u32 {
        self.inbound.inner.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::compression::CompressZlib;
    use crate::algorithm::encryption::{ChaCha20Poly1305, CipherMode, Ctr128, Ctr256};
    use crate::algorithm::mac::Hmac;

    fn aes_hmac(mode: CipherMode, etm: bool) -> DirectionKeys {
        let mut cipher = Ctr128::default();
        cipher.init(mode, &[1; 16], &[2; 16]).unwrap();
        let mut mac = Hmac::sha2_256(etm);
        mac.init(&[3; 32]);
        DirectionKeys {
            cipher: Box::new(cipher),
            mac: Some(Box::new(mac)),
            compress: Box::new(CompressNone::default()),
        }
    }

    fn chacha(mode: CipherMode) -> DirectionKeys {
        let mut cipher = ChaCha20Poly1305::default();
        cipher.init(mode, &[4; 64], &[]).unwrap();
        DirectionKeys {
            cipher: Box::new(cipher),
            mac: None,
            compress: Box::new(CompressZlib::new(false)),
        }
    }

    fn pair(enc: DirectionKeys, dec: DirectionKeys) -> (PacketCodec, PacketCodec) {
        let mut a = PacketCodec::new();
        let mut b = PacketCodec::new();
        a.install_outbound(enc);
        b.install_inbound(dec);
        (a, b)
    }

    fn transfer(a: &mut PacketCodec, b: &mut PacketCodec, payloads: &[&[u8]]) {
        let mut wire = vec![];
        for p in payloads {
            wire.extend(a.outbound.encode(p).unwrap());
        }
        // dribble the bytes in odd sized chunks
        let mut out = vec![];
        for chunk in wire.chunks(7) {
            b.inbound.feed(chunk);
            while let Some(p) = b.inbound.decode().unwrap() {
                out.push(p.to_vec());
            }
        }
        assert_eq!(out, payloads.iter().map(|p| p.to_vec()).collect::<Vec<_>>());
    }

    #[test]
    fn plain_packets_are_aligned() {
        let mut codec = PacketCodec::new();
        for len in 0..40 {
            let wire = codec.outbound.encode(&vec![5; len]).unwrap();
            assert_eq!(wire.len() % 8, 0);
            let pad = wire[4] as usize;
            assert!(pad >= 4);
            assert_eq!(wire.len(), 4 + 1 + len + pad);
        }
        assert_eq!(codec.outbound_sequence(), 40);
    }

    #[test]
    fn encrypt_and_mac() {
        let (mut a, mut b) = pair(
            aes_hmac(CipherMode::Encrypt, false),
            aes_hmac(CipherMode::Decrypt, false),
        );
        transfer(&mut a, &mut b, &[b"first", &[0; 100], b""]);
        assert_eq!(b.inbound_sequence(), 3);
        assert_eq!(b.inbound_counter().packets, 3);
    }

    #[test]
    fn encrypt_then_mac() {
        let (mut a, mut b) = pair(
            aes_hmac(CipherMode::Encrypt, true),
            aes_hmac(CipherMode::Decrypt, true),
        );
        let wire = a.outbound.encode(b"etm").unwrap();
        // length in clear, the rest aligned on its own
        let len = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(len % 16, 0);
        b.inbound.feed(&wire);
        assert_eq!(b.inbound.decode().unwrap().unwrap().to_vec(), b"etm".to_vec());
        transfer(&mut a, &mut b, &[b"one", b"two"]);
    }

    #[test]
    fn aead_with_compression() {
        let (mut a, mut b) = pair(chacha(CipherMode::Encrypt), chacha(CipherMode::Decrypt));
        let big = vec![b'z'; 5000];
        transfer(&mut a, &mut b, &[b"hello", &big, b"again"]);
        // zlib shrinks the repetitive payload
        assert!(a.outbound_counter().bytes < 1000);
    }

    #[test]
    fn tampering_is_a_violation() {
        let (mut a, mut b) = pair(
            aes_hmac(CipherMode::Encrypt, false),
            aes_hmac(CipherMode::Decrypt, false),
        );
        let mut wire = a.outbound.encode(b"payload").unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        b.inbound.feed(&wire);
        assert!(matches!(b.inbound.decode(), Err(SshError::ProtocolViolation(_))));

        let (mut a, mut b) = pair(chacha(CipherMode::Encrypt), chacha(CipherMode::Decrypt));
        let mut wire = a.outbound.encode(b"payload").unwrap();
        wire[6] ^= 0x01;
        b.inbound.feed(&wire);
        assert!(matches!(b.inbound.decode(), Err(SshError::ProtocolViolation(_))));
    }

    #[test]
    fn oversized_length_is_a_violation() {
        let mut codec = PacketCodec::new();
        let mut wire = ((size::MAX_PACKET_LEN + 4) as u32).to_be_bytes().to_vec();
        wire.extend([0; 12]);
        codec.inbound.feed(&wire);
        assert!(matches!(codec.inbound.decode(), Err(SshError::ProtocolViolation(_))));

        let mut codec = PacketCodec::new();
        // aligned but the padding claims more than the packet holds
        codec.inbound.feed(&[0, 0, 0, 12, 40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(codec.inbound.decode(), Err(SshError::ProtocolViolation(_))));

        let mut codec = PacketCodec::new();
        // misaligned length
        codec.inbound.feed(&[0, 0, 0, 13, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(codec.inbound.decode(), Err(SshError::ProtocolViolation(_))));
    }

    #[test]
    fn key_switch_keeps_sequence() {
        let mut a = PacketCodec::new();
        let mut b = PacketCodec::new();
        transfer(&mut a, &mut b, &[b"before"]);

        let mut cipher = Ctr256::default();
        cipher.init(CipherMode::Encrypt, &[9; 32], &[8; 16]).unwrap();
        a.install_outbound(DirectionKeys {
            cipher: Box::new(cipher),
            mac: None,
            compress: Box::new(CompressNone::default()),
        });
        let mut cipher = Ctr256::default();
        cipher.init(CipherMode::Decrypt, &[9; 32], &[8; 16]).unwrap();
        b.install_inbound(DirectionKeys {
            cipher: Box::new(cipher),
            mac: None,
            compress: Box::new(CompressNone::default()),
        });
        assert_eq!(a.outbound_sequence(), 1);
        assert_eq!(a.outbound_counter().packets, 0);
        transfer(&mut a, &mut b, &[b"after"]);
        assert_eq!(b.inbound_sequence(), 2);
    }

    #[test]
    fn delayed_compression_waits_for_auth() {
        let delayed = |mode| {
            let mut cipher = Ctr128::default();
            cipher.init(mode, &[1; 16], &[2; 16]).unwrap();
            DirectionKeys {
                cipher: Box::new(cipher),
                mac: None,
                compress: Box::new(CompressZlib::new(true)),
            }
        };
        let (mut a, mut b) = pair(delayed(CipherMode::Encrypt), delayed(CipherMode::Decrypt));
        let big = vec![0_u8; 2000];
        let wire = a.outbound.encode(&big).unwrap();
        assert!(wire.len() > 2000);
        b.inbound.feed(&wire);
        b.inbound.decode().unwrap().unwrap();

        a.enable_delayed_compression();
        b.enable_delayed_compression();
        let wire = a.outbound.encode(&big).unwrap();
        assert!(wire.len() < 200);
        b.inbound.feed(&wire);
        assert_eq!(b.inbound.decode().unwrap().unwrap().to_vec(), big);
    }
}
