use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};

use crate::{SshError, SshResult};

use super::Compression;

const CHUNK: usize = 4096;

/// The "zlib" compression is described in [RFC1950] and in [RFC1951].
/// The compression context is initialized after each key exchange, and
/// is passed from one packet to the next, with only a partial flush
/// being performed at the end of each packet.
///
/// <https://www.openssh.com/txt/draft-miller-secsh-compression-delayed-00.txt>
/// The "zlib@openssh.com" method operates identically to the "zlib"
/// method except that packet compression does not start until the server
/// sends a SSH_MSG_USERAUTH_SUCCESS packet.
pub(crate) struct CompressZlib {
    decompressor: Decompress,
    compressor: Compress,
    delayed: bool,
}

impl CompressZlib {
    pub fn new(delayed: bool) -> Self {
        Self {
            decompressor: Decompress::new(true),
            compressor: Compress::new(flate2::Compression::fast(), true),
            delayed,
        }
    }
}

impl Compression for CompressZlib {
    fn is_delayed(&self) -> bool {
        self.delayed
    }

    fn compress(&mut self, buf: &[u8]) -> SshResult<Vec<u8>> {
        let mut buf_in = buf;
        let mut buf_out = Vec::with_capacity(buf.len() + CHUNK);
        loop {
            if buf_out.capacity() - buf_out.len() < CHUNK {
                buf_out.reserve(CHUNK);
            }
            let in_before = self.compressor.total_in();
            let out_before = buf_out.len();
            let result = self
                .compressor
                .compress_vec(buf_in, &mut buf_out, FlushCompress::Partial);
            let consumed = (self.compressor.total_in() - in_before) as usize;
            buf_in = &buf_in[consumed..];

            match result {
                Ok(Status::BufError) if consumed == 0 && buf_out.len() == out_before => break,
                Ok(Status::Ok) | Ok(Status::BufError) => {
                    // the flush is complete once output space was left over
                    if buf_in.is_empty() && buf_out.len() < buf_out.capacity() {
                        break;
                    }
                }
                Ok(Status::StreamEnd) => {
                    return Err(SshError::CompressionError(
                        "Stream ends during the compress".to_owned(),
                    ));
                }
                Err(e) => return Err(SshError::CompressionError(e.to_string())),
            }
        }
        Ok(buf_out)
    }

    fn decompress(&mut self, buf: &[u8]) -> SshResult<Vec<u8>> {
        let mut buf_in = buf;
        let mut buf_out = Vec::with_capacity(buf.len() * 2 + CHUNK);
        loop {
            if buf_out.capacity() - buf_out.len() < CHUNK {
                buf_out.reserve(CHUNK);
            }
            let in_before = self.decompressor.total_in();
            let out_before = buf_out.len();
            let result =
                self.decompressor
                    .decompress_vec(buf_in, &mut buf_out, FlushDecompress::Sync);
            let consumed = (self.decompressor.total_in() - in_before) as usize;
            buf_in = &buf_in[consumed..];

            match result {
                Ok(Status::BufError) if consumed == 0 && buf_out.len() == out_before => break,
                Ok(Status::Ok) | Ok(Status::BufError) => {
                    if buf_in.is_empty() && buf_out.len() < buf_out.capacity() {
                        break;
                    }
                }
                Ok(Status::StreamEnd) => {
                    return Err(SshError::CompressionError(
                        "Stream ends during the decompress".to_owned(),
                    ));
                }
                Err(e) => return Err(SshError::CompressionError(e.to_string())),
            }
        }
        Ok(buf_out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_carries_over_packets() {
        let mut a = CompressZlib::new(false);
        let mut b = CompressZlib::new(false);
        let messages: Vec<Vec<u8>> = vec![
            b"hello hello hello hello".to_vec(),
            vec![],
            (0..20000_u32).map(|i| (i % 251) as u8).collect(),
            b"hello hello hello hello".to_vec(),
        ];
        for m in &messages {
            let packed = a.compress(m).unwrap();
            assert_eq!(&b.decompress(&packed).unwrap(), m);
        }
    }

    #[test]
    fn garbage_is_an_error() {
        let mut z = CompressZlib::new(true);
        assert!(z.is_delayed());
        assert!(z.decompress(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
