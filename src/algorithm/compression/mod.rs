use crate::SshResult;

mod zlib;

pub(crate) use zlib::CompressZlib;

/// <https://www.rfc-editor.org/rfc/rfc4253#section-6.2>
pub trait Compression: Send {
    // The "zlib@openssh.com" method operates identically to the "zlib"
    // method described in [RFC4252] except that packet compression does not
    // start until the server sends a SSH_MSG_USERAUTH_SUCCESS packet
    fn is_delayed(&self) -> bool {
        false
    }
    fn compress(&mut self, buf: &[u8]) -> SshResult<Vec<u8>>;
    fn decompress(&mut self, buf: &[u8]) -> SshResult<Vec<u8>>;
}

#[derive(Default)]
pub(crate) struct CompressNone {}

impl Compression for CompressNone {
    fn compress(&mut self, buf: &[u8]) -> SshResult<Vec<u8>> {
        Ok(buf.to_vec())
    }

    fn decompress(&mut self, buf: &[u8]) -> SshResult<Vec<u8>> {
        Ok(buf.to_vec())
    }
}
