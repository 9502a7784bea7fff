#[allow(clippy::module_inception)]
mod hash;
mod hash_ctx;

pub(crate) use hash::{Direction, KeySizes, SessionKeys};
pub(crate) use hash_ctx::HashCtx;

use ring::digest;

/// A streaming message digest
pub trait Digest: Send {
    fn output_size(&self) -> usize;
    fn update(&mut self, data: &[u8]);
    fn finish(self: Box<Self>) -> Vec<u8>;
}

/// sha1 / sha256 / sha384 / sha512 backed by ring
pub(crate) struct RingDigest {
    ctx: digest::Context,
}

impl RingDigest {
    pub fn new(algorithm: &'static digest::Algorithm) -> Self {
        Self {
            ctx: digest::Context::new(algorithm),
        }
    }
}

impl Digest for RingDigest {
    fn output_size(&self) -> usize {
        self.ctx.algorithm().output_len()
    }

    fn update(&mut self, data: &[u8]) {
        self.ctx.update(data)
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.ctx.finish().as_ref().to_vec()
    }
}

/// one-shot digest of `data` by a digest instance
pub(crate) fn digest(mut d: Box<dyn Digest>, data: &[u8]) -> Vec<u8> {
    d.update(data);
    d.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_abc() {
        let d = Box::new(RingDigest::new(&digest::SHA256));
        assert_eq!(d.output_size(), 32);
        let out = super::digest(d, b"abc");
        assert_eq!(
            hex::encode(out),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
