use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::algorithm::encryption::{CipherMode, Encryption};
use crate::error::{SshError, SshResult};

const AES_BLOCK_SIZE: usize = 16;
const IV_SIZE: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

macro_rules! aes_ctr {
    ($name: ident, $inner: ty, $key_size: expr) => {
        #[derive(Default)]
        pub(crate) struct $name {
            cipher: Option<$inner>,
        }

        impl $name {
            fn cipher(&mut self) -> SshResult<&mut $inner> {
                self.cipher
                    .as_mut()
                    .ok_or_else(|| SshError::from(concat!(stringify!($name), " is used before init")))
            }
        }

        impl Encryption for $name {
            fn block_size(&self) -> usize {
                AES_BLOCK_SIZE
            }

            fn key_size(&self) -> usize {
                $key_size
            }

            fn iv_size(&self) -> usize {
                IV_SIZE
            }

            fn init(&mut self, _mode: CipherMode, key: &[u8], iv: &[u8]) -> SshResult<()> {
                if key.len() < $key_size || iv.len() < IV_SIZE {
                    return Err(SshError::KexError(format!(
                        "{} needs a {} bytes key and a {} bytes iv",
                        stringify!($name),
                        $key_size,
                        IV_SIZE
                    )));
                }
                let cipher = <$inner>::new_from_slices(&key[..$key_size], &iv[..IV_SIZE])
                    .map_err(|e| SshError::KexError(e.to_string()))?;
                self.cipher = Some(cipher);
                Ok(())
            }

            fn encrypt(&mut self, _sequence_number: u32, buf: &mut [u8]) -> SshResult<Vec<u8>> {
                self.cipher()?.apply_keystream(buf);
                Ok(vec![])
            }

            fn decrypt(&mut self, _sequence_number: u32, buf: &mut [u8], _tag: &[u8]) -> SshResult<()> {
                self.cipher()?.apply_keystream(buf);
                Ok(())
            }
        }
    };
}

// aes-128-ctr
aes_ctr!(Ctr128, Aes128Ctr, 16);
// aes-192-ctr
aes_ctr!(Ctr192, Aes192Ctr, 24);
// aes-256-ctr
aes_ctr!(Ctr256, Aes256Ctr, 32);
