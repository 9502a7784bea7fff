use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::error::{SshError, SshResult};

pub(crate) fn from_utf8(v: Vec<u8>) -> SshResult<String> {
    match String::from_utf8(v) {
        Ok(v) => Ok(v),
        Err(e) => {
            let err_msg = format!("Byte to utf8 string error, error info: {:?}", e);
            tracing::error!(err_msg);
            Err(SshError::ProtocolViolation(err_msg))
        }
    }
}

/// 十六位随机数
pub(crate) fn cookie() -> Vec<u8> {
    let cookie: [u8; 16] = OsRng.gen();
    cookie.to_vec()
}

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

pub(crate) fn vec_u8_to_string(v: Vec<u8>, pat: &str) -> SshResult<Vec<String>> {
    let result = from_utf8(v)?;
    if result.is_empty() {
        return Ok(vec![]);
    }
    Ok(result.split(pat).map(|x| x.to_owned()).collect())
}

/// run a callback supplied by the user, turning a panic into `None`
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("{} panicked, ignoring it", what);
            None
        }
    }
}
