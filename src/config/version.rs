use std::io::{Read, Write};
use std::time::Duration;

use tracing::*;

use crate::{
    constant::{CLIENT_VERSION, SSH_MAGIC},
    error::{SshError, SshResult},
    transport::io::{read_with_timeout, write_with_timeout},
};

type OurVer = String;
type TheirVer = String;

/// identification lines longer than this are refused
const MAX_LINE: usize = 255;
/// a server may send this many bytes of other lines before its identification
const MAX_PRE_BANNER: usize = 64 * 1024;

#[derive(Debug, Clone, Default)]
pub(crate) enum SshVersion {
    V2(OurVer, TheirVer),
    #[default]
    Unknown,
}

impl SshVersion {
    /// Send our identification line then read the peer's one.
    ///
    /// Lines before the `SSH-` one are logged and skipped.
    pub fn exchange<S>(stream: &mut S, tm: Option<Duration>) -> SshResult<Self>
    where
        S: Read + Write,
    {
        Self::write(stream, tm)?;
        let their = Self::read(stream, tm)?;
        let ver = if their.starts_with("SSH-2.0-") || their.starts_with("SSH-1.99-") {
            SshVersion::V2(CLIENT_VERSION.to_owned(), their)
        } else {
            let err_msg = format!("unsupported protocol version {}", their);
            error!(err_msg);
            return Err(SshError::VersionDismatchError {
                our: CLIENT_VERSION.to_owned(),
                their,
            });
        };
        info!("version negotiation was successful.");
        Ok(ver)
    }

    fn write<S>(stream: &mut S, tm: Option<Duration>) -> SshResult<()>
    where
        S: Write,
    {
        info!("our version: [{}]", CLIENT_VERSION);
        let ver_string = format!("{}\r\n", CLIENT_VERSION);
        write_with_timeout(stream, tm, ver_string.as_bytes())
    }

    fn read<S>(stream: &mut S, tm: Option<Duration>) -> SshResult<String>
    where
        S: Read,
    {
        let mut total = 0;
        loop {
            // byte by byte, the first packet may follow right behind
            let mut line = vec![];
            let mut byte = [0_u8; 1];
            loop {
                read_with_timeout(stream, tm, &mut byte)?;
                total += 1;
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
                if total > MAX_PRE_BANNER
                    || (line.starts_with(SSH_MAGIC) && line.len() > MAX_LINE)
                {
                    let err_msg = "the peer identification is too long".to_owned();
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                }
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = crate::util::from_utf8(line)?;
            if line.as_bytes().starts_with(SSH_MAGIC) {
                info!("their version: [{}]", line);
                return Ok(line);
            }
            debug!("skip pre-banner line: {}", line);
        }
    }

    pub fn ours(&self) -> &str {
        match self {
            SshVersion::V2(our, _) => our,
            SshVersion::Unknown => CLIENT_VERSION,
        }
    }

    pub fn theirs(&self) -> &str {
        match self {
            SshVersion::V2(_, their) => their,
            SshVersion::Unknown => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn duplex(input: &[u8]) -> Duplex {
        Duplex {
            input: Cursor::new(input.to_vec()),
            output: vec![],
        }
    }

    #[test]
    fn skips_pre_banner_lines() {
        let mut s = duplex(b"welcome\r\nto the host\r\nSSH-2.0-OpenSSH_9.3\r\n\0\0\0\x0c");
        let ver = SshVersion::exchange(&mut s, None).unwrap();
        assert_eq!(ver.theirs(), "SSH-2.0-OpenSSH_9.3");
        assert_eq!(s.output, format!("{}\r\n", CLIENT_VERSION).into_bytes());
        // the packet bytes are left in the stream
        assert_eq!(s.input.position(), 43);
    }

    #[test]
    fn ssh1_is_refused() {
        let mut s = duplex(b"SSH-1.5-old\r\n");
        assert!(matches!(
            SshVersion::exchange(&mut s, None),
            Err(SshError::VersionDismatchError { .. })
        ));
    }

    #[test]
    fn eof_before_banner() {
        let mut s = duplex(b"SSH-2.0");
        assert!(SshVersion::exchange(&mut s, None).is_err());
    }
}
