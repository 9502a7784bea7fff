use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::SshResult;
use crate::model::Timeout;

fn closed() -> io::Error {
    io::Error::new(ErrorKind::UnexpectedEof, "connection closed by peer")
}

/// fill `buf` from a non-blocking stream, polling until `tm` expires
pub(crate) fn read_with_timeout<S>(stream: &mut S, tm: Option<Duration>, buf: &mut [u8]) -> SshResult<()>
where
    S: Read,
{
    let want_len = buf.len();
    let mut offset = 0;
    let mut timeout = Timeout::new(tm);

    while offset < want_len {
        match stream.read(&mut buf[offset..]) {
            Ok(0) => return Err(closed().into()),
            Ok(i) => {
                offset += i;
                timeout.renew();
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => timeout.till_next_tick()?,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// whatever is available right now, 0 if nothing is
pub(crate) fn try_read<S>(stream: &mut S, buf: &mut [u8]) -> SshResult<usize>
where
    S: Read,
{
    match stream.read(buf) {
        Ok(0) if !buf.is_empty() => Err(closed().into()),
        Ok(i) => Ok(i),
        Err(e) => match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::Interrupted => Ok(0),
            _ => Err(e.into()),
        },
    }
}

pub(crate) fn write_with_timeout<S>(stream: &mut S, tm: Option<Duration>, buf: &[u8]) -> SshResult<()>
where
    S: Write,
{
    let want_len = buf.len();
    let mut offset = 0;
    let mut timeout = Timeout::new(tm);

    while offset < want_len {
        match stream.write(&buf[offset..]) {
            Ok(0) => return Err(closed().into()),
            Ok(i) => {
                offset += i;
                timeout.renew();
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => timeout.till_next_tick()?,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    loop {
        match stream.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => timeout.till_next_tick()?,
            Err(e) => return Err(e.into()),
        }
    }
}
