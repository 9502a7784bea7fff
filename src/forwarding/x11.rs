use std::{
    io::Read,
    net::TcpStream,
    path::PathBuf,
    sync::{Arc, Weak},
    thread,
};

use ring::constant_time::verify_slices_are_equal;
use tracing::*;

use crate::{
    channel::{ChannelHandle, ChannelKind, IncomingChannel},
    constant::{
        forwarding::{X11_BASE_PORT, X11_KEY, X11_UNIX_DIR},
        size, ssh_str,
    },
    error::{OpenFailureReason, SshError, SshResult},
    event::SshEvent,
    util,
};

use super::{ActiveTunnel, ForwardingClient, Inner, LocalSocket, TunnelDirection};

/// A parsed `DISPLAY` value: `host:display.screen`, `unix:display` or `:display`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct X11Display {
    /// empty or "unix" for the local socket
    pub host: String,
    pub display: u32,
    pub screen: u32,
}

impl X11Display {
    pub fn parse(value: &str) -> SshResult<Self> {
        let invalid = || SshError::ForwardingError(format!("invalid X11 display {:?}", value));
        let (host, rest) = value.rsplit_once(':').ok_or_else(invalid)?;
        let (display, screen) = match rest.split_once('.') {
            Some((d, s)) => (d, s.parse().map_err(|_| invalid())?),
            None => (rest, 0),
        };
        Ok(Self {
            host: host.to_owned(),
            display: display.parse().map_err(|_| invalid())?,
            screen,
        })
    }

    fn is_local(&self) -> bool {
        self.host.is_empty() || self.host == "unix"
    }

    /// the TCP port of a display on a remote host
    pub fn tcp_port(&self) -> SshResult<u16> {
        u16::try_from(self.display)
            .ok()
            .and_then(|d| X11_BASE_PORT.checked_add(d))
            .ok_or_else(|| {
                let err_msg = format!("X11 display {} has no TCP port", self.display);
                error!(err_msg);
                SshError::ForwardingError(err_msg)
            })
    }

    pub fn unix_socket(&self) -> PathBuf {
        PathBuf::from(format!("{}/X{}", X11_UNIX_DIR, self.display))
    }
}

/// One record of an `.Xauthority` file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XAuthEntry {
    pub family: u16,
    pub address: Vec<u8>,
    /// the display number, as text
    pub number: String,
    pub name: String,
    pub data: Vec<u8>,
}

/// The records of an `.Xauthority` file
///
/// Each record is a big endian u16 family followed by four u16 length
/// prefixed fields: address, display number, auth name and auth data.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct XAuthority {
    entries: Vec<XAuthEntry>,
}

impl XAuthority {
    pub fn parse(mut bytes: &[u8]) -> SshResult<Self> {
        fn take<'a>(bytes: &mut &'a [u8], len: usize) -> SshResult<&'a [u8]> {
            if bytes.len() < len {
                return Err(SshError::ForwardingError(
                    "truncated Xauthority record".to_owned(),
                ));
            }
            let (head, tail) = bytes.split_at(len);
            *bytes = tail;
            Ok(head)
        }
        fn take_u16(bytes: &mut &[u8]) -> SshResult<u16> {
            let b = take(bytes, 2)?;
            Ok(u16::from_be_bytes([b[0], b[1]]))
        }
        fn field(bytes: &mut &[u8]) -> SshResult<Vec<u8>> {
            let len = take_u16(bytes)? as usize;
            Ok(take(bytes, len)?.to_vec())
        }

        let mut entries = vec![];
        while !bytes.is_empty() {
            let family = take_u16(&mut bytes)?;
            let address = field(&mut bytes)?;
            let number = util::from_utf8(field(&mut bytes)?)?;
            let name = util::from_utf8(field(&mut bytes)?)?;
            let data = field(&mut bytes)?;
            entries.push(XAuthEntry {
                family,
                address,
                number,
                name,
                data,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[XAuthEntry] {
        &self.entries
    }

    /// the MIT-MAGIC-COOKIE-1 of a display
    pub fn cookie(&self, display: u32) -> Option<&[u8]> {
        let number = display.to_string();
        self.entries
            .iter()
            .find(|e| e.number == number && e.name == ssh_str::MIT_MAGIC_COOKIE)
            .map(|e| e.data.as_slice())
    }
}

/// state of an enabled X11 forwarding
pub(super) struct X11Forwarding {
    display: X11Display,
    fake: Vec<u8>,
    /// empty when no Xauthority was given, the setup then carries no auth
    real: Vec<u8>,
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Swap the fake cookie of an X11 connection setup for the real one.
///
/// Returns `None` until `buf` holds the whole setup, then the rewritten
/// setup and how many bytes of `buf` it replaces.
pub(super) fn rewrite_setup(
    buf: &[u8],
    fake: &[u8],
    real: &[u8],
) -> SshResult<Option<(Vec<u8>, usize)>> {
    const HEADER: usize = 12;
    if buf.len() < HEADER {
        return Ok(None);
    }
    let read_u16: fn([u8; 2]) -> u16 = match buf[0] {
        b'B' => u16::from_be_bytes,
        b'l' => u16::from_le_bytes,
        order => {
            let err_msg = format!("unknown X11 byte order {:#x}", order);
            error!(err_msg);
            return Err(SshError::ForwardingError(err_msg));
        }
    };
    let write_u16: fn(u16) -> [u8; 2] = if buf[0] == b'B' {
        u16::to_be_bytes
    } else {
        u16::to_le_bytes
    };
    let name_len = read_u16([buf[6], buf[7]]) as usize;
    let data_len = read_u16([buf[8], buf[9]]) as usize;
    let total = HEADER + pad4(name_len) + pad4(data_len);
    if buf.len() < total {
        return Ok(None);
    }

    let name = &buf[HEADER..HEADER + name_len];
    let data_start = HEADER + pad4(name_len);
    let data = &buf[data_start..data_start + data_len];
    if name != ssh_str::MIT_MAGIC_COOKIE.as_bytes() || verify_slices_are_equal(data, fake).is_err() {
        let err_msg = "X11 connection does not carry our cookie".to_owned();
        warn!(err_msg);
        return Err(SshError::ForwardingError(err_msg));
    }

    let mut setup = buf[..6].to_vec();
    if real.is_empty() {
        setup.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    } else {
        setup.extend_from_slice(&write_u16(name_len as u16));
        setup.extend_from_slice(&write_u16(real.len() as u16));
        setup.extend_from_slice(&buf[10..12]);
        setup.extend_from_slice(&buf[HEADER..data_start]);
        setup.extend_from_slice(real);
        setup.resize(setup.len() + pad4(real.len()) - real.len(), 0);
    }
    Ok(Some((setup, total)))
}

/// read the setup off the channel, rewrite it and hand it to the X server
fn relay_setup<L>(channel: &mut ChannelHandle, socket: &mut L, fake: &[u8], real: &[u8]) -> SshResult<()>
where
    L: LocalSocket,
{
    let mut pending = vec![];
    let mut buf = vec![0; size::BUF_SIZE];
    loop {
        let n = channel.read(&mut buf)?;
        if n == 0 {
            return Err(SshError::ForwardingError(
                "X11 channel closed during the setup".to_owned(),
            ));
        }
        pending.extend_from_slice(&buf[..n]);
        if let Some((setup, used)) = rewrite_setup(&pending, fake, real)? {
            socket.write_all(&setup)?;
            socket.write_all(&pending[used..])?;
            return Ok(());
        }
    }
}

fn bridge<L>(
    owner: &Arc<Inner>,
    mut socket: L,
    mut channel: ChannelHandle,
    peer: String,
    fake: &[u8],
    real: &[u8],
) -> SshResult<()>
where
    L: LocalSocket + 'static,
{
    relay_setup(&mut channel, &mut socket, fake, real)?;
    ActiveTunnel::start(owner, TunnelDirection::Incoming, X11_KEY, peer, socket, channel)?;
    Ok(())
}

fn on_x11_open(owner: &Weak<Inner>, incoming: IncomingChannel) {
    let Some(owner) = owner.upgrade() else {
        return;
    };
    let peer = match incoming.kind() {
        ChannelKind::X11 {
            originator_address,
            originator_port,
        } => format!("{}:{}", originator_address, originator_port),
        _ => return,
    };
    let state = owner
        .x11
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .as_ref()
        .map(|x| (x.display.clone(), x.fake.clone(), x.real.clone()));
    let Some((display, fake, real)) = state else {
        let _ = incoming.reject(
            OpenFailureReason::AdministrativelyProhibited,
            "X11 forwarding is not enabled",
        );
        return;
    };

    let spawned = thread::Builder::new()
        .name("x11".to_owned())
        .spawn(move || {
            let result = if display.is_local() {
                connect_unix(&owner, &display, incoming, peer, &fake, &real)
            } else {
                connect_tcp(&owner, &display.host, &display, incoming, peer, &fake, &real)
            };
            if let Err(e) = result {
                warn!("X11 connection failed: {}", e);
            }
        });
    if let Err(e) = spawned {
        error!("Can not start the X11 thread: {}", e);
    }
}

fn connect_tcp(
    owner: &Arc<Inner>,
    host: &str,
    display: &X11Display,
    incoming: IncomingChannel,
    peer: String,
    fake: &[u8],
    real: &[u8],
) -> SshResult<()> {
    let connected = display
        .tcp_port()
        .and_then(|port| Ok(TcpStream::connect((host, port))?));
    match connected {
        Ok(socket) => incoming
            .accept()
            .and_then(|channel| bridge(owner, socket, channel, peer, fake, real)),
        Err(e) => {
            let _ = incoming.reject(OpenFailureReason::ConnectFailed, &e.to_string());
            Err(e)
        }
    }
}

#[cfg(unix)]
fn connect_unix(
    owner: &Arc<Inner>,
    display: &X11Display,
    incoming: IncomingChannel,
    peer: String,
    fake: &[u8],
    real: &[u8],
) -> SshResult<()> {
    match std::os::unix::net::UnixStream::connect(display.unix_socket()) {
        Ok(socket) => incoming
            .accept()
            .and_then(|channel| bridge(owner, socket, channel, peer, fake, real)),
        Err(e) => {
            let _ = incoming.reject(OpenFailureReason::ConnectFailed, &e.to_string());
            Err(e.into())
        }
    }
}

#[cfg(not(unix))]
fn connect_unix(
    owner: &Arc<Inner>,
    display: &X11Display,
    incoming: IncomingChannel,
    peer: String,
    fake: &[u8],
    real: &[u8],
) -> SshResult<()> {
    // no unix sockets here, the display listens on localhost
    connect_tcp(owner, "127.0.0.1", display, incoming, peer, fake, real)
}

impl ForwardingClient {
    /// Enable X11 forwarding on the session channel `channel` for `display`.
    ///
    /// The server only ever sees a fake cookie; the real one, looked up in
    /// the `.Xauthority` content, is put in place when an X11 client connects.
    pub fn start_x11_forwarding(
        &self,
        channel: &mut ChannelHandle,
        display: &str,
        xauthority: Option<&[u8]>,
        single_connection: bool,
    ) -> SshResult<()> {
        let display = X11Display::parse(display)?;
        if !display.is_local() {
            display.tcp_port()?;
        }
        let number = display.display;
        let real = match xauthority {
            Some(bytes) => XAuthority::parse(bytes)?
                .cookie(number)
                .map(|c| c.to_vec())
                .unwrap_or_default(),
            None => vec![],
        };
        if real.is_empty() {
            warn!("No cookie for display {}, X11 connections go without auth", number);
        }
        let fake = util::random_bytes(size::COOKIE_LEN);
        let screen = display.screen;
        *self.inner.x11.lock().unwrap_or_else(|e| e.into_inner()) = Some(X11Forwarding {
            display,
            fake: fake.clone(),
            real,
        });

        let owner = Arc::downgrade(&self.inner);
        self.inner.session().set_channel_open_handler(
            ssh_str::X11,
            Some(move |incoming: IncomingChannel| on_x11_open(&owner, incoming)),
        )?;
        channel.x11_request(
            single_connection,
            ssh_str::MIT_MAGIC_COOKIE,
            &hex::encode(&fake),
            screen,
        )?;

        info!("X11 forwarding enabled");
        self.inner.events().emit(&SshEvent::ForwardingStarted {
            key: X11_KEY.to_owned(),
            remote: true,
        });
        Ok(())
    }

    pub fn stop_x11_forwarding(&self) {
        let was_enabled = self
            .inner
            .x11
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if !was_enabled {
            return;
        }
        let _ = self
            .inner
            .session()
            .set_channel_open_handler(ssh_str::X11, None::<fn(IncomingChannel)>);
        self.inner.stop_tunnels(TunnelDirection::Incoming, X11_KEY);
        self.inner.events().emit(&SshEvent::ForwardingStopped {
            key: X11_KEY.to_owned(),
            remote: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE: [u8; 16] = [0xaa; 16];
    const REAL: [u8; 16] = [0x55; 16];

    fn setup(order: u8, name: &[u8], data: &[u8]) -> Vec<u8> {
        let u16_bytes = |v: u16| {
            if order == b'B' {
                v.to_be_bytes()
            } else {
                v.to_le_bytes()
            }
        };
        let mut buf = vec![order, 0];
        buf.extend_from_slice(&u16_bytes(11));
        buf.extend_from_slice(&u16_bytes(0));
        buf.extend_from_slice(&u16_bytes(name.len() as u16));
        buf.extend_from_slice(&u16_bytes(data.len() as u16));
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(name);
        buf.resize(pad4(buf.len()), 0);
        buf.extend_from_slice(data);
        buf.resize(pad4(buf.len()), 0);
        buf
    }

    fn xauth_record(number: &str, name: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend_from_slice(&256_u16.to_be_bytes());
        for field in [b"myhost".as_slice(), number.as_bytes(), name.as_bytes(), data] {
            buf.extend_from_slice(&(field.len() as u16).to_be_bytes());
            buf.extend_from_slice(field);
        }
        buf
    }

    #[test]
    fn displays() {
        let d = X11Display::parse("localhost:10.2").unwrap();
        assert_eq!((d.host.as_str(), d.display, d.screen), ("localhost", 10, 2));
        assert_eq!(d.tcp_port().unwrap(), 6010);
        assert!(!d.is_local());

        let d = X11Display::parse(":0").unwrap();
        assert!(d.is_local());
        assert_eq!(d.unix_socket(), PathBuf::from("/tmp/.X11-unix/X0"));

        let d = X11Display::parse("unix:1").unwrap();
        assert!(d.is_local());
        assert_eq!(d.display, 1);

        assert!(X11Display::parse("nodisplay").is_err());
        assert!(X11Display::parse("host:x").is_err());
    }

    #[test]
    fn display_beyond_the_port_range() {
        let d = X11Display::parse("localhost:59535").unwrap();
        assert_eq!(d.tcp_port().unwrap(), u16::MAX);
        let d = X11Display::parse("localhost:59536").unwrap();
        assert!(matches!(d.tcp_port(), Err(SshError::ForwardingError(_))));
        let d = X11Display::parse("localhost:70000").unwrap();
        assert!(d.tcp_port().is_err());
    }

    #[test]
    fn xauthority_lookup() {
        let mut bytes = xauth_record("1", "XDM-AUTHORIZATION-1", &[1; 8]);
        bytes.extend(xauth_record("0", ssh_str::MIT_MAGIC_COOKIE, &REAL));
        let auth = XAuthority::parse(&bytes).unwrap();
        assert_eq!(auth.entries().len(), 2);
        assert_eq!(auth.cookie(0), Some(REAL.as_slice()));
        assert_eq!(auth.cookie(1), None);

        bytes.pop();
        assert!(XAuthority::parse(&bytes).is_err());
    }

    #[test]
    fn cookie_is_swapped() {
        for order in [b'B', b'l'] {
            let mut buf = setup(order, ssh_str::MIT_MAGIC_COOKIE.as_bytes(), &FAKE);
            let total = buf.len();
            buf.extend_from_slice(b"more");

            let (rewritten, used) = rewrite_setup(&buf, &FAKE, &REAL).unwrap().unwrap();
            assert_eq!(used, total);
            assert_eq!(rewritten, setup(order, ssh_str::MIT_MAGIC_COOKIE.as_bytes(), &REAL));
        }
    }

    #[test]
    fn setup_without_real_cookie_drops_auth() {
        let buf = setup(b'l', ssh_str::MIT_MAGIC_COOKIE.as_bytes(), &FAKE);
        let (rewritten, _) = rewrite_setup(&buf, &FAKE, &[]).unwrap().unwrap();
        assert_eq!(rewritten, setup(b'l', b"", b""));
    }

    #[test]
    fn partial_setup_waits() {
        let buf = setup(b'B', ssh_str::MIT_MAGIC_COOKIE.as_bytes(), &FAKE);
        assert!(rewrite_setup(&buf[..8], &FAKE, &REAL).unwrap().is_none());
        assert!(rewrite_setup(&buf[..buf.len() - 1], &FAKE, &REAL)
            .unwrap()
            .is_none());
    }

    #[test]
    fn wrong_cookie_is_refused() {
        let buf = setup(b'B', ssh_str::MIT_MAGIC_COOKIE.as_bytes(), &REAL);
        assert!(rewrite_setup(&buf, &FAKE, &REAL).is_err());
    }
}
