use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, TryRecvError},
        Arc,
    },
};

use tracing::*;

use crate::{
    constant::{ssh_extended_data, ssh_str},
    error::{SshError, SshResult},
    model::{BackendResp, BackendRqst, Data, ExitSignal, TerminalSize},
    session::SessionHandle,
};

fn io_error(e: SshError) -> io::Error {
    match e {
        SshError::IoError(e) => e,
        e => io::Error::new(io::ErrorKind::Other, e),
    }
}

/// Sends CHANNEL_CLOSE once, whoever asks first
#[derive(Clone)]
pub struct ChannelCloser {
    local_id: u32,
    session: SessionHandle,
    closed: Arc<AtomicBool>,
}

impl ChannelCloser {
    pub fn close(&self) -> SshResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("try close channel {}.", self.local_id);
            self.session.request(BackendRqst::CloseChannel(self.local_id))?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// closes the channel once both halves are gone
struct CloseOnDrop(ChannelCloser);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let _ = self.0.close();
    }
}

/// The receiving half of a channel
///
/// Bytes handed out through [Read] are reported back to the backend, only
/// then does the peer get more window.
pub struct ChannelReader {
    local_id: u32,
    rcv: Receiver<BackendResp>,
    session: SessionHandle,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    eof: bool,
    closed: bool,
    exit_status: Option<u32>,
    exit_signal: Option<ExitSignal>,
    _guard: Arc<CloseOnDrop>,
}

impl ChannelReader {
    /// book one message from the backend, returns a request reply if it was one
    fn handle(&mut self, resp: BackendResp) -> Option<bool> {
        match resp {
            BackendResp::Data(mut buf) => self.stdout.append(&mut buf),
            BackendResp::ExtendedData(data_type, mut buf) => {
                if data_type != ssh_extended_data::STDERR {
                    debug!("Channel {} extended data of type {}", self.local_id, data_type);
                }
                self.stderr.append(&mut buf)
            }
            BackendResp::Eof => self.eof = true,
            BackendResp::ExitStatus(status) => self.exit_status = Some(status),
            BackendResp::ExitSignal(signal) => self.exit_signal = Some(signal),
            BackendResp::Close => {
                // the remote actively close their end
                self.closed = true;
                self.eof = true;
            }
            BackendResp::Success(_) => return Some(true),
            BackendResp::Failure => return Some(false),
            BackendResp::Opened(_) | BackendResp::OpenFailed(..) => {
                trace!("Channel {} ignores a stray open reply", self.local_id)
            }
        }
        None
    }

    /// block for the next message, `None` once the backend dropped the channel
    fn recv(&mut self) -> SshResult<Option<bool>> {
        match self.rcv.recv() {
            Ok(resp) => Ok(self.handle(resp)),
            Err(_) => {
                self.closed = true;
                self.eof = true;
                if self.session.is_closed() {
                    Err(self.session.lost())
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// wait for the reply of a `want_reply` request, buffering whatever
    /// arrives in between
    pub(crate) fn wait_reply(&mut self) -> SshResult<bool> {
        loop {
            if self.closed {
                return Err(SshError::ChannelFailure(format!(
                    "channel {} closed while waiting for a reply",
                    self.local_id
                )));
            }
            if let Some(ok) = self.recv()? {
                return Ok(ok);
            }
        }
    }

    fn consumed(&self, len: usize) {
        if len > 0 && !self.closed {
            let _ = self
                .session
                .request(BackendRqst::Consumed(self.local_id, len as u32));
        }
    }

    fn take_stdout(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.stdout.len());
        buf[..n].copy_from_slice(&self.stdout[..n]);
        self.stdout.drain(..n);
        self.consumed(n);
        n
    }

    /// whatever arrived without blocking, `None` if nothing did
    pub fn try_read(&mut self) -> SshResult<Option<Vec<u8>>> {
        loop {
            match self.rcv.try_recv() {
                Ok(resp) => {
                    self.handle(resp);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    self.eof = true;
                    break;
                }
            }
        }
        if self.stdout.is_empty() {
            return Ok(None);
        }
        let buf = std::mem::take(&mut self.stdout);
        self.consumed(buf.len());
        Ok(Some(buf))
    }

    /// stderr received so far
    pub fn take_stderr(&mut self) -> Vec<u8> {
        let buf = std::mem::take(&mut self.stderr);
        self.consumed(buf.len());
        buf
    }

    /// read everything until the peer closes the channel
    pub fn wait_close(&mut self) -> SshResult<()> {
        while !self.closed {
            self.recv()?;
        }
        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.stdout.is_empty()
    }

    /// the channel is gone, not merely at end of file
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// <https://datatracker.ietf.org/doc/html/rfc4254#section-6.10>
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    pub fn exit_signal(&self) -> Option<&ExitSignal> {
        self.exit_signal.as_ref()
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.stdout.is_empty() && !self.eof {
            self.recv().map_err(io_error)?;
        }
        Ok(self.take_stdout(buf))
    }
}

/// The sending half of a channel
pub struct ChannelWriter {
    local_id: u32,
    session: SessionHandle,
    closer: ChannelCloser,
    _guard: Arc<CloseOnDrop>,
}

impl ChannelWriter {
    pub fn send_eof(&self) -> SshResult<()> {
        self.session.request(BackendRqst::Eof(self.local_id))
    }

    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    pub(crate) fn send_request(&self, name: &str, want_reply: bool, payload: Data) -> SshResult<()> {
        self.session.request(BackendRqst::Request {
            id: self.local_id,
            name: name.to_owned(),
            want_reply,
            payload,
        })
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closer.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write on a closed channel",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        trace!("Channel {} send {} data", self.local_id, buf.len());
        let (ack_send, ack_recv) = mpsc::channel();
        self.session
            .request(BackendRqst::Data(self.local_id, buf.to_vec(), ack_send))
            .map_err(io_error)?;
        // blocks while the peer's window is exhausted
        match ack_recv.recv() {
            Ok(true) => Ok(buf.len()),
            Ok(false) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("channel {} is not writable", self.local_id),
            )),
            Err(_) if self.session.is_closed() => Err(io_error(self.session.lost())),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("channel {} closed before the data went out", self.local_id),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// An open channel
///
/// Reads return stdout; stderr is kept apart, see [ChannelHandle::take_stderr].
/// The channel is closed when the handle, or both halves of [ChannelHandle::split],
/// are dropped.
pub struct ChannelHandle {
    reader: ChannelReader,
    writer: ChannelWriter,
}

impl ChannelHandle {
    pub(crate) fn new(local_id: u32, rcv: Receiver<BackendResp>, session: SessionHandle) -> Self {
        let closer = ChannelCloser {
            local_id,
            session: session.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let guard = Arc::new(CloseOnDrop(closer.clone()));
        Self {
            reader: ChannelReader {
                local_id,
                rcv,
                session: session.clone(),
                stdout: vec![],
                stderr: vec![],
                eof: false,
                closed: false,
                exit_status: None,
                exit_signal: None,
                _guard: guard.clone(),
            },
            writer: ChannelWriter {
                local_id,
                session,
                closer,
                _guard: guard,
            },
        }
    }

    pub fn id(&self) -> u32 {
        self.reader.local_id
    }

    /// independently owned halves, e.g. for one thread per direction
    pub fn split(self) -> (ChannelReader, ChannelWriter) {
        (self.reader, self.writer)
    }

    fn request(&mut self, name: &str, payload: Data) -> SshResult<()> {
        debug!("Channel {} request {}", self.id(), name);
        self.writer.send_request(name, true, payload)?;
        if self.reader.wait_reply()? {
            trace!("{}: control command ok", self.id());
            Ok(())
        } else {
            let err_msg = format!("{} was refused on channel {}", name, self.id());
            error!(err_msg);
            Err(SshError::ChannelFailure(err_msg))
        }
    }

    /// Send an executable command to the server
    ///
    /// The output is read from the handle, the channel closes once the
    /// command finished.
    pub fn exec(&mut self, command: &str) -> SshResult<()> {
        let mut data = Data::new();
        data.put_str(command);
        self.request(ssh_str::EXEC, data)
    }

    pub fn shell(&mut self) -> SshResult<()> {
        self.request(ssh_str::SHELL, Data::new())
    }

    /// ask for a pseudo terminal, before `shell` or `exec`
    pub fn request_pty(&mut self, tv: TerminalSize) -> SshResult<()> {
        let (columns, rows, width, height) = tv.fetch();
        let mut data = Data::new();
        data.put_str(ssh_str::XTERM_VAR)
            .put_u32(columns)
            .put_u32(rows)
            .put_u32(width)
            .put_u32(height);
        let model = [
            128, // TTY_OP_ISPEED
            0, 1, 0xc2, 0,   // 115200
            129, // TTY_OP_OSPEED
            0, 1, 0xc2, 0,    // 115200 again
            0_u8, // TTY_OP_END
        ];
        data.put_u8s(&model);
        self.request(ssh_str::PTY_REQ, data)
    }

    /// start a subsystem such as `sftp`
    pub fn subsystem(&mut self, name: &str) -> SshResult<()> {
        let mut data = Data::new();
        data.put_str(name);
        self.request(ssh_str::SUBSYSTEM, data)
    }

    pub fn window_change(&self, tv: TerminalSize) -> SshResult<()> {
        let (columns, rows, width, height) = tv.fetch();
        let mut data = Data::new();
        data.put_u32(columns)
            .put_u32(rows)
            .put_u32(width)
            .put_u32(height);
        self.writer
            .send_request(ssh_str::WINDOW_CHANGE, false, data)
    }

    /// <https://datatracker.ietf.org/doc/html/rfc4254#section-6.3.1>
    pub fn x11_request(
        &mut self,
        single_connection: bool,
        protocol: &str,
        cookie: &str,
        screen: u32,
    ) -> SshResult<()> {
        let mut data = Data::new();
        data.put_bool(single_connection)
            .put_str(protocol)
            .put_str(cookie)
            .put_u32(screen);
        self.request(ssh_str::X11_REQ, data)
    }

    pub fn send_eof(&self) -> SshResult<()> {
        self.writer.send_eof()
    }

    pub fn try_read(&mut self) -> SshResult<Option<Vec<u8>>> {
        self.reader.try_read()
    }

    pub fn take_stderr(&mut self) -> Vec<u8> {
        self.reader.take_stderr()
    }

    pub fn wait_close(&mut self) -> SshResult<()> {
        self.reader.wait_close()
    }

    pub fn exit_status(&self) -> Option<u32> {
        self.reader.exit_status()
    }

    pub fn exit_signal(&self) -> Option<&ExitSignal> {
        self.reader.exit_signal()
    }

    pub fn closer(&self) -> ChannelCloser {
        self.writer.closer()
    }

    pub fn close(&self) -> SshResult<()> {
        self.writer.closer.close()
    }
}

impl Read for ChannelHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for ChannelHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
