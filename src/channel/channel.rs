use std::{collections::VecDeque, sync::mpsc::Sender};

use tracing::*;

use crate::{
    constant::{ssh_connection_code, ssh_str},
    error::{SshError, SshResult},
    model::{BackendResp, Data, ExitSignal, FlowControl},
};

use super::{ChannelKind, Outgoing};

/// ```text
/// LocalRequested ──confirm──┐
///                           ├──> Open ──close──> Closing ──close──> Closed
/// RemoteRequested ─accept───┘
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChannelState {
    /// we sent CHANNEL_OPEN and wait for the peer
    LocalRequested,
    /// the peer sent CHANNEL_OPEN and waits for our decision
    RemoteRequested,
    Open,
    /// one side sent CHANNEL_CLOSE
    Closing,
    Closed,
}

/// bytes the consumer wrote, acknowledged once all of them went out
struct PendingWrite {
    buf: Vec<u8>,
    ack: Sender<bool>,
}

/// One channel as the backend sees it
pub(crate) struct Channel {
    pub local_id: u32,
    pub remote_id: u32,
    pub kind: ChannelKind,
    state: ChannelState,
    flow_control: FlowControl,
    /// where data and replies for the consumer go
    snd: Option<Sender<BackendResp>>,
    /// waiting for the peer's window, the writers block meanwhile
    pending_send: VecDeque<PendingWrite>,
    /// EOF requested by the consumer, sent once `pending_send` drained
    eof_pending: bool,
    local_eof: bool,
    local_close: bool,
    remote_close: bool,
    /// the consumer gave up before the peer confirmed the open
    abandoned: bool,
    /// `want_reply` requests waiting for SUCCESS / FAILURE, in order
    replies: usize,
}

impl Channel {
    pub fn local(local_id: u32, kind: ChannelKind, window: u32, snd: Sender<BackendResp>) -> Self {
        Self::new(local_id, 0, kind, window, Some(snd), ChannelState::LocalRequested)
    }

    /// `remote_window` and `remote_max_packet` come with the peer's open request
    pub fn remote(
        local_id: u32,
        remote_id: u32,
        kind: ChannelKind,
        window: u32,
        remote_window: u32,
        remote_max_packet: u32,
    ) -> Self {
        let mut channel =
            Self::new(local_id, remote_id, kind, window, None, ChannelState::RemoteRequested);
        channel
            .flow_control
            .set_remote(remote_window, remote_max_packet);
        channel
    }

    fn new(
        local_id: u32,
        remote_id: u32,
        kind: ChannelKind,
        window: u32,
        snd: Option<Sender<BackendResp>>,
        state: ChannelState,
    ) -> Self {
        Self {
            local_id,
            remote_id,
            kind,
            state,
            flow_control: FlowControl::new(window),
            snd,
            pending_send: VecDeque::new(),
            eof_pending: false,
            local_eof: false,
            local_close: false,
            remote_close: false,
            abandoned: false,
            replies: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn local_window(&self) -> u32 {
        self.flow_control.local_window()
    }

    /// the peer confirmed our open
    pub fn opened(&mut self, remote_id: u32, remote_window: u32, remote_max_packet: u32) {
        self.remote_id = remote_id;
        self.flow_control.set_remote(remote_window, remote_max_packet);
        self.state = ChannelState::Open;
        self.notify(BackendResp::Opened(self.local_id));
    }

    /// we accepted the peer's open
    pub fn accepted(&mut self, snd: Sender<BackendResp>) {
        self.snd = Some(snd);
        self.state = ChannelState::Open;
        self.notify(BackendResp::Opened(self.local_id));
    }

    /// forget the consumer, the channel gets closed once the peer answers
    pub fn abandon(&mut self) {
        self.abandoned = true;
        self.snd = None;
    }

    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    /// hand something to the consumer, a consumer that went away is not an error
    pub fn notify(&self, resp: BackendResp) {
        if let Some(snd) = &self.snd {
            if snd.send(resp).is_err() {
                trace!("Channel {} consumer is gone", self.local_id);
            }
        }
    }

    /// queue `buf`, `ack` learns whether it was sent
    pub fn send_data<O>(&mut self, buf: Vec<u8>, ack: Sender<bool>, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        if self.state != ChannelState::Open
            || self.eof_pending
            || self.local_eof
            || self.local_close
        {
            debug!("Channel {} drops {} bytes, it is not writable", self.local_id, buf.len());
            let _ = ack.send(false);
            return Ok(());
        }
        if buf.is_empty() {
            let _ = ack.send(true);
            return Ok(());
        }
        self.pending_send.push_back(PendingWrite { buf, ack });
        self.try_send_data(out)
    }

    fn try_send_data<O>(&mut self, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        // try to send as much as we can
        while self.flow_control.can_send() {
            let Some(front) = self.pending_send.front_mut() else {
                break;
            };
            let maybe_remain = self.flow_control.tune_on_send(&mut front.buf);

            let mut data = Data::new();
            data.put_u8(ssh_connection_code::CHANNEL_DATA)
                .put_u32(self.remote_id)
                .put_u8s(&front.buf);
            out.send_packet(data)?;

            if maybe_remain.is_empty() {
                if let Some(done) = self.pending_send.pop_front() {
                    let _ = done.ack.send(true);
                }
            } else {
                front.buf = maybe_remain;
            }
        }
        if self.pending_send.is_empty() && self.eof_pending {
            self.eof_pending = false;
            self.local_eof = true;
            let mut data = Data::new();
            data.put_u8(ssh_connection_code::CHANNEL_EOF)
                .put_u32(self.remote_id);
            out.send_packet(data)?;
        }
        Ok(())
    }

    pub fn send_eof<O>(&mut self, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        if self.state != ChannelState::Open || self.local_eof {
            return Ok(());
        }
        self.eof_pending = true;
        self.try_send_data(out)
    }

    /// CHANNEL_DATA or CHANNEL_EXTENDED_DATA from the peer
    ///
    /// The window is charged before anything is delivered, so data beyond
    /// it never reaches the consumer.
    pub fn recv_data(&mut self, data_type: Option<u32>, buf: Vec<u8>) -> SshResult<()> {
        self.flow_control.on_recv(buf.len())?;
        match data_type {
            None => self.notify(BackendResp::Data(buf)),
            Some(t) => self.notify(BackendResp::ExtendedData(t, buf)),
        }
        Ok(())
    }

    /// the consumer processed `len` bytes
    pub fn consumed<O>(&mut self, len: u32, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        if self.state != ChannelState::Open {
            return Ok(());
        }
        if let Some(to_add) = self.flow_control.on_consumed(len) {
            trace!("Channel {} window adjust {}", self.local_id, to_add);
            let mut data = Data::new();
            data.put_u8(ssh_connection_code::CHANNEL_WINDOW_ADJUST)
                .put_u32(self.remote_id)
                .put_u32(to_add);
            out.send_packet(data)?;
        }
        Ok(())
    }

    pub fn recv_window_adjust<O>(&mut self, to_add: u32, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        self.flow_control.on_window_adjust(to_add)?;
        self.try_send_data(out)
    }

    pub fn send_request<O>(
        &mut self,
        name: &str,
        want_reply: bool,
        payload: &[u8],
        out: &mut O,
    ) -> SshResult<()>
    where
        O: Outgoing,
    {
        if self.state != ChannelState::Open {
            debug!("Channel {} is not open, request {} dropped", self.local_id, name);
            if want_reply {
                self.notify(BackendResp::Failure);
            }
            return Ok(());
        }
        let mut data = Data::new();
        data.put_u8(ssh_connection_code::CHANNEL_REQUEST)
            .put_u32(self.remote_id)
            .put_str(name)
            .put_bool(want_reply);
        data.extend_from_slice(payload);
        if want_reply {
            self.replies += 1;
        }
        out.send_packet(data)
    }

    /// CHANNEL_SUCCESS or CHANNEL_FAILURE from the peer
    pub fn recv_reply(&mut self, success: bool) -> SshResult<()> {
        if self.replies == 0 {
            let err_msg = format!("Channel {} got a reply to no request", self.local_id);
            error!(err_msg);
            return Err(SshError::ProtocolViolation(err_msg));
        }
        self.replies -= 1;
        if success {
            self.notify(BackendResp::Success(Data::new()));
        } else {
            self.notify(BackendResp::Failure);
        }
        Ok(())
    }

    /// CHANNEL_REQUEST from the peer, returns whether it was understood
    pub fn recv_request(&mut self, name: &str, mut data: Data) -> SshResult<bool> {
        match name {
            ssh_str::EXIT_STATUS => {
                self.notify(BackendResp::ExitStatus(data.get_u32()?));
                Ok(true)
            }
            ssh_str::EXIT_SIGNAL => {
                let signal = data.get_string()?;
                let core_dumped = data.get_bool()?;
                let message = data.get_string().unwrap_or_default();
                self.notify(BackendResp::ExitSignal(ExitSignal {
                    signal,
                    core_dumped,
                    message,
                }));
                Ok(true)
            }
            s => {
                debug!("Channel {} ignores request {}", self.local_id, s);
                Ok(false)
            }
        }
    }

    pub fn recv_eof(&mut self) {
        trace!("Channel {} recv eof", self.local_id);
        self.notify(BackendResp::Eof);
    }

    /// send our CHANNEL_CLOSE unless it already went out
    pub fn local_close<O>(&mut self, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        if self.local_close || self.state == ChannelState::RemoteRequested {
            return Ok(());
        }
        trace!("Channel {} send local close", self.local_id);
        self.local_close = true;
        // blocked writers learn through their dropped acks
        self.pending_send.clear();
        let mut data = Data::new();
        data.put_u8(ssh_connection_code::CHANNEL_CLOSE)
            .put_u32(self.remote_id);
        out.send_packet(data)?;
        self.update_close_state();
        Ok(())
    }

    /// the peer's CHANNEL_CLOSE, answered right away
    pub fn remote_close<O>(&mut self, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        trace!("Channel {} recv remote close", self.local_id);
        self.remote_close = true;
        if self.local_close {
            self.update_close_state();
            Ok(())
        } else {
            self.local_close(out)
        }
    }

    fn update_close_state(&mut self) {
        if self.local_close && self.remote_close {
            if self.state != ChannelState::Closed {
                self.state = ChannelState::Closed;
                self.notify(BackendResp::Close);
            }
        } else {
            self.state = ChannelState::Closing;
        }
    }

    pub fn closed(&self) -> bool {
        self.state == ChannelState::Closed
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        info!("Channel {} closed", self.local_id);
    }
}
