use std::{
    collections::{HashMap, VecDeque},
    sync::mpsc::Sender,
};

use tracing::*;

use crate::{
    config::ChannelDefaults,
    constant::ssh_connection_code,
    error::{OpenFailureReason, SshError, SshResult},
    event::{EventDispatcher, SshEvent},
    model::{BackendResp, Data, U32Iter},
    session::SessionHandle,
    util,
};

use super::{
    Channel, ChannelKind, ChannelState, GlobalRequestHandler, IncomingChannel,
    IncomingChannelHandler, Outgoing,
};

/// All channels of one connection
///
/// Owned by the connection backend, so id allocation and dispatch never race.
pub(crate) struct ChannelMultiplexer {
    ids: U32Iter,
    channels: HashMap<u32, Channel>,
    open_handlers: HashMap<String, Box<dyn IncomingChannelHandler>>,
    global_handlers: HashMap<String, Box<dyn GlobalRequestHandler>>,
    /// our global requests waiting for a reply, in order
    pending_globals: VecDeque<Sender<BackendResp>>,
    defaults: ChannelDefaults,
    events: EventDispatcher,
    /// handed to channels the peer opens
    session: Option<SessionHandle>,
}

impl ChannelMultiplexer {
    pub fn new(defaults: ChannelDefaults, events: EventDispatcher) -> Self {
        Self {
            ids: U32Iter::default(),
            channels: HashMap::new(),
            open_handlers: HashMap::new(),
            global_handlers: HashMap::new(),
            pending_globals: VecDeque::new(),
            defaults,
            events,
            session: None,
        }
    }

    pub fn attach(&mut self, session: SessionHandle) {
        self.session = Some(session);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn state(&self, id: u32) -> Option<ChannelState> {
        self.channels.get(&id).map(|c| c.state())
    }

    fn allocate(&mut self) -> Option<u32> {
        let channels = &self.channels;
        self.ids.next_free(|id| channels.contains_key(&id))
    }

    /// a channel the peer is talking about must exist
    fn peer_channel(&mut self, id: u32) -> SshResult<&mut Channel> {
        match self.channels.get_mut(&id) {
            Some(c) => Ok(c),
            None => {
                let err_msg = format!("message for the unknown channel {}", id);
                error!(err_msg);
                Err(SshError::ProtocolViolation(err_msg))
            }
        }
    }

    fn remove_if_closed(&mut self, id: u32) {
        if self.channels.get(&id).map(|c| c.closed()).unwrap_or(false) {
            self.channels.remove(&id);
            self.events.emit(&SshEvent::ChannelClosed { id });
        }
    }

    pub fn set_open_handler(&mut self, kind: String, handler: Option<Box<dyn IncomingChannelHandler>>) {
        match handler {
            Some(h) => {
                self.open_handlers.insert(kind, h);
            }
            None => {
                self.open_handlers.remove(&kind);
            }
        }
    }

    pub fn set_global_handler(&mut self, name: String, handler: Option<Box<dyn GlobalRequestHandler>>) {
        match handler {
            Some(h) => {
                self.global_handlers.insert(name, h);
            }
            None => {
                self.global_handlers.remove(&name);
            }
        }
    }

    /// allocate a local id and send CHANNEL_OPEN, the outcome goes to `sender`
    pub fn open<O>(
        &mut self,
        kind: ChannelKind,
        window: u32,
        max_packet: u32,
        sender: Sender<BackendResp>,
        out: &mut O,
    ) -> SshResult<()>
    where
        O: Outgoing,
    {
        let Some(id) = self.allocate() else {
            let _ = sender.send(BackendResp::OpenFailed(
                OpenFailureReason::ResourceShortage,
                "no free channel id".to_owned(),
            ));
            return Ok(());
        };
        info!("try open channel {}.", id);

        let mut data = Data::new();
        data.put_u8(ssh_connection_code::CHANNEL_OPEN)
            .put_str(kind.name())
            .put_u32(id)
            .put_u32(window)
            .put_u32(max_packet);
        kind.put_fields(&mut data);

        self.channels
            .insert(id, Channel::local(id, kind, window, sender));
        out.send_packet(data)
    }

    pub fn accept<O>(&mut self, id: u32, sender: Sender<BackendResp>, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        let defaults = self.defaults;
        let Some(channel) = self.channels.get_mut(&id) else {
            debug!("Channel {} is gone, can not accept it", id);
            return Ok(());
        };
        if channel.state() != ChannelState::RemoteRequested {
            debug!("Channel {} was already decided", id);
            return Ok(());
        }
        let mut data = Data::new();
        data.put_u8(ssh_connection_code::CHANNEL_OPEN_CONFIRMATION)
            .put_u32(channel.remote_id)
            .put_u32(id)
            .put_u32(defaults.window_size)
            .put_u32(defaults.max_packet);
        out.send_packet(data)?;

        channel.accepted(sender);
        let kind = channel.kind.name().to_owned();
        self.events.emit(&SshEvent::ChannelOpened { id, kind });
        Ok(())
    }

    pub fn reject<O>(
        &mut self,
        id: u32,
        reason: OpenFailureReason,
        description: &str,
        out: &mut O,
    ) -> SshResult<()>
    where
        O: Outgoing,
    {
        match self.channels.get(&id) {
            Some(c) if c.state() == ChannelState::RemoteRequested => {
                info!("reject channel {}: {} {}", id, reason, description);
                let mut data = Data::new();
                data.put_u8(ssh_connection_code::CHANNEL_OPEN_FAILURE)
                    .put_u32(c.remote_id)
                    .put_u32(reason.code())
                    .put_str(description)
                    .put_str("");
                self.channels.remove(&id);
                out.send_packet(data)
            }
            _ => Ok(()),
        }
    }

    /// A write to a channel that is gone fails on the writer's side only,
    /// the connection goes on.
    pub fn send_data<O>(&mut self, id: u32, buf: Vec<u8>, ack: Sender<bool>, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        match self.channels.get_mut(&id) {
            Some(c) => c.send_data(buf, ack, out),
            None => {
                debug!("Channel {} is gone, {} bytes refused", id, buf.len());
                let _ = ack.send(false);
                Ok(())
            }
        }
    }

    pub fn consumed<O>(&mut self, id: u32, len: u32, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        match self.channels.get_mut(&id) {
            Some(c) => c.consumed(len, out),
            None => Ok(()),
        }
    }

    pub fn send_eof<O>(&mut self, id: u32, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        match self.channels.get_mut(&id) {
            Some(c) => c.send_eof(out),
            None => Ok(()),
        }
    }

    pub fn request<O>(
        &mut self,
        id: u32,
        name: &str,
        want_reply: bool,
        payload: &[u8],
        out: &mut O,
    ) -> SshResult<()>
    where
        O: Outgoing,
    {
        match self.channels.get_mut(&id) {
            Some(c) => c.send_request(name, want_reply, payload, out),
            None => {
                debug!("Channel {} is gone, request {} dropped", id, name);
                Ok(())
            }
        }
    }

    /// local close, the id stays taken until the peer closed too
    pub fn close<O>(&mut self, id: u32, out: &mut O) -> SshResult<()>
    where
        O: Outgoing,
    {
        if let Some(c) = self.channels.get_mut(&id) {
            match c.state() {
                ChannelState::LocalRequested => {
                    // closed once the peer answered the open
                    c.abandon();
                }
                _ => c.local_close(out)?,
            }
        }
        self.remove_if_closed(id);
        Ok(())
    }

    pub fn global_request<O>(
        &mut self,
        name: &str,
        payload: &[u8],
        sender: Option<Sender<BackendResp>>,
        out: &mut O,
    ) -> SshResult<()>
    where
        O: Outgoing,
    {
        info!("send global request {}", name);
        let mut data = Data::new();
        data.put_u8(ssh_connection_code::GLOBAL_REQUEST)
            .put_str(name)
            .put_bool(sender.is_some());
        data.extend_from_slice(payload);
        if let Some(sender) = sender {
            self.pending_globals.push_back(sender);
        }
        out.send_packet(data)
    }

    /// Handle one connection protocol message.
    ///
    /// Returns false for message codes this layer does not know.
    pub fn dispatch<O>(&mut self, mut data: Data, out: &mut O) -> SshResult<bool>
    where
        O: Outgoing,
    {
        let message_code = data.get_u8()?;
        match message_code {
            // Successfully open a channel
            ssh_connection_code::CHANNEL_OPEN_CONFIRMATION => {
                let id = data.get_u32()?;
                let remote_id = data.get_u32()?;
                let remote_window = data.get_u32()?;
                let remote_max_packet = data.get_u32()?;
                let channel = self.peer_channel(id)?;
                if channel.state() != ChannelState::LocalRequested {
                    let err_msg = format!("channel {} confirmed twice", id);
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                }
                channel.opened(remote_id, remote_window, remote_max_packet);
                let kind = channel.kind.name().to_owned();
                if channel.abandoned() {
                    channel.local_close(out)?;
                } else {
                    self.events.emit(&SshEvent::ChannelOpened { id, kind });
                }
            }
            /*
                byte CHANNEL_OPEN_FAILURE
                uint32 recipient channel
                uint32 reason code
                string description，ISO-10646 UTF-8 [RFC3629]
                string language tag，[RFC3066]
            */
            // Fail to open a channel
            ssh_connection_code::CHANNEL_OPEN_FAILURE => {
                let id = data.get_u32()?;
                let reason = OpenFailureReason::from(data.get_u32()?);
                let description = data.get_string().unwrap_or_else(|_| String::from("error"));
                let channel = self.peer_channel(id)?;
                if channel.state() != ChannelState::LocalRequested {
                    let err_msg = format!("open failure for the open channel {}", id);
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                }
                warn!("Channel {} open failed: {} {}", id, reason, description);
                channel.notify(BackendResp::OpenFailed(reason, description));
                self.channels.remove(&id);
            }
            ssh_connection_code::CHANNEL_OPEN => {
                let kind_name = data.get_string()?;
                let remote_id = data.get_u32()?;
                let window = data.get_u32()?;
                let max_packet = data.get_u32()?;
                let kind = ChannelKind::parse(&kind_name, &mut data)?;
                self.on_remote_open(kind, remote_id, window, max_packet, out)?;
            }
            ssh_connection_code::CHANNEL_DATA => {
                let id = data.get_u32()?;
                let buf = data.get_u8s()?;
                trace!("Channel {id} get {} data", buf.len());
                self.peer_channel(id)?.recv_data(None, buf)?;
            }
            ssh_connection_code::CHANNEL_EXTENDED_DATA => {
                let id = data.get_u32()?;
                let data_type = data.get_u32()?;
                let buf = data.get_u8s()?;
                trace!("Channel {id} get {} extended data, type {data_type}", buf.len());
                self.peer_channel(id)?.recv_data(Some(data_type), buf)?;
            }
            // flow_control msg
            ssh_connection_code::CHANNEL_WINDOW_ADJUST => {
                let id = data.get_u32()?;
                let to_add = data.get_u32()?;
                self.peer_channel(id)?.recv_window_adjust(to_add, out)?;
            }
            ssh_connection_code::CHANNEL_EOF => {
                let id = data.get_u32()?;
                self.peer_channel(id)?.recv_eof();
            }
            ssh_connection_code::CHANNEL_CLOSE => {
                let id = data.get_u32()?;
                info!("Channel {} recv close", id);
                self.peer_channel(id)?.remote_close(out)?;
                self.remove_if_closed(id);
            }
            ssh_connection_code::CHANNEL_REQUEST => {
                let id = data.get_u32()?;
                let name = data.get_string()?;
                let want_reply = data.get_bool()?;
                let channel = self.peer_channel(id)?;
                let understood = channel.recv_request(&name, data)?;
                if want_reply {
                    let code = if understood {
                        ssh_connection_code::CHANNEL_SUCCESS
                    } else {
                        ssh_connection_code::CHANNEL_FAILURE
                    };
                    let mut reply = Data::new();
                    reply.put_u8(code).put_u32(channel.remote_id);
                    out.send_packet(reply)?;
                }
            }
            ssh_connection_code::CHANNEL_SUCCESS => {
                let id = data.get_u32()?;
                trace!("Channel {} control success", id);
                self.peer_channel(id)?.recv_reply(true)?;
            }
            ssh_connection_code::CHANNEL_FAILURE => {
                let id = data.get_u32()?;
                trace!("Channel {} control failed", id);
                self.peer_channel(id)?.recv_reply(false)?;
            }
            ssh_connection_code::GLOBAL_REQUEST => {
                let name = data.get_string()?;
                let want_reply = data.get_bool()?;
                let accepted = match self.global_handlers.get(&name) {
                    Some(handler) => util::guarded("global request handler", || {
                        handler.on_request(&name, &data)
                    })
                    .unwrap_or(false),
                    None => {
                        debug!("Refuse global request {}", name);
                        false
                    }
                };
                if want_reply {
                    let mut reply = Data::new();
                    reply.put_u8(if accepted {
                        ssh_connection_code::REQUEST_SUCCESS
                    } else {
                        ssh_connection_code::REQUEST_FAILURE
                    });
                    out.send_packet(reply)?;
                }
            }
            code @ (ssh_connection_code::REQUEST_SUCCESS | ssh_connection_code::REQUEST_FAILURE) => {
                let Some(sender) = self.pending_globals.pop_front() else {
                    let err_msg = "global request reply without a request".to_owned();
                    error!(err_msg);
                    return Err(SshError::ProtocolViolation(err_msg));
                };
                let resp = if code == ssh_connection_code::REQUEST_SUCCESS {
                    BackendResp::Success(data)
                } else {
                    BackendResp::Failure
                };
                let _ = sender.send(resp);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn on_remote_open<O>(
        &mut self,
        kind: ChannelKind,
        remote_id: u32,
        window: u32,
        max_packet: u32,
        out: &mut O,
    ) -> SshResult<()>
    where
        O: Outgoing,
    {
        let failure = |reason: OpenFailureReason, description: &str| {
            let mut data = Data::new();
            data.put_u8(ssh_connection_code::CHANNEL_OPEN_FAILURE)
                .put_u32(remote_id)
                .put_u32(reason.code())
                .put_str(description)
                .put_str("");
            data
        };

        let session = match &self.session {
            Some(session) if self.open_handlers.contains_key(kind.name()) => session.clone(),
            _ => {
                info!("Refuse to open a {} channel", kind.name());
                return out.send_packet(failure(
                    OpenFailureReason::UnknownChannelType,
                    "unsupported channel type",
                ));
            }
        };
        let Some(id) = self.allocate() else {
            return out.send_packet(failure(
                OpenFailureReason::ResourceShortage,
                "no free channel id",
            ));
        };
        info!("peer opens {} channel {} as {}", kind.name(), remote_id, id);

        let channel = Channel::remote(
            id,
            remote_id,
            kind.clone(),
            self.defaults.window_size,
            window,
            max_packet,
        );
        self.channels.insert(id, channel);

        let Some(handler) = self.open_handlers.get(kind.name()) else {
            return Ok(());
        };
        let incoming = IncomingChannel::new(id, kind, session);
        // a panicking handler drops `incoming`, which rejects the channel
        util::guarded("channel open handler", || handler.on_open(incoming));
        Ok(())
    }

    /// the connection is gone, every consumer learns it by its receiver
    pub fn close_all(&mut self) {
        for (_, channel) in self.channels.drain() {
            channel.notify(BackendResp::Close);
        }
        self.pending_globals.clear();
        self.open_handlers.clear();
        self.global_handlers.clear();
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn mux(window: u32) -> ChannelMultiplexer {
        ChannelMultiplexer::new(
            ChannelDefaults {
                window_size: window,
                max_packet: 32768,
            },
            EventDispatcher::default(),
        )
    }

    fn confirm(local: u32, remote: u32, window: u32) -> Data {
        let mut data = Data::new();
        data.put_u8(ssh_connection_code::CHANNEL_OPEN_CONFIRMATION)
            .put_u32(local)
            .put_u32(remote)
            .put_u32(window)
            .put_u32(32768);
        data
    }

    fn channel_data(id: u32, len: usize) -> Data {
        let mut data = Data::new();
        data.put_u8(ssh_connection_code::CHANNEL_DATA)
            .put_u32(id)
            .put_u8s(&vec![7; len]);
        data
    }

    /// open one session channel and let the peer confirm it as 100
    fn opened(mux: &mut ChannelMultiplexer) -> (u32, mpsc::Receiver<BackendResp>) {
        let (snd, rcv) = mpsc::channel();
        let mut out = vec![];
        let window = mux.defaults.window_size;
        mux.open(ChannelKind::Session, window, 32768, snd, &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], ssh_connection_code::CHANNEL_OPEN);
        mux.dispatch(confirm(0, 100, 1 << 20), &mut out).unwrap();
        assert!(matches!(rcv.try_recv(), Ok(BackendResp::Opened(0))));
        (0, rcv)
    }

    #[test]
    fn window_is_enforced() {
        let mut mux = mux(32768);
        let (id, rcv) = opened(&mut mux);
        let mut out = vec![];

        mux.dispatch(channel_data(id, 32768), &mut out).unwrap();
        assert!(matches!(rcv.try_recv(), Ok(BackendResp::Data(d)) if d.len() == 32768));

        let result = mux.dispatch(channel_data(id, 1), &mut out);
        assert!(matches!(result, Err(SshError::ProtocolViolation(_))));
        // the byte beyond the window never reached the consumer
        assert!(rcv.try_recv().is_err());
    }

    #[test]
    fn window_adjust_follows_consumption() {
        let mut mux = mux(32768);
        let (id, _rcv) = opened(&mut mux);
        let mut out = vec![];

        mux.dispatch(channel_data(id, 20000), &mut out).unwrap();
        assert!(out.is_empty());

        mux.consumed(id, 20000, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        let mut adjust = out.remove(0);
        assert_eq!(adjust.get_u8().unwrap(), ssh_connection_code::CHANNEL_WINDOW_ADJUST);
        assert_eq!(adjust.get_u32().unwrap(), 100);
        assert_eq!(adjust.get_u32().unwrap(), 20000);
    }

    #[test]
    fn unknown_channel_is_a_violation() {
        let mut mux = mux(32768);
        let mut out = vec![];
        let result = mux.dispatch(channel_data(9, 1), &mut out);
        assert!(matches!(result, Err(SshError::ProtocolViolation(_))));
    }

    #[test]
    fn close_handshake_frees_the_id() {
        let mut mux = mux(32768);
        let (id, rcv) = opened(&mut mux);
        let mut out = vec![];

        mux.close(id, &mut out).unwrap();
        assert_eq!(mux.state(id), Some(ChannelState::Closing));
        assert_eq!(out.pop().unwrap()[0], ssh_connection_code::CHANNEL_CLOSE);

        let mut close = Data::new();
        close
            .put_u8(ssh_connection_code::CHANNEL_CLOSE)
            .put_u32(id);
        mux.dispatch(close, &mut out).unwrap();
        // our close already went out
        assert!(out.is_empty());
        assert_eq!(mux.len(), 0);
        assert!(matches!(rcv.try_recv(), Ok(BackendResp::Close)));
    }

    #[test]
    fn unhandled_open_type_is_refused() {
        let mut mux = mux(32768);
        let mut out = vec![];
        let mut open = Data::new();
        open.put_u8(ssh_connection_code::CHANNEL_OPEN)
            .put_str("auth-agent@openssh.com")
            .put_u32(5)
            .put_u32(1024)
            .put_u32(1024);
        assert!(mux.dispatch(open, &mut out).unwrap());

        let mut failure = out.remove(0);
        assert_eq!(failure.get_u8().unwrap(), ssh_connection_code::CHANNEL_OPEN_FAILURE);
        assert_eq!(failure.get_u32().unwrap(), 5);
        assert_eq!(
            failure.get_u32().unwrap(),
            OpenFailureReason::UnknownChannelType.code()
        );
        assert_eq!(mux.len(), 0);
    }

    #[test]
    fn unknown_global_request_is_refused() {
        let mut mux = mux(32768);
        let mut out = vec![];
        let mut request = Data::new();
        request
            .put_u8(ssh_connection_code::GLOBAL_REQUEST)
            .put_str("keepalive@openssh.com")
            .put_bool(true);
        mux.dispatch(request, &mut out).unwrap();
        assert_eq!(out[0][0], ssh_connection_code::REQUEST_FAILURE);
    }

    #[test]
    fn global_handler_answers() {
        let mut mux = mux(32768);
        let mut out = vec![];
        mux.set_global_handler(
            "hostkeys-00@openssh.com".to_owned(),
            Some(Box::new(|_: &str, _: &[u8]| true)),
        );
        let mut request = Data::new();
        request
            .put_u8(ssh_connection_code::GLOBAL_REQUEST)
            .put_str("hostkeys-00@openssh.com")
            .put_bool(true);
        mux.dispatch(request, &mut out).unwrap();
        assert_eq!(out[0][0], ssh_connection_code::REQUEST_SUCCESS);
    }

    #[test]
    fn global_replies_keep_order() {
        let mut mux = mux(32768);
        let mut out = vec![];
        let (first, first_rcv) = mpsc::channel();
        let (second, second_rcv) = mpsc::channel();
        mux.global_request("a", &[], Some(first), &mut out).unwrap();
        mux.global_request("b", &[], Some(second), &mut out).unwrap();

        let mut failure = Data::new();
        failure.put_u8(ssh_connection_code::REQUEST_FAILURE);
        let mut success = Data::new();
        success.put_u8(ssh_connection_code::REQUEST_SUCCESS);
        mux.dispatch(failure, &mut out).unwrap();
        mux.dispatch(success, &mut out).unwrap();

        assert!(matches!(first_rcv.try_recv(), Ok(BackendResp::Failure)));
        assert!(matches!(second_rcv.try_recv(), Ok(BackendResp::Success(_))));

        let mut stray = Data::new();
        stray.put_u8(ssh_connection_code::REQUEST_SUCCESS);
        assert!(mux.dispatch(stray, &mut out).is_err());
    }

    #[test]
    fn exit_status_reaches_the_consumer() {
        let mut mux = mux(32768);
        let (id, rcv) = opened(&mut mux);
        let mut out = vec![];
        let mut request = Data::new();
        request
            .put_u8(ssh_connection_code::CHANNEL_REQUEST)
            .put_u32(id)
            .put_str("exit-status")
            .put_bool(false)
            .put_u32(3);
        mux.dispatch(request, &mut out).unwrap();
        assert!(matches!(rcv.try_recv(), Ok(BackendResp::ExitStatus(3))));
        assert!(out.is_empty());
    }

    #[test]
    fn writes_wait_for_window_adjust() {
        let mut mux = mux(32768);
        let (snd, _rcv) = mpsc::channel();
        let mut out = vec![];
        mux.open(ChannelKind::Session, 32768, 32768, snd, &mut out)
            .unwrap();
        // the peer grants no window at all
        mux.dispatch(confirm(0, 100, 0), &mut out).unwrap();
        out.clear();

        let (ack, acked) = mpsc::channel();
        mux.send_data(0, vec![1; 10], ack, &mut out).unwrap();
        assert!(out.is_empty());
        assert!(acked.try_recv().is_err());

        let adjust = |to_add: u32| {
            let mut data = Data::new();
            data.put_u8(ssh_connection_code::CHANNEL_WINDOW_ADJUST)
                .put_u32(0)
                .put_u32(to_add);
            data
        };
        mux.dispatch(adjust(4), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        // part of the write went out, the writer still waits
        assert!(acked.try_recv().is_err());

        mux.dispatch(adjust(100), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        let mut rest = out.remove(1);
        assert_eq!(rest.get_u8().unwrap(), ssh_connection_code::CHANNEL_DATA);
        assert_eq!(rest.get_u32().unwrap(), 100);
        assert_eq!(rest.get_u8s().unwrap(), vec![1; 6]);
        assert_eq!(acked.try_recv(), Ok(true));
    }

    #[test]
    fn blocked_writes_end_with_the_channel() {
        let mut mux = mux(32768);
        let (snd, _rcv) = mpsc::channel();
        let mut out = vec![];
        mux.open(ChannelKind::Session, 32768, 32768, snd, &mut out)
            .unwrap();
        mux.dispatch(confirm(0, 100, 0), &mut out).unwrap();

        let (ack, acked) = mpsc::channel();
        mux.send_data(0, vec![1; 10], ack, &mut out).unwrap();
        mux.close(0, &mut out).unwrap();
        assert!(acked.recv().is_err());

        // nothing to write to once the id is free
        let (ack, acked) = mpsc::channel();
        mux.send_data(9, vec![1], ack, &mut out).unwrap();
        assert_eq!(acked.try_recv(), Ok(false));
    }

    #[test]
    fn handler_gets_the_peer_channel() {
        let (session, _rqst) = SessionHandle::detached();
        let mut mux = mux(32768);
        mux.attach(session);
        let (seen, opened) = mpsc::channel();
        mux.set_open_handler(
            "session".to_owned(),
            Some(Box::new(move |incoming: IncomingChannel| {
                let _ = seen.send(incoming);
            })),
        );
        let mut out = vec![];
        let mut open = Data::new();
        open.put_u8(ssh_connection_code::CHANNEL_OPEN)
            .put_str("session")
            .put_u32(5)
            .put_u32(1024)
            .put_u32(1024);
        mux.dispatch(open, &mut out).unwrap();

        let incoming = opened.try_recv().unwrap();
        assert_eq!(incoming.kind(), &ChannelKind::Session);
        assert_eq!(mux.state(0), Some(ChannelState::RemoteRequested));
        assert!(out.is_empty());
    }

    #[test]
    fn ids_skip_channels_in_use() {
        let mut mux = mux(32768);
        let (id, _rcv) = opened(&mut mux);
        let (snd, _rcv2) = mpsc::channel();
        let mut out = vec![];
        mux.open(ChannelKind::Session, 1024, 1024, snd, &mut out)
            .unwrap();
        assert_eq!(mux.len(), 2);
        // id 0 is still in use, the new channel got another one
        assert!(mux.state(id).is_some());
        assert!(mux.state(1).is_some());
    }
}
