use std::{
    io::{Read, Write},
    sync::{mpsc::Receiver, Arc},
    thread::{self, JoinHandle},
};

use tracing::*;

use crate::{
    channel::ChannelMultiplexer,
    error::SshResult,
    event::SshEvent,
    model::{BackendRqst, Timeout},
    transport::Transport,
};

use super::Shared;

/// messages worked off before the socket gets its turn again
const REQUESTS_PER_ROUND: usize = 64;

pub(super) fn spawn<S>(
    transport: Transport<S>,
    mux: ChannelMultiplexer,
    rcv: Receiver<BackendRqst>,
    shared: Arc<Shared>,
) -> SshResult<JoinHandle<()>>
where
    S: Read + Write + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("ssh-backend".to_owned())
        .spawn(move || Backend::new(transport, mux, rcv, shared).run())?;
    Ok(handle)
}

struct Backend<S>
where
    S: Read + Write,
{
    transport: Transport<S>,
    mux: ChannelMultiplexer,
    rcv: Receiver<BackendRqst>,
    shared: Arc<Shared>,
    kex_rounds: u32,
}

impl<S> Backend<S>
where
    S: Read + Write,
{
    fn new(
        transport: Transport<S>,
        mux: ChannelMultiplexer,
        rcv: Receiver<BackendRqst>,
        shared: Arc<Shared>,
    ) -> Self {
        let kex_rounds = transport.kex_rounds();
        Self {
            transport,
            mux,
            rcv,
            shared,
            kex_rounds,
        }
    }

    fn run(mut self) {
        let reason = match self.client_loop() {
            Ok(()) => {
                info!("Session backend closed");
                self.shared.finish(None);
                "closed by application".to_owned()
            }
            Err(e) => {
                let phase = self.transport.phase();
                error!("Error {:?} occurred when running backend task", e);
                if e.is_connection_fatal() {
                    self.transport.disconnect(&e.to_string());
                }
                self.shared.finish(Some((phase, e.to_string())));
                e.to_string()
            }
        };
        // every consumer learns about it through its closed receiver
        self.mux.close_all();
        self.shared.events.emit(&SshEvent::Disconnected { reason });
    }

    fn client_loop(&mut self) -> SshResult<()> {
        let mut idle = Timeout::idle();
        loop {
            let mut busy = false;

            for _ in 0..REQUESTS_PER_ROUND {
                match self.rcv.try_recv() {
                    Ok(rqst) => {
                        busy = true;
                        if !self.handle_request(rqst)? {
                            return Ok(());
                        }
                    }
                    // the multiplexer holds a handle itself, so the queue
                    // only ever runs empty; leaving takes a Disconnect
                    Err(_) => break,
                }
            }

            while let Some(data) = self.transport.recv()? {
                busy = true;
                let message_code = data.first().copied().unwrap_or_default();
                if !self.mux.dispatch(data, &mut self.transport)? {
                    warn!("Unknown message code {}, reply unimplemented", message_code);
                    self.transport.unimplemented()?;
                }
            }

            let rounds = self.transport.kex_rounds();
            if rounds != self.kex_rounds {
                self.kex_rounds = rounds;
                self.shared
                    .set_negotiated(self.transport.negotiated().cloned());
            }

            if busy {
                idle.renew();
            } else {
                idle.till_next_tick()?;
            }
        }
    }

    /// returns false once the session should end
    fn handle_request(&mut self, rqst: BackendRqst) -> SshResult<bool> {
        let transport = &mut self.transport;
        match rqst {
            BackendRqst::OpenChannel {
                kind,
                window,
                max_packet,
                sender,
            } => self.mux.open(kind, window, max_packet, sender, transport)?,
            BackendRqst::AcceptChannel(id, sender) => self.mux.accept(id, sender, transport)?,
            BackendRqst::RejectChannel(id, reason, description) => {
                self.mux.reject(id, reason, &description, transport)?
            }
            BackendRqst::Data(id, data, ack) => {
                trace!("Channel {} send {} data", id, data.len());
                self.mux.send_data(id, data, ack, transport)?
            }
            BackendRqst::Consumed(id, len) => self.mux.consumed(id, len, transport)?,
            BackendRqst::Request {
                id,
                name,
                want_reply,
                payload,
            } => {
                trace!("Channel {} send request {}", id, name);
                self.mux.request(id, &name, want_reply, &payload, transport)?
            }
            BackendRqst::Eof(id) => self.mux.send_eof(id, transport)?,
            BackendRqst::CloseChannel(id) => {
                info!("try close channel {}.", id);
                self.mux.close(id, transport)?
            }
            BackendRqst::GlobalRequest {
                name,
                payload,
                sender,
            } => self.mux.global_request(&name, &payload, sender, transport)?,
            BackendRqst::SetOpenHandler(kind, handler) => self.mux.set_open_handler(kind, handler),
            BackendRqst::SetGlobalHandler(name, handler) => {
                self.mux.set_global_handler(name, handler)
            }
            BackendRqst::Rekey => transport.rekey()?,
            BackendRqst::Disconnect => {
                transport.disconnect("closed by application");
                return Ok(false);
            }
        }
        Ok(true)
    }
}
