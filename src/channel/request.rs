use std::sync::mpsc;

use tracing::*;

use crate::{
    error::{OpenFailureReason, SshError, SshResult},
    model::{BackendResp, BackendRqst},
    session::SessionHandle,
};

use super::{ChannelHandle, ChannelKind};

/// Decides about channels of one type the peer opens
///
/// Runs on the connection backend: it must return quickly, slow work such as
/// connecting a socket belongs on another thread, the [IncomingChannel] can be
/// moved there and decided later. A panic rejects the channel.
pub trait IncomingChannelHandler: Send {
    fn on_open(&self, channel: IncomingChannel);
}

impl<F> IncomingChannelHandler for F
where
    F: Fn(IncomingChannel) + Send,
{
    fn on_open(&self, channel: IncomingChannel) {
        self(channel)
    }
}

/// Answers one named global request of the peer, true means success
pub trait GlobalRequestHandler: Send {
    fn on_request(&self, name: &str, payload: &[u8]) -> bool;
}

impl<F> GlobalRequestHandler for F
where
    F: Fn(&str, &[u8]) -> bool + Send,
{
    fn on_request(&self, name: &str, payload: &[u8]) -> bool {
        self(name, payload)
    }
}

/// A channel the peer asked to open, waiting for our decision
///
/// Dropping it undecided rejects the channel.
pub struct IncomingChannel {
    local_id: u32,
    kind: ChannelKind,
    session: SessionHandle,
    decided: bool,
}

impl IncomingChannel {
    pub(crate) fn new(local_id: u32, kind: ChannelKind, session: SessionHandle) -> Self {
        Self {
            local_id,
            kind,
            session,
            decided: false,
        }
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    pub fn accept(mut self) -> SshResult<ChannelHandle> {
        self.decided = true;
        let (resp_send, resp_recv) = mpsc::channel();
        self.session
            .request(BackendRqst::AcceptChannel(self.local_id, resp_send))?;
        match resp_recv.recv() {
            Ok(BackendResp::Opened(id)) => {
                Ok(ChannelHandle::new(id, resp_recv, self.session.clone()))
            }
            Ok(_) => Err(SshError::ChannelOpenFailed {
                reason: OpenFailureReason::ConnectFailed,
                description: "channel closed before it was accepted".to_owned(),
            }),
            Err(_) => Err(self.session.lost()),
        }
    }

    pub fn reject(mut self, reason: OpenFailureReason, description: &str) -> SshResult<()> {
        self.decided = true;
        self.session.request(BackendRqst::RejectChannel(
            self.local_id,
            reason,
            description.to_owned(),
        ))
    }
}

impl Drop for IncomingChannel {
    fn drop(&mut self) {
        if !self.decided {
            debug!("Channel {} was not handled, rejecting it", self.local_id);
            let _ = self.session.request(BackendRqst::RejectChannel(
                self.local_id,
                OpenFailureReason::AdministrativelyProhibited,
                "not handled".to_owned(),
            ));
        }
    }
}
