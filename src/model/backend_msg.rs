use std::sync::mpsc::Sender;

use crate::channel::{ChannelKind, IncomingChannelHandler, GlobalRequestHandler};
use crate::error::OpenFailureReason;

use super::Data;

/// What the consumers ask the connection backend to do
///
/// Channel ids are the local ids handed out by the backend.
pub(crate) enum BackendRqst {
    OpenChannel {
        kind: ChannelKind,
        window: u32,
        max_packet: u32,
        sender: Sender<BackendResp>,
    },
    /// decision on a channel the peer opened
    AcceptChannel(u32, Sender<BackendResp>),
    RejectChannel(u32, OpenFailureReason, String),
    /// answered once the bytes went out under the peer's window, false if
    /// they never will
    Data(u32, Vec<u8>, Sender<bool>),
    /// the consumer processed this many bytes
    Consumed(u32, u32),
    Request {
        id: u32,
        name: String,
        want_reply: bool,
        payload: Data,
    },
    Eof(u32),
    CloseChannel(u32),
    GlobalRequest {
        name: String,
        payload: Data,
        sender: Option<Sender<BackendResp>>,
    },
    SetOpenHandler(String, Option<Box<dyn IncomingChannelHandler>>),
    SetGlobalHandler(String, Option<Box<dyn GlobalRequestHandler>>),
    Rekey,
    Disconnect,
}

/// <https://datatracker.ietf.org/doc/html/rfc4254#section-6.10>
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExitSignal {
    pub signal: String,
    pub core_dumped: bool,
    pub message: String,
}

/// What the backend tells one consumer
pub(crate) enum BackendResp {
    /// channel open confirmed, carries the local id
    Opened(u32),
    OpenFailed(OpenFailureReason, String),
    /// request or global request succeeded, with the response payload if any
    Success(Data),
    Failure,
    Data(Vec<u8>),
    ExtendedData(u32, Vec<u8>),
    Eof,
    ExitStatus(u32),
    ExitSignal(ExitSignal),
    Close,
}
