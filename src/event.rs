use std::sync::{Arc, RwLock};

use tracing::*;

use crate::util;

/// Notifications about what a connection is doing
///
/// Nothing in the library depends on them being consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SshEvent {
    KexCompleted { kex: String, rekey: bool },
    KexFailed { reason: String },
    ChannelOpened { id: u32, kind: String },
    ChannelClosed { id: u32 },
    /// `remote` tells a remote forwarding from a local one
    ForwardingStarted { key: String, remote: bool },
    ForwardingStopped { key: String, remote: bool },
    TunnelOpened { key: String, peer: String },
    TunnelClosed { key: String },
    Disconnected { reason: String },
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &SshEvent);
}

impl<F> EventListener for F
where
    F: Fn(&SshEvent) + Send + Sync,
{
    fn on_event(&self, event: &SshEvent) {
        self(event)
    }
}

/// Fans events out to the registered listeners
///
/// Clones share the listener list. A panicking listener is logged and the
/// remaining ones still run.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl EventDispatcher {
    pub fn add<L>(&self, listener: L)
    where
        L: EventListener + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    pub fn emit(&self, event: &SshEvent) {
        trace!("event {:?}", event);
        // listeners may register more listeners
        let snapshot = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in snapshot {
            util::guarded("event listener", || listener.on_event(event));
        }
    }
}
