//! Dependencies
//! ```toml
//! ssh-mux = "*"
//! ```
//!
//! Quick example:
//!
//!```no_run
//! use std::io::Read;
//!
//! fn main() {
//!     let session = ssh::SessionBuilder::new()
//!         .username("ubuntu")
//!         .password("password")
//!         .connect("127.0.0.1:22")
//!         .unwrap();
//!
//!     // run a command
//!     let mut exec = session.open_session().unwrap();
//!     exec.exec("ls -all").unwrap();
//!     let mut output = String::new();
//!     exec.read_to_string(&mut output).unwrap();
//!     println!("{}", output);
//!
//!     // localhost:8080 -> 10.0.0.5:80 as seen from the server
//!     let key = session
//!         .forwarding()
//!         .start_local_forwarding("127.0.0.1", 8080, "10.0.0.5", 80)
//!         .unwrap();
//!     session.forwarding().stop_local_forwarding(&key).unwrap();
//!
//!     session.close();
//! }
//!```
//!
//! Everything below the session, the algorithm registry, the transport and
//! the channels, is usable on its own: see [ComponentRegistry] for plugging
//! in algorithms and [SessionBuilder::connect_bio] for running over any
//! non-blocking stream.

pub mod algorithm;
mod channel;
mod config;
mod constant;
pub mod error;
mod event;
pub mod forwarding;
mod model;
mod session;
mod transport;
mod util;
mod verifier;

#[cfg(test)]
mod tests;

pub use algorithm::{
    AlgorithmRegistry, Category, ComponentRegistry, Compress, DigestAlg, Enc, Factory, Kex, Mac,
    PubKey,
};
pub use algorithm::public_key::KeyPair;
pub use channel::{
    ChannelCloser, ChannelHandle, ChannelKind, ChannelReader, ChannelWriter,
    GlobalRequestHandler, IncomingChannel, IncomingChannelHandler,
};
pub use config::{algorithm::NegotiatedAlgorithms, ChannelDefaults, RekeyPolicy};
pub use error::{OpenFailureReason, Phase, SshError, SshResult};
pub use event::{EventDispatcher, EventListener, SshEvent};
pub use forwarding::{generate_key, AcceptPolicy, ForwardingClient};
pub use model::{ExitSignal, TerminalSize, TerminalSizeType};
pub use session::{Session, SessionBuilder, SessionHandle};
pub use transport::KexPhase;
pub use verifier::{fingerprint, AcceptAll, HostKeyVerifier, KnownHosts};
