#[allow(clippy::module_inception)]
mod channel;
mod handle;
mod multiplexer;
mod request;

pub(crate) use channel::{Channel, ChannelState};
pub use handle::{ChannelCloser, ChannelHandle, ChannelReader, ChannelWriter};
pub(crate) use multiplexer::ChannelMultiplexer;
pub use request::{GlobalRequestHandler, IncomingChannel, IncomingChannelHandler};

use std::io::{Read, Write};

use crate::{
    constant::ssh_str,
    error::SshResult,
    model::Data,
    transport::Transport,
};

/// Where multiplexer output goes, the transport in production
pub(crate) trait Outgoing {
    fn send_packet(&mut self, data: Data) -> SshResult<()>;
}

impl<S> Outgoing for Transport<S>
where
    S: Read + Write,
{
    fn send_packet(&mut self, data: Data) -> SshResult<()> {
        self.send(data)
    }
}

impl Outgoing for Vec<Data> {
    fn send_packet(&mut self, data: Data) -> SshResult<()> {
        self.push(data);
        Ok(())
    }
}

/// The channel type of SSH_MSG_CHANNEL_OPEN and its type specific fields
///
/// A subsystem runs on a `Session` channel, see [ChannelHandle::subsystem].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Session,
    DirectTcpip {
        host: String,
        port: u32,
        originator_address: String,
        originator_port: u32,
    },
    ForwardedTcpip {
        connected_address: String,
        connected_port: u32,
        originator_address: String,
        originator_port: u32,
    },
    X11 {
        originator_address: String,
        originator_port: u32,
    },
    Other(String),
}

impl ChannelKind {
    pub fn name(&self) -> &str {
        match self {
            ChannelKind::Session => ssh_str::SESSION,
            ChannelKind::DirectTcpip { .. } => ssh_str::DIRECT_TCPIP,
            ChannelKind::ForwardedTcpip { .. } => ssh_str::FORWARDED_TCPIP,
            ChannelKind::X11 { .. } => ssh_str::X11,
            ChannelKind::Other(name) => name,
        }
    }

    /// the type specific tail of a channel open request
    pub(crate) fn put_fields(&self, data: &mut Data) {
        match self {
            ChannelKind::DirectTcpip {
                host,
                port,
                originator_address,
                originator_port,
            } => {
                data.put_str(host)
                    .put_u32(*port)
                    .put_str(originator_address)
                    .put_u32(*originator_port);
            }
            ChannelKind::ForwardedTcpip {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            } => {
                data.put_str(connected_address)
                    .put_u32(*connected_port)
                    .put_str(originator_address)
                    .put_u32(*originator_port);
            }
            ChannelKind::X11 {
                originator_address,
                originator_port,
            } => {
                data.put_str(originator_address).put_u32(*originator_port);
            }
            ChannelKind::Session | ChannelKind::Other(_) => (),
        }
    }

    pub(crate) fn parse(name: &str, data: &mut Data) -> SshResult<Self> {
        let kind = match name {
            ssh_str::SESSION => ChannelKind::Session,
            ssh_str::DIRECT_TCPIP => ChannelKind::DirectTcpip {
                host: data.get_string()?,
                port: data.get_u32()?,
                originator_address: data.get_string()?,
                originator_port: data.get_u32()?,
            },
            ssh_str::FORWARDED_TCPIP => ChannelKind::ForwardedTcpip {
                connected_address: data.get_string()?,
                connected_port: data.get_u32()?,
                originator_address: data.get_string()?,
                originator_port: data.get_u32()?,
            },
            ssh_str::X11 => ChannelKind::X11 {
                originator_address: data.get_string()?,
                // some old servers leave the port out
                originator_port: data.get_u32().unwrap_or_default(),
            },
            other => ChannelKind::Other(other.to_owned()),
        };
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_fields_round_trip() {
        let kind = ChannelKind::ForwardedTcpip {
            connected_address: "0.0.0.0".to_owned(),
            connected_port: 8080,
            originator_address: "10.0.0.2".to_owned(),
            originator_port: 51000,
        };
        let mut data = Data::new();
        kind.put_fields(&mut data);
        assert_eq!(ChannelKind::parse(kind.name(), &mut data).unwrap(), kind);
        assert!(data.is_empty());
    }

    #[test]
    fn unknown_types_are_kept_by_name() {
        let mut data = Data::new();
        let kind = ChannelKind::parse("auth-agent@openssh.com", &mut data).unwrap();
        assert_eq!(kind.name(), "auth-agent@openssh.com");
    }
}
