use std::fmt::{Display, Formatter};
use std::sync::mpsc::{RecvError, SendError};

use thiserror::Error;

pub type SshResult<I> = Result<I, SshError>;

/// The stage a connection was in when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshake,
    KeyExchange,
    Authentication,
    Connection,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Handshake => "handshake",
            Phase::KeyExchange => "key exchange",
            Phase::Authentication => "authentication",
            Phase::Connection => "connection",
        };
        write!(f, "{s}")
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE reason codes
///
/// <https://www.rfc-editor.org/rfc/rfc4254#section-5.1>
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    AdministrativelyProhibited,
    ConnectFailed,
    UnknownChannelType,
    ResourceShortage,
    Other(u32),
}

impl OpenFailureReason {
    pub fn code(&self) -> u32 {
        match self {
            OpenFailureReason::AdministrativelyProhibited => 1,
            OpenFailureReason::ConnectFailed => 2,
            OpenFailureReason::UnknownChannelType => 3,
            OpenFailureReason::ResourceShortage => 4,
            OpenFailureReason::Other(c) => *c,
        }
    }
}

impl From<u32> for OpenFailureReason {
    fn from(code: u32) -> Self {
        match code {
            1 => OpenFailureReason::AdministrativelyProhibited,
            2 => OpenFailureReason::ConnectFailed,
            3 => OpenFailureReason::UnknownChannelType,
            4 => OpenFailureReason::ResourceShortage,
            c => OpenFailureReason::Other(c),
        }
    }
}

impl Display for OpenFailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenFailureReason::AdministrativelyProhibited => write!(f, "ADMINISTRATIVELY_PROHIBITED"),
            OpenFailureReason::ConnectFailed => write!(f, "CONNECT_FAILED"),
            OpenFailureReason::UnknownChannelType => write!(f, "UNKNOWN_CHANNEL_TYPE"),
            OpenFailureReason::ResourceShortage => write!(f, "RESOURCE_SHORTAGE"),
            OpenFailureReason::Other(c) => write!(f, "REASON_{c}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SshError {
    #[error("Version dismatch: {our} vs {their}")]
    VersionDismatchError { our: String, their: String },
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("Key exchange error: {0}")]
    KexError(String),
    #[error("Host key of {host} was rejected: {reason}")]
    HostKeyVerificationFailed { host: String, reason: String },
    #[error("Unsupported {category} algorithm: {name}")]
    UnsupportedAlgorithm { category: String, name: String },
    #[error("The {0} registry is locked")]
    RegistryLocked(String),
    #[error("Auth error")]
    AuthError,
    #[error("Failed to open channel: {reason} {description}")]
    ChannelOpenFailed {
        reason: OpenFailureReason,
        description: String,
    },
    #[error("Channel request failed: {0}")]
    ChannelFailure(String),
    #[error("Forwarding error: {0}")]
    ForwardingError(String),
    #[error("No free port found after {0} attempts")]
    PortUnavailable(u32),
    #[error("Compression error: {0}")]
    CompressionError(String),
    #[error("Timeout")]
    TimeoutError,
    #[error("Disconnected by peer: {0}")]
    Disconnected(String),
    #[error("Connection lost during {phase}: {reason}")]
    ConnectionLost { phase: Phase, reason: String },
    #[error("Session is closed")]
    SessionClosed,
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    GeneralError(String),
}

impl SshError {
    /// whether this error must tear the whole connection down
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            SshError::ProtocolViolation(_)
                | SshError::KexError(_)
                | SshError::HostKeyVerificationFailed { .. }
                | SshError::VersionDismatchError { .. }
                | SshError::CompressionError(_)
                | SshError::Disconnected(_)
                | SshError::ConnectionLost { .. }
                | SshError::IoError(_)
                | SshError::TimeoutError
        )
    }

    pub(crate) fn unsupported(category: &str, name: &str) -> Self {
        SshError::UnsupportedAlgorithm {
            category: category.to_owned(),
            name: name.to_owned(),
        }
    }
}

impl From<&str> for SshError {
    fn from(value: &str) -> Self {
        SshError::GeneralError(value.to_owned())
    }
}

impl From<String> for SshError {
    fn from(value: String) -> Self {
        SshError::GeneralError(value)
    }
}

impl From<std::string::FromUtf8Error> for SshError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        SshError::ProtocolViolation(value.to_string())
    }
}

impl From<ssh_key::Error> for SshError {
    fn from(value: ssh_key::Error) -> Self {
        SshError::GeneralError(value.to_string())
    }
}

impl<T> From<SendError<T>> for SshError {
    fn from(_: SendError<T>) -> Self {
        SshError::SessionClosed
    }
}

impl From<RecvError> for SshError {
    fn from(_: RecvError) -> Self {
        SshError::SessionClosed
    }
}
