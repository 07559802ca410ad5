use crate::protocol::ERR_PACKET;
use mysql_auth::{AuthError, ConnectionContext};
use std::fmt;

macro_rules! __invalid_state {
    ($error:literal) => {{
        eprintln!(
            "Invalid handshake state: {}\n{}",
            $error,
            ::std::backtrace::Backtrace::capture()
        );
        #[allow(deprecated)]
        $crate::errors::HandshakeErrorKind::__InvalidState
    }};
}
pub(crate) use __invalid_state as invalid_state;

/// An ERR packet sent by the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: Option<String>,
    pub message: String,
}

impl ServerError {
    /// Parse the payload of an ERR packet (`0xff`, code, optional `#` and
    /// five-character SQL state, message).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let [ERR_PACKET, lo, hi, rest @ ..] = payload else {
            return None;
        };
        let code = u16::from_le_bytes([*lo, *hi]);
        let (sql_state, message) = match rest {
            [b'#', state @ ..] if state.len() >= 5 => (
                Some(String::from_utf8_lossy(&state[..5]).into_owned()),
                &state[5..],
            ),
            _ => (None, rest),
        };
        Some(Self {
            code,
            sql_state,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql_state {
            Some(state) => write!(f, "[{}] ({state}) {}", self.code, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for ServerError {}

/// Failures reported by a [`crate::connection::PacketChannel`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("Connection closed by server")]
    Closed,

    #[error("Timed out waiting for the server")]
    Timeout,

    /// The server answered with an ERR packet.
    #[error("Server error: {0}")]
    Server(ServerError),

    /// The framing was invalid.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// The cause of a failed handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeErrorKind {
    /// Invalid state error, suggesting a logic error in code rather than a server or client failure.
    /// Use the `invalid_state!` macro instead which will print a backtrace.
    #[error("Invalid state")]
    #[deprecated = "Use invalid_state!"]
    __InvalidState,

    #[error("Old-style (pre-4.1) password authentication is not supported")]
    UnsupportedLegacyMethod,

    #[error("Unknown authentication method '{0}'")]
    UnknownMechanism(String),

    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// The server sent a method switch during a continuation round.
    #[error("Unexpected authentication method switch during a continuation round")]
    UnexpectedSwitch,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// The server refused the credentials.
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(ServerError),
}

impl HandshakeErrorKind {
    /// The connection must not be used again after this failure.
    pub fn closes_connection(&self) -> bool {
        matches!(self, Self::UnsupportedLegacyMethod)
    }

    /// A mechanism may keep the handshake alive after this failure. Only a
    /// server rejection qualifies: the channel is still usable and the
    /// server decides what comes next.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::AuthenticationRejected(_))
    }
}

impl From<AuthError> for HandshakeErrorKind {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::UnsupportedLegacyMethod => Self::UnsupportedLegacyMethod,
            AuthError::UnknownMechanism(name) => Self::UnknownMechanism(name),
            AuthError::MalformedCredential(message) => Self::MalformedCredential(message),
        }
    }
}

impl From<TransportError> for HandshakeErrorKind {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Server(error) => Self::AuthenticationRejected(error),
            error => Self::Transport(error),
        }
    }
}

/// A terminal handshake failure, with the context needed to tell credential,
/// configuration and network problems apart.
#[derive(Debug, thiserror::Error)]
#[error("Authentication to host '{host}' failed for user '{username}' using method '{mechanism}': {kind}")]
pub struct HandshakeError {
    pub host: String,
    pub username: String,
    pub mechanism: String,
    #[source]
    pub kind: HandshakeErrorKind,
}

impl HandshakeError {
    pub fn new(context: &ConnectionContext, mechanism: &str, kind: HandshakeErrorKind) -> Self {
        Self {
            host: context.host.clone(),
            username: context.username.clone(),
            mechanism: mechanism.to_owned(),
            kind,
        }
    }

    /// The server's ERR packet, if the server rejected the credentials.
    pub fn server_error(&self) -> Option<&ServerError> {
        match &self.kind {
            HandshakeErrorKind::AuthenticationRejected(error) => Some(error),
            _ => None,
        }
    }
}
