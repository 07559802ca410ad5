use crate::{AuthError, ConnectionContext, Credential};

/// The server-supplied salt for one authentication attempt.
///
/// Servers send the challenge as a NUL-terminated string in some packets;
/// [`Challenge::from_wire`] strips that terminator so mechanisms never see it.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct Challenge(Vec<u8>);

impl Challenge {
    /// Build a challenge from raw packet bytes, dropping exactly one trailing
    /// zero byte if present.
    pub fn from_wire(data: &[u8]) -> Self {
        match data.split_last() {
            Some((&0, rest)) => Self(rest.to_vec()),
            _ => Self(data.to_vec()),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Challenge {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// What the handshake should do after a mechanism saw a failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FailureAction {
    /// End the handshake with the error.
    Propagate,
    /// Keep the handshake alive and wait for the next server packet.
    Recover,
}

/// One authentication method, bound to one challenge.
///
/// An instance is created by the [`crate::MechanismRegistry`] for a single
/// handshake and dropped when the handshake ends or the server switches to a
/// different method. Every call receives the connection context explicitly.
#[allow(unused)]
pub trait AuthMechanism: std::fmt::Debug + Send {
    /// The method name used on the wire, ie: `mysql_native_password`.
    fn name(&self) -> &str;

    /// Store the challenge. Called exactly once, before any other method.
    fn initialize(&mut self, challenge: Challenge) -> Result<(), AuthError>;

    /// The credential for the handshake response packet.
    fn initial_response(&self, context: &ConnectionContext) -> Result<Credential, AuthError>;

    /// Data for the next round after a method switch. `data` is `None` on the
    /// first call and the server's payload (without the more-data marker)
    /// afterwards. Returning `None` or an empty buffer ends the exchange.
    fn continuation(
        &mut self,
        context: &ConnectionContext,
        data: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        Ok(None)
    }

    /// Called once the server accepts the exchange.
    fn on_success(&mut self) {}

    /// Called when the server rejects the exchange or the transport fails.
    fn on_failure(
        &mut self,
        context: &ConnectionContext,
        error: &(dyn std::error::Error + 'static),
    ) -> FailureAction {
        FailureAction::Propagate
    }
}
