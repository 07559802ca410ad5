/// Errors raised by a mechanism or the registry, before anything reaches the
/// wire.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// The server asked for the pre-4.1 password protocol.
    #[error("Old-style (pre-4.1) password authentication is not supported")]
    UnsupportedLegacyMethod,
    /// The server named a method that is not registered.
    #[error("Unknown authentication method '{0}'")]
    UnknownMechanism(String),
    /// A credential could not be encoded for the wire.
    #[error("Malformed credential: {0}")]
    MalformedCredential(String),
}
