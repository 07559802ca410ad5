pub mod encoding;
mod error;
pub mod mechanism;
pub mod native;
pub mod registry;

pub use encoding::{encode_credential, CharacterEncoding};
pub use error::AuthError;
pub use mechanism::{AuthMechanism, Challenge, FailureAction};
pub use native::NativePassword;
pub use registry::{BuiltinMechanism, MechanismRegistry};

bitflags::bitflags! {
    /// Client capability flags negotiated with the server before authentication
    /// starts. Only the bits the authentication handshake reads are named; any
    /// other negotiated bits are carried through untouched.
    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct CapabilityFlags: u32 {
        /// The handshake response may carry an initial database name.
        const CONNECT_WITH_DB = 0x0000_0008;
        /// The 4.1 protocol is in use.
        const PROTOCOL_41 = 0x0000_0200;
        /// The credential is sent length-prefixed rather than NUL-terminated.
        const SECURE_CONNECTION = 0x0000_8000;
        /// Pluggable authentication: the response names its method.
        const PLUGIN_AUTH = 0x0008_0000;
        /// The handshake response carries connection attributes.
        const CONNECT_ATTRS = 0x0010_0000;

        const _ = !0;
    }
}

/// The credential a mechanism hands to the handshake for the response packet.
#[derive(Clone, Eq, PartialEq, derive_more::Debug)]
pub enum Credential {
    /// No password is configured. This is distinct from an empty string and
    /// is sent as a single zero byte.
    NoPassword,
    /// A password sent as text, either length-prefixed or NUL-terminated
    /// depending on [`CapabilityFlags::SECURE_CONNECTION`].
    #[debug("Text(..)")]
    Text(String),
    /// Pre-encoded bytes, written verbatim.
    #[debug("Bytes({} bytes)", _0.len())]
    Bytes(Vec<u8>),
}

/// Everything a mechanism may read about the connection it authenticates.
///
/// The context is owned by the caller and borrowed for the duration of a
/// single handshake; mechanisms never keep a reference past the call.
#[derive(Clone, Default, derive_more::Debug)]
pub struct ConnectionContext {
    /// The server host, used to describe failures.
    pub host: String,
    pub username: String,
    #[debug(skip)]
    pub password: Option<String>,
    pub database: Option<String>,
    pub capabilities: CapabilityFlags,
    /// The single-byte encoding used for text on the wire and for password
    /// hashing.
    pub encoding: CharacterEncoding,
    /// Attributes sent when [`CapabilityFlags::CONNECT_ATTRS`] is negotiated.
    pub connect_attributes: Vec<(String, String)>,
}

impl ConnectionContext {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilityFlags) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_encoding(mut self, encoding: CharacterEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.connect_attributes.push((name.into(), value.into()));
        self
    }

    #[inline]
    pub fn has(&self, flag: CapabilityFlags) -> bool {
        self.capabilities.contains(flag)
    }

    /// The configured password, or the empty string when none is set.
    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or_default()
    }

    /// The database name, if one is configured and not blank.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref().filter(|db| !db.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_hides_password() {
        let context = ConnectionContext::new("db.example.com", "app").with_password("hunter2");
        let debug = format!("{context:?}");
        assert!(debug.contains("app"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_credential_debug_redacts() {
        assert_eq!(format!("{:?}", Credential::Text("secret".into())), "Text(..)");
        assert_eq!(format!("{:?}", Credential::Bytes(vec![1, 2, 3])), "Bytes(3 bytes)");
        assert_eq!(format!("{:?}", Credential::NoPassword), "NoPassword");
    }

    #[test]
    fn test_blank_database_is_ignored() {
        let context = ConnectionContext::new("localhost", "root").with_database("   ");
        assert_eq!(context.database(), None);
        let context = context.with_database("sales");
        assert_eq!(context.database(), Some("sales"));
    }

    #[test]
    fn test_unknown_capability_bits_survive() {
        let flags = CapabilityFlags::from_bits_retain(0x8000_0001) | CapabilityFlags::PLUGIN_AUTH;
        assert!(flags.contains(CapabilityFlags::PLUGIN_AUTH));
        assert_eq!(flags.bits() & 0x8000_0001, 0x8000_0001);
    }
}
