#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub enum HandshakeKind {
    /// Authentication of a freshly opened connection.
    #[default]
    Connect,
    /// Re-authentication of an open session (`COM_CHANGE_USER`).
    Reset,
}

/// How to treat a method switch request that arrives during a continuation
/// round. Servers are only expected to switch once per handshake.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Debug,
    strum::EnumString,
    strum::Display,
    serde_derive::Deserialize,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchPolicy {
    /// Fail the handshake.
    #[default]
    Reject,
    /// End the continuation loop and treat the packet as the final result.
    EndLoop,
}

mod client_state_machine;

pub mod client {
    pub use super::client_state_machine::*;
}
