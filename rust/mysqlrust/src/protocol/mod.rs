//! The handful of packets the authentication exchange reads and writes.
//!
//! Only the first byte of a server reply is interpreted here; OK packets are
//! handed back to the caller untouched.
mod frame;

pub use frame::PacketHeader;

use crate::handshake::HandshakeKind;
use mysql_auth::{
    encode_credential,
    encoding::{write_lenenc_bytes, write_lenenc_int, write_nul_bytes},
    AuthError, CapabilityFlags, CharacterEncoding, Credential,
};

/// First byte of an OK packet.
pub const OK_PACKET: u8 = 0x00;
/// First byte of a continuation reply asking for more data.
pub const MORE_DATA: u8 = 0x01;
/// First byte of an auth-switch request, or of the legacy password request
/// when it is also the last packet of the exchange.
pub const AUTH_SWITCH_REQUEST: u8 = 0xfe;
/// First byte of an ERR packet.
pub const ERR_PACKET: u8 = 0xff;

/// `COM_CHANGE_USER`, the command that re-authenticates an open session.
pub const COM_CHANGE_USER: u8 = 0x11;
/// Collation written after the database in a session reset
/// (latin1_swedish_ci).
pub const RESET_COLLATION: u16 = 8;
/// Maximum packet size advertised in the handshake response.
pub const MAX_PACKET_SIZE: u32 = 0x00ff_ffff;

/// One logical packet as delivered by a channel.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Packet {
    pub payload: Vec<u8>,
    /// Set by the transport when the packet ends the server's part of the
    /// exchange (an EOF-shaped packet).
    pub last: bool,
}

impl Packet {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            last: false,
        }
    }

    pub fn last(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            last: true,
        }
    }
}

/// A server request to restart authentication with another method.
#[derive(Debug, Eq, PartialEq)]
pub struct AuthSwitchRequest<'a> {
    pub method: &'a str,
    /// The new challenge, still carrying any trailing NUL.
    pub data: &'a [u8],
}

impl<'a> AuthSwitchRequest<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self, String> {
        let Some((&AUTH_SWITCH_REQUEST, body)) = payload.split_first() else {
            return Err("auth switch request must start with 0xfe".into());
        };
        let Some(end) = body.iter().position(|&b| b == 0) else {
            return Err("auth switch request method name is not terminated".into());
        };
        let method = std::str::from_utf8(&body[..end])
            .map_err(|e| format!("auth switch request method name is not UTF-8: {e}"))?;
        Ok(Self {
            method,
            data: &body[end + 1..],
        })
    }
}

/// The client's handshake response (or `COM_CHANGE_USER` for a reset).
#[derive(derive_more::Debug)]
pub struct HandshakeResponse<'a> {
    pub kind: HandshakeKind,
    pub capabilities: CapabilityFlags,
    pub encoding: CharacterEncoding,
    pub username: &'a str,
    #[debug(skip)]
    pub credential: &'a Credential,
    pub database: Option<&'a str>,
    pub method: &'a str,
    pub attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    pub fn to_vec(&self) -> Result<Vec<u8>, AuthError> {
        let mut buf = Vec::with_capacity(128);
        let reset = self.kind == HandshakeKind::Reset;

        if reset {
            buf.push(COM_CHANGE_USER);
        } else {
            buf.extend_from_slice(&self.capabilities.bits().to_le_bytes());
            buf.extend_from_slice(&MAX_PACKET_SIZE.to_le_bytes());
            buf.push(self.encoding.collation_id());
            buf.extend_from_slice(&[0; 23]);
        }

        write_nul_bytes(&mut buf, &self.encoding.encode(self.username), "username")?;
        encode_credential(&mut buf, self.credential, self.capabilities, self.encoding)?;

        if self.capabilities.contains(CapabilityFlags::CONNECT_WITH_DB) || reset {
            if let Some(database) = self.database {
                write_nul_bytes(&mut buf, &self.encoding.encode(database), "database")?;
            }
        }
        if reset {
            buf.extend_from_slice(&RESET_COLLATION.to_le_bytes());
        }
        if self.capabilities.contains(CapabilityFlags::PLUGIN_AUTH) {
            write_nul_bytes(&mut buf, self.method.as_bytes(), "method name")?;
        }
        if self.capabilities.contains(CapabilityFlags::CONNECT_ATTRS) {
            let mut attributes = vec![];
            for (name, value) in self.attributes {
                write_lenenc_bytes(&mut attributes, name.as_bytes());
                write_lenenc_bytes(&mut attributes, value.as_bytes());
            }
            write_lenenc_int(&mut buf, attributes.len() as u64);
            buf.extend_from_slice(&attributes);
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NATIVE: &str = "mysql_native_password";

    fn response<'a>(
        kind: HandshakeKind,
        capabilities: CapabilityFlags,
        credential: &'a Credential,
        database: Option<&'a str>,
    ) -> HandshakeResponse<'a> {
        HandshakeResponse {
            kind,
            capabilities,
            encoding: CharacterEncoding::Latin1,
            username: "root",
            credential,
            database,
            method: NATIVE,
            attributes: &[],
        }
    }

    #[test]
    fn test_parse_switch_request() {
        let mut payload = vec![0xfe];
        payload.extend_from_slice(b"mysql_native_password\0");
        payload.extend_from_slice(&[7; 20]);
        payload.push(0);
        let request = AuthSwitchRequest::parse(&payload).unwrap();
        assert_eq!(request.method, NATIVE);
        assert_eq!(request.data.len(), 21);
    }

    #[test]
    fn test_parse_switch_request_without_data() {
        let request = AuthSwitchRequest::parse(b"\xfedialog\0").unwrap();
        assert_eq!(request.method, "dialog");
        assert!(request.data.is_empty());
    }

    #[test]
    fn test_parse_switch_request_rejects_garbage() {
        assert!(AuthSwitchRequest::parse(b"").is_err());
        assert!(AuthSwitchRequest::parse(b"\x00abc\0").is_err());
        assert!(AuthSwitchRequest::parse(b"\xfeunterminated").is_err());
        assert!(AuthSwitchRequest::parse(b"\xfe\xff\xfe\0").is_err());
    }

    #[test]
    fn test_connect_response_layout() {
        let capabilities = CapabilityFlags::PROTOCOL_41
            | CapabilityFlags::SECURE_CONNECTION
            | CapabilityFlags::PLUGIN_AUTH
            | CapabilityFlags::CONNECT_WITH_DB;
        let credential = Credential::Bytes(vec![0x14; 21]);
        let buf = response(HandshakeKind::Connect, capabilities, &credential, Some("db"))
            .to_vec()
            .unwrap();

        assert_eq!(&buf[..4], &capabilities.bits().to_le_bytes());
        assert_eq!(&buf[4..8], &[0xff, 0xff, 0xff, 0x00]);
        assert_eq!(buf[8], 8);
        assert_eq!(&buf[9..32], &[0; 23]);
        let mut expected = b"root\0".to_vec();
        expected.extend_from_slice(&[0x14; 21]);
        expected.extend_from_slice(b"db\0mysql_native_password\0");
        assert_eq!(&buf[32..], &expected);
    }

    #[test]
    fn test_connect_response_omits_optional_fields() {
        let credential = Credential::NoPassword;
        let buf = response(
            HandshakeKind::Connect,
            CapabilityFlags::PROTOCOL_41,
            &credential,
            Some("db"),
        )
        .to_vec()
        .unwrap();
        assert_eq!(&buf[32..], b"root\0\0");
    }

    #[test]
    fn test_reset_response_layout() {
        let credential = Credential::Text("pw".into());
        let buf = response(
            HandshakeKind::Reset,
            CapabilityFlags::SECURE_CONNECTION,
            &credential,
            Some("db"),
        )
        .to_vec()
        .unwrap();
        assert_eq!(buf, b"\x11root\0\x02pwdb\0\x08\x00");
    }

    #[test]
    fn test_connect_attributes() {
        let credential = Credential::NoPassword;
        let attributes = [("_client_name".to_owned(), "mysqlrust".to_owned())];
        let mut message = response(
            HandshakeKind::Connect,
            CapabilityFlags::CONNECT_ATTRS,
            &credential,
            None,
        );
        message.attributes = &attributes;
        let buf = message.to_vec().unwrap();
        assert_eq!(
            &buf[32..],
            b"root\0\0\x17\x0c_client_name\x09mysqlrust"
        );
    }

    #[test]
    fn test_username_with_nul_fails() {
        let credential = Credential::NoPassword;
        let mut message = response(
            HandshakeKind::Connect,
            CapabilityFlags::empty(),
            &credential,
            None,
        );
        message.username = "ro\0ot";
        assert!(matches!(
            message.to_vec(),
            Err(AuthError::MalformedCredential(_))
        ));
    }
}
