//! Wire encodings for text and credentials in the handshake response.
use crate::{AuthError, CapabilityFlags, Credential};
use std::borrow::Cow;

/// The text encoding of the connection.
///
/// Password hashing follows the connection encoding rather than always using
/// UTF-8 so that hashes match servers running with the legacy default.
#[derive(
    Debug,
    Default,
    Copy,
    Clone,
    Eq,
    PartialEq,
    strum::EnumString,
    strum::Display,
    serde_derive::Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CharacterEncoding {
    /// ISO-8859-1. Characters outside the range are replaced with `?`.
    #[default]
    #[strum(serialize = "latin1")]
    Latin1,
    #[strum(to_string = "utf8", serialize = "utf8mb4")]
    #[serde(alias = "utf8mb4")]
    Utf8,
}

impl CharacterEncoding {
    /// Encode `text`, borrowing when no conversion is needed.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            Self::Utf8 => Cow::Borrowed(text.as_bytes()),
            Self::Latin1 if text.is_ascii() => Cow::Borrowed(text.as_bytes()),
            Self::Latin1 => Cow::Owned(
                text.chars()
                    .map(|c| u8::try_from(c).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }

    /// The collation id sent in the handshake response.
    pub fn collation_id(&self) -> u8 {
        match self {
            // latin1_swedish_ci
            Self::Latin1 => 8,
            // utf8mb4_general_ci
            Self::Utf8 => 45,
        }
    }
}

/// Append a length-encoded integer.
pub fn write_lenenc_int(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=250 => buf.push(value as u8),
        251..=0xffff => {
            buf.push(0xfc);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xff_ffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
        }
        _ => {
            buf.push(0xfe);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Append a length-encoded byte string.
pub fn write_lenenc_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_lenenc_int(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Append a NUL-terminated byte string. `what` names the field for the error
/// raised when the value itself contains a NUL.
pub fn write_nul_bytes(buf: &mut Vec<u8>, bytes: &[u8], what: &str) -> Result<(), AuthError> {
    if bytes.contains(&0) {
        return Err(AuthError::MalformedCredential(format!(
            "{what} contains a NUL byte and cannot be NUL-terminated"
        )));
    }
    buf.extend_from_slice(bytes);
    buf.push(0);
    Ok(())
}

/// Append `credential` to a handshake response.
///
/// Text is length-prefixed when [`CapabilityFlags::SECURE_CONNECTION`] is
/// negotiated and NUL-terminated otherwise. Nothing is appended when the
/// credential cannot be encoded.
pub fn encode_credential(
    buf: &mut Vec<u8>,
    credential: &Credential,
    capabilities: CapabilityFlags,
    encoding: CharacterEncoding,
) -> Result<(), AuthError> {
    match credential {
        Credential::NoPassword => buf.push(0),
        Credential::Text(text) => {
            let bytes = encoding.encode(text);
            if capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
                write_lenenc_bytes(buf, &bytes);
            } else {
                write_nul_bytes(buf, &bytes, "password")?;
            }
        }
        Credential::Bytes(bytes) => buf.extend_from_slice(bytes),
    }
    Ok(())
}
