use crate::{AuthError, AuthMechanism, Challenge, ConnectionContext, Credential};
use sha1::{Digest, Sha1};
use tracing::trace;

/// The wire name of the native password method.
pub const NATIVE_PASSWORD: &str = "mysql_native_password";

/// Length prefix of a scrambled password: the SHA-1 digest size.
const SCRAMBLE_LENGTH: u8 = 0x14;

/// Computes the 4.1 native password scramble.
///
/// # Algorithm
///
/// 1. An empty password produces a single zero byte.
/// 2. `H1 = SHA1(password)`.
/// 3. `H2 = SHA1(H1)`.
/// 4. `H3 = SHA1(seed || H2)`.
/// 5. The output is `0x14` followed by `H3 XOR H1`.
///
/// # Example
///
/// ```
/// # use mysql_auth::native::*;
/// let seed: Vec<u8> = (1..=20).collect();
/// let scramble = scramble_native_password(b"password", &seed);
/// assert_eq!(scramble.len(), 21);
/// assert_eq!(scramble[0], 0x14);
/// assert_eq!(scramble_native_password(b"", &seed), [0]);
/// ```
pub fn scramble_native_password(password: &[u8], seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![0];
    }

    let first_hash = Sha1::digest(password);
    let second_hash = Sha1::digest(first_hash);

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(second_hash);
    let third_hash = hasher.finalize();

    let mut scramble = Vec::with_capacity(third_hash.len() + 1);
    scramble.push(SCRAMBLE_LENGTH);
    scramble.extend(
        third_hash
            .iter()
            .zip(first_hash.iter())
            .map(|(third, first)| third ^ first),
    );
    scramble
}

/// The `mysql_native_password` mechanism.
///
/// Holds no state besides the challenge: the response is recomputed from the
/// context on every call.
#[derive(Debug, Default)]
pub struct NativePassword {
    challenge: Challenge,
}

impl NativePassword {
    pub fn new() -> Self {
        Self::default()
    }

    fn scramble(&self, context: &ConnectionContext) -> Credential {
        let password = context.password();
        if password.is_empty() {
            return Credential::NoPassword;
        }
        let bytes = context.encoding.encode(password);
        let scramble = scramble_native_password(&bytes, self.challenge.as_bytes());
        if scramble == [0] {
            Credential::NoPassword
        } else {
            Credential::Bytes(scramble)
        }
    }
}

impl AuthMechanism for NativePassword {
    fn name(&self) -> &str {
        NATIVE_PASSWORD
    }

    fn initialize(&mut self, challenge: Challenge) -> Result<(), AuthError> {
        trace!("native password seed: {} bytes", challenge.len());
        self.challenge = challenge;
        Ok(())
    }

    fn initial_response(&self, context: &ConnectionContext) -> Result<Credential, AuthError> {
        Ok(self.scramble(context))
    }

    /// After a method switch the server expects the bare 20-byte hash, without
    /// the length prefix used in the handshake response.
    fn continuation(
        &mut self,
        context: &ConnectionContext,
        _data: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        match self.scramble(context) {
            Credential::Bytes(bytes) => Ok(Some(bytes[1..].to_vec())),
            _ => Err(AuthError::MalformedCredential(
                "no password is available for the native password exchange".into(),
            )),
        }
    }
}
