use hex_literal::hex;
use mysql_auth::{native::NATIVE_PASSWORD, CapabilityFlags, ConnectionContext, MechanismRegistry};
use mysqlrust::config::AuthConfig;
use mysqlrust::connection::{Authenticator, FramedChannel};
use mysqlrust::errors::{HandshakeErrorKind, TransportError};
use mysqlrust::handshake::HandshakeKind;
use mysqlrust::protocol::PacketHeader;
use sha1::{Digest, Sha1};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const SEED: [u8; 20] = hex!("3b55787d2c5f7c7249523f28476f77285b7c6f5c");
const SWITCH_SEED: [u8; 20] = hex!("0102030405060708090a0b0c0d0e0f1011121314");
/// SHA1(SHA1("secret")), as a server stores it.
const STORED_HASH: [u8; 20] = hex!("14e65567abdb5135d0cfd9a70b3032c179a49ee7");
const OK: [u8; 7] = [0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

fn context() -> ConnectionContext {
    ConnectionContext::new("fake-server", "app")
        .with_password("secret")
        .with_capabilities(
            CapabilityFlags::PROTOCOL_41
                | CapabilityFlags::SECURE_CONNECTION
                | CapabilityFlags::PLUGIN_AUTH,
        )
}

async fn read_frame(stream: &mut DuplexStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0; PacketHeader::SIZE];
    stream.read_exact(&mut header).await?;
    let header = PacketHeader::decode(header);
    let mut payload = vec![0; header.payload_length as usize];
    stream.read_exact(&mut payload).await?;
    Ok((header.sequence_id, payload))
}

async fn write_frame(stream: &mut DuplexStream, sequence: u8, payload: &[u8]) {
    let mut buf = PacketHeader::new(payload.len() as u32, sequence)
        .encode()
        .to_vec();
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await.unwrap();
}

/// Check a scramble the way the server does: recover SHA1(password) from the
/// token and compare its hash with the stored one.
fn server_accepts(token: &[u8], seed: &[u8]) -> bool {
    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(STORED_HASH);
    let mask = hasher.finalize();
    let candidate: Vec<u8> = token.iter().zip(mask).map(|(a, b)| a ^ b).collect();
    Sha1::digest(&candidate).as_slice() == STORED_HASH
}

/// The 20-byte token in a handshake response for user `app`.
fn response_token(payload: &[u8]) -> &[u8] {
    let rest = &payload[32..];
    assert!(rest.starts_with(b"app\0"));
    assert_eq!(rest[4], 0x14);
    &rest[5..25]
}

fn spawn_server<F, Fut>(server: DuplexStream, script: F) -> JoinHandle<()>
where
    F: FnOnce(DuplexStream) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(script(server))
}

#[test_log::test(tokio::test)]
async fn test_native_password_accepted() {
    let (client, server) = duplex(4096);
    let server = spawn_server(server, |mut stream| async move {
        let (sequence, payload) = read_frame(&mut stream).await.unwrap();
        assert_eq!(sequence, 1);
        assert!(server_accepts(response_token(&payload), &SEED));
        assert!(payload.ends_with(b"mysql_native_password\0"));
        write_frame(&mut stream, 2, &OK).await;
    });

    let context = context();
    let registry = MechanismRegistry::default();
    let mut channel = FramedChannel::new(client).with_sequence(1);
    let mut greeting_seed = SEED.to_vec();
    greeting_seed.push(0);
    let outcome = Authenticator::new(&context, &registry)
        .authenticate(&mut channel, NATIVE_PASSWORD, &greeting_seed, HandshakeKind::Connect)
        .await
        .unwrap();
    assert_eq!(outcome.method, NATIVE_PASSWORD);
    assert_eq!(outcome.final_packet, Some(OK.to_vec()));
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_switch_with_new_seed() {
    let (client, server) = duplex(4096);
    let server = spawn_server(server, |mut stream| async move {
        let (_, payload) = read_frame(&mut stream).await.unwrap();
        assert!(server_accepts(response_token(&payload), &SEED));

        let mut switch = b"\xfemysql_native_password\0".to_vec();
        switch.extend_from_slice(&SWITCH_SEED);
        switch.push(0);
        write_frame(&mut stream, 2, &switch).await;

        let (sequence, token) = read_frame(&mut stream).await.unwrap();
        assert_eq!(sequence, 3);
        assert_eq!(token.len(), 20);
        assert!(server_accepts(&token, &SWITCH_SEED));
        write_frame(&mut stream, 4, &OK).await;
    });

    let context = context();
    let registry = MechanismRegistry::default();
    let mut channel = FramedChannel::new(client).with_sequence(1);
    let outcome = Authenticator::new(&context, &registry)
        .authenticate(&mut channel, NATIVE_PASSWORD, &SEED, HandshakeKind::Connect)
        .await
        .unwrap();
    assert_eq!(outcome.final_packet, Some(OK.to_vec()));
    assert_eq!(channel.sequence(), 5);
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_wrong_password_rejected() {
    let (client, server) = duplex(4096);
    let server = spawn_server(server, |mut stream| async move {
        let (_, payload) = read_frame(&mut stream).await.unwrap();
        assert!(!server_accepts(response_token(&payload), &SEED));
        write_frame(
            &mut stream,
            2,
            b"\xff\x15\x04#28000Access denied for user 'app'@'localhost' (using password: YES)",
        )
        .await;
    });

    let context = context().with_password("not the secret");
    let registry = MechanismRegistry::default();
    let mut channel = FramedChannel::new(client).with_sequence(1);
    let err = Authenticator::new(&context, &registry)
        .authenticate(&mut channel, NATIVE_PASSWORD, &SEED, HandshakeKind::Connect)
        .await
        .unwrap_err();
    let server_error = err.server_error().unwrap();
    assert_eq!(server_error.code, 1045);
    assert_eq!(server_error.sql_state.as_deref(), Some("28000"));
    assert_eq!(
        err.to_string(),
        "Authentication to host 'fake-server' failed for user 'app' using method \
         'mysql_native_password': Authentication rejected: [1045] (28000) Access denied \
         for user 'app'@'localhost' (using password: YES)"
    );
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_legacy_password_request_closes_connection() {
    let (client, server) = duplex(4096);
    let server = spawn_server(server, |mut stream| async move {
        read_frame(&mut stream).await.unwrap();
        write_frame(&mut stream, 2, &[0xfe]).await;
        let mut rest = vec![];
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    });

    let context = context();
    let registry = MechanismRegistry::default();
    let mut channel = FramedChannel::new(client).with_sequence(1);
    let err = Authenticator::new(&context, &registry)
        .authenticate(&mut channel, NATIVE_PASSWORD, &SEED, HandshakeKind::Connect)
        .await
        .unwrap_err();
    assert!(matches!(err.kind, HandshakeErrorKind::UnsupportedLegacyMethod));
    drop(channel);
    server.await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_reset_uses_aliased_method() {
    let env: &[(&str, &str)] = &[("MYSQL_AUTH_PLUGINS", "legacy_native=mysql_native_password")];
    let config = AuthConfig::from_env(env).unwrap();
    let registry = config.build_registry().unwrap();

    let (client, server) = duplex(4096);
    let server = spawn_server(server, |mut stream| async move {
        let (sequence, payload) = read_frame(&mut stream).await.unwrap();
        assert_eq!(sequence, 0);
        assert_eq!(payload[0], 0x11);
        assert!(payload[1..].starts_with(b"app\0\x14"));
        assert!(server_accepts(&payload[6..26], &SEED));
        assert!(payload.ends_with(b"\x08\x00legacy_native\0"));
        write_frame(&mut stream, 1, &OK).await;
    });

    let context = context();
    let mut channel = FramedChannel::new(client);
    let outcome = Authenticator::from_config(&context, &registry, &config)
        .authenticate(&mut channel, "legacy_native", &SEED, HandshakeKind::Reset)
        .await
        .unwrap();
    assert_eq!(outcome.method, "legacy_native");
    server.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_times_out() {
    let env: &[(&str, &str)] = &[("MYSQL_AUTH_TIMEOUT_MS", "250")];
    let config = AuthConfig::from_env(env).unwrap();
    let registry = config.build_registry().unwrap();

    let (client, _server) = duplex(4096);
    let context = context();
    let mut channel = FramedChannel::new(client)
        .with_sequence(1)
        .with_read_timeout(config.read_timeout());
    let err = Authenticator::from_config(&context, &registry, &config)
        .authenticate(&mut channel, NATIVE_PASSWORD, &SEED, HandshakeKind::Connect)
        .await
        .unwrap_err();
    assert!(matches!(
        err.kind,
        HandshakeErrorKind::Transport(TransportError::Timeout)
    ));
}
