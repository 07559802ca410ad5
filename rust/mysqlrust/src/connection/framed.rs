use super::PacketChannel;
use crate::{
    errors::{ServerError, TransportError},
    protocol::{Packet, PacketHeader, AUTH_SWITCH_REQUEST, ERR_PACKET},
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, Level};

/// The longest packet that still counts as the EOF-shaped end of an exchange.
const LAST_PACKET_MAX_LENGTH: usize = 5;
/// Default limit on a reassembled packet (the server's `max_allowed_packet`
/// default).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// A [`PacketChannel`] over any byte stream, using the 4-byte MySQL packet
/// header. Payloads of 16MB or more are split over several frames and
/// reassembled on receipt.
#[derive(derive_more::Debug)]
pub struct FramedChannel<S> {
    #[debug(skip)]
    stream: S,
    sequence: u8,
    read_timeout: Option<Duration>,
    max_packet_size: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
            read_timeout: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Bound every [`PacketChannel::receive`] call. `None` waits forever.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Refuse received packets whose reassembled payload is longer than
    /// `max_packet_size` bytes.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Continue an exchange whose earlier packets were handled elsewhere.
    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    /// Start a new command. Sequence ids restart at zero.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// The sequence id of the next frame.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    fn next_sequence(&mut self) -> u8 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    async fn read_frame(&mut self, buf: &mut Vec<u8>) -> Result<PacketHeader, TransportError> {
        let mut header = [0; PacketHeader::SIZE];
        read_exact(&mut self.stream, &mut header).await?;
        let header = PacketHeader::decode(header);
        let expected = self.next_sequence();
        if header.sequence_id != expected {
            return Err(TransportError::Protocol(format!(
                "packet out of order: expected sequence {expected}, got {}",
                header.sequence_id
            )));
        }
        let start = buf.len();
        let total = start + header.payload_length as usize;
        if total > self.max_packet_size {
            return Err(TransportError::Protocol(format!(
                "packet of at least {total} bytes exceeds the {} byte limit",
                self.max_packet_size
            )));
        }
        buf.resize(total, 0);
        read_exact(&mut self.stream, &mut buf[start..]).await?;
        Ok(header)
    }

    async fn read_packet(&mut self) -> Result<Packet, TransportError> {
        let mut payload = vec![];
        while self.read_frame(&mut payload).await?.is_continued() {}

        if tracing::enabled!(Level::TRACE) {
            trace!("Read:");
            for s in hexdump::hexdump_iter(&payload) {
                trace!("{}", s);
            }
        }

        match payload.first() {
            Some(&ERR_PACKET) => match ServerError::parse(&payload) {
                Some(error) => Err(TransportError::Server(error)),
                None => Err(TransportError::Protocol("truncated ERR packet".into())),
            },
            Some(&AUTH_SWITCH_REQUEST) if payload.len() <= LAST_PACKET_MAX_LENGTH => {
                Ok(Packet::last(payload))
            }
            _ => Ok(Packet::new(payload)),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketChannel for FramedChannel<S> {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let max = PacketHeader::MAX_PAYLOAD_LENGTH as usize;
        let mut buf = Vec::with_capacity(payload.len() + PacketHeader::SIZE);
        let mut chunks = payload.chunks(max);
        loop {
            // A payload that fills its last frame is followed by an empty one.
            let chunk = chunks.next().unwrap_or_default();
            let header = PacketHeader::new(chunk.len() as u32, self.next_sequence());
            buf.extend_from_slice(&header.encode());
            buf.extend_from_slice(chunk);
            if chunk.len() < max {
                break;
            }
        }

        if tracing::enabled!(Level::TRACE) {
            trace!("Write:");
            for s in hexdump::hexdump_iter(&buf) {
                trace!("{}", s);
            }
        }
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Packet, TransportError> {
        match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.read_packet())
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => self.read_packet().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

async fn read_exact(
    stream: &mut (impl AsyncRead + Unpin),
    buf: &mut [u8],
) -> Result<(), TransportError> {
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(TransportError::Closed),
        Err(e) => Err(e.into()),
    }
}
