use crate::{errors::TransportError, protocol::Packet};

/// A bidirectional, ordered, packet-level link to the server.
///
/// Implementations own the framing: [`Self::send`] writes one logical packet
/// and [`Self::receive`] returns the next one, with ERR packets already turned
/// into [`TransportError::Server`].
#[allow(async_fn_in_trait)]
pub trait PacketChannel {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    async fn receive(&mut self) -> Result<Packet, TransportError>;

    /// Shut the link down. The channel is not used afterwards.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
