use super::PacketChannel;
use crate::{
    config::AuthConfig,
    errors::{invalid_state, HandshakeError, TransportError},
    handshake::{
        client::{
            HandshakeDrive, HandshakeOutcome, HandshakeState, HandshakeStateSend,
            HandshakeStateType, HandshakeStateUpdate,
        },
        HandshakeKind, SwitchPolicy,
    },
};
use mysql_auth::{ConnectionContext, MechanismRegistry};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Buffers what the state machine wants to send and performs it against a
/// [`PacketChannel`] once the state machine returns.
#[derive(Debug, Default)]
pub struct HandshakeDriver {
    outbox: VecDeque<Vec<u8>>,
    close: bool,
}

impl HandshakeStateSend for HandshakeDriver {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.outbox.push_back(payload.to_vec());
        Ok(())
    }
    fn close(&mut self) {
        self.close = true;
    }
}

impl HandshakeStateUpdate for HandshakeDriver {
    fn state_changed(&mut self, state: HandshakeStateType) {
        trace!("State: {state:?}");
    }
    fn mechanism(&mut self, method: &str) {
        trace!("Mechanism: {method}");
    }
}

impl HandshakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn drive(
        &mut self,
        state: &mut HandshakeState<'_>,
        drive: HandshakeDrive<'_>,
        channel: &mut impl PacketChannel,
    ) -> Result<(), HandshakeError> {
        let result = state.drive(drive, self);
        if self.close {
            self.close = false;
            self.outbox.clear();
            close(channel).await;
        }
        result?;

        while let Some(payload) = self.outbox.pop_front() {
            if let Err(error) = channel.send(&payload).await {
                self.outbox.clear();
                state.drive(HandshakeDrive::Failure(error), self)?;
            }
        }
        Ok(())
    }
}

async fn close(channel: &mut impl PacketChannel) {
    if let Err(e) = channel.close().await {
        warn!("Failed to close channel: {e}");
    }
}

/// Runs a complete authentication exchange over a [`PacketChannel`].
///
/// The caller has already read the server greeting and passes in the method
/// and challenge it announced. The channel is borrowed for the duration of
/// the exchange and left positioned after the final server packet.
#[derive(Debug, Clone, Copy)]
pub struct Authenticator<'a> {
    context: &'a ConnectionContext,
    registry: &'a MechanismRegistry,
    switch_policy: SwitchPolicy,
}

impl<'a> Authenticator<'a> {
    pub fn new(context: &'a ConnectionContext, registry: &'a MechanismRegistry) -> Self {
        Self {
            context,
            registry,
            switch_policy: SwitchPolicy::default(),
        }
    }

    pub fn from_config(
        context: &'a ConnectionContext,
        registry: &'a MechanismRegistry,
        config: &AuthConfig,
    ) -> Self {
        Self::new(context, registry).with_switch_policy(config.switch_policy)
    }

    pub fn with_switch_policy(mut self, switch_policy: SwitchPolicy) -> Self {
        self.switch_policy = switch_policy;
        self
    }

    pub async fn authenticate(
        &self,
        channel: &mut impl PacketChannel,
        method: &str,
        challenge: &[u8],
        kind: HandshakeKind,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let mut state =
            match HandshakeState::new(self.context, self.registry, method, challenge, kind) {
                Ok(state) => state.with_switch_policy(self.switch_policy),
                Err(error) => {
                    if error.kind.closes_connection() {
                        close(channel).await;
                    }
                    return Err(error);
                }
            };
        let mut driver = HandshakeDriver::new();
        driver
            .drive(&mut state, HandshakeDrive::Initial, channel)
            .await?;

        while !state.is_done() {
            match channel.receive().await {
                Ok(packet) => {
                    driver
                        .drive(&mut state, HandshakeDrive::Packet(&packet), channel)
                        .await?
                }
                Err(error) => {
                    driver
                        .drive(&mut state, HandshakeDrive::Failure(error), channel)
                        .await?
                }
            }
        }

        let method = state.method().to_owned();
        state.into_outcome().ok_or_else(|| {
            HandshakeError::new(
                self.context,
                &method,
                invalid_state!("Handshake finished without an outcome"),
            )
        })
    }
}
