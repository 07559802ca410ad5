use super::{HandshakeKind, SwitchPolicy};
use crate::{
    errors::{invalid_state, HandshakeError, HandshakeErrorKind, TransportError},
    protocol::{AuthSwitchRequest, HandshakeResponse, Packet, AUTH_SWITCH_REQUEST, MORE_DATA},
};
use mysql_auth::{AuthMechanism, Challenge, ConnectionContext, FailureAction, MechanismRegistry};
use tracing::{error, trace, warn};

#[derive(Debug)]
enum HandshakeStateImpl {
    /// The mechanism for the server's advertised method is bound to the
    /// initial challenge. Nothing has been sent yet.
    Initializing(Box<dyn AuthMechanism>),
    /// The handshake response was sent and we are waiting for the server's
    /// verdict.
    ResponseSent(Box<dyn AuthMechanism>),
    /// The server switched methods. Continuation data was sent and we are
    /// waiting for the reply.
    Continuing(Box<dyn AuthMechanism>),
    /// The mechanism ran out of data while the server still asked for more.
    /// The next packet is the last one.
    Draining(Box<dyn AuthMechanism>),
    /// Authentication is complete.
    Done(HandshakeOutcome),
    /// The handshake failed.
    Error,
}

impl HandshakeStateImpl {
    fn notify_failure(
        &mut self,
        context: &ConnectionContext,
        error: &HandshakeErrorKind,
    ) -> FailureAction {
        use HandshakeStateImpl::*;
        match self {
            Initializing(mechanism)
            | ResponseSent(mechanism)
            | Continuing(mechanism)
            | Draining(mechanism) => mechanism.on_failure(context, error),
            Done(_) | Error => FailureAction::Propagate,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeStateType {
    ResponseSent,
    Switching,
    Continuing,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum HandshakeDrive<'a> {
    Initial,
    Packet(&'a Packet),
    /// The channel failed, or the server answered with an ERR packet.
    Failure(TransportError),
}

pub trait HandshakeStateSend {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    /// The connection must not be used again.
    fn close(&mut self);
}

/// A callback for handshake state changes.
#[allow(unused)]
pub trait HandshakeStateUpdate: HandshakeStateSend {
    fn state_changed(&mut self, state: HandshakeStateType) {}
    fn mechanism(&mut self, method: &str) {}
}

/// The result of a successful handshake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HandshakeOutcome {
    /// The method that completed authentication.
    pub method: String,
    /// The server's final packet (normally OK), left for the caller to
    /// interpret. `None` when the exchange ended without reading one and the
    /// caller still has to read the final result.
    pub final_packet: Option<Vec<u8>>,
}

/// ASCII state diagram for the authentication handshake
///
/// ```mermaid
/// stateDiagram-v2
///     [*] --> Initializing
///     Initializing --> ResponseSent: Send handshake response
///     ResponseSent --> Done: Final result
///     ResponseSent --> Continuing: Method switch, continuation data sent
///     ResponseSent --> Done: Method switch, no continuation data
///     Continuing --> Continuing: More data requested
///     Continuing --> Draining: More data requested, mechanism finished
///     Continuing --> Done: Final result
///     Draining --> Done: Final result
///     Done --> [*]
///     state Error {
///         [*] --> [*]: Any state can transition to Error
///     }
/// ```
///
/// The client side of MySQL authentication. The state machine is driven with
/// calls to [`Self::drive`] and never performs I/O itself: packets to send go
/// through [`HandshakeStateSend`], packets received are fed back in.
#[derive(Debug)]
pub struct HandshakeState<'a> {
    context: &'a ConnectionContext,
    registry: &'a MechanismRegistry,
    kind: HandshakeKind,
    switch_policy: SwitchPolicy,
    method: String,
    state: HandshakeStateImpl,
}

impl<'a> HandshakeState<'a> {
    /// Prepare a handshake for the `method` and `challenge` announced in the
    /// server greeting.
    ///
    /// Nothing has been sent when this fails. If the error
    /// [closes the connection](HandshakeErrorKind::closes_connection), the
    /// caller must close it.
    pub fn new(
        context: &'a ConnectionContext,
        registry: &'a MechanismRegistry,
        method: &str,
        challenge: &[u8],
        kind: HandshakeKind,
    ) -> Result<Self, HandshakeError> {
        let mechanism = registry
            .create(method, Challenge::from_wire(challenge))
            .map_err(|e| HandshakeError::new(context, method, e.into()))?;
        Ok(Self {
            context,
            registry,
            kind,
            switch_policy: SwitchPolicy::default(),
            method: method.to_owned(),
            state: HandshakeStateImpl::Initializing(mechanism),
        })
    }

    pub fn with_switch_policy(mut self, switch_policy: SwitchPolicy) -> Self {
        self.switch_policy = switch_policy;
        self
    }

    /// The method currently in use.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, HandshakeStateImpl::Done(..))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.state, HandshakeStateImpl::Error)
    }

    pub fn is_done(&self) -> bool {
        self.is_complete() || self.is_error()
    }

    pub fn outcome(&self) -> Option<&HandshakeOutcome> {
        match &self.state {
            HandshakeStateImpl::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn into_outcome(self) -> Option<HandshakeOutcome> {
        match self.state {
            HandshakeStateImpl::Done(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn drive(
        &mut self,
        drive: HandshakeDrive,
        update: &mut impl HandshakeStateUpdate,
    ) -> Result<(), HandshakeError> {
        trace!("Received drive {drive:?} in state {:?}", self.state);
        let state = std::mem::replace(&mut self.state, HandshakeStateImpl::Error);
        match self.step(state, drive, update) {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(kind) => {
                if kind.closes_connection() {
                    update.close();
                }
                update.state_changed(HandshakeStateType::Failed);
                let error = HandshakeError::new(self.context, &self.method, kind);
                error!("{error}");
                Err(error)
            }
        }
    }

    fn step(
        &mut self,
        state: HandshakeStateImpl,
        drive: HandshakeDrive,
        update: &mut impl HandshakeStateUpdate,
    ) -> Result<HandshakeStateImpl, HandshakeErrorKind> {
        use HandshakeStateImpl::*;
        match (state, drive) {
            (Initializing(mechanism), HandshakeDrive::Initial) => {
                let credential = mechanism.initial_response(self.context)?;
                let response = HandshakeResponse {
                    kind: self.kind,
                    capabilities: self.context.capabilities,
                    encoding: self.context.encoding,
                    username: &self.context.username,
                    credential: &credential,
                    database: self.context.database(),
                    method: &self.method,
                    attributes: &self.context.connect_attributes,
                }
                .to_vec()?;
                trace!(
                    "Sending {:?} response using {} ({} bytes)",
                    self.kind,
                    mechanism.name(),
                    response.len()
                );
                update.send(&response)?;
                update.state_changed(HandshakeStateType::ResponseSent);
                Ok(ResponseSent(mechanism))
            }
            (ResponseSent(mechanism), HandshakeDrive::Packet(packet)) => {
                match packet.payload.first() {
                    Some(&AUTH_SWITCH_REQUEST) if packet.last => {
                        warn!(
                            "Server {} requested the pre-4.1 password protocol",
                            self.context.host
                        );
                        Err(HandshakeErrorKind::UnsupportedLegacyMethod)
                    }
                    Some(&AUTH_SWITCH_REQUEST) => {
                        drop(mechanism);
                        self.switch(&packet.payload, update)
                    }
                    _ => Ok(self.complete(mechanism, Some(packet.payload.as_slice()), update)),
                }
            }
            (Continuing(mut mechanism), HandshakeDrive::Packet(packet)) => {
                match packet.payload.split_first() {
                    Some((&MORE_DATA, data)) => {
                        trace!("Server requested more data ({} bytes)", data.len());
                        match non_empty(mechanism.continuation(self.context, Some(data))?) {
                            Some(next) => {
                                update.send(&next)?;
                                Ok(Continuing(mechanism))
                            }
                            None => {
                                trace!("Mechanism finished, reading the final server packet");
                                Ok(Draining(mechanism))
                            }
                        }
                    }
                    Some((&AUTH_SWITCH_REQUEST, _))
                        if self.switch_policy == SwitchPolicy::Reject =>
                    {
                        Err(HandshakeErrorKind::UnexpectedSwitch)
                    }
                    _ => Ok(self.complete(mechanism, Some(packet.payload.as_slice()), update)),
                }
            }
            (Draining(mechanism), HandshakeDrive::Packet(packet)) => {
                Ok(self.complete(mechanism, Some(packet.payload.as_slice()), update))
            }
            (
                mut state @ (ResponseSent(_) | Continuing(_) | Draining(_)),
                HandshakeDrive::Failure(error),
            ) => {
                let kind = HandshakeErrorKind::from(error);
                match state.notify_failure(self.context, &kind) {
                    FailureAction::Recover if kind.is_recoverable() => {
                        warn!("{} recovered from failure: {kind}", self.method);
                        Ok(state)
                    }
                    FailureAction::Recover => {
                        warn!("{} cannot recover from a connection failure: {kind}", self.method);
                        Err(kind)
                    }
                    FailureAction::Propagate => Err(kind),
                }
            }
            (Done(_) | Error, _) => Err(invalid_state!("Unexpected drive for Done or Error state")),
            _ => Err(invalid_state!("Unexpected (state, drive) combination")),
        }
    }

    /// Replace the active mechanism with the one the server asked for and
    /// start its continuation exchange. The handshake response is not sent
    /// again.
    fn switch(
        &mut self,
        payload: &[u8],
        update: &mut impl HandshakeStateUpdate,
    ) -> Result<HandshakeStateImpl, HandshakeErrorKind> {
        let request =
            AuthSwitchRequest::parse(payload).map_err(HandshakeErrorKind::MalformedPacket)?;
        trace!("Server switched authentication method to {:?}", request.method);
        self.method = request.method.to_owned();
        update.mechanism(&self.method);
        update.state_changed(HandshakeStateType::Switching);

        let mut mechanism = self
            .registry
            .create(request.method, Challenge::from_wire(request.data))?;
        match non_empty(mechanism.continuation(self.context, None)?) {
            Some(data) => {
                update.send(&data)?;
                update.state_changed(HandshakeStateType::Continuing);
                Ok(HandshakeStateImpl::Continuing(mechanism))
            }
            None => Ok(self.complete(mechanism, None, update)),
        }
    }

    fn complete(
        &self,
        mut mechanism: Box<dyn AuthMechanism>,
        final_packet: Option<&[u8]>,
        update: &mut impl HandshakeStateUpdate,
    ) -> HandshakeStateImpl {
        mechanism.on_success();
        trace!("Authentication complete using {}", self.method);
        update.state_changed(HandshakeStateType::Done);
        HandshakeStateImpl::Done(HandshakeOutcome {
            method: self.method.clone(),
            final_packet: final_packet.map(<[u8]>::to_vec),
        })
    }
}

fn non_empty(data: Option<Vec<u8>>) -> Option<Vec<u8>> {
    data.filter(|data| !data.is_empty())
}
