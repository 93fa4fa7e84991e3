//! Relay dispatcher: what the relay does with each decoded element.
//!
//! | Element   | Action                                                      |
//! |-----------|-------------------------------------------------------------|
//! | Identity  | register the origin connection under `sender`, no reply     |
//! | Message   | `Status(Accepted)` to the origin, then fan out to `receiver`|
//! | Heartbeat | echo with sender/receiver swapped, to the origin only       |
//! | Status    | accepted and ignored                                        |
//!
//! Fan-out is best-effort: each target is tried once and failures are only
//! logged. Messages for identities with no connections are dropped.

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use talk_core::{Element, ElementId, ElementKind, Heartbeat, Identity, Message, Status, UserId};
use talk_protocol::{codec, EncodeError};

use super::outbound::{ConnectionHandle, ForwardWriteFailure};
use crate::registry::{RegistryError, RegistryHandle};

/// What the dispatcher did with one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The origin connection was registered under `identity`.
    Registered { identity: UserId },

    /// A message was acknowledged and fanned out.
    Routed {
        message_id: ElementId,
        receiver: UserId,
        report: FanOutReport,
    },

    /// A heartbeat was echoed back to the origin.
    Echoed,

    /// The element needs no server-side action.
    Ignored { kind: ElementKind },
}

/// Result of forwarding one frame to a set of targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Failures that end the origin connection.
///
/// Fan-out failures are deliberately absent: they never reach the origin.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("registry unavailable: {0}")]
    Registry(#[from] RegistryError),

    /// The origin's own writer has stopped; replies can no longer be sent.
    #[error("origin connection closed")]
    OriginClosed,
}

/// Routes decoded elements. Cheap to clone; one per connection.
#[derive(Clone)]
pub struct Dispatcher {
    registry: RegistryHandle,
}

impl Dispatcher {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Handles one element received on `origin`.
    pub async fn dispatch(
        &self,
        element: Element,
        origin: &ConnectionHandle,
    ) -> Result<DispatchOutcome, DispatchError> {
        match element {
            Element::Identity(identity) => self.register(identity, origin).await,
            Element::Message(message) => self.route(message, origin).await,
            Element::Heartbeat(heartbeat) => echo(&heartbeat, origin).await,
            Element::Status(status) => {
                debug!(
                    connection = %origin.id(),
                    message_id = %status.message_id,
                    value = %status.value,
                    "Status received, no action"
                );
                Ok(DispatchOutcome::Ignored {
                    kind: ElementKind::Status,
                })
            }
        }
    }

    async fn register(
        &self,
        identity: Identity,
        origin: &ConnectionHandle,
    ) -> Result<DispatchOutcome, DispatchError> {
        let user = identity.envelope.sender;
        debug!(
            connection = %origin.id(),
            identity = %user,
            session = %identity.session,
            "Identity declared"
        );

        self.registry
            .register(user.clone(), origin.with_session(identity.session))
            .await?;

        Ok(DispatchOutcome::Registered { identity: user })
    }

    async fn route(
        &self,
        message: Message,
        origin: &ConnectionHandle,
    ) -> Result<DispatchOutcome, DispatchError> {
        let ack = codec::encode(&Status::accepted(&message).into())?;
        let ack_result = origin.send(ack).await;

        if !message.is_well_formed() {
            debug!(
                connection = %origin.id(),
                message_id = %message.envelope.id,
                "Forwarding message without exactly one of value/media"
            );
        }

        let message_id = message.envelope.id.clone();
        let receiver = message.envelope.receiver.clone();
        let frame = codec::encode(&Element::Message(message))?;

        let targets = self.registry.lookup(receiver.clone()).await;
        let report = fan_out(&frame, &targets);

        debug!(
            connection = %origin.id(),
            message_id = %message_id,
            receiver = %receiver,
            delivered = report.delivered,
            failed = report.failed,
            "Message routed"
        );

        ack_result.map_err(|_| DispatchError::OriginClosed)?;

        Ok(DispatchOutcome::Routed {
            message_id,
            receiver,
            report,
        })
    }
}

async fn echo(
    heartbeat: &Heartbeat,
    origin: &ConnectionHandle,
) -> Result<DispatchOutcome, DispatchError> {
    let reply = codec::encode(&heartbeat.echo().into())?;
    origin
        .send(reply)
        .await
        .map_err(|_| DispatchError::OriginClosed)?;
    Ok(DispatchOutcome::Echoed)
}

/// Offers the same encoded frame to every target without waiting on any of
/// them. A failing target is skipped.
pub fn fan_out(frame: &Bytes, targets: &[ConnectionHandle]) -> FanOutReport {
    let mut report = FanOutReport::default();

    for target in targets {
        match target.try_forward(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(failure) => {
                report.failed += 1;
                log_forward_failure(target, failure);
            }
        }
    }

    report
}

fn log_forward_failure(target: &ConnectionHandle, failure: ForwardWriteFailure) {
    debug!(
        connection = %target.id(),
        peer = ?target.peer(),
        error = %failure,
        "Skipping fan-out target"
    );
}
