use std::sync::Arc;

use tandem_proto::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::NegotiationError;
use crate::machine::{Command, Flow, Input, Negotiator, NegotiatorConfig, SessionEvent};
use crate::media::{MediaProvider, TrackKind};

/// Owns a [`Negotiator`] and its input queue. Every server message, user
/// command and media report goes through the same queue, so they are applied
/// one at a time in arrival order.
pub struct Driver {
    negotiator: Negotiator,
    inputs: mpsc::UnboundedReceiver<Input>,
}

impl Driver {
    pub fn new(
        provider: Arc<dyn MediaProvider>,
        config: NegotiatorConfig,
        outbound: mpsc::UnboundedSender<ClientMessage>,
    ) -> (Self, NegotiationHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (input_tx, inputs) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let negotiator = Negotiator::new(provider, config, outbound, event_tx, input_tx.clone());
        (
            Self { negotiator, inputs },
            NegotiationHandle { inputs: input_tx },
            events,
        )
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    /// Wait for the next input and apply it. Returns `None` when the queue
    /// has closed.
    pub async fn step(&mut self) -> Option<Flow> {
        let input = self.inputs.recv().await?;
        Some(self.negotiator.handle(input).await)
    }

    pub async fn run(mut self) {
        while let Some(flow) = self.step().await {
            if flow == Flow::Stop {
                break;
            }
        }
        debug!(target: "tandem::negotiation", "negotiation driver stopped");
    }
}

/// Cloneable front door to a running [`Driver`].
#[derive(Debug, Clone)]
pub struct NegotiationHandle {
    inputs: mpsc::UnboundedSender<Input>,
}

impl NegotiationHandle {
    /// Feed a message received from the signaling server.
    pub fn deliver(&self, message: ServerMessage) -> Result<(), NegotiationError> {
        self.push(Input::Server(message))
    }

    /// Report that the signaling connection is gone.
    pub fn signaling_closed(&self) {
        let _ = self.inputs.send(Input::ServerClosed);
    }

    pub fn command(&self, command: Command) -> Result<(), NegotiationError> {
        self.push(Input::Command(command))
    }

    pub fn ready(&self) -> Result<(), NegotiationError> {
        self.command(Command::Ready)
    }

    pub fn next(&self) -> Result<(), NegotiationError> {
        self.command(Command::Next)
    }

    pub fn leave(&self) -> Result<(), NegotiationError> {
        self.command(Command::Leave)
    }

    pub fn set_username(&self, username: impl Into<String>) -> Result<(), NegotiationError> {
        self.command(Command::SetUsername(username.into()))
    }

    pub fn send_chat(&self, text: impl Into<String>) -> Result<(), NegotiationError> {
        self.command(Command::SendChat(text.into()))
    }

    pub fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), NegotiationError> {
        self.command(Command::SetTrackEnabled { kind, enabled })
    }

    pub fn shutdown(&self) -> Result<(), NegotiationError> {
        self.command(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.inputs.is_closed()
    }

    fn push(&self, input: Input) -> Result<(), NegotiationError> {
        self.inputs
            .send(input)
            .map_err(|_| NegotiationError::ChannelClosed)
    }
}
