//! Client side of tandem pairing: a single-consumer negotiation state machine
//! that exchanges offers, answers and candidates with the assigned peer
//! through the matchmaking server's relay.
//!
//! The media engine itself is opaque ([`MediaProvider`] / [`MediaSession`]);
//! [`mock::MockMediaProvider`] scripts it for tests, and the `webrtc` feature
//! provides a data-channel implementation.

pub mod client;
mod driver;
mod error;
mod machine;
pub mod media;
pub mod mock;
mod session;

#[cfg(feature = "webrtc")]
pub mod rtc;

pub use client::{connect, ClientSession};
pub use driver::{Driver, NegotiationHandle};
pub use error::NegotiationError;
pub use machine::{
    Command, Flow, Input, Negotiator, NegotiatorConfig, PeerLostReason, Presence, SessionEvent,
};
pub use media::{
    Connectivity, MediaEvent, MediaEventKind, MediaEvents, MediaProvider, MediaRequest,
    MediaSession, Role, TrackKind,
};
pub use session::{NegotiationSession, Phase};
