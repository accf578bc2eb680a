//! Matchmaking and signaling relay: participants connect over a WebSocket,
//! wait in a FIFO queue, get paired one-to-one and exchange opaque
//! negotiation payloads through the server.

pub mod cli;
pub mod config;
pub mod lobby;
pub mod matchmaker;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;
pub mod telemetry;
pub mod websocket;

pub use config::{ConfigError, LobbyConfig, OriginPolicy, ServerConfig};
pub use lobby::Lobby;
pub use presence::PresenceSnapshot;
pub use server::{build_router, serve, AppState};
