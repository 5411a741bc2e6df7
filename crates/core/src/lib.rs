//! Client side of the Chimera game protocol.
//!
//! A [`ClientSession`] correlates the requests it sends with the responses the
//! server returns over a single ordered connection, and drives a match through
//! its lifecycle: create, join or spectate, then play moves.

/// The async loop binding a session to a transport and a view.
pub mod client;

/// Command line and environment configuration.
pub mod config;

/// Outstanding requests keyed by id.
pub mod correlation;

/// Response validation and routing to continuations.
pub mod dispatch;

/// Client identity and request id allocation.
pub mod identity;

/// Match lifecycle state machine.
pub mod lifecycle;

/// Wire message types and classification.
pub mod message;

pub mod session;

/// Tracing subscriber setup.
pub mod tracing;

/// Connection to the game server.
pub mod transport;

pub use client::{run_client, ClientCommand, ClientError, ExitReason};
pub use config::{Config, ConfigArgs, ConfigError};
pub use lifecycle::{EntryMode, MatchState, Role, ViewEvent};
pub use session::{ClientSession, SessionError};
pub use transport::{MemoryTransport, Transport, WebSocketTransport};
