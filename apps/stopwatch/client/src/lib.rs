//! Sync client for the shared stopwatch.
//!
//! A [`SyncClient`] keeps a [`ClientMirror`] of the timekeeper's state,
//! renders it locally between server events, queues commands while offline
//! and reconnects with a fixed backoff until its retry budget runs out.

mod client;
pub mod config;
pub mod error;
pub mod mirror;
pub mod queue;
pub mod reconnect;
pub mod surface;
pub mod transport;

pub use client::SyncClient;
pub use config::{ClientConfig, HeartbeatConfig};
pub use error::ClientError;
pub use mirror::ClientMirror;
pub use queue::{OutboundQueue, QueueStats};
pub use reconnect::{ConnectionState, ReconnectDecision, Reconnector};
pub use surface::RenderSurface;
pub use transport::{Connector, Transport, WebSocketConnector, WebSocketTransport};
