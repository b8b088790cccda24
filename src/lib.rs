//! # roomcore - Realtime Multi-Room Game Server Core
//!
//! The serialization and routing core for a realtime game server: many
//! concurrently-running rooms ("Stages"), each owning a lock-free mailbox
//! that guarantees strict FIFO processing of everything addressed to it,
//! and the players ("Actors") that join and leave them across reconnects.
//!
//! This crate is the core only: it never opens a socket and never ships a
//! client. A host binary wires a real transport (TCP, WebSocket, ...) to
//! [`wire::PacketCodec`] and a [`runtime::Runtime`], and supplies a
//! [`auth::TokenVerifier`] and one or more [`stage::UserStage`]
//! implementations.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use roomcore::prelude::*;
//! use async_trait::async_trait;
//! use bytes::Bytes;
//!
//! struct LobbyStage;
//!
//! #[async_trait]
//! impl UserStage for LobbyStage {
//!     async fn on_dispatch(
//!         &mut self,
//!         ctx: &StageContext,
//!         actor: &ActorContext,
//!         reply: Option<&ReplyScope>,
//!         packet: &Packet,
//!         registry: &roomcore::player::ActorRegistry,
//!     ) -> HandlerResult<()> {
//!         if let Some(reply) = reply {
//!             reply.reply("Ack", Bytes::new());
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RuntimeConfig::default();
//!     let verifier = Arc::new(HmacTokenVerifier::new(b"dev-secret".to_vec()));
//!     let runtime = Runtime::new(config, verifier);
//!     runtime.register_stage_type("Lobby", || Box::new(LobbyStage) as Box<dyn UserStage>);
//! }
//! ```
//!
//! # Module Organization
//!
//! ## Wire & transport boundary
//! - [`wire`] - frame codec, compression, buffer pools
//! - [`auth`] - Room Token contract and `TokenVerifier` seam
//!
//! ## Connections
//! - [`session`] - one `Session` per live connection, heartbeats, the
//!   process-wide `SessionManager` (duplicate-login eviction)
//!
//! ## Rooms
//! - [`mailbox`] - generic bounded queues and the lock-free Stage Mailbox
//! - [`stage`] - Stage lifecycle, `UserStage`, `StageContext`, broadcast
//! - [`player`] - `UserActor`, the per-stage busy-flag `ActorRegistry`
//! - [`registry`] - the Stage Registry & Factory
//! - [`timer`] - repeat/count/one-shot timers delivered into stage mailboxes
//! - [`asyncblock`] - the sanctioned escape hatch for blocking work
//! - [`sender`] - `StageSender`/`ActorSender`/`ReplyScope` egress seams
//!
//! ## Wiring it all together
//! - [`runtime`] - `RuntimeConfig`, `Runtime`, the auth-handshake ingress
//!   path and graceful shutdown
//! - [`monitoring`] - structured event recording (`Monitor<E>`)
//! - [`error`] - the crate-wide error taxonomy and wire `ErrorCode`
//! - [`util`] - id newtypes
//!
//! # Architecture Principles
//!
//! ## Serialization, not locking
//! A Stage's state is mutated only from inside its own mailbox worker.
//! Nothing outside ever touches it directly; every external actor — a
//! session, another stage, a timer — only ever enqueues.
//!
//! ## Reconnect without actor loss
//! Disconnecting a session never destroys the Actor it was attached to.
//! The owning stage starts a reconnect-grace timer; a fresh login for the
//! same account before it fires rebinds the transport in place.
//!
//! ## Inversion of control at every module seam
//! `session` never depends on `registry`; `registry` never depends on
//! `stage::runtime` internals beyond the trait object it is handed. Each
//! cross-module need is expressed as a small trait (`AccountEventSink`,
//! `StageLookup`, `TimerSink`) so the dependency graph stays acyclic.

pub mod asyncblock;
pub mod auth;
pub mod error;
pub mod mailbox;
pub mod monitoring;
pub mod player;
pub mod registry;
pub mod runtime;
pub mod sender;
pub mod session;
pub mod stage;
pub mod timer;
pub mod util;
pub mod wire;

pub use error::{ErrorCode, MailboxError, RoutingError, RuntimeError, SessionError, WireError};
pub use registry::StageRegistry;
pub use runtime::{Runtime, RuntimeConfig, RuntimeConfigBuilder};
pub use sender::{ActorSender, ReplyScope, StageLookup, StageSender};
pub use stage::{HandlerError, HandlerResult, StageContext, StageRuntime, UserStage};
pub use util::{AccountId, IdGenerator, SessionId, StageId, TimerId};

/// Commonly used types, re-exported for `use roomcore::prelude::*;`.
pub mod prelude {
    pub use crate::auth::{HmacTokenVerifier, RoomTokenClaims, StageTarget, TokenVerifier};
    pub use crate::error::{ErrorCode, RuntimeError};
    pub use crate::player::{ActorContext, ActorRegistry, UserActor};
    pub use crate::runtime::{Runtime, RuntimeConfig};
    pub use crate::sender::ReplyScope;
    pub use crate::stage::{HandlerResult, StageContext, UserStage};
    pub use crate::util::{AccountId, SessionId, StageId, TimerId};
    pub use crate::wire::Packet;
    pub use std::sync::Arc;
}
