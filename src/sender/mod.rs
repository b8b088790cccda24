//! Egress seams a Stage Runtime hands to user handlers (§4.9, §9).
//!
//! `ActorSender` and `StageSender` are thin, cheaply-cloned handles; the
//! actual routing they depend on (the Stage Registry) is injected through
//! `StageLookup` rather than imported directly, so this module never needs
//! to know about `registry` or `player` — it only needs `session` (to reach
//! a live client) and `wire` (to move a `Packet`).

pub mod actor_sender;
pub mod reply;
pub mod stage_sender;

pub use actor_sender::ActorSender;
pub use reply::ReplyScope;
pub use stage_sender::{StageLookup, StageSender};
