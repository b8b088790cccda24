//! `ActorRecord` — a player seat inside a Stage (§3).

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::player::traits::UserActor;
use crate::util::ids::{AccountId, SessionId, TimerId};

/// A player seat inside a stage. Outlives individual connections: a
/// transient disconnect leaves this record in place with `connected =
/// false` and a reconnect-timeout timer armed; only an explicit leave,
/// timeout, or stage close destroys it.
pub struct ActorRecord {
    pub account_id: AccountId,
    pub session_id: Option<SessionId>,
    pub connected: bool,
    pub reconnect_timer_id: Option<TimerId>,
    /// The user-implemented handler object for this actor.
    pub user_actor: Box<dyn UserActor>,
}

impl ActorRecord {
    pub fn new(account_id: AccountId, user_actor: Box<dyn UserActor>) -> Self {
        Self {
            account_id,
            session_id: None,
            connected: false,
            reconnect_timer_id: None,
            user_actor,
        }
    }
}

impl std::fmt::Debug for ActorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRecord")
            .field("account_id", &self.account_id)
            .field("session_id", &self.session_id)
            .field("connected", &self.connected)
            .field("reconnect_timer_id", &self.reconnect_timer_id)
            .finish_non_exhaustive()
    }
}
