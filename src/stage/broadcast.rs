//! Broadcast Engine (§4.9): filtered fan-out to a stage's connected actors.
//!
//! Plain functions rather than a type, operating on the registry and
//! session manager handed in by the caller — `StageContext::broadcast`
//! calls through to this while the runtime still holds the stage's
//! registry for the current entry, so "the set of recipients is
//! well-defined" (§4.9) by construction.

// Layer 1: Standard library imports
// (none)

// Layer 2: Third-party crate imports
use tracing::trace;

// Layer 3: Internal module imports
use crate::player::ActorRegistry;
use crate::session::manager::SessionManager;
use crate::util::ids::AccountId;
use crate::wire::Packet;

/// Send a clone of `packet` to every actor in `registry` that is
/// `connected` and for which `filter(account_id)` returns `true`. Returns
/// the number of recipients actually reached.
pub fn broadcast(
    registry: &ActorRegistry,
    session_manager: &SessionManager,
    packet: &Packet,
    filter: impl Fn(AccountId) -> bool,
) -> usize {
    let mut delivered = 0usize;
    for (account_id, record) in registry.iter() {
        if !record.connected || !filter(*account_id) {
            continue;
        }
        match session_manager.get_by_account(*account_id) {
            Some(session) if session.send_async(packet.clone()).is_ok() => delivered += 1,
            _ => trace!(account_id = %account_id, "broadcast skipped actor with no reachable session"),
        }
    }
    delivered
}
