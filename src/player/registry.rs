//! Per-stage Actor Registry with busy-flag FIFO (§4.6).
//!
//! Deliberately a plain `HashMap`/`VecDeque`, not `DashMap`: unlike the
//! Stage Registry or Session Manager, this state is only ever touched from
//! inside the single mailbox worker task that owns the stage at any given
//! moment (§4.5's serialization contract), so no internal locking is
//! needed here — the mailbox itself is the lock.

// Layer 1: Standard library imports
use std::collections::{HashMap, VecDeque};

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::player::record::ActorRecord;
use crate::util::ids::AccountId;
use crate::wire::Packet;

/// account_id -> ActorRecord, plus the busy-flag bookkeeping from §4.6.
#[derive(Default)]
pub struct ActorRegistry {
    actors: HashMap<AccountId, ActorRecord>,
    busy: HashMap<AccountId, VecDeque<Packet>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: AccountId) -> Option<&ActorRecord> {
        self.actors.get(&account_id)
    }

    pub fn get_mut(&mut self, account_id: AccountId) -> Option<&mut ActorRecord> {
        self.actors.get_mut(&account_id)
    }

    pub fn contains(&self, account_id: AccountId) -> bool {
        self.actors.contains_key(&account_id)
    }

    pub fn insert(&mut self, record: ActorRecord) {
        self.actors.insert(record.account_id, record);
    }

    pub fn remove(&mut self, account_id: AccountId) -> Option<ActorRecord> {
        self.busy.remove(&account_id);
        self.actors.remove(&account_id)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &ActorRecord)> {
        self.actors.iter()
    }

    pub fn account_ids(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.actors.keys().copied()
    }

    /// `true` while `account_id`'s previous entry is still suspended
    /// inside a handler.
    pub fn is_busy(&self, account_id: AccountId) -> bool {
        self.busy.contains_key(&account_id)
    }

    /// Claim `account_id` as busy for the duration of processing one
    /// entry. The caller MUST already have confirmed `!is_busy(account_id)`.
    pub fn begin_busy(&mut self, account_id: AccountId) {
        self.busy.entry(account_id).or_default();
    }

    /// Queue `packet` behind `account_id`'s currently in-flight entry
    /// instead of processing it now, preserving intra-actor FIFO across
    /// the suspension (§4.6, invariant #2 in §8).
    pub fn defer(&mut self, account_id: AccountId, packet: Packet) {
        self.busy.entry(account_id).or_default().push_back(packet);
    }

    /// Called when `account_id`'s in-flight handler completes. Clears the
    /// busy flag; if a deferred packet was waiting, re-claims busy and
    /// hands it back to the caller for immediate dispatch, maintaining the
    /// actor's own arrival order.
    pub fn finish_busy(&mut self, account_id: AccountId) -> Option<Packet> {
        let Some(queue) = self.busy.get_mut(&account_id) else {
            return None;
        };
        match queue.pop_front() {
            Some(next) => Some(next),
            None => {
                self.busy.remove(&account_id);
                None
            }
        }
    }
}
