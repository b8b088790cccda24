//! `SessionManager` (§4.4): the process-wide session index and the
//! duplicate-login eviction policy.
//!
//! Backed by `DashMap` rather than a single `Mutex<HashMap<_>>`: sessions
//! churn constantly (connect/disconnect/reconnect) and must never
//! serialize on one lock.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

// Layer 3: Internal module imports
use crate::session::session::{CloseReason, DisconnectReason, Session};
use crate::util::ids::{AccountId, SessionId};

/// Notified when a session's account binding changes in a way that the
/// stage/actor layer must react to. Kept as a trait so `session` never
/// depends on `registry` directly; `registry::StageRegistry` implements
/// this and is handed to `SessionManager::new`.
#[async_trait]
pub trait AccountEventSink: Send + Sync {
    /// The account's previous session was displaced by a newer login on a
    /// different session (§4.4): the stage owning that account's actor
    /// must be told the transport changed without tearing the actor down.
    async fn on_reconnected(&self, account_id: AccountId, new_session_id: SessionId);

    /// The account's only session disconnected without a replacement
    /// (§4.7): the owning stage starts its reconnect-grace countdown.
    async fn on_disconnected(&self, account_id: AccountId, reason: DisconnectReason);
}

/// Process-wide `session_id -> Session` and `account_id -> session_id`
/// index.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    by_account: DashMap<AccountId, SessionId>,
    sink: Arc<dyn AccountEventSink>,
}

impl SessionManager {
    pub fn new(sink: Arc<dyn AccountEventSink>) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            by_account: DashMap::new(),
            sink,
        })
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.session_id(), session);
    }

    pub fn get(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&session_id).map(|entry| Arc::clone(&entry))
    }

    pub fn get_by_account(&self, account_id: AccountId) -> Option<Arc<Session>> {
        let session_id = *self.by_account.get(&account_id)?;
        self.get(session_id)
    }

    /// Bind `session_id` to `account_id` once authentication succeeds,
    /// applying the duplicate-login policy: a prior session for the same
    /// account is closed with `DisplacedByDuplicateLogin`, and the stage
    /// layer is notified via `on_reconnected` so it can rebind the actor's
    /// transport instead of treating it as a fresh connect (§4.4).
    pub async fn bind_account(&self, account_id: AccountId, session_id: SessionId) {
        let previous = self.by_account.insert(account_id, session_id);
        if let Some(previous_id) = previous {
            if previous_id != session_id {
                if let Some(previous_session) = self.get(previous_id) {
                    info!(
                        %account_id,
                        old_session_id = %previous_id,
                        new_session_id = %session_id,
                        "duplicate login, displacing prior session"
                    );
                    previous_session.close(CloseReason::DisplacedByDuplicateLogin).await;
                    self.sessions.remove(&previous_id);
                }
                self.sink.on_reconnected(account_id, session_id).await;
            }
        }
    }

    /// Remove a closed session from the index and, if it still owned its
    /// account's binding (i.e. it was not already displaced), notify the
    /// stage layer that the account went dark.
    pub async fn remove(&self, session_id: SessionId, reason: DisconnectReason) {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return;
        };
        let Some(account_id) = session.account_id() else {
            return;
        };
        let still_current = self
            .by_account
            .get(&account_id)
            .map(|entry| *entry == session_id)
            .unwrap_or(false);
        if still_current {
            self.by_account.remove(&account_id);
            self.sink.on_disconnected(account_id, reason).await;
        }
    }

    /// Entry point for a transport layer that has observed a session die
    /// (read error, heartbeat watchdog, explicit close) but only knows the
    /// `CloseReason`, not a `DisconnectReason`. Reasons that never
    /// propagate to a stage (`DisplacedByDuplicateLogin`, `Explicit`,
    /// `ServerShutdown`) just drop the index entry; everything else goes
    /// through the same path as [`Self::remove`].
    pub async fn handle_session_closed(&self, session_id: SessionId, close_reason: CloseReason) {
        match close_reason.as_disconnect_reason() {
            Some(reason) => self.remove(session_id, reason).await,
            None => {
                self.sessions.remove(&session_id);
            }
        }
    }

    /// Force-close every currently indexed session (§5 graceful shutdown).
    /// Does not notify `AccountEventSink`: the stage layer is being torn
    /// down in the same shutdown sweep and does not need per-account
    /// disconnect bookkeeping for a process that is exiting.
    pub async fn close_all(&self, reason: CloseReason) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect();
        for session in sessions {
            session.close(reason).await;
        }
        self.sessions.clear();
        self.by_account.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::session::TransportKind;
    use crate::session::transport::TransportSink;
    use crate::wire::Packet;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct NullSink;
    #[async_trait]
    impl TransportSink for NullSink {
        async fn send_frame(&self, _packet: Packet) -> std::io::Result<()> {
            Ok(())
        }
        async fn close(&self) {}
    }

    #[derive(Default)]
    struct RecordingEventSink {
        reconnects: TokioMutex<Vec<(AccountId, SessionId)>>,
        disconnects: AtomicU32,
        last_disconnect_was_kicked: AtomicBool,
    }

    #[async_trait]
    impl AccountEventSink for RecordingEventSink {
        async fn on_reconnected(&self, account_id: AccountId, new_session_id: SessionId) {
            self.reconnects.lock().await.push((account_id, new_session_id));
        }
        async fn on_disconnected(&self, _account_id: AccountId, reason: DisconnectReason) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            self.last_disconnect_was_kicked
                .store(reason == DisconnectReason::Kicked, Ordering::SeqCst);
        }
    }

    fn session(id: i64) -> Arc<Session> {
        Session::new(SessionId::from_raw(id), TransportKind::Tcp, Arc::new(NullSink))
    }

    #[tokio::test]
    async fn duplicate_login_displaces_prior_session_and_notifies_sink() {
        let sink = Arc::new(RecordingEventSink::default());
        let manager = SessionManager::new(sink.clone());
        let account = AccountId::from_raw(1);

        let first = session(1);
        manager.insert(first.clone());
        manager.bind_account(account, first.session_id()).await;

        let second = session(2);
        manager.insert(second.clone());
        manager.bind_account(account, second.session_id()).await;

        assert!(first.is_closed());
        assert_eq!(manager.get_by_account(account).unwrap().session_id(), second.session_id());
        assert_eq!(sink.reconnects.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn remove_notifies_disconnect_only_when_still_current() {
        let sink = Arc::new(RecordingEventSink::default());
        let manager = SessionManager::new(sink.clone());
        let account = AccountId::from_raw(7);

        let session = session(1);
        session.mark_authenticated(account);
        manager.insert(session.clone());
        manager.bind_account(account, session.session_id()).await;

        manager.remove(session.session_id(), DisconnectReason::NetworkError).await;
        assert_eq!(sink.disconnects.load(Ordering::SeqCst), 1);
        assert!(manager.get_by_account(account).is_none());
    }

    #[tokio::test]
    async fn remove_is_a_noop_for_an_already_displaced_session() {
        let sink = Arc::new(RecordingEventSink::default());
        let manager = SessionManager::new(sink.clone());
        let account = AccountId::from_raw(3);

        let first = session(1);
        first.mark_authenticated(account);
        manager.insert(first.clone());
        manager.bind_account(account, first.session_id()).await;

        let second = session(2);
        second.mark_authenticated(account);
        manager.insert(second.clone());
        manager.bind_account(account, second.session_id()).await;

        // first was already removed by the displacement; removing again
        // (as the dying connection's cleanup path would) must not fire a
        // second disconnect notification for the account.
        manager.remove(first.session_id(), DisconnectReason::NetworkError).await;
        assert_eq!(sink.disconnects.load(Ordering::SeqCst), 0);
    }
}
