//! `ActorSender`: push a packet to one specific actor's live session,
//! independent of any reply scope (e.g. a notification unrelated to the
//! request currently being handled).

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use tracing::debug;

// Layer 3: Internal module imports
use crate::session::manager::SessionManager;
use crate::util::ids::AccountId;
use crate::wire::Packet;

/// A handle bound to one actor's account, valid only inside the stage
/// handler invocation it was created for. Looks the live session up fresh
/// on every send, since the session behind an account can change between
/// calls (duplicate login, reconnect).
#[derive(Clone)]
pub struct ActorSender {
    account_id: AccountId,
    session_manager: Arc<SessionManager>,
}

impl ActorSender {
    pub fn new(account_id: AccountId, session_manager: Arc<SessionManager>) -> Self {
        Self { account_id, session_manager }
    }

    pub const fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Enqueue `packet` on the actor's current session's send queue.
    /// Silently dropped (and logged) if the actor has no live session —
    /// this is the normal case for a disconnected actor and not an error
    /// (§4.9 broadcast semantics apply the same way here).
    pub fn send_async(&self, packet: Packet) {
        match self.session_manager.get_by_account(self.account_id) {
            Some(session) => {
                if let Err(err) = session.send_async(packet) {
                    debug!(account_id = %self.account_id, %err, "dropping send to actor, queue closed");
                }
            }
            None => debug!(account_id = %self.account_id, "dropping send to disconnected actor"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::session::{Session, TransportKind};
    use crate::session::transport::TransportSink;
    use crate::session::AccountEventSink;
    use crate::util::ids::SessionId;
    use crate::wire::PacketFlags;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink(Arc<StdMutex<Vec<Packet>>>);
    #[async_trait]
    impl TransportSink for RecordingSink {
        async fn send_frame(&self, packet: Packet) -> std::io::Result<()> {
            self.0.lock().unwrap().push(packet);
            Ok(())
        }
        async fn close(&self) {}
    }

    struct NullEventSink;
    #[async_trait]
    impl AccountEventSink for NullEventSink {
        async fn on_reconnected(&self, _: AccountId, _: SessionId) {}
        async fn on_disconnected(&self, _: AccountId, _: crate::session::session::DisconnectReason) {}
    }

    fn packet() -> Packet {
        Packet::fire_and_forget("Tick", crate::util::ids::StageId::from_raw(1), Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn send_reaches_the_actors_live_session() {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let manager = SessionManager::new(Arc::new(NullEventSink));
        let account = AccountId::from_raw(1);
        let session = Session::new(SessionId::from_raw(1), TransportKind::Tcp, Arc::new(RecordingSink(sent.clone())));
        session.mark_authenticated(account);
        manager.insert(session);
        manager.bind_account(account, SessionId::from_raw(1)).await;

        let sender = ActorSender::new(account, manager);
        sender.send_async(packet());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_to_disconnected_actor_is_silently_dropped() {
        let manager = SessionManager::new(Arc::new(NullEventSink));
        let sender = ActorSender::new(AccountId::from_raw(99), manager);
        sender.send_async(packet());
    }
}
