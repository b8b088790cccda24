//! `StageSender`: fire-and-forget delivery from one stage to another
//! (§4.9). Broadcast to a stage's own connected actors is NOT here — it
//! lives in `stage::broadcast`, which has direct access to that stage's
//! `ActorRegistry` and never needs to go through a lookup seam.

// Layer 1: Standard library imports
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use tracing::debug;

// Layer 3: Internal module imports
use crate::error::RoutingError;
use crate::util::ids::StageId;
use crate::wire::Packet;

/// Resolves a target stage and hands it an inter-stage packet. Implemented
/// by `registry::StageRegistry`; kept as a trait here so `sender` never
/// depends on `registry` (which would otherwise need `sender` back for
/// `StageContext` construction, a cycle).
#[async_trait]
pub trait StageLookup: Send + Sync {
    /// Deliver `packet` (originating from `from`) to `target` as an
    /// `InterStagePacket` entry. Returns `StageNotFound` on a miss; the
    /// spec requires the caller to drop-and-log rather than propagate a
    /// reply (there is no reply channel for inter-stage sends).
    async fn send_to_stage(
        &self,
        target: StageId,
        from: StageId,
        packet: Packet,
    ) -> Result<(), RoutingError>;
}

/// A handle bound to the stage currently executing a handler, used to
/// reach other stages.
#[derive(Clone)]
pub struct StageSender {
    from_stage_id: StageId,
    lookup: Arc<dyn StageLookup>,
}

impl StageSender {
    pub fn new(from_stage_id: StageId, lookup: Arc<dyn StageLookup>) -> Self {
        Self { from_stage_id, lookup }
    }

    pub const fn stage_id(&self) -> StageId {
        self.from_stage_id
    }

    /// Send `packet` to `target`. On a miss, drops and logs per §4.9 — no
    /// error reaches the caller, since there is no sender-visible failure
    /// mode for an inter-stage send by design (§9 "forbids blocking
    /// request/reply" across stages).
    pub async fn send_to_stage_async(&self, target: StageId, packet: Packet) {
        if let Err(err) = self.lookup.send_to_stage(target, self.from_stage_id, packet).await {
            debug!(from = %self.from_stage_id, to = %target, %err, "inter-stage send dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingLookup {
        delivered: StdMutex<Vec<(StageId, StageId)>>,
        fail_target: Option<StageId>,
    }

    #[async_trait]
    impl StageLookup for RecordingLookup {
        async fn send_to_stage(
            &self,
            target: StageId,
            from: StageId,
            _packet: Packet,
        ) -> Result<(), RoutingError> {
            if Some(target) == self.fail_target {
                return Err(RoutingError::StageNotFound(target));
            }
            self.delivered.lock().unwrap().push((from, target));
            Ok(())
        }
    }

    fn packet() -> Packet {
        Packet::fire_and_forget("Ping", StageId::from_raw(1), Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn delivers_to_a_known_stage() {
        let lookup = Arc::new(RecordingLookup::default());
        let sender = StageSender::new(StageId::from_raw(1), lookup.clone());
        sender.send_to_stage_async(StageId::from_raw(2), packet()).await;
        assert_eq!(lookup.delivered.lock().unwrap().as_slice(), &[(StageId::from_raw(1), StageId::from_raw(2))]);
    }

    #[tokio::test]
    async fn unknown_target_is_dropped_without_panicking() {
        let lookup = Arc::new(RecordingLookup { fail_target: Some(StageId::from_raw(9)), ..Default::default() });
        let sender = StageSender::new(StageId::from_raw(1), lookup);
        sender.send_to_stage_async(StageId::from_raw(9), packet()).await;
    }
}
