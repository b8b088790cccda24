//! Stage Registry & Factory (§4.10): the process-wide `stage_type ->
//! constructor` table and `stage_id -> StageRuntime` index.

pub mod factory;

pub use factory::StageRegistry;
