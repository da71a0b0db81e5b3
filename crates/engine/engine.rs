//! Simulation sandbox behind a node's read-only execution RPCs: single-call
//! execution against overridden state, binary-search gas estimation,
//! multi-block what-if simulation over chained ephemeral blocks, and
//! iterative access-list construction. Nothing in here ever touches
//! persisted chain state; all writes land in a throwaway overlay.

mod access_list;
mod config;
mod error;
mod estimate;
mod executor;
mod message;
mod overlay_db;
mod overrides;
mod simulate;

pub use access_list::{AccessListResult, create_access_list};
pub use config::{Deadline, SimulationLimits};
pub use error::{EngineError, InvalidTxError, RevertError, decode_revert_reason};
pub use estimate::{ESTIMATE_GAS_ERROR_RATIO, estimate_gas};
pub use executor::{CallError, CallOptions, ExecutionOutcome, execute_call};
pub use message::{BalanceCheck, CallArgs, balance_check_mode, build_call_message};
pub use overlay_db::OverlayDb;
pub use overrides::{AccountOverride, BlockOverrides, StateOverride, apply_state_overrides};
pub use simulate::{
    BlockStateCall, CallResult, MAX_SIMULATE_BLOCKS, SimulatePayload, SimulatedBlock,
    SimulatedLog, simulate,
};
