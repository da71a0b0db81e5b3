//! Binary-search gas estimation. Probes never commit state, so every probe
//! observes the same overlay and the search is a pure function of the base
//! state and the message.

use ethsim_common::{U256, types::BlockHeader};
use ethsim_vm::{Evm, ExecutionResult, VmDatabase};
use tracing::debug;

use crate::{
    config::{Deadline, SimulationLimits},
    error::{EngineError, RevertError},
    executor::{CallOptions, execute_message},
    message::{CallArgs, balance_check_mode, build_call_message},
    overlay_db::OverlayDb,
    overrides::{BlockOverrides, StateOverride, apply_state_overrides},
};

/// The search stops once the remaining window is within this ratio of the
/// upper bound; real gas costs are noisy enough that exact-byte precision
/// buys nothing.
pub const ESTIMATE_GAS_ERROR_RATIO: f64 = 0.015;

/// Finds the lowest gas limit at which the call succeeds, within
/// [`ESTIMATE_GAS_ERROR_RATIO`].
pub fn estimate_gas(
    evm: &dyn Evm,
    db: &dyn VmDatabase,
    base_header: &BlockHeader,
    args: &CallArgs,
    state_override: Option<&StateOverride>,
    block_overrides: Option<&BlockOverrides>,
    limits: &SimulationLimits,
) -> Result<u64, EngineError> {
    let deadline = Deadline::after(limits.timeout);
    deadline.check()?;
    debug!(block = base_header.number, "estimating gas");

    let mut header = base_header.clone();
    if let Some(overrides) = block_overrides {
        overrides.validate_for_call()?;
        overrides.apply(&mut header)?;
    }

    let mut overlay = OverlayDb::new(db);
    if let Some(overrides) = state_override {
        apply_state_overrides(&mut overlay, overrides)?;
    }

    let msg = build_call_message(args, limits.gas_cap)?;
    let opts = CallOptions {
        validate: false,
        balance_check: balance_check_mode(args),
    };

    let config = overlay.get_chain_config()?;
    let intrinsic = msg.intrinsic_gas(config.fork(header.timestamp));

    // Upper bound: the caller's explicit limit or the RPC cap, further capped
    // by what the sender can actually afford at the given price. Blob gas is
    // priced separately and does not gate the search.
    let mut hi = msg.gas_limit;
    if !msg.gas_price.is_zero() {
        let balance = overlay.get_balance(msg.from)?;
        let mut available = balance;
        if msg.value > available {
            return Err(crate::error::InvalidTxError::InsufficientFunds {
                address: msg.from,
                have: balance,
                want: msg.value,
            }
            .into());
        }
        available -= msg.value;
        if let Some(blob_fee_cap) = msg.max_fee_per_blob_gas {
            let blob_cost = blob_fee_cap.saturating_mul(U256::from(msg.blob_gas()));
            available = available.saturating_sub(blob_cost);
        }
        let allowance = available / msg.gas_price;
        if allowance < U256::from(hi) {
            hi = allowance.low_u64();
        }
    }
    if hi < intrinsic {
        return Err(EngineError::GasCapExceeded { cap: hi });
    }
    let cap = hi;

    // The call must succeed at the cap at all; a capped failure is reported
    // as-is (revert with reason, insufficient funds, out of allowance) and
    // never narrowed further.
    let probe = |gas: u64| -> Result<ExecutionResult, EngineError> {
        let mut probe_msg = msg.clone();
        probe_msg.gas_limit = gas;
        let report = execute_message(evm, &overlay, &header, &probe_msg, &opts)?;
        Ok(report.result)
    };

    let mut lo = intrinsic - 1;
    match probe(hi)? {
        ExecutionResult::Success { gas_used, .. } => {
            // Tighten fast: most calls succeed right at their measured cost.
            if gas_used < hi {
                deadline.check()?;
                match probe(gas_used)? {
                    ExecutionResult::Success { .. } => hi = gas_used,
                    _ => lo = gas_used,
                }
            }
        }
        ExecutionResult::Revert { output, .. } => {
            return Err(RevertError::new(output).into());
        }
        ExecutionResult::Halt { .. } => {
            return Err(EngineError::GasCapExceeded { cap });
        }
    }

    while lo + 1 < hi {
        if ((hi - lo) as f64) < hi as f64 * ESTIMATE_GAS_ERROR_RATIO {
            break;
        }
        deadline.check()?;
        let mid = lo + (hi - lo) / 2;
        match probe(mid)? {
            ExecutionResult::Success { .. } => hi = mid,
            _ => lo = mid,
        }
    }

    debug!(estimate = hi, cap, "gas estimation converged");
    Ok(hi)
}
