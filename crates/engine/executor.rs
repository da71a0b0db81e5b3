use bytes::Bytes;
use ethsim_common::{
    U256,
    types::{BlockHeader, CallMessage, ChainConfig, Log},
};
use ethsim_vm::{Evm, EvmContext, ExecutionReport, ExecutionResult, VmDatabase, delegation_target};
use serde::Serialize;
use tracing::debug;

use crate::{
    config::{Deadline, SimulationLimits},
    error::{EngineError, InvalidTxError, RevertError},
    message::{BalanceCheck, CallArgs, balance_check_mode, build_call_message},
    overlay_db::OverlayDb,
    overrides::{BlockOverrides, StateOverride, apply_state_overrides},
};

/// RPC error code for execution-time VM failures other than revert.
pub(crate) const VM_ERROR_CODE: i64 = -32015;

/// RPC error code for reverted executions.
pub(crate) const REVERT_ERROR_CODE: i64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    /// Apply the nonce/sender/fee checks a block producer would.
    pub validate: bool,
    pub balance_check: BalanceCheck,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            validate: false,
            balance_check: BalanceCheck::ValueOnly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Structured result of one executed call: success/failure classification,
/// return data, gas charged, and emitted logs. Execution-time failures land
/// here as a failed status with a descriptive [`CallError`], they are not
/// engine errors — estimation and multi-block simulation keep going.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// 1 on success, 0 on failure.
    pub status: u64,
    pub return_data: Bytes,
    pub gas_used: u64,
    pub logs: Vec<Log>,
    pub error: Option<CallError>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

/// Executes one call against derived (header, state) context: the single-call
/// entry point.
pub fn execute_call(
    evm: &dyn Evm,
    db: &dyn VmDatabase,
    base_header: &BlockHeader,
    args: &CallArgs,
    state_override: Option<&StateOverride>,
    block_overrides: Option<&BlockOverrides>,
    limits: &SimulationLimits,
) -> Result<ExecutionOutcome, EngineError> {
    let deadline = Deadline::after(limits.timeout);
    deadline.check()?;
    debug!(block = base_header.number, "executing call");

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
    let report = execute_message(evm, &overlay, &header, &msg, &opts)?;
    Ok(outcome_from_report(&report))
}

/// Runs one canonical message through pre-validation and the VM. Side effects
/// stay inside the report; the overlay is only read.
pub(crate) fn execute_message(
    evm: &dyn Evm,
    overlay: &OverlayDb<'_>,
    header: &BlockHeader,
    msg: &CallMessage,
    opts: &CallOptions,
) -> Result<ExecutionReport, EngineError> {
    let config = overlay.get_chain_config()?;
    validate_message(overlay, header, msg, opts, &config)?;
    let ctx = EvmContext {
        header,
        precompiles: overlay.precompiles(),
    };
    Ok(evm.execute(msg, &ctx, overlay)?)
}

/// The fatal-error side of the failure taxonomy, checked before execution.
fn validate_message(
    overlay: &OverlayDb<'_>,
    header: &BlockHeader,
    msg: &CallMessage,
    opts: &CallOptions,
    config: &ChainConfig,
) -> Result<(), EngineError> {
    let fork = config.fork(header.timestamp);

    if !msg.blob_versioned_hashes.is_empty() {
        if !config.supports_blobs(header.timestamp) {
            return Err(EngineError::BadParams(
                "blob transactions are not supported before the Cancun fork".to_string(),
            ));
        }
        if msg.is_create() {
            return Err(InvalidTxError::BlobTxCreate.into());
        }
    }

    if let Some(authorizations) = &msg.authorization_list {
        if !config.supports_delegations(header.timestamp) {
            return Err(EngineError::BadParams(
                "authorization lists are not supported before the Prague fork".to_string(),
            ));
        }
        if msg.is_create() {
            return Err(InvalidTxError::SetCodeTxCreate.into());
        }
        if authorizations.is_empty() {
            return Err(InvalidTxError::EmptyAuthList.into());
        }
    }

    let account = overlay.account_or_default(msg.from)?;

    if opts.validate {
        // Only externally-owned accounts (or delegated ones) originate.
        let code = overlay.code_at(msg.from)?;
        if !code.is_empty() && delegation_target(&code.bytecode).is_none() {
            return Err(InvalidTxError::SenderNoEOA {
                address: msg.from,
                code_hash: code.hash,
            }
            .into());
        }

        if let Some(tx_nonce) = msg.nonce {
            if tx_nonce < account.nonce {
                return Err(InvalidTxError::NonceTooLow {
                    address: msg.from,
                    tx: tx_nonce,
                    state: account.nonce,
                }
                .into());
            }
            if tx_nonce > account.nonce {
                return Err(InvalidTxError::NonceTooHigh {
                    address: msg.from,
                    tx: tx_nonce,
                    state: account.nonce,
                }
                .into());
            }
        }

        if let Some(base_fee) = header.base_fee_per_gas
            && base_fee > 0
            && msg.gas_price < U256::from(base_fee)
        {
            return Err(InvalidTxError::FeeCapTooLow {
                address: msg.from,
                max_fee: msg.gas_price,
                base_fee,
            }
            .into());
        }
    }

    let want = match opts.balance_check {
        BalanceCheck::ValueOnly => msg.value,
        BalanceCheck::Full => {
            let mut want = msg
                .gas_price
                .saturating_mul(U256::from(msg.gas_limit))
                .saturating_add(msg.value);
            if let Some(blob_fee_cap) = msg.max_fee_per_blob_gas {
                want = want.saturating_add(blob_fee_cap.saturating_mul(U256::from(msg.blob_gas())));
            }
            want
        }
    };
    if account.balance < want {
        return Err(InvalidTxError::InsufficientFunds {
            address: msg.from,
            have: account.balance,
            want,
        }
        .into());
    }

    let intrinsic = msg.intrinsic_gas(fork);
    if msg.gas_limit < intrinsic {
        return Err(InvalidTxError::IntrinsicGasTooLow {
            have: msg.gas_limit,
            want: intrinsic,
        }
        .into());
    }

    Ok(())
}

/// Classifies a VM result into the structured per-call outcome.
pub(crate) fn outcome_from_report(report: &ExecutionReport) -> ExecutionOutcome {
    match &report.result {
        ExecutionResult::Success {
            gas_used,
            logs,
            output,
            ..
        } => ExecutionOutcome {
            status: 1,
            return_data: output.clone(),
            gas_used: *gas_used,
            logs: logs.clone(),
            error: None,
        },
        ExecutionResult::Revert { gas_used, output } => {
            let revert = RevertError::new(output.clone());
            ExecutionOutcome {
                status: 0,
                return_data: output.clone(),
                gas_used: *gas_used,
                logs: Vec::new(),
                error: Some(CallError {
                    code: REVERT_ERROR_CODE,
                    message: revert.to_string(),
                    data: Some(revert.data()),
                }),
            }
        }
        ExecutionResult::Halt { reason, gas_used } => ExecutionOutcome {
            status: 0,
            return_data: Bytes::new(),
            gas_used: *gas_used,
            logs: Vec::new(),
            error: Some(CallError {
                code: VM_ERROR_CODE,
                message: reason.clone(),
                data: None,
            }),
        },
    }
}
