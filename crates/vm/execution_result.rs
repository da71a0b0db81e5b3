use bytes::Bytes;
use ethsim_common::types::Log;

#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Success {
        gas_used: u64,
        gas_refunded: u64,
        logs: Vec<Log>,
        output: Bytes,
    },
    /// Reverted by `REVERT`: remaining gas is returned, output carries the
    /// (possibly ABI-encoded) revert reason.
    Revert { gas_used: u64, output: Bytes },
    /// Aborted for other reasons (invalid opcode, stack errors, out of gas).
    /// Halting spends the entire gas limit.
    Halt { reason: String, gas_used: u64 },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn gas_used(&self) -> u64 {
        match self {
            ExecutionResult::Success { gas_used, .. } => *gas_used,
            ExecutionResult::Revert { gas_used, .. } => *gas_used,
            ExecutionResult::Halt { gas_used, .. } => *gas_used,
        }
    }

    pub fn logs(&self) -> Vec<Log> {
        match self {
            ExecutionResult::Success { logs, .. } => logs.clone(),
            _ => vec![],
        }
    }

    pub fn output(&self) -> Bytes {
        match self {
            ExecutionResult::Success { output, .. } => output.clone(),
            ExecutionResult::Revert { output, .. } => output.clone(),
            ExecutionResult::Halt { .. } => Bytes::new(),
        }
    }
}
