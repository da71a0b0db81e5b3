use std::time::{Duration, Instant};

use crate::error::EngineError;

/// Default gas cap applied to messages that do not declare a gas limit.
pub const DEFAULT_RPC_GAS_CAP: u64 = 50_000_000;

/// Default wall-clock budget for one engine invocation.
pub const DEFAULT_RPC_EVM_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-invocation resource caps. Passed explicitly so concurrent invocations
/// never share ambient configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationLimits {
    pub gas_cap: u64,
    pub timeout: Duration,
}

impl Default for SimulationLimits {
    fn default() -> Self {
        Self {
            gas_cap: DEFAULT_RPC_GAS_CAP,
            timeout: DEFAULT_RPC_EVM_TIMEOUT,
        }
    }
}

/// Cooperative cancellation token, checked between call executions. An
/// expired deadline aborts with a timeout error rather than a partial result.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
            budget,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            expires_at: None,
            budget: Duration::MAX,
        }
    }

    pub fn expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }

    pub fn check(&self) -> Result<(), EngineError> {
        if self.expired() {
            return Err(EngineError::Timeout(self.budget));
        }
        Ok(())
    }
}
