use std::collections::{BTreeMap, BTreeSet};

use ethsim_common::{
    Address, H256, U256,
    types::{AccountUpdate, BlockHeader, CallMessage},
};

use crate::{VmDatabase, errors::EvmError, execution_result::ExecutionResult, precompiles::PrecompileMap};

/// Block-level context a message executes under.
pub struct EvmContext<'a> {
    pub header: &'a BlockHeader,
    pub precompiles: &'a PrecompileMap,
}

/// A non-zero value movement observed during execution, either the message's
/// own transfer or one performed by executed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtherTransfer {
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

/// Everything the engine needs back from one execution: the outcome itself,
/// the touched-state side channels (access-list construction, transfer
/// tracing), and the state transitions to carry into subsequent calls.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    pub accessed_addresses: BTreeSet<Address>,
    pub accessed_storage: BTreeMap<Address, BTreeSet<H256>>,
    pub transfers: Vec<EtherTransfer>,
    pub updates: Vec<AccountUpdate>,
}

impl ExecutionReport {
    pub fn accessed_slots(&self, address: &Address) -> Option<&BTreeSet<H256>> {
        self.accessed_storage.get(address)
    }
}

/// The virtual-machine contract consumed by the simulation engine. One call
/// per message; side effects are reported as `AccountUpdate`s rather than
/// written anywhere, so the caller decides what carries forward.
pub trait Evm {
    fn execute(
        &self,
        msg: &CallMessage,
        ctx: &EvmContext<'_>,
        db: &dyn VmDatabase,
    ) -> Result<ExecutionReport, EvmError>;
}
