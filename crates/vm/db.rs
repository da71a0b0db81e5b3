use ethsim_common::{
    Address, H256, U256,
    constants::{DELEGATED_CODE_LEN, DELEGATION_PREFIX, EMPTY_KECCACK_HASH},
    types::{AccountState, ChainConfig, Code},
};

use crate::errors::EvmError;

/// The narrow state-view contract the simulation engine executes against.
/// Implementations are expected to be cheap to snapshot (copy-on-write) so
/// that concurrent simulations over the same base block never observe each
/// other's writes.
pub trait VmDatabase {
    fn get_account_state(&self, address: Address) -> Result<Option<AccountState>, EvmError>;

    fn get_storage_slot(&self, address: Address, key: H256) -> Result<Option<U256>, EvmError>;

    fn get_block_hash(&self, block_number: u64) -> Result<Option<H256>, EvmError>;

    fn get_chain_config(&self) -> Result<ChainConfig, EvmError>;

    fn get_account_code(&self, code_hash: H256) -> Result<Code, EvmError>;

    /// Account state with empty-account defaults applied.
    fn account_or_default(&self, address: Address) -> Result<AccountState, EvmError> {
        Ok(self.get_account_state(address)?.unwrap_or_default())
    }

    fn get_balance(&self, address: Address) -> Result<U256, EvmError> {
        Ok(self.account_or_default(address)?.balance)
    }

    fn get_nonce(&self, address: Address) -> Result<u64, EvmError> {
        Ok(self.account_or_default(address)?.nonce)
    }

    /// The code stored at an address (not resolving delegation).
    fn code_at(&self, address: Address) -> Result<Code, EvmError> {
        let account = self.account_or_default(address)?;
        if account.code_hash == EMPTY_KECCACK_HASH {
            return Ok(Code::default());
        }
        self.get_account_code(account.code_hash)
    }

    /// The code that actually executes at an address: a delegation
    /// designator is followed (one hop) to the delegate's code, so callers
    /// observe delegated accounts transparently.
    fn effective_code_at(&self, address: Address) -> Result<(Address, Code), EvmError> {
        let code = self.code_at(address)?;
        match delegation_target(&code.bytecode) {
            Some(delegate) => Ok((delegate, self.code_at(delegate)?)),
            None => Ok((address, code)),
        }
    }
}

/// Parses an EIP-7702 delegation designator (`0xef0100 || address`),
/// returning the delegate address.
pub fn delegation_target(code: &[u8]) -> Option<Address> {
    if code.len() == DELEGATED_CODE_LEN && code.starts_with(&DELEGATION_PREFIX) {
        Some(Address::from_slice(&code[DELEGATION_PREFIX.len()..]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegation_designator_roundtrip() {
        let delegate = Address::from_low_u64_be(0xabcd);
        let mut code = DELEGATION_PREFIX.to_vec();
        code.extend_from_slice(delegate.as_bytes());
        assert_eq!(delegation_target(&code), Some(delegate));

        assert_eq!(delegation_target(&[]), None);
        assert_eq!(delegation_target(&[0xef, 0x01, 0x00]), None);
        // Wrong prefix version byte.
        code[2] = 0x01;
        assert_eq!(delegation_target(&code), None);
    }
}
