use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

use crate::constants::EMPTY_KECCACK_HASH;

/// Contract bytecode together with its hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub hash: H256,
    pub bytecode: Bytes,
}

impl Code {
    pub fn from_bytecode(bytecode: Bytes) -> Self {
        let hash = keccak(&bytecode);
        Self { hash, bytecode }
    }

    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: H256,
}

impl Default for AccountInfo {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            code_hash: EMPTY_KECCACK_HASH,
        }
    }
}

impl AccountInfo {
    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_KECCACK_HASH
    }
}

/// Snapshot of an account as read through a state view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub code_hash: H256,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            code_hash: EMPTY_KECCACK_HASH,
        }
    }
}

impl From<AccountState> for AccountInfo {
    fn from(state: AccountState) -> Self {
        Self {
            nonce: state.nonce,
            balance: state.balance,
            code_hash: state.code_hash,
        }
    }
}

/// State transition produced for one account by executing a message.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountUpdate {
    pub address: Address,
    pub removed: bool,
    pub info: Option<AccountInfo>,
    pub code: Option<Code>,
    pub added_storage: HashMap<H256, U256>,
    /// Account was destroyed and then recreated within the same execution:
    /// its storage must be cleared without removing the whole account.
    pub removed_storage: bool,
}

impl AccountUpdate {
    /// Creates new empty update for the given account
    pub fn new(address: Address) -> AccountUpdate {
        AccountUpdate {
            address,
            ..Default::default()
        }
    }

    /// Creates new update representing an account removal
    pub fn removed(address: Address) -> AccountUpdate {
        AccountUpdate {
            address,
            removed: true,
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: AccountUpdate) {
        self.removed = other.removed;
        self.removed_storage |= other.removed_storage;
        if let Some(info) = other.info {
            self.info = Some(info);
        }
        if let Some(code) = other.code {
            self.code = Some(code);
        }
        for (key, value) in other.added_storage {
            self.added_storage.insert(key, value);
        }
    }
}
