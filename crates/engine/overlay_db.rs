use std::collections::HashMap;

use bytes::Bytes;
use ethsim_common::{
    Address, H256, U256,
    constants::EMPTY_KECCACK_HASH,
    types::{AccountState, AccountUpdate, ChainConfig, Code},
};
use ethsim_vm::{EvmError, PrecompileMap, VmDatabase};

/// A copy-on-write overlay on top of an arbitrary base state view. State
/// overrides and accumulated execution results are intercepted here; the base
/// view is never written to, so one overlay per invocation is all the
/// isolation two concurrent simulations over the same block need.
#[derive(Clone)]
pub struct OverlayDb<'a> {
    inner: &'a dyn VmDatabase,
    account_overrides: HashMap<Address, AccountOverrideState>,
    code_overrides: HashMap<H256, Code>,
    block_hash_overrides: HashMap<u64, H256>,
    precompiles: PrecompileMap,
}

#[derive(Clone, Default)]
struct AccountOverrideState {
    /// True when the account was destroyed via SELFDESTRUCT.
    /// `get_account_state` returns `None` for deleted accounts.
    deleted: bool,
    balance: Option<U256>,
    nonce: Option<u64>,
    code_hash: Option<H256>,
    /// Full storage replacement (from a `state` override).
    full_storage: Option<HashMap<H256, U256>>,
    /// Partial storage diffs (from `stateDiff` or accumulated updates).
    storage_diff: HashMap<H256, U256>,
}

impl<'a> OverlayDb<'a> {
    pub fn new(inner: &'a dyn VmDatabase) -> Self {
        Self {
            inner,
            account_overrides: HashMap::new(),
            code_overrides: HashMap::new(),
            block_hash_overrides: HashMap::new(),
            precompiles: PrecompileMap::default(),
        }
    }

    /// Override an account's balance.
    pub fn set_balance(&mut self, address: Address, balance: U256) {
        self.account_overrides.entry(address).or_default().balance = Some(balance);
    }

    /// Override an account's nonce.
    pub fn set_nonce(&mut self, address: Address, nonce: u64) {
        self.account_overrides.entry(address).or_default().nonce = Some(nonce);
    }

    /// Override an account's code.
    pub fn set_code(&mut self, address: Address, bytecode: Bytes) {
        let code = Code::from_bytecode(bytecode);
        self.account_overrides.entry(address).or_default().code_hash = Some(code.hash);
        self.code_overrides.insert(code.hash, code);
    }

    /// Full storage replacement for an account.
    pub fn set_full_storage(&mut self, address: Address, storage: HashMap<H256, U256>) {
        let entry = self.account_overrides.entry(address).or_default();
        entry.full_storage = Some(storage);
        entry.storage_diff.clear();
    }

    /// Partial storage diff for an account.
    pub fn set_storage_diff(&mut self, address: Address, diff: HashMap<H256, U256>) {
        let entry = self.account_overrides.entry(address).or_default();
        for (key, value) in diff {
            entry.storage_diff.insert(key, value);
        }
    }

    /// Relocates a precompile so that `to` executes its logic and the
    /// original address behaves like an ordinary account from now on.
    pub fn move_precompile(&mut self, from: Address, to: Address) {
        self.precompiles.relocate(from, to);
    }

    pub fn precompiles(&self) -> &PrecompileMap {
        &self.precompiles
    }

    /// Registers a simulated block hash for BLOCKHASH resolution.
    pub fn set_block_hash(&mut self, number: u64, hash: H256) {
        self.block_hash_overrides.insert(number, hash);
    }

    /// Merges state transitions from an executed call into the overlay so
    /// that subsequent calls observe them.
    pub fn merge_account_updates(&mut self, updates: &[AccountUpdate]) {
        for update in updates {
            let entry = self.account_overrides.entry(update.address).or_default();

            if update.removed {
                entry.deleted = true;
                entry.balance = Some(U256::zero());
                entry.nonce = Some(0);
                entry.code_hash = Some(EMPTY_KECCACK_HASH);
                entry.full_storage = Some(HashMap::new());
                entry.storage_diff.clear();
            }

            if let Some(info) = &update.info {
                // Account has state after this update, so it's not deleted
                // (even if it was destroyed earlier in the same execution).
                entry.deleted = false;
                entry.balance = Some(info.balance);
                entry.nonce = Some(info.nonce);
                entry.code_hash = Some(info.code_hash);
            }

            if let Some(code) = &update.code {
                self.code_overrides.insert(code.hash, code.clone());
            }

            if update.removed_storage {
                entry.full_storage = Some(HashMap::new());
                entry.storage_diff.clear();
            }

            for (key, value) in &update.added_storage {
                if let Some(full) = &mut entry.full_storage {
                    full.insert(*key, *value);
                } else {
                    entry.storage_diff.insert(*key, *value);
                }
            }
        }
    }
}

impl VmDatabase for OverlayDb<'_> {
    fn get_account_state(&self, address: Address) -> Result<Option<AccountState>, EvmError> {
        let Some(overrides) = self.account_overrides.get(&address) else {
            return self.inner.get_account_state(address);
        };

        // Account was destroyed and not recreated.
        if overrides.deleted {
            return Ok(None);
        }

        // Start from the real account or a blank one.
        let mut state = self.inner.get_account_state(address)?.unwrap_or_default();

        if let Some(balance) = overrides.balance {
            state.balance = balance;
        }
        if let Some(nonce) = overrides.nonce {
            state.nonce = nonce;
        }
        if let Some(code_hash) = overrides.code_hash {
            state.code_hash = code_hash;
        }

        Ok(Some(state))
    }

    fn get_storage_slot(&self, address: Address, key: H256) -> Result<Option<U256>, EvmError> {
        if let Some(overrides) = self.account_overrides.get(&address) {
            // Full storage replacement: only look here.
            if let Some(full) = &overrides.full_storage {
                return Ok(Some(full.get(&key).copied().unwrap_or_default()));
            }
            // Partial diff: check the diff first, then fall through.
            if let Some(value) = overrides.storage_diff.get(&key) {
                return Ok(Some(*value));
            }
        }
        self.inner.get_storage_slot(address, key)
    }

    fn get_block_hash(&self, block_number: u64) -> Result<Option<H256>, EvmError> {
        if let Some(hash) = self.block_hash_overrides.get(&block_number) {
            return Ok(Some(*hash));
        }
        self.inner.get_block_hash(block_number)
    }

    fn get_chain_config(&self) -> Result<ChainConfig, EvmError> {
        self.inner.get_chain_config()
    }

    fn get_account_code(&self, code_hash: H256) -> Result<Code, EvmError> {
        if let Some(code) = self.code_overrides.get(&code_hash) {
            return Ok(code.clone());
        }
        self.inner.get_account_code(code_hash)
    }
}
