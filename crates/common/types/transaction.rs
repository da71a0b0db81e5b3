use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::{
    constants::{
        GAS_PER_BLOB, PER_EMPTY_ACCOUNT_COST, TX_ACCESS_LIST_ADDRESS_GAS,
        TX_ACCESS_LIST_STORAGE_KEY_GAS, TX_CREATE_GAS_COST, TX_DATA_NON_ZERO_GAS,
        TX_DATA_ZERO_GAS_COST, TX_GAS_COST, TX_INIT_CODE_WORD_GAS_COST,
    },
    types::Fork,
};

pub type AccessList = Vec<AccessListEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListEntry {
    pub address: Address,
    pub storage_keys: Vec<H256>,
}

pub type AuthorizationList = Vec<AuthorizationTuple>;

/// A signed grant allowing an externally-owned account to execute another
/// address's code in its context. Signature recovery is the host's concern;
/// the simulation engine treats tuples as opaque beyond shape validation.
#[derive(Debug, Clone, Default, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationTuple {
    pub chain_id: U256,
    pub address: Address,
    #[serde(with = "crate::serde_utils::u64::hex_str")]
    pub nonce: u64,
    pub y_parity: U256,
    #[serde(rename = "r")]
    pub r_signature: U256,
    #[serde(rename = "s")]
    pub s_signature: U256,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TxKind {
    Call(Address),
    #[default]
    Create,
}

impl TxKind {
    pub fn to(&self) -> Option<Address> {
        match self {
            TxKind::Call(addr) => Some(*addr),
            TxKind::Create => None,
        }
    }
}

/// A fully normalized, executable call. Produced by the message builder from
/// raw call arguments; everything downstream (executor, estimator, access
/// list builder, block simulator) consumes only this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMessage {
    pub from: Address,
    pub to: TxKind,
    pub gas_limit: u64,
    /// Unified price cap: the legacy gas price, or the 1559 max fee per gas.
    pub gas_price: U256,
    pub max_priority_fee_per_gas: Option<U256>,
    pub value: U256,
    pub input: Bytes,
    /// None means "resolve from the sender's account state".
    pub nonce: Option<u64>,
    pub access_list: AccessList,
    pub blob_versioned_hashes: Vec<H256>,
    pub max_fee_per_blob_gas: Option<U256>,
    pub authorization_list: Option<AuthorizationList>,
}

impl CallMessage {
    pub fn is_create(&self) -> bool {
        matches!(self.to, TxKind::Create)
    }

    /// Price per gas actually charged under the given base fee:
    /// min(gas_price, base_fee + priority fee) for 1559-style messages,
    /// the raw gas price otherwise.
    pub fn effective_gas_price(&self, base_fee: u64) -> U256 {
        match self.max_priority_fee_per_gas {
            Some(priority) => self
                .gas_price
                .min(U256::from(base_fee).saturating_add(priority)),
            None => self.gas_price,
        }
    }

    /// Total blob gas consumed by the message's blobs.
    pub fn blob_gas(&self) -> u64 {
        GAS_PER_BLOB * self.blob_versioned_hashes.len() as u64
    }

    /// Gas charged before a single VM step runs. This is the floor of the
    /// gas-estimation search and the minimum acceptable gas limit.
    pub fn intrinsic_gas(&self, fork: Fork) -> u64 {
        let mut gas: u64 = if self.is_create() {
            TX_CREATE_GAS_COST
        } else {
            TX_GAS_COST
        };

        let zero_bytes = self.input.iter().filter(|&&b| b == 0).count() as u64;
        let non_zero_bytes = self.input.len() as u64 - zero_bytes;
        gas = gas.saturating_add(zero_bytes * TX_DATA_ZERO_GAS_COST);
        gas = gas.saturating_add(non_zero_bytes * TX_DATA_NON_ZERO_GAS);

        if self.is_create() && fork >= Fork::Shanghai {
            let words = self.input.len().div_ceil(32) as u64;
            gas = gas.saturating_add(words * TX_INIT_CODE_WORD_GAS_COST);
        }

        let storage_keys: u64 = self
            .access_list
            .iter()
            .map(|entry| entry.storage_keys.len() as u64)
            .sum();
        gas = gas.saturating_add(self.access_list.len() as u64 * TX_ACCESS_LIST_ADDRESS_GAS);
        gas = gas.saturating_add(storage_keys * TX_ACCESS_LIST_STORAGE_KEY_GAS);

        if let Some(authorizations) = &self.authorization_list {
            gas = gas.saturating_add(authorizations.len() as u64 * PER_EMPTY_ACCOUNT_COST);
        }

        gas
    }
}
