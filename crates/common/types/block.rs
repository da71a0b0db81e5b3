use bytes::Bytes;
use ethereum_types::{Address, Bloom, BloomInput, H256, U256};
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{BASE_FEE_MAX_CHANGE_DENOMINATOR, ELASTICITY_MULTIPLIER},
    rlp::{Encoder, RLPEncode},
    serde_utils,
};

pub type BlockHash = H256;

/// Keccak of the RLP encoding of an empty ommers list, constant for every
/// post-merge header.
const EMPTY_OMMERS_HASH: H256 = H256([
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4, 0x1a,
    0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4, 0x93, 0x47,
]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub parent_hash: H256,
    #[serde(rename = "sha3Uncles")]
    pub ommers_hash: H256,
    #[serde(rename = "miner")]
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub number: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub gas_limit: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub gas_used: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub timestamp: u64,
    #[serde(with = "serde_utils::bytes")]
    pub extra_data: Bytes,
    #[serde(rename = "mixHash")]
    pub prev_randao: H256,
    pub nonce: H256,
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub base_fee_per_gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<H256>,
    #[serde(
        default,
        with = "serde_utils::u64::hex_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub blob_gas_used: Option<u64>,
    #[serde(
        default,
        with = "serde_utils::u64::hex_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub excess_blob_gas: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<H256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_hash: Option<H256>,
}

impl Default for BlockHeader {
    fn default() -> Self {
        Self {
            parent_hash: H256::zero(),
            ommers_hash: EMPTY_OMMERS_HASH,
            coinbase: Address::zero(),
            state_root: H256::zero(),
            transactions_root: H256::zero(),
            receipts_root: H256::zero(),
            logs_bloom: Bloom::zero(),
            difficulty: U256::zero(),
            number: 0,
            gas_limit: 0,
            gas_used: 0,
            timestamp: 0,
            extra_data: Bytes::new(),
            prev_randao: H256::zero(),
            nonce: H256::zero(),
            base_fee_per_gas: None,
            withdrawals_root: None,
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
            requests_hash: None,
        }
    }
}

impl RLPEncode for BlockHeader {
    fn encode(&self, buf: &mut dyn bytes::BufMut) {
        // Post-London optional fields are encoded in activation order; a
        // later field must not appear without the earlier ones.
        let nonce: [u8; 8] = {
            let mut fixed = [0u8; 8];
            fixed.copy_from_slice(&self.nonce.as_bytes()[24..]);
            fixed
        };
        Encoder::new(buf)
            .encode_field(&self.parent_hash)
            .encode_field(&self.ommers_hash)
            .encode_field(&self.coinbase)
            .encode_field(&self.state_root)
            .encode_field(&self.transactions_root)
            .encode_field(&self.receipts_root)
            .encode_field(&self.logs_bloom.0)
            .encode_field(&self.difficulty)
            .encode_field(&self.number)
            .encode_field(&self.gas_limit)
            .encode_field(&self.gas_used)
            .encode_field(&self.timestamp)
            .encode_field(&self.extra_data)
            .encode_field(&self.prev_randao)
            .encode_field(&nonce)
            .encode_optional_field(&self.base_fee_per_gas)
            .encode_optional_field(&self.withdrawals_root)
            .encode_optional_field(&self.blob_gas_used)
            .encode_optional_field(&self.excess_blob_gas)
            .encode_optional_field(&self.parent_beacon_block_root)
            .encode_optional_field(&self.requests_hash)
            .finish();
    }
}

impl BlockHeader {
    /// Hash of the RLP-encoded header. Simulated block identities and
    /// parent-hash chaining are built on this being deterministic.
    pub fn compute_block_hash(&self) -> BlockHash {
        keccak(self.encode_to_vec())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    #[serde(with = "serde_utils::u64::hex_str")]
    pub index: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub validator_index: u64,
    pub address: Address,
    /// Amount in gwei.
    #[serde(with = "serde_utils::u64::hex_str")]
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "serde_utils::bytes")]
    pub data: Bytes,
}

pub fn bloom_from_logs(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::zero();
    for log in logs {
        bloom.accrue(BloomInput::Raw(log.address.as_bytes()));
        for topic in &log.topics {
            bloom.accrue(BloomInput::Raw(topic.as_bytes()));
        }
    }
    bloom
}

/// EIP-1559 base fee for the child of the given parent block values.
pub fn calculate_base_fee_per_gas(
    parent_gas_limit: u64,
    parent_gas_used: u64,
    parent_base_fee: u64,
) -> u64 {
    let gas_target = parent_gas_limit / ELASTICITY_MULTIPLIER;
    if gas_target == 0 {
        return parent_base_fee;
    }
    match parent_gas_used.cmp(&gas_target) {
        std::cmp::Ordering::Equal => parent_base_fee,
        std::cmp::Ordering::Greater => {
            let delta = parent_gas_used - gas_target;
            let fee_delta = (parent_base_fee as u128 * delta as u128
                / gas_target as u128
                / BASE_FEE_MAX_CHANGE_DENOMINATOR as u128)
                .max(1) as u64;
            parent_base_fee.saturating_add(fee_delta)
        }
        std::cmp::Ordering::Less => {
            let delta = gas_target - parent_gas_used;
            let fee_delta = (parent_base_fee as u128 * delta as u128
                / gas_target as u128
                / BASE_FEE_MAX_CHANGE_DENOMINATOR as u128) as u64;
            parent_base_fee.saturating_sub(fee_delta)
        }
    }
}
