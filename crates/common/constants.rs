use ethereum_types::H256;

// === Intrinsic gas costs ===

/// Base cost of a transaction with a recipient.
pub const TX_GAS_COST: u64 = 21_000;

/// Base cost of a contract-creating transaction (21000 + 32000).
pub const TX_CREATE_GAS_COST: u64 = 53_000;

pub const TX_DATA_ZERO_GAS_COST: u64 = 4;

/// Per non-zero calldata byte since EIP-2028.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Per 32-byte word of init code (EIP-3860, Shanghai).
pub const TX_INIT_CODE_WORD_GAS_COST: u64 = 2;

pub const TX_ACCESS_LIST_ADDRESS_GAS: u64 = 2400;
pub const TX_ACCESS_LIST_STORAGE_KEY_GAS: u64 = 1900;

/// Cost charged per tuple of an EIP-7702 authorization list.
pub const PER_EMPTY_ACCOUNT_COST: u64 = 25_000;

pub const MAX_INITCODE_SIZE: u64 = 49_152;

// === EIP-1559 constants ===

pub const ELASTICITY_MULTIPLIER: u64 = 2;
pub const BASE_FEE_MAX_CHANGE_DENOMINATOR: u64 = 8;
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;

// === EIP-4844 constants ===

/// Gas consumption of a single data blob (== blob byte size).
pub const GAS_PER_BLOB: u64 = 1 << 17;

pub const MIN_BASE_FEE_PER_BLOB_GAS: u64 = 1;

// === EIP-7702 constants ===

/// Prefix marking an account's code as a delegation designator.
pub const DELEGATION_PREFIX: [u8; 3] = [0xef, 0x01, 0x00];

/// Full length of a delegation designator: prefix + address.
pub const DELEGATED_CODE_LEN: usize = 23;

/// keccak256 of empty input, the code hash of accounts without code.
pub const EMPTY_KECCACK_HASH: H256 = H256([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
]);

/// Root hash of an empty trie, used for the transaction/receipt/state roots
/// of synthesized blocks that carry no such data.
pub const EMPTY_TRIE_HASH: H256 = H256([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8, 0x6e,
    0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63, 0xb4, 0x21,
]);
