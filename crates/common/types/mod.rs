mod account;
mod block;
mod chain_config;
mod transaction;

pub use account::{AccountInfo, AccountState, AccountUpdate, Code};
pub use block::{
    BlockHash, BlockHeader, Log, Withdrawal, bloom_from_logs, calculate_base_fee_per_gas,
};
pub use chain_config::{ChainConfig, Fork};
pub use transaction::{
    AccessList, AccessListEntry, AuthorizationList, AuthorizationTuple, CallMessage, TxKind,
};
