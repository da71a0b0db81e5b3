pub mod constants;
pub mod rlp;
pub mod serde_utils;
pub mod types;

pub use bytes::Bytes;
pub use ethereum_types::{Address, Bloom, BloomInput, H160, H256, U256};
