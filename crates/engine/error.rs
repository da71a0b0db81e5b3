use std::time::Duration;

use bytes::Bytes;
use ethsim_common::{Address, H256, U256};
use ethsim_vm::EvmError;
use thiserror::Error;

/// Fatal pre-execution validation failures. These carry the violating
/// address/value for diagnostics and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTxError {
    #[error("insufficient funds for gas * price + value: address {address:?} have {have} want {want}")]
    InsufficientFunds {
        address: Address,
        have: U256,
        want: U256,
    },
    #[error("nonce too low: address {address:?}, tx: {tx}, state: {state}")]
    NonceTooLow { address: Address, tx: u64, state: u64 },
    #[error("nonce too high: address {address:?}, tx: {tx}, state: {state}")]
    NonceTooHigh { address: Address, tx: u64, state: u64 },
    #[error("max fee per gas less than block base fee: address {address:?}, maxFeePerGas: {max_fee}, baseFee: {base_fee}")]
    FeeCapTooLow {
        address: Address,
        max_fee: U256,
        base_fee: u64,
    },
    #[error("max priority fee per gas higher than max fee per gas: address {address:?}, maxPriorityFeePerGas: {max_priority_fee}, maxFeePerGas: {max_fee}")]
    TipAboveFeeCap {
        address: Address,
        max_priority_fee: U256,
        max_fee: U256,
    },
    #[error("intrinsic gas too low: have {have}, want {want}")]
    IntrinsicGasTooLow { have: u64, want: u64 },
    #[error("exceeds block gas limit")]
    GasLimitReached,
    #[error("sender not an EOA: address {address:?}, codehash: {code_hash:?}")]
    SenderNoEOA { address: Address, code_hash: H256 },
    #[error("set code transaction must not be a create transaction")]
    SetCodeTxCreate,
    #[error("empty authorization list")]
    EmptyAuthList,
    #[error("blob transaction must not be a create transaction")]
    BlobTxCreate,
    #[error("blob transaction missing blob hashes")]
    MissingBlobHashes,
}

impl InvalidTxError {
    pub fn code(&self) -> i64 {
        match self {
            InvalidTxError::NonceTooLow { .. } => -38010,
            InvalidTxError::NonceTooHigh { .. } => -38011,
            InvalidTxError::FeeCapTooLow { .. } | InvalidTxError::TipAboveFeeCap { .. } => -38012,
            InvalidTxError::IntrinsicGasTooLow { .. } => -38013,
            InvalidTxError::InsufficientFunds { .. } => -38014,
            InvalidTxError::GasLimitReached => -38015,
            InvalidTxError::SenderNoEOA { .. } => -38024,
            InvalidTxError::SetCodeTxCreate
            | InvalidTxError::EmptyAuthList
            | InvalidTxError::BlobTxCreate
            | InvalidTxError::MissingBlobHashes => -32602,
        }
    }
}

/// An execution that reverted, with the raw output and, when the output
/// follows the standard `Error(string)` encoding, the decoded reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", revert_message(.reason))]
pub struct RevertError {
    pub output: Bytes,
    pub reason: Option<String>,
}

fn revert_message(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!("execution reverted: {reason}"),
        None => "execution reverted".to_string(),
    }
}

impl RevertError {
    pub fn new(output: Bytes) -> Self {
        let reason = decode_revert_reason(&output);
        Self { output, reason }
    }

    /// Hex encoding of the raw revert data, as carried in the RPC error.
    pub fn data(&self) -> String {
        format!("0x{}", hex::encode(&self.output))
    }
}

/// Selector of `Error(string)`, the standard revert-reason encoding.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Decodes the revert reason from output following the `Error(string)` ABI
/// encoding: selector, string offset, string length, string bytes.
pub fn decode_revert_reason(output: &[u8]) -> Option<String> {
    let payload = output.strip_prefix(&ERROR_STRING_SELECTOR[..])?;
    if payload.len() < 64 {
        return None;
    }
    let offset = U256::from_big_endian(&payload[..32]).low_u64() as usize;
    let length_bytes = payload.get(offset..offset + 32)?;
    let length = U256::from_big_endian(length_bytes).low_u64() as usize;
    let string_bytes = payload.get(offset + 32..offset + 32 + length)?;
    String::from_utf8(string_bytes.to_vec()).ok()
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    BadParams(String),
    #[error("block override \"{field}\" is not supported for this RPC method")]
    UnsupportedBlockOverride { field: &'static str },
    #[error("block numbers must be in order: {number} <= {prev}")]
    BlockNumbersNotAscending { number: u64, prev: u64 },
    #[error("block timestamps must be in order: {timestamp} <= {prev}")]
    BlockTimestampsNotAscending { timestamp: u64, prev: u64 },
    #[error(transparent)]
    InvalidTx(#[from] InvalidTxError),
    #[error(transparent)]
    Revert(#[from] RevertError),
    #[error("gas required exceeds allowance ({cap})")]
    GasCapExceeded { cap: u64 },
    #[error("execution aborted (timeout = {0:?})")]
    Timeout(Duration),
    #[error("client limit exceeded: {0}")]
    ClientLimit(String),
    /// Typed per-call failure surfaced by the multi-block simulator, carrying
    /// the original validation code plus the gas context of the failing call.
    #[error("err: {message} (supplied gas {supplied_gas})")]
    Simulation {
        code: i64,
        message: String,
        supplied_gas: u64,
    },
    #[error(transparent)]
    Evm(#[from] EvmError),
}

impl EngineError {
    pub fn code(&self) -> i64 {
        match self {
            EngineError::BadParams(_) | EngineError::UnsupportedBlockOverride { .. } => -32602,
            EngineError::BlockNumbersNotAscending { .. } => -38020,
            EngineError::BlockTimestampsNotAscending { .. } => -38021,
            EngineError::InvalidTx(err) => err.code(),
            EngineError::Revert(_) => 3,
            EngineError::GasCapExceeded { .. } => -32000,
            EngineError::Timeout(_) | EngineError::ClientLimit(_) => -38026,
            EngineError::Simulation { code, .. } => *code,
            EngineError::Evm(_) => -32603,
        }
    }

    /// Wraps a fatal per-call error the way the simulator reports it.
    pub(crate) fn simulation(err: InvalidTxError, supplied_gas: u64) -> Self {
        EngineError::Simulation {
            code: err.code(),
            message: err.to_string(),
            supplied_gas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_error_string(reason: &str) -> Vec<u8> {
        let mut out = ERROR_STRING_SELECTOR.to_vec();
        out.extend_from_slice(&U256::from(32).to_big_endian());
        out.extend_from_slice(&U256::from(reason.len()).to_big_endian());
        let mut padded = reason.as_bytes().to_vec();
        padded.resize(reason.len().div_ceil(32) * 32, 0);
        out.extend_from_slice(&padded);
        out
    }

    #[test]
    fn decodes_standard_error_string() {
        let output = encode_error_string("user error");
        assert_eq!(decode_revert_reason(&output).as_deref(), Some("user error"));
    }

    #[test]
    fn rejects_non_standard_output() {
        assert_eq!(decode_revert_reason(b"raw revert"), None);
        assert_eq!(decode_revert_reason(&[]), None);
        // Selector present but payload truncated.
        assert_eq!(decode_revert_reason(&ERROR_STRING_SELECTOR), None);
    }

    #[test]
    fn revert_error_renders_reason() {
        let err = RevertError::new(Bytes::from(encode_error_string("nope")));
        assert_eq!(err.to_string(), "execution reverted: nope");
        let opaque = RevertError::new(Bytes::from_static(b"\x01\x02"));
        assert_eq!(opaque.to_string(), "execution reverted");
        assert_eq!(opaque.data(), "0x0102");
    }

    #[test]
    fn error_codes_follow_the_rpc_table() {
        let insufficient = InvalidTxError::InsufficientFunds {
            address: Address::zero(),
            have: U256::zero(),
            want: U256::from(1000),
        };
        assert_eq!(insufficient.code(), -38014);
        assert_eq!(EngineError::InvalidTx(insufficient).code(), -38014);
        assert_eq!(
            EngineError::BlockNumbersNotAscending { number: 11, prev: 12 }.code(),
            -38020
        );
        assert_eq!(EngineError::Timeout(Duration::from_secs(5)).code(), -38026);
    }
}
