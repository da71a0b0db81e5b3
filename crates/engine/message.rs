use bytes::Bytes;
use ethsim_common::{
    Address, H256, U256, serde_utils,
    types::{AccessList, AuthorizationList, CallMessage, TxKind},
};
use serde::Deserialize;
use tracing::warn;

use crate::error::{EngineError, InvalidTxError};

/// Raw, heterogeneous call arguments as the RPC layer hands them over. The
/// builder normalizes these into one canonical [`CallMessage`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArgs {
    pub from: Option<Address>,
    pub to: Option<Address>,
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub gas: Option<u64>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub max_fee_per_blob_gas: Option<U256>,
    pub value: Option<U256>,
    #[serde(default, with = "serde_utils::bytes::opt", alias = "data")]
    pub input: Option<Bytes>,
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub nonce: Option<u64>,
    pub access_list: Option<AccessList>,
    pub blob_versioned_hashes: Option<Vec<H256>>,
    pub authorization_list: Option<AuthorizationList>,
}

/// How much of the sender's balance a pre-execution check must cover.
/// Callers that supplied no pricing field simulate for free, so only the
/// transferred value is gated; once any pricing field is set the full
/// `gas * price + value` is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceCheck {
    ValueOnly,
    Full,
}

pub fn balance_check_mode(args: &CallArgs) -> BalanceCheck {
    let has_pricing = args.gas_price.is_some()
        || args.max_fee_per_gas.is_some()
        || args.max_priority_fee_per_gas.is_some();
    if has_pricing {
        BalanceCheck::Full
    } else {
        BalanceCheck::ValueOnly
    }
}

/// Normalizes raw call arguments into a canonical message:
/// - exactly one pricing mode, defaulting to a zero gas price so simulations
///   run for free without consulting any fee oracle,
/// - an implicit gas limit of the RPC gas cap when the caller omitted `gas`,
/// - blob and authorization-list shape rules enforced up front.
pub fn build_call_message(args: &CallArgs, gas_cap: u64) -> Result<CallMessage, EngineError> {
    let (gas_price, max_priority_fee_per_gas) = resolve_fees(args)?;

    let to = match args.to {
        Some(address) => TxKind::Call(address),
        None => TxKind::Create,
    };

    let is_blob_call = args.blob_versioned_hashes.is_some() || args.max_fee_per_blob_gas.is_some();
    if is_blob_call {
        if matches!(to, TxKind::Create) {
            return Err(InvalidTxError::BlobTxCreate.into());
        }
        if args
            .blob_versioned_hashes
            .as_ref()
            .is_none_or(|hashes| hashes.is_empty())
        {
            return Err(InvalidTxError::MissingBlobHashes.into());
        }
    }

    if let Some(authorizations) = &args.authorization_list {
        if matches!(to, TxKind::Create) {
            return Err(InvalidTxError::SetCodeTxCreate.into());
        }
        if authorizations.is_empty() {
            return Err(InvalidTxError::EmptyAuthList.into());
        }
    }

    let mut gas_limit = args.gas.unwrap_or(gas_cap);
    if gas_cap != 0 && gas_limit > gas_cap {
        warn!(requested = gas_limit, cap = gas_cap, "caller gas above limit, capping");
        gas_limit = gas_cap;
    }

    Ok(CallMessage {
        from: args.from.unwrap_or_default(),
        to,
        gas_limit,
        gas_price,
        max_priority_fee_per_gas,
        value: args.value.unwrap_or_default(),
        input: args.input.clone().unwrap_or_default(),
        nonce: args.nonce,
        access_list: args.access_list.clone().unwrap_or_default(),
        blob_versioned_hashes: args.blob_versioned_hashes.clone().unwrap_or_default(),
        max_fee_per_blob_gas: args.max_fee_per_blob_gas,
        authorization_list: args.authorization_list.clone(),
    })
}

/// Resolves the pricing mode: legacy gas price XOR 1559 fee fields, neither
/// defaulting to zero.
fn resolve_fees(args: &CallArgs) -> Result<(U256, Option<U256>), EngineError> {
    match (
        args.gas_price,
        args.max_fee_per_gas,
        args.max_priority_fee_per_gas,
    ) {
        (gas_price, None, None) => Ok((gas_price.unwrap_or_default(), None)),
        (None, max_fee, max_priority) => {
            let max_fee = max_fee.unwrap_or_default();
            if let Some(priority) = max_priority
                && priority > max_fee
            {
                return Err(InvalidTxError::TipAboveFeeCap {
                    address: args.from.unwrap_or_default(),
                    max_priority_fee: priority,
                    max_fee,
                }
                .into());
            }
            Ok((max_fee, Some(max_priority.unwrap_or_default())))
        }
        (Some(_), _, _) => Err(EngineError::BadParams(
            "both gasPrice and (maxFeePerGas or maxPriorityFeePerGas) specified".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn transfer_args() -> CallArgs {
        CallArgs {
            from: Some(addr(1)),
            to: Some(addr(2)),
            value: Some(U256::from(1000)),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_to_free_execution() {
        let msg = build_call_message(&transfer_args(), 50_000_000).expect("build failed");
        assert_eq!(msg.gas_price, U256::zero());
        assert_eq!(msg.max_priority_fee_per_gas, None);
        assert_eq!(msg.gas_limit, 50_000_000);
        assert_eq!(balance_check_mode(&transfer_args()), BalanceCheck::ValueOnly);
    }

    #[test]
    fn legacy_and_1559_pricing_conflict() {
        let args = CallArgs {
            gas_price: Some(U256::from(10)),
            max_fee_per_gas: Some(U256::from(10)),
            ..transfer_args()
        };
        assert!(matches!(
            build_call_message(&args, 50_000_000),
            Err(EngineError::BadParams(_))
        ));
    }

    #[test]
    fn priority_fee_must_not_exceed_fee_cap() {
        let args = CallArgs {
            max_fee_per_gas: Some(U256::from(5)),
            max_priority_fee_per_gas: Some(U256::from(6)),
            ..transfer_args()
        };
        assert!(matches!(
            build_call_message(&args, 50_000_000),
            Err(EngineError::InvalidTx(InvalidTxError::TipAboveFeeCap { .. }))
        ));
    }

    #[test]
    fn any_pricing_field_switches_to_full_balance_check() {
        let args = CallArgs {
            max_fee_per_gas: Some(U256::from(1)),
            ..transfer_args()
        };
        assert_eq!(balance_check_mode(&args), BalanceCheck::Full);
        let msg = build_call_message(&args, 50_000_000).expect("build failed");
        assert_eq!(msg.gas_price, U256::from(1));
        assert_eq!(msg.max_priority_fee_per_gas, Some(U256::zero()));
    }

    #[test]
    fn explicit_gas_is_capped() {
        let args = CallArgs {
            gas: Some(u64::MAX),
            ..transfer_args()
        };
        let msg = build_call_message(&args, 50_000_000).expect("build failed");
        assert_eq!(msg.gas_limit, 50_000_000);
    }

    #[test]
    fn blob_calls_require_recipient_and_hashes() {
        let args = CallArgs {
            to: None,
            blob_versioned_hashes: Some(vec![H256::from_low_u64_be(1)]),
            ..transfer_args()
        };
        assert!(matches!(
            build_call_message(&args, 50_000_000),
            Err(EngineError::InvalidTx(InvalidTxError::BlobTxCreate))
        ));

        let args = CallArgs {
            max_fee_per_blob_gas: Some(U256::from(1)),
            blob_versioned_hashes: Some(vec![]),
            ..transfer_args()
        };
        assert!(matches!(
            build_call_message(&args, 50_000_000),
            Err(EngineError::InvalidTx(InvalidTxError::MissingBlobHashes))
        ));
    }

    #[test]
    fn authorization_list_shape_rules() {
        let args = CallArgs {
            authorization_list: Some(vec![]),
            ..transfer_args()
        };
        assert!(matches!(
            build_call_message(&args, 50_000_000),
            Err(EngineError::InvalidTx(InvalidTxError::EmptyAuthList))
        ));

        let args = CallArgs {
            to: None,
            authorization_list: Some(vec![Default::default()]),
            ..transfer_args()
        };
        assert!(matches!(
            build_call_message(&args, 50_000_000),
            Err(EngineError::InvalidTx(InvalidTxError::SetCodeTxCreate))
        ));
    }

    #[test]
    fn accepts_data_alias_for_input() {
        let args: CallArgs = serde_json::from_str(
            r#"{"from": "0x0000000000000000000000000000000000000001", "data": "0xdeadbeef"}"#,
        )
        .expect("deserialize failed");
        assert_eq!(args.input.as_deref(), Some(&[0xde, 0xad, 0xbe, 0xef][..]));
    }
}
