use std::collections::HashMap;

use bytes::Bytes;
use ethsim_common::{
    Address, H256, U256, serde_utils,
    types::{BlockHeader, Withdrawal},
};
use serde::Deserialize;

use crate::{error::EngineError, overlay_db::OverlayDb};

/// Per-address state replacement, applied to a throwaway overlay before
/// execution and discarded with it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AccountOverride {
    pub balance: Option<U256>,
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub nonce: Option<u64>,
    #[serde(default, with = "serde_utils::bytes::opt")]
    pub code: Option<Bytes>,
    /// Full storage replacement, mutually exclusive with `state_diff`.
    pub state: Option<HashMap<H256, H256>>,
    /// Partial storage diff, mutually exclusive with `state`.
    pub state_diff: Option<HashMap<H256, H256>>,
    /// Moves the precompile at the overridden address to the given address,
    /// freeing the original slot for user code.
    pub move_precompile_to: Option<Address>,
}

pub type StateOverride = HashMap<Address, AccountOverride>;

/// Validates and applies a set of account overrides onto the overlay.
/// Precompile relocations happen first so that code landing on a vacated
/// precompile address behaves like ordinary contract code.
pub fn apply_state_overrides(
    overlay: &mut OverlayDb<'_>,
    overrides: &StateOverride,
) -> Result<(), EngineError> {
    for (address, account_override) in overrides {
        if account_override.state.is_some() && account_override.state_diff.is_some() {
            return Err(EngineError::BadParams(format!(
                "account {address:?} has both 'state' and 'stateDiff'"
            )));
        }
        if let Some(new_home) = account_override.move_precompile_to {
            overlay.move_precompile(*address, new_home);
        }
    }

    for (address, account_override) in overrides {
        if let Some(balance) = account_override.balance {
            overlay.set_balance(*address, balance);
        }
        if let Some(nonce) = account_override.nonce {
            overlay.set_nonce(*address, nonce);
        }
        if let Some(code) = &account_override.code {
            overlay.set_code(*address, code.clone());
        }
        if let Some(state) = &account_override.state {
            let storage: HashMap<H256, U256> = state
                .iter()
                .map(|(key, value)| (*key, U256::from_big_endian(value.as_bytes())))
                .collect();
            overlay.set_full_storage(*address, storage);
        }
        if let Some(state_diff) = &account_override.state_diff {
            let diff: HashMap<H256, U256> = state_diff
                .iter()
                .map(|(key, value)| (*key, U256::from_big_endian(value.as_bytes())))
                .collect();
            overlay.set_storage_diff(*address, diff);
        }
    }
    Ok(())
}

/// Replacement header fields. `beacon_root` and `withdrawals` are only
/// honored by the multi-block simulator; the single-call entry points reject
/// them before any execution happens.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BlockOverrides {
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub number: Option<u64>,
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub time: Option<u64>,
    #[serde(default, with = "serde_utils::u64::hex_str_opt")]
    pub gas_limit: Option<u64>,
    pub fee_recipient: Option<Address>,
    pub prev_randao: Option<H256>,
    pub base_fee_per_gas: Option<U256>,
    pub blob_base_fee: Option<U256>,
    pub beacon_root: Option<H256>,
    #[serde(default)]
    pub withdrawals: Option<Vec<Withdrawal>>,
}

impl BlockOverrides {
    /// Rejects fields not supported outside the multi-block simulator.
    pub fn validate_for_call(&self) -> Result<(), EngineError> {
        if self.beacon_root.is_some() {
            return Err(EngineError::UnsupportedBlockOverride {
                field: "beaconRoot",
            });
        }
        if self.withdrawals.is_some() {
            return Err(EngineError::UnsupportedBlockOverride {
                field: "withdrawals",
            });
        }
        Ok(())
    }

    /// Replaces header fields in place; unset fields keep the base values.
    pub fn apply(&self, header: &mut BlockHeader) -> Result<(), EngineError> {
        if let Some(number) = self.number {
            header.number = number;
        }
        if let Some(time) = self.time {
            header.timestamp = time;
        }
        if let Some(gas_limit) = self.gas_limit {
            header.gas_limit = gas_limit;
        }
        if let Some(fee_recipient) = self.fee_recipient {
            header.coinbase = fee_recipient;
        }
        if let Some(prev_randao) = self.prev_randao {
            header.prev_randao = prev_randao;
        }
        if let Some(base_fee) = self.base_fee_per_gas {
            if base_fee > U256::from(u64::MAX) {
                return Err(EngineError::BadParams(
                    "baseFeePerGas overflows u64".to_string(),
                ));
            }
            header.base_fee_per_gas = Some(base_fee.as_u64());
        }
        if let Some(beacon_root) = self.beacon_root {
            header.parent_beacon_block_root = Some(beacon_root);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsim_common::types::ChainConfig;
    use ethsim_vm::{VmDatabase, testing::InMemoryState};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn conflicting_storage_override_is_rejected() {
        let base = InMemoryState::new(ChainConfig::all_forks_active(1));
        let mut overlay = OverlayDb::new(&base);
        let overrides: StateOverride = [(
            addr(1),
            AccountOverride {
                state: Some(HashMap::new()),
                state_diff: Some(HashMap::new()),
                ..Default::default()
            },
        )]
        .into();
        match apply_state_overrides(&mut overlay, &overrides) {
            Err(EngineError::BadParams(msg)) => assert!(msg.contains("stateDiff")),
            other => panic!("expected bad params, got {other:?}"),
        }
    }

    #[test]
    fn overrides_apply_to_the_overlay() {
        let base = InMemoryState::new(ChainConfig::all_forks_active(1));
        let mut overlay = OverlayDb::new(&base);
        let overrides: StateOverride = [(
            addr(1),
            AccountOverride {
                balance: Some(U256::from(1000)),
                nonce: Some(7),
                code: Some(Bytes::from_static(&[0x00])),
                state_diff: Some([(H256::from_low_u64_be(1), H256::from_low_u64_be(9))].into()),
                ..Default::default()
            },
        )]
        .into();
        apply_state_overrides(&mut overlay, &overrides).expect("apply failed");

        let account = overlay
            .get_account_state(addr(1))
            .expect("read failed")
            .expect("account exists");
        assert_eq!(account.balance, U256::from(1000));
        assert_eq!(account.nonce, 7);
        assert_eq!(
            overlay
                .get_storage_slot(addr(1), H256::from_low_u64_be(1))
                .expect("read failed"),
            Some(U256::from(9))
        );
    }

    #[test]
    fn unsupported_override_fields_are_detected() {
        let overrides = BlockOverrides {
            beacon_root: Some(H256::zero()),
            ..Default::default()
        };
        match overrides.validate_for_call() {
            Err(EngineError::UnsupportedBlockOverride { field }) => {
                assert_eq!(field, "beaconRoot")
            }
            other => panic!("expected unsupported override, got {other:?}"),
        }

        let overrides = BlockOverrides {
            withdrawals: Some(vec![]),
            ..Default::default()
        };
        assert!(matches!(
            overrides.validate_for_call(),
            Err(EngineError::UnsupportedBlockOverride {
                field: "withdrawals"
            })
        ));
    }

    #[test]
    fn header_fields_replace_independently() {
        let mut header = BlockHeader {
            number: 10,
            timestamp: 100,
            gas_limit: 30_000_000,
            base_fee_per_gas: Some(7),
            ..Default::default()
        };
        let overrides = BlockOverrides {
            number: Some(42),
            base_fee_per_gas: Some(U256::from(1)),
            ..Default::default()
        };
        overrides.apply(&mut header).expect("apply failed");
        assert_eq!(header.number, 42);
        assert_eq!(header.base_fee_per_gas, Some(1));
        // Fields without an override keep the base values.
        assert_eq!(header.timestamp, 100);
        assert_eq!(header.gas_limit, 30_000_000);
    }

    #[test]
    fn deserializes_wire_shape() {
        let overrides: StateOverride = serde_json::from_str(
            r#"{
                "0x0000000000000000000000000000000000000002": {
                    "code": "0x00",
                    "movePrecompileTo": "0x000000000000000000000000000000000000beef"
                }
            }"#,
        )
        .expect("deserialize failed");
        let account = overrides.get(&addr(2)).expect("entry exists");
        assert_eq!(account.move_precompile_to, Some(addr(0xbeef)));
        assert_eq!(account.code.as_deref(), Some(&[0x00][..]));
    }
}
