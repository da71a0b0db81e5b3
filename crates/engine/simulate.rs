//! Multi-block what-if simulation: an ordered sequence of ephemeral blocks,
//! each with its own overrides and calls, chained by synthesized parent
//! hashes and advancing one shared state overlay. Nothing is ever persisted.

use bytes::Bytes;
use ethsim_common::{
    Address, H256, U256,
    constants::EMPTY_TRIE_HASH,
    serde_utils,
    types::{
        BlockHeader, Log, Withdrawal, bloom_from_logs, calculate_base_fee_per_gas,
    },
};
use ethsim_vm::{EtherTransfer, Evm, VmDatabase};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    config::{Deadline, SimulationLimits},
    error::{EngineError, InvalidTxError},
    executor::{CallError, CallOptions, execute_message, outcome_from_report},
    message::{BalanceCheck, CallArgs, balance_check_mode, build_call_message},
    overlay_db::OverlayDb,
    overrides::{BlockOverrides, StateOverride, apply_state_overrides},
};

/// Upper bound on blocks (declared plus phantom) in one request.
pub const MAX_SIMULATE_BLOCKS: usize = 256;

const GWEI_TO_WEI: u64 = 1_000_000_000;

/// The fixed pseudo-address synthesized transfer logs are attributed to.
fn transfer_log_address() -> Address {
    Address::from([0xee_u8; 20])
}

/// ERC-20 Transfer event topic:
/// keccak256("Transfer(address,address,uint256)")
const TRANSFER_EVENT_SIGNATURE: H256 = H256([
    0xdd, 0xf2, 0x52, 0xad, 0x1b, 0xe2, 0xc8, 0x9b, 0x69, 0xc2, 0xb0, 0x68, 0xfc, 0x37, 0x8d, 0xaa,
    0x95, 0x2b, 0xa7, 0xf1, 0x63, 0xc4, 0xa1, 0x16, 0x28, 0xf5, 0x5a, 0x4d, 0xf5, 0x23, 0xb3, 0xef,
]);

// ── Request types ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatePayload {
    pub block_state_calls: Vec<BlockStateCall>,
    #[serde(default)]
    pub trace_transfers: bool,
    #[serde(default)]
    pub validation: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStateCall {
    #[serde(default)]
    pub state_overrides: Option<StateOverride>,
    #[serde(default)]
    pub block_overrides: Option<BlockOverrides>,
    #[serde(default)]
    pub calls: Vec<CallArgs>,
}

// ── Response types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedBlock {
    pub hash: H256,
    #[serde(flatten)]
    pub header: BlockHeader,
    pub calls: Vec<CallResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallResult {
    #[serde(with = "serde_utils::u64::hex_str")]
    pub status: u64,
    #[serde(with = "serde_utils::bytes")]
    pub return_data: Bytes,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub gas_used: u64,
    pub logs: Vec<SimulatedLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CallError>,
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedLog {
    pub address: Address,
    pub topics: Vec<H256>,
    #[serde(with = "serde_utils::bytes")]
    pub data: Bytes,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub log_index: u64,
    #[serde(with = "serde_utils::u64::hex_str")]
    pub block_number: u64,
    pub block_hash: H256,
}

/// Block identity classification over the simulated range. A phantom fills a
/// numbering gap purely so BLOCKHASH resolves consistently; it carries no
/// calls and uses zero gas.
enum BlockSlot {
    Phantom { number: u64 },
    Declared { index: usize, number: u64 },
}

/// Simulates the given block sequence on top of the base (header, state)
/// pair. Returns one result entry per block, phantom blocks included.
pub fn simulate(
    evm: &dyn Evm,
    db: &dyn VmDatabase,
    base_header: &BlockHeader,
    payload: &SimulatePayload,
    limits: &SimulationLimits,
) -> Result<Vec<SimulatedBlock>, EngineError> {
    let deadline = Deadline::after(limits.timeout);
    deadline.check()?;
    debug!(
        base = base_header.number,
        blocks = payload.block_state_calls.len(),
        validation = payload.validation,
        "simulating block sequence"
    );

    if payload.block_state_calls.is_empty() {
        return Err(EngineError::BadParams("empty input".to_string()));
    }
    let slots = plan_block_slots(base_header, payload)?;

    let mut overlay = OverlayDb::new(db);
    // Anchor BLOCKHASH for the base block itself.
    overlay.set_block_hash(base_header.number, base_header.compute_block_hash());

    let mut prev_header = base_header.clone();
    let mut results = Vec::with_capacity(slots.len());

    for slot in slots {
        match slot {
            BlockSlot::Phantom { number } => {
                let header = derive_child_header(&prev_header, number, payload.validation);
                let hash = header.compute_block_hash();
                trace!(number, %hash, "synthesized phantom block");
                overlay.set_block_hash(number, hash);
                results.push(SimulatedBlock {
                    hash,
                    header: header.clone(),
                    calls: Vec::new(),
                });
                prev_header = header;
            }
            BlockSlot::Declared { index, number } => {
                let block_spec = &payload.block_state_calls[index];
                let header = build_simulated_header(
                    &prev_header,
                    number,
                    block_spec.block_overrides.as_ref(),
                    payload.validation,
                )?;
                if let Some(overrides) = &block_spec.state_overrides {
                    apply_state_overrides(&mut overlay, overrides)?;
                }
                let block = simulate_block(
                    evm,
                    &mut overlay,
                    header,
                    block_spec,
                    payload,
                    limits,
                    &deadline,
                )?;
                prev_header = block.header.clone();
                results.push(block);
            }
        }
    }

    Ok(results)
}

/// Classifies every block number the request covers, failing fast on
/// non-increasing declarations before anything executes.
fn plan_block_slots(
    base_header: &BlockHeader,
    payload: &SimulatePayload,
) -> Result<Vec<BlockSlot>, EngineError> {
    if payload.block_state_calls.len() > MAX_SIMULATE_BLOCKS {
        return Err(EngineError::ClientLimit("too many blocks".to_string()));
    }

    let mut slots = Vec::new();
    let mut prev_number = base_header.number;
    for (index, block_spec) in payload.block_state_calls.iter().enumerate() {
        let number = block_spec
            .block_overrides
            .as_ref()
            .and_then(|overrides| overrides.number)
            .unwrap_or(prev_number + 1);
        if number <= prev_number {
            return Err(EngineError::BlockNumbersNotAscending {
                number,
                prev: prev_number,
            });
        }
        for phantom in prev_number + 1..number {
            slots.push(BlockSlot::Phantom { number: phantom });
        }
        slots.push(BlockSlot::Declared { index, number });
        prev_number = number;
    }
    if slots.len() > MAX_SIMULATE_BLOCKS {
        return Err(EngineError::ClientLimit("too many blocks".to_string()));
    }
    Ok(slots)
}

/// Executes one declared block's calls against the shared overlay.
fn simulate_block(
    evm: &dyn Evm,
    overlay: &mut OverlayDb<'_>,
    mut header: BlockHeader,
    block_spec: &BlockStateCall,
    payload: &SimulatePayload,
    limits: &SimulationLimits,
    deadline: &Deadline,
) -> Result<SimulatedBlock, EngineError> {
    // In validating mode the block's gas limit is a hard pool shared by its
    // calls; otherwise the pool is effectively unlimited.
    let mut gas_pool: u64 = if payload.validation {
        header.gas_limit
    } else {
        u64::MAX
    };
    let mut block_gas_used: u64 = 0;
    let mut next_log_index: u64 = 0;
    let mut call_results: Vec<CallResult> = Vec::new();
    let mut bloom_logs: Vec<Log> = Vec::new();

    for args in &block_spec.calls {
        deadline.check()?;

        let mut msg = match build_call_message(args, limits.gas_cap) {
            Ok(msg) => msg,
            Err(EngineError::InvalidTx(err)) => {
                return Err(EngineError::simulation(
                    err,
                    args.gas.unwrap_or(limits.gas_cap),
                ));
            }
            Err(other) => return Err(other),
        };
        if args.gas.is_none() {
            msg.gas_limit = msg.gas_limit.min(gas_pool);
        }
        if msg.nonce.is_none() && !payload.validation {
            // Auto-incrementing per sender: the overlay already reflects all
            // prior calls of this simulation.
            msg.nonce = Some(overlay.get_nonce(msg.from)?);
        }

        if msg.gas_limit > gas_pool {
            // Out of block gas. Earlier successes stand; this call fails.
            call_results.push(CallResult {
                status: 0,
                return_data: Bytes::new(),
                gas_used: 0,
                logs: Vec::new(),
                error: Some(CallError {
                    code: InvalidTxError::GasLimitReached.code(),
                    message: InvalidTxError::GasLimitReached.to_string(),
                    data: None,
                }),
            });
            continue;
        }

        let opts = CallOptions {
            validate: payload.validation,
            balance_check: if payload.validation {
                BalanceCheck::Full
            } else {
                balance_check_mode(args)
            },
        };
        let report = match execute_message(evm, overlay, &header, &msg, &opts) {
            Ok(report) => report,
            Err(EngineError::InvalidTx(err)) => {
                return Err(EngineError::simulation(err, msg.gas_limit));
            }
            Err(other) => return Err(other),
        };
        overlay.merge_account_updates(&report.updates);

        let outcome = outcome_from_report(&report);
        gas_pool = gas_pool.saturating_sub(outcome.gas_used);
        block_gas_used = block_gas_used.saturating_add(outcome.gas_used);

        let mut logs: Vec<SimulatedLog> = Vec::new();
        if payload.trace_transfers && outcome.is_success() {
            for transfer in &report.transfers {
                logs.push(transfer_log(transfer, header.number));
            }
        }
        for log in &outcome.logs {
            bloom_logs.push(log.clone());
            logs.push(SimulatedLog {
                address: log.address,
                topics: log.topics.clone(),
                data: log.data.clone(),
                log_index: 0,
                block_number: header.number,
                block_hash: H256::zero(),
            });
        }
        for log in &mut logs {
            log.log_index = next_log_index;
            next_log_index += 1;
        }

        call_results.push(CallResult {
            status: outcome.status,
            return_data: outcome.return_data,
            gas_used: outcome.gas_used,
            logs,
            error: outcome.error,
        });
    }

    if let Some(overrides) = &block_spec.block_overrides
        && let Some(withdrawals) = &overrides.withdrawals
    {
        process_withdrawals(overlay, withdrawals)?;
    }

    // Finalize the block: the hash is only known once gas usage and the
    // bloom are, so log entries get their block hash patched afterwards.
    header.gas_used = block_gas_used;
    header.logs_bloom = bloom_from_logs(&bloom_logs);
    let hash = header.compute_block_hash();
    overlay.set_block_hash(header.number, hash);
    for call in &mut call_results {
        for log in &mut call.logs {
            log.block_hash = hash;
        }
    }
    trace!(number = header.number, %hash, gas = block_gas_used, "finalized simulated block");

    Ok(SimulatedBlock {
        hash,
        header,
        calls: call_results,
    })
}

/// Child header with every per-block field reset. The base fee defaults
/// fresh off consensus rules for every block: zero outside validating mode,
/// the EIP-1559 derivation from the (simulated) parent inside it. An
/// override on a previous block never carries over.
fn derive_child_header(prev: &BlockHeader, number: u64, validation: bool) -> BlockHeader {
    let mut header = prev.clone();
    header.parent_hash = prev.compute_block_hash();
    header.number = number;
    header.timestamp = prev.timestamp + 1;
    header.gas_used = 0;
    header.logs_bloom = Default::default();
    header.transactions_root = EMPTY_TRIE_HASH;
    header.receipts_root = EMPTY_TRIE_HASH;
    header.base_fee_per_gas = Some(if validation {
        calculate_base_fee_per_gas(
            prev.gas_limit,
            prev.gas_used,
            prev.base_fee_per_gas.unwrap_or(0),
        )
    } else {
        0
    });
    header
}

fn build_simulated_header(
    prev: &BlockHeader,
    number: u64,
    overrides: Option<&BlockOverrides>,
    validation: bool,
) -> Result<BlockHeader, EngineError> {
    let mut header = derive_child_header(prev, number, validation);
    let Some(overrides) = overrides else {
        return Ok(header);
    };
    if let Some(time) = overrides.time {
        if time <= prev.timestamp {
            return Err(EngineError::BlockTimestampsNotAscending {
                timestamp: time,
                prev: prev.timestamp,
            });
        }
        header.timestamp = time;
    }
    if let Some(gas_limit) = overrides.gas_limit {
        header.gas_limit = gas_limit;
    }
    if let Some(fee_recipient) = overrides.fee_recipient {
        header.coinbase = fee_recipient;
    }
    if let Some(prev_randao) = overrides.prev_randao {
        header.prev_randao = prev_randao;
    }
    if let Some(base_fee) = overrides.base_fee_per_gas {
        if base_fee > U256::from(u64::MAX) {
            return Err(EngineError::BadParams(
                "baseFeePerGas overflows u64".to_string(),
            ));
        }
        header.base_fee_per_gas = Some(base_fee.as_u64());
    }
    if let Some(beacon_root) = overrides.beacon_root {
        header.parent_beacon_block_root = Some(beacon_root);
    }
    Ok(header)
}

/// Credits withdrawal amounts (gwei-denominated) straight to the targets.
fn process_withdrawals(
    overlay: &mut OverlayDb<'_>,
    withdrawals: &[Withdrawal],
) -> Result<(), EngineError> {
    for withdrawal in withdrawals.iter().filter(|w| w.amount > 0) {
        let amount = U256::from(withdrawal.amount) * U256::from(GWEI_TO_WEI);
        let balance = overlay.get_balance(withdrawal.address)?;
        overlay.set_balance(withdrawal.address, balance.saturating_add(amount));
    }
    Ok(())
}

/// Synthesizes an ERC-20-style transfer log so value flows show up through
/// the standard log-filtering interface.
fn transfer_log(transfer: &EtherTransfer, block_number: u64) -> SimulatedLog {
    let mut from_topic = [0u8; 32];
    from_topic[12..].copy_from_slice(transfer.from.as_bytes());
    let mut to_topic = [0u8; 32];
    to_topic[12..].copy_from_slice(transfer.to.as_bytes());

    SimulatedLog {
        address: transfer_log_address(),
        topics: vec![
            TRANSFER_EVENT_SIGNATURE,
            H256::from(from_topic),
            H256::from(to_topic),
        ],
        data: Bytes::from(transfer.value.to_big_endian().to_vec()),
        log_index: 0,
        block_number,
        block_hash: H256::zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethsim_common::types::ChainConfig;
    use ethsim_vm::testing::{InMemoryState, MiniEvm, Op, Program};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn topic_of(address: Address) -> H256 {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(address.as_bytes());
        H256::from(bytes)
    }

    fn base_header() -> BlockHeader {
        BlockHeader {
            number: 10,
            gas_limit: 30_000_000,
            timestamp: 1000,
            base_fee_per_gas: Some(7),
            ..Default::default()
        }
    }

    fn run(
        state: &InMemoryState,
        payload: SimulatePayload,
    ) -> Result<Vec<SimulatedBlock>, EngineError> {
        simulate(
            &MiniEvm,
            state,
            &base_header(),
            &payload,
            &SimulationLimits::default(),
        )
    }

    fn transfer_args(from: Address, to: Address, value: u64) -> CallArgs {
        CallArgs {
            from: Some(from),
            to: Some(to),
            value: Some(U256::from(value)),
            ..Default::default()
        }
    }

    fn single_block(calls: Vec<CallArgs>) -> SimulatePayload {
        SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                calls,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn rejects_empty_and_oversized_requests() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1));
        assert!(matches!(
            run(&state, SimulatePayload::default()),
            Err(EngineError::BadParams(_))
        ));

        let payload = SimulatePayload {
            block_state_calls: (0..MAX_SIMULATE_BLOCKS + 1)
                .map(|_| BlockStateCall::default())
                .collect(),
            ..Default::default()
        };
        assert!(matches!(
            run(&state, payload),
            Err(EngineError::ClientLimit(_))
        ));
    }

    #[test]
    fn block_numbers_must_strictly_increase() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1));
        let payload = SimulatePayload {
            block_state_calls: vec![
                BlockStateCall {
                    block_overrides: Some(BlockOverrides {
                        number: Some(12),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                BlockStateCall {
                    block_overrides: Some(BlockOverrides {
                        number: Some(11),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        match run(&state, payload) {
            Err(EngineError::BlockNumbersNotAscending { number, prev }) => {
                assert_eq!((number, prev), (11, 12));
            }
            other => panic!("expected ordering error, got {other:?}"),
        }
    }

    #[test]
    fn chained_transfers_build_on_each_other() {
        // Sender A is funded via override to exactly 1000; A->B then B->C
        // must both succeed in order.
        let state = InMemoryState::new(ChainConfig::all_forks_active(1));
        let overrides: StateOverride = [(
            addr(0xa),
            crate::overrides::AccountOverride {
                balance: Some(U256::from(1000)),
                ..Default::default()
            },
        )]
        .into();
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                state_overrides: Some(overrides),
                calls: vec![
                    transfer_args(addr(0xa), addr(0xb), 1000),
                    transfer_args(addr(0xb), addr(0xc), 1000),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].calls.iter().all(CallResult::is_success));
        assert_eq!(blocks[0].header.gas_used, 2 * 21_000);
    }

    #[test]
    fn reordered_transfers_fail_without_prefunding() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1));
        let overrides: StateOverride = [(
            addr(0xa),
            crate::overrides::AccountOverride {
                balance: Some(U256::from(1000)),
                ..Default::default()
            },
        )]
        .into();
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                state_overrides: Some(overrides),
                calls: vec![
                    transfer_args(addr(0xb), addr(0xc), 1000),
                    transfer_args(addr(0xa), addr(0xb), 1000),
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        match run(&state, payload) {
            Err(EngineError::Simulation { code, message, .. }) => {
                assert_eq!(code, -38014);
                assert!(message.contains("insufficient funds"));
            }
            other => panic!("expected insufficient funds, got {other:?}"),
        }
    }

    #[test]
    fn parent_hashes_chain_from_the_base_block() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(10_000_000u64), 0);
        let payload = SimulatePayload {
            block_state_calls: vec![
                BlockStateCall {
                    calls: vec![transfer_args(addr(1), addr(2), 1)],
                    ..Default::default()
                },
                BlockStateCall {
                    calls: vec![transfer_args(addr(1), addr(2), 1)],
                    ..Default::default()
                },
                BlockStateCall::default(),
            ],
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[0].header.parent_hash,
            base_header().compute_block_hash()
        );
        for window in blocks.windows(2) {
            assert_eq!(window[1].header.parent_hash, window[0].hash);
        }
        // Hashes commit to the executed content.
        assert_eq!(blocks[0].hash, blocks[0].header.compute_block_hash());
    }

    #[test]
    fn phantom_blocks_fill_gaps_and_resolve_blockhash() {
        // Blocks declared at 12 and 16 on base 10: 11 is phantom, 13..=15
        // are phantoms, and BLOCKHASH must resolve for all of them.
        let reader = Program(vec![Op::BlockHash(11), Op::BlockHash(13)]);
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(10_000_000u64), 0)
            .with_program(addr(2), &reader);
        let payload = SimulatePayload {
            block_state_calls: vec![
                BlockStateCall {
                    block_overrides: Some(BlockOverrides {
                        number: Some(12),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                BlockStateCall {
                    block_overrides: Some(BlockOverrides {
                        number: Some(16),
                        ..Default::default()
                    }),
                    calls: vec![transfer_args(addr(1), addr(2), 0)],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        let numbers: Vec<u64> = blocks.iter().map(|b| b.header.number).collect();
        assert_eq!(numbers, vec![11, 12, 13, 14, 15, 16]);

        // Phantom entries carry no calls and no gas.
        for block in &blocks {
            if block.header.number != 16 {
                assert!(block.calls.is_empty());
                assert_eq!(block.header.gas_used, 0);
            }
        }

        // The BLOCKHASH reads in block 16 observed the synthesized hashes of
        // phantom blocks 11 and 13.
        let output = &blocks[5].calls[0].return_data;
        assert_eq!(&output[..32], blocks[0].hash.as_bytes());
        assert_eq!(&output[32..64], blocks[2].hash.as_bytes());
    }

    #[test]
    fn base_fee_override_does_not_leak_into_the_next_block() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(10_000_000u64), 0);
        let payload = SimulatePayload {
            block_state_calls: vec![
                BlockStateCall {
                    block_overrides: Some(BlockOverrides {
                        base_fee_per_gas: Some(U256::from(1)),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                BlockStateCall::default(),
            ],
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        assert_eq!(blocks[0].header.base_fee_per_gas, Some(1));
        // Non-validating default is zero, regardless of the previous
        // block's override.
        assert_eq!(blocks[1].header.base_fee_per_gas, Some(0));
    }

    #[test]
    fn validation_mode_derives_the_base_fee_from_the_parent() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(u64::MAX), 0);
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall::default()],
            validation: true,
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        let expected = calculate_base_fee_per_gas(30_000_000, 0, 7);
        assert_eq!(blocks[0].header.base_fee_per_gas, Some(expected));
    }

    #[test]
    fn validation_mode_rejects_wrong_nonces() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(u64::MAX), 0);
        let mut args = transfer_args(addr(1), addr(2), 0);
        args.nonce = Some(2);
        args.gas = Some(25_000);
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                calls: vec![args],
                ..Default::default()
            }],
            validation: true,
            ..Default::default()
        };
        match run(&state, payload) {
            Err(EngineError::Simulation {
                code,
                message,
                supplied_gas,
            }) => {
                assert_eq!(code, -38011);
                assert!(message.contains("nonce too high"));
                assert_eq!(supplied_gas, 25_000);
            }
            other => panic!("expected nonce error, got {other:?}"),
        }
    }

    #[test]
    fn nonces_advance_per_sender_across_calls() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(u64::MAX), 5);
        // Explicit consecutive nonces under validation mode: each call only
        // passes the exact-match check if the previous call's nonce bump
        // carried into the working state.
        let calls: Vec<CallArgs> = (5..8)
            .map(|nonce| CallArgs {
                nonce: Some(nonce),
                gas: Some(25_000),
                max_fee_per_gas: Some(U256::from(1)),
                ..transfer_args(addr(1), addr(2), 1)
            })
            .collect();
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                block_overrides: Some(BlockOverrides {
                    base_fee_per_gas: Some(U256::from(1)),
                    ..Default::default()
                }),
                calls,
                ..Default::default()
            }],
            validation: true,
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        assert!(blocks[0].calls.iter().all(CallResult::is_success));

        // Without validation, omitted nonces auto-increment the same way.
        let payload = single_block(vec![
            transfer_args(addr(1), addr(2), 1),
            transfer_args(addr(1), addr(2), 1),
            transfer_args(addr(1), addr(2), 1),
        ]);
        let blocks = run(&state, payload).expect("simulation failed");
        assert!(blocks[0].calls.iter().all(CallResult::is_success));
    }

    #[test]
    fn transfer_trace_logs_are_indexed_with_real_logs() {
        // The called contract forwards value onward and emits its own log:
        // synthetic transfer logs and the real log share one index space.
        let topic = H256::from_low_u64_be(0xff);
        let program = Program(vec![
            Op::Call(addr(9), U256::from(40)),
            Op::Log1(topic, Bytes::new()),
            Op::Stop,
        ]);
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(10_000_000u64), 0)
            .with_account(addr(2), U256::from(0), 0)
            .with_program(addr(2), &program);
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                calls: vec![transfer_args(addr(1), addr(2), 50)],
                ..Default::default()
            }],
            trace_transfers: true,
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        let logs = &blocks[0].calls[0].logs;
        assert_eq!(logs.len(), 3);

        // Top-level transfer, internal transfer, then the contract log.
        assert_eq!(logs[0].address, transfer_log_address());
        assert_eq!(logs[0].topics[0], TRANSFER_EVENT_SIGNATURE);
        assert_eq!(logs[0].topics[1], topic_of(addr(1)));
        assert_eq!(logs[0].topics[2], topic_of(addr(2)));
        assert_eq!(logs[0].data.as_ref(), &U256::from(50).to_big_endian()[..]);
        assert_eq!(logs[1].topics[1], topic_of(addr(2)));
        assert_eq!(logs[1].topics[2], topic_of(addr(9)));
        assert_eq!(logs[2].address, addr(2));
        assert_eq!(logs[2].topics[0], topic);

        let indices: Vec<u64> = logs.iter().map(|log| log.log_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(logs.iter().all(|log| log.block_hash == blocks[0].hash));

        // Without the flag, only the real log shows up.
        let payload = single_block(vec![transfer_args(addr(1), addr(2), 50)]);
        let blocks = run(&state, payload).expect("simulation failed");
        assert_eq!(blocks[0].calls[0].logs.len(), 1);
    }

    #[test]
    fn execution_failures_do_not_abort_the_block() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(10_000_000u64), 0)
            .with_program(addr(2), &Program::single(Op::Invalid));
        let mut failing = transfer_args(addr(1), addr(2), 0);
        failing.gas = Some(50_000);
        let payload = single_block(vec![failing, transfer_args(addr(1), addr(3), 1)]);
        let blocks = run(&state, payload).expect("simulation failed");
        let calls = &blocks[0].calls;
        assert_eq!(calls[0].status, 0);
        assert!(calls[0].error.as_ref().is_some_and(|e| e.code == -32015));
        assert!(calls[1].is_success());
        assert_eq!(blocks[0].header.gas_used, 50_000 + 21_000);
    }

    #[test]
    fn exhausted_gas_pool_fails_remaining_calls_only() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1))
            .with_account(addr(1), U256::from(u64::MAX), 0);
        let mut first = transfer_args(addr(1), addr(2), 1);
        first.gas = Some(30_000);
        first.max_fee_per_gas = Some(U256::from(1));
        let mut second = transfer_args(addr(1), addr(3), 1);
        second.gas = Some(50_000);
        second.max_fee_per_gas = Some(U256::from(1));
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                block_overrides: Some(BlockOverrides {
                    gas_limit: Some(40_000),
                    base_fee_per_gas: Some(U256::from(1)),
                    ..Default::default()
                }),
                calls: vec![first, second],
                ..Default::default()
            }],
            validation: true,
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        let calls = &blocks[0].calls;
        assert!(calls[0].is_success());
        assert_eq!(calls[1].status, 0);
        assert!(
            calls[1]
                .error
                .as_ref()
                .is_some_and(|error| error.code == -38015)
        );
    }

    #[test]
    fn withdrawals_credit_balances_in_gwei() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1));
        let checker = transfer_args(addr(5), addr(6), 1_000_000_000);
        let payload = SimulatePayload {
            block_state_calls: vec![
                BlockStateCall {
                    block_overrides: Some(BlockOverrides {
                        withdrawals: Some(vec![Withdrawal {
                            index: 0,
                            validator_index: 0,
                            address: addr(5),
                            amount: 1,
                        }]),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                BlockStateCall {
                    calls: vec![checker],
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let blocks = run(&state, payload).expect("simulation failed");
        // 1 gwei withdrawal funds the 1e9 wei transfer in the next block.
        assert!(blocks[1].calls[0].is_success());
    }

    #[test]
    fn explicit_timestamps_must_increase() {
        let state = InMemoryState::new(ChainConfig::all_forks_active(1));
        let payload = SimulatePayload {
            block_state_calls: vec![BlockStateCall {
                block_overrides: Some(BlockOverrides {
                    time: Some(999),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        match run(&state, payload) {
            Err(EngineError::BlockTimestampsNotAscending { timestamp, prev }) => {
                assert_eq!((timestamp, prev), (999, 1000));
            }
            other => panic!("expected timestamp error, got {other:?}"),
        }
    }
}
