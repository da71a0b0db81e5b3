//! Deterministic in-memory backends for exercising the simulation engine
//! without a full EVM: an `InMemoryState` state view and `MiniEvm`, a tiny
//! interpreter over immediate-operand opcodes. Gas follows the mainline cost
//! schedule for the modeled subset (intrinsic costs, EIP-2929 warm/cold
//! accesses, logs, value calls), which is what makes gas-estimation and
//! access-list behavior observable in tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bytes::{BufMut, Bytes};
use ethsim_common::{
    Address, H256, U256,
    constants::EMPTY_KECCACK_HASH,
    rlp::Encoder,
    types::{AccountInfo, AccountState, AccountUpdate, CallMessage, ChainConfig, Code, TxKind},
};
use keccak_hash::keccak;
use sha2::{Digest, Sha256};

use crate::{
    EtherTransfer, Evm, EvmContext, EvmError, ExecutionReport, ExecutionResult, VmDatabase,
};

// Cost schedule for the modeled op subset.
const GAS_QUICK_STEP: u64 = 2;
const GAS_COLD_SLOAD: u64 = 2100;
const GAS_WARM_ACCESS: u64 = 100;
const GAS_COLD_ACCOUNT_ACCESS: u64 = 2600;
const GAS_SSTORE_SET: u64 = 20_000;
const GAS_SSTORE_RESET: u64 = 5000;
const GAS_LOG: u64 = 375;
const GAS_LOG_TOPIC: u64 = 375;
const GAS_LOG_DATA_BYTE: u64 = 8;
const GAS_CALL_VALUE: u64 = 9000;
const GAS_BLOCKHASH: u64 = 20;
const GAS_SELFDESTRUCT: u64 = 5000;
const GAS_CODE_DEPOSIT_BYTE: u64 = 200;

/// One instruction of the mini interpreter. Each op carries its operands
/// inline in the bytecode; there is no stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// End execution successfully with the output accumulated so far.
    Stop,
    /// Append the given bytes to the output and end execution.
    Return(Bytes),
    /// Revert with the given bytes as output.
    Revert(Bytes),
    /// Undefined instruction: halts and consumes all gas.
    Invalid,
    /// Consume an extra fixed amount of gas.
    Burn(u64),
    /// Read storage slots of the executing account, appending each value.
    Sload(Vec<H256>),
    /// Write storage slots of the executing account.
    Sstore(Vec<(H256, U256)>),
    /// Transfer value from the executing account's balance.
    Call(Address, U256),
    /// Emit a single-topic log.
    Log1(H256, Bytes),
    /// Append the hash of the given block number (zero when unknown).
    BlockHash(u64),
    /// Append the executing block's number.
    Number,
    /// Append the executing block's base fee.
    BaseFee,
    /// Append the message's effective gas price.
    GasPrice,
    /// Append an account's balance.
    Balance(Address),
    /// Destroy the executing account, sending its balance to the beneficiary.
    SelfDestruct(Address),
}

const OP_STOP: u8 = 0x00;
const OP_RETURN: u8 = 0xf3;
const OP_REVERT: u8 = 0xfd;
const OP_INVALID: u8 = 0xfe;
const OP_BURN: u8 = 0x5a;
const OP_SLOAD: u8 = 0x54;
const OP_SSTORE: u8 = 0x55;
const OP_CALL: u8 = 0xf1;
const OP_LOG1: u8 = 0xa1;
const OP_BLOCKHASH: u8 = 0x40;
const OP_NUMBER: u8 = 0x43;
const OP_BASEFEE: u8 = 0x48;
const OP_GASPRICE: u8 = 0x3a;
const OP_BALANCE: u8 = 0x31;
const OP_SELFDESTRUCT: u8 = 0xff;

/// A sequence of [`Op`]s, convertible to and from account bytecode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program(pub Vec<Op>);

impl Program {
    pub fn single(op: Op) -> Self {
        Self(vec![op])
    }

    pub fn bytecode(&self) -> Bytes {
        let mut buf = Vec::new();
        for op in &self.0 {
            match op {
                Op::Stop => buf.put_u8(OP_STOP),
                Op::Return(data) => {
                    buf.put_u8(OP_RETURN);
                    buf.put_u16(data.len() as u16);
                    buf.put_slice(data);
                }
                Op::Revert(data) => {
                    buf.put_u8(OP_REVERT);
                    buf.put_u16(data.len() as u16);
                    buf.put_slice(data);
                }
                Op::Invalid => buf.put_u8(OP_INVALID),
                Op::Burn(amount) => {
                    buf.put_u8(OP_BURN);
                    buf.put_u64(*amount);
                }
                Op::Sload(keys) => {
                    buf.put_u8(OP_SLOAD);
                    buf.put_u8(keys.len() as u8);
                    for key in keys {
                        buf.put_slice(key.as_bytes());
                    }
                }
                Op::Sstore(pairs) => {
                    buf.put_u8(OP_SSTORE);
                    buf.put_u8(pairs.len() as u8);
                    for (key, value) in pairs {
                        buf.put_slice(key.as_bytes());
                        buf.put_slice(&value.to_big_endian());
                    }
                }
                Op::Call(to, value) => {
                    buf.put_u8(OP_CALL);
                    buf.put_slice(to.as_bytes());
                    buf.put_slice(&value.to_big_endian());
                }
                Op::Log1(topic, data) => {
                    buf.put_u8(OP_LOG1);
                    buf.put_slice(topic.as_bytes());
                    buf.put_u16(data.len() as u16);
                    buf.put_slice(data);
                }
                Op::BlockHash(number) => {
                    buf.put_u8(OP_BLOCKHASH);
                    buf.put_u64(*number);
                }
                Op::Number => buf.put_u8(OP_NUMBER),
                Op::BaseFee => buf.put_u8(OP_BASEFEE),
                Op::GasPrice => buf.put_u8(OP_GASPRICE),
                Op::Balance(address) => {
                    buf.put_u8(OP_BALANCE);
                    buf.put_slice(address.as_bytes());
                }
                Op::SelfDestruct(beneficiary) => {
                    buf.put_u8(OP_SELFDESTRUCT);
                    buf.put_slice(beneficiary.as_bytes());
                }
            }
        }
        Bytes::from(buf)
    }

    fn parse(code: &[u8]) -> Result<Self, String> {
        let mut ops = Vec::new();
        let mut cursor = Cursor { code, pos: 0 };
        while let Some(tag) = cursor.next_u8() {
            let op = match tag {
                OP_STOP => Op::Stop,
                OP_RETURN => Op::Return(cursor.sized_bytes()?),
                OP_REVERT => Op::Revert(cursor.sized_bytes()?),
                OP_INVALID => Op::Invalid,
                OP_BURN => Op::Burn(cursor.u64_imm()?),
                OP_SLOAD => {
                    let count = cursor.u8_imm()?;
                    let mut keys = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        keys.push(H256::from_slice(cursor.take(32)?));
                    }
                    Op::Sload(keys)
                }
                OP_SSTORE => {
                    let count = cursor.u8_imm()?;
                    let mut pairs = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let key = H256::from_slice(cursor.take(32)?);
                        let value = U256::from_big_endian(cursor.take(32)?);
                        pairs.push((key, value));
                    }
                    Op::Sstore(pairs)
                }
                OP_CALL => {
                    let to = Address::from_slice(cursor.take(20)?);
                    let value = U256::from_big_endian(cursor.take(32)?);
                    Op::Call(to, value)
                }
                OP_LOG1 => {
                    let topic = H256::from_slice(cursor.take(32)?);
                    Op::Log1(topic, cursor.sized_bytes()?)
                }
                OP_BLOCKHASH => Op::BlockHash(cursor.u64_imm()?),
                OP_NUMBER => Op::Number,
                OP_BASEFEE => Op::BaseFee,
                OP_GASPRICE => Op::GasPrice,
                OP_BALANCE => Op::Balance(Address::from_slice(cursor.take(20)?)),
                OP_SELFDESTRUCT => Op::SelfDestruct(Address::from_slice(cursor.take(20)?)),
                other => return Err(format!("invalid opcode: opcode {other:#x} not defined")),
            };
            ops.push(op);
        }
        Ok(Self(ops))
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next_u8(&mut self) -> Option<u8> {
        let byte = self.code.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn u8_imm(&mut self) -> Result<u8, String> {
        self.next_u8().ok_or_else(truncated)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self.pos + len;
        let slice = self.code.get(self.pos..end).ok_or_else(truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u64_imm(&mut self) -> Result<u64, String> {
        let mut fixed = [0u8; 8];
        fixed.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(fixed))
    }

    fn sized_bytes(&mut self) -> Result<Bytes, String> {
        let mut len_bytes = [0u8; 2];
        len_bytes.copy_from_slice(self.take(2)?);
        let len = u16::from_be_bytes(len_bytes) as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }
}

fn truncated() -> String {
    "truncated immediate operand".to_string()
}

/// In-memory [`VmDatabase`]. The engine's test-suites build genesis-like
/// states with the builder methods and hand this out as the base state view.
#[derive(Debug, Clone, Default)]
pub struct InMemoryState {
    accounts: HashMap<Address, AccountState>,
    storage: HashMap<Address, HashMap<H256, U256>>,
    code: HashMap<H256, Code>,
    block_hashes: HashMap<u64, H256>,
    chain_config: ChainConfig,
}

impl InMemoryState {
    pub fn new(chain_config: ChainConfig) -> Self {
        Self {
            chain_config,
            ..Default::default()
        }
    }

    pub fn with_account(mut self, address: Address, balance: U256, nonce: u64) -> Self {
        let account = self.accounts.entry(address).or_default();
        account.balance = balance;
        account.nonce = nonce;
        self
    }

    pub fn with_code(mut self, address: Address, bytecode: Bytes) -> Self {
        let code = Code::from_bytecode(bytecode);
        self.accounts.entry(address).or_default().code_hash = code.hash;
        self.code.insert(code.hash, code);
        self
    }

    pub fn with_program(self, address: Address, program: &Program) -> Self {
        self.with_code(address, program.bytecode())
    }

    pub fn with_storage_slot(mut self, address: Address, key: H256, value: U256) -> Self {
        self.accounts.entry(address).or_default();
        self.storage.entry(address).or_default().insert(key, value);
        self
    }

    pub fn with_block_hash(mut self, number: u64, hash: H256) -> Self {
        self.block_hashes.insert(number, hash);
        self
    }

    /// Applies execution-produced state transitions in place.
    pub fn apply_account_updates(&mut self, updates: &[AccountUpdate]) {
        for update in updates {
            if update.removed {
                self.accounts.remove(&update.address);
                self.storage.remove(&update.address);
                continue;
            }
            let account = self.accounts.entry(update.address).or_default();
            if let Some(info) = &update.info {
                account.nonce = info.nonce;
                account.balance = info.balance;
                account.code_hash = info.code_hash;
            }
            if let Some(code) = &update.code {
                self.code.insert(code.hash, code.clone());
            }
            if update.removed_storage {
                self.storage.remove(&update.address);
            }
            if !update.added_storage.is_empty() {
                let storage = self.storage.entry(update.address).or_default();
                for (key, value) in &update.added_storage {
                    storage.insert(*key, *value);
                }
            }
        }
    }
}

impl VmDatabase for InMemoryState {
    fn get_account_state(&self, address: Address) -> Result<Option<AccountState>, EvmError> {
        Ok(self.accounts.get(&address).copied())
    }

    fn get_storage_slot(&self, address: Address, key: H256) -> Result<Option<U256>, EvmError> {
        Ok(self
            .storage
            .get(&address)
            .and_then(|slots| slots.get(&key))
            .copied())
    }

    fn get_block_hash(&self, block_number: u64) -> Result<Option<H256>, EvmError> {
        Ok(self.block_hashes.get(&block_number).copied())
    }

    fn get_chain_config(&self) -> Result<ChainConfig, EvmError> {
        Ok(self.chain_config)
    }

    fn get_account_code(&self, code_hash: H256) -> Result<Code, EvmError> {
        if code_hash == EMPTY_KECCACK_HASH {
            return Ok(Code::default());
        }
        self.code
            .get(&code_hash)
            .cloned()
            .ok_or_else(|| EvmError::Database(format!("code not found for hash {code_hash:#x}")))
    }
}

/// Address a contract created by `sender` with the given nonce deploys to.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut buf = Vec::new();
    Encoder::new(&mut buf)
        .encode_field(&sender)
        .encode_field(&nonce)
        .finish();
    Address::from_slice(&keccak(buf).as_bytes()[12..])
}

/// The deterministic interpreter implementing [`Evm`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MiniEvm;

impl Evm for MiniEvm {
    fn execute(
        &self,
        msg: &CallMessage,
        ctx: &EvmContext<'_>,
        db: &dyn VmDatabase,
    ) -> Result<ExecutionReport, EvmError> {
        Frame::new(msg, ctx, db)?.run()
    }
}

struct Frame<'a> {
    msg: &'a CallMessage,
    ctx: &'a EvmContext<'a>,
    db: &'a dyn VmDatabase,
    gas_used: u64,
    output: Vec<u8>,
    logs: Vec<ethsim_common::types::Log>,
    transfers: Vec<EtherTransfer>,
    balances: HashMap<Address, U256>,
    storage_writes: HashMap<Address, HashMap<H256, U256>>,
    destroyed: BTreeSet<Address>,
    deployed: Option<(Address, Code)>,
    accessed_addresses: BTreeSet<Address>,
    accessed_storage: BTreeMap<Address, BTreeSet<H256>>,
    warm_addresses: BTreeSet<Address>,
    warm_slots: BTreeSet<(Address, H256)>,
    effective_gas_price: U256,
}

enum Interrupt {
    Revert(Bytes),
    Halt(String),
    OutOfGas,
}

impl<'a> Frame<'a> {
    fn new(
        msg: &'a CallMessage,
        ctx: &'a EvmContext<'a>,
        db: &'a dyn VmDatabase,
    ) -> Result<Self, EvmError> {
        let base_fee = ctx.header.base_fee_per_gas.unwrap_or(0);
        let mut warm_addresses: BTreeSet<Address> =
            [msg.from, ctx.header.coinbase].into_iter().collect();
        let mut warm_slots = BTreeSet::new();
        for entry in &msg.access_list {
            warm_addresses.insert(entry.address);
            for key in &entry.storage_keys {
                warm_slots.insert((entry.address, *key));
            }
        }
        Ok(Self {
            msg,
            ctx,
            db,
            gas_used: 0,
            output: Vec::new(),
            logs: Vec::new(),
            transfers: Vec::new(),
            balances: HashMap::new(),
            storage_writes: HashMap::new(),
            destroyed: BTreeSet::new(),
            deployed: None,
            accessed_addresses: BTreeSet::new(),
            accessed_storage: BTreeMap::new(),
            warm_addresses,
            warm_slots,
            effective_gas_price: msg.effective_gas_price(base_fee),
        })
    }

    fn run(mut self) -> Result<ExecutionReport, EvmError> {
        let chain_config = self.db.get_chain_config()?;
        let fork = chain_config.fork(self.ctx.header.timestamp);
        let intrinsic = self.msg.intrinsic_gas(fork);
        let sender_nonce = match self.msg.nonce {
            Some(nonce) => nonce,
            None => self.db.get_nonce(self.msg.from)?,
        };

        self.accessed_addresses.insert(self.msg.from);
        if self.charge(intrinsic).is_err() {
            return self.finish_failure(sender_nonce, Interrupt::OutOfGas);
        }

        let interrupt = self.execute_message(sender_nonce);
        match interrupt {
            Ok(()) => self.finish_success(sender_nonce),
            Err(interrupt) => self.finish_failure(sender_nonce, interrupt),
        }
    }

    fn execute_message(&mut self, sender_nonce: u64) -> Result<(), Interrupt> {
        let (executing, program) = match self.msg.to {
            TxKind::Call(to) => {
                self.touch_address(to);
                if self.msg.value > U256::zero() {
                    self.transfer(self.msg.from, to, self.msg.value)?;
                }
                if let Some(canonical) = self.ctx.precompiles.lookup(&to) {
                    return self.run_precompile(canonical);
                }
                let (code_address, code) = self
                    .db
                    .effective_code_at(to)
                    .map_err(|e| Interrupt::Halt(e.to_string()))?;
                if code_address != to {
                    self.touch_address(code_address);
                }
                if code.is_empty() {
                    return Ok(());
                }
                let program = Program::parse(&code.bytecode).map_err(Interrupt::Halt)?;
                (to, program)
            }
            TxKind::Create => {
                let created = create_address(self.msg.from, sender_nonce);
                self.touch_address(created);
                if self.msg.value > U256::zero() {
                    self.transfer(self.msg.from, created, self.msg.value)?;
                }
                let deposit_gas = GAS_CODE_DEPOSIT_BYTE * self.msg.input.len() as u64;
                self.charge(deposit_gas).map_err(|_| Interrupt::OutOfGas)?;
                self.deployed = Some((created, Code::from_bytecode(self.msg.input.clone())));
                return Ok(());
            }
        };

        for op in program.0 {
            if !self.step(executing, op)? {
                break;
            }
        }
        Ok(())
    }

    /// Executes one op; returns false when execution finished.
    fn step(&mut self, executing: Address, op: Op) -> Result<bool, Interrupt> {
        match op {
            Op::Stop => return Ok(false),
            Op::Return(data) => {
                self.output.extend_from_slice(&data);
                return Ok(false);
            }
            Op::Revert(data) => return Err(Interrupt::Revert(data)),
            Op::Invalid => {
                return Err(Interrupt::Halt(
                    "invalid opcode: opcode 0xfe not defined".to_string(),
                ));
            }
            Op::Burn(amount) => self.charge(amount).map_err(|_| Interrupt::OutOfGas)?,
            Op::Sload(keys) => {
                for key in keys {
                    let cost = if self.warm_slots.insert((executing, key)) {
                        GAS_COLD_SLOAD
                    } else {
                        GAS_WARM_ACCESS
                    };
                    self.charge(cost).map_err(|_| Interrupt::OutOfGas)?;
                    self.touch_slot(executing, key);
                    let value = self.storage_read(executing, key)?;
                    self.output.extend_from_slice(&value.to_big_endian());
                }
            }
            Op::Sstore(pairs) => {
                for (key, value) in pairs {
                    let cold = self.warm_slots.insert((executing, key));
                    let current = self.storage_read(executing, key)?;
                    let mut cost = if current.is_zero() && !value.is_zero() {
                        GAS_SSTORE_SET
                    } else {
                        GAS_SSTORE_RESET
                    };
                    if cold {
                        cost += GAS_COLD_SLOAD;
                    }
                    self.charge(cost).map_err(|_| Interrupt::OutOfGas)?;
                    self.touch_slot(executing, key);
                    self.storage_writes
                        .entry(executing)
                        .or_default()
                        .insert(key, value);
                }
            }
            Op::Call(to, value) => {
                let cost = GAS_CALL_VALUE + self.account_access_cost(to);
                self.charge(cost).map_err(|_| Interrupt::OutOfGas)?;
                self.touch_address(to);
                self.transfer(executing, to, value)?;
            }
            Op::Log1(topic, data) => {
                let cost = GAS_LOG + GAS_LOG_TOPIC + GAS_LOG_DATA_BYTE * data.len() as u64;
                self.charge(cost).map_err(|_| Interrupt::OutOfGas)?;
                self.logs.push(ethsim_common::types::Log {
                    address: executing,
                    topics: vec![topic],
                    data,
                });
            }
            Op::BlockHash(number) => {
                self.charge(GAS_BLOCKHASH).map_err(|_| Interrupt::OutOfGas)?;
                let hash = self
                    .db
                    .get_block_hash(number)
                    .map_err(|e| Interrupt::Halt(e.to_string()))?
                    .unwrap_or_default();
                self.output.extend_from_slice(hash.as_bytes());
            }
            Op::Number => {
                self.charge(GAS_QUICK_STEP).map_err(|_| Interrupt::OutOfGas)?;
                let number = U256::from(self.ctx.header.number);
                self.output.extend_from_slice(&number.to_big_endian());
            }
            Op::BaseFee => {
                self.charge(GAS_QUICK_STEP).map_err(|_| Interrupt::OutOfGas)?;
                let base_fee = U256::from(self.ctx.header.base_fee_per_gas.unwrap_or(0));
                self.output.extend_from_slice(&base_fee.to_big_endian());
            }
            Op::GasPrice => {
                self.charge(GAS_QUICK_STEP).map_err(|_| Interrupt::OutOfGas)?;
                let price = self.effective_gas_price;
                self.output.extend_from_slice(&price.to_big_endian());
            }
            Op::Balance(address) => {
                let cost = self.account_access_cost(address);
                self.charge(cost).map_err(|_| Interrupt::OutOfGas)?;
                self.touch_address(address);
                let balance = self.balance_of(address)?;
                self.output.extend_from_slice(&balance.to_big_endian());
            }
            Op::SelfDestruct(beneficiary) => {
                let cost = GAS_SELFDESTRUCT + self.account_access_cost(beneficiary);
                self.charge(cost).map_err(|_| Interrupt::OutOfGas)?;
                self.touch_address(beneficiary);
                let balance = self.balance_of(executing)?;
                if balance > U256::zero() {
                    self.transfer(executing, beneficiary, balance)?;
                }
                self.destroyed.insert(executing);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn run_precompile(&mut self, canonical: Address) -> Result<(), Interrupt> {
        let words = self.msg.input.len().div_ceil(32) as u64;
        match canonical.as_bytes()[19] {
            // sha256
            0x02 => {
                self.charge(60 + 12 * words).map_err(|_| Interrupt::OutOfGas)?;
                let digest = Sha256::digest(&self.msg.input);
                self.output.extend_from_slice(&digest);
            }
            // identity
            0x04 => {
                self.charge(15 + 3 * words).map_err(|_| Interrupt::OutOfGas)?;
                self.output.extend_from_slice(&self.msg.input);
            }
            // The remaining builtins are not modeled; they accept any input
            // and return empty output.
            _ => {}
        }
        Ok(())
    }

    fn account_access_cost(&mut self, address: Address) -> u64 {
        if self.warm_addresses.insert(address) {
            GAS_COLD_ACCOUNT_ACCESS
        } else {
            GAS_WARM_ACCESS
        }
    }

    fn charge(&mut self, gas: u64) -> Result<(), ()> {
        self.gas_used = self.gas_used.saturating_add(gas);
        if self.gas_used > self.msg.gas_limit {
            return Err(());
        }
        Ok(())
    }

    fn touch_address(&mut self, address: Address) {
        self.accessed_addresses.insert(address);
    }

    fn touch_slot(&mut self, address: Address, key: H256) {
        self.accessed_storage.entry(address).or_default().insert(key);
        self.accessed_addresses.insert(address);
    }

    fn balance_of(&mut self, address: Address) -> Result<U256, Interrupt> {
        if let Some(balance) = self.balances.get(&address) {
            return Ok(*balance);
        }
        let balance = self
            .db
            .get_balance(address)
            .map_err(|e| Interrupt::Halt(e.to_string()))?;
        self.balances.insert(address, balance);
        Ok(balance)
    }

    fn storage_read(&mut self, address: Address, key: H256) -> Result<U256, Interrupt> {
        if let Some(value) = self
            .storage_writes
            .get(&address)
            .and_then(|slots| slots.get(&key))
        {
            return Ok(*value);
        }
        self.db
            .get_storage_slot(address, key)
            .map(|value| value.unwrap_or_default())
            .map_err(|e| Interrupt::Halt(e.to_string()))
    }

    fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<(), Interrupt> {
        let from_balance = self.balance_of(from)?;
        if from_balance < value {
            return Err(Interrupt::Revert(Bytes::new()));
        }
        let to_balance = self.balance_of(to)?;
        self.balances.insert(from, from_balance - value);
        self.balances.insert(to, to_balance.saturating_add(value));
        if value > U256::zero() {
            self.transfers.push(EtherTransfer { from, to, value });
        }
        Ok(())
    }

    fn finish_success(mut self, sender_nonce: u64) -> Result<ExecutionReport, EvmError> {
        self.charge_fees()?;
        let mut updates = self.collect_updates(sender_nonce)?;
        if let Some((address, code)) = self.deployed.take() {
            let entry = updates
                .entry(address)
                .or_insert_with(|| AccountUpdate::new(address));
            let mut info = entry.info.take().unwrap_or_default();
            info.nonce = 1;
            info.code_hash = code.hash;
            info.balance = self
                .balances
                .get(&address)
                .copied()
                .unwrap_or_else(U256::zero);
            entry.info = Some(info);
            entry.code = Some(code);
        }
        let result = ExecutionResult::Success {
            gas_used: self.gas_used,
            gas_refunded: 0,
            logs: std::mem::take(&mut self.logs),
            output: Bytes::from(std::mem::take(&mut self.output)),
        };
        Ok(self.report(result, updates))
    }

    fn finish_failure(
        mut self,
        sender_nonce: u64,
        interrupt: Interrupt,
    ) -> Result<ExecutionReport, EvmError> {
        // A failed message still increments the nonce and pays for the gas it
        // burned; every other effect is rolled back.
        let result = match interrupt {
            Interrupt::Revert(output) => ExecutionResult::Revert {
                gas_used: self.gas_used,
                output,
            },
            Interrupt::Halt(reason) => ExecutionResult::Halt {
                reason,
                gas_used: self.msg.gas_limit,
            },
            Interrupt::OutOfGas => ExecutionResult::Halt {
                reason: "out of gas".to_string(),
                gas_used: self.msg.gas_limit,
            },
        };
        self.gas_used = result.gas_used();
        self.balances.clear();
        self.storage_writes.clear();
        self.destroyed.clear();
        self.transfers.clear();
        self.balance_of(self.msg.from)
            .map_err(|_| EvmError::Database("sender balance".to_string()))?;
        self.charge_fees()?;
        let updates = self.collect_updates(sender_nonce)?;
        Ok(self.report(result, updates))
    }

    fn charge_fees(&mut self) -> Result<(), EvmError> {
        let fee = self.effective_gas_price * U256::from(self.gas_used);
        if fee.is_zero() {
            return Ok(());
        }
        let sender_balance = self
            .balance_of(self.msg.from)
            .map_err(|_| EvmError::Database("sender balance".to_string()))?;
        self.balances
            .insert(self.msg.from, sender_balance.saturating_sub(fee));

        let base_fee = U256::from(self.ctx.header.base_fee_per_gas.unwrap_or(0));
        let tip = self
            .effective_gas_price
            .saturating_sub(base_fee)
            * U256::from(self.gas_used);
        if tip > U256::zero() {
            let coinbase = self.ctx.header.coinbase;
            let coinbase_balance = self
                .balance_of(coinbase)
                .map_err(|_| EvmError::Database("coinbase balance".to_string()))?;
            self.balances
                .insert(coinbase, coinbase_balance.saturating_add(tip));
        }
        Ok(())
    }

    fn collect_updates(
        &self,
        sender_nonce: u64,
    ) -> Result<HashMap<Address, AccountUpdate>, EvmError> {
        let mut updates: HashMap<Address, AccountUpdate> = HashMap::new();

        for (&address, &balance) in &self.balances {
            let account = self.db.account_or_default(address)?;
            let update = updates
                .entry(address)
                .or_insert_with(|| AccountUpdate::new(address));
            update.info = Some(AccountInfo {
                nonce: account.nonce,
                balance,
                code_hash: account.code_hash,
            });
        }

        // Sender nonce bump, applied on top of whatever balance change was
        // already recorded.
        {
            let account = self.db.account_or_default(self.msg.from)?;
            let update = updates
                .entry(self.msg.from)
                .or_insert_with(|| AccountUpdate::new(self.msg.from));
            let mut info = update.info.take().unwrap_or(AccountInfo {
                nonce: account.nonce,
                balance: account.balance,
                code_hash: account.code_hash,
            });
            info.nonce = sender_nonce + 1;
            update.info = Some(info);
        }

        for (&address, slots) in &self.storage_writes {
            let update = updates
                .entry(address)
                .or_insert_with(|| AccountUpdate::new(address));
            for (&key, &value) in slots {
                update.added_storage.insert(key, value);
            }
        }

        for &address in &self.destroyed {
            updates.insert(address, AccountUpdate::removed(address));
        }

        Ok(updates)
    }

    fn report(
        self,
        result: ExecutionResult,
        updates: HashMap<Address, AccountUpdate>,
    ) -> ExecutionReport {
        let mut updates: Vec<AccountUpdate> = updates.into_values().collect();
        updates.sort_by_key(|update| update.address);
        ExecutionReport {
            result,
            accessed_addresses: self.accessed_addresses,
            accessed_storage: self.accessed_storage,
            transfers: self.transfers,
            updates,
        }
    }
}
