use std::collections::HashMap;

use ethsim_common::Address;

/// Highest address of the builtin contract range recognized here (0x01..=0x0a,
/// the Cancun set).
const MAX_PRECOMPILE: u64 = 0x0a;

pub fn is_precompile(address: &Address) -> bool {
    let bytes = address.as_bytes();
    if bytes[..19].iter().any(|&b| b != 0) {
        return false;
    }
    (1..=MAX_PRECOMPILE as u8).contains(&bytes[19])
}

/// Tracks precompile relocations requested through state overrides. Moving a
/// precompile makes the destination address execute the builtin's logic while
/// the vacated address behaves like an ordinary account, consistently for the
/// rest of the simulation.
#[derive(Debug, Clone, Default)]
pub struct PrecompileMap {
    /// destination address -> canonical precompile address
    moves: HashMap<Address, Address>,
    /// canonical addresses whose logic has been moved away
    vacated: HashMap<Address, Address>,
}

impl PrecompileMap {
    /// Relocates the precompile living at `from` so that `to` now executes it.
    pub fn relocate(&mut self, from: Address, to: Address) {
        let canonical = self.vacated.get(&from).copied().unwrap_or(from);
        self.moves.insert(to, canonical);
        self.vacated.insert(canonical, to);
    }

    /// The canonical precompile executing at `address`, if any.
    pub fn lookup(&self, address: &Address) -> Option<Address> {
        if let Some(canonical) = self.moves.get(address) {
            return Some(*canonical);
        }
        if is_precompile(address) && !self.vacated.contains_key(address) {
            return Some(*address);
        }
        None
    }
}
