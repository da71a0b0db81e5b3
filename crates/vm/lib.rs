mod db;
mod errors;
mod evm;
mod execution_result;
mod precompiles;
pub mod testing;

pub use db::{VmDatabase, delegation_target};
pub use errors::EvmError;
pub use evm::{EtherTransfer, Evm, EvmContext, ExecutionReport};
pub use execution_result::ExecutionResult;
pub use precompiles::{PrecompileMap, is_precompile};
