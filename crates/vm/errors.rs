use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvmError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}
