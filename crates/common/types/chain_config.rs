use serde::{Deserialize, Serialize};

/// Post-merge protocol configuration. Fork activation is gated by block
/// timestamp (None = the fork is not scheduled, 0 = active from genesis).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub chain_id: u64,
    pub shanghai_time: Option<u64>,
    pub cancun_time: Option<u64>,
    pub prague_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Fork {
    Paris,
    Shanghai,
    #[default]
    Cancun,
    Prague,
}

impl ChainConfig {
    /// Test/devnet configuration with every scheduled fork active.
    pub fn all_forks_active(chain_id: u64) -> Self {
        Self {
            chain_id,
            shanghai_time: Some(0),
            cancun_time: Some(0),
            prague_time: Some(0),
        }
    }

    pub fn fork(&self, block_timestamp: u64) -> Fork {
        if self.is_prague_activated(block_timestamp) {
            Fork::Prague
        } else if self.is_cancun_activated(block_timestamp) {
            Fork::Cancun
        } else if self.is_shanghai_activated(block_timestamp) {
            Fork::Shanghai
        } else {
            Fork::Paris
        }
    }

    pub fn is_shanghai_activated(&self, block_timestamp: u64) -> bool {
        self.shanghai_time.is_some_and(|t| t <= block_timestamp)
    }

    pub fn is_cancun_activated(&self, block_timestamp: u64) -> bool {
        self.cancun_time.is_some_and(|t| t <= block_timestamp)
    }

    pub fn is_prague_activated(&self, block_timestamp: u64) -> bool {
        self.prague_time.is_some_and(|t| t <= block_timestamp)
    }

    /// Blob-carrying messages are valid from Cancun on.
    pub fn supports_blobs(&self, block_timestamp: u64) -> bool {
        self.is_cancun_activated(block_timestamp)
    }

    /// Delegated-code (authorization list) messages are valid from Prague on.
    pub fn supports_delegations(&self, block_timestamp: u64) -> bool {
        self.is_prague_activated(block_timestamp)
    }
}
