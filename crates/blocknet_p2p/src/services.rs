//! Collaborator interfaces consumed by the networking layer.
//!
//! Chain validation and pool admission live outside this crate. Inbound
//! payloads are handed over unchanged; the collaborators decode them.

use std::fmt;

/// Result of handing a payload to a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(String),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl fmt::Display for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// The local blockchain, responsible for validating and merging chains
/// received from peers.
pub trait ChainService: Send + Sync {
    /// Merge an encoded chain (an ordered sequence of blocks).
    fn merge_chain(&self, encoded_chain: &[u8]) -> Admission;
}

/// The local transaction pool (mempool).
pub trait PoolService: Send + Sync {
    /// Admit a single encoded transaction.
    fn admit(&self, encoded_transaction: &[u8]) -> Admission;

    /// Remove the encoded list of confirmed transactions from the pool.
    fn clear(&self, encoded_transactions: &[u8]);
}
