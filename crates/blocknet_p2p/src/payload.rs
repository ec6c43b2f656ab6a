//! Payload helpers: build typed envelopes from the node's own chain and
//! transaction types.
//!
//! The networking core treats payloads as opaque bytes. These helpers fix
//! the encoding (JSON) so every node on the network produces the same bytes
//! for the same value, and give collaborators a matching decoder.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::message::{Envelope, EnvelopeKind};

impl Envelope {
    /// A chain envelope carrying an ordered sequence of blocks.
    pub fn chain<B: Serialize>(blocks: &[B]) -> Result<Self> {
        Self::json(EnvelopeKind::Chain, blocks)
    }

    /// A transaction envelope carrying a single transaction.
    pub fn transaction<T: Serialize>(transaction: &T) -> Result<Self> {
        Self::json(EnvelopeKind::Transaction, transaction)
    }

    /// A clear-pool envelope carrying the transactions confirmed in a block.
    pub fn clear_pool<T: Serialize>(transactions: &[T]) -> Result<Self> {
        Self::json(EnvelopeKind::ClearPool, transactions)
    }

    fn json<V: Serialize + ?Sized>(kind: EnvelopeKind, value: &V) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_vec(value)?))
    }
}

/// Decode a payload produced by the helpers above.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
