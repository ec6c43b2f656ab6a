//! Network message protocol: typed, versioned envelopes.
//!
//! An envelope body is laid out as `[version][kind][payload..]`. The stream
//! framing around it lives in [`crate::framing`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::address::PeerAddress;
use crate::error::EnvelopeError;

/// Version byte written at the start of every envelope body.
pub const WIRE_VERSION: u8 = 1;

/// The kind of message carried in an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Peer introduction; payload is the sender's listening address.
    Registration,
    /// An encoded ordered sequence of blocks.
    Chain,
    /// A single encoded transaction.
    Transaction,
    /// Encoded confirmed transactions to drop from the pool.
    ClearPool,
}

impl EnvelopeKind {
    pub const ALL: [EnvelopeKind; 4] = [
        Self::Registration,
        Self::Chain,
        Self::Transaction,
        Self::ClearPool,
    ];

    /// Wire tag for this kind.
    pub fn tag(self) -> u8 {
        match self {
            Self::Registration => 1,
            Self::Chain => 2,
            Self::Transaction => 3,
            Self::ClearPool => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, EnvelopeError> {
        match tag {
            1 => Ok(Self::Registration),
            2 => Ok(Self::Chain),
            3 => Ok(Self::Transaction),
            4 => Ok(Self::ClearPool),
            other => Err(EnvelopeError::UnknownKind(other)),
        }
    }

    /// Short name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Chain => "chain",
            Self::Transaction => "transaction",
            Self::ClearPool => "clear_pool",
        }
    }
}

/// A unit of wire data exchanged between peers.
///
/// The payload is opaque here; the chain and pool collaborators interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A registration envelope announcing `addr` as the sender's address.
    pub fn registration(addr: &PeerAddress) -> Self {
        Self::new(EnvelopeKind::Registration, addr.to_string())
    }

    /// The address carried by a registration envelope.
    pub fn registration_address(&self) -> Result<PeerAddress, EnvelopeError> {
        let text = std::str::from_utf8(&self.payload)
            .map_err(|_| EnvelopeError::InvalidAddress("payload is not UTF-8".into()))?;
        PeerAddress::parse_advertised(text)
            .map_err(|_| EnvelopeError::InvalidAddress(text.to_string()))
    }

    /// Encode the envelope body (without the length prefix).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.payload.len());
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.kind.tag());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode an envelope body produced by [`Envelope::encode`].
    pub fn decode(body: Bytes) -> Result<Self, EnvelopeError> {
        match body.as_ref() {
            [] | [_] => Err(EnvelopeError::Empty),
            [version, ..] if *version != WIRE_VERSION => {
                Err(EnvelopeError::UnsupportedVersion(*version))
            }
            [_, tag, ..] => {
                let kind = EnvelopeKind::from_tag(*tag)?;
                Ok(Self {
                    kind,
                    payload: body.slice(2..),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
