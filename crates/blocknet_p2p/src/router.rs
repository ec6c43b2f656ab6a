//! Inbound router: hands received payloads to the chain and pool
//! collaborators.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{Envelope, EnvelopeKind};
use crate::services::{Admission, ChainService, PoolService};

/// Routes data envelopes to the collaborator responsible for their kind.
///
/// Registration envelopes are peer-management traffic and are handled by the
/// connection itself; the router ignores them.
pub struct InboundRouter {
    chain: Arc<dyn ChainService>,
    pool: Arc<dyn PoolService>,
}

impl InboundRouter {
    pub fn new(chain: Arc<dyn ChainService>, pool: Arc<dyn PoolService>) -> Self {
        Self { chain, pool }
    }

    /// Dispatch an envelope received from `from`. Returns the collaborator's
    /// verdict for kinds that produce one.
    pub fn route(&self, from: &str, envelope: &Envelope) -> Option<Admission> {
        match envelope.kind {
            EnvelopeKind::Registration => None,
            EnvelopeKind::Chain => {
                let verdict = self.chain.merge_chain(&envelope.payload);
                log_verdict(from, envelope.kind, &verdict);
                Some(verdict)
            }
            EnvelopeKind::Transaction => {
                let verdict = self.pool.admit(&envelope.payload);
                log_verdict(from, envelope.kind, &verdict);
                Some(verdict)
            }
            EnvelopeKind::ClearPool => {
                self.pool.clear(&envelope.payload);
                debug!("Cleared confirmed transactions announced by {from}");
                None
            }
        }
    }
}

fn log_verdict(from: &str, kind: EnvelopeKind, verdict: &Admission) {
    match verdict {
        Admission::Accepted => debug!("{} from {from} accepted", kind.as_str()),
        Admission::Rejected(reason) => warn!("{} from {from} rejected: {reason}", kind.as_str()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
