//! Entropy oracle integration.
//!
//! The engine never blocks on randomness. Placement issues a request through
//! an [`EntropySource`] and records the returned token; fulfillment arrives
//! later and is routed back to its wager through the gateway.

use crate::config::OracleRequestConfig;
use crate::errors::{EngineResult, OracleError, ProtocolError};
use crate::wager::WagerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque token correlating an entropy request with its fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestToken(pub u64);

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters attached to every entropy request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EntropyRequest {
    pub compute_budget: u64,
    pub confirmations: u32,
    /// Number of 32-byte values requested. The engine always asks for one.
    pub num_values: u32,
}

impl EntropyRequest {
    /// Request for a single value, parameterized from configuration.
    pub fn single(config: &OracleRequestConfig) -> Self {
        Self {
            compute_budget: config.compute_budget,
            confirmations: config.confirmations,
            num_values: 1,
        }
    }
}

/// External entropy source.
///
/// Implementations mint a unique token per request and later deliver one
/// 32-byte value for it through the engine's fulfillment path.
pub trait EntropySource: Send + Sync {
    fn request_entropy(&self, request: &EntropyRequest) -> Result<RequestToken, OracleError>;
}

/// Correlates issued request tokens with wagers.
///
/// Entries are kept after finalization so a duplicate or late fulfillment
/// still resolves to its wager and is rejected by the status check there,
/// rather than surfacing as an unknown token.
pub struct RandomnessGateway {
    source: Arc<dyn EntropySource>,
    by_token: HashMap<u64, WagerId>,
}

impl RandomnessGateway {
    pub fn new(source: Arc<dyn EntropySource>) -> Self {
        Self {
            source,
            by_token: HashMap::new(),
        }
    }

    /// Issue an entropy request for a wager and record the correlation.
    pub fn request_for(
        &mut self,
        wager_id: WagerId,
        request: &EntropyRequest,
    ) -> EngineResult<RequestToken> {
        let token = self.source.request_entropy(request)?;
        let previous = self.by_token.insert(token.0, wager_id);
        debug_assert!(previous.is_none(), "entropy source reused token {}", token);
        Ok(token)
    }

    /// Wager a fulfillment token belongs to.
    pub fn resolve(&self, token: RequestToken) -> EngineResult<WagerId> {
        self.by_token
            .get(&token.0)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownRequestToken { token: token.0 }.into())
    }

    pub fn outstanding(&self) -> usize {
        self.by_token.len()
    }
}

/// Entropy source that mints sequential tokens and never delivers on its
/// own. Drive fulfillment manually; used by demos and tests.
#[derive(Default)]
pub struct SequentialEntropySource {
    next_token: AtomicU64,
}

impl SequentialEntropySource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntropySource for SequentialEntropySource {
    fn request_entropy(&self, _request: &EntropyRequest) -> Result<RequestToken, OracleError> {
        Ok(RequestToken(
            self.next_token.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }
}
