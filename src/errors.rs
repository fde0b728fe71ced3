//! Error types for the wagering engine.
//!
//! Every fallible engine operation returns [`EngineResult`]. Failures are
//! grouped by the subsystem that raises them; [`EngineError`] wraps the
//! subsystem enums so callers can match broadly or precisely.

/// Result alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error for all engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// Intermediate payout arithmetic exceeded the representable range.
    #[error("arithmetic overflow while computing payout")]
    Overflow,

    /// A mutating entry point was invoked while another was still executing.
    #[error("reentrant call rejected")]
    ReentrantCall,
}

/// Rejections raised while validating a wager request before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("modulo {modulo} is not a supported game class")]
    UnsupportedModulo { modulo: u64 },

    #[error("stake {stake} outside allowed range [{min}, {max}]")]
    StakeOutOfBounds { stake: u64, min: u64, max: u64 },

    #[error("mask {mask:#x} is invalid for modulo {modulo}")]
    MaskOutOfRange { mask: u64, modulo: u64 },

    #[error("threshold {value} is invalid for modulo {modulo}")]
    ThresholdOutOfRange { value: u64, modulo: u64 },

    #[error("roll edge {roll_edge} out of range for modulo {modulo}")]
    OutOfRangeOdds { roll_edge: u64, modulo: u64 },

    #[error("attached {attached} does not cover stake {stake} plus oracle fee {fee}")]
    Underfunded { attached: u64, stake: u64, fee: u64 },

    #[error("combined deduction of {percent}% would consume the entire stake")]
    ExcessiveDeduction { percent: u64 },
}

/// Failures of the escrow ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("insufficient free escrow: requested {requested}, free {free}")]
    InsufficientFunds { requested: u64, free: u64 },
}

/// Lifecycle violations: wrong wager, wrong state, wrong time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("no wager is associated with request token {token}")]
    UnknownRequestToken { token: u64 },

    #[error("wager {wager_id} does not exist")]
    UnknownWager { wager_id: u64 },

    #[error("wager {wager_id} is already finalized")]
    AlreadyFinalized { wager_id: u64 },

    #[error("fulfillment for wager {wager_id} arrived after the acceptance window")]
    FulfillmentExpired { wager_id: u64 },

    #[error("fulfillment for wager {wager_id} arrived before the placement marker advanced")]
    StaleFulfillment { wager_id: u64 },

    #[error("refund for wager {wager_id} unavailable until {available_at}")]
    CooldownActive { wager_id: u64, available_at: u64 },
}

/// Failures reported by the external rate and liveness feeds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("liveness feed reports the upstream down")]
    UpstreamDown,

    #[error("grace period after upstream recovery active until {until}")]
    GracePeriodActive { until: u64 },

    #[error("rate feed round {round_id} has not been answered yet")]
    StaleRate { round_id: u64 },

    #[error("rate feed returned a non-positive answer: {answer}")]
    InvalidRate { answer: i128 },
}

/// Failures reported by the entropy source when a request is issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("entropy request rejected: {reason}")]
    RequestRejected { reason: String },
}
