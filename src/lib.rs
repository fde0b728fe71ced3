//! Croupier - Provably Fair Wagering Engine
//!
//! Escrow-backed wagering with asynchronous oracle settlement. Players pick
//! outcomes of fixed game classes, odds derive from the selection and a
//! house fee schedule, and every settlement can be recomputed from public
//! inputs.

pub mod config;
pub mod engine;
pub mod errors;
pub mod escrow;
pub mod feeds;
pub mod odds;
pub mod oracle;
pub mod payouts;
pub mod service;
pub mod wager;

pub use config::{CasinoConfig, ConfigError, ConfigLoader};
pub use engine::{
    derive_outcome, derive_salt, EngineContext, HouseStats, PlacedWager, RefundRecord,
    SettlementRecord, WagerEngine, WagerRequest,
};
pub use errors::{EngineError, EngineResult};
pub use escrow::EscrowLedger;
pub use feeds::{FeeConverter, FeeEstimator, LivenessFeed, RateFeed, RoundData};
pub use oracle::{EntropyRequest, EntropySource, RequestToken};
pub use payouts::{PayoutKind, PendingPayout};
pub use service::{
    CasinoService, ContextProvider, ManualContext, PayoutSink, ServiceError, ServiceResult,
    ServiceWorkers, WagerEvent,
};
pub use wager::{GameKind, Selection, Wager, WagerId, WagerStatus};
