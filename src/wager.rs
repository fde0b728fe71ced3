use crate::errors::{EngineResult, ProtocolError, ValidationError};
use crate::oracle::RequestToken;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Largest modulo whose outcomes are selected with a bitmask. Game classes
/// above this use a threshold comparison instead.
pub const MAX_MASK_MODULO: u64 = 40;

/// Unique, monotonically increasing wager identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WagerId(pub u64);

impl fmt::Display for WagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Supported game classes, each fixed to one outcome modulo
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    CoinFlip,
    Dice,
    DoubleDice,
    Roulette,
    HashRoll,
}

impl GameKind {
    /// Number of equally likely outcomes for this game class.
    pub fn modulo(&self) -> u64 {
        match self {
            GameKind::CoinFlip => 2,
            GameKind::Dice => 6,
            GameKind::DoubleDice => 36,
            GameKind::Roulette => 37,
            GameKind::HashRoll => 100,
        }
    }

    /// Reverse lookup from a modulo value.
    pub fn from_modulo(modulo: u64) -> Option<Self> {
        match modulo {
            2 => Some(GameKind::CoinFlip),
            6 => Some(GameKind::Dice),
            36 => Some(GameKind::DoubleDice),
            37 => Some(GameKind::Roulette),
            100 => Some(GameKind::HashRoll),
            _ => None,
        }
    }

    /// Whether selections for this class are bitmasks rather than thresholds.
    pub fn uses_mask(&self) -> bool {
        self.modulo() <= MAX_MASK_MODULO
    }

    pub fn all() -> [GameKind; 5] {
        [
            GameKind::CoinFlip,
            GameKind::Dice,
            GameKind::DoubleDice,
            GameKind::Roulette,
            GameKind::HashRoll,
        ]
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::CoinFlip => write!(f, "coin_flip"),
            GameKind::Dice => write!(f, "dice"),
            GameKind::DoubleDice => write!(f, "double_dice"),
            GameKind::Roulette => write!(f, "roulette"),
            GameKind::HashRoll => write!(f, "hash_roll"),
        }
    }
}

/// Player's pick, immutable once the wager is placed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Bit `i` set means outcome `i` wins. Mask-class games only.
    Mask(u64),
    /// Strict comparison against `value`. Threshold-class games only.
    Threshold { value: u64, over: bool },
}

impl Selection {
    /// Check the selection is legal for the given game class.
    pub fn validate_for(&self, kind: GameKind) -> Result<(), ValidationError> {
        let modulo = kind.modulo();
        match *self {
            Selection::Mask(mask) => {
                if !kind.uses_mask() {
                    return Err(ValidationError::MaskOutOfRange { mask, modulo });
                }
                // Zero can only lose; bits at or above the modulo never roll.
                if mask == 0 || mask >> modulo != 0 {
                    return Err(ValidationError::MaskOutOfRange { mask, modulo });
                }
                Ok(())
            }
            Selection::Threshold { value, .. } => {
                if kind.uses_mask() || value == 0 || value >= modulo {
                    return Err(ValidationError::ThresholdOutOfRange { value, modulo });
                }
                Ok(())
            }
        }
    }

    /// Roll edge driving the odds: set bits for a mask, the boundary value
    /// for a threshold.
    pub fn roll_edge(&self) -> u64 {
        match *self {
            Selection::Mask(mask) => crate::odds::pop_count(mask) as u64,
            Selection::Threshold { value, .. } => value,
        }
    }

    /// Whether this selection wins on outcomes above its boundary.
    pub fn is_larger(&self) -> bool {
        matches!(*self, Selection::Threshold { over: true, .. })
    }

    /// Win test for a settled outcome.
    pub fn wins(&self, outcome: u64) -> bool {
        match *self {
            Selection::Mask(mask) => outcome < 64 && mask & (1u64 << outcome) != 0,
            Selection::Threshold { value, over } => {
                if over {
                    outcome > value
                } else {
                    outcome < value
                }
            }
        }
    }
}

/// Lifecycle state of a wager. Transitions are forward only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    AwaitingRandomness,
    Settled,
    Refunded,
}

impl WagerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WagerStatus::Settled | WagerStatus::Refunded)
    }
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::AwaitingRandomness => write!(f, "awaiting_randomness"),
            WagerStatus::Settled => write!(f, "settled"),
            WagerStatus::Refunded => write!(f, "refunded"),
        }
    }
}

/// Complete wager record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    /// Player identifier (wallet address or session ID)
    pub player: String,
    pub kind: GameKind,
    pub selection: Selection,
    pub stake: u64,
    /// Locked at placement; the most this wager can pay.
    pub reserved_payout: u64,
    pub oracle_fee: u64,
    pub placed_at: u64,
    pub placement_marker: u64,
    /// Per-wager salt mixed into the settlement hash.
    pub salt: [u8; 32],
    pub request_token: RequestToken,
    pub status: WagerStatus,
    /// Settlement fields, written exactly once.
    pub outcome: Option<u64>,
    pub random_value: Option<[u8; 32]>,
    pub realized_payout: Option<u64>,
    pub finalized_at: Option<u64>,
}

impl Wager {
    pub fn is_awaiting(&self) -> bool {
        self.status == WagerStatus::AwaitingRandomness
    }
}

/// In-memory wager store with monotonic id assignment
pub struct WagerStore {
    wagers: HashMap<u64, Wager>,
    next_id: AtomicU64,
}

impl WagerStore {
    pub fn new() -> Self {
        Self {
            wagers: HashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Reserve the next wager id. Ids start at 1 and are never reused.
    pub fn allocate_id(&self) -> WagerId {
        WagerId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn insert(&mut self, wager: Wager) {
        self.wagers.insert(wager.id.0, wager);
    }

    pub fn get(&self, id: WagerId) -> EngineResult<&Wager> {
        self.wagers
            .get(&id.0)
            .ok_or_else(|| ProtocolError::UnknownWager { wager_id: id.0 }.into())
    }

    pub fn get_mut(&mut self, id: WagerId) -> EngineResult<&mut Wager> {
        self.wagers
            .get_mut(&id.0)
            .ok_or_else(|| ProtocolError::UnknownWager { wager_id: id.0 }.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Wager> {
        self.wagers.values()
    }

    /// Ids of awaiting wagers placed at or before the cutoff.
    pub fn awaiting_placed_before(&self, cutoff: u64) -> Vec<WagerId> {
        let mut ids: Vec<WagerId> = self
            .wagers
            .values()
            .filter(|w| w.is_awaiting() && w.placed_at <= cutoff)
            .map(|w| w.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.wagers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wagers.is_empty()
    }
}

impl Default for WagerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modulo_round_trip() {
        for kind in GameKind::all() {
            assert_eq!(GameKind::from_modulo(kind.modulo()), Some(kind));
        }
        assert_eq!(GameKind::from_modulo(7), None);
        assert_eq!(GameKind::from_modulo(0), None);
    }

    #[test]
    fn test_mask_class_boundary() {
        assert!(GameKind::CoinFlip.uses_mask());
        assert!(GameKind::Roulette.uses_mask());
        assert!(!GameKind::HashRoll.uses_mask());
    }

    #[test]
    fn test_mask_selection_validation() {
        assert!(Selection::Mask(0b01).validate_for(GameKind::CoinFlip).is_ok());
        assert!(Selection::Mask(0b11).validate_for(GameKind::CoinFlip).is_ok());

        // Zero mask and out-of-range bits are rejected.
        assert!(Selection::Mask(0).validate_for(GameKind::CoinFlip).is_err());
        assert!(Selection::Mask(0b100).validate_for(GameKind::CoinFlip).is_err());
        assert!(Selection::Mask(1 << 37).validate_for(GameKind::Roulette).is_err());

        // Masks are not legal for threshold-class games.
        assert!(Selection::Mask(0b1).validate_for(GameKind::HashRoll).is_err());
    }

    #[test]
    fn test_threshold_selection_validation() {
        let under = Selection::Threshold { value: 50, over: false };
        assert!(under.validate_for(GameKind::HashRoll).is_ok());

        let edge_low = Selection::Threshold { value: 0, over: true };
        assert!(edge_low.validate_for(GameKind::HashRoll).is_err());

        let edge_high = Selection::Threshold { value: 100, over: false };
        assert!(edge_high.validate_for(GameKind::HashRoll).is_err());

        // Thresholds are not legal for mask-class games.
        assert!(under.validate_for(GameKind::Dice).is_err());
    }

    #[test]
    fn test_selection_roll_edge() {
        assert_eq!(Selection::Mask(0b101101).roll_edge(), 4);
        assert_eq!(
            Selection::Threshold { value: 42, over: true }.roll_edge(),
            42
        );
    }

    #[test]
    fn test_mask_win_is_bit_membership() {
        let sel = Selection::Mask(0b100101);
        assert!(sel.wins(0));
        assert!(sel.wins(2));
        assert!(sel.wins(5));
        assert!(!sel.wins(1));
        assert!(!sel.wins(4));
    }

    #[test]
    fn test_threshold_win_is_strict() {
        let over = Selection::Threshold { value: 50, over: true };
        assert!(over.wins(51));
        assert!(!over.wins(50));
        assert!(!over.wins(49));

        let under = Selection::Threshold { value: 50, over: false };
        assert!(under.wins(49));
        assert!(!under.wins(50));
        assert!(!under.wins(51));
    }

    #[test]
    fn test_store_ids_are_monotonic() {
        let store = WagerStore::new();
        let a = store.allocate_id();
        let b = store.allocate_id();
        let c = store.allocate_id();
        assert_eq!(a, WagerId(1));
        assert_eq!(b, WagerId(2));
        assert_eq!(c, WagerId(3));
    }

    #[test]
    fn test_store_unknown_wager() {
        let store = WagerStore::new();
        let err = store.get(WagerId(99)).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownWager { wager_id: 99 }.into()
        );
    }

    #[test]
    fn test_status_terminality() {
        assert!(!WagerStatus::AwaitingRandomness.is_terminal());
        assert!(WagerStatus::Settled.is_terminal());
        assert!(WagerStatus::Refunded.is_terminal());
    }
}
