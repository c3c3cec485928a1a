use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Integer minor units (cents, lamports, ...). Stakes and payouts never go negative.
pub type Amount = u64;

/// Lifecycle of a round. `Closed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    Pending,
    Open,
    Closed,
}

impl RoundState {
    /// Pending and open rounds occupy the single active-round slot.
    pub fn is_active(self) -> bool {
        !matches!(self, RoundState::Closed)
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Pending => write!(f, "pending"),
            RoundState::Open => write!(f, "open"),
            RoundState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a round was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    Deadline,
    Forced,
}

/// Parity-style class of an outcome value.
///
/// `Green` holds zero and every odd value, `Red` holds the nonzero even values,
/// so on a 0-9 range green covers six outcomes and red four.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ParityClass {
    Green,
    Red,
}

impl ParityClass {
    pub fn of(value: u8) -> Self {
        if value == 0 || value % 2 == 1 {
            ParityClass::Green
        } else {
            ParityClass::Red
        }
    }
}

impl fmt::Display for ParityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParityClass::Green => write!(f, "green"),
            ParityClass::Red => write!(f, "red"),
        }
    }
}

/// Magnitude class: values at or above the midpoint of the range are high.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MagnitudeClass {
    Low,
    High,
}

impl MagnitudeClass {
    pub fn of(value: u8, range: u8) -> Self {
        if value >= range / 2 {
            MagnitudeClass::High
        } else {
            MagnitudeClass::Low
        }
    }
}

impl fmt::Display for MagnitudeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MagnitudeClass::Low => write!(f, "low"),
            MagnitudeClass::High => write!(f, "high"),
        }
    }
}

/// Resolved result of a closed round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outcome {
    pub value: u8,
    pub parity: ParityClass,
    pub magnitude: MagnitudeClass,
}

impl Outcome {
    /// Classify a drawn value. Pure: the same value and range always classify identically.
    pub fn from_value(value: u8, range: u8) -> Self {
        Self {
            value,
            parity: ParityClass::of(value),
            magnitude: MagnitudeClass::of(value, range),
        }
    }
}

/// One instance of the repeating timed betting event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: Uuid,
    /// Human-facing round number, strictly increasing and never reused
    pub sequence_number: u64,
    pub state: RoundState,
    pub created_at: DateTime<Utc>,
    /// When betting is scheduled to begin
    pub open_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    /// Duration captured from configuration when the round opened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closes_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_by: Option<CloseReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_override: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
}

impl Round {
    /// A freshly created round waiting `start_delay` before betting opens
    pub fn pending(sequence_number: u64, now: DateTime<Utc>, start_delay: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence_number,
            state: RoundState::Pending,
            created_at: now,
            open_at: now + start_delay,
            opened_at: None,
            duration_secs: None,
            closes_at: None,
            closed_at: None,
            closed_by: None,
            outcome_override: None,
            outcome: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Deadline for betting. Uses the duration captured at opening when present.
    pub fn deadline(&self, configured_duration_secs: u64) -> DateTime<Utc> {
        self.closes_at.unwrap_or_else(|| {
            self.open_at + Duration::seconds(configured_duration_secs as i64)
        })
    }
}

/// Wager category; each carries a fixed payout multiplier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WagerCategory {
    ExactValue,
    Parity,
    Magnitude,
}

impl WagerCategory {
    pub fn multiplier(self) -> u64 {
        match self {
            WagerCategory::ExactValue => 9,
            WagerCategory::Parity => 2,
            WagerCategory::Magnitude => 2,
        }
    }
}

impl fmt::Display for WagerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerCategory::ExactValue => write!(f, "exact_value"),
            WagerCategory::Parity => write!(f, "parity"),
            WagerCategory::Magnitude => write!(f, "magnitude"),
        }
    }
}

/// What the wager backs: a category together with its selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "category", content = "selector", rename_all = "snake_case")]
pub enum Selection {
    ExactValue(u8),
    Parity(ParityClass),
    Magnitude(MagnitudeClass),
}

impl Selection {
    pub fn category(&self) -> WagerCategory {
        match self {
            Selection::ExactValue(_) => WagerCategory::ExactValue,
            Selection::Parity(_) => WagerCategory::Parity,
            Selection::Magnitude(_) => WagerCategory::Magnitude,
        }
    }

    pub fn wins_on(&self, outcome: &Outcome) -> bool {
        match *self {
            Selection::ExactValue(value) => value == outcome.value,
            Selection::Parity(class) => class == outcome.parity,
            Selection::Magnitude(class) => class == outcome.magnitude,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::ExactValue(value) => write!(f, "exact_value:{}", value),
            Selection::Parity(class) => write!(f, "parity:{}", class),
            Selection::Magnitude(class) => write!(f, "magnitude:{}", class),
        }
    }
}

/// Settlement status tracking
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Won,
    Lost,
}

/// A single account's stake on a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wager {
    pub id: Uuid,
    pub round_id: Uuid,
    pub account_id: String,
    pub selection: Selection,
    pub stake: Amount,
    pub settlement: SettlementStatus,
    pub payout: Amount,
    pub placed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Wager {
    pub fn new(
        round_id: Uuid,
        account_id: impl Into<String>,
        selection: Selection,
        stake: Amount,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            round_id,
            account_id: account_id.into(),
            selection,
            stake,
            settlement: SettlementStatus::Pending,
            payout: 0,
            placed_at,
            settled_at: None,
        }
    }

    pub fn category(&self) -> WagerCategory {
        self.selection.category()
    }
}

/// Reason tag attached to every ledger movement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LedgerReason {
    Stake,
    Win,
    Refund,
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerReason::Stake => write!(f, "stake"),
            LedgerReason::Win => write!(f, "win"),
            LedgerReason::Refund => write!(f, "refund"),
        }
    }
}

/// References carried with a ledger call so every entry points back at its wager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerMemo {
    pub reason: LedgerReason,
    pub round_id: Uuid,
    pub wager_id: Uuid,
}

impl LedgerMemo {
    pub fn stake(wager: &Wager) -> Self {
        Self { reason: LedgerReason::Stake, round_id: wager.round_id, wager_id: wager.id }
    }

    pub fn win(wager: &Wager) -> Self {
        Self { reason: LedgerReason::Win, round_id: wager.round_id, wager_id: wager.id }
    }

    pub fn refund(wager: &Wager) -> Self {
        Self { reason: LedgerReason::Refund, round_id: wager.round_id, wager_id: wager.id }
    }
}

/// Record kept by the ledger collaborator; the engine references it but does not own it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: String,
    /// Signed: stakes are negative, wins and refunds positive
    pub amount: i64,
    pub reason: LedgerReason,
    pub round_id: Uuid,
    pub wager_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}
