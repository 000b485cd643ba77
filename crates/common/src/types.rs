use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Schema version tag written alongside every persisted signal record.
/// Bumped whenever the serialized layout of [`Signal`] changes.
pub const PERSIST_SCHEMA_VERSION: u32 = 1;

/// Number of one-minute candles the price oracle averages over.
pub const VWAP_WINDOW: usize = 5;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Long,
    Short,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Long => write!(f, "long"),
            TradeAction::Short => write!(f, "short"),
        }
    }
}

/// Why a signal was closed. Set exactly once, on the transition into closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpired,
    Manual,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TimeExpired => write!(f, "time_expired"),
            CloseReason::Manual => write!(f, "manual"),
        }
    }
}

/// Which side of the position a partial fill realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillDirection {
    Profit,
    Loss,
}

/// One partial close of an open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialFill {
    /// Percent of the original size closed by this fill, in (0, 100].
    pub fraction: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub direction: FillDirection,
}

/// The open side of a signal. Distances are captured once at open time and
/// never mutated; all trailing adjustments derive from them so repeated
/// shifts cannot compound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub action: TradeAction,
    pub entry_price: f64,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub opened_at: DateTime<Utc>,
    pub original_take_profit_distance: f64,
    pub original_stop_loss_distance: f64,
    #[serde(default)]
    pub partial_fills: Vec<PartialFill>,
    #[serde(default)]
    pub breakeven_applied: bool,
}

impl Position {
    /// Cumulative percent of the position already closed by partial fills.
    pub fn filled_fraction(&self) -> f64 {
        self.partial_fills.iter().map(|f| f.fraction).sum()
    }
}

/// Lifecycle state of a signal. Each variant carries only the fields that
/// are meaningful in that state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SignalPhase {
    Idle,
    Scheduled {
        action: TradeAction,
        target_price: f64,
        take_profit: f64,
        stop_loss: f64,
        placed_at: DateTime<Utc>,
    },
    Opened {
        position: Position,
    },
    Active {
        position: Position,
    },
    Closed {
        position: Position,
        close_price: f64,
        closed_at: DateTime<Utc>,
        reason: CloseReason,
    },
}

impl SignalPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SignalPhase::Idle => "idle",
            SignalPhase::Scheduled { .. } => "scheduled",
            SignalPhase::Opened { .. } => "opened",
            SignalPhase::Active { .. } => "active",
            SignalPhase::Closed { .. } => "closed",
        }
    }

    /// True while the signal still needs ticks to resolve: scheduled,
    /// opened or active. Idle and closed are safe points to exit at.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SignalPhase::Scheduled { .. } | SignalPhase::Opened { .. } | SignalPhase::Active { .. }
        )
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            SignalPhase::Opened { position }
            | SignalPhase::Active { position }
            | SignalPhase::Closed { position, .. } => Some(position),
            _ => None,
        }
    }
}

/// Snapshot of one tracked signal, emitted after every tick evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
    pub phase: SignalPhase,
    pub last_transition_at: Option<DateTime<Utc>>,
}

/// Per-iteration evaluation context. Built fresh by the tick loop and
/// discarded after the pass; never persisted.
#[derive(Debug, Clone)]
pub struct TickContext {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub backtest: bool,
}

/// The durable record: exactly the serialized signal plus a version tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSignal {
    pub version: u32,
    pub signal: Signal,
}

impl PersistedSignal {
    pub fn new(signal: Signal) -> Self {
        Self {
            version: PERSIST_SCHEMA_VERSION,
            signal,
        }
    }
}

/// One OHLCV candle as returned by the exchange capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order book snapshot: price/quantity levels, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// Throttle granularity for new entry transitions.
///
/// Serializes as the canonical "1m"/"1h" form; deserialization goes through
/// [`Interval::parse`] and also accepts the unit-first "m1"/"h1" spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
}

impl Interval {
    pub fn as_duration(&self) -> Duration {
        match self {
            Interval::M1 => Duration::minutes(1),
            Interval::M3 => Duration::minutes(3),
            Interval::M5 => Duration::minutes(5),
            Interval::M15 => Duration::minutes(15),
            Interval::M30 => Duration::minutes(30),
            Interval::H1 => Duration::hours(1),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1m" | "m1" => Some(Interval::M1),
            "3m" | "m3" => Some(Interval::M3),
            "5m" | "m5" => Some(Interval::M5),
            "15m" | "m15" => Some(Interval::M15),
            "30m" | "m30" => Some(Interval::M30),
            "1h" | "h1" => Some(Interval::H1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
        };
        write!(f, "{s}")
    }
}

impl Serialize for Interval {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Interval::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown interval '{raw}'")))
    }
}

/// Per-leg trading costs, in percent of notional.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Costs {
    pub fee_pct: f64,
    pub slippage_pct: f64,
}

impl Costs {
    /// Total round-trip cost (both legs) as a percent of notional.
    pub fn round_trip_pct(&self) -> f64 {
        2.0 * (self.fee_pct + self.slippage_pct)
    }
}

impl Default for Costs {
    fn default() -> Self {
        Self {
            fee_pct: 0.1,
            slippage_pct: 0.1,
        }
    }
}

/// Emitted on the done channels when a tick loop terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub backtest: bool,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_durations() {
        assert_eq!(Interval::M1.as_duration(), Duration::minutes(1));
        assert_eq!(Interval::M30.as_duration(), Duration::minutes(30));
        assert_eq!(Interval::H1.as_duration(), Duration::hours(1));
    }

    #[test]
    fn interval_parse_accepts_both_spellings() {
        assert_eq!(Interval::parse("5m"), Some(Interval::M5));
        assert_eq!(Interval::parse("M15"), Some(Interval::M15));
        assert_eq!(Interval::parse("1h"), Some(Interval::H1));
        assert_eq!(Interval::parse("2h"), None);
    }

    #[test]
    fn interval_serde_goes_through_parse() {
        assert_eq!(serde_json::from_str::<Interval>("\"1m\"").unwrap(), Interval::M1);
        assert_eq!(serde_json::from_str::<Interval>("\"m15\"").unwrap(), Interval::M15);
        assert_eq!(serde_json::to_string(&Interval::H1).unwrap(), "\"1h\"");
        assert!(serde_json::from_str::<Interval>("\"2h\"").is_err());
    }

    #[test]
    fn filled_fraction_sums_partials() {
        let mut position = Position {
            action: TradeAction::Long,
            entry_price: 100.0,
            take_profit: 110.0,
            stop_loss: 95.0,
            opened_at: Utc::now(),
            original_take_profit_distance: 10.0,
            original_stop_loss_distance: 5.0,
            partial_fills: Vec::new(),
            breakeven_applied: false,
        };
        assert_eq!(position.filled_fraction(), 0.0);

        position.partial_fills.push(PartialFill {
            fraction: 25.0,
            price: 105.0,
            timestamp: Utc::now(),
            direction: FillDirection::Profit,
        });
        position.partial_fills.push(PartialFill {
            fraction: 30.0,
            price: 106.0,
            timestamp: Utc::now(),
            direction: FillDirection::Profit,
        });
        assert!((position.filled_fraction() - 55.0).abs() < 1e-9);
    }

    #[test]
    fn phase_serde_roundtrip_keeps_state_tag() {
        let phase = SignalPhase::Scheduled {
            action: TradeAction::Short,
            target_price: 200.0,
            take_profit: 190.0,
            stop_loss: 205.0,
            placed_at: Utc::now(),
        };
        let json = serde_json::to_string(&phase).unwrap();
        assert!(json.contains("\"state\":\"scheduled\""));
        let back: SignalPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "scheduled");
    }
}
