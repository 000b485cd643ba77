use crate::Costs;

/// Execution mode selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Live,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Backtest => write!(f, "backtest"),
            RunMode::Live => write!(f, "live"),
        }
    }
}

/// Which persistence adapter backs live crash recovery.
#[derive(Debug, Clone)]
pub enum StateBackend {
    /// Atomic-rename JSON files under the given directory.
    File(String),
    /// Sqlite database at the given URL.
    Sqlite(String),
}

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    pub run_mode: RunMode,
    pub state_backend: StateBackend,
    /// Live tick cadence in seconds.
    pub tick_secs: u64,
    /// Path of the TOML schema file (strategies, frames, risk, sizing, ...).
    pub schema_path: String,
    /// Optional JSON candle seed for the replay exchange, symbol -> candles.
    pub candles_path: Option<String>,
    pub costs: Costs,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let run_mode = match required_env("SIGIL_MODE").to_lowercase().as_str() {
            "backtest" => RunMode::Backtest,
            "live" => RunMode::Live,
            other => panic!("ERROR: SIGIL_MODE must be 'backtest' or 'live', got: '{other}'"),
        };

        let state_backend = match optional_env("DATABASE_URL") {
            Some(url) => StateBackend::Sqlite(url),
            None => StateBackend::File(
                optional_env("SIGIL_STATE_DIR").unwrap_or_else(|| "state".to_string()),
            ),
        };

        Config {
            run_mode,
            state_backend,
            tick_secs: optional_env("SIGIL_TICK_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            schema_path: optional_env("SIGIL_SCHEMA_PATH")
                .unwrap_or_else(|| "config/schemas.toml".to_string()),
            candles_path: optional_env("SIGIL_CANDLES_PATH"),
            costs: Costs {
                fee_pct: optional_env("SIGIL_FEE_PCT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.1),
                slippage_pct: optional_env("SIGIL_SLIPPAGE_PCT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.1),
            },
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
