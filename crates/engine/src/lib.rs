pub mod backtest;
pub mod live;
pub mod oracle;
pub mod tracker;
pub mod walker;

pub use backtest::BacktestLoop;
pub use live::{LiveHandle, LiveLoop};
pub use oracle::PriceOracle;
pub use tracker::{SignalHandle, SignalTracker, TrackerConfig};
pub use walker::Walker;
