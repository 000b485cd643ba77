pub mod config;
pub mod error;
pub mod exchange;
pub mod pnl;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeClient;
pub use store::SignalStore;
pub use types::*;
