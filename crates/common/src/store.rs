use async_trait::async_trait;

use crate::{PersistedSignal, Result};

/// Durable storage of one signal record per tracked symbol.
///
/// This is the only state the core requires to survive a process restart.
/// `write_signal_data` must be atomic: no reader may ever observe a
/// partially written record. A write failure is recoverable — the in-memory
/// signal stays authoritative and the live loop retries on its next tick —
/// but recovery data is at risk until a write succeeds.
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn write_signal_data(&self, symbol: &str, record: &PersistedSignal) -> Result<()>;

    async fn read_signal_data(&self, symbol: &str) -> Result<Option<PersistedSignal>>;

    /// Remove the record after a terminal close so a finished run is not
    /// resurrected on the next start.
    async fn clear_signal_data(&self, symbol: &str) -> Result<()>;
}
