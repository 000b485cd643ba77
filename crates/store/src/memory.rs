use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use common::{Error, PersistedSignal, Result, SignalStore};

/// In-memory adapter for tests. `fail_writes` lets a test simulate a broken
/// backend to exercise the recoverable-error path of the live loop.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PersistedSignal>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn write_signal_data(&self, symbol: &str, record: &PersistedSignal) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("injected write failure".into()));
        }
        self.records
            .write()
            .await
            .insert(symbol.to_string(), record.clone());
        Ok(())
    }

    async fn read_signal_data(&self, symbol: &str) -> Result<Option<PersistedSignal>> {
        Ok(self.records.read().await.get(symbol).cloned())
    }

    async fn clear_signal_data(&self, symbol: &str) -> Result<()> {
        self.records.write().await.remove(symbol);
        Ok(())
    }
}
