use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use common::{Error, PersistedSignal, Result, SignalStore};

/// One JSON file per symbol under a state directory.
///
/// Writes go to a `.tmp` sibling first and are moved into place with
/// `rename`, which is atomic on the same filesystem, so a reader never sees
/// a half-written record even if the process dies mid-write.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.json"))
    }
}

#[async_trait]
impl SignalStore for FileStore {
    async fn write_signal_data(&self, symbol: &str, record: &PersistedSignal) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(symbol);
        let tmp = self.dir.join(format!("{symbol}.json.tmp"));

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::Persistence(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Persistence(format!("rename into {}: {e}", path.display())))?;

        debug!(symbol, path = %path.display(), "signal record written");
        Ok(())
    }

    async fn read_signal_data(&self, symbol: &str) -> Result<Option<PersistedSignal>> {
        let path = self.record_path(symbol);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!("read {}: {e}", path.display()))),
        }
    }

    async fn clear_signal_data(&self, symbol: &str) -> Result<()> {
        let path = self.record_path(symbol);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!("remove {}: {e}", path.display()))),
        }
    }
}
