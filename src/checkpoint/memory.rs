use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Checkpoint, CheckpointError, CursorStore};

/// In-process store for dry runs and tests. Progress is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    state: Mutex<Option<Checkpoint>>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `checkpoint`.
    #[must_use]
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            state: Mutex::new(Some(checkpoint)),
            saves: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Returns a copy of the stored checkpoint.
    pub async fn snapshot(&self) -> Option<Checkpoint> {
        self.state.lock().await.clone()
    }

    /// Returns how many times `save` succeeded.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        *self.state.lock().await = Some(checkpoint.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
