use std::sync::Arc;

use super::{ResultStore, StorageResult, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StoragesStatus {
    #[default]
    Created,
    Initialized,
    Finalized,
}

enum ManagedStorage {
    Tasks(Arc<dyn TaskStore>),
    Results(Arc<dyn ResultStore>),
}

impl ManagedStorage {
    async fn initialize(&self) -> StorageResult<()> {
        match self {
            ManagedStorage::Tasks(storage) => storage.initialize().await,
            ManagedStorage::Results(storage) => storage.initialize().await,
        }
    }

    async fn finalize(&self) -> StorageResult<()> {
        match self {
            ManagedStorage::Tasks(storage) => storage.finalize().await,
            ManagedStorage::Results(storage) => storage.finalize().await,
        }
    }
}

/// Initializes registered stores one after another, in registration order.
#[derive(Default)]
pub struct StorageManager {
    status: StoragesStatus,
    storages: Vec<ManagedStorage>,
}

impl StorageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tasks(&mut self, storage: Arc<dyn TaskStore>) {
        self.storages.push(ManagedStorage::Tasks(storage));
    }

    pub fn register_results(&mut self, storage: Arc<dyn ResultStore>) {
        self.storages.push(ManagedStorage::Results(storage));
    }

    pub async fn initialize_all(&mut self) -> StorageResult<()> {
        if self.status == StoragesStatus::Initialized {
            return Ok(());
        }

        for storage in &self.storages {
            storage.initialize().await?;
        }

        self.status = StoragesStatus::Initialized;
        Ok(())
    }

    pub async fn finalize_all(&mut self) -> StorageResult<()> {
        if self.status != StoragesStatus::Initialized {
            return Ok(());
        }

        for storage in &self.storages {
            storage.finalize().await?;
        }

        self.status = StoragesStatus::Finalized;
        Ok(())
    }
}
