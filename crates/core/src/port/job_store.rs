// Job Store Port
// One persisted record per job, keyed by job name

use async_trait::async_trait;

use crate::domain::{JobLoadError, JobRecord};
use crate::error::Result;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Read a record.
    ///
    /// # Errors
    /// - JobLoadError::NoFile if no record exists
    /// - JobLoadError::NoData if the record is empty or corrupt
    async fn load(&self, name: &str) -> std::result::Result<JobRecord, JobLoadError>;

    /// Write (or overwrite) a record
    async fn save(&self, record: &JobRecord) -> Result<()>;

    /// Delete a record. Returns false if there was nothing to delete.
    async fn remove(&self, name: &str) -> Result<bool>;

    async fn exists(&self, name: &str) -> bool;

    /// Names of all persisted records
    async fn list(&self) -> Result<Vec<String>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// In-memory job store. `None` entries model corrupt records.
    #[derive(Default)]
    pub struct InMemoryJobStore {
        records: Arc<Mutex<BTreeMap<String, Option<JobRecord>>>>,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, record: JobRecord) {
            self.records
                .lock()
                .unwrap()
                .insert(record.name.clone(), Some(record));
        }

        pub fn insert_corrupt(&self, name: &str) {
            self.records.lock().unwrap().insert(name.to_string(), None);
        }

        pub fn get(&self, name: &str) -> Option<JobRecord> {
            self.records.lock().unwrap().get(name).cloned().flatten()
        }

        pub fn len(&self) -> usize {
            self.records.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn load(&self, name: &str) -> std::result::Result<JobRecord, JobLoadError> {
            match self.records.lock().unwrap().get(name) {
                None => Err(JobLoadError::NoFile),
                Some(None) => Err(JobLoadError::NoData),
                Some(Some(record)) => Ok(record.clone()),
            }
        }

        async fn save(&self, record: &JobRecord) -> Result<()> {
            self.insert(record.clone());
            Ok(())
        }

        async fn remove(&self, name: &str) -> Result<bool> {
            Ok(self.records.lock().unwrap().remove(name).is_some())
        }

        async fn exists(&self, name: &str) -> bool {
            self.records.lock().unwrap().contains_key(name)
        }

        async fn list(&self) -> Result<Vec<String>> {
            Ok(self.records.lock().unwrap().keys().cloned().collect())
        }
    }
}
