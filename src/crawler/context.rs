//! State shared by every job of a run

use crate::config::Config;
use crate::crawler::fetcher::{ApiRequest, ApiResponse, Fetcher, TransportError};
use crate::crawler::scheduler::Scheduler;
use crate::media::MediaTool;
use crate::storage::{SqliteStorage, StorageError};
use std::sync::{Arc, Mutex};

/// Everything a traversal job needs, built once per run
pub struct RunContext {
    pub config: Arc<Config>,
    pub fetcher: Fetcher,
    pub scheduler: Arc<Scheduler>,
    pub storage: Arc<Mutex<SqliteStorage>>,
    /// Present only if the tool was found and is recent enough
    pub media: Option<MediaTool>,
}

impl RunContext {
    /// Sends a request through the scheduler
    pub async fn get(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let response = self
            .scheduler
            .execute(|| self.fetcher.send(request))
            .await?;
        self.scheduler.observe(&response.rate_limit).await;
        Ok(response)
    }

    /// Runs `f` with exclusive access to the store
    ///
    /// The lock is never held across an await point.
    pub fn with_storage<T, E>(
        &self,
        f: impl FnOnce(&mut SqliteStorage) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        let mut guard = self
            .storage
            .lock()
            .map_err(|_| StorageError::Database("storage lock poisoned".to_string()))?;
        f(&mut guard)
    }
}
