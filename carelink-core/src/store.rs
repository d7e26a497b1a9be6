//! Single-slot store for the upstream session resumption handle
//!
//! One record exists at a time. The most recent handle wins, and a handle is
//! only usable while younger than the resume window. Storage failures are
//! logged and surface as an absent record, never as an error to the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Source of "now", injectable so expiry is testable without sleeping
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap_or_default();
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Durable cache of the most recent resumable session handle
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the handle if one is saved and still inside the resume window
    async fn load(&self) -> Option<String>;

    /// Overwrites the slot with `handle` and a fresh timestamp
    async fn save(&self, handle: &str);

    /// Empties the slot. Idempotent.
    async fn clear(&self);
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HandleRecord {
    #[serde(default)]
    previous_session_handle: Option<String>,
    #[serde(default)]
    session_time: Option<DateTime<Utc>>,
}

/// File-backed session store, one JSON file, atomic overwrite
pub struct FileSessionStore {
    path: PathBuf,
    resume_window: Duration,
    clock: Arc<dyn Clock>,
    // serializes file operations from concurrent bridges
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>, resume_window: Duration) -> Self {
        Self::with_clock(path, resume_window, Arc::new(SystemClock))
    }

    pub fn with_clock(
        path: impl Into<PathBuf>,
        resume_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            path: path.into(),
            resume_window,
            clock,
            lock: Mutex::new(()),
        }
    }

    async fn read_record(&self) -> Result<HandleRecord, StoreError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(StoreError::Storage)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn write_record(&self, record: &HandleRecord) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(StoreError::Storage)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(StoreError::Storage)?;
        Ok(())
    }

    fn is_fresh(&self, saved_at: DateTime<Utc>) -> bool {
        match self.clock.now().signed_duration_since(saved_at).to_std() {
            Ok(age) => age < self.resume_window,
            // saved_at in the future; treat as fresh
            Err(_) => true,
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Option<String> {
        let _guard = self.lock.lock().await;
        let record = match self.read_record().await {
            Ok(record) => record,
            Err(StoreError::Storage(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved session handle at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read session handle, starting fresh: {e}");
                return None;
            }
        };

        let handle = record.previous_session_handle?;
        match record.session_time {
            Some(saved_at) if self.is_fresh(saved_at) => Some(handle),
            Some(saved_at) => {
                debug!("Saved session handle expired (saved at {saved_at})");
                None
            }
            None => None,
        }
    }

    async fn save(&self, handle: &str) {
        let _guard = self.lock.lock().await;
        let record = HandleRecord {
            previous_session_handle: Some(handle.to_string()),
            session_time: Some(self.clock.now()),
        };
        if let Err(e) = self.write_record(&record).await {
            warn!("Failed to save session handle: {e}");
        }
    }

    async fn clear(&self) {
        let _guard = self.lock.lock().await;
        if let Err(e) = self.write_record(&HandleRecord::default()).await {
            warn!("Failed to clear session handle: {e}");
        }
    }
}

/// In-memory store for tests and single-process setups
pub struct MemorySessionStore {
    record: Mutex<Option<(String, DateTime<Utc>)>>,
    resume_window: Duration,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    pub fn new(resume_window: Duration) -> Self {
        Self::with_clock(resume_window, Arc::new(SystemClock))
    }

    pub fn with_clock(resume_window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            record: Mutex::new(None),
            resume_window,
            clock,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Option<String> {
        let record = self.record.lock().await;
        let (handle, saved_at) = record.as_ref()?;
        let age = self
            .clock
            .now()
            .signed_duration_since(*saved_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age < self.resume_window {
            Some(handle.clone())
        } else {
            None
        }
    }

    async fn save(&self, handle: &str) {
        let mut record = self.record.lock().await;
        *record = Some((handle.to_string(), self.clock.now()));
    }

    async fn clear(&self) {
        let mut record = self.record.lock().await;
        *record = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_store(dir: &TempDir, window: Duration, clock: Arc<ManualClock>) -> FileSessionStore {
        FileSessionStore::with_clock(dir.path().join("session.json"), window, clock)
    }

    #[tokio::test]
    async fn save_then_load_returns_handle() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = file_store(&dir, Duration::from_secs(60), clock);

        store.save("T1").await;
        assert_eq!(store.load().await, Some("T1".to_string()));
    }

    #[tokio::test]
    async fn load_after_expiry_window_returns_absent() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = file_store(&dir, Duration::from_secs(60), clock.clone());

        store.save("T1").await;
        clock.advance(Duration::from_secs(120));
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn load_just_inside_window_returns_handle() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = file_store(&dir, Duration::from_secs(60), clock.clone());

        store.save("T1").await;
        clock.advance(Duration::from_secs(10));
        assert_eq!(store.load().await, Some("T1".to_string()));
    }

    #[tokio::test]
    async fn missing_file_returns_absent() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = file_store(&dir, Duration::from_secs(60), clock);

        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn corrupt_file_returns_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, b"{{{not json").await.unwrap();
        let store = FileSessionStore::with_clock(
            path,
            Duration::from_secs(60),
            Arc::new(ManualClock::new(Utc::now())),
        );

        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = file_store(&dir, Duration::from_secs(60), clock);

        store.save("T1").await;
        store.clear().await;
        assert_eq!(store.load().await, None);
        store.clear().await;
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn save_overwrites_previous_handle() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = file_store(&dir, Duration::from_secs(60), clock);

        store.save("T1").await;
        store.save("T2").await;
        assert_eq!(store.load().await, Some("T2".to_string()));
    }

    #[tokio::test]
    async fn file_uses_original_field_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSessionStore::with_clock(
            path.clone(),
            Duration::from_secs(60),
            Arc::new(ManualClock::new(Utc::now())),
        );

        store.save("T1").await;
        let bytes = tokio::fs::read(&path).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["previous_session_handle"], "T1");
        assert!(json["session_time"].is_string());
    }

    #[tokio::test]
    async fn memory_store_expires_like_file_store() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemorySessionStore::with_clock(Duration::from_secs(60), clock.clone());

        store.save("T1").await;
        assert_eq!(store.load().await, Some("T1".to_string()));
        clock.advance(Duration::from_secs(61));
        assert_eq!(store.load().await, None);
    }
}
