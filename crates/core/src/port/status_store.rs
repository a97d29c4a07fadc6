// Status Store Port
//
// Durable per-kind status document guarded by an exclusive, non-blocking
// lock. How the lock is taken (advisory file lock, in-memory flag) is an
// adapter detail.

use crate::domain::{QueueKind, StatusDocument};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Read the current document without taking the write lock.
    ///
    /// Never blocks. While another holder writes, adapters may serve the last
    /// snapshot they observed; `AppError::Busy` only when they have none.
    /// `None` means the queue is idle.
    async fn read(&self, kind: QueueKind) -> Result<Option<StatusDocument>>;

    /// Take the exclusive lock without waiting and read the document under it.
    ///
    /// Returns `AppError::Busy` when the lock is held elsewhere.
    async fn lock_and_read(
        &self,
        kind: QueueKind,
    ) -> Result<(Option<StatusDocument>, Box<dyn StatusLock>)>;

    /// Delete leftover artifacts matching the kind's glob inside the temp
    /// directory. Returns how many entries were removed.
    async fn remove_artifacts(&self, kind: QueueKind) -> Result<usize>;

    /// Resolve a plain file name inside the temp directory
    fn temp_path(&self, file_name: &str) -> Result<PathBuf>;
}

/// Exclusive hold on one status document. Dropping it releases the lock.
#[async_trait]
pub trait StatusLock: Send {
    /// Write the document and keep holding the lock
    async fn persist(&mut self, doc: &StatusDocument) -> Result<()>;

    /// Write the document and release the lock
    async fn commit(self: Box<Self>, doc: &StatusDocument) -> Result<()>;

    /// Release the lock without writing
    async fn release(self: Box<Self>) -> Result<()>;

    /// Delete the document, then release the lock
    async fn discard(self: Box<Self>) -> Result<()>;
}

/// Reject anything but a single plain path component
pub fn ensure_plain_file_name(file_name: &str) -> Result<()> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(AppError::Validation(format!(
            "'{}' is not a plain file name inside the temp directory",
            file_name
        ))),
    }
}

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Shared {
        documents: HashMap<QueueKind, StatusDocument>,
        locked: HashSet<QueueKind>,
        writes: usize,
    }

    /// In-memory StatusStore for testing. Lock contention is emulated with a
    /// per-kind flag, so it reports Busy exactly like the file adapter.
    #[derive(Clone)]
    pub struct InMemoryStatusStore {
        shared: Arc<Mutex<Shared>>,
        temp_dir: PathBuf,
    }

    impl InMemoryStatusStore {
        pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
            Self {
                shared: Arc::new(Mutex::new(Shared::default())),
                temp_dir: temp_dir.into(),
            }
        }

        /// Seed a document
        pub fn insert(&self, doc: StatusDocument) {
            self.shared.lock().unwrap().documents.insert(doc.kind, doc);
        }

        pub fn document(&self, kind: QueueKind) -> Option<StatusDocument> {
            self.shared.lock().unwrap().documents.get(&kind).cloned()
        }

        /// Simulate another worker holding the lock
        pub fn hold_lock(&self, kind: QueueKind) -> bool {
            self.shared.lock().unwrap().locked.insert(kind)
        }

        pub fn drop_lock(&self, kind: QueueKind) {
            self.shared.lock().unwrap().locked.remove(&kind);
        }

        pub fn is_locked(&self, kind: QueueKind) -> bool {
            self.shared.lock().unwrap().locked.contains(&kind)
        }

        pub fn write_count(&self) -> usize {
            self.shared.lock().unwrap().writes
        }
    }

    #[async_trait]
    impl StatusStore for InMemoryStatusStore {
        async fn read(&self, kind: QueueKind) -> Result<Option<StatusDocument>> {
            Ok(self.document(kind))
        }

        async fn lock_and_read(
            &self,
            kind: QueueKind,
        ) -> Result<(Option<StatusDocument>, Box<dyn StatusLock>)> {
            let mut shared = self.shared.lock().unwrap();
            if !shared.locked.insert(kind) {
                return Err(AppError::Busy(format!("{} queue is locked", kind)));
            }
            let doc = shared.documents.get(&kind).cloned();
            let lock = InMemoryLock {
                kind,
                shared: Arc::clone(&self.shared),
            };
            Ok((doc, Box::new(lock)))
        }

        async fn remove_artifacts(&self, _kind: QueueKind) -> Result<usize> {
            Ok(0)
        }

        fn temp_path(&self, file_name: &str) -> Result<PathBuf> {
            ensure_plain_file_name(file_name)?;
            Ok(self.temp_dir.join(file_name))
        }
    }

    struct InMemoryLock {
        kind: QueueKind,
        shared: Arc<Mutex<Shared>>,
    }

    impl Drop for InMemoryLock {
        fn drop(&mut self) {
            if let Ok(mut shared) = self.shared.lock() {
                shared.locked.remove(&self.kind);
            }
        }
    }

    #[async_trait]
    impl StatusLock for InMemoryLock {
        async fn persist(&mut self, doc: &StatusDocument) -> Result<()> {
            let mut shared = self.shared.lock().unwrap();
            shared.documents.insert(self.kind, doc.clone());
            shared.writes += 1;
            Ok(())
        }

        async fn commit(mut self: Box<Self>, doc: &StatusDocument) -> Result<()> {
            self.persist(doc).await
        }

        async fn release(self: Box<Self>) -> Result<()> {
            Ok(())
        }

        async fn discard(self: Box<Self>) -> Result<()> {
            self.shared.lock().unwrap().documents.remove(&self.kind);
            Ok(())
        }
    }
}
