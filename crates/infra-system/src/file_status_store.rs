// File-backed StatusStore
//
// One `<kind>_status.json` per queue kind in the temp directory, guarded by
// a non-blocking flock(2). flock locks belong to the open file description,
// so two handles inside one process exclude each other as well.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use sarpras_core::domain::{QueueKind, StatusDocument};
use sarpras_core::error::{AppError, Result};
use sarpras_core::port::status_store::ensure_plain_file_name;
use sarpras_core::port::{StatusLock, StatusStore};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A concurrent clear can unlink the file between open and lock
const LOCK_ATTEMPTS: usize = 3;

type Snapshots = Arc<Mutex<HashMap<QueueKind, StatusDocument>>>;

pub struct FileStatusStore {
    dir: PathBuf,
    /// Last document this process saw per kind, served while a writer holds the lock
    snapshots: Snapshots,
}

impl FileStatusStore {
    /// Open (and create) the temp directory holding status files and artifacts
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let dir = dir.as_ref().canonicalize()?;
        Ok(Self {
            dir,
            snapshots: Arc::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn status_path(&self, kind: QueueKind) -> PathBuf {
        self.dir.join(kind.status_file_name())
    }

    fn snapshot(&self, kind: QueueKind) -> Option<StatusDocument> {
        self.snapshots
            .lock()
            .ok()
            .and_then(|snapshots| snapshots.get(&kind).cloned())
    }

    fn lock_exclusive(&self, kind: QueueKind, path: &Path) -> Result<Flock<File>> {
        for _ in 0..LOCK_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(locked) => locked,
                Err((_, Errno::EWOULDBLOCK)) => return Err(busy(kind)),
                Err((_, errno)) => return Err(lock_error(errno)),
            };

            // Make sure the path still names the inode we hold
            let held = locked.metadata()?;
            match std::fs::metadata(path) {
                Ok(current) if current.dev() == held.dev() && current.ino() == held.ino() => {
                    return Ok(locked)
                }
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(busy(kind))
    }
}

#[async_trait]
impl StatusStore for FileStatusStore {
    async fn read(&self, kind: QueueKind) -> Result<Option<StatusDocument>> {
        let path = self.status_path(kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                remember(&self.snapshots, kind, None);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut file = match Flock::lock(file, FlockArg::LockSharedNonblock) {
            Ok(file) => file,
            Err((_, Errno::EWOULDBLOCK)) => {
                debug!(kind = %kind, "Status file locked, serving last snapshot");
                return self.snapshot(kind).map(Some).ok_or_else(|| busy(kind));
            }
            Err((_, errno)) => return Err(lock_error(errno)),
        };

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let doc = parse_document(kind, &path, &content);
        remember(&self.snapshots, kind, doc.as_ref());
        Ok(doc)
    }

    async fn lock_and_read(
        &self,
        kind: QueueKind,
    ) -> Result<(Option<StatusDocument>, Box<dyn StatusLock>)> {
        let path = self.status_path(kind);
        let mut file = self.lock_exclusive(kind, &path)?;

        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let doc = parse_document(kind, &path, &content);
        remember(&self.snapshots, kind, doc.as_ref());
        debug!(kind = %kind, "Status lock acquired");

        let lock = FileStatusLock {
            kind,
            path,
            file,
            snapshots: Arc::clone(&self.snapshots),
        };
        Ok((doc, Box::new(lock)))
    }

    async fn remove_artifacts(&self, kind: QueueKind) -> Result<usize> {
        let dir = self.dir.to_str().ok_or_else(|| {
            AppError::Config(format!("Temp dir is not valid UTF-8: {}", self.dir.display()))
        })?;
        let pattern = format!("{}/{}", glob::Pattern::escape(dir), kind.artifact_glob());
        let entries = glob::glob(&pattern)
            .map_err(|e| AppError::Internal(format!("Invalid artifact pattern: {}", e)))?;
        let status_file = self.status_path(kind);

        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable artifact");
                    continue;
                }
            };
            if path == status_file {
                continue;
            }
            let resolved = match path.canonicalize() {
                Ok(resolved) => resolved,
                Err(_) => continue,
            };
            if !resolved.starts_with(&self.dir) || resolved == self.dir {
                warn!(path = %path.display(), "Refusing to remove artifact outside the temp dir");
                continue;
            }

            let result = if resolved.is_dir() {
                std::fs::remove_dir_all(&resolved)
            } else {
                std::fs::remove_file(&resolved)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            info!(kind = %kind, removed = removed, "Removed leftover artifacts");
        }
        Ok(removed)
    }

    fn temp_path(&self, file_name: &str) -> Result<PathBuf> {
        ensure_plain_file_name(file_name)?;
        Ok(self.dir.join(file_name))
    }
}

struct FileStatusLock {
    kind: QueueKind,
    path: PathBuf,
    file: Flock<File>,
    snapshots: Snapshots,
}

impl FileStatusLock {
    fn write(&mut self, doc: &StatusDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&bytes)?;
        self.file.sync_data()?;
        remember(&self.snapshots, self.kind, Some(doc));
        Ok(())
    }

    fn unlock(self) -> Result<()> {
        self.file
            .unlock()
            .map(drop)
            .map_err(|(_, errno)| lock_error(errno))
    }
}

#[async_trait]
impl StatusLock for FileStatusLock {
    async fn persist(&mut self, doc: &StatusDocument) -> Result<()> {
        self.write(doc)
    }

    async fn commit(self: Box<Self>, doc: &StatusDocument) -> Result<()> {
        let mut lock = *self;
        lock.write(doc)?;
        lock.unlock()
    }

    async fn release(self: Box<Self>) -> Result<()> {
        (*self).unlock()
    }

    async fn discard(self: Box<Self>) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        remember(&self.snapshots, self.kind, None);
        (*self).unlock()
    }
}

fn remember(snapshots: &Snapshots, kind: QueueKind, doc: Option<&StatusDocument>) {
    if let Ok(mut snapshots) = snapshots.lock() {
        match doc {
            Some(doc) => {
                snapshots.insert(kind, doc.clone());
            }
            None => {
                snapshots.remove(&kind);
            }
        }
    }
}

/// Empty file means idle; an unreadable one is treated as idle too so the
/// queue can be restarted or cleared
fn parse_document(kind: QueueKind, path: &Path, content: &str) -> Option<StatusDocument> {
    if content.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(content) {
        Ok(doc) => Some(doc),
        Err(e) => {
            warn!(
                kind = %kind,
                path = %path.display(),
                error = %e,
                "Ignoring unreadable status document"
            );
            None
        }
    }
}

fn busy(kind: QueueKind) -> AppError {
    AppError::Busy(format!(
        "{} queue is being processed, try again shortly",
        kind
    ))
}

fn lock_error(errno: Errno) -> AppError {
    AppError::Io(std::io::Error::from(errno))
}
