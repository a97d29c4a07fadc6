// Archiver Port

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated
    pub name: String,
    pub source: PathBuf,
}

#[async_trait]
pub trait Archiver: Send + Sync {
    /// Write all entries into a new archive at `destination`.
    /// Returns the archive size in bytes.
    async fn create(&self, entries: &[ArchiveEntry], destination: &Path) -> Result<u64>;
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock Archiver: writes a manifest of entry names instead of a real archive
    #[derive(Clone, Default)]
    pub struct ManifestArchiver {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl ManifestArchiver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn entry_names(&self) -> Vec<String> {
            self.entries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Archiver for ManifestArchiver {
        async fn create(&self, entries: &[ArchiveEntry], destination: &Path) -> Result<u64> {
            let names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
            let manifest = names.join("\n");
            tokio::fs::write(destination, manifest.as_bytes()).await?;
            *self.entries.lock().unwrap() = names;
            Ok(manifest.len() as u64)
        }
    }
}
