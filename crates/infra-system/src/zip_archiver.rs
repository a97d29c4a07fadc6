// Zip Archiver

use async_trait::async_trait;
use sarpras_core::error::{AppError, Result};
use sarpras_core::port::{ArchiveEntry, Archiver};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Deflate-compressed zip archives, written on the blocking pool
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiver;

impl ZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn create(&self, entries: &[ArchiveEntry], destination: &Path) -> Result<u64> {
        let entries = entries.to_vec();
        let destination = destination.to_path_buf();

        tokio::task::spawn_blocking(move || write_archive(&entries, &destination))
            .await
            .map_err(|e| AppError::Internal(format!("archive task failed: {}", e)))?
    }
}

fn write_archive(entries: &[ArchiveEntry], destination: &Path) -> Result<u64> {
    let file = File::create(destination)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in entries {
        let mut source = File::open(&entry.source)?;
        writer
            .start_file(entry.name.as_str(), options)
            .map_err(zip_error)?;
        let copied = std::io::copy(&mut source, &mut writer)?;
        debug!(name = %entry.name, bytes = copied, "Archived entry");
    }

    let mut inner = writer.finish().map_err(zip_error)?;
    std::io::Write::flush(&mut inner)?;
    drop(inner);

    Ok(std::fs::metadata(destination)?.len())
}

fn zip_error(e: zip::result::ZipError) -> AppError {
    AppError::Internal(format!("zip error: {}", e))
}
