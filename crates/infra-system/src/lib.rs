// Sarpras Infrastructure - System Adapters
// Implements: StatusStore (flock), UploadTransport (drive relay), Archiver (zip)

#[cfg(unix)]
pub mod file_status_store;
pub mod relay_transport;
pub mod zip_archiver;

#[cfg(unix)]
pub use file_status_store::FileStatusStore;
pub use relay_transport::DriveRelayTransport;
pub use zip_archiver::ZipArchiver;
