// Sarpras Infrastructure - SQLite Adapter
// Implements: InventoryRepository, SettingsRepository

mod connection;
mod error;
mod inventory_repository;
mod migration;
mod settings_repository;

pub use connection::create_pool;
pub use inventory_repository::SqliteInventoryRepository;
pub use migration::run_migrations;
pub use settings_repository::SqliteSettingsRepository;

#[cfg(test)]
pub(crate) mod test_support {
    use sqlx::SqlitePool;

    /// Migrated database in a scratch directory (kept alive by the returned guard)
    pub async fn migrated_pool() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = crate::create_pool(path.to_str().unwrap()).await.unwrap();
        crate::run_migrations(&pool).await.unwrap();
        (pool, dir)
    }
}
