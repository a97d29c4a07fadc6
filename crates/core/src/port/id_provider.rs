// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic names in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique identifier (used to name staged uploads)
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential ids: `id-1`, `id-2`, ...
    #[derive(Default)]
    pub struct SequentialIds {
        next: AtomicU64,
    }

    impl IdProvider for SequentialIds {
        fn generate_id(&self) -> String {
            format!("id-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }
}
