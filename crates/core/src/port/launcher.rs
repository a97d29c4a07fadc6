// Backup Launcher Port
//
// Fire-and-forget: the launched task reports through the settings flag and
// its own status document, never back to the caller.

use crate::error::Result;

pub trait BackupLauncher: Send + Sync {
    fn launch(&self) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts launches without running anything
    #[derive(Clone, Default)]
    pub struct CountingLauncher {
        launches: Arc<AtomicUsize>,
    }

    impl CountingLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    impl BackupLauncher for CountingLauncher {
        fn launch(&self) -> Result<()> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
