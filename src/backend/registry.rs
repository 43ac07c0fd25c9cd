//! Backend registry
//!
//! One process hosts one registered backend at a time. The node owns a
//! registry instance and injects it into its dispatch loop; there is no
//! hidden global. Registration without a matching teardown is an error,
//! which is what makes double-init detectable.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BlobError, Result};

use super::StorageBackend;

/// Holder for the process's registered backend
#[derive(Default)]
pub struct BackendRegistry {
    backend: Mutex<Option<Arc<dyn StorageBackend>>>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend; fails if one is already registered
    pub fn register(&self, backend: Arc<dyn StorageBackend>) -> Result<()> {
        let mut slot = self.backend.lock();
        if slot.is_some() {
            return Err(BlobError::InvalidConfig(
                "backend already registered".to_string(),
            ));
        }
        *slot = Some(backend);
        Ok(())
    }

    /// The registered backend, if any
    pub fn get(&self) -> Option<Arc<dyn StorageBackend>> {
        self.backend.lock().clone()
    }

    /// Run the backend's cleanup and drop the registration
    pub fn teardown(&self) -> Result<()> {
        let backend = self.backend.lock().take();
        match backend {
            Some(backend) => backend.cleanup(),
            None => Ok(()),
        }
    }
}
