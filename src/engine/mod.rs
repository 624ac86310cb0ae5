//! The external proxy engine that consumes the registry document.
//!
//! The engine re-reads the document on its own restart; the only thing
//! this crate ever asks of it is an explicit reload.

use async_trait::async_trait;

use crate::error::Result;

pub mod systemd;
pub use systemd::SystemdEngine;

#[async_trait]
pub trait Engine: Send + Sync {
    /// Make the engine pick up the current document.
    async fn reload(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::RegistryError;

    #[derive(Default)]
    pub struct CountingEngine {
        pub reloads: AtomicUsize,
        pub fail: bool,
    }

    impl CountingEngine {
        pub fn reloads(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Engine for CountingEngine {
        async fn reload(&self) -> Result<()> {
            if self.fail {
                return Err(RegistryError::ExternalTool {
                    tool: "fake-engine".into(),
                    detail: "unit not found".into(),
                });
            }
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
