use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{Identifier, IdentifierInitError};

pub type IdentifierFactory =
    Box<dyn Fn() -> Result<Arc<dyn Identifier>, IdentifierInitError> + Send + Sync>;

/// Owns the process-wide identifier and builds it on first use.
///
/// Concurrent first callers block on the same initialization; at most one
/// succeeds and everybody after reuses that instance. A failed attempt leaves
/// the slot empty so the next call tries again.
pub struct IdentifierProvider {
    instance: OnceCell<Arc<dyn Identifier>>,
    factory: IdentifierFactory,
    attempts: AtomicU64,
}

impl IdentifierProvider {
    pub fn new(factory: IdentifierFactory) -> Self {
        Self {
            instance: OnceCell::new(),
            factory,
            attempts: AtomicU64::new(0),
        }
    }

    /// Provider around an identifier that is already built.
    pub fn preloaded(identifier: Arc<dyn Identifier>) -> Self {
        let provider = Self::new(Box::new(|| -> Result<Arc<dyn Identifier>, _> {
            Err(IdentifierInitError::Unavailable(
                "preloaded identifier slot was emptied".to_string(),
            ))
        }));
        let _ = provider.instance.set(identifier);
        provider
    }

    pub fn get(&self) -> Result<Arc<dyn Identifier>, IdentifierInitError> {
        self.instance
            .get_or_try_init(|| {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                log::info!("Initializing identifier (attempt {})", attempt);
                match (self.factory)() {
                    Ok(identifier) => {
                        log::info!("Identifier initialized");
                        Ok(identifier)
                    }
                    Err(e) => {
                        log::error!("Identifier initialization failed: {}", e);
                        Err(e)
                    }
                }
            })
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.instance.get().is_some()
    }

    pub fn init_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}
