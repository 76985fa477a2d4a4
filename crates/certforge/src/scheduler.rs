//! Periodic CRL regeneration.
//!
//! One tokio task per scheduled CA regenerates its full CRL on a fixed
//! interval. A failed generation is logged and the loop keeps going; the
//! scheduler never sits on the issuance or revocation paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::crl::CrlGenerator;
use crate::error::{Error, Result};
use crate::types::CaId;

/// Drives full-CRL regeneration per CA.
pub struct CrlScheduler {
    generator: Arc<CrlGenerator>,
    tasks: Mutex<HashMap<CaId, JoinHandle<()>>>,
}

impl CrlScheduler {
    /// Creates a scheduler over the given generator.
    #[must_use]
    pub fn new(generator: Arc<CrlGenerator>) -> Self {
        Self {
            generator,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) the regeneration loop for a CA.
    ///
    /// The first generation runs immediately, then once per `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn start(&self, ca_id: CaId, interval: Duration) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;

        if let Some(existing) = tasks.remove(&ca_id) {
            existing.abort();
        }

        info!(
            "Starting CRL schedule: ca={} interval={}s",
            ca_id,
            interval.as_secs()
        );
        let generator = Arc::clone(&self.generator);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = generator.generate_full(ca_id) {
                    warn!("Scheduled CRL generation failed: ca={} error={}", ca_id, e);
                }
            }
        });
        tasks.insert(ca_id, handle);
        Ok(())
    }

    /// Stops the regeneration loop for a CA.
    ///
    /// Returns false when no loop was running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn stop(&self, ca_id: CaId) -> Result<bool> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        match tasks.remove(&ca_id) {
            Some(handle) => {
                handle.abort();
                info!("Stopped CRL schedule: ca={}", ca_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stops every regeneration loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn stop_all(&self) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        for (ca_id, handle) in tasks.drain() {
            handle.abort();
            info!("Stopped CRL schedule: ca={}", ca_id);
        }
        Ok(())
    }

    /// Number of CAs currently scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn active_count(&self) -> Result<usize> {
        Ok(self
            .tasks
            .lock()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .len())
    }
}

impl Drop for CrlScheduler {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}
