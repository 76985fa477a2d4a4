//! OCSP status resolution with a TTL cache.
//!
//! Answers are computed from the registry and cached under a
//! (serial, issuer-hash) key. A committed revocation invalidates the
//! matching entry through [`RevocationObserver`], so the cache never
//! serves `Good` for a serial after its revocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::revocation::RevocationObserver;
use crate::store::Registry;
use crate::types::{RevocationReason, SerialNumber};

/// Certificate status as an OCSP responder would report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcspStatus {
    /// Not revoked and inside its validity window.
    Good {
        /// When the certificate expires.
        expires: DateTime<Utc>,
    },
    /// A revocation record exists.
    Revoked {
        /// When the revocation was recorded.
        at: DateTime<Utc>,
        /// Reason code.
        reason: RevocationReason,
    },
    /// Past its validity window without being revoked.
    Expired,
    /// Serial unknown to this responder.
    Unknown,
}

/// Cache tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OcspPolicy {
    /// How long a cached answer stays fresh, in seconds.
    pub ttl_seconds: u32,
    /// Maximum number of cached entries. New answers are computed but not
    /// cached once the cap is reached.
    pub cap: usize,
}

impl Default for OcspPolicy {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            cap: 10_000,
        }
    }
}

/// Cache effectiveness counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Answers served from cache.
    pub hits: u64,
    /// Answers computed from the registry.
    pub misses: u64,
    /// Entries currently cached.
    pub size: usize,
    /// hits / (hits + misses); 0 when nothing was resolved yet.
    pub hit_rate: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    status: OcspStatus,
    fresh_until: DateTime<Utc>,
}

type CacheKey = (SerialNumber, String);

/// The OCSP status service.
pub struct OcspResolver {
    registry: Arc<Registry>,
    clock: Arc<dyn Clock>,
    policy: OcspPolicy,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OcspResolver {
    /// Creates a resolver over the given registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>, clock: Arc<dyn Clock>, policy: OcspPolicy) -> Self {
        Self {
            registry,
            clock,
            policy,
            cache: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolves the status of a serial.
    ///
    /// Unknown serials are answered but never cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn resolve(&self, serial: &SerialNumber) -> Result<OcspStatus> {
        let record = match self.registry.certificate(serial) {
            Ok(record) => record,
            Err(Error::NotFound(_)) => {
                debug!("OCSP: unknown serial {}", serial);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(OcspStatus::Unknown);
            }
            Err(e) => return Err(e),
        };

        let now = self.clock.now();
        let key = (serial.clone(), issuer_hash(&record.issuer));

        if let Some(status) = self.cached(&key, now)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(status);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let status = match self.registry.revocation(serial)? {
            Some(revocation) => OcspStatus::Revoked {
                at: revocation.revoked_at,
                reason: revocation.reason,
            },
            None if now >= record.valid_to => OcspStatus::Expired,
            None => OcspStatus::Good {
                expires: record.valid_to,
            },
        };

        self.store(key, status, now)?;
        Ok(status)
    }

    /// Drops every cached answer for a serial.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn invalidate(&self, serial: &SerialNumber) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        cache.retain(|(cached_serial, _), _| cached_serial != serial);
        Ok(())
    }

    /// Empties the cache. Counters keep running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .clear();
        Ok(())
    }

    /// Returns hit/miss counters and the current cache size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on lock poisoning.
    pub fn cache_stats(&self) -> Result<CacheStats> {
        let size = self
            .cache
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?
            .len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Ok(CacheStats {
            hits,
            misses,
            size,
            hit_rate,
        })
    }

    fn cached(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<OcspStatus>> {
        let cache = self
            .cache
            .read()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        Ok(cache
            .get(key)
            .filter(|entry| entry.fresh_until > now)
            .map(|entry| entry.status))
    }

    fn store(&self, key: CacheKey, status: OcspStatus, now: DateTime<Utc>) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| Error::Storage(format!("lock poisoned: {e}")))?;
        cache.retain(|_, entry| entry.fresh_until > now);
        if cache.len() >= self.policy.cap {
            return Ok(());
        }
        let ttl_end = now + Duration::seconds(i64::from(self.policy.ttl_seconds));
        // A Good answer is only true until the certificate expires; the
        // cached entry must not outlive that moment.
        let fresh_until = match status {
            OcspStatus::Good { expires } => ttl_end.min(expires),
            _ => ttl_end,
        };
        cache.insert(key, CacheEntry { status, fresh_until });
        Ok(())
    }
}

impl crate::chain::RevocationStatusSource for OcspResolver {
    fn is_revoked(&self, serial: &SerialNumber) -> Result<bool> {
        Ok(matches!(self.resolve(serial)?, OcspStatus::Revoked { .. }))
    }
}

impl RevocationObserver for OcspResolver {
    fn revoked(&self, serial: &SerialNumber) {
        // Committed revocations must never be masked by a cached answer.
        let _ = self.invalidate(serial);
    }
}

/// SHA-256 of the issuer DN string, lowercase hex.
fn issuer_hash(issuer: &str) -> String {
    let digest = Sha256::digest(issuer.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}
