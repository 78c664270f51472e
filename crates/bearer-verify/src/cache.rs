//! Issuer → verifier cache with single-flight construction
//!
//! The map is guarded by one short-lived mutex that is never held across an
//! `.await`. A miss inserts a `Building` slot holding a shared handle to a
//! spawned construction task; every concurrent caller for that issuer clones
//! the handle and awaits the same outcome. Because construction runs on its
//! own task, a caller that gives up (timeout, disconnect) does not cancel the
//! work other callers are waiting on.
//!
//! A `Building` slot is only ever removed by its own construction, so at most
//! one fetch per issuer is in flight. [`invalidate`](IssuerVerifierCache::invalidate)
//! and [`clear`](IssuerVerifierCache::clear) mark such a slot discarded
//! instead: callers arriving meanwhile still join the running fetch, and its
//! result is dropped rather than stored when it lands. Each slot also carries a
//! generation number so a finishing construction only touches its own slot.
//!
//! Constructions are spawned onto the ambient Tokio runtime.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::AuthenticatorConfig;
use crate::error::{Result, VerificationError};
use crate::source::KeySource;
use crate::verifier::{Verifier, VerifierSettings};

type BuildFuture = Shared<BoxFuture<'static, Result<Arc<Verifier>>>>;

/// Sizing and freshness rules for [`IssuerVerifierCache`]
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Exact-match allow-list; empty accepts any issuer
    pub trusted_issuers: Vec<String>,
    /// Bound on one construction
    pub fetch_timeout: Duration,
    /// Maximum number of issuers held (ready or building)
    pub max_issuers: usize,
    /// Rebuild verifiers older than this; `None` keeps them forever
    pub key_ttl: Option<Duration>,
    /// Minimum spacing between rebuild attempts of one issuer
    pub min_refresh_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::from(&AuthenticatorConfig::default())
    }
}

impl From<&AuthenticatorConfig> for CacheOptions {
    fn from(config: &AuthenticatorConfig) -> Self {
        Self {
            trusted_issuers: config.trusted_issuers.clone(),
            fetch_timeout: config.fetch_timeout,
            max_issuers: config.max_issuers.max(1),
            key_ttl: config.key_ttl,
            min_refresh_interval: config.min_refresh_interval,
        }
    }
}

#[derive(Clone)]
struct ReadyEntry {
    verifier: Arc<Verifier>,
    built_at: Instant,
    last_attempt: Instant,
}

enum SlotState {
    Ready(ReadyEntry),
    Building {
        future: BuildFuture,
        /// Verifier being replaced, served to callers until the rebuild lands
        previous: Option<ReadyEntry>,
        /// Invalidated while in flight; the outcome is not stored
        discard: bool,
    },
}

struct Slot {
    generation: u64,
    state: SlotState,
}

/// Outcome of inspecting a slot under the lock
enum Lookup {
    Hit(Arc<Verifier>),
    Pending(BuildFuture),
    Rebuild,
    Miss,
}

struct CacheInner {
    source: Arc<dyn KeySource>,
    settings: VerifierSettings,
    options: CacheOptions,
    slots: Mutex<HashMap<String, Slot>>,
    next_generation: AtomicU64,
}

/// Shared mapping from issuer to its [`Verifier`]
///
/// Cloning is cheap and clones share state. Construct one per process (or per
/// test) and hand it to whatever needs it.
#[derive(Clone)]
pub struct IssuerVerifierCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for IssuerVerifierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerVerifierCache")
            .field("source", &self.inner.source)
            .field("options", &self.inner.options)
            .field("entries", &self.len())
            .finish()
    }
}

impl IssuerVerifierCache {
    /// Create an empty cache that builds verifiers from `source`
    pub fn new(source: Arc<dyn KeySource>, settings: VerifierSettings, options: CacheOptions) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                settings,
                options,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Return the verifier for `issuer`, building it on first use
    ///
    /// Concurrent callers for the same issuer share one construction. While a
    /// rebuild of a known issuer is in flight the previous verifier keeps
    /// being served.
    ///
    /// # Errors
    ///
    /// - [`VerificationError::IssuerUntrusted`] if `issuer` is not on the
    ///   allow-list (checked before any I/O)
    /// - [`VerificationError::IssuerUnreachable`] on fetch failure or timeout,
    ///   or when the cache is full of in-flight constructions
    /// - [`VerificationError::DiscoveryMalformed`] if the key material is unusable
    ///
    /// # Panics
    ///
    /// Panics if a construction has to be started outside a Tokio runtime.
    pub async fn get_or_build(&self, issuer: &str) -> Result<Arc<Verifier>> {
        self.check_trusted(issuer)?;

        let future = {
            let mut slots = self.inner.slots.lock();
            match self.inner.lookup(&slots, issuer) {
                Lookup::Hit(verifier) => {
                    trace!(issuer = issuer, "Verifier cache hit");
                    return Ok(verifier);
                }
                Lookup::Pending(future) => {
                    debug!(issuer = issuer, "Joining in-flight verifier construction");
                    future
                }
                Lookup::Rebuild => {
                    debug!(issuer = issuer, "Verifier past key TTL, rebuilding in background");
                    let previous = self.inner.take_ready(&mut slots, issuer);
                    let served = previous.as_ref().map(|entry| Arc::clone(&entry.verifier));
                    let future = self.inner.start_build(&mut slots, issuer, previous);
                    match served {
                        Some(verifier) => return Ok(verifier),
                        None => future,
                    }
                }
                Lookup::Miss => {
                    self.inner.make_room(&mut slots, issuer)?;
                    self.inner.start_build(&mut slots, issuer, None)
                }
            }
        };

        future.await
    }

    /// Fetch `issuer`'s keys again and wait for the result
    ///
    /// Joins a construction already in flight. If the last attempt for this
    /// issuer is more recent than `min_refresh_interval`, returns the current
    /// verifier without fetching. A failed refresh keeps the previous verifier
    /// in place.
    ///
    /// # Errors
    ///
    /// Same as [`get_or_build`](Self::get_or_build).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime and a fetch is due.
    pub async fn refresh(&self, issuer: &str) -> Result<Arc<Verifier>> {
        self.check_trusted(issuer)?;

        let future = {
            let mut slots = self.inner.slots.lock();
            let now = Instant::now();
            let interval = self.inner.options.min_refresh_interval;

            let rate_limited = match slots.get(issuer).map(|slot| &slot.state) {
                Some(SlotState::Building { future, .. }) => Some(Err(future.clone())),
                Some(SlotState::Ready(entry))
                    if now.duration_since(entry.last_attempt) < interval =>
                {
                    Some(Ok(Arc::clone(&entry.verifier)))
                }
                _ => None,
            };

            match rate_limited {
                Some(Ok(verifier)) => {
                    debug!(issuer = issuer, "Key refresh rate limited");
                    return Ok(verifier);
                }
                Some(Err(future)) => future,
                None => {
                    let previous = self.inner.take_ready(&mut slots, issuer);
                    if previous.is_none() {
                        self.inner.make_room(&mut slots, issuer)?;
                    }
                    info!(issuer = issuer, "Refreshing issuer signing keys");
                    self.inner.start_build(&mut slots, issuer, previous)
                }
            }
        };

        future.await
    }

    /// Drop `issuer`'s entry; returns whether one existed
    ///
    /// A construction in flight for it keeps running and is shared with new
    /// callers, but its result does not repopulate the cache.
    pub fn invalidate(&self, issuer: &str) -> bool {
        let mut slots = self.inner.slots.lock();
        let existed = match slots.get_mut(issuer).map(CacheInner::discard_if_building) {
            Some(true) => true,
            Some(false) => slots.remove(issuer).is_some(),
            None => false,
        };
        if existed {
            info!(issuer = issuer, "Verifier invalidated");
        }
        existed
    }

    /// Drop every entry
    ///
    /// In-flight constructions are discarded the same way as by
    /// [`invalidate`](Self::invalidate).
    pub fn clear(&self) {
        self.inner
            .slots
            .lock()
            .retain(|_, slot| CacheInner::discard_if_building(slot));
    }

    /// Number of issuers held, ready or building
    pub fn len(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// `true` when no issuer is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a verifier for `issuer` can be served without waiting
    pub fn contains(&self, issuer: &str) -> bool {
        matches!(
            self.inner.slots.lock().get(issuer).map(|slot| &slot.state),
            Some(SlotState::Ready(_) | SlotState::Building { previous: Some(_), .. })
        )
    }

    fn check_trusted(&self, issuer: &str) -> Result<()> {
        if is_trusted(&self.inner.options.trusted_issuers, issuer) {
            Ok(())
        } else {
            Err(VerificationError::IssuerUntrusted(issuer.to_string()))
        }
    }
}

/// Exact-match allow-list check; an empty list accepts any issuer
pub(crate) fn is_trusted(trusted_issuers: &[String], issuer: &str) -> bool {
    trusted_issuers.is_empty() || trusted_issuers.iter().any(|t| t == issuer)
}

impl CacheInner {
    /// Mark an in-flight slot discarded; `false` if it is not building
    fn discard_if_building(slot: &mut Slot) -> bool {
        match &mut slot.state {
            SlotState::Building {
                previous, discard, ..
            } => {
                *previous = None;
                *discard = true;
                true
            }
            SlotState::Ready(_) => false,
        }
    }

    fn lookup(&self, slots: &HashMap<String, Slot>, issuer: &str) -> Lookup {
        match slots.get(issuer).map(|slot| &slot.state) {
            None => Lookup::Miss,
            Some(SlotState::Building {
                previous: Some(entry),
                ..
            }) => Lookup::Hit(Arc::clone(&entry.verifier)),
            Some(SlotState::Building { future, .. }) => Lookup::Pending(future.clone()),
            Some(SlotState::Ready(entry)) if self.is_stale(entry) => Lookup::Rebuild,
            Some(SlotState::Ready(entry)) => Lookup::Hit(Arc::clone(&entry.verifier)),
        }
    }

    fn is_stale(&self, entry: &ReadyEntry) -> bool {
        let Some(ttl) = self.options.key_ttl else {
            return false;
        };
        let now = Instant::now();
        now.duration_since(entry.built_at) >= ttl
            && now.duration_since(entry.last_attempt) >= self.options.min_refresh_interval
    }

    fn take_ready(&self, slots: &mut HashMap<String, Slot>, issuer: &str) -> Option<ReadyEntry> {
        match slots.remove(issuer) {
            Some(Slot {
                state: SlotState::Ready(entry),
                ..
            }) => Some(entry),
            Some(slot) => {
                slots.insert(issuer.to_string(), slot);
                None
            }
            None => None,
        }
    }

    /// Ensure a new issuer fits, evicting the oldest ready verifier if needed
    fn make_room(&self, slots: &mut HashMap<String, Slot>, issuer: &str) -> Result<()> {
        if slots.len() < self.options.max_issuers {
            return Ok(());
        }

        let oldest = slots
            .iter()
            .filter_map(|(key, slot)| match &slot.state {
                SlotState::Ready(entry) => Some((key, entry.built_at)),
                SlotState::Building { .. } => None,
            })
            .min_by_key(|(_, built_at)| *built_at)
            .map(|(key, _)| key.clone());

        match oldest {
            Some(evicted) => {
                debug!(evicted = %evicted, issuer = issuer, "Verifier cache full, evicting oldest");
                slots.remove(&evicted);
                Ok(())
            }
            None => {
                warn!(issuer = issuer, "Verifier cache full of in-flight constructions");
                Err(VerificationError::IssuerUnreachable(format!(
                    "verifier cache is full ({} constructions in flight)",
                    slots.len()
                )))
            }
        }
    }

    /// Spawn a construction and register it; the caller holds the slot lock
    fn start_build(
        self: &Arc<Self>,
        slots: &mut HashMap<String, Slot>,
        issuer: &str,
        previous: Option<ReadyEntry>,
    ) -> BuildFuture {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let task = tokio::spawn(Arc::clone(self).build(issuer.to_string(), generation));

        let inner = Arc::clone(self);
        let key = issuer.to_string();
        let future = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = Err(VerificationError::IssuerUnreachable(format!(
                        "verifier construction aborted: {e}"
                    )));
                    inner.finish(&key, generation, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        slots.insert(
            issuer.to_string(),
            Slot {
                generation,
                state: SlotState::Building {
                    future: future.clone(),
                    previous,
                    discard: false,
                },
            },
        );
        future
    }

    async fn build(self: Arc<Self>, issuer: String, generation: u64) -> Result<Arc<Verifier>> {
        info!(issuer = %issuer, "Building verifier");

        let fetch = AssertUnwindSafe(self.source.fetch(&issuer)).catch_unwind();
        let outcome = match tokio::time::timeout(self.options.fetch_timeout, fetch).await {
            Err(_) => Err(VerificationError::IssuerUnreachable(format!(
                "key discovery for {issuer} timed out after {:?}",
                self.options.fetch_timeout
            ))),
            Ok(Err(_panic)) => Err(VerificationError::IssuerUnreachable(format!(
                "key source panicked while fetching {issuer}"
            ))),
            Ok(Ok(Err(error))) => Err(VerificationError::from(error)),
            Ok(Ok(Ok(material))) if material.issuer() != issuer => {
                Err(VerificationError::DiscoveryMalformed(format!(
                    "key source returned keys for {:?} when asked for {issuer:?}",
                    material.issuer()
                )))
            }
            Ok(Ok(Ok(material))) => Ok(Arc::new(Verifier::new(material, self.settings.clone()))),
        };

        match &outcome {
            Ok(verifier) => info!(
                issuer = %issuer,
                key_count = verifier.material().len(),
                "Verifier ready"
            ),
            Err(error) => warn!(issuer = %issuer, error = %error, "Verifier construction failed"),
        }

        self.finish(&issuer, generation, &outcome);
        outcome
    }

    /// Publish a construction outcome if `generation` still owns the slot
    fn finish(&self, issuer: &str, generation: u64, outcome: &Result<Arc<Verifier>>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(issuer) else {
            return;
        };
        if slot.generation != generation {
            debug!(issuer = issuer, "Discarding superseded construction");
            return;
        }

        let now = Instant::now();
        let previous = match &mut slot.state {
            SlotState::Building { discard: true, .. } => {
                debug!(issuer = issuer, "Discarding construction for invalidated issuer");
                slots.remove(issuer);
                return;
            }
            SlotState::Building { previous, .. } => previous.take(),
            SlotState::Ready(_) => return,
        };

        match (outcome, previous) {
            (Ok(verifier), _) => {
                slot.state = SlotState::Ready(ReadyEntry {
                    verifier: Arc::clone(verifier),
                    built_at: now,
                    last_attempt: now,
                });
            }
            (Err(_), Some(mut previous)) => {
                previous.last_attempt = now;
                slot.state = SlotState::Ready(previous);
            }
            (Err(_), None) => {
                slots.remove(issuer);
            }
        }
    }
}
