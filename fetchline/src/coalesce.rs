//! Request coalescing for the download and load stages.
//!
//! When equivalent requests are in flight at the same time, only the first
//! one (the leader) does the work. The others attach to it as followers and
//! park. When the leader is done, every follower is resolved from the
//! leader's outcome:
//!
//! ```text
//! Request A ─┐
//!            │                    leader A
//! Request B ─┼──► Registry ──────────────────► fetch / decode
//!            │      │                               │
//! Request C ─┘      │ followers [B, C]              │
//!                   ▼                               ▼
//!             replay B, C  ◄──────────────── unregister(outcome)
//!             (cache now warm)
//! ```
//!
//! # Locking
//!
//! The `DashMap` shard lock of a key is the key-scoped lock. Attaching a
//! follower and removing the entry both run under it, so a follower racing the
//! leader's `unregister` either lands in the follower list before removal or
//! finds no entry and works on its own. It is never silently dropped.
//!
//! Leadership is an RAII value. An entry can never outlive its leader: if the
//! [`Leadership`] is dropped without `unregister` (a panicking stage, for
//! instance) its followers are replayed as if the leader had been lost.

use crate::error::ErrorCause;
use crate::request::{Request, RequestId};
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Which resource a registry coalesces on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Raw bytes, keyed by network key.
    Download,
    /// Processed output, keyed by request key.
    Load,
}

impl Namespace {
    /// Coalescing key of `request` in this namespace.
    pub fn key_of(&self, request: &Request) -> String {
        match self {
            Self::Download => request.network_key().as_str().to_string(),
            Self::Load => request.key().as_str().to_string(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Load => write!(f, "load"),
        }
    }
}

/// How the leader's work ended, as seen by its followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderOutcome {
    /// The result is now in the cache.
    Succeeded,
    /// The work failed; followers fail with the same cause.
    Failed(ErrorCause),
    /// The leader was canceled before finishing.
    Canceled,
    /// The leader vanished without reporting.
    Lost,
}

/// Predicate deciding whether a request may take part in coalescing.
pub type Eligibility = Box<dyn Fn(&Request) -> bool + Send + Sync>;

/// Re-submits a follower to its stage.
pub type Replay = Box<dyn Fn(Request) + Send + Sync>;

struct Entry {
    leader: RequestId,
    followers: Vec<Request>,
}

/// Result of [`CoalescingRegistry::register`].
pub enum Registration {
    /// The caller leads; it must eventually pass the leadership back to
    /// [`CoalescingRegistry::unregister`].
    Leader(Request, Leadership),
    /// Another leader registered first; the request is now its follower.
    Joined,
    /// The request cannot coalesce and must do its work alone.
    Ineligible(Request),
}

/// Proof of leadership over one key.
pub struct Leadership {
    registry: Arc<CoalescingRegistry>,
    key: String,
    leader: RequestId,
    released: bool,
}

impl Leadership {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Leadership {
    fn drop(&mut self) {
        if !self.released {
            debug!(
                namespace = %self.registry.namespace,
                key = %self.key,
                leader = %self.leader,
                "Leader lost without unregistering"
            );
            self.registry
                .release(&self.key, self.leader, &LeaderOutcome::Lost);
        }
    }
}

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Requests that became leaders.
    pub new_requests: u64,
    /// Requests that attached to an existing leader.
    pub coalesced_requests: u64,
    /// Requests that were not allowed to coalesce.
    pub ineligible_requests: u64,
}

impl CoalescerStats {
    pub fn total_requests(&self) -> u64 {
        self.new_requests + self.coalesced_requests + self.ineligible_requests
    }

    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / total as f64
        }
    }
}

/// Tracks in-flight leaders and their parked followers for one namespace.
pub struct CoalescingRegistry {
    namespace: Namespace,
    in_flight: DashMap<String, Entry>,
    eligible: Eligibility,
    replay: Replay,
    shutdown: CancellationToken,
    new_requests: AtomicU64,
    coalesced_requests: AtomicU64,
    ineligible_requests: AtomicU64,
}

impl CoalescingRegistry {
    /// Creates a registry.
    ///
    /// `eligible` is consulted for every request; `replay` receives followers
    /// that must redo the stage after their leader finished without failing.
    /// Once `shutdown` is cancelled no new entries are created.
    pub fn new(
        namespace: Namespace,
        shutdown: CancellationToken,
        eligible: Eligibility,
        replay: Replay,
    ) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            in_flight: DashMap::new(),
            eligible,
            replay,
            shutdown,
            new_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
            ineligible_requests: AtomicU64::new(0),
        })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    fn is_eligible(&self, request: &Request) -> bool {
        !self.shutdown.is_cancelled() && (self.eligible)(request)
    }

    /// Attaches `request` to an in-flight leader with the same key.
    ///
    /// Hands the request back if there is no such leader or the request may
    /// not coalesce.
    pub fn try_join(&self, request: Request) -> Result<(), Request> {
        if !self.is_eligible(&request) {
            return Err(request);
        }

        let key = self.namespace.key_of(&request);
        match self.in_flight.get_mut(&key) {
            Some(mut entry) => {
                trace!(
                    namespace = %self.namespace,
                    key = %key,
                    leader = %entry.leader,
                    follower = %request.id(),
                    "Joined in-flight leader"
                );
                entry.followers.push(request);
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(request),
        }
    }

    /// Makes `request` the leader for its key.
    ///
    /// If a leader appeared since the caller's `try_join`, the request is
    /// attached to it instead.
    pub fn register(self: &Arc<Self>, request: Request) -> Registration {
        if !self.is_eligible(&request) {
            self.ineligible_requests.fetch_add(1, Ordering::Relaxed);
            return Registration::Ineligible(request);
        }

        let key = self.namespace.key_of(&request);
        match self.in_flight.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                occupied.get_mut().followers.push(request);
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                Registration::Joined
            }
            MapEntry::Vacant(vacant) => {
                let leader = request.id();
                vacant.insert(Entry {
                    leader,
                    followers: Vec::new(),
                });
                self.new_requests.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %self.namespace, key = %key, leader = %leader, "New leader");
                Registration::Leader(
                    request,
                    Leadership {
                        registry: Arc::clone(self),
                        key,
                        leader,
                        released: false,
                    },
                )
            }
        }
    }

    /// Removes the leader's entry and resolves its followers.
    pub fn unregister(&self, mut leadership: Leadership, outcome: LeaderOutcome) {
        leadership.released = true;
        self.release(&leadership.key, leadership.leader, &outcome);
    }

    fn release(&self, key: &str, leader: RequestId, outcome: &LeaderOutcome) {
        let followers = self
            .in_flight
            .remove_if(key, |_, entry| entry.leader == leader)
            .map(|(_, entry)| entry.followers)
            .unwrap_or_default();

        if followers.is_empty() {
            return;
        }

        debug!(
            namespace = %self.namespace,
            key = %key,
            leader = %leader,
            followers = followers.len(),
            outcome = ?outcome,
            "Resolving followers"
        );

        for follower in followers {
            if follower.check_canceled() {
                continue;
            }
            match outcome {
                LeaderOutcome::Failed(cause) => {
                    follower.fail(cause.clone());
                }
                LeaderOutcome::Succeeded | LeaderOutcome::Canceled | LeaderOutcome::Lost => {
                    (self.replay)(follower);
                }
            }
        }
    }

    /// Number of keys with a leader in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            new_requests: self.new_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
            ineligible_requests: self.ineligible_requests.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            namespace = %self.namespace,
            total_requests = stats.total_requests(),
            coalesced = stats.coalesced_requests,
            new_requests = stats.new_requests,
            ineligible = stats.ineligible_requests,
            in_flight = self.in_flight_count(),
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "Request coalescing statistics"
        );
    }
}
