//! Track persistence state machine.
//!
//! Each track id moves `Unseen -> Seen -> Notified`. `Unseen` is the absence of
//! an entry. The `Seen -> Notified` edge fires exactly once, on the first
//! observation where the track has been present for at least the persistence
//! threshold. A momentary miss does not reset `first_seen`.
//!
//! The store is owned by the orchestrator thread and is never shared.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Bookkeeping for one track id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackState {
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub notified: bool,
}

/// Result of observing a qualifying detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// First qualifying sighting; the track is now `Seen`.
    New,
    /// Still below the persistence threshold.
    Dwelling { elapsed: Duration },
    /// Threshold crossed on this observation. Emitted once per track.
    Persistent { dwell: Duration },
    /// Threshold was crossed on an earlier observation.
    AlreadyNotified,
}

#[derive(Debug)]
pub struct TrackStore {
    tracks: HashMap<u64, TrackState>,
    persistence: Duration,
    /// `None` keeps entries for the whole run.
    ttl: Option<Duration>,
}

impl TrackStore {
    pub fn new(persistence: Duration, ttl: Option<Duration>) -> Self {
        Self {
            tracks: HashMap::new(),
            persistence,
            ttl,
        }
    }

    /// Record a qualifying detection of `track_id` at `now`.
    pub fn observe(&mut self, track_id: u64, now: Instant) -> Observation {
        let persistence = self.persistence;
        let mut created = false;
        let state = self.tracks.entry(track_id).or_insert_with(|| {
            created = true;
            TrackState {
                first_seen: now,
                last_seen: now,
                notified: false,
            }
        });
        if now > state.last_seen {
            state.last_seen = now;
        }

        let elapsed = state.last_seen.duration_since(state.first_seen);
        if state.notified {
            return Observation::AlreadyNotified;
        }
        if elapsed >= persistence {
            state.notified = true;
            return Observation::Persistent { dwell: elapsed };
        }
        if created {
            Observation::New
        } else {
            Observation::Dwelling { elapsed }
        }
    }

    /// Drop tracks whose last sighting is older than the TTL. Returns how many were removed.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let before = self.tracks.len();
        self.tracks
            .retain(|_, state| now.saturating_duration_since(state.last_seen) <= ttl);
        before - self.tracks.len()
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn notifies_exactly_once_at_threshold() {
        let t0 = Instant::now();
        let mut store = TrackStore::new(secs(2.0), None);

        assert_eq!(store.observe(7, t0), Observation::New);
        assert!(matches!(
            store.observe(7, t0 + secs(1.9)),
            Observation::Dwelling { .. }
        ));
        assert_eq!(
            store.observe(7, t0 + secs(2.1)),
            Observation::Persistent { dwell: secs(2.1) }
        );
        assert_eq!(store.observe(7, t0 + secs(2.2)), Observation::AlreadyNotified);
        assert_eq!(store.observe(7, t0 + secs(60.0)), Observation::AlreadyNotified);
        assert!(store.get(7).expect("state").notified);
    }

    #[test]
    fn zero_threshold_fires_on_first_sighting() {
        let t0 = Instant::now();
        let mut store = TrackStore::new(Duration::ZERO, None);
        assert_eq!(
            store.observe(1, t0),
            Observation::Persistent {
                dwell: Duration::ZERO
            }
        );
        assert_eq!(store.observe(1, t0), Observation::AlreadyNotified);
    }

    #[test]
    fn gap_in_sightings_does_not_reset_first_seen() {
        let t0 = Instant::now();
        let mut store = TrackStore::new(secs(2.0), None);
        store.observe(3, t0);
        // No observation between t0 and t0+2.5 (track missed those frames).
        assert!(matches!(
            store.observe(3, t0 + secs(2.5)),
            Observation::Persistent { .. }
        ));
        let state = store.get(3).expect("state");
        assert_eq!(state.first_seen, t0);
        assert!(state.first_seen <= state.last_seen);
    }

    #[test]
    fn tracks_are_independent() {
        let t0 = Instant::now();
        let mut store = TrackStore::new(secs(1.0), None);
        store.observe(1, t0);
        store.observe(2, t0 + secs(0.5));
        assert!(matches!(
            store.observe(1, t0 + secs(1.0)),
            Observation::Persistent { .. }
        ));
        assert!(matches!(
            store.observe(2, t0 + secs(1.0)),
            Observation::Dwelling { .. }
        ));
    }

    #[test]
    fn eviction_respects_ttl() {
        let t0 = Instant::now();
        let mut store = TrackStore::new(secs(1.0), Some(secs(10.0)));
        store.observe(1, t0);
        store.observe(2, t0 + secs(8.0));

        assert_eq!(store.evict_stale(t0 + secs(12.0)), 1);
        assert!(store.get(1).is_none());
        assert!(store.get(2).is_some());

        // A reused id after eviction starts over.
        assert_eq!(store.observe(1, t0 + secs(12.0)), Observation::New);
    }

    #[test]
    fn no_ttl_never_evicts() {
        let t0 = Instant::now();
        let mut store = TrackStore::new(secs(1.0), None);
        store.observe(1, t0);
        assert_eq!(store.evict_stale(t0 + secs(86_400.0)), 0);
        assert_eq!(store.len(), 1);
    }
}
