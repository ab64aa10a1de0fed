//! Session bookkeeping for the relay server
//!
//! This module owns the server-side view of who is participating:
//! - Session lifecycle (registration, refresh, eviction)
//! - The address-to-session table used for broadcast fan-out
//! - The eviction policy deciding when a silent peer is gone
//!
//! UDP has no connection objects, so the session table *is* the connection
//! table: the peer's address tuple is the identity. Display names are just
//! whatever an address most recently claimed and are not unique. All
//! mutation happens from the relay's single receive/sweep cycle; the manager
//! itself carries no locking.

use chrono::{Duration, NaiveDateTime};
use log::info;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Idle threshold of the default time-based eviction policy, in seconds.
pub const DEFAULT_IDLE_SECS: i64 = 600;

/// Turn limit of the alternative count-based eviction policy.
pub const DEFAULT_MISSED_TURN_LIMIT: u32 = 6;

/// One known client, keyed by its transport address.
#[derive(Debug, Clone)]
pub struct Session {
    /// Peer address, used both as identity and as the fan-out target.
    pub addr: SocketAddr,
    /// Last username seen from this address.
    pub display_name: String,
    /// Sender-supplied time of the most recent packet from this address.
    /// Freshness is judged in sender time, not server receive time.
    pub last_seen: NaiveDateTime,
    /// Relay turns since this address last sent anything.
    pub missed_turns: u32,
}

/// What `upsert` did with the address it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First datagram from this address; the caller owes it a one-time
    /// registration acknowledgment.
    Created,
    /// Known address; name and last-seen time refreshed.
    Updated,
}

/// When to give up on a silent session.
///
/// Two variants of the relay existed historically: one retired peers after a
/// fixed stretch of wall-clock silence, the other after a fixed number of
/// relay turns in which the peer did not send. Both are kept behind this one
/// seam so the relay engine never has to know which is active.
#[derive(Debug, Clone, Copy)]
pub enum EvictionPolicy {
    /// Evict when `now - last_seen` exceeds the threshold.
    IdleFor(Duration),
    /// Evict once `missed_turns` reaches the limit. Counts processed
    /// datagrams rather than elapsed time, so bursty traffic ages idle
    /// peers faster than the clock would.
    MissedTurns(u32),
}

impl EvictionPolicy {
    /// True when the policy condemns this session at time `now`.
    ///
    /// The comparison is strict, and a `last_seen` in the future (sender
    /// clock ahead of ours) yields a negative elapsed time, so such sessions
    /// are never evicted.
    pub fn should_evict(&self, session: &Session, now: NaiveDateTime) -> bool {
        match *self {
            EvictionPolicy::IdleFor(threshold) => {
                now.signed_duration_since(session.last_seen) > threshold
            }
            EvictionPolicy::MissedTurns(limit) => session.missed_turns >= limit,
        }
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::IdleFor(Duration::seconds(DEFAULT_IDLE_SECS))
    }
}

/// Tracks every currently-known client and applies the eviction policy.
///
/// The manager accepts any address: `upsert` cannot fail, and capacity is
/// bounded only by memory. Eviction is the sole way a session leaves the
/// table; there is no explicit disconnect in the protocol.
pub struct SessionManager {
    sessions: HashMap<SocketAddr, Session>,
    policy: EvictionPolicy,
}

impl SessionManager {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
        }
    }

    /// Registers or refreshes the session for `addr`.
    ///
    /// A new address gets a fresh session and `Created`. A known address has
    /// its `last_seen` advanced, its missed-turn counter cleared, and its
    /// display name replaced if the peer now claims a different one; the
    /// address stays the identity either way.
    pub fn upsert(
        &mut self,
        addr: SocketAddr,
        username: &str,
        seen: NaiveDateTime,
    ) -> UpsertOutcome {
        match self.sessions.entry(addr) {
            Entry::Vacant(slot) => {
                info!("New client {} registered from {}", username, addr);
                slot.insert(Session {
                    addr,
                    display_name: username.to_string(),
                    last_seen: seen,
                    missed_turns: 0,
                });
                UpsertOutcome::Created
            }
            Entry::Occupied(mut slot) => {
                let session = slot.get_mut();
                if session.display_name != username {
                    info!(
                        "Client at {} renamed {} -> {}",
                        addr, session.display_name, username
                    );
                    session.display_name = username.to_string();
                }
                session.last_seen = seen;
                session.missed_turns = 0;
                UpsertOutcome::Updated
            }
        }
    }

    /// Removes every session the policy condemns at time `now` and returns
    /// the removed addresses. The addresses are for the caller's own
    /// logging; peers are never told about an eviction.
    pub fn evict_expired(&mut self, now: NaiveDateTime) -> Vec<SocketAddr> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|session| self.policy.should_evict(session, now))
            .map(|session| session.addr)
            .collect();

        for addr in &expired {
            if let Some(session) = self.sessions.remove(addr) {
                info!(
                    "Client {} ({}) evicted after inactivity",
                    session.display_name, session.addr
                );
            }
        }

        expired
    }

    /// Snapshot of every session address other than `addr`, for broadcast
    /// fan-out. Order is unspecified.
    pub fn all_except(&self, addr: SocketAddr) -> Vec<SocketAddr> {
        self.sessions
            .keys()
            .filter(|&&peer| peer != addr)
            .copied()
            .collect()
    }

    /// Records one relay turn: every session except the sender went a turn
    /// without sending. The sender's own counter was just reset by `upsert`.
    pub fn mark_turn(&mut self, sender: SocketAddr) {
        for session in self.sessions.values_mut() {
            if session.addr != sender {
                session.missed_turns = session.missed_turns.saturating_add(1);
            }
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&Session> {
        self.sessions.get(addr)
    }

    /// Number of currently-known sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn ten_minute_manager() -> SessionManager {
        SessionManager::new(EvictionPolicy::IdleFor(Duration::minutes(10)))
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let mut manager = ten_minute_manager();
        let addr = test_addr(4000);
        let now = base_time();

        assert_eq!(manager.upsert(addr, "alice", now), UpsertOutcome::Created);
        assert_eq!(manager.len(), 1);

        let later = now + Duration::seconds(30);
        assert_eq!(manager.upsert(addr, "alice", later), UpsertOutcome::Updated);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(&addr).unwrap().last_seen, later);
    }

    #[test]
    fn test_upsert_adopts_new_display_name() {
        let mut manager = ten_minute_manager();
        let addr = test_addr(4001);
        let now = base_time();

        manager.upsert(addr, "alice", now);
        let outcome = manager.upsert(addr, "alice2", now + Duration::seconds(1));

        // Same address is the same session regardless of the claimed name.
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(&addr).unwrap().display_name, "alice2");
    }

    #[test]
    fn test_same_name_from_two_addresses_is_two_sessions() {
        let mut manager = ten_minute_manager();
        let now = base_time();

        assert_eq!(
            manager.upsert(test_addr(4002), "alice", now),
            UpsertOutcome::Created
        );
        assert_eq!(
            manager.upsert(test_addr(4003), "alice", now),
            UpsertOutcome::Created
        );
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_all_except_excludes_only_the_sender() {
        let mut manager = ten_minute_manager();
        let now = base_time();
        let a = test_addr(4010);
        let b = test_addr(4011);
        let c = test_addr(4012);

        manager.upsert(a, "a", now);
        manager.upsert(b, "b", now);
        manager.upsert(c, "c", now);

        let mut peers = manager.all_except(a);
        peers.sort();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(peers, expected);

        // An address the manager has never seen excludes nothing.
        assert_eq!(manager.all_except(test_addr(4999)).len(), 3);
    }

    #[test]
    fn test_all_except_on_empty_manager() {
        let manager = ten_minute_manager();
        assert!(manager.all_except(test_addr(4020)).is_empty());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_eviction_removes_exactly_the_stale_sessions() {
        let mut manager = ten_minute_manager();
        let now = base_time();
        let fresh = test_addr(4030);
        let stale = test_addr(4031);
        let ancient = test_addr(4032);

        manager.upsert(fresh, "fresh", now - Duration::seconds(1));
        manager.upsert(stale, "stale", now - Duration::minutes(11));
        manager.upsert(ancient, "ancient", now - Duration::minutes(20));

        let mut evicted = manager.evict_expired(now);
        evicted.sort();
        let mut expected = vec![stale, ancient];
        expected.sort();

        assert_eq!(evicted, expected);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&fresh).is_some());

        // Later fan-outs no longer include the evicted addresses.
        assert!(manager.all_except(fresh).is_empty());
    }

    #[test]
    fn test_eviction_threshold_is_strict() {
        let mut manager = ten_minute_manager();
        let now = base_time();
        let addr = test_addr(4040);

        manager.upsert(addr, "edge", now - Duration::minutes(10));
        assert!(manager.evict_expired(now).is_empty());

        let one_second_past = now + Duration::seconds(1);
        assert_eq!(manager.evict_expired(one_second_past), vec![addr]);
    }

    #[test]
    fn test_future_last_seen_is_never_evicted() {
        let mut manager = ten_minute_manager();
        let now = base_time();
        let addr = test_addr(4050);

        // Sender clock running ahead of ours.
        manager.upsert(addr, "early", now + Duration::hours(2));
        assert!(manager.evict_expired(now).is_empty());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_mark_turn_spares_the_sender() {
        let mut manager = ten_minute_manager();
        let now = base_time();
        let a = test_addr(4060);
        let b = test_addr(4061);

        manager.upsert(a, "a", now);
        manager.upsert(b, "b", now);
        manager.mark_turn(a);

        assert_eq!(manager.get(&a).unwrap().missed_turns, 0);
        assert_eq!(manager.get(&b).unwrap().missed_turns, 1);
    }

    #[test]
    fn test_upsert_resets_missed_turns() {
        let mut manager = ten_minute_manager();
        let now = base_time();
        let a = test_addr(4070);
        let b = test_addr(4071);

        manager.upsert(a, "a", now);
        manager.upsert(b, "b", now);
        manager.mark_turn(a);
        manager.mark_turn(a);
        assert_eq!(manager.get(&b).unwrap().missed_turns, 2);

        manager.upsert(b, "b", now + Duration::seconds(5));
        assert_eq!(manager.get(&b).unwrap().missed_turns, 0);
    }

    #[test]
    fn test_missed_turns_policy_evicts_at_the_limit() {
        let mut manager = SessionManager::new(EvictionPolicy::MissedTurns(
            DEFAULT_MISSED_TURN_LIMIT,
        ));
        let now = base_time();
        let talker = test_addr(4080);
        let lurker = test_addr(4081);

        manager.upsert(talker, "talker", now);
        manager.upsert(lurker, "lurker", now);

        for _ in 0..DEFAULT_MISSED_TURN_LIMIT - 1 {
            manager.mark_turn(talker);
        }
        assert!(manager.evict_expired(now).is_empty());

        manager.mark_turn(talker);
        assert_eq!(manager.evict_expired(now), vec![lurker]);
        assert!(manager.get(&talker).is_some());
    }

    #[test]
    fn test_policy_should_evict_directly() {
        let now = base_time();
        let session = Session {
            addr: test_addr(4090),
            display_name: "s".to_string(),
            last_seen: now - Duration::minutes(11),
            missed_turns: 3,
        };

        assert!(EvictionPolicy::IdleFor(Duration::minutes(10)).should_evict(&session, now));
        assert!(!EvictionPolicy::IdleFor(Duration::minutes(15)).should_evict(&session, now));
        assert!(EvictionPolicy::MissedTurns(3).should_evict(&session, now));
        assert!(!EvictionPolicy::MissedTurns(4).should_evict(&session, now));
    }
}
