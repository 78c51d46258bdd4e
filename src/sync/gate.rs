//! Per-host sync tickets and the bounded drain wait.
//!
//! Every host has its own lane: a strictly increasing sequence counter, the
//! set of outstanding tickets, and a condition variable. Waiters on one host
//! never contend with another host's lane.
//!
//! # Drain contract
//!
//! [`SyncGate::await_drain`] snapshots the lane's last issued sequence and
//! blocks until every ticket at or below it is completed or owned by a closed
//! connection. It is woken by `complete`, `begin_wait`, sequence advances and
//! connection close, and gives up at the timeout with a warning instead of an
//! error. A timeout too large to express as a deadline waits without one.

use crate::control::identity::HostId;
use crate::core::time::duration_ms;
use crate::ops::observability::{metrics, MetricsRegistry};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default drain timeout.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A client connection as seen by the gate.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    closed: AtomicBool,
    /// Outstanding ticket count per host.
    hosts: Mutex<BTreeMap<HostId, usize>>,
}

impl Connection {
    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Check if the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hosts this connection still holds tickets on.
    pub fn waiting_hosts(&self) -> BTreeSet<HostId> {
        self.hosts.lock().keys().copied().collect()
    }

    fn release_host(&self, host: HostId) {
        let mut hosts = self.hosts.lock();
        if let Some(count) = hosts.get_mut(&host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                hosts.remove(&host);
            }
        }
    }
}

/// Outstanding change notification for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncTicket {
    /// Host the ticket belongs to.
    pub host: HostId,
    /// Per-host sequence number.
    pub sequence: u64,
    /// Connection that owns the ticket.
    pub connection: ConnectionId,
}

/// Result of a drain wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum DrainOutcome {
    /// Every ticket in the snapshot was observed.
    Drained,
    /// The timeout elapsed first.
    TimedOut {
        /// Tickets still outstanding at the deadline.
        pending: usize,
    },
}

impl DrainOutcome {
    /// Check if the wait drained.
    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained)
    }
}

#[derive(Default)]
struct LaneState {
    last_issued: u64,
    outstanding: BTreeMap<u64, Arc<Connection>>,
}

impl LaneState {
    fn next_sequence(&mut self) -> u64 {
        self.last_issued += 1;
        self.last_issued
    }

    /// Drop tickets whose connection has closed; returns how many.
    fn release_closed(&mut self) -> usize {
        let before = self.outstanding.len();
        self.outstanding.retain(|_, owner| !owner.is_closed());
        before - self.outstanding.len()
    }

    fn pending_through(&self, snapshot: u64) -> usize {
        self.outstanding.range(..=snapshot).count()
    }
}

#[derive(Default)]
struct Lane {
    state: Mutex<LaneState>,
    changed: Condvar,
}

/// Per-host ticket issuer and drain rendezvous.
pub struct SyncGate {
    lanes: RwLock<HashMap<HostId, Arc<Lane>>>,
    next_connection: AtomicU64,
    default_timeout: Duration,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl SyncGate {
    /// Create a gate with the given default drain timeout.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            lanes: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            default_timeout,
            metrics: None,
        }
    }

    /// Record ticket and drain metrics in a registry.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Default drain timeout.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a new connection.
    pub fn open_connection(&self) -> Arc<Connection> {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(connection = %id, "connection opened");
        Arc::new(Connection {
            id,
            closed: AtomicBool::new(false),
            hosts: Mutex::new(BTreeMap::new()),
        })
    }

    /// Mark a connection closed and wake every lane it holds tickets on.
    ///
    /// Its tickets are released lazily by the next drain evaluation.
    pub fn close_connection(&self, connection: &Connection) {
        if connection.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let hosts = std::mem::take(&mut *connection.hosts.lock());
        tracing::debug!(
            connection = %connection.id,
            hosts = hosts.len(),
            "connection closed"
        );
        for host in hosts.into_keys() {
            if let Some(lane) = self.existing_lane(host) {
                // Take the lock so a waiter between its check and its wait sees the close.
                let _state = lane.state.lock();
                lane.changed.notify_all();
            }
        }
    }

    /// Issue the next ticket for `host`, owned by `connection`.
    pub fn begin_wait(&self, host: HostId, connection: &Arc<Connection>) -> SyncTicket {
        // Counted before the ticket is visible so a racing complete always finds it.
        *connection.hosts.lock().entry(host).or_insert(0) += 1;
        let lane = self.lane(host);
        let sequence = {
            let mut state = lane.state.lock();
            let sequence = state.next_sequence();
            state.outstanding.insert(sequence, Arc::clone(connection));
            sequence
        };
        lane.changed.notify_all();

        if let Some(m) = &self.metrics {
            m.counter_inc(metrics::SYNC_TICKETS_ISSUED);
            m.gauge_inc(metrics::SYNC_OUTSTANDING_TICKETS);
        }
        tracing::trace!(host = %host, sequence, connection = %connection.id, "ticket issued");

        SyncTicket {
            host,
            sequence,
            connection: connection.id,
        }
    }

    /// Mark a ticket observed. Returns false if it was already released.
    pub fn complete(&self, ticket: &SyncTicket) -> bool {
        let Some(lane) = self.existing_lane(ticket.host) else {
            return false;
        };
        let owner = lane.state.lock().outstanding.remove(&ticket.sequence);
        let removed = owner.is_some();
        if let Some(owner) = owner {
            lane.changed.notify_all();
            owner.release_host(ticket.host);
            if let Some(m) = &self.metrics {
                m.gauge_dec(metrics::SYNC_OUTSTANDING_TICKETS);
            }
        }
        removed
    }

    /// Advance a host's sequence without issuing a ticket.
    pub fn advance(&self, host: HostId) -> u64 {
        let lane = self.lane(host);
        let sequence = lane.state.lock().next_sequence();
        lane.changed.notify_all();
        sequence
    }

    /// Drain with the default timeout.
    pub fn await_drain_default(&self, host: HostId) -> DrainOutcome {
        self.await_drain(host, self.default_timeout)
    }

    /// Block until the host's tickets issued before this call are observed, or `timeout` elapses.
    pub fn await_drain(&self, host: HostId, timeout: Duration) -> DrainOutcome {
        let Some(lane) = self.existing_lane(host) else {
            return DrainOutcome::Drained;
        };
        if let Some(m) = &self.metrics {
            m.counter_inc(metrics::SYNC_DRAIN_WAITS);
        }

        let deadline = Instant::now().checked_add(timeout);
        let mut state = lane.state.lock();
        let snapshot = state.last_issued;
        loop {
            let released = state.release_closed();
            if released > 0 {
                self.record_released(released);
            }
            let pending = state.pending_through(snapshot);
            if pending == 0 {
                return DrainOutcome::Drained;
            }
            let timed_out = match deadline {
                Some(deadline) => lane.changed.wait_until(&mut state, deadline).timed_out(),
                None => {
                    lane.changed.wait(&mut state);
                    false
                }
            };
            if timed_out {
                let released = state.release_closed();
                if released > 0 {
                    self.record_released(released);
                }
                let pending = state.pending_through(snapshot);
                if pending == 0 {
                    return DrainOutcome::Drained;
                }
                tracing::warn!(
                    host = %host,
                    pending,
                    snapshot,
                    timeout_ms = duration_ms(timeout),
                    "drain timed out, proceeding"
                );
                if let Some(m) = &self.metrics {
                    m.counter_inc(metrics::SYNC_DRAIN_TIMEOUTS);
                }
                return DrainOutcome::TimedOut { pending };
            }
        }
    }

    /// Outstanding tickets for a host, including ones owned by closed connections.
    pub fn outstanding(&self, host: HostId) -> usize {
        self.existing_lane(host)
            .map_or(0, |lane| lane.state.lock().outstanding.len())
    }

    /// Last sequence issued for a host.
    pub fn last_issued(&self, host: HostId) -> u64 {
        self.existing_lane(host)
            .map_or(0, |lane| lane.state.lock().last_issued)
    }

    fn record_released(&self, released: usize) {
        if let Some(m) = &self.metrics {
            for _ in 0..released {
                m.gauge_dec(metrics::SYNC_OUTSTANDING_TICKETS);
            }
        }
    }

    fn existing_lane(&self, host: HostId) -> Option<Arc<Lane>> {
        self.lanes.read().get(&host).cloned()
    }

    fn lane(&self, host: HostId) -> Arc<Lane> {
        if let Some(lane) = self.existing_lane(host) {
            return lane;
        }
        Arc::clone(self.lanes.write().entry(host).or_default())
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new(DEFAULT_DRAIN_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_increase_per_host() {
        let gate = SyncGate::default();
        let conn = gate.open_connection();
        let a1 = gate.begin_wait(HostId(1), &conn);
        let b1 = gate.begin_wait(HostId(2), &conn);
        let a2 = gate.begin_wait(HostId(1), &conn);
        assert_eq!(a1.sequence, 1);
        assert_eq!(b1.sequence, 1);
        assert_eq!(a2.sequence, 2);
        assert_eq!(gate.advance(HostId(1)), 3);
    }

    #[test]
    fn complete_is_idempotent() {
        let gate = SyncGate::default();
        let conn = gate.open_connection();
        let ticket = gate.begin_wait(HostId(1), &conn);
        assert!(gate.complete(&ticket));
        assert!(!gate.complete(&ticket));
        assert_eq!(gate.outstanding(HostId(1)), 0);
    }

    #[test]
    fn completed_hosts_leave_the_connection() {
        let gate = SyncGate::default();
        let conn = gate.open_connection();
        let a1 = gate.begin_wait(HostId(1), &conn);
        let a2 = gate.begin_wait(HostId(1), &conn);
        let b1 = gate.begin_wait(HostId(2), &conn);
        assert_eq!(conn.waiting_hosts(), BTreeSet::from([HostId(1), HostId(2)]));

        gate.complete(&a1);
        assert_eq!(conn.waiting_hosts(), BTreeSet::from([HostId(1), HostId(2)]));
        gate.complete(&b1);
        gate.complete(&a2);
        assert!(conn.waiting_hosts().is_empty());

        // Completing again does not disturb a later ticket's count.
        let a3 = gate.begin_wait(HostId(1), &conn);
        assert!(!gate.complete(&a2));
        assert_eq!(conn.waiting_hosts(), BTreeSet::from([HostId(1)]));
        gate.complete(&a3);
        assert!(conn.waiting_hosts().is_empty());
    }

    #[test]
    fn unbounded_timeout_waits_without_deadline() {
        let gate = Arc::new(SyncGate::default());
        let conn = gate.open_connection();
        let ticket = gate.begin_wait(HostId(1), &conn);

        let completer = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                gate.complete(&ticket);
            })
        };
        assert!(gate.await_drain(HostId(1), Duration::MAX).is_drained());
        completer.join().unwrap();
    }

    #[test]
    fn unknown_host_drains_immediately() {
        let gate = SyncGate::default();
        assert!(gate.await_drain(HostId(9), Duration::from_secs(5)).is_drained());
    }

    #[test]
    fn closed_owner_releases_tickets_on_drain() {
        let gate = SyncGate::default();
        let conn = gate.open_connection();
        gate.begin_wait(HostId(1), &conn);
        gate.begin_wait(HostId(1), &conn);
        gate.close_connection(&conn);
        assert_eq!(gate.outstanding(HostId(1)), 2);
        assert!(gate.await_drain(HostId(1), Duration::from_secs(5)).is_drained());
        assert_eq!(gate.outstanding(HostId(1)), 0);
    }
}
