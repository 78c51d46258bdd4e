//! Invalidation broadcast and sync gate tests.

mod common;

use hostplane::broadcast::InvalidationEvent;
use hostplane::gate::{DrainOutcome, SyncGate};
use hostplane::identity::HostId;
use hostplane::observability::{metrics, MetricsRegistry};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const HOST: HostId = HostId(10);

// ============================================================================
// Drain waits
// ============================================================================

#[test]
fn drain_returns_promptly_when_tickets_complete() {
    let gate = Arc::new(SyncGate::default());
    let conn = gate.open_connection();
    let tickets: Vec<_> = (0..5).map(|_| gate.begin_wait(HOST, &conn)).collect();

    let completer = {
        let gate = gate.clone();
        thread::spawn(move || {
            for ticket in tickets {
                thread::sleep(Duration::from_millis(10));
                gate.complete(&ticket);
            }
        })
    };

    let start = Instant::now();
    let outcome = gate.await_drain(HOST, Duration::from_secs(30));
    assert_eq!(outcome, DrainOutcome::Drained);
    assert!(start.elapsed() < Duration::from_secs(5));
    completer.join().unwrap();
}

#[test]
fn drain_times_out_softly() {
    let registry = Arc::new(MetricsRegistry::new());
    let gate = SyncGate::new(Duration::from_millis(300)).with_metrics(registry.clone());
    let conn = gate.open_connection();
    gate.begin_wait(HOST, &conn);
    gate.begin_wait(HOST, &conn);

    let start = Instant::now();
    let outcome = gate.await_drain_default(HOST);
    let elapsed = start.elapsed();

    assert_eq!(outcome, DrainOutcome::TimedOut { pending: 2 });
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
    assert_eq!(registry.counter_get(metrics::SYNC_DRAIN_TIMEOUTS), 1);
    assert_eq!(registry.gauge_get(metrics::SYNC_OUTSTANDING_TICKETS), 2);
}

#[test]
fn drain_with_unrepresentable_deadline_still_returns() {
    let gate = Arc::new(SyncGate::default());
    let conn = gate.open_connection();
    gate.begin_wait(HOST, &conn);

    let closer = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gate.close_connection(&conn);
        })
    };

    assert!(gate.await_drain(HOST, Duration::MAX).is_drained());
    closer.join().unwrap();
}

#[test]
fn drain_ignores_tickets_issued_after_snapshot() {
    let gate = Arc::new(SyncGate::default());
    let conn = gate.open_connection();
    let early = gate.begin_wait(HOST, &conn);

    let waiter = {
        let gate = gate.clone();
        thread::spawn(move || gate.await_drain(HOST, Duration::from_secs(10)))
    };

    // Let the waiter take its snapshot.
    thread::sleep(Duration::from_millis(100));
    let late = gate.begin_wait(HOST, &conn);
    gate.complete(&early);

    assert_eq!(waiter.join().unwrap(), DrainOutcome::Drained);
    assert_eq!(gate.outstanding(HOST), 1);
    assert!(late.sequence > early.sequence);
}

#[test]
fn closing_connection_releases_waiters() {
    let gate = Arc::new(SyncGate::default());
    let conn = gate.open_connection();
    gate.begin_wait(HOST, &conn);

    let closer = {
        let gate = gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            gate.close_connection(&conn);
        })
    };

    let start = Instant::now();
    assert!(gate.await_drain(HOST, Duration::from_secs(30)).is_drained());
    assert!(start.elapsed() < Duration::from_secs(5));
    closer.join().unwrap();
    assert_eq!(gate.outstanding(HOST), 0);
}

#[test]
fn drain_on_other_host_is_unaffected() {
    let gate = SyncGate::default();
    let conn = gate.open_connection();
    gate.begin_wait(HostId(11), &conn);
    gate.begin_wait(HOST, &conn);
    gate.close_connection(&conn);

    let other = gate.open_connection();
    gate.begin_wait(HostId(11), &other);
    assert!(gate.await_drain(HOST, Duration::from_secs(5)).is_drained());
    assert_eq!(
        gate.await_drain(HostId(11), Duration::from_millis(100)),
        DrainOutcome::TimedOut { pending: 1 }
    );
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn dropped_session_releases_its_tickets() {
    let fixture = common::fixture_with_config(common::config_with_drain_timeout(30));
    let master = fixture.master.clone();

    let session = master.open_session("ops", common::NEW_VERSION);
    session.begin_wait(HOST);
    session.begin_wait(HOST);

    let dropper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        drop(session);
    });

    let start = Instant::now();
    assert!(master.await_drain_default(HOST).is_drained());
    assert!(start.elapsed() < Duration::from_secs(5));
    dropper.join().unwrap();
}

#[test]
fn session_tickets_complete_through_master() {
    let fixture = common::fixture();
    let session = fixture.master.open_session("ops", common::NEW_VERSION);
    let ticket = session.begin_wait(HOST);
    assert_eq!(ticket.connection, session.connection().id());

    assert!(fixture.master.complete(&ticket));
    assert!(fixture
        .master
        .await_drain(HOST, Duration::from_millis(10))
        .is_drained());
}

// ============================================================================
// Announcements
// ============================================================================

#[test]
fn announce_advances_host_sequences() {
    let fixture = common::fixture();
    let session = fixture.master.open_session("ops", common::NEW_VERSION);
    let first = session.begin_wait(HOST);

    let receipt = fixture.master.announce(
        &InvalidationEvent::new("mailboxes").with_hosts([HOST, HostId(11)]),
    );
    assert_eq!(receipt.host_sequences.get(&HOST), Some(&(first.sequence + 1)));
    assert_eq!(receipt.host_sequences.get(&HostId(11)), Some(&1));

    let second = session.begin_wait(HOST);
    assert!(second.sequence > first.sequence + 1);
    assert_eq!(
        fixture.master.metrics().counter_get(metrics::SYNC_ANNOUNCES),
        1
    );
}

#[test]
fn announce_reports_evictions() {
    let fixture = common::fixture();
    let carol = fixture.master.resolve_identity("carol").unwrap();
    fixture.master.authorize(&carol, "mailboxes").unwrap();

    // Identity entry for carol and her tenant-hierarchy scope.
    let receipt = fixture.master.announce(&InvalidationEvent::new("accounts"));
    assert_eq!(receipt.evicted, 2);
    assert!(receipt.classes.contains(&"tenant-hierarchy".to_string()));
    assert!(receipt.classes.contains(&"identity".to_string()));
}

#[test]
fn configured_rules_extend_builtin() {
    let mut config = hostplane::config::Config::default();
    config
        .invalidation
        .tables
        .insert("reseller_branding".to_string(), vec!["tenant-hierarchy".to_string()]);
    let fixture = common::fixture_with_config(config);
    let carol = fixture.master.resolve_identity("carol").unwrap();
    let before = fixture.master.authorize(&carol, "mailboxes").unwrap();

    fixture
        .master
        .announce(&InvalidationEvent::new("reseller_branding"));
    let after = fixture.master.authorize(&carol, "mailboxes").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}
