//! Integration tests for the segment cache coordinator
//!
//! These drive a real actor thread through the public facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use segcache::{
    Acquisition, Actor, CellValue, ColumnValue, Command, ConstrainedColumn, CoordinatorConfig, CoordinatorError,
    Handler, LoadError, LoadSource, MemorySegmentCache, NoOpSegmentCache, Segment, SegmentAxis, SegmentCacheManager,
    SegmentDataset, StarRegion,
};
use segcache::coordinator::GetMetrics;

// =============================================================================
// Helpers
// =============================================================================

fn sales_segment(year: i64) -> Arc<Segment> {
    Arc::new(
        Segment::builder("sales", "unit_sales")
            .column(ConstrainedColumn::new("year", [ColumnValue::Int(year)]))
            .build()
            .expect("valid segment"),
    )
}

fn sales_dataset(year: i64, value: i64) -> SegmentDataset {
    let mut dataset = SegmentDataset::new(vec![SegmentAxis::new("year", [ColumnValue::Int(year)])]);
    dataset
        .insert(&[ColumnValue::Int(year)], CellValue::Int(value))
        .expect("coordinates fit");
    dataset
}

fn start(config: CoordinatorConfig) -> (Actor, SegmentCacheManager) {
    let actor = Actor::start(config).expect("actor starts");
    let manager = SegmentCacheManager::new(&actor.handle(), Arc::new(NoOpSegmentCache)).expect("attach");
    (actor, manager)
}

/// Blocks the actor thread until released
struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Command for Gate {
    type Output = ();

    fn call(self, _handler: &mut Handler) -> eyre::Result<()> {
        self.entered.send(())?;
        self.release.recv()?;
        Ok(())
    }
}

/// Close the gate on the actor from a helper thread; returns the release sender
fn hold_actor(manager: &Arc<SegmentCacheManager>) -> (Sender<()>, thread::JoinHandle<()>) {
    let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
    let (release_tx, release_rx) = crossbeam_channel::bounded(1);
    let manager = Arc::clone(manager);
    let holder = thread::spawn(move || {
        let _ = manager.execute(Gate {
            entered: entered_tx,
            release: release_rx,
        });
    });
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("gate entered");
    (release_tx, holder)
}

/// Counts its executions
struct Count(Arc<AtomicUsize>);

impl Command for Count {
    type Output = usize;

    fn call(self, _handler: &mut Handler) -> eyre::Result<usize> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

struct Explode;

impl Command for Explode {
    type Output = ();

    fn call(self, _handler: &mut Handler) -> eyre::Result<()> {
        panic!("explode");
    }
}

// =============================================================================
// De-duplication and resolution
// =============================================================================

#[test]
fn test_concurrent_requests_trigger_one_load() {
    const REQUESTERS: usize = 16;
    let (actor, manager) = start(CoordinatorConfig::default());
    let manager = Arc::new(manager);
    let barrier = Arc::new(Barrier::new(REQUESTERS));

    let requesters: Vec<_> = (0..REQUESTERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Distinct segment objects with identical constraints
                let segment = sales_segment(1997);
                barrier.wait();
                manager.request_segment(segment).expect("request")
            })
        })
        .collect();

    let mut owners = Vec::new();
    let mut futures = Vec::new();
    for requester in requesters {
        match requester.join().expect("requester thread") {
            Acquisition::Load { segment, future, .. } => {
                owners.push(segment);
                futures.push(future);
            }
            Acquisition::Wait(future) => futures.push(future),
            Acquisition::Hit(_) => panic!("nothing was resident yet"),
        }
    }
    assert_eq!(owners.len(), 1, "exactly one requester owns the load");

    let owner = owners.pop().expect("one owner");
    manager
        .notify_load_succeeded(Arc::clone(&owner), sales_dataset(1997, 42))
        .expect("notify");

    let results: Vec<_> = futures.into_iter().map(|f| f.wait().expect("resolved")).collect();
    assert_eq!(results.len(), REQUESTERS);
    for result in &results {
        assert!(Arc::ptr_eq(result, &results[0]));
        assert_eq!(result.segment().id(), owner.id());
        assert_eq!(result.cell(&[ColumnValue::Int(1997)]), Some(&CellValue::Int(42)));
    }

    let metrics = manager.metrics().expect("metrics");
    assert_eq!(metrics.loads_started, 1);
    assert_eq!(metrics.waiters_joined, (REQUESTERS - 1) as u64);
    assert_eq!(metrics.waiters_released, REQUESTERS as u64);
    assert_eq!(metrics.pending_loads, 0);

    drop(manager);
    actor.shutdown().expect("shutdown");
}

#[test]
fn test_failure_reaches_every_waiter_never_data() {
    let (actor, manager) = start(CoordinatorConfig::default());

    let Acquisition::Load { segment, future, .. } = manager.request_segment(sales_segment(1998)).unwrap() else {
        panic!("expected to own the load");
    };
    let Acquisition::Wait(waiter) = manager.request_segment(sales_segment(1998)).unwrap() else {
        panic!("expected to wait");
    };

    manager
        .notify_load_failed(Arc::clone(&segment), "backend timed out")
        .unwrap();

    let expected = LoadError::Failed("backend timed out".to_string());
    assert_eq!(future.wait().unwrap_err(), expected);
    assert_eq!(waiter.wait().unwrap_err(), expected);

    // Nothing was cached; the next miss owns a fresh load
    let Acquisition::Load { segment: retry, .. } = manager.request_segment(sales_segment(1998)).unwrap() else {
        panic!("expected a fresh load after failure");
    };
    assert_ne!(retry.id(), segment.id());

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_duplicate_resolution_is_not_applied() {
    let (actor, manager) = start(CoordinatorConfig::default());
    let Acquisition::Load { segment, future, .. } = manager.request_segment(sales_segment(1999)).unwrap() else {
        panic!("expected to own the load");
    };

    manager
        .notify_load_succeeded(Arc::clone(&segment), sales_dataset(1999, 1))
        .unwrap();
    manager
        .notify_load_failed(Arc::clone(&segment), "late failure")
        .unwrap();

    assert!(future.wait().is_ok());
    let metrics = manager.metrics().unwrap();
    assert_eq!(metrics.loads_succeeded, 1);
    assert_eq!(metrics.loads_failed, 0);
    assert_eq!(metrics.duplicate_resolutions, 1);
    assert_eq!(actor.handle().stats().event_failures, 1);

    let resident = manager.lookup_segment(&segment.header()).unwrap().expect("indexed");
    assert_eq!(resident.cell(&[ColumnValue::Int(1999)]), Some(&CellValue::Int(1)));

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_fifo_event_visible_to_next_command() {
    let (actor, manager) = start(CoordinatorConfig::default());
    let Acquisition::Load { segment, .. } = manager.request_segment(sales_segment(2000)).unwrap() else {
        panic!("expected to own the load");
    };

    // The event is queued before the lookup, so the lookup sees its effect
    manager
        .notify_load_succeeded(Arc::clone(&segment), sales_dataset(2000, 7))
        .unwrap();
    assert!(manager.lookup_segment(&segment.header()).unwrap().is_some());
    assert!(matches!(
        manager.request_segment(sales_segment(2000)).unwrap(),
        Acquisition::Hit(_)
    ));

    drop(manager);
    actor.shutdown().unwrap();
}

// =============================================================================
// Command execution
// =============================================================================

#[test]
fn test_each_command_executes_exactly_once() {
    const CALLERS: usize = 64;
    let (actor, manager) = start(CoordinatorConfig::default());
    let manager = Arc::new(manager);
    let counter = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..CALLERS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let counter = Arc::clone(&counter);
            thread::spawn(move || manager.execute(Count(counter)).expect("count"))
        })
        .collect();

    let mut seen: Vec<usize> = callers.into_iter().map(|c| c.join().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=CALLERS).collect::<Vec<_>>());
    assert_eq!(counter.load(Ordering::SeqCst), CALLERS);

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_panicking_command_does_not_stop_actor() {
    let (actor, manager) = start(CoordinatorConfig::default());

    let err = manager.execute(Explode).unwrap_err();
    assert!(matches!(err, CoordinatorError::CommandFailed { .. }));

    assert!(matches!(
        manager.request_segment(sales_segment(2001)).unwrap(),
        Acquisition::Load { .. }
    ));
    assert!(actor.handle().is_running());

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_execute_timeout_abandons_wait() {
    let (actor, manager) = start(CoordinatorConfig::default());
    let manager = Arc::new(manager);
    let counter = Arc::new(AtomicUsize::new(0));
    let (release, holder) = hold_actor(&manager);

    let result = manager.execute_timeout(Count(Arc::clone(&counter)), Duration::from_millis(50));
    assert!(matches!(result, Err(CoordinatorError::Abandoned { .. })));

    release.send(()).unwrap();
    holder.join().unwrap();

    // The abandoned command still ran, and its late response is not handed to anyone else
    assert_eq!(manager.execute(Count(Arc::clone(&counter))).unwrap(), 2);

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_abandoned_responses_do_not_fill_response_channel() {
    let config = CoordinatorConfig {
        inbound_capacity: 2,
        response_capacity: 1,
        ..Default::default()
    };
    let (actor, manager) = start(config);
    let manager = Arc::new(manager);
    let (release, holder) = hold_actor(&manager);

    for _ in 0..2 {
        let result = manager.execute_timeout(GetMetrics, Duration::from_millis(30));
        assert!(matches!(result, Err(CoordinatorError::Abandoned { .. })));
    }
    release.send(()).unwrap();
    holder.join().unwrap();

    // Nobody takes the abandoned responses; the actor must still get past them
    manager
        .notify_external_segment_available(sales_segment(2010).header())
        .unwrap();
    manager
        .notify_external_segment_available(sales_segment(2011).header())
        .unwrap();
    let metrics = manager
        .execute_timeout(GetMetrics, Duration::from_secs(5))
        .expect("actor keeps serving after abandoned responses");
    assert_eq!(metrics.external_segments, 2);

    drop(manager);
    actor.shutdown().unwrap();
}

// =============================================================================
// Backpressure and shutdown
// =============================================================================

#[test]
fn test_full_inbound_queue_blocks_submitter() {
    let config = CoordinatorConfig {
        inbound_capacity: 1,
        ..Default::default()
    };
    let (actor, manager) = start(config);
    let manager = Arc::new(manager);
    let (release, holder) = hold_actor(&manager);

    // Fills the single slot while the actor is busy
    manager
        .notify_external_segment_available(sales_segment(1).header())
        .unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let blocked = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            manager
                .notify_external_segment_available(sales_segment(2).header())
                .unwrap();
            done_tx.send(()).unwrap();
        })
    };

    assert!(
        done_rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "submitter should block while the queue is full"
    );

    release.send(()).unwrap();
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("submitter unblocks once the actor drains");
    blocked.join().unwrap();
    holder.join().unwrap();

    assert_eq!(manager.metrics().unwrap().external_segments, 2);
    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_nothing_after_shutdown_executes() {
    let (actor, manager) = start(CoordinatorConfig::default());
    let manager = Arc::new(manager);
    let counter = Arc::new(AtomicUsize::new(0));
    let handle = actor.handle();
    let (release, holder) = hold_actor(&manager);

    let stopper = {
        let handle = handle.clone();
        thread::spawn(move || handle.shutdown())
    };
    // Let the shutdown request reach the queue ahead of the next command
    thread::sleep(Duration::from_millis(100));

    let late = {
        let manager = Arc::clone(&manager);
        let counter = Arc::clone(&counter);
        thread::spawn(move || manager.execute(Count(counter)))
    };
    thread::sleep(Duration::from_millis(100));

    release.send(()).unwrap();
    holder.join().unwrap();
    stopper.join().unwrap().expect("shutdown acknowledged");

    let late = late.join().unwrap();
    assert!(late.unwrap_err().is_shutdown());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(!handle.is_running());
    assert_eq!(handle.stats().messages_discarded, 1);

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_shutdown_releases_pending_waiters() {
    let (actor, manager) = start(CoordinatorConfig::default());
    let Acquisition::Load { future, .. } = manager.request_segment(sales_segment(2002)).unwrap() else {
        panic!("expected to own the load");
    };

    actor.shutdown().unwrap();
    assert_eq!(future.wait().unwrap_err(), LoadError::Dropped);
    assert!(manager.metrics().unwrap_err().is_shutdown());
}

// =============================================================================
// External cache, flush and multiple handlers
// =============================================================================

#[test]
fn test_write_through_redirects_other_handlers_to_external() {
    let actor = Actor::start(CoordinatorConfig::default()).unwrap();
    let external = Arc::new(MemorySegmentCache::new());
    let first = SegmentCacheManager::new(&actor.handle(), external.clone()).unwrap();
    let second = SegmentCacheManager::new(&actor.handle(), external.clone()).unwrap();

    let Acquisition::Load { segment, source, .. } = first.request_segment(sales_segment(2003)).unwrap() else {
        panic!("expected to own the load");
    };
    assert_eq!(source, LoadSource::Backend);
    first
        .notify_load_succeeded(Arc::clone(&segment), sales_dataset(2003, 99))
        .unwrap();
    first.metrics().unwrap();
    assert_eq!(external.len(), 1);

    let Acquisition::Load {
        segment: reload,
        source,
        future,
    } = second.request_segment(sales_segment(2003)).unwrap()
    else {
        panic!("second handler has its own registry");
    };
    assert_eq!(source, LoadSource::External);

    let body = second
        .external_cache()
        .get(&reload.header())
        .unwrap()
        .expect("written through");
    second.notify_external_load_succeeded(reload, body).unwrap();
    let resolved = future.wait().unwrap();
    assert_eq!(resolved.cell(&[ColumnValue::Int(2003)]), Some(&CellValue::Int(99)));

    drop(first);
    drop(second);
    actor.shutdown().unwrap();
}

#[test]
fn test_flush_region_invalidates_matching_segments() {
    let actor = Actor::start(CoordinatorConfig::default()).unwrap();
    let external = Arc::new(MemorySegmentCache::new());
    let manager = SegmentCacheManager::new(&actor.handle(), external.clone()).unwrap();

    for year in [2004, 2005] {
        let Acquisition::Load { segment, .. } = manager.request_segment(sales_segment(year)).unwrap() else {
            panic!("expected to own the load");
        };
        manager
            .notify_load_succeeded(segment, sales_dataset(year, year))
            .unwrap();
    }

    let summary = manager
        .flush(StarRegion::new("sales").column("year", [ColumnValue::Int(2004)]))
        .unwrap();
    assert_eq!(summary.evicted, 1);
    assert_eq!(summary.external_removed, 1);
    assert_eq!(external.len(), 1);

    assert!(matches!(
        manager.request_segment(sales_segment(2004)).unwrap(),
        Acquisition::Load {
            source: LoadSource::Backend,
            ..
        }
    ));
    assert!(matches!(
        manager.request_segment(sales_segment(2005)).unwrap(),
        Acquisition::Hit(_)
    ));

    drop(manager);
    actor.shutdown().unwrap();
}

#[test]
fn test_dropping_manager_detaches_handler() {
    let actor = Actor::start(CoordinatorConfig::default()).unwrap();
    let handle = actor.handle();
    let manager = SegmentCacheManager::new(&handle, Arc::new(NoOpSegmentCache)).unwrap();
    let Acquisition::Load { future, .. } = manager.request_segment(sales_segment(2006)).unwrap() else {
        panic!("expected to own the load");
    };

    drop(manager);
    assert_eq!(future.wait().unwrap_err(), LoadError::Dropped);
    assert_eq!(handle.stats().handlers_attached, 0);
    actor.shutdown().unwrap();
}

// =============================================================================
// Async
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_async_request_and_await() {
    let actor = Actor::start(CoordinatorConfig::default()).unwrap();
    let manager = Arc::new(SegmentCacheManager::new(&actor.handle(), Arc::new(NoOpSegmentCache)).unwrap());

    let acquisition = manager
        .execute_async(segcache::coordinator::RequestSegment {
            segment: sales_segment(2007),
        })
        .await
        .unwrap();
    let Acquisition::Load { segment, future, .. } = acquisition else {
        panic!("expected to own the load");
    };

    let notifier = {
        let manager = Arc::clone(&manager);
        tokio::task::spawn_blocking(move || manager.notify_load_succeeded(segment, sales_dataset(2007, 3)))
    };
    let resolved = future.await.unwrap();
    notifier.await.unwrap().unwrap();
    assert_eq!(resolved.cell(&[ColumnValue::Int(2007)]), Some(&CellValue::Int(3)));

    drop(manager);
    tokio::task::spawn_blocking(move || actor.shutdown())
        .await
        .unwrap()
        .unwrap();
}
