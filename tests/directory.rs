mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use common::{cluster, wait_until, Gate};
use pgas_array::{
    BlockDirectory,
    BlockSpec,
    ChunkLease,
    DArray,
    DArrayError,
    FailureKind,
    Grid,
    PlacementPolicy,
    RemoteMemory,
    Scheduler,
    Scope,
    SlotInit,
    SlotView,
    TaskFuture,
};

#[test]
fn resolve_is_idempotent_and_submits_nothing() {
    let c = cluster(1, 2);
    let a = DArray::<f64>::fill(&c.ctx, &[8, 8], BlockSpec::lengths([4, 4]), &PlacementPolicy::BlockRow, 1.0)
        .unwrap();
    let first = a.directory().resolve(&[1, 0]).unwrap();
    a.materialize().unwrap();

    let submitted = c.scheduler.submitted_count();
    for _ in 0..3 {
        assert_eq!(a.directory().resolve(&[1, 0]).unwrap(), first);
    }
    a.materialize().unwrap();
    assert_eq!(c.scheduler.submitted_count(), submitted);
    assert_eq!(a.directory().pending_count(), 0);
    assert_eq!(a.directory().settled_count(), 4);
}

#[test]
fn concurrent_resolves_agree() {
    let c = cluster(1, 2);
    let a = DArray::<i64>::fill(&c.ctx, &[6], BlockSpec::lengths([3]), &PlacementPolicy::CyclicRow, 7)
        .unwrap();
    let chunks: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> =
            (0..4).map(|_| s.spawn(|| a.directory().resolve(&[1]).unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert!(chunks.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn failed_block_is_retained_and_others_resolve() {
    let c = cluster(1, 2);
    let a = DArray::<f32>::try_allocate(
        &c.ctx,
        &[4, 4],
        BlockSpec::lengths([2, 2]),
        &PlacementPolicy::BlockRow,
        |domain| {
            if domain.origin() == vec![0, 2] {
                Err("sensor offline".to_string())
            } else {
                Ok(vec![1.0; domain.volume()])
            }
        },
    )
    .unwrap();

    match a.materialize() {
        Err(DArrayError::BlockTaskFailure { index, failure }) => {
            assert_eq!(index, vec![0, 1]);
            assert_eq!(failure.kind, FailureKind::Error);
            assert!(failure.message.contains("sensor offline"));
        }
        other => panic!("expected block failure, got {other:?}"),
    }

    assert!(a.directory().resolve(&[1, 1]).is_ok());
    let failures = a.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, vec![0, 1]);
    assert!(matches!(a.directory().get(&[0, 1]).unwrap(), SlotView::Failed(_)));

    // A second resolve reports the same failure without rerunning anything.
    let submitted = c.scheduler.submitted_count();
    assert!(a.directory().resolve(&[0, 1]).is_err());
    assert_eq!(c.scheduler.submitted_count(), submitted);
}

#[test]
fn failures_include_unresolved_tasks() {
    let c = cluster(1, 1);
    let a = DArray::<u32>::try_allocate(&c.ctx, &[3], BlockSpec::lengths([3]), &PlacementPolicy::BlockRow, |_| {
        Err("boom".to_string())
    })
    .unwrap();
    assert!(wait_until(Duration::from_secs(5), || !a.failures().is_empty()));
    assert_eq!(a.directory().pending_count(), 1);
}

#[test]
fn replace_settles_a_pending_slot_once() {
    let c = cluster(1, 2);
    let memory: Arc<dyn RemoteMemory> = c.store.clone();
    let scheduler: Arc<dyn Scheduler> = c.scheduler.clone();

    let stalled = TaskFuture::new(900, 1, "never runs");
    let ready = c.store.put(2, Scope::Processor(2), Bytes::from_static(&[0; 8]));
    let slots = Grid::from_cells(
        vec![2],
        vec![
            SlotInit::Pending(Arc::clone(&stalled)),
            SlotInit::Resolved(ChunkLease::adopt(ready, Arc::clone(&memory))),
        ],
    )
    .unwrap();
    let targets = Grid::from_cells(vec![2], vec![1, 2]).unwrap();
    let directory = BlockDirectory::from_slots(slots, targets, scheduler).unwrap();

    assert!(directory.get(&[0]).unwrap().is_pending());
    let replacement = c.store.put(1, Scope::Processor(1), Bytes::from_static(&[1; 8]));
    directory
        .replace(&[0], SlotInit::Resolved(ChunkLease::adopt(replacement, Arc::clone(&memory))))
        .unwrap();
    assert_eq!(directory.get(&[0]).unwrap(), SlotView::Resolved(replacement));
    assert_eq!(directory.resolve(&[0]).unwrap(), replacement);

    let extra = c.store.put(1, Scope::Processor(1), Bytes::from_static(&[2; 8]));
    let err = directory
        .replace(&[0], SlotInit::Resolved(ChunkLease::adopt(extra, Arc::clone(&memory))))
        .unwrap_err();
    assert_eq!(err, DArrayError::SlotAlreadySettled { index: vec![0] });
    let err = directory.replace(&[1], SlotInit::Resolved(ChunkLease::adopt(extra, memory))).unwrap_err();
    assert_eq!(err, DArrayError::SlotAlreadySettled { index: vec![1] });
}

#[test]
fn replace_hands_a_pending_slot_to_a_new_task_once() {
    let c = cluster(1, 2);
    let memory: Arc<dyn RemoteMemory> = c.store.clone();
    let scheduler: Arc<dyn Scheduler> = c.scheduler.clone();

    let stalled = TaskFuture::new(900, 1, "never runs");
    let slots = Grid::from_cells(vec![1], vec![SlotInit::Pending(Arc::clone(&stalled))]).unwrap();
    let targets = Grid::from_cells(vec![1], vec![1]).unwrap();
    let directory = BlockDirectory::from_slots(slots, targets, scheduler).unwrap();

    let successor = TaskFuture::new(901, 2, "successor");
    directory.replace(&[0], SlotInit::Pending(Arc::clone(&successor))).unwrap();
    assert_eq!(directory.get(&[0]).unwrap(), SlotView::Pending(Arc::clone(&successor)));

    let third = TaskFuture::new(902, 2, "third");
    let err = directory.replace(&[0], SlotInit::Pending(third)).unwrap_err();
    assert_eq!(err, DArrayError::SlotAlreadySettled { index: vec![0] });

    let produced = c.store.put(2, Scope::Processor(2), Bytes::from_static(&[5; 8]));
    assert!(successor.complete(Ok(ChunkLease::adopt(produced, Arc::clone(&memory)))));

    // Resolving waits on the successor only; the stalled task never settles.
    assert_eq!(directory.resolve(&[0]).unwrap(), produced);
    assert!(!stalled.is_complete());
    assert_eq!(directory.pending_count(), 0);

    let late = c.store.put(1, Scope::Processor(1), Bytes::from_static(&[6; 8]));
    let err = directory.replace(&[0], SlotInit::Resolved(ChunkLease::adopt(late, memory))).unwrap_err();
    assert_eq!(err, DArrayError::SlotAlreadySettled { index: vec![0] });
}

#[test]
fn out_of_range_index_is_an_error() {
    let c = cluster(1, 1);
    let a = DArray::<f64>::fill(&c.ctx, &[4], BlockSpec::lengths([2]), &PlacementPolicy::BlockRow, 0.0)
        .unwrap();
    assert!(matches!(a.directory().get(&[2]), Err(DArrayError::OutOfBounds { .. })));
    assert!(matches!(a.directory().resolve(&[0, 0]), Err(DArrayError::OutOfBounds { .. })));
}

#[test]
fn cancel_stops_dependent_blocks() {
    let c = cluster(1, 2);
    let gate = Gate::new();
    let held = gate.clone();
    let a = DArray::<f64>::allocate(
        &c.ctx,
        &[4, 4],
        BlockSpec::lengths([2, 2]),
        &PlacementPolicy::BlockRow,
        move |domain| {
            held.pass();
            vec![1.0; domain.volume()]
        },
    )
    .unwrap();
    let b = a.scale(2.0).unwrap();

    assert_eq!(b.cancel(), 4);
    match b.collect() {
        Err(DArrayError::BlockTaskFailure { failure, .. }) => assert!(failure.is_cancelled()),
        other => panic!("expected cancellation, got {other:?}"),
    }

    gate.open();
    let values = a.collect().unwrap();
    assert!(values.as_slice().iter().all(|&v| v == 1.0));
    assert_eq!(b.failures().len(), 4);
}

#[test]
fn dropping_arrays_releases_chunks() {
    let c = cluster(1, 2);
    let a = DArray::<f64>::fill(&c.ctx, &[6, 6], BlockSpec::lengths([3, 3]), &PlacementPolicy::CyclicRow, 1.0)
        .unwrap();
    a.materialize().unwrap();
    assert_eq!(c.store.live_chunks(), 4);

    let b = a.scale(3.0).unwrap();
    b.materialize().unwrap();
    assert_eq!(c.store.live_chunks(), 8);

    drop(b);
    assert!(wait_until(Duration::from_secs(1), || c.store.live_chunks() == 4));
    drop(a);
    assert!(wait_until(Duration::from_secs(1), || c.store.live_chunks() == 0));
}
