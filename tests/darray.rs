mod common;

use proptest::prelude::*;

use common::{cluster, local_ctx};
use pgas_array::{
    preview_placement,
    Assignment,
    BlockSpec,
    ClusterConfig,
    ClusterContext,
    DArray,
    DArrayError,
    ElementwiseOp,
    FailureKind,
    FetchError,
    LocalArray,
    OpRegistry,
    Operand,
    PlacementPolicy,
    ReduceOp,
    Scope,
    ScopeKind,
};

fn grid_values(shape: &[usize]) -> LocalArray<i64> {
    LocalArray::from_fn(shape, |index| index.iter().fold(0i64, |acc, &i| acc * 100 + i as i64))
}

#[test]
fn ones_with_block_row_on_two_processors() {
    let ctx = local_ctx(2);
    let ones = DArray::<f64>::ones(&ctx, &[100, 100], BlockSpec::lengths([50, 50]), &PlacementPolicy::BlockRow)
        .unwrap();

    assert_eq!(ones.block_count(), 4);
    assert_eq!(ones.owners(), vec![1, 2]);
    for info in ones.chunks() {
        let expected = if info.index[0] == 0 { 1 } else { 2 };
        assert_eq!(info.target, expected, "block {:?}", info.index);
    }

    ones.materialize().unwrap();
    assert!(ones.chunks().iter().all(|info| info.owner == Some(info.target)));
    assert_eq!(ones.sum().unwrap(), 10_000.0);
}

#[test]
fn add_then_scale() {
    let ctx = local_ctx(2);
    let x = DArray::<f64>::fill(&ctx, &[10, 10], BlockSpec::lengths([5, 5]), &PlacementPolicy::BlockRow, 2.0)
        .unwrap();
    let y = x.add(&x).unwrap().scale(3.0).unwrap();

    let values = y.collect().unwrap();
    assert_eq!(values.shape(), &[10, 10]);
    assert!(values.as_slice().iter().all(|&v| v == 12.0));

    // Derived arrays keep the source placement.
    let targets: Vec<_> = y.chunks().iter().map(|info| info.target).collect();
    let sources: Vec<_> = x.chunks().iter().map(|info| info.target).collect();
    assert_eq!(targets, sources);
}

#[test]
fn broadcast_folds_operands_left_to_right() {
    let ctx = local_ctx(3);
    let local = grid_values(&[6, 5]);
    let a = DArray::distribute(&ctx, &local, BlockSpec::lengths([4, 2]), &PlacementPolicy::CyclicCol).unwrap();
    let b = a.map(|v| v * 2).unwrap();

    let out = DArray::broadcast(ElementwiseOp::Sub, &[Operand::Scalar(1), Operand::Array(&a), Operand::Array(&b)]).unwrap();
    let expected = local.map(|v| 1 - v - 2 * v);
    assert_eq!(out.collect().unwrap(), expected);

    let custom = ElementwiseOp::custom(|x: i64, y: i64| x * 10 + y);
    let out = DArray::broadcast(custom, &[Operand::Array(&a), Operand::Scalar(7)]).unwrap();
    assert_eq!(out.collect().unwrap(), local.map(|v| v * 10 + 7));
}

#[test]
fn scalar_only_broadcast_is_rejected() {
    let err = DArray::<f64>::broadcast(ElementwiseOp::Add, &[Operand::Scalar(1.0), Operand::Scalar(2.0)])
        .unwrap_err();
    assert_eq!(err, DArrayError::NoArrayOperand);
}

#[test]
fn mismatched_partitions_are_rejected_before_submission() {
    let c = cluster(1, 2);
    let a = DArray::<f32>::zeros(&c.ctx, &[4, 4], BlockSpec::lengths([2, 2]), &PlacementPolicy::BlockRow)
        .unwrap();
    let b = DArray::<f32>::zeros(&c.ctx, &[4, 4], BlockSpec::lengths([4, 2]), &PlacementPolicy::BlockRow)
        .unwrap();
    let submitted = c.scheduler.submitted_count();

    match a.add(&b) {
        Err(DArrayError::IncompatiblePartitioning(err)) => {
            assert_eq!(err.operand, 1);
            assert_eq!(err.expected_blocks, vec![2, 2]);
            assert_eq!(err.actual_blocks, vec![4, 2]);
        }
        other => panic!("expected partitioning error, got {other:?}"),
    }
    assert_eq!(c.scheduler.submitted_count(), submitted);
}

#[test]
fn element_access_fetches_one_block() {
    let c = cluster(1, 4);
    let local = grid_values(&[9, 7]);
    let a = DArray::distribute(&c.ctx, &local, BlockSpec::lengths([3, 3]), &PlacementPolicy::CyclicRow).unwrap();
    a.materialize().unwrap();

    let before = c.store.diagnostics().fetch_count;
    assert_eq!(a.get(&[7, 3]).unwrap(), 703);
    assert_eq!(c.store.diagnostics().fetch_count, before + 1);
    assert!(matches!(a.get(&[9, 0]), Err(DArrayError::OutOfBounds { .. })));
}

#[test]
fn explicit_grid_array_places_blocks_periodically() {
    let ctx = local_ctx(4);
    let assignment = Assignment::from_rows(&[[2u32, 1], [4, 3]]).unwrap();
    let a = DArray::<f64>::zeros(
        &ctx,
        &[8, 12],
        BlockSpec::lengths([2, 2]),
        &PlacementPolicy::ExplicitGrid(assignment),
    )
    .unwrap();
    assert_eq!(a.partition().grid_shape(), &[4, 6]);
    assert_eq!(a.target(&[0, 0]).unwrap(), 2);
    assert_eq!(a.target(&[2, 2]).unwrap(), 2);
    assert_eq!(a.target(&[3, 5]).unwrap(), 3);
}

#[test]
fn preview_matches_allocation() {
    let ctx = local_ctx(3);
    let spec = BlockSpec::lengths([2, 5]);
    let preview = preview_placement(&ctx, &[7, 5], &spec, &PlacementPolicy::BlockRow).unwrap();
    let a = DArray::<u32>::zeros(&ctx, &[7, 5], spec, &PlacementPolicy::BlockRow).unwrap();
    assert_eq!(&preview, a.directory().targets());
    assert_eq!(preview.cells(), &[1, 1, 2, 3]);
}

#[test]
fn invalid_configuration_fails_eagerly() {
    let c = cluster(1, 2);
    let err = DArray::<f64>::zeros(&c.ctx, &[4], BlockSpec::lengths([2]), &PlacementPolicy::BlockCol).unwrap_err();
    assert!(matches!(err, DArrayError::PlacementRankMismatch(_)));
    let err = DArray::<f64>::zeros(&c.ctx, &[4], BlockSpec::lengths([5]), &PlacementPolicy::BlockRow).unwrap_err();
    assert!(matches!(err, DArrayError::InvalidBlockSpec(_)));
    assert!(err.is_configuration());
    assert_eq!(c.scheduler.submitted_count(), 0);
}

#[test]
fn whole_reduction_is_independent_of_placement() {
    let ctx = local_ctx(3);
    let local = LocalArray::from_fn(&[13, 11], |index| {
        1.0f64 / (1.0 + (index[0] * 11 + index[1]) as f64).powf(1.3)
    });
    let policies = [
        PlacementPolicy::BlockRow,
        PlacementPolicy::CyclicRow,
        PlacementPolicy::BlockCol,
        PlacementPolicy::Arbitrary,
        PlacementPolicy::ExplicitGrid(Assignment::from_rows(&[[3u32, 1, 2]]).unwrap()),
    ];

    let sums: Vec<u64> = policies
        .iter()
        .map(|policy| {
            let a = DArray::distribute(&ctx, &local, BlockSpec::lengths([3, 4]), policy).unwrap();
            a.sum().unwrap().to_bits()
        })
        .collect();
    assert!(sums.windows(2).all(|w| w[0] == w[1]), "{sums:?}");
}

#[test]
fn reduction_combines_in_block_index_order() {
    let ctx = local_ctx(4);
    let local = LocalArray::from_fn(&[5, 6], |index| (index[0] * 6 + index[1] + 1) as i64);
    let a = DArray::distribute(&ctx, &local, BlockSpec::lengths([2, 4]), &PlacementPolicy::CyclicRow).unwrap();

    // Associative but not commutative: keeps the right-hand operand.
    let last = ReduceOp::custom(0i64, |x, y| if y != 0 { y } else { x });
    assert_eq!(a.reduce(last, None).unwrap().scalar(), Some(30));
    let first = ReduceOp::custom(0i64, |x, y| if x != 0 { x } else { y });
    assert_eq!(a.reduce(first, None).unwrap().scalar(), Some(1));

    assert_eq!(a.reduce(ReduceOp::Max, None).unwrap().scalar(), Some(30));
    assert_eq!(a.reduce(ReduceOp::Min, None).unwrap().scalar(), Some(1));
}

#[test]
fn lazy_reduction_waits_on_demand() {
    let ctx = local_ctx(2);
    let a = DArray::<i32>::fill(&ctx, &[12], BlockSpec::lengths([5]), &PlacementPolicy::BlockRow, 2).unwrap();
    let pending = a.reduce_lazy(ReduceOp::Prod).unwrap();
    assert_eq!(pending.wait().unwrap(), 4096);
    assert!(pending.is_ready());
}

#[test]
fn axis_reduction_keeps_unit_extent() {
    let ctx = local_ctx(3);
    let local = grid_values(&[6, 4]);
    let a = DArray::distribute(&ctx, &local, BlockSpec::lengths([2, 3]), &PlacementPolicy::BlockRow).unwrap();

    let cols = a.reduce(ReduceOp::Sum, Some(0)).unwrap().array().unwrap();
    assert_eq!(cols.shape(), &[1, 4]);
    let expected: Vec<i64> = (0..4).map(|j| (0..6).map(|i| local.get(&[i, j]).unwrap()).sum()).collect();
    assert_eq!(cols.collect().unwrap().into_vec(), expected);

    let rows = a.reduce(ReduceOp::Sum, Some(1)).unwrap().array().unwrap();
    assert_eq!(rows.shape(), &[6, 1]);
    assert_eq!(rows.partition().grid_shape(), &[3, 1]);
    let expected: Vec<i64> = (0..6).map(|i| (0..4).map(|j| local.get(&[i, j]).unwrap()).sum()).collect();
    assert_eq!(rows.collect().unwrap().into_vec(), expected);

    assert_eq!(
        a.reduce(ReduceOp::Sum, Some(2)).unwrap_err(),
        DArrayError::InvalidAxis { axis: 2, rank: 2 }
    );
}

#[test]
fn transpose_swaps_blocks_in_place() {
    let ctx = local_ctx(2);
    let local = grid_values(&[5, 3]);
    let a = DArray::distribute(&ctx, &local, BlockSpec::lengths([2, 2]), &PlacementPolicy::BlockRow).unwrap();
    let t = a.transpose().unwrap();

    assert_eq!(t.shape(), &[3, 5]);
    assert_eq!(t.partition().block_lens(), &[2, 2]);
    assert_eq!(t.collect().unwrap(), local.transpose().unwrap());
    assert_eq!(t.target(&[1, 2]).unwrap(), a.target(&[2, 1]).unwrap());

    let v = DArray::<i64>::zeros(&ctx, &[4], BlockSpec::lengths([2]), &PlacementPolicy::BlockRow).unwrap();
    assert!(matches!(v.transpose(), Err(DArrayError::InvalidAxis { .. })));
    assert!(matches!(
        a.transpose_with(&OpRegistry::empty()),
        Err(DArrayError::UnsupportedOperation { .. })
    ));
}

#[test]
fn failures_propagate_to_derived_arrays() {
    let ctx = local_ctx(2);
    let a = DArray::<f64>::try_allocate(&ctx, &[4, 4], BlockSpec::lengths([2, 2]), &PlacementPolicy::BlockRow, |domain| {
        if domain.origin() == vec![2, 0] {
            Err("bad input".to_string())
        } else {
            Ok(vec![0.5; domain.volume()])
        }
    })
    .unwrap();
    let b = a.scale(2.0).unwrap();

    match b.collect() {
        Err(DArrayError::BlockTaskFailure { index, failure }) => {
            assert_eq!(index, vec![1, 0]);
            assert_eq!(failure.kind, FailureKind::DependencyFailed);
            assert!(!failure.is_cancelled());
        }
        other => panic!("expected dependency failure, got {other:?}"),
    }
    assert!(b.fetch_block(&[0, 0]).is_ok());
    assert!(a.sum().is_err());
}

#[test]
fn broadcast_output_can_take_its_own_placement() {
    let ctx = local_ctx(2);
    let a = DArray::<f64>::ones(&ctx, &[4, 4], BlockSpec::lengths([2, 2]), &PlacementPolicy::BlockRow).unwrap();

    let same = DArray::broadcast(ElementwiseOp::Add, &[Operand::Array(&a), Operand::Scalar(1.0)]).unwrap();
    let moved = DArray::broadcast_with(
        ElementwiseOp::Add,
        &[Operand::Array(&a), Operand::Scalar(1.0)],
        &PlacementPolicy::BlockCol,
    )
    .unwrap();

    for (kept, info) in same.chunks().iter().zip(moved.chunks()) {
        assert_eq!(kept.target, if kept.index[0] == 0 { 1 } else { 2 });
        assert_eq!(info.target, if info.index[1] == 0 { 1 } else { 2 });
    }
    assert_eq!(moved.collect().unwrap(), same.collect().unwrap());
    assert!(moved.collect().unwrap().as_slice().iter().all(|&v| v == 2.0));

    let flat = PlacementPolicy::ExplicitGrid(Assignment::processors(&[1], vec![1]).unwrap());
    let err = DArray::broadcast_with(ElementwiseOp::Add, &[Operand::Array(&a), Operand::Scalar(1.0)], &flat)
        .unwrap_err();
    assert!(matches!(err, DArrayError::PlacementRankMismatch(_)));
}

#[test]
fn whole_array_reduction_reports_the_failing_block() {
    let ctx = local_ctx(2);
    let a = DArray::<f64>::try_allocate(&ctx, &[4, 4], BlockSpec::lengths([2, 2]), &PlacementPolicy::BlockRow, |domain| {
        if domain.origin() == vec![2, 0] {
            Err("bad input".to_string())
        } else {
            Ok(vec![0.5; domain.volume()])
        }
    })
    .unwrap();

    let from_sum = match a.sum() {
        Err(DArrayError::BlockTaskFailure { index, failure }) => {
            assert_eq!(index, vec![1, 0]);
            assert_eq!(failure.kind, FailureKind::Error);
            assert_eq!(failure.message, "bad input");
            failure
        }
        other => panic!("expected block failure, got {other:?}"),
    };
    match a.materialize() {
        Err(DArrayError::BlockTaskFailure { index, failure }) => {
            assert_eq!(index, vec![1, 0]);
            assert_eq!(failure, from_sum);
        }
        other => panic!("expected block failure, got {other:?}"),
    }
}

#[test]
fn panicking_generator_is_captured() {
    let ctx = local_ctx(2);
    let a = DArray::<u64>::allocate(&ctx, &[4], BlockSpec::lengths([2]), &PlacementPolicy::CyclicRow, |domain| {
        if domain.origin() == vec![2] {
            panic!("generator exploded");
        }
        vec![1; domain.volume()]
    })
    .unwrap();
    match a.materialize() {
        Err(DArrayError::BlockTaskFailure { index, failure }) => {
            assert_eq!(index, vec![1]);
            assert_eq!(failure.kind, FailureKind::Panicked);
            assert!(failure.message.contains("generator exploded"));
        }
        other => panic!("expected panic capture, got {other:?}"),
    }
}

#[test]
fn wrong_generator_length_fails_the_block() {
    let ctx = local_ctx(1);
    let a = DArray::<f32>::allocate(&ctx, &[3, 3], BlockSpec::lengths([3, 3]), &PlacementPolicy::BlockRow, |_| vec![0.0; 4])
        .unwrap();
    assert!(matches!(a.collect(), Err(DArrayError::BlockTaskFailure { .. })));
}

#[test]
fn unreachable_owner_surfaces_as_fetch_failure() {
    let c = cluster(1, 2);
    let a = DArray::<f64>::fill(&c.ctx, &[4], BlockSpec::lengths([2]), &PlacementPolicy::BlockRow, 3.0).unwrap();
    a.materialize().unwrap();

    c.store.mark_unreachable(2);
    match a.collect() {
        Err(DArrayError::FetchFailure { index, source }) => {
            assert_eq!(index, vec![1]);
            assert_eq!(source, FetchError::Unreachable(2));
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }
    assert_eq!(a.get(&[1]).unwrap(), 3.0);

    c.store.mark_reachable(2);
    assert_eq!(a.collect().unwrap().as_slice(), &[3.0; 4]);
}

#[test]
fn worker_scope_is_attached_to_chunks() {
    let config = ClusterConfig::default()
        .with_workers(2)
        .with_processors_per_worker(2)
        .with_pool_threads(2)
        .with_default_scope(ScopeKind::Worker);
    let ctx = ClusterContext::local(&config).unwrap();
    let a = DArray::<i32>::zeros(&ctx, &[8], BlockSpec::lengths([2]), &PlacementPolicy::CyclicRow).unwrap();
    a.materialize().unwrap();

    let scopes: Vec<Scope> = (0..4).map(|i| a.directory().resolve(&[i]).unwrap().scope).collect();
    assert_eq!(scopes, vec![Scope::Worker(1), Scope::Worker(1), Scope::Worker(2), Scope::Worker(2)]);
}

fn placement_for(choice: usize, rank: usize) -> PlacementPolicy {
    match choice {
        0 => PlacementPolicy::Arbitrary,
        1 => PlacementPolicy::BlockRow,
        2 => PlacementPolicy::BlockCol,
        3 => PlacementPolicy::CyclicRow,
        4 => PlacementPolicy::CyclicCol,
        _ => {
            let dims = vec![2; rank];
            let cells = dims.iter().product::<usize>();
            let ids = (0..cells).map(|k| 3 - (k % 3) as u32).collect();
            PlacementPolicy::ExplicitGrid(Assignment::processors(&dims, ids).unwrap())
        }
    }
}

fn shape_and_blocks() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    prop::collection::vec(1usize..=7, 1..=3).prop_flat_map(|shape| {
        let blocks: Vec<_> = shape.iter().map(|&extent| 1usize..=extent).collect();
        (Just(shape), blocks)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn distribute_then_collect_restores_the_array(
        (shape, blocks) in shape_and_blocks(),
        choice in 0usize..6,
    ) {
        let ctx = local_ctx(3);
        let local = grid_values(&shape);
        let placement = placement_for(choice, shape.len());
        let result = DArray::distribute(&ctx, &local, BlockSpec::lengths(blocks), &placement);

        let column_policy = matches!(placement, PlacementPolicy::BlockCol | PlacementPolicy::CyclicCol);
        if column_policy && shape.len() == 1 {
            prop_assert!(matches!(result, Err(DArrayError::PlacementRankMismatch(_))));
        } else {
            let a = result.unwrap();
            prop_assert_eq!(a.collect().unwrap(), local);
        }
    }
}
