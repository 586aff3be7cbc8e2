use proptest::prelude::*;

use pgas_array::{
    assign,
    local_processors,
    Assignment,
    DArrayError,
    PlacementPolicy,
    ProcessorID,
    RankMismatchError,
};

proptest! {
    #[test]
    fn explicit_grid_is_periodic(
        rows in 1usize..=3,
        cols in 1usize..=3,
        grid_rows in 1usize..=9,
        grid_cols in 1usize..=9,
        seed in any::<u64>(),
    ) {
        let procs = local_processors(1, 4);
        let ids: Vec<ProcessorID> =
            (0..rows * cols).map(|i| (((seed % 4) as usize + i * 7) % 4 + 1) as ProcessorID).collect();
        let assignment = Assignment::processors(&[rows, cols], ids).unwrap();
        let placed = assign(
            &[grid_rows, grid_cols],
            &PlacementPolicy::ExplicitGrid(assignment),
            &procs,
        )
        .unwrap();

        for (index, &owner) in placed.iter_indexed() {
            let shifted_row = [index[0] + rows, index[1]];
            let shifted_col = [index[0], index[1] + cols];
            if let Some(&other) = placed.get(&shifted_row) {
                prop_assert_eq!(owner, other);
            }
            if let Some(&other) = placed.get(&shifted_col) {
                prop_assert_eq!(owner, other);
            }
        }
    }

    #[test]
    fn block_row_runs_are_contiguous_and_balanced(runs in 1usize..=40, procs in 1usize..=8) {
        let processors = local_processors(1, procs);
        let placed = assign(&[runs, 2], &PlacementPolicy::BlockRow, &processors).unwrap();

        let owners: Vec<ProcessorID> = (0..runs).map(|r| *placed.get(&[r, 0]).unwrap()).collect();
        for r in 0..runs {
            prop_assert_eq!(placed.get(&[r, 1]), Some(&owners[r]));
        }
        // Non-decreasing in list order means each processor holds one contiguous run.
        prop_assert!(owners.windows(2).all(|w| w[0] <= w[1]));

        let mut counts = vec![0usize; procs];
        for &owner in &owners {
            counts[(owner - 1) as usize] += 1;
        }
        let (base, extra) = (runs / procs, runs % procs);
        for (i, &count) in counts.iter().enumerate() {
            let expected = if i < extra { base + 1 } else { base };
            prop_assert_eq!(count, expected);
        }
    }

    #[test]
    fn cyclic_row_deals_round_robin(runs in 1usize..=30, procs in 1usize..=6) {
        let processors = local_processors(1, procs);
        let placed = assign(&[runs], &PlacementPolicy::CyclicRow, &processors).unwrap();
        for r in 0..runs {
            prop_assert_eq!(*placed.get(&[r]).unwrap(), (r % procs + 1) as ProcessorID);
        }
    }
}

#[test]
fn explicit_grid_wraps_over_larger_block_grid() {
    let procs = local_processors(1, 4);
    let assignment = Assignment::from_rows(&[[2u32, 1], [4, 3]]).unwrap();
    let placed = assign(&[4, 6], &PlacementPolicy::ExplicitGrid(assignment), &procs).unwrap();

    assert_eq!(placed.get(&[0, 0]), Some(&2));
    assert_eq!(placed.get(&[2, 2]), Some(&2));
    assert_eq!(placed.get(&[0, 1]), Some(&1));
    assert_eq!(placed.get(&[1, 0]), Some(&4));
    assert_eq!(placed.get(&[3, 5]), Some(&3));
}

#[test]
fn block_col_distributes_second_dimension() {
    let procs = local_processors(1, 3);
    let placed = assign(&[2, 7], &PlacementPolicy::BlockCol, &procs).unwrap();
    let first_row: Vec<ProcessorID> = (0..7).map(|c| *placed.get(&[0, c]).unwrap()).collect();
    assert_eq!(first_row, vec![1, 1, 1, 2, 2, 3, 3]);
}

#[test]
fn fewer_runs_than_processors_leaves_tail_idle() {
    let procs = local_processors(1, 5);
    let placed = assign(&[2], &PlacementPolicy::BlockRow, &procs).unwrap();
    assert_eq!(placed.cells(), &[1, 2]);
}

#[test]
fn column_policy_on_vector_is_a_rank_mismatch() {
    let procs = local_processors(1, 2);
    for policy in [PlacementPolicy::BlockCol, PlacementPolicy::CyclicCol] {
        let err = assign(&[8], &policy, &procs).unwrap_err();
        assert!(matches!(
            err,
            DArrayError::PlacementRankMismatch(RankMismatchError { expected: 2, actual: 1, .. })
        ));
    }
}

#[test]
fn explicit_grid_rank_must_match() {
    let procs = local_processors(1, 2);
    let assignment = Assignment::processors(&[2], vec![1, 2]).unwrap();
    let err = assign(&[2, 2], &PlacementPolicy::ExplicitGrid(assignment), &procs).unwrap_err();
    assert!(matches!(err, DArrayError::PlacementRankMismatch(_)));
}

#[test]
fn unknown_processor_is_rejected_even_when_unused() {
    let procs = local_processors(1, 2);
    // Cell (1, 1) names processor 9; a 1x1 block grid never reaches it.
    let assignment = Assignment::from_rows(&[[1u32, 2], [2, 9]]).unwrap();
    let err = assign(&[1, 1], &PlacementPolicy::ExplicitGrid(assignment), &procs).unwrap_err();
    assert_eq!(err, DArrayError::UnknownProcessor(9));
}

#[test]
fn worker_targets_resolve_to_default_processor() {
    let procs = local_processors(2, 3);
    let assignment = Assignment::workers(&[2], vec![2, 1]).unwrap();
    let placed = assign(&[4], &PlacementPolicy::ExplicitGrid(assignment), &procs).unwrap();
    assert_eq!(placed.cells(), &[4, 1, 4, 1]);

    let missing = Assignment::workers(&[1], vec![3]).unwrap();
    let err = assign(&[4], &PlacementPolicy::ExplicitGrid(missing), &procs).unwrap_err();
    assert_eq!(err, DArrayError::UnknownProcessor(3));
}

#[test]
fn arbitrary_uses_only_available_processors() {
    let procs = local_processors(1, 3);
    let placed = assign(&[5, 5], &PlacementPolicy::Arbitrary, &procs).unwrap();
    assert!(placed.cells().iter().all(|&id| (1..=3).contains(&id)));
}

#[test]
fn empty_processor_list_is_rejected() {
    let err = assign(&[2, 2], &PlacementPolicy::BlockRow, &[]).unwrap_err();
    assert_eq!(err, DArrayError::NoProcessors);
}

#[test]
fn unknown_policy_name_is_rejected() {
    let err = "spiral".parse::<PlacementPolicy>().unwrap_err();
    assert_eq!(err, DArrayError::UnknownPlacementPolicy { name: "spiral".to_string() });
    assert_eq!("cyclic-row".parse::<PlacementPolicy>().unwrap(), PlacementPolicy::CyclicRow);
}
