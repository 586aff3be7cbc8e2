#![allow(dead_code)]

use pgas_array::{BlockSpec, ClusterConfig, ClusterContext, DArray, DArrayResult, PlacementPolicy};

pub const SIDE_SMALL: usize = 256;
pub const SIDE_MED: usize = 1_024;
pub const SIDE_LARGE: usize = 2_048;

pub fn make_cluster(processors: usize) -> ClusterContext {
    let config = ClusterConfig::default()
        .with_workers(1)
        .with_processors_per_worker(processors);
    ClusterContext::local(&config).unwrap()
}

/// Square matrix cut into `blocks_per_side`² blocks, fully materialized.
pub fn populate(
    ctx: &ClusterContext,
    side: usize,
    blocks_per_side: usize,
    placement: &PlacementPolicy,
) -> DArrayResult<DArray<f64>> {
    let len = side.div_ceil(blocks_per_side);
    let array = DArray::allocate(ctx, &[side, side], BlockSpec::lengths([len, len]), placement, |domain| {
        let origin = domain.origin();
        let shape = domain.shape();
        (0..domain.volume())
            .map(|k| ((origin[0] + k / shape[1]) * 31 + origin[1] + k % shape[1]) as f64 * 1e-3)
            .collect()
    })?;
    array.materialize()?;
    Ok(array)
}
