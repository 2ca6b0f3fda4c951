//! Two-input concat for destinations padded inside a concat block.
//!
//! Each work item loads `bytes_per_workitem` bytes with sub-group block
//! reads; a sub-group must cover whole destination blocks, so a block is
//! never split across lanes.

use crate::config::ConcatConfig;
use crate::device::DeviceInfo;
use crate::error::{ConcatError, ConcatResult};
use crate::math::div_up;
use crate::normalize::{Axis, LayoutNormalizer};
use crate::plan::{
    common_geometry, concat_block_levels, needs_large_index, ConcatExtent, ConcatPlan,
    InternalPaddingGeometry, InternalPaddingPlan, NdRange, PlanConfig,
};

fn ineligible(reason: &'static str) -> ConcatError {
    ConcatError::InternalPaddingIneligible { reason }
}

/// Plan the internal-padding kernel.
pub fn plan_internal_padding<D: DeviceInfo + ?Sized>(
    normalizer: &LayoutNormalizer,
    device: &D,
    config: &ConcatConfig,
) -> ConcatResult<ConcatPlan> {
    let ip = &config.internal_padding;
    let mut normalizer = normalizer.clone();
    normalizer.set_pessimistic_chunk_size();

    let [first, second] = normalizer.live_sources() else {
        return Err(ineligible("requires exactly two live sources"));
    };
    let src_extents = [first, second].map(|source| ConcatExtent {
        logical: source.view.dim(Axis::Concat),
        padded: source.view.padded_dim(Axis::Concat),
    });

    let dts = normalizer.data_type_size();
    let dst = normalizer.dst();
    let dst_bytes = normalizer.dst_layout().size_bytes();
    let blocks = concat_block_levels(dst, dts, dts);
    let block0 = blocks
        .first()
        .map(|level| level.size)
        .ok_or_else(|| ineligible("destination has no concat block"))?;

    let bytes_per_workitem = if dts == 8 {
        ip.wide_element_bytes_per_workitem
    } else {
        ip.preferred_bytes_per_workitem
    };
    let loads_per_thread = (bytes_per_workitem / dts).max(1);
    let total_elems = dst_bytes / dts;

    let max_sg_size = device.max_subgroup_size();
    let simd = config
        .search
        .lane_widths
        .iter()
        .copied()
        .filter(|&simd| simd > 0 && simd <= max_sg_size)
        .filter(|&simd| simd == 1 || device.may_use_subgroup(simd))
        .filter(|&simd| simd as u64 <= total_elems)
        .filter(|&simd| {
            // TODO: split blocks across lanes once the kernel takes a block range per sub-group.
            let elems_per_simd = simd as u64 * loads_per_thread;
            elems_per_simd % block0 == 0 && elems_per_simd >= block0 && simd as u64 >= block0
        })
        .max()
        .unwrap_or(1);
    if simd == 1 {
        return Err(ineligible("no lane width covers a whole concat block"));
    }

    if !ip.supported_block_sizes.contains(&block0) {
        return Err(ineligible("unsupported concat block size"));
    }
    if dts < ip.min_subgroup_alignment_bytes && dts * block0 < ip.min_subgroup_alignment_bytes {
        return Err(ineligible("concat block too narrow for sub-group access"));
    }
    if dst_bytes <= ip.min_problem_bytes {
        return Err(ineligible("problem size too small"));
    }
    let inner_axis = dst.dim(Axis::Inner);
    let min_block_read_elems = simd as u64 * loads_per_thread;
    if block0.saturating_mul(inner_axis) <= min_block_read_elems {
        return Err(ineligible("inner rows shorter than one block read"));
    }

    let row_elems = dst
        .padded_dim(Axis::Concat)
        .checked_mul(inner_axis)
        .ok_or(ConcatError::IndexOverflow { what: "concat row" })?;
    let global = [
        div_up(row_elems, min_block_read_elems) * simd as u64,
        dst.dim(Axis::Outer),
        1,
    ];
    let range = NdRange {
        global,
        local: device.optimal_local_size(global),
    };

    let plan = InternalPaddingPlan {
        config: PlanConfig {
            n_inputs: 2,
            simd,
            data_type_size: dts,
            blocks,
            read_block: normalizer.max_read_size() / dts,
            write_block: normalizer.max_write_size() / dts,
            use_internal_padding_kernel: true,
            use_large_index: needs_large_index(&normalizer),
            bytes_per_workitem,
        },
        geometry: InternalPaddingGeometry {
            common: common_geometry(&normalizer, inner_axis, range),
            src_extents,
        },
    };
    log::debug!(
        "Internal padding concat: simd {simd}, global {:?}, local {:?}",
        range.global,
        range.local
    );
    Ok(ConcatPlan::InternalPadding(plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProfile, GpuArch};
    use crate::layout::{DataType, InnerBlock, TensorLayout};
    use crate::normalize::ConcatOffset;

    fn device() -> DeviceProfile {
        DeviceProfile::new(GpuArch::XeHpc).with_subgroup_sizes(&[32, 16])
    }

    fn normalizer(dt: DataType, block: u64, dims: [[u64; 4]; 3]) -> LayoutNormalizer {
        let blocks = [InnerBlock::new(1, block)];
        let [dst, a, b] = dims.map(|dims| TensorLayout::blocked(&dims, dt, &blocks));
        let mut normalizer = LayoutNormalizer::new(&dst, 1).unwrap();
        assert!(normalizer.add_source(&a).unwrap());
        assert!(normalizer.add_source(&b).unwrap());
        normalizer
    }

    #[test]
    fn test_internal_padding_geometry() {
        let norm = normalizer(
            DataType::F32,
            16,
            [[8, 40, 32, 32], [8, 24, 32, 32], [8, 16, 32, 32]],
        );
        assert!(norm.has_internal_padding());

        let plan = plan_internal_padding(&norm, &device(), &ConcatConfig::default()).unwrap();
        let ConcatPlan::InternalPadding(plan) = plan else {
            panic!("expected an internal padding plan");
        };
        assert_eq!(plan.config.simd, 32);
        assert_eq!(plan.config.bytes_per_workitem, 16);
        assert_eq!(plan.config.read_block, 1);
        assert_eq!(plan.config.write_block, 1);
        assert!(plan.config.use_internal_padding_kernel);

        let common = &plan.geometry.common;
        assert_eq!(common.range.global, [12288, 8, 1]);
        assert_eq!(common.inner_axis, 1024);
        assert_eq!(common.dst_concat_axis, 40);
        assert_eq!(common.dst_padded_concat_axis, 48);
        assert_eq!(
            common.offsets,
            vec![
                ConcatOffset { logical: 0, padded: 0 },
                ConcatOffset { logical: 24, padded: 32 },
            ]
        );
        assert_eq!(
            plan.geometry.src_extents,
            [
                ConcatExtent { logical: 24, padded: 32 },
                ConcatExtent { logical: 16, padded: 16 },
            ]
        );
    }

    #[test]
    fn test_widest_lane_width_wins() {
        let norm = normalizer(
            DataType::F32,
            16,
            [[8, 40, 32, 32], [8, 24, 32, 32], [8, 16, 32, 32]],
        );
        let mut config = ConcatConfig::default();
        config.search.lane_widths = vec![1, 8, 16, 32];
        let plan = plan_internal_padding(&norm, &device(), &config).unwrap();
        assert_eq!(plan.config().simd, 32);

        config.search.lane_widths = vec![16, 8];
        let plan = plan_internal_padding(&norm, &device(), &config).unwrap();
        assert_eq!(plan.config().simd, 16);
    }

    #[test]
    fn test_small_problem_ineligible() {
        let norm = normalizer(DataType::F32, 16, [[2, 40, 4, 4], [2, 24, 4, 4], [2, 16, 4, 4]]);
        assert_eq!(
            plan_internal_padding(&norm, &device(), &ConcatConfig::default()),
            Err(ConcatError::InternalPaddingIneligible {
                reason: "problem size too small"
            })
        );
    }

    #[test]
    fn test_block_wider_than_lanes() {
        let norm = normalizer(DataType::F32, 64, [[8, 72, 32, 32], [8, 64, 32, 32], [8, 8, 32, 32]]);
        assert!(matches!(
            plan_internal_padding(&norm, &device(), &ConcatConfig::default()),
            Err(ConcatError::InternalPaddingIneligible { .. })
        ));
    }

    #[test]
    fn test_narrow_block_alignment() {
        // 4 one-byte elements fill exactly one aligned access.
        let norm = normalizer(DataType::S8, 4, [[64, 6, 64, 512], [64, 4, 64, 512], [64, 2, 64, 512]]);
        let plan = plan_internal_padding(&norm, &device(), &ConcatConfig::default()).unwrap();
        assert_eq!(plan.config().simd, 32);

        let mut config = ConcatConfig::default();
        config.internal_padding.min_subgroup_alignment_bytes = 8;
        assert_eq!(
            plan_internal_padding(&norm, &device(), &config),
            Err(ConcatError::InternalPaddingIneligible {
                reason: "concat block too narrow for sub-group access"
            })
        );
    }
}
