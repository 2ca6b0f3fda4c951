//! General concat strategy.
//!
//! One dispatch reads contiguous runs of every live source through
//! sub-group block messages and writes them into disjoint regions of the
//! destination, using a per-source offset table.
//!
//! # Geometry
//! ```text
//! inner        = padded inner extent (plan elements)
//! gws0_block   = inner * read_block / gcd(inner, read_block)
//! read_overlap = gws0_block / inner
//! gws          = [gws0_block * simd / read_block,
//!                 ceil(outer / read_overlap),
//!                 padded concat total]
//! ```
//!
//! The kernel's `inner_axis` argument is the destination concat stride,
//! which also spans the concat blocks.

use crate::config::ConcatConfig;
use crate::device::DeviceInfo;
use crate::error::{ConcatError, ConcatResult};
use crate::math::{div_up, gcd};
use crate::normalize::{Axis, LayoutNormalizer};
use crate::plan::search::best_candidate;
use crate::plan::{
    common_geometry, concat_block_levels, needs_large_index, ConcatPlan, GeneralGeometry,
    GeneralPlan, NdRange, PlanConfig,
};

/// Convert `elems` elements of `dts` bytes into `ts`-byte plan elements.
fn rescale(elems: u64, dts: u64, ts: u64, what: &'static str) -> ConcatResult<u64> {
    elems
        .checked_mul(dts)
        .map(|bytes| bytes / ts)
        .ok_or(ConcatError::IndexOverflow { what })
}

/// Plan the general kernel.
pub fn plan_general<D: DeviceInfo + ?Sized>(
    normalizer: &LayoutNormalizer,
    device: &D,
    config: &ConcatConfig,
) -> ConcatResult<ConcatPlan> {
    let info = best_candidate(normalizer, device, &config.search)?;
    let ts = info.type_size;
    let dts = normalizer.data_type_size();
    let dst = normalizer.dst();

    let src_outer_strides = normalizer
        .live_sources()
        .iter()
        .map(|source| rescale(source.view.stride(Axis::Outer), dts, ts, "source outer stride"))
        .collect::<ConcatResult<Vec<_>>>()?;
    let dst_outer_stride = rescale(dst.stride(Axis::Outer), dts, ts, "destination outer stride")?;
    let dst_offset0 = rescale(dst.offset0, dts, ts, "destination offset")?;
    let inner = rescale(dst.padded_dim(Axis::Inner), dts, ts, "inner extent")?;
    let inner_offset = rescale(dst.stride(Axis::Concat), dts, ts, "inner axis")?;

    let read_block = info.block;
    let write_block = read_block.min(normalizer.max_write_size() / ts);

    // Lowest common multiple of the row length and the read block.
    let shared_read = gcd(inner, read_block);
    let gws0_block = inner
        .checked_mul(read_block)
        .ok_or(ConcatError::IndexOverflow { what: "gws0 block" })?
        / shared_read;
    let read_overlap = gws0_block / inner;
    let outer_extent = dst.dim(Axis::Outer);
    let global = [
        gws0_block
            .checked_mul(info.simd as u64)
            .ok_or(ConcatError::IndexOverflow { what: "global size" })?
            / read_block,
        div_up(outer_extent, read_overlap),
        normalizer.concat_offsets().padded_total,
    ];

    // Lots of zero padding byte writes.
    let logical = dst.dim(Axis::Concat);
    let padded = dst.padded_dim(Axis::Concat);
    let ratio = config.general.padding_rejection_ratio;
    if write_block * ts == 1 && ratio.saturating_mul(logical) <= padded {
        log::debug!("Rejecting single byte writes over padded extent {padded} (logical {logical})");
        return Err(ConcatError::ExcessivePadding {
            logical,
            padded,
            ratio,
        });
    }

    let range = NdRange {
        global,
        local: device.optimal_local_size(global),
    };
    let plan = GeneralPlan {
        config: PlanConfig {
            n_inputs: normalizer.live_sources().len(),
            simd: info.simd,
            data_type_size: ts,
            blocks: concat_block_levels(dst, dts, ts),
            read_block,
            write_block,
            use_internal_padding_kernel: false,
            use_large_index: needs_large_index(normalizer),
            bytes_per_workitem: 0,
        },
        geometry: GeneralGeometry {
            common: common_geometry(normalizer, inner_offset, range),
            src_outer_strides,
            dst_outer_stride,
            dst_offset0,
            outer_extent,
            read_overlap,
            gws0_block,
        },
    };
    log::debug!(
        "General concat: {} inputs, global {:?}, local {:?}",
        plan.config.n_inputs,
        range.global,
        range.local
    );
    Ok(ConcatPlan::General(plan))
}

/// Plan for a request without live sources; executing it dispatches
/// nothing.
pub fn plan_empty<D: DeviceInfo + ?Sized>(normalizer: &LayoutNormalizer, device: &D) -> ConcatPlan {
    let dts = normalizer.data_type_size();
    let dst = normalizer.dst();
    let global = [0; 3];
    let range = NdRange {
        global,
        local: device.optimal_local_size(global),
    };
    ConcatPlan::General(GeneralPlan {
        config: PlanConfig {
            n_inputs: 0,
            simd: 1,
            data_type_size: dts,
            blocks: concat_block_levels(dst, dts, dts),
            read_block: 0,
            write_block: 0,
            use_internal_padding_kernel: false,
            use_large_index: needs_large_index(normalizer),
            bytes_per_workitem: 0,
        },
        geometry: GeneralGeometry {
            common: common_geometry(normalizer, dst.stride(Axis::Concat), range),
            src_outer_strides: Vec::new(),
            dst_outer_stride: dst.stride(Axis::Outer),
            dst_offset0: dst.offset0,
            outer_extent: dst.dim(Axis::Outer),
            read_overlap: 1,
            gws0_block: 0,
        },
    })
}
