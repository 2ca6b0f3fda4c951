//! Concat dispatch planning.
//!
//! A plan is created once per request and reused for every execution:
//! - Layout normalization (outer x concat x inner)
//! - Strategy selection (internal padding, then general)
//! - Static kernel configuration and runtime geometry
//!
//! # Strategy order
//! ```text
//! normalize dst, add every source
//! if dst has internal padding and exactly two sources are live:
//!     try internal padding; on success done
//! general: search (simd, bytes), build offset table and geometry
//! ```

pub mod cache;
pub mod general;
pub mod internal_padding;
pub mod search;

pub use cache::PlanCache;
pub use search::ProbeInfo;

use crate::config::{ConcatConfig, StrategyKind};
use crate::device::DeviceInfo;
use crate::error::{ConcatError, ConcatResult, TensorRole};
use crate::layout::TensorLayout;
use crate::normalize::{Axis, ConcatOffset, LayoutNormalizer, NormalizedView};

/// Largest byte size 32-bit kernel indexing can address.
pub const MAX_SMALL_INDEX_BYTES: u64 = i32::MAX as u64;

/// A concat problem: destination, sources in order, and the concat axis.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConcatRequest {
    /// Destination layout.
    pub dst: TensorLayout,
    /// Source layouts, empty ones included.
    pub sources: Vec<TensorLayout>,
    /// Axis the sources are joined along.
    pub concat_axis: usize,
}

impl ConcatRequest {
    /// Bundle a concat problem.
    pub fn new(dst: TensorLayout, sources: Vec<TensorLayout>, concat_axis: usize) -> Self {
        Self {
            dst,
            sources,
            concat_axis,
        }
    }
}

/// One concat block level of the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockLevel {
    /// Block length, in plan elements.
    pub size: u64,
    /// Distance between consecutive block indices, in plan elements.
    pub stride: u64,
}

/// Static kernel configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlanConfig {
    /// Live input count.
    pub n_inputs: usize,
    /// Lane width.
    pub simd: u32,
    /// Bytes per plan element.
    pub data_type_size: u64,
    /// Destination concat blocks, innermost first.
    pub blocks: Vec<BlockLevel>,
    /// Elements one sub-group reads per block message.
    pub read_block: u64,
    /// Elements one sub-group writes per block message.
    pub write_block: u64,
    /// Dispatch the internal-padding kernel.
    pub use_internal_padding_kernel: bool,
    /// Index arguments are 64-bit.
    pub use_large_index: bool,
    /// Bytes each work item loads; 0 for the general kernel.
    pub bytes_per_workitem: u64,
}

impl PlanConfig {
    /// Named integer constants for the parameterized kernel.
    pub fn kernel_defines(&self) -> Vec<(String, u64)> {
        let mut defines = vec![
            ("WRITE_BLOCK".to_string(), self.write_block),
            ("READ_BLOCK".to_string(), self.read_block),
            ("N_INPUTS".to_string(), self.n_inputs as u64),
            ("BLOCK_DEPTH".to_string(), self.blocks.len() as u64),
        ];
        for (i, level) in self.blocks.iter().enumerate() {
            defines.push((format!("BLOCK_B{i}"), level.size));
            defines.push((format!("BLOCK_S{i}"), level.stride));
        }
        defines.extend([
            ("SIMD".to_string(), self.simd as u64),
            ("DATA_TYPE_SIZE".to_string(), self.data_type_size),
            ("USE_LARGE_INDEX".to_string(), self.use_large_index as u64),
            ("BYTES_PER_WORKITEM".to_string(), self.bytes_per_workitem),
        ]);
        defines
    }

    /// Width of every index argument.
    pub fn index_width(&self) -> crate::args::IndexWidth {
        if self.use_large_index {
            crate::args::IndexWidth::U64
        } else {
            crate::args::IndexWidth::I32
        }
    }
}

/// Global and local work sizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NdRange {
    /// Global work size.
    pub global: [u64; 3],
    /// Local (work-group) size.
    pub local: [u64; 3],
}

/// Geometry shared by both strategies.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RuntimeGeometry {
    /// Sources in the request, empty ones included.
    pub input_count: usize,
    /// Request positions of the live sources.
    pub live_inputs: Vec<usize>,
    /// Concat offsets keyed by live position.
    pub offsets: Vec<ConcatOffset>,
    /// Destination concat extent the kernel fills.
    pub dst_concat_axis: u64,
    /// Padded destination concat extent.
    pub dst_padded_concat_axis: u64,
    /// Inner extent argument of the kernel.
    pub inner_axis: u64,
    /// Dispatch range.
    pub range: NdRange,
}

/// General strategy geometry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GeneralGeometry {
    /// Fields shared with the internal-padding kernel.
    pub common: RuntimeGeometry,
    /// Source row pitches in plan elements, keyed by live position.
    pub src_outer_strides: Vec<u64>,
    /// Destination row pitch in plan elements.
    pub dst_outer_stride: u64,
    /// Destination base offset in plan elements.
    pub dst_offset0: u64,
    /// Outer rows.
    pub outer_extent: u64,
    /// Inner-axis rows one lane group reads.
    pub read_overlap: u64,
    /// Plan elements covered along the first global dimension per row
    /// group.
    pub gws0_block: u64,
}

/// Logical and padded concat extent of one source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConcatExtent {
    /// Logical extent.
    pub logical: u64,
    /// Padded extent.
    pub padded: u64,
}

/// Internal-padding strategy geometry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InternalPaddingGeometry {
    /// Fields shared with the general kernel.
    pub common: RuntimeGeometry,
    /// Extents of the two live sources.
    pub src_extents: [ConcatExtent; 2],
}

/// Plan for the general kernel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GeneralPlan {
    /// Kernel constants.
    pub config: PlanConfig,
    /// Runtime geometry.
    pub geometry: GeneralGeometry,
}

/// Plan for the internal-padding kernel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InternalPaddingPlan {
    /// Kernel constants.
    pub config: PlanConfig,
    /// Runtime geometry.
    pub geometry: InternalPaddingGeometry,
}

/// Kernel a plan dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelVariant {
    /// Offset-table kernel.
    General,
    /// Two-input internal-padding kernel.
    InternalPadding,
}

impl KernelVariant {
    /// Entry point name.
    pub fn kernel_name(&self) -> &'static str {
        match self {
            KernelVariant::General => "concat_general",
            KernelVariant::InternalPadding => "concat_internal_padding",
        }
    }
}

/// Immutable concat plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConcatPlan {
    /// General strategy.
    General(GeneralPlan),
    /// Internal-padding strategy.
    InternalPadding(InternalPaddingPlan),
}

impl ConcatPlan {
    /// Kernel constants.
    pub fn config(&self) -> &PlanConfig {
        match self {
            ConcatPlan::General(plan) => &plan.config,
            ConcatPlan::InternalPadding(plan) => &plan.config,
        }
    }

    /// Geometry shared by both strategies.
    pub fn geometry(&self) -> &RuntimeGeometry {
        match self {
            ConcatPlan::General(plan) => &plan.geometry.common,
            ConcatPlan::InternalPadding(plan) => &plan.geometry.common,
        }
    }

    /// Dispatch range.
    pub fn range(&self) -> &NdRange {
        &self.geometry().range
    }

    /// Kernel the plan dispatches.
    pub fn kernel_variant(&self) -> KernelVariant {
        match self {
            ConcatPlan::General(_) => KernelVariant::General,
            ConcatPlan::InternalPadding(_) => KernelVariant::InternalPadding,
        }
    }

    /// True for internal-padding plans.
    pub fn uses_internal_padding_kernel(&self) -> bool {
        self.config().use_internal_padding_kernel
    }
}

/// Plan a concat with the default configuration.
pub fn plan_concat<D: DeviceInfo + ?Sized>(
    request: &ConcatRequest,
    device: &D,
) -> ConcatResult<ConcatPlan> {
    plan_concat_with_config(request, device, &ConcatConfig::default())
}

/// Plan a concat.
///
/// Every error means the vectorized concat is unimplemented for `request`.
pub fn plan_concat_with_config<D: DeviceInfo + ?Sized>(
    request: &ConcatRequest,
    device: &D,
    config: &ConcatConfig,
) -> ConcatResult<ConcatPlan> {
    let normalizer = LayoutNormalizer::new(&request.dst, request.concat_axis)?
        .with_max_chunk_bytes(config.search.max_chunk_bytes);
    let normalizer = request
        .sources
        .iter()
        .enumerate()
        .try_fold(normalizer, |mut normalizer, (index, source)| {
            if source.blocking().is_none() {
                Err(ConcatError::UnsupportedFormat {
                    tensor: TensorRole::Source(index),
                })
            } else if normalizer.add_source(source)? {
                Ok(normalizer)
            } else {
                Err(ConcatError::IncompatibleSource { index })
            }
        })?;

    let offsets = normalizer.concat_offsets();
    let dst_extent = normalizer.dst().dim(Axis::Concat);
    if offsets.logical_total != dst_extent {
        return Err(ConcatError::ExtentMismatch {
            sources: offsets.logical_total,
            destination: dst_extent,
        });
    }

    if normalizer.live_sources().is_empty() {
        log::debug!("No live sources, nothing to dispatch");
        return Ok(general::plan_empty(&normalizer, device));
    }

    match config.strategy.force {
        Some(StrategyKind::General) => general::plan_general(&normalizer, device, config),
        Some(StrategyKind::InternalPadding) => {
            internal_padding::plan_internal_padding(&normalizer, device, config)
        }
        None => {
            if config.internal_padding.enabled
                && normalizer.has_internal_padding()
                && normalizer.live_sources().len() == 2
            {
                match internal_padding::plan_internal_padding(&normalizer, device, config) {
                    Ok(plan) => return Ok(plan),
                    Err(err) => log::debug!("Falling back to the general concat: {err}"),
                }
            }
            general::plan_general(&normalizer, device, config)
        }
    }
}

/// Walk the destination blocks innermost first and keep the concat ones.
///
/// The innermost block is rescaled from `dts`-byte to `ts`-byte elements;
/// strides accumulate in the rescaled unit.
pub(crate) fn concat_block_levels(view: &NormalizedView, dts: u64, ts: u64) -> Vec<BlockLevel> {
    let mut levels = Vec::new();
    let mut stride = 1;
    for (i, block) in view.blocks.iter().rev().enumerate() {
        let size = if i == 0 {
            block.size * dts / ts
        } else {
            block.size
        };
        if block.axis == Axis::Concat {
            levels.push(BlockLevel { size, stride });
        }
        stride *= size;
    }
    levels
}

/// Build the geometry fields both strategies share.
pub(crate) fn common_geometry(
    normalizer: &LayoutNormalizer,
    inner_axis: u64,
    range: NdRange,
) -> RuntimeGeometry {
    let offsets = normalizer.concat_offsets();
    let dst_padded_concat_axis = normalizer.dst().padded_dim(Axis::Concat);
    RuntimeGeometry {
        input_count: normalizer.n_inputs(),
        live_inputs: normalizer.live_sources().iter().map(|s| s.index).collect(),
        dst_concat_axis: offsets.usable_extent(dst_padded_concat_axis),
        dst_padded_concat_axis,
        offsets: offsets.offsets,
        inner_axis,
        range,
    }
}

/// True when some participating tensor needs 64-bit indexing.
pub(crate) fn needs_large_index(normalizer: &LayoutNormalizer) -> bool {
    normalizer.max_tensor_bytes() > MAX_SMALL_INDEX_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DataType, InnerBlock};
    use crate::normalize::fold;

    #[test]
    fn test_block_levels_rescale_innermost() {
        let layout = TensorLayout::blocked(
            &[2, 64, 8],
            DataType::F32,
            &[InnerBlock::new(1, 4), InnerBlock::new(2, 2), InnerBlock::new(1, 4)],
        );
        let view = fold(&layout, 1).unwrap();

        let levels = concat_block_levels(&view, 4, 4);
        assert_eq!(
            levels,
            vec![
                BlockLevel { size: 4, stride: 1 },
                BlockLevel { size: 4, stride: 8 },
            ]
        );

        let levels = concat_block_levels(&view, 4, 1);
        assert_eq!(
            levels,
            vec![
                BlockLevel { size: 16, stride: 1 },
                BlockLevel { size: 4, stride: 32 },
            ]
        );
    }

    #[test]
    fn test_kernel_defines() {
        let config = PlanConfig {
            n_inputs: 2,
            simd: 16,
            data_type_size: 4,
            blocks: vec![BlockLevel { size: 16, stride: 1 }],
            read_block: 64,
            write_block: 8,
            use_internal_padding_kernel: false,
            use_large_index: true,
            bytes_per_workitem: 0,
        };
        let defines = config.kernel_defines();
        let lookup = |name: &str| {
            defines
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| *value)
        };
        assert_eq!(lookup("N_INPUTS"), Some(2));
        assert_eq!(lookup("BLOCK_DEPTH"), Some(1));
        assert_eq!(lookup("BLOCK_B0"), Some(16));
        assert_eq!(lookup("BLOCK_S0"), Some(1));
        assert_eq!(lookup("BLOCK_B1"), None);
        assert_eq!(lookup("USE_LARGE_INDEX"), Some(1));
        assert_eq!(lookup("READ_BLOCK"), Some(64));
        assert_eq!(defines.len(), 10);
    }

    #[test]
    fn test_extent_mismatch() {
        let request = ConcatRequest::new(
            TensorLayout::plain(&[4, 10], DataType::F32),
            vec![
                TensorLayout::plain(&[4, 3], DataType::F32),
                TensorLayout::plain(&[4, 3], DataType::F32),
            ],
            1,
        );
        let device = crate::device::DeviceProfile::new(crate::device::GpuArch::XeHpg);
        assert_eq!(
            plan_concat(&request, &device),
            Err(ConcatError::ExtentMismatch {
                sources: 6,
                destination: 10
            })
        );
    }

    #[test]
    fn test_incompatible_source_index() {
        let request = ConcatRequest::new(
            TensorLayout::plain(&[4, 10], DataType::F32),
            vec![
                TensorLayout::plain(&[4, 5], DataType::F32),
                TensorLayout::plain(&[5, 5], DataType::F32),
            ],
            1,
        );
        let device = crate::device::DeviceProfile::new(crate::device::GpuArch::XeHpg);
        assert_eq!(
            plan_concat(&request, &device),
            Err(ConcatError::IncompatibleSource { index: 1 })
        );

        let mut request = request;
        request.sources[0] = TensorLayout::opaque(&[4, 5], DataType::F32);
        assert_eq!(
            plan_concat(&request, &device),
            Err(ConcatError::UnsupportedFormat {
                tensor: TensorRole::Source(0)
            })
        );
    }
}
