//! Folding of arbitrary-rank blocked layouts into an `outer x concat x inner`
//! view.
//!
//! Every axis contributes an outer part (`padded / block_volume`) and every
//! inner block a block dimension. Ordered by stride, all physical dims
//! outside the concat axis' outer part fold into `outer`; all dims inside
//! it, concat sub-blocks included, fold into `inner`.
//!
//! Example: an `nChw16c` tensor concatenated along `h`:
//! ```text
//! physical:  n(2) c/16(2) | h(4) | w(4) c16(16)
//! folded:    outer = 4,     concat = 4, inner = 64
//! ```

use crate::error::{ConcatError, ConcatResult, TensorRole};
use crate::layout::{BlockingDesc, TensorLayout};
use crate::math::{gcd, pow2_factor};

/// Default cap on the contiguous chunk assumed for reads and writes.
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 32;

/// Axes of a folded view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    /// Everything outside the concat axis.
    Outer = 0,
    /// The concat axis.
    Concat = 1,
    /// Everything inside the concat axis.
    Inner = 2,
}

/// Inner block of a folded view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FoldedBlock {
    /// Folded axis the block belongs to; never [`Axis::Outer`].
    pub axis: Axis,
    /// Block length in elements.
    pub size: u64,
}

/// Read-only three-axis projection of a [`TensorLayout`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NormalizedView {
    /// Logical sizes.
    pub dims: [u64; 3],
    /// Padded sizes.
    pub padded_dims: [u64; 3],
    /// Element strides: outer row pitch, concat outer-part stride, 1.
    pub strides: [u64; 3],
    /// Inner blocks, outermost first.
    pub blocks: Vec<FoldedBlock>,
    /// Base offset in elements.
    pub offset0: u64,
    /// Bytes per element.
    pub data_type_size: u64,
}

impl NormalizedView {
    /// Logical size of `axis`.
    pub fn dim(&self, axis: Axis) -> u64 {
        self.dims[axis as usize]
    }

    /// Padded size of `axis`.
    pub fn padded_dim(&self, axis: Axis) -> u64 {
        self.padded_dims[axis as usize]
    }

    /// Element stride of `axis`.
    pub fn stride(&self, axis: Axis) -> u64 {
        self.strides[axis as usize]
    }

    /// Lengths of the blocks placed on the concat axis, outermost first.
    pub fn concat_blocks(&self) -> impl Iterator<Item = u64> + '_ {
        self.blocks
            .iter()
            .filter(|block| block.axis == Axis::Concat)
            .map(|block| block.size)
    }

    /// Product of the concat block lengths.
    pub fn concat_block_volume(&self) -> u64 {
        self.concat_blocks().product()
    }

    /// True when the logical concat extent stops partway through a block.
    pub fn has_block_remainder(&self) -> bool {
        let extent = self.dim(Axis::Concat);
        self.concat_blocks().any(|size| extent % size != 0)
    }

    /// Element distance between consecutive concat indices inside the
    /// innermost concat block.
    fn concat_unit(&self) -> u64 {
        let mut stride = 1;
        for block in self.blocks.iter().rev() {
            if block.axis == Axis::Concat {
                return stride;
            }
            stride *= block.size;
        }
        self.stride(Axis::Concat)
    }

    /// Length in elements of the contiguous run covering `extent` concat
    /// indices of one outer row.
    fn run_elems(&self, extent: u64) -> ConcatResult<u64> {
        let volume = self.concat_block_volume();
        if extent % volume == 0 {
            (extent / volume)
                .checked_mul(self.stride(Axis::Concat))
                .ok_or(ConcatError::IndexOverflow { what: "contiguous run" })
        } else {
            Ok(self.concat_unit())
        }
    }
}

/// Why a layout has no folded view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FoldError {
    /// The layout cannot be expressed as `outer x concat x inner`.
    #[error("{0}")]
    Unfoldable(&'static str),

    /// A folded size does not fit in 64 bits.
    #[error("{0} overflows")]
    Overflow(&'static str),
}

fn checked_product(sizes: impl IntoIterator<Item = u64>) -> Result<u64, FoldError> {
    sizes
        .into_iter()
        .try_fold(1u64, u64::checked_mul)
        .ok_or(FoldError::Overflow("folded extent"))
}

fn folded_blocks(blocking: &BlockingDesc, concat_axis: usize) -> Vec<FoldedBlock> {
    blocking
        .inner_blocks
        .iter()
        .map(|block| FoldedBlock {
            axis: if block.axis == concat_axis {
                Axis::Concat
            } else {
                Axis::Inner
            },
            size: block.size,
        })
        .collect()
}

#[derive(Clone, Copy, Debug)]
struct PhysDim {
    size: u64,
    stride: u64,
    axis: usize,
    is_block: bool,
}

/// Fold `layout` around `concat_axis`.
///
/// A layout with no extent along the concat axis occupies no memory, so
/// its axes split by logical position instead of by stride.
pub fn fold(layout: &TensorLayout, concat_axis: usize) -> Result<NormalizedView, FoldError> {
    use FoldError::Unfoldable;

    let blocking = layout.blocking().ok_or(Unfoldable("layout is not blocked"))?;
    let rank = layout.rank();
    if concat_axis >= rank {
        return Err(Unfoldable("concat axis out of bounds"));
    }
    if blocking.strides.len() != rank || layout.padded_dims.len() != rank {
        return Err(Unfoldable("malformed layout"));
    }
    if (0..rank).any(|axis| axis != concat_axis && layout.padded_dims[axis] == 0) {
        return Err(Unfoldable("layout is empty"));
    }
    if blocking
        .inner_blocks
        .iter()
        .any(|block| block.axis >= rank || block.size == 0)
    {
        return Err(Unfoldable("malformed inner block"));
    }
    if layout.padded_dims[concat_axis] == 0 {
        return fold_empty(layout, blocking, concat_axis);
    }

    let mut phys = Vec::with_capacity(rank + blocking.inner_blocks.len());
    for axis in 0..rank {
        let volume = layout.block_volume(axis);
        if layout.padded_dims[axis] % volume != 0 {
            return Err(Unfoldable("padded size is not a multiple of the block volume"));
        }
        let size = layout.padded_dims[axis] / volume;
        // Unit dims carry no layout information, except the concat axis.
        if size == 1 && axis != concat_axis {
            continue;
        }
        phys.push(PhysDim {
            size,
            stride: blocking.strides[axis],
            axis,
            is_block: false,
        });
    }
    let mut stride = 1u64;
    for block in blocking.inner_blocks.iter().rev() {
        if block.size > 1 {
            phys.push(PhysDim {
                size: block.size,
                stride,
                axis: block.axis,
                is_block: true,
            });
        }
        stride = stride
            .checked_mul(block.size)
            .ok_or(FoldError::Overflow("inner block region"))?;
    }

    phys.sort_by(|a, b| {
        b.stride
            .cmp(&a.stride)
            .then(b.size.cmp(&a.size))
            .then(a.is_block.cmp(&b.is_block))
    });

    let pos = phys
        .iter()
        .position(|d| d.axis == concat_axis && !d.is_block)
        .ok_or(Unfoldable("concat axis missing"))?;
    if phys[..pos].iter().any(|d| d.axis == concat_axis) {
        return Err(Unfoldable("concat block outside the concat dimension"));
    }

    let dense = |w: &[PhysDim]| w[1].stride.checked_mul(w[1].size) == Some(w[0].stride);
    if !phys[pos..].windows(2).all(dense) || phys[phys.len() - 1].stride != 1 {
        return Err(Unfoldable("inner region is not dense"));
    }
    if !phys[..pos].windows(2).all(dense) {
        return Err(Unfoldable("outer dims are not dense"));
    }

    let concat_span = phys[pos]
        .stride
        .checked_mul(phys[pos].size)
        .ok_or(FoldError::Overflow("concat span"))?;
    let outer_stride = if pos > 0 {
        phys[pos - 1].stride
    } else {
        concat_span
    };
    if outer_stride < concat_span {
        return Err(Unfoldable("outer dims overlap the concat dimension"));
    }

    // (logical, padded) factors of the outer and inner extents.
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    for axis in (0..rank).filter(|&axis| axis != concat_axis) {
        let outer_part = phys[..pos].iter().any(|d| d.axis == axis);
        let inner_part = phys[pos + 1..].iter().any(|d| d.axis == axis);
        let volume = layout.block_volume(axis);
        match (outer_part, inner_part) {
            (true, false) => outer.push((layout.dims[axis], layout.padded_dims[axis])),
            (true, true) => {
                let blocks = layout.padded_dims[axis] / volume;
                outer.push((blocks, blocks));
                inner.push((volume, volume));
            }
            (false, _) => inner.push((layout.dims[axis], layout.padded_dims[axis])),
        }
    }

    Ok(NormalizedView {
        dims: [
            checked_product(outer.iter().map(|&(logical, _)| logical))?,
            layout.dims[concat_axis],
            checked_product(inner.iter().map(|&(logical, _)| logical))?,
        ],
        padded_dims: [
            checked_product(outer.iter().map(|&(_, padded)| padded))?,
            layout.padded_dims[concat_axis],
            checked_product(inner.iter().map(|&(_, padded)| padded))?,
        ],
        strides: [outer_stride, phys[pos].stride, 1],
        blocks: folded_blocks(blocking, concat_axis),
        offset0: layout.offset0,
        data_type_size: layout.data_type_size(),
    })
}

fn fold_empty(
    layout: &TensorLayout,
    blocking: &BlockingDesc,
    concat_axis: usize,
) -> Result<NormalizedView, FoldError> {
    let (outer, inner) = (0..concat_axis, concat_axis + 1..layout.rank());
    Ok(NormalizedView {
        dims: [
            checked_product(layout.dims[outer.clone()].iter().copied())?,
            layout.dims[concat_axis],
            checked_product(layout.dims[inner.clone()].iter().copied())?,
        ],
        padded_dims: [
            checked_product(layout.padded_dims[outer].iter().copied())?,
            0,
            checked_product(layout.padded_dims[inner].iter().copied())?,
        ],
        strides: [0, 0, 1],
        blocks: folded_blocks(blocking, concat_axis),
        offset0: layout.offset0,
        data_type_size: layout.data_type_size(),
    })
}

/// Source with a non-zero padded concat extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveSource {
    /// Position of the source in the request.
    pub index: usize,
    /// Folded view of the source.
    pub view: NormalizedView,
    /// Footprint of the source in bytes.
    pub size_bytes: u64,
}

/// Logical and padded start of a live source along the concat axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ConcatOffset {
    /// Start in logical elements.
    pub logical: u64,
    /// Start in padded elements.
    pub padded: u64,
}

/// Running concat offsets keyed by live position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConcatOffsets {
    /// Start of every live source.
    pub offsets: Vec<ConcatOffset>,
    /// Sum of the logical extents.
    pub logical_total: u64,
    /// Sum of the padded extents.
    pub padded_total: u64,
    /// Padding of the last live source.
    pub final_padding: u64,
}

impl ConcatOffsets {
    /// Concat extent of the destination the kernel must fill.
    pub fn usable_extent(&self, dst_padded: u64) -> u64 {
        dst_padded.min(self.logical_total.saturating_add(self.final_padding))
    }

    fn push(&mut self, view: &NormalizedView) -> ConcatResult<()> {
        let extent = view.dim(Axis::Concat);
        let padded = view.padded_dim(Axis::Concat);
        let logical_total = self
            .logical_total
            .checked_add(extent)
            .ok_or(ConcatError::IndexOverflow { what: "logical concat offset" })?;
        let padded_total = self
            .padded_total
            .checked_add(padded)
            .ok_or(ConcatError::IndexOverflow { what: "padded concat offset" })?;

        self.offsets.push(ConcatOffset {
            logical: self.logical_total,
            padded: self.padded_total,
        });
        self.final_padding = padded.saturating_sub(extent);
        self.logical_total = logical_total;
        self.padded_total = padded_total;
        Ok(())
    }
}

/// Destination view plus the live sources added to it.
#[derive(Clone, Debug)]
pub struct LayoutNormalizer {
    concat_axis: usize,
    dst_layout: TensorLayout,
    dst: NormalizedView,
    live: Vec<LiveSource>,
    offsets: ConcatOffsets,
    n_inputs: usize,
    read_chunk: u64,
    write_chunk: u64,
    max_chunk_bytes: u64,
    pessimistic: bool,
}

/// Fold `elems` elements of `dts` bytes into a running byte gcd.
fn gcd_bytes(acc: u64, elems: u64, dts: u64) -> ConcatResult<u64> {
    elems
        .checked_mul(dts)
        .map(|bytes| gcd(acc, bytes))
        .ok_or(ConcatError::IndexOverflow { what: "chunk size" })
}

impl LayoutNormalizer {
    /// Fold the destination around `concat_axis`.
    pub fn new(dst: &TensorLayout, concat_axis: usize) -> ConcatResult<Self> {
        let tensor = TensorRole::Destination;
        if dst.blocking().is_none() {
            return Err(ConcatError::UnsupportedFormat { tensor });
        }
        if concat_axis >= dst.rank() {
            return Err(ConcatError::ConcatAxisOutOfBounds {
                axis: concat_axis,
                rank: dst.rank(),
            });
        }
        let view = fold(dst, concat_axis).map_err(|err| match err {
            FoldError::Unfoldable(reason) => {
                log::debug!("Destination layout cannot be folded: {reason}");
                ConcatError::UnsupportedFormat { tensor }
            }
            FoldError::Overflow(what) => ConcatError::IndexOverflow { what },
        })?;

        let dts = view.data_type_size;
        let write_chunk = gcd_bytes(0, view.stride(Axis::Outer), dts)?;
        let write_chunk = gcd_bytes(write_chunk, view.offset0, dts)?;

        Ok(Self {
            concat_axis,
            dst_layout: dst.clone(),
            dst: view,
            live: Vec::new(),
            offsets: ConcatOffsets::default(),
            n_inputs: 0,
            read_chunk: 0,
            write_chunk,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            pessimistic: false,
        })
    }

    /// Cap the assumed read and write chunks at `bytes`.
    pub fn with_max_chunk_bytes(mut self, bytes: u64) -> Self {
        self.max_chunk_bytes = bytes.max(1);
        self
    }

    /// Register the next source.
    ///
    /// Returns `Ok(false)` when the source cannot share a folded view with
    /// the destination. Empty sources are accepted and take no further
    /// part.
    pub fn add_source(&mut self, layout: &TensorLayout) -> ConcatResult<bool> {
        let index = self.n_inputs;
        self.n_inputs += 1;

        if layout.blocking().is_none() {
            log::debug!("Source #{index} is not blocked");
            return Ok(false);
        }
        if layout.rank() != self.dst_layout.rank()
            || layout.data_type != self.dst_layout.data_type
        {
            log::debug!("Source #{index} differs in rank or data type");
            return Ok(false);
        }
        let axis = self.concat_axis;
        let dims_match = (0..layout.rank())
            .filter(|&a| a != axis)
            .all(|a| layout.dims[a] == self.dst_layout.dims[a]);
        if !dims_match {
            log::debug!("Source #{index} differs outside the concat axis");
            return Ok(false);
        }
        if layout.padded_dims[axis] == 0 {
            return Ok(true);
        }

        let view = match fold(layout, axis) {
            Ok(view) => view,
            Err(FoldError::Unfoldable(reason)) => {
                log::debug!("Source #{index} cannot be folded: {reason}");
                return Ok(false);
            }
            Err(FoldError::Overflow(what)) => return Err(ConcatError::IndexOverflow { what }),
        };
        let compatible = view.dim(Axis::Outer) == self.dst.dim(Axis::Outer)
            && view.padded_dim(Axis::Outer) == self.dst.padded_dim(Axis::Outer)
            && view.dim(Axis::Inner) == self.dst.dim(Axis::Inner)
            && view.padded_dim(Axis::Inner) == self.dst.padded_dim(Axis::Inner)
            && view.blocks == self.dst.blocks;
        if !compatible {
            log::debug!("Source #{index} blocking does not match the destination");
            return Ok(false);
        }

        let dts = view.data_type_size;
        let extent = view.padded_dim(Axis::Concat);
        let mut read_chunk = self.read_chunk;
        for elems in [view.run_elems(extent)?, view.stride(Axis::Outer), view.offset0] {
            read_chunk = gcd_bytes(read_chunk, elems, dts)?;
        }
        let mut write_chunk = self.write_chunk;
        for elems in [
            self.dst.run_elems(self.offsets.padded_total)?,
            self.dst.run_elems(extent)?,
        ] {
            write_chunk = gcd_bytes(write_chunk, elems, dts)?;
        }
        self.offsets.push(&view)?;
        self.read_chunk = read_chunk;
        self.write_chunk = write_chunk;

        self.live.push(LiveSource {
            index,
            view,
            size_bytes: layout.size_bytes(),
        });
        Ok(true)
    }

    /// True when padding sits inside a block rather than only at the end of
    /// the destination's concat axis.
    pub fn has_internal_padding(&self) -> bool {
        self.dst.has_block_remainder()
            || self
                .live
                .iter()
                .rev()
                .skip(1)
                .any(|source| source.view.has_block_remainder())
    }

    /// Assume byte-exact chunks for both reads and writes.
    pub fn set_pessimistic_chunk_size(&mut self) {
        self.pessimistic = true;
    }

    fn chunk(&self, accumulated: u64) -> u64 {
        if self.pessimistic {
            return self.data_type_size();
        }
        match pow2_factor(accumulated) {
            0 => self.max_chunk_bytes,
            factor => factor.min(self.max_chunk_bytes),
        }
    }

    /// Largest aligned read, in bytes, that never straddles a source run.
    pub fn max_read_size(&self) -> u64 {
        self.chunk(self.read_chunk)
    }

    /// Largest aligned write, in bytes, that never straddles two sources.
    pub fn max_write_size(&self) -> u64 {
        self.chunk(self.write_chunk)
    }

    /// Running logical and padded offsets of the live sources.
    pub fn concat_offsets(&self) -> ConcatOffsets {
        self.offsets.clone()
    }

    /// Folded destination view.
    pub fn dst(&self) -> &NormalizedView {
        &self.dst
    }

    /// Destination layout as given.
    pub fn dst_layout(&self) -> &TensorLayout {
        &self.dst_layout
    }

    /// Sources with a non-zero concat extent, in request order.
    pub fn live_sources(&self) -> &[LiveSource] {
        &self.live
    }

    /// Number of sources added, empty ones included.
    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Concat axis of the unfolded layouts.
    pub fn concat_axis(&self) -> usize {
        self.concat_axis
    }

    /// Bytes per element.
    pub fn data_type_size(&self) -> u64 {
        self.dst.data_type_size
    }

    /// Largest byte size among the destination and live sources.
    pub fn max_tensor_bytes(&self) -> u64 {
        self.live
            .iter()
            .map(|source| source.size_bytes)
            .fold(self.dst_layout.size_bytes(), u64::max)
    }
}
