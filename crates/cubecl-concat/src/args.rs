//! Kernel argument serialization and dispatch.
//!
//! Arguments are rebuilt for every execution from the immutable plan.
//! Empty sources never appear in the stream, and every index uses the
//! plan-wide width.

use crate::error::{ConcatError, ConcatResult};
use crate::plan::{
    ConcatPlan, GeneralPlan, InternalPaddingPlan, KernelVariant, NdRange, RuntimeGeometry,
};

/// Integer width of index arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    /// Signed 32-bit indices.
    I32,
    /// Unsigned 64-bit indices.
    U64,
}

impl IndexWidth {
    /// Encode `value` at this width.
    pub fn value(&self, value: u64) -> ConcatResult<IndexValue> {
        match self {
            IndexWidth::I32 => i32::try_from(value)
                .map(IndexValue::I32)
                .map_err(|_| ConcatError::IndexOutOfRange { value }),
            IndexWidth::U64 => Ok(IndexValue::U64(value)),
        }
    }
}

/// A single index argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum IndexValue {
    I32(i32),
    U64(u64),
}

impl IndexValue {
    /// Width the value is encoded at.
    pub fn width(&self) -> IndexWidth {
        match self {
            IndexValue::I32(_) => IndexWidth::I32,
            IndexValue::U64(_) => IndexWidth::U64,
        }
    }

    /// Value widened to 64 bits.
    pub fn as_u64(&self) -> u64 {
        match *self {
            IndexValue::I32(value) => value as u64,
            IndexValue::U64(value) => value,
        }
    }
}

/// A single kernel argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelArg<B> {
    /// Memory buffer.
    Buffer(B),
    /// Index or size.
    Index(IndexValue),
    /// Byte-sized boolean.
    Flag(u8),
}

/// Flat argument list handed to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelArgs<B> {
    args: Vec<KernelArg<B>>,
    width: IndexWidth,
}

impl<B> KernelArgs<B> {
    /// Empty list encoding indices at `width`.
    pub fn new(width: IndexWidth) -> Self {
        Self {
            args: Vec::new(),
            width,
        }
    }

    /// Append a buffer.
    pub fn push_buffer(&mut self, buffer: B) {
        self.args.push(KernelArg::Buffer(buffer));
    }

    /// Append an index at the list width; fails when it does not fit.
    pub fn push_index(&mut self, value: u64) -> ConcatResult<()> {
        self.args.push(KernelArg::Index(self.width.value(value)?));
        Ok(())
    }

    /// Append a flag.
    pub fn push_flag(&mut self, flag: bool) {
        self.args.push(KernelArg::Flag(flag as u8));
    }

    /// Width of every index in the list.
    pub fn index_width(&self) -> IndexWidth {
        self.width
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// True when no argument was pushed.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Arguments in dispatch order.
    pub fn iter(&self) -> core::slice::Iter<'_, KernelArg<B>> {
        self.args.iter()
    }

    /// Arguments as a slice.
    pub fn as_slice(&self) -> &[KernelArg<B>] {
        &self.args
    }

    /// Take the arguments.
    pub fn into_vec(self) -> Vec<KernelArg<B>> {
        self.args
    }
}

/// Build the argument list for one execution of `plan`.
///
/// `sources` holds every source of the request in order, empty ones
/// included.
pub fn build_arguments<B: Clone>(
    plan: &ConcatPlan,
    sources: &[B],
    dst: &B,
) -> ConcatResult<KernelArgs<B>> {
    let geometry = plan.geometry();
    if sources.len() != geometry.input_count {
        return Err(ConcatError::InputCountMismatch {
            expected: geometry.input_count,
            got: sources.len(),
        });
    }

    let mut args = KernelArgs::new(plan.config().index_width());
    args.push_buffer(dst.clone());
    match plan {
        ConcatPlan::General(plan) => push_general(&mut args, plan, sources)?,
        ConcatPlan::InternalPadding(plan) => push_internal_padding(&mut args, plan, sources)?,
    }
    Ok(args)
}

fn live_buffers<'a, B>(
    geometry: &'a RuntimeGeometry,
    sources: &'a [B],
) -> impl Iterator<Item = (usize, &'a B)> + 'a {
    geometry
        .live_inputs
        .iter()
        .enumerate()
        .map(move |(pos, &index)| (pos, &sources[index]))
}

fn push_general<B: Clone>(
    args: &mut KernelArgs<B>,
    plan: &GeneralPlan,
    sources: &[B],
) -> ConcatResult<()> {
    let geometry = &plan.geometry;
    let common = &geometry.common;
    let read_overlap = geometry.read_overlap.max(1);

    args.push_index(geometry.dst_offset0)?;
    args.push_index(geometry.dst_outer_stride)?;

    let mut cutoff = common.dst_concat_axis % read_overlap != 0;
    for (pos, buffer) in live_buffers(common, sources) {
        let offset = common.offsets[pos];
        let next_boundary = common
            .offsets
            .get(pos + 1)
            .map(|next| next.logical)
            .unwrap_or(common.dst_concat_axis);

        args.push_buffer(buffer.clone());
        args.push_index(geometry.src_outer_strides[pos])?;
        args.push_index(offset.logical)?;
        args.push_index(offset.padded)?;
        args.push_index(next_boundary)?;

        cutoff |= offset.logical % read_overlap != 0;
    }

    args.push_index(common.dst_concat_axis)?;
    args.push_index(common.dst_padded_concat_axis)?;
    args.push_index(geometry.read_overlap)?;
    args.push_index(geometry.gws0_block)?;
    args.push_index(common.inner_axis)?;

    // Lane group reads may run past one outer row.
    let must_compute_ext_idx =
        read_overlap.saturating_mul(geometry.gws0_block) > common.inner_axis || cutoff;
    args.push_flag(must_compute_ext_idx);
    Ok(())
}

fn push_internal_padding<B: Clone>(
    args: &mut KernelArgs<B>,
    plan: &InternalPaddingPlan,
    sources: &[B],
) -> ConcatResult<()> {
    let geometry = &plan.geometry;
    let common = &geometry.common;

    args.push_index(common.dst_concat_axis)?;
    args.push_index(common.dst_padded_concat_axis)?;
    for (pos, buffer) in live_buffers(common, sources) {
        let offset = common.offsets[pos];
        let extent = geometry.src_extents[pos];
        args.push_buffer(buffer.clone());
        args.push_index(offset.logical)?;
        args.push_index(offset.padded)?;
        args.push_index(extent.logical)?;
        args.push_index(extent.padded)?;
    }
    args.push_index(common.inner_axis)?;
    Ok(())
}

/// Backend that queues a kernel onto a device.
pub trait ExecutionBackend {
    /// Buffer handle type.
    type Buffer: Clone;

    /// Backend error; concat errors must convert into it.
    type Error: From<ConcatError>;

    /// Enqueue one dispatch of `variant`.
    fn dispatch(
        &mut self,
        range: &NdRange,
        variant: KernelVariant,
        args: KernelArgs<Self::Buffer>,
    ) -> Result<(), Self::Error>;
}

impl ConcatPlan {
    /// Build arguments and dispatch once. Does nothing without live inputs.
    pub fn execute<E: ExecutionBackend>(
        &self,
        backend: &mut E,
        sources: &[E::Buffer],
        dst: &E::Buffer,
    ) -> Result<(), E::Error> {
        if self.config().n_inputs == 0 {
            return Ok(());
        }
        let args = build_arguments(self, sources, dst)?;
        log::trace!(
            "Dispatching {} with {} arguments",
            self.kernel_variant().kernel_name(),
            args.len()
        );
        backend.dispatch(self.range(), self.kernel_variant(), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_width() {
        assert_eq!(IndexWidth::I32.value(7), Ok(IndexValue::I32(7)));
        assert_eq!(
            IndexWidth::I32.value(1 << 31),
            Err(ConcatError::IndexOutOfRange { value: 1 << 31 })
        );
        assert_eq!(IndexWidth::U64.value(1 << 40), Ok(IndexValue::U64(1 << 40)));
        assert_eq!(IndexValue::I32(5).as_u64(), 5);
    }

    #[test]
    fn test_args_keep_single_width() {
        let mut args: KernelArgs<&str> = KernelArgs::new(IndexWidth::U64);
        args.push_buffer("dst");
        args.push_index(3).unwrap();
        args.push_flag(true);
        assert_eq!(args.len(), 3);
        assert!(args.iter().all(|arg| match arg {
            KernelArg::Index(value) => value.width() == IndexWidth::U64,
            _ => true,
        }));
        assert_eq!(args.as_slice()[2], KernelArg::Flag(1));
    }
}
