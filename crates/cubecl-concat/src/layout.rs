//! Tensor layout descriptions consumed by the planner.
//!
//! A [`TensorLayout`] mirrors a blocked memory descriptor: per-axis logical
//! and padded sizes, per-axis strides of the outer (non-block) part, and an
//! ordered list of inner blocks. The physical offset of a logical index is
//!
//! ```text
//! offset0 + sum_a (idx[a] / block_volume[a]) * strides[a] + inner_block_offset(idx)
//! ```
//!
//! where inner blocks are laid out densely, outermost first.

/// Element data types understood by the planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DataType {
    F64,
    F32,
    F16,
    BF16,
    S32,
    S8,
    U8,
    F8E5M2,
    F8E4M3,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> u64 {
        match self {
            DataType::F64 => 8,
            DataType::F32 | DataType::S32 => 4,
            DataType::F16 | DataType::BF16 => 2,
            DataType::S8 | DataType::U8 | DataType::F8E5M2 | DataType::F8E4M3 => 1,
        }
    }
}

/// One level of inner blocking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InnerBlock {
    /// Logical axis the block belongs to.
    pub axis: usize,
    /// Block length in elements.
    pub size: u64,
}

impl InnerBlock {
    /// Block of `size` elements along `axis`.
    pub fn new(axis: usize, size: u64) -> Self {
        Self { axis, size }
    }
}

/// Strided description of a blocked layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockingDesc {
    /// Stride, in elements, of the outer part of each axis.
    pub strides: Vec<u64>,
    /// Inner blocks, outermost first.
    pub inner_blocks: Vec<InnerBlock>,
}

/// Physical memory format of a tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemoryFormat {
    /// Plain or blocked strided layout.
    Blocked(BlockingDesc),
    /// Implementation-defined layout the planner cannot reason about.
    Opaque,
}

/// Layout of a single tensor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorLayout {
    /// Logical sizes.
    pub dims: Vec<u64>,
    /// Sizes rounded up to the block structure.
    pub padded_dims: Vec<u64>,
    /// Base offset in elements.
    pub offset0: u64,
    /// Element type.
    pub data_type: DataType,
    /// Physical format.
    pub format: MemoryFormat,
}

impl TensorLayout {
    /// Dense row-major layout without blocking.
    pub fn plain(dims: &[u64], data_type: DataType) -> Self {
        Self::blocked(dims, data_type, &[])
    }

    /// Dense blocked layout.
    ///
    /// Padded sizes are rounded up to each axis' block volume and the outer
    /// parts are laid out row-major around the dense block region.
    ///
    /// Example: `blocked(&[2, 40, 8, 8], F32, &[InnerBlock::new(1, 16)])`
    /// describes an `nChw16c` tensor padded to 48 channels.
    pub fn blocked(dims: &[u64], data_type: DataType, inner_blocks: &[InnerBlock]) -> Self {
        let rank = dims.len();
        let mut block_volume = vec![1u64; rank];
        for block in inner_blocks {
            if block.axis < rank {
                block_volume[block.axis] *= block.size.max(1);
            }
        }

        let padded_dims: Vec<u64> = dims
            .iter()
            .zip(&block_volume)
            .map(|(&dim, &volume)| dim.div_ceil(volume) * volume)
            .collect();

        let mut strides = vec![0u64; rank];
        let mut stride: u64 = block_volume.iter().product();
        for axis in (0..rank).rev() {
            strides[axis] = stride;
            stride = stride.saturating_mul(padded_dims[axis] / block_volume[axis]);
        }

        Self {
            dims: dims.to_vec(),
            padded_dims,
            offset0: 0,
            data_type,
            format: MemoryFormat::Blocked(BlockingDesc {
                strides,
                inner_blocks: inner_blocks.to_vec(),
            }),
        }
    }

    /// Layout in a format the planner cannot fold.
    pub fn opaque(dims: &[u64], data_type: DataType) -> Self {
        Self {
            dims: dims.to_vec(),
            padded_dims: dims.to_vec(),
            offset0: 0,
            data_type,
            format: MemoryFormat::Opaque,
        }
    }

    /// Replace the outer strides, e.g. to describe a strided sub-view.
    pub fn with_strides(mut self, strides: &[u64]) -> Self {
        if let MemoryFormat::Blocked(blocking) = &mut self.format {
            blocking.strides = strides.to_vec();
        }
        self
    }

    /// Set the base offset in elements.
    pub fn with_offset0(mut self, offset0: u64) -> Self {
        self.offset0 = offset0;
        self
    }

    /// Number of logical axes.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Blocking descriptor, `None` for opaque layouts.
    pub fn blocking(&self) -> Option<&BlockingDesc> {
        match &self.format {
            MemoryFormat::Blocked(blocking) => Some(blocking),
            MemoryFormat::Opaque => None,
        }
    }

    /// Bytes per element.
    pub fn data_type_size(&self) -> u64 {
        self.data_type.size_bytes()
    }

    /// True when some padded dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.padded_dims.contains(&0)
    }

    /// Product of the inner block lengths placed on `axis`.
    pub fn block_volume(&self, axis: usize) -> u64 {
        self.blocking()
            .map(|blocking| {
                blocking
                    .inner_blocks
                    .iter()
                    .filter(|block| block.axis == axis)
                    .map(|block| block.size)
                    .product()
            })
            .unwrap_or(1)
    }

    /// Number of bytes spanned by the tensor, excluding the base offset.
    pub fn size_bytes(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        let elems = match self.blocking() {
            Some(blocking) => {
                let block_region = blocking
                    .inner_blocks
                    .iter()
                    .fold(1u64, |acc, block| acc.saturating_mul(block.size));
                (0..self.rank())
                    .map(|axis| {
                        let outer = self.padded_dims[axis] / self.block_volume(axis).max(1);
                        outer.saturating_mul(blocking.strides[axis])
                    })
                    .fold(block_region, u64::max)
            }
            None => self
                .padded_dims
                .iter()
                .fold(1u64, |acc, &dim| acc.saturating_mul(dim)),
        };
        elems.saturating_mul(self.data_type_size())
    }
}
