//! Dispatch planning for N-ary tensor concatenation on SIMD devices
//!
//! This crate decides how one parameterized kernel concatenates blocked
//! tensors along an axis: it folds every layout into an
//! `outer x concat x inner` view, searches lane width and byte grouping
//! against device limits, and produces the kernel constants, dispatch
//! geometry and per-execution argument list.
//!
//! # Strategies
//! - **General**: any number of inputs, offset table per live input
//! - **Internal padding**: two inputs into a destination padded inside a
//!   concat block, tried first when it applies
//!
//! Any failure means "unimplemented": the caller falls back to a simpler
//! concat path.
//!
//! # Example
//! ```
//! use cubecl_concat::prelude::*;
//!
//! let request = ConcatRequest::new(
//!     TensorLayout::plain(&[4, 1000], DataType::F32),
//!     vec![
//!         TensorLayout::plain(&[4, 600], DataType::F32),
//!         TensorLayout::plain(&[4, 400], DataType::F32),
//!     ],
//!     1,
//! );
//! let device = DeviceProfile::new(GpuArch::XeHpc);
//! let plan = plan_concat(&request, &device).unwrap();
//! assert_eq!(plan.geometry().dst_concat_axis, 1000);
//! ```

#![warn(missing_docs)]

pub mod args;
pub mod config;
pub mod device;
pub mod error;
pub mod layout;
mod math;
pub mod normalize;
pub mod plan;

/// Prelude module with commonly used types
pub mod prelude {
    pub use crate::args::{
        build_arguments, ExecutionBackend, IndexValue, IndexWidth, KernelArg, KernelArgs,
    };
    pub use crate::config::{ConcatConfig, StrategyKind};
    pub use crate::device::{DeviceInfo, DeviceProfile, GpuArch};
    pub use crate::error::{ConcatError, ConcatResult, ErrorCategory, TensorRole};
    pub use crate::layout::{DataType, InnerBlock, MemoryFormat, TensorLayout};
    pub use crate::normalize::{Axis, ConcatOffset, LayoutNormalizer, NormalizedView};
    pub use crate::plan::{
        plan_concat, plan_concat_with_config, ConcatPlan, ConcatRequest, KernelVariant, NdRange,
        PlanCache, PlanConfig, RuntimeGeometry,
    };
}
