//! Error types for concat planning and dispatch

use core::fmt;

/// Result type for concat operations
pub type ConcatResult<T> = Result<T, ConcatError>;

/// Which tensor of a concat request an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorRole {
    /// The destination tensor.
    Destination,
    /// The source tensor at this position in the request.
    Source(usize),
}

impl fmt::Display for TensorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorRole::Destination => write!(f, "destination"),
            TensorRole::Source(index) => write!(f, "source #{index}"),
        }
    }
}

/// Coarse failure classes.
///
/// Consumers only ever see "unimplemented": the category exists for
/// diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Layout cannot be expressed as an outer/concat/inner view.
    UnsupportedLayout,
    /// No lane width / byte group combination produced a usable block.
    NoViableCandidate,
    /// A valid configuration exists but is judged not worth dispatching.
    HeuristicallyRejected,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::UnsupportedLayout => write!(f, "unsupported layout"),
            ErrorCategory::NoViableCandidate => write!(f, "no viable candidate"),
            ErrorCategory::HeuristicallyRejected => write!(f, "heuristically rejected"),
        }
    }
}

/// Concat planning errors.
///
/// Every variant means the vectorized concat is unimplemented for the
/// request and the caller has to use a simpler concat path.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConcatError {
    // Layout errors
    /// A layout is opaque or has no folded view.
    #[error("Unsupported memory format for {tensor}")]
    UnsupportedFormat {
        /// Offending tensor.
        tensor: TensorRole,
    },

    /// The concat axis is not an axis of the destination.
    #[error("Concat axis {axis} out of bounds for rank {rank}")]
    ConcatAxisOutOfBounds {
        /// Requested axis.
        axis: usize,
        /// Destination rank.
        rank: usize,
    },

    /// A source cannot share the destination's folded view.
    #[error("Source #{index} cannot be paired with the destination layout")]
    IncompatibleSource {
        /// Position of the source in the request.
        index: usize,
    },

    /// Source extents do not add up to the destination extent.
    #[error("Source concat extents sum to {sources}, destination expects {destination}")]
    ExtentMismatch {
        /// Sum of the source extents.
        sources: u64,
        /// Destination extent.
        destination: u64,
    },

    // Candidate errors
    /// No `(lane width, byte group)` pair fits the device.
    #[error("No viable lane width / byte group candidate")]
    NoViableCandidate,

    /// A size or offset does not fit in 64 bits.
    #[error("Index arithmetic overflow while computing {what}")]
    IndexOverflow {
        /// Quantity being computed.
        what: &'static str,
    },

    // Heuristic rejections
    /// Single-byte writes over a mostly padded concat extent.
    #[error("Single byte writes with padded concat extent {padded} >= {ratio}x logical extent {logical}")]
    ExcessivePadding {
        /// Logical destination extent.
        logical: u64,
        /// Padded destination extent.
        padded: u64,
        /// Rejection ratio in effect.
        ratio: u64,
    },

    /// The internal-padding kernel does not apply.
    #[error("Internal padding kernel not applicable: {reason}")]
    InternalPaddingIneligible {
        /// Failed requirement.
        reason: &'static str,
    },

    // Execution errors
    /// Buffers passed at execution do not match the planned request.
    #[error("Plan expects {expected} sources, got {got}")]
    InputCountMismatch {
        /// Sources in the planned request.
        expected: usize,
        /// Buffers passed.
        got: usize,
    },

    /// An index does not fit the plan's 32-bit argument width.
    #[error("Index value {value} does not fit in a 32-bit kernel argument")]
    IndexOutOfRange {
        /// Value that did not fit.
        value: u64,
    },
}

impl ConcatError {
    /// Coarse category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConcatError::UnsupportedFormat { .. }
            | ConcatError::ConcatAxisOutOfBounds { .. }
            | ConcatError::IncompatibleSource { .. }
            | ConcatError::ExtentMismatch { .. }
            | ConcatError::InputCountMismatch { .. } => ErrorCategory::UnsupportedLayout,
            ConcatError::NoViableCandidate
            | ConcatError::IndexOverflow { .. }
            | ConcatError::IndexOutOfRange { .. } => ErrorCategory::NoViableCandidate,
            ConcatError::ExcessivePadding { .. }
            | ConcatError::InternalPaddingIneligible { .. } => {
                ErrorCategory::HeuristicallyRejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            ConcatError::UnsupportedFormat {
                tensor: TensorRole::Destination
            }
            .category(),
            ErrorCategory::UnsupportedLayout
        );
        assert_eq!(
            ConcatError::NoViableCandidate.category(),
            ErrorCategory::NoViableCandidate
        );
        assert_eq!(
            ConcatError::ExcessivePadding {
                logical: 3,
                padded: 16,
                ratio: 4
            }
            .category(),
            ErrorCategory::HeuristicallyRejected
        );
    }

    #[test]
    fn test_display() {
        let err = ConcatError::UnsupportedFormat {
            tensor: TensorRole::Source(2),
        };
        assert_eq!(err.to_string(), "Unsupported memory format for source #2");
        assert_eq!(
            ErrorCategory::HeuristicallyRejected.to_string(),
            "heuristically rejected"
        );
    }
}
