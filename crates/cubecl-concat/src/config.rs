//! Concat planning configuration.
//!
//! All values here are tuning knobs, not correctness constraints: any
//! setting yields either a correct plan or an "unimplemented" result.

use std::env;

/// Top-level concat planning configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConcatConfig {
    /// Lane width / byte group search settings.
    pub search: SearchConfig,

    /// General strategy settings.
    pub general: GeneralConfig,

    /// Internal-padding strategy settings.
    pub internal_padding: InternalPaddingConfig,

    /// Strategy selection overrides.
    pub strategy: StrategyConfig,
}

impl ConcatConfig {
    /// Default configuration with environment overrides applied.
    ///
    /// - `CUBECL_CONCAT_STRATEGY`: `auto`, `general` or `internal_padding`
    /// - `CUBECL_CONCAT_MIN_PROBLEM_BYTES`: internal-padding size floor
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = env::var("CUBECL_CONCAT_STRATEGY") {
            match parse_strategy(&value) {
                Some(force) => config.strategy.force = force,
                None => log::warn!("Ignoring invalid CUBECL_CONCAT_STRATEGY={value:?}"),
            }
        }

        if let Ok(value) = env::var("CUBECL_CONCAT_MIN_PROBLEM_BYTES") {
            match value.trim().parse::<u64>() {
                Ok(bytes) => config.internal_padding.min_problem_bytes = bytes,
                Err(_) => log::warn!("Ignoring invalid CUBECL_CONCAT_MIN_PROBLEM_BYTES={value:?}"),
            }
        }

        config
    }
}

/// Parse a strategy override; `Some(None)` means automatic selection.
pub fn parse_strategy(value: &str) -> Option<Option<StrategyKind>> {
    match value.trim().to_lowercase().as_str() {
        "auto" | "" => Some(None),
        "general" => Some(Some(StrategyKind::General)),
        "internal_padding" | "internal-padding" => Some(Some(StrategyKind::InternalPadding)),
        _ => None,
    }
}

/// Candidate search configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchConfig {
    /// Lane widths to try, largest first.
    /// Default: [32, 16, 8, 1]
    pub lane_widths: Vec<u32>,

    /// Byte group sizes to try, largest first.
    /// Default: [8, 4, 2, 1]
    pub byte_groups: Vec<u64>,

    /// Most elements a single lane moves per block message.
    /// Default: 8
    pub max_elems_per_lane: u64,

    /// Cap on the contiguous chunk assumed for reads and writes.
    /// Default: 32 bytes
    pub max_chunk_bytes: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lane_widths: vec![32, 16, 8, 1],
            byte_groups: vec![8, 4, 2, 1],
            max_elems_per_lane: 8,
            max_chunk_bytes: 32,
        }
    }
}

/// General strategy configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Reject single-byte writes once the padded concat extent reaches this
    /// multiple of the logical extent.
    /// Default: 4
    pub padding_rejection_ratio: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            padding_rejection_ratio: 4,
        }
    }
}

/// Internal-padding strategy configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InternalPaddingConfig {
    /// Try the internal-padding kernel when the destination needs it.
    pub enabled: bool,

    /// Destination must be strictly larger than this.
    /// Default: 500_000 bytes
    pub min_problem_bytes: u64,

    /// Bytes each work item loads.
    /// Default: 16
    pub preferred_bytes_per_workitem: u64,

    /// Bytes per work item for 8-byte elements.
    /// Default: 8
    pub wide_element_bytes_per_workitem: u64,

    /// Smallest access the sub-group block messages can address.
    /// Default: 4 bytes
    pub min_subgroup_alignment_bytes: u64,

    /// Concat block lengths the kernel handles.
    /// Default: [4, 8, 16, 32]
    pub supported_block_sizes: Vec<u64>,
}

impl Default for InternalPaddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_problem_bytes: 500_000,
            preferred_bytes_per_workitem: 16,
            wide_element_bytes_per_workitem: 8,
            min_subgroup_alignment_bytes: 4,
            supported_block_sizes: vec![4, 8, 16, 32],
        }
    }
}

/// Planning strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Offset-table kernel handling any number of inputs.
    General,
    /// Two-input kernel for destinations padded inside a block.
    InternalPadding,
}

/// Strategy selection configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StrategyConfig {
    /// Force a specific strategy (bypass auto-selection and fallback).
    pub force: Option<StrategyKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConcatConfig::default();
        assert_eq!(config.search.lane_widths, vec![32, 16, 8, 1]);
        assert_eq!(config.search.byte_groups, vec![8, 4, 2, 1]);
        assert_eq!(config.general.padding_rejection_ratio, 4);
        assert_eq!(config.internal_padding.min_problem_bytes, 500_000);
        assert_eq!(config.internal_padding.preferred_bytes_per_workitem, 16);
        assert!(config.strategy.force.is_none());
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(parse_strategy("auto"), Some(None));
        assert_eq!(parse_strategy(" General "), Some(Some(StrategyKind::General)));
        assert_eq!(
            parse_strategy("internal_padding"),
            Some(Some(StrategyKind::InternalPadding))
        );
        assert_eq!(parse_strategy("fastest"), None);
    }
}
