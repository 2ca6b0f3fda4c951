//! Lane width / byte group search for the general strategy.

use core::cmp::Ordering;

use crate::config::SearchConfig;
use crate::device::DeviceInfo;
use crate::error::{ConcatError, ConcatResult};
use crate::math::{div_up, round_up};
use crate::normalize::{Axis, LayoutNormalizer};

/// One `(lane width, byte group)` candidate.
///
/// Ordering is ascending by preference: the smallest value is the best
/// candidate, so sorting puts the winner first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProbeInfo {
    /// Lane width.
    pub simd: u32,
    /// Bytes moved as one element.
    pub type_size: u64,
    /// Concurrency aligned block length, in elements.
    pub max_elems: u64,
    /// Elements one sub-group reads per block message; 0 when the candidate
    /// cannot read at all.
    pub block: u64,
}

impl ProbeInfo {
    /// Largest block for the candidate: `simd * k` with `k` a power of two
    /// up to `max_per_lane`, such that `k` groups divide `max_read_size`
    /// and the block fits in `max_elems`.
    pub fn new(simd: u32, type_size: u64, max_elems: u64, max_read_size: u64, max_per_lane: u64) -> Self {
        let simd_elems = simd as u64;
        let mut k = max_per_lane.max(1).next_power_of_two();
        if k > max_per_lane.max(1) {
            k /= 2;
        }
        while k > 0 {
            if max_read_size % (k * type_size) == 0 && simd_elems * k <= max_elems {
                break;
            }
            k /= 2;
        }
        Self {
            simd,
            type_size,
            max_elems,
            block: simd_elems * k,
        }
    }

    /// Block length in bytes.
    pub fn block_bytes(&self) -> u64 {
        self.block * self.type_size
    }

    /// True when the candidate reads at least one element per lane.
    pub fn is_valid(&self) -> bool {
        self.block > 0
    }
}

impl Ord for ProbeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .block_bytes()
            .cmp(&self.block_bytes())
            .then(other.simd.cmp(&self.simd))
            .then(self.type_size.cmp(&other.type_size))
            .then(self.max_elems.cmp(&other.max_elems))
    }
}

impl PartialOrd for ProbeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Every valid candidate for the normalized problem, best first.
pub fn candidates<D: DeviceInfo + ?Sized>(
    normalizer: &LayoutNormalizer,
    device: &D,
    config: &SearchConfig,
) -> Vec<ProbeInfo> {
    let max_write_size = normalizer.max_write_size();
    let max_read_size = normalizer.max_read_size();
    let dst_bytes = normalizer.dst_layout().size_bytes();
    let dts = normalizer.data_type_size();
    let dst = normalizer.dst();
    let inner_bytes = dst.padded_dim(Axis::Inner) * dts;
    let innermost_block_bytes = dst.blocks.last().map(|block| block.size * dts);

    let max_sg_size = device.max_subgroup_size();
    let register_bytes = device.register_bytes() as u64;
    let hw_threads = (device.hw_threads() as u64).max(1);

    let mut infos = Vec::new();
    for &simd in &config.lane_widths {
        if simd == 0 || simd > max_sg_size || max_sg_size % simd != 0 {
            continue;
        }
        if simd > 1 && !device.may_use_subgroup(simd) {
            continue;
        }
        for &bytes in &config.byte_groups {
            if bytes == 0 || max_write_size % bytes != 0 {
                continue;
            }
            // The scaled geometry has to stay integral.
            if inner_bytes % bytes != 0
                || innermost_block_bytes.is_some_and(|block| block % bytes != 0)
            {
                log::trace!("simd {simd}, bytes {bytes}: does not tile the inner axis");
                continue;
            }
            let total_elems = dst_bytes / bytes;
            let concurrent_elems = div_up((simd as u64).saturating_mul(total_elems), hw_threads);
            let elems_per_reg = (register_bytes / bytes).max(1);
            let max_elems = round_up(concurrent_elems, elems_per_reg);
            if simd as u64 > max_elems {
                log::trace!("simd {simd}, bytes {bytes}: only {max_elems} elements in flight");
                continue;
            }
            let info = ProbeInfo::new(simd, bytes, max_elems, max_read_size, config.max_elems_per_lane);
            if !info.is_valid() {
                log::trace!("simd {simd}, bytes {bytes}: no aligned read block");
                continue;
            }
            infos.push(info);
        }
    }
    infos.sort();
    infos
}

/// Best candidate, or [`ConcatError::NoViableCandidate`].
pub fn best_candidate<D: DeviceInfo + ?Sized>(
    normalizer: &LayoutNormalizer,
    device: &D,
    config: &SearchConfig,
) -> ConcatResult<ProbeInfo> {
    let best = candidates(normalizer, device, config)
        .into_iter()
        .next()
        .ok_or(ConcatError::NoViableCandidate)?;
    log::debug!(
        "Selected simd {} with {}-byte elements, block {}",
        best.simd,
        best.type_size,
        best.block
    );
    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProfile, GpuArch};
    use crate::layout::{DataType, TensorLayout};

    fn device() -> DeviceProfile {
        DeviceProfile::new(GpuArch::XeHpc)
            .with_subgroup_sizes(&[32, 16, 8, 1])
            .with_register_bytes(64)
            .with_hw_threads(512)
    }

    fn scenario() -> LayoutNormalizer {
        let dst = TensorLayout::plain(&[4, 1000], DataType::F32);
        let mut normalizer = LayoutNormalizer::new(&dst, 1).unwrap();
        assert!(normalizer.add_source(&TensorLayout::plain(&[4, 600], DataType::F32)).unwrap());
        assert!(normalizer.add_source(&TensorLayout::plain(&[4, 400], DataType::F32)).unwrap());
        normalizer
    }

    #[test]
    fn test_probe_block() {
        let info = ProbeInfo::new(32, 4, 256, 32, 8);
        assert_eq!(info.block, 256);

        // Bounded by the concurrency aligned block.
        let info = ProbeInfo::new(32, 1, 64, 16, 8);
        assert_eq!(info.block, 64);

        // 8-byte groups never fit a 4-byte chunk.
        let info = ProbeInfo::new(16, 8, 128, 4, 8);
        assert!(!info.is_valid());
    }

    #[test]
    fn test_ordering() {
        let wide = ProbeInfo { simd: 32, type_size: 4, max_elems: 256, block: 256 };
        let narrow = ProbeInfo { simd: 16, type_size: 4, max_elems: 128, block: 128 };
        let bytes = ProbeInfo { simd: 32, type_size: 2, max_elems: 512, block: 256 };
        let small = ProbeInfo { simd: 32, type_size: 1, max_elems: 1024, block: 1024 };

        let mut infos = vec![narrow, bytes, small, wide];
        infos.sort();
        assert_eq!(infos, vec![small, wide, bytes, narrow]);
    }

    #[test]
    fn test_scenario_selects_float_groups() {
        let best = best_candidate(&scenario(), &device(), &SearchConfig::default()).unwrap();
        assert_eq!(best.type_size, 4);
        assert_eq!(best.simd, 32);
        assert_eq!(best.block, 256);
    }

    #[test]
    fn test_candidates_respect_device() {
        let device = device().with_subgroup_sizes(&[16, 8]);
        let infos = candidates(&scenario(), &device, &SearchConfig::default());
        assert!(!infos.is_empty());
        assert!(infos.iter().all(|info| info.simd <= 16));
        assert!(infos.iter().all(|info| info.simd == 1 || device.may_use_subgroup(info.simd)));
    }

    #[test]
    fn test_no_candidate() {
        let config = SearchConfig {
            byte_groups: vec![8],
            ..SearchConfig::default()
        };
        assert_eq!(
            best_candidate(&scenario(), &device(), &config),
            Err(ConcatError::NoViableCandidate)
        );
    }
}
