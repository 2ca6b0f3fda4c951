//! Device capabilities consumed by the planner.
//!
//! The planner never queries hardware itself: callers inject a
//! [`DeviceInfo`] implementation. [`DeviceProfile`] is a plain-data
//! implementation usable for synthetic profiles and tests.

use core::fmt;

/// GPU architecture generations, ordered oldest to newest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum GpuArch {
    Unknown,
    Gen9,
    Gen11,
    XeLp,
    XeHp,
    XeHpg,
    XeHpc,
    Xe2,
    Xe3,
}

impl GpuArch {
    /// Bytes held by one general register lane group.
    pub fn register_bytes(&self) -> u32 {
        if *self >= GpuArch::XeHpc {
            64
        } else {
            32
        }
    }

    /// Largest work-group the local size heuristic will produce.
    pub fn max_work_group_size(&self) -> u64 {
        if *self >= GpuArch::XeHpc {
            512
        } else {
            256
        }
    }
}

impl fmt::Display for GpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuArch::Unknown => "unknown",
            GpuArch::Gen9 => "gen9",
            GpuArch::Gen11 => "gen11",
            GpuArch::XeLp => "xe_lp",
            GpuArch::XeHp => "xe_hp",
            GpuArch::XeHpg => "xe_hpg",
            GpuArch::XeHpc => "xe_hpc",
            GpuArch::Xe2 => "xe2",
            GpuArch::Xe3 => "xe3",
        };
        write!(f, "{name}")
    }
}

/// Candidate local sizes, tried largest first.
const OPTIMAL_LWS_VALUES: [u64; 17] = [
    256, 224, 192, 160, 128, 96, 64, 32, 16, 8, 7, 6, 5, 4, 3, 2, 1,
];

/// Pick a local size for `global`.
///
/// Walks the dimensions in order and gives each the largest candidate that
/// divides it and still fits in the work-group budget left by the previous
/// dimensions.
pub fn optimal_local_size(global: [u64; 3], arch: GpuArch) -> [u64; 3] {
    let max_lws = arch.max_work_group_size();
    let mut local = [1u64; 3];
    let mut total = 1u64;

    for (dim, &size) in global.iter().enumerate() {
        if size == 0 {
            continue;
        }
        let remaining = max_lws / total;
        if let Some(&value) = OPTIMAL_LWS_VALUES
            .iter()
            .find(|&&value| value <= remaining && size % value == 0)
        {
            local[dim] = value;
            total *= value;
        }
    }

    local
}

/// Hardware queries needed to plan a concat dispatch.
pub trait DeviceInfo {
    /// Architecture identifier.
    fn arch(&self) -> GpuArch;

    /// Largest supported sub-group (SIMD) width.
    fn max_subgroup_size(&self) -> u32;

    /// Whether kernels may be compiled for sub-group width `size`.
    fn may_use_subgroup(&self, size: u32) -> bool;

    /// Register size in bytes.
    fn register_bytes(&self) -> u32 {
        self.arch().register_bytes()
    }

    /// Number of hardware threads.
    fn hw_threads(&self) -> u32;

    /// Local work size for a global size.
    fn optimal_local_size(&self, global: [u64; 3]) -> [u64; 3] {
        optimal_local_size(global, self.arch())
    }
}

impl<D: DeviceInfo + ?Sized> DeviceInfo for &D {
    fn arch(&self) -> GpuArch {
        (**self).arch()
    }

    fn max_subgroup_size(&self) -> u32 {
        (**self).max_subgroup_size()
    }

    fn may_use_subgroup(&self, size: u32) -> bool {
        (**self).may_use_subgroup(size)
    }

    fn register_bytes(&self) -> u32 {
        (**self).register_bytes()
    }

    fn hw_threads(&self) -> u32 {
        (**self).hw_threads()
    }

    fn optimal_local_size(&self, global: [u64; 3]) -> [u64; 3] {
        (**self).optimal_local_size(global)
    }
}

/// Plain-data device description.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceProfile {
    /// Architecture generation.
    pub arch: GpuArch,
    /// Supported sub-group widths.
    pub subgroup_sizes: Vec<u32>,
    /// Register size in bytes.
    pub register_bytes: u32,
    /// Hardware thread count.
    pub hw_threads: u32,
}

impl DeviceProfile {
    /// Profile with defaults typical for `arch`.
    pub fn new(arch: GpuArch) -> Self {
        let (subgroup_sizes, hw_threads) = match arch {
            GpuArch::Gen9 | GpuArch::Gen11 => (vec![8, 16, 32], 24 * 7),
            GpuArch::XeLp => (vec![8, 16, 32], 96 * 7),
            GpuArch::XeHp | GpuArch::XeHpg => (vec![8, 16, 32], 512 * 8),
            GpuArch::XeHpc | GpuArch::Xe2 | GpuArch::Xe3 => (vec![16, 32], 1024 * 8),
            GpuArch::Unknown => (vec![8, 16], 64),
        };
        Self {
            arch,
            subgroup_sizes,
            register_bytes: arch.register_bytes(),
            hw_threads,
        }
    }

    /// Replace the supported sub-group widths.
    pub fn with_subgroup_sizes(mut self, sizes: &[u32]) -> Self {
        self.subgroup_sizes = sizes.to_vec();
        self
    }

    /// Override the register size.
    pub fn with_register_bytes(mut self, bytes: u32) -> Self {
        self.register_bytes = bytes;
        self
    }

    /// Override the hardware thread count.
    pub fn with_hw_threads(mut self, threads: u32) -> Self {
        self.hw_threads = threads;
        self
    }
}

impl DeviceInfo for DeviceProfile {
    fn arch(&self) -> GpuArch {
        self.arch
    }

    fn max_subgroup_size(&self) -> u32 {
        self.subgroup_sizes.iter().copied().max().unwrap_or(1)
    }

    fn may_use_subgroup(&self, size: u32) -> bool {
        self.subgroup_sizes.contains(&size)
    }

    fn register_bytes(&self) -> u32 {
        self.register_bytes
    }

    fn hw_threads(&self) -> u32 {
        self.hw_threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_ordering() {
        assert!(GpuArch::XeHpc > GpuArch::XeHpg);
        assert_eq!(GpuArch::XeLp.register_bytes(), 32);
        assert_eq!(GpuArch::Xe2.register_bytes(), 64);
    }

    #[test]
    fn test_local_size_budget() {
        let local = optimal_local_size([32, 4, 1000], GpuArch::XeHpg);
        assert_eq!(local, [32, 4, 2]);

        let local = optimal_local_size([512, 8, 1], GpuArch::XeHpg);
        assert_eq!(local, [256, 1, 1]);

        let local = optimal_local_size([512, 8, 1], GpuArch::XeHpc);
        assert_eq!(local, [256, 2, 1]);
    }

    #[test]
    fn test_local_size_odd_dims() {
        let local = optimal_local_size([7, 0, 9], GpuArch::Gen9);
        assert_eq!(local, [7, 1, 3]);
    }

    #[test]
    fn test_profile_queries() {
        let profile = DeviceProfile::new(GpuArch::XeHpc).with_subgroup_sizes(&[32, 16, 8, 1]);
        assert_eq!(profile.max_subgroup_size(), 32);
        assert!(profile.may_use_subgroup(8));
        assert!(!profile.may_use_subgroup(4));
        assert_eq!(profile.register_bytes(), 64);
    }
}
