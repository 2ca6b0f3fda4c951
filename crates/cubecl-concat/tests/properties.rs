//! Property tests for planning invariants.

use cubecl_concat::prelude::*;
use proptest::prelude::*;

const LANE_WIDTHS: [u32; 4] = [32, 16, 8, 1];

fn arb_data_type() -> impl Strategy<Value = DataType> {
    prop_oneof![
        Just(DataType::F32),
        Just(DataType::F16),
        Just(DataType::U8),
        Just(DataType::F64),
    ]
}

/// Concat extents with a sprinkling of empty inputs.
fn arb_extents() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(
        prop_oneof![
            4 => 1u64..300,
            1 => Just(0u64),
        ],
        1..6,
    )
    .prop_filter("at least one live input", |extents| extents.iter().any(|&e| e > 0))
}

fn arb_device() -> impl Strategy<Value = DeviceProfile> {
    (
        prop_oneof![Just(GpuArch::XeLp), Just(GpuArch::XeHpg), Just(GpuArch::XeHpc)],
        prop::sample::subsequence(LANE_WIDTHS.to_vec(), 1..=4),
        prop_oneof![Just(32u32), Just(64u32)],
        64u32..8192,
    )
        .prop_map(|(arch, sizes, register_bytes, hw_threads)| {
            DeviceProfile::new(arch)
                .with_subgroup_sizes(&sizes)
                .with_register_bytes(register_bytes)
                .with_hw_threads(hw_threads)
        })
}

fn request(outer: u64, inner: u64, extents: &[u64], data_type: DataType) -> ConcatRequest {
    let total: u64 = extents.iter().sum();
    ConcatRequest::new(
        TensorLayout::plain(&[outer, total, inner], data_type),
        extents
            .iter()
            .map(|&extent| TensorLayout::plain(&[outer, extent, inner], data_type))
            .collect(),
        1,
    )
}

/// Channel-blocked request (`nCw<block>c`), concatenated along channels.
fn blocked_request(outer: u64, inner: u64, extents: &[u64], block: u64) -> ConcatRequest {
    let blocks = [InnerBlock::new(1, block)];
    let total: u64 = extents.iter().sum();
    ConcatRequest::new(
        TensorLayout::blocked(&[outer, total, inner], DataType::F32, &blocks),
        extents
            .iter()
            .map(|&extent| TensorLayout::blocked(&[outer, extent, inner], DataType::F32, &blocks))
            .collect(),
        1,
    )
}

fn arb_block() -> impl Strategy<Value = u64> {
    prop_oneof![Just(4u64), Just(8u64), Just(16u64)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn offsets_cover_destination(
        outer in 1u64..16,
        inner in 1u64..8,
        extents in arb_extents(),
        data_type in arb_data_type(),
        device in arb_device(),
    ) {
        let request = request(outer, inner, &extents, data_type);
        if let Ok(plan) = plan_concat(&request, &device) {
            let geometry = plan.geometry();
            let live: Vec<u64> = extents.iter().copied().filter(|&e| e > 0).collect();

            prop_assert_eq!(geometry.offsets.len(), live.len());
            let mut running = 0;
            for (offset, extent) in geometry.offsets.iter().zip(&live) {
                prop_assert_eq!(offset.logical, running);
                running += extent;
            }
            prop_assert_eq!(running, geometry.dst_concat_axis);
        }
    }

    #[test]
    fn empty_inputs_never_live(
        extents in arb_extents(),
        device in arb_device(),
    ) {
        let request = request(4, 2, &extents, DataType::F32);
        if let Ok(plan) = plan_concat(&request, &device) {
            let live = &plan.geometry().live_inputs;
            prop_assert!(live.iter().all(|&index| extents[index] > 0));
            prop_assert_eq!(live.len(), extents.iter().filter(|&&e| e > 0).count());

            let buffers: Vec<usize> = (0..extents.len()).collect();
            let args = build_arguments(&plan, &buffers, &usize::MAX).unwrap();
            let sources: Vec<usize> = args
                .iter()
                .filter_map(|arg| match arg {
                    KernelArg::Buffer(index) if *index != usize::MAX => Some(*index),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(&sources, live);
        }
    }

    #[test]
    fn lane_width_fits_device(
        outer in 1u64..16,
        inner in 1u64..8,
        extents in arb_extents(),
        data_type in arb_data_type(),
        device in arb_device(),
    ) {
        let request = request(outer, inner, &extents, data_type);
        if let Ok(plan) = plan_concat(&request, &device) {
            let simd = plan.config().simd;
            prop_assert_eq!(device.max_subgroup_size() % simd, 0);
            prop_assert!(simd == 1 || device.may_use_subgroup(simd));
        }
    }

    #[test]
    fn planning_is_deterministic(
        outer in 1u64..16,
        inner in 1u64..8,
        extents in arb_extents(),
        data_type in arb_data_type(),
        device in arb_device(),
    ) {
        let request = request(outer, inner, &extents, data_type);
        prop_assert_eq!(plan_concat(&request, &device), plan_concat(&request, &device));
    }

    #[test]
    fn blocked_offsets_cover_destination(
        outer in 1u64..8,
        inner in 1u64..8,
        extents in arb_extents(),
        block in arb_block(),
        device in arb_device(),
    ) {
        let request = blocked_request(outer, inner, &extents, block);
        if let Ok(plan) = plan_concat(&request, &device) {
            let geometry = plan.geometry();
            let live: Vec<usize> = (0..extents.len()).filter(|&i| extents[i] > 0).collect();
            prop_assert_eq!(&geometry.live_inputs, &live);
            prop_assert_eq!(geometry.offsets.len(), live.len());

            let (mut logical, mut padded) = (0, 0);
            for (offset, &index) in geometry.offsets.iter().zip(&live) {
                prop_assert_eq!(offset.logical, logical);
                prop_assert_eq!(offset.padded, padded);
                logical += extents[index];
                padded += extents[index].div_ceil(block) * block;
            }
            let total: u64 = extents.iter().sum();
            prop_assert_eq!(logical, total);
            prop_assert_eq!(geometry.dst_padded_concat_axis, total.div_ceil(block) * block);
            prop_assert!(geometry.dst_concat_axis >= total);
            prop_assert!(geometry.dst_concat_axis <= geometry.dst_padded_concat_axis);

            let buffers: Vec<usize> = (0..extents.len()).collect();
            let args = build_arguments(&plan, &buffers, &usize::MAX).unwrap();
            let sources: Vec<usize> = args
                .iter()
                .filter_map(|arg| match arg {
                    KernelArg::Buffer(index) if *index != usize::MAX => Some(*index),
                    _ => None,
                })
                .collect();
            prop_assert_eq!(sources, live);
        }
    }
}
