//! Kernel execution on a real device.

mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use clic_core::{Array, ClicError, DataType, Device, KernelInfo, MemoryType, ParameterList, RangeArray, execute};

fn add_scalar_on(mtype: MemoryType) {
    let Some(device) = common::device() else { return };
    let input = vec![3.0f32; 10 * 5 * 2];
    let src = Array::create_with_data(10, 5, 2, DataType::F32, mtype, &input, &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();

    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 2.5f32);
    execute(&device, &common::add_scalar(), &params, RangeArray::of(&dst)).unwrap();

    let out: Vec<f32> = dst.read_vec().unwrap();
    assert_eq!(out.len(), 100);
    for value in out {
        assert_relative_eq!(value, 5.5);
    }
}

#[test]
fn test_add_scalar_buffer() {
    add_scalar_on(MemoryType::Buffer);
}

#[test]
fn test_add_scalar_image() {
    add_scalar_on(MemoryType::Image);
}

#[test]
fn test_add_scalar_volume_image_slices() {
    let Some(device) = common::device() else { return };
    let input: Vec<f32> = (0..10 * 5 * 2).map(|i| i as f32).collect();
    let src = Array::create_with_data(10, 5, 2, DataType::F32, MemoryType::Image, &input, &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();

    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 1.0f32);
    execute(&device, &common::add_scalar(), &params, RangeArray::of(&dst)).unwrap();

    let out: Vec<f32> = dst.read_vec().unwrap();
    for z in 0..2 {
        for y in 0..5 {
            for x in 0..10 {
                let i = x + 10 * y + 50 * z;
                assert_relative_eq!(out[i], input[i] + 1.0);
            }
        }
    }
}

#[test]
fn test_add_scalar_converts_scalar_type() {
    let Some(device) = common::device() else { return };
    let src = Array::create_with_data(4, 4, 1, DataType::F32, MemoryType::Buffer, &[1.0f32; 16], &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();

    // Integer scalar converted to the kernel's f32
    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 4i32);
    execute(&device, &common::add_scalar(), &params, [4, 4, 1]).unwrap();

    let out: Vec<f32> = dst.read_vec().unwrap();
    assert!(out.iter().all(|&v| v == 5.0));
}

fn greater_on(mtype: MemoryType, left: &[i32], right: &[i32]) -> Vec<i32> {
    let device = common::device().unwrap();
    let src0 = Array::create_with_data(10, 5, 1, DataType::I32, mtype, left, &device).unwrap();
    let src1 = Array::create_with_data(10, 5, 1, DataType::I32, mtype, right, &device).unwrap();
    let dst = Array::create_like(&src0, None).unwrap();

    let params = ParameterList::new().with("src0", &src0).with("src1", &src1).with("dst", &dst);
    execute(&device, &common::greater(), &params, RangeArray::of(&dst)).unwrap();
    dst.read_vec().unwrap()
}

#[test]
fn test_greater_buffer_and_image_agree() {
    if common::device().is_none() {
        return;
    }
    let mut rng = StdRng::seed_from_u64(42);
    let left: Vec<i32> = (0..50).map(|_| rng.gen_range(0..100)).collect();
    let right: Vec<i32> = (0..50).map(|_| rng.gen_range(0..100)).collect();
    let expected: Vec<i32> = left.iter().zip(&right).map(|(l, r)| i32::from(l > r)).collect();

    let buffer = greater_on(MemoryType::Buffer, &left, &right);
    let image = greater_on(MemoryType::Image, &left, &right);
    assert_eq!(buffer, expected);
    assert_eq!(image, expected);
}

#[test]
fn test_sum_of_all_pixels() {
    let Some(device) = common::device() else { return };
    let src = Array::create_with_data(10, 10, 10, DataType::F32, MemoryType::Buffer, &[1.0f32; 1000], &device)
        .unwrap();
    let dst = Array::create(1, 1, 1, DataType::F32, MemoryType::Buffer, &device).unwrap();

    let params = ParameterList::new().with("src", &src).with("dst", &dst);
    execute(&device, &common::sum_of_all_pixels(), &params, [1, 1, 1]).unwrap();

    let out: Vec<f32> = dst.read_vec().unwrap();
    assert_eq!(out.len(), 1);
    assert_relative_eq!(out[0], 1000.0, epsilon = f32::EPSILON);
}

fn ping_pong(device: &Arc<Device>, rounds: usize) -> Vec<f32> {
    let a = Array::create_with_data(8, 8, 1, DataType::F32, MemoryType::Buffer, &[0.0f32; 64], device).unwrap();
    let b = Array::create_like(&a, None).unwrap();
    let kernel = common::add_scalar();
    for _ in 0..rounds {
        let forward = ParameterList::new().with("src", &a).with("dst", &b).with("scalar", 1.0f32);
        execute(device, &kernel, &forward, [8, 8, 1]).unwrap();
        let back = ParameterList::new().with("src", &b).with("dst", &a).with("scalar", 1.0f32);
        execute(device, &kernel, &back, [8, 8, 1]).unwrap();
    }
    device.synchronize().unwrap();
    a.read_vec().unwrap()
}

#[test]
fn test_dispatches_run_in_order() {
    let (Some(queued), Some(blocking)) = (common::device(), common::device()) else { return };
    blocking.set_wait_to_finish(true);

    let out = ping_pong(&queued, 3);
    assert!(out.iter().all(|&v| v == 6.0), "{out:?}");
    assert_eq!(ping_pong(&blocking, 3), out);
}

#[test]
fn test_wait_to_finish() {
    let Some(device) = common::device() else { return };
    device.set_wait_to_finish(true);
    let src = Array::create_with_data(3, 1, 1, DataType::F32, MemoryType::Buffer, &[1.0f32, 2.0, 3.0], &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();
    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", -1.0f32);
    execute(&device, &common::add_scalar(), &params, [3, 1, 1]).unwrap();
    assert_eq!(dst.read_vec::<f32>().unwrap(), vec![0.0, 1.0, 2.0]);
}

#[test]
fn test_empty_range_enqueues_nothing() {
    let Some(device) = common::device() else { return };
    let src = Array::create_with_data(4, 1, 1, DataType::F32, MemoryType::Buffer, &[1.0f32; 4], &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();
    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 1.0f32);

    execute(&device, &common::add_scalar(), &params, [0, 1, 1]).unwrap();
    assert_eq!(dst.read_vec::<f32>().unwrap(), vec![0.0; 4]);
}

#[test]
fn test_program_cache_variants() {
    let Some(device) = common::device() else { return };
    let kernel = common::add_scalar();
    let src = Array::create(6, 6, 1, DataType::F32, MemoryType::Buffer, &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();
    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 1.0f32);

    execute(&device, &kernel, &params, [6, 6, 1]).unwrap();
    let first = device.cache_stats();
    assert_eq!((first.misses, first.hits, first.entries), (1, 0, 1));

    // Same variant, other shape: reused
    let big = Array::create(16, 16, 1, DataType::F32, MemoryType::Buffer, &device).unwrap();
    let big_dst = Array::create_like(&big, None).unwrap();
    let params = ParameterList::new().with("src", &big).with("dst", &big_dst).with("scalar", 1.0f32);
    execute(&device, &kernel, &params, [16, 16, 1]).unwrap();
    let second = device.cache_stats();
    assert_eq!((second.misses, second.hits, second.entries), (1, 1, 1));

    // Other element type: new variant
    let ints = Array::create(6, 6, 1, DataType::I32, MemoryType::Buffer, &device).unwrap();
    let params = ParameterList::new().with("src", &ints).with("dst", &dst).with("scalar", 1.0f32);
    execute(&device, &kernel, &params, [6, 6, 1]).unwrap();
    assert_eq!(device.cache_stats().entries, 2);

    // Other dimensionality: new variant
    let line = Array::create(6, 1, 1, DataType::F32, MemoryType::Buffer, &device).unwrap();
    let line_dst = Array::create_like(&line, None).unwrap();
    let params = ParameterList::new().with("src", &line).with("dst", &line_dst).with("scalar", 1.0f32);
    execute(&device, &kernel, &params, [6, 1, 1]).unwrap();
    assert_eq!(device.cache_stats().entries, 3);

    device.clear_cache();
    assert_eq!(device.cache_stats().entries, 0);
}

#[test]
fn test_missing_parameter_is_binding_error() {
    let Some(device) = common::device() else { return };
    let src = Array::create(4, 4, 1, DataType::F32, MemoryType::Buffer, &device).unwrap();
    let dst = Array::create_like(&src, None).unwrap();

    let params = ParameterList::new().with("src", &src).with("dst", &dst);
    let err = execute(&device, &common::add_scalar(), &params, [4, 4, 1]).unwrap_err();
    assert!(matches!(err, ClicError::ParameterBindingError { .. }), "{err:?}");

    // Scalar passed where an array is expected
    let params = ParameterList::new().with("src", 1.0f32).with("dst", &dst).with("scalar", 1.0f32);
    let err = execute(&device, &common::add_scalar(), &params, [4, 4, 1]).unwrap_err();
    assert!(matches!(err, ClicError::ParameterBindingError { .. }), "{err:?}");
    assert_eq!(device.cache_stats().entries, 0);
}

#[test]
fn test_invalid_source_is_compile_error() {
    let Some(device) = common::device() else { return };
    let broken = KernelInfo::new("broken")
        .with_source(
            clic_core::BackendKind::Wgpu,
            "@compute @workgroup_size(1) fn broken() { let x: f32 = undefined_symbol; }",
        )
        .with_source(clic_core::BackendKind::Cuda, r#"extern "C" __global__ void broken() { undefined_symbol; }"#);

    let err = execute(&device, &broken, &ParameterList::new(), [1, 1, 1]).unwrap_err();
    assert!(matches!(err, ClicError::KernelCompileError { .. }), "{err:?}");
    assert!(device.is_valid());

    // Missing entry point
    let err = execute(&device, &KernelInfo::from_source("nowhere", "fn other() {}"), &ParameterList::new(), [1, 1, 1])
        .unwrap_err();
    assert!(matches!(err, ClicError::KernelCompileError { .. }), "{err:?}");
}

#[test]
fn test_arrays_from_another_device_are_rejected() {
    let (Some(first), Some(second)) = (common::device(), common::device()) else { return };
    let src = Array::create(4, 1, 1, DataType::F32, MemoryType::Buffer, &first).unwrap();
    let dst = Array::create(4, 1, 1, DataType::F32, MemoryType::Buffer, &second).unwrap();

    let params = ParameterList::new().with("src", &src).with("dst", &dst).with("scalar", 1.0f32);
    let err = execute(&second, &common::add_scalar(), &params, [4, 1, 1]).unwrap_err();
    assert!(matches!(err, ClicError::DeviceMismatch { .. }), "{err:?}");

    let err = src.copy_to(&dst).unwrap_err();
    assert!(matches!(err, ClicError::DeviceMismatch { .. }), "{err:?}");
}

#[test]
fn test_conflicting_bindings_are_binding_error() {
    let Some(device) = common::device() else { return };
    if device.backend() != clic_core::BackendKind::Wgpu {
        return;
    }
    let double = KernelInfo::new("double").with_source(
        clic_core::BackendKind::Wgpu,
        r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;

@compute @workgroup_size(64)
fn double(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (!CLIC_IN_RANGE(i32(gid.x), 0, 0)) {
        return;
    }
    dst[gid.x] = src[gid.x] * 2.0;
}
"#,
    );
    let array = Array::create_with_data(64, 1, 1, DataType::F32, MemoryType::Buffer, &[1.0f32; 64], &device).unwrap();

    // One buffer bound read-only and writable in the same dispatch
    let params = ParameterList::new().with("src", &array).with("dst", &array);
    let err = execute(&device, &double, &params, RangeArray::of(&array)).unwrap_err();
    assert!(matches!(err, ClicError::ParameterBindingError { .. }), "{err:?}");

    assert!(device.is_valid());
    assert_eq!(array.read_vec::<f32>().unwrap(), vec![1.0; 64]);
}
