//! Shared helpers for device tests.
//!
//! Tests that need hardware skip themselves when no device can be opened.

#![allow(dead_code)]

use std::sync::Arc;

use clic_core::{BackendKind, BackendManager, Device, DeviceType, KernelInfo};

/// Opens the default device of the active backend, or `None` when the
/// machine has none.
pub fn device() -> Option<Arc<Device>> {
    match BackendManager::instance().backend().get_device("", DeviceType::All) {
        Ok(device) => Some(device),
        Err(e) => {
            eprintln!("skipping: no compute device ({e})");
            None
        }
    }
}

pub const ADD_SCALAR_WGSL: &str = r#"
@group(0) @binding(2) var<uniform> scalar: f32;

@compute @workgroup_size(4, 4, 4)
fn add_image_and_scalar(@builtin(global_invocation_id) gid: vec3<u32>) {
    let x = i32(gid.x);
    let y = i32(gid.y);
    let z = i32(gid.z);
    if (!CLIC_IN_RANGE(x, y, z)) {
        return;
    }
    WRITE_dst(x, y, z, IMAGE_dst_TYPE(f32(READ_src(x, y, z)) + scalar));
}
"#;

pub const ADD_SCALAR_CUDA: &str = r#"
extern "C" __global__ void add_image_and_scalar(
    const IMAGE_src_TYPE* src,
    IMAGE_dst_TYPE* dst,
    float scalar,
    CLIC_INFO)
{
    const int x = CLIC_X;
    const int y = CLIC_Y;
    const int z = CLIC_Z;
    if (!CLIC_IN_RANGE(x, y, z)) {
        return;
    }
    WRITE_dst(x, y, z, (float)READ_src(x, y, z) + scalar);
}
"#;

pub const GREATER_WGSL: &str = r#"
@compute @workgroup_size(8, 8, 1)
fn greater(@builtin(global_invocation_id) gid: vec3<u32>) {
    let x = i32(gid.x);
    let y = i32(gid.y);
    let z = i32(gid.z);
    if (!CLIC_IN_RANGE(x, y, z)) {
        return;
    }
    let bigger = READ_src0(x, y, z) > READ_src1(x, y, z);
    WRITE_dst(x, y, z, select(IMAGE_dst_TYPE(0), IMAGE_dst_TYPE(1), bigger));
}
"#;

pub const GREATER_CUDA: &str = r#"
extern "C" __global__ void greater(
    const IMAGE_src0_TYPE* src0,
    const IMAGE_src1_TYPE* src1,
    IMAGE_dst_TYPE* dst,
    CLIC_INFO)
{
    const int x = CLIC_X;
    const int y = CLIC_Y;
    const int z = CLIC_Z;
    if (!CLIC_IN_RANGE(x, y, z)) {
        return;
    }
    WRITE_dst(x, y, z, READ_src0(x, y, z) > READ_src1(x, y, z) ? 1 : 0);
}
"#;

pub const SUM_WGSL: &str = r#"
@compute @workgroup_size(1)
fn sum_of_all_pixels(@builtin(global_invocation_id) gid: vec3<u32>) {
    var sum = 0.0;
    for (var z = 0; z < IMAGE_SIZE_src_DEPTH(); z++) {
        for (var y = 0; y < IMAGE_SIZE_src_HEIGHT(); y++) {
            for (var x = 0; x < IMAGE_SIZE_src_WIDTH(); x++) {
                sum += f32(READ_src(x, y, z));
            }
        }
    }
    WRITE_dst(0, 0, 0, sum);
}
"#;

pub const SUM_CUDA: &str = r#"
extern "C" __global__ void sum_of_all_pixels(const IMAGE_src_TYPE* src, IMAGE_dst_TYPE* dst, CLIC_INFO)
{
    if (CLIC_X != 0 || CLIC_Y != 0 || CLIC_Z != 0) {
        return;
    }
    float sum = 0;
    for (int z = 0; z < IMAGE_SIZE_src_DEPTH; z++) {
        for (int y = 0; y < IMAGE_SIZE_src_HEIGHT; y++) {
            for (int x = 0; x < IMAGE_SIZE_src_WIDTH; x++) {
                sum += (float)READ_src(x, y, z);
            }
        }
    }
    WRITE_dst(0, 0, 0, sum);
}
"#;

fn kernel(name: &str, wgsl: &str, cuda: &str) -> KernelInfo {
    KernelInfo::new(name)
        .with_source(BackendKind::Wgpu, wgsl)
        .with_source(BackendKind::Cuda, cuda)
}

pub fn add_scalar() -> KernelInfo {
    kernel("add_image_and_scalar", ADD_SCALAR_WGSL, ADD_SCALAR_CUDA)
}

pub fn greater() -> KernelInfo {
    kernel("greater", GREATER_WGSL, GREATER_CUDA)
}

pub fn sum_of_all_pixels() -> KernelInfo {
    kernel("sum_of_all_pixels", SUM_WGSL, SUM_CUDA)
}
