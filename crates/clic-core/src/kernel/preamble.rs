//! Generated source prefix and the dispatch info record.
//!
//! Every program is compiled as `preamble + kernel source`. The preamble
//! exposes, for each array parameter `p`:
//!
//! | Name                    | WGSL                         | CUDA                       |
//! |-------------------------|------------------------------|----------------------------|
//! | element type            | `alias IMAGE_p_TYPE`         | `#define IMAGE_p_TYPE`     |
//! | width/height/depth      | `IMAGE_SIZE_p_WIDTH()`, ...  | `IMAGE_SIZE_p_WIDTH`, ...  |
//! | row pitch (elements)    | `IMAGE_p_PITCH()`            | `IMAGE_p_PITCH`            |
//! | clamped read            | `READ_p(x, y, z)`            | `READ_p(x, y, z)`          |
//! | bounds-checked write    | `WRITE_p(x, y, z, v)`        | `WRITE_p(x, y, z, v)`      |
//!
//! plus `CLIC_DIM`, `CLIC_IN_RANGE(x, y, z)` and the range accessors. Shapes
//! are read at run time from [`DispatchInfo`], so one compiled program serves
//! every array size of the same variant.

use std::fmt::Write;

use bytemuck::{Pod, Zeroable};

use crate::array::MemoryLayout;
use crate::backend::BackendKind;
use crate::dtype::{DataType, MemoryType};
use crate::error::{ClicError, ClicResult};
use crate::shape::Dimensionality;

use super::params::RangeArray;
use super::signature::{ArgDesc, ArgKind, BindPlan, SlotPlan};

/// Maximum number of array parameters per kernel.
pub const MAX_ARRAYS: usize = 8;

/// Per-dispatch record bound next to the kernel parameters.
///
/// Each shape row is `(width, height, depth, pitch)`; rows follow the order
/// of the array parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchInfo {
    pub range: [i32; 4],
    pub shapes: [[i32; 4]; MAX_ARRAYS],
}

impl DispatchInfo {
    pub fn new<'a>(range: &RangeArray, layouts: impl IntoIterator<Item = &'a MemoryLayout>) -> ClicResult<Self> {
        let mut info = DispatchInfo::default();
        let [x, y, z] = range.as_array();
        info.range = [to_i32(x)?, to_i32(y)?, to_i32(z)?, 0];
        for (row, layout) in info.shapes.iter_mut().zip(layouts) {
            let shape = layout.shape();
            *row = [
                to_i32(shape.width())?,
                to_i32(shape.height())?,
                to_i32(shape.depth())?,
                to_i32(layout.pitch())?,
            ];
        }
        Ok(info)
    }
}

fn to_i32(value: usize) -> ClicResult<i32> {
    i32::try_from(value).map_err(|_| ClicError::DeviceError(format!("extent {value} does not fit the dispatch record")))
}

/// Preamble for `args` bound as `plan`.
pub(crate) fn generate(backend: BackendKind, dim: Dimensionality, args: &[ArgDesc<'_>], plan: &BindPlan) -> String {
    match backend {
        BackendKind::Wgpu => wgsl(dim, args, plan),
        BackendKind::Cuda => cuda(dim, args),
    }
}

/// Full program text: preamble followed by the kernel source.
///
/// WGSL global directives (`enable`, `requires`, `diagnostic`) must precede
/// every declaration and are hoisted above the preamble.
pub(crate) fn assemble(backend: BackendKind, preamble: &str, source: &str) -> String {
    let mut directives = String::new();
    let mut body = String::with_capacity(source.len());
    for line in source.lines() {
        let trimmed = line.trim_start();
        let directive = backend == BackendKind::Wgpu
            && ["enable ", "requires ", "diagnostic"].iter().any(|d| trimmed.starts_with(d));
        let target = if directive { &mut directives } else { &mut body };
        target.push_str(line);
        target.push('\n');
    }
    format!("{directives}{preamble}\n{body}")
}

fn wgsl_type(dtype: DataType) -> &'static str {
    match dtype {
        DataType::I8 | DataType::I16 | DataType::I32 => "i32",
        DataType::U8 | DataType::U16 | DataType::U32 => "u32",
        DataType::I64 => "i64",
        DataType::U64 => "u64",
        DataType::F32 => "f32",
        DataType::F64 => "f64",
    }
}

fn texel_format(dtype: DataType) -> &'static str {
    match dtype {
        DataType::I32 => "r32sint",
        DataType::U32 => "r32uint",
        _ => "r32float",
    }
}

fn wgsl(dim: Dimensionality, args: &[ArgDesc<'_>], plan: &BindPlan) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"// clic preamble
const CLIC_DIM: i32 = {dim};

struct ClicInfo {{
    range: vec4<i32>,
    shapes: array<vec4<i32>, {MAX_ARRAYS}>,
}}

@group(0) @binding({info}) var<uniform> clic_info: ClicInfo;

fn CLIC_RANGE() -> vec3<i32> {{ return clic_info.range.xyz; }}

fn CLIC_IN_RANGE(x: i32, y: i32, z: i32) -> bool {{
    let r = clic_info.range;
    return x >= 0 && y >= 0 && z >= 0 && x < r.x && y < r.y && z < r.z;
}}
"#,
        dim = dim.get(),
        info = args.len(),
    );

    let arrays = args.iter().zip(&plan.slots).enumerate().filter_map(|(binding, (arg, slot))| match arg.kind {
        ArgKind::Array { dtype, mtype, .. } => Some((binding, arg.name, dtype, mtype, *slot)),
        ArgKind::Scalar => None,
    });
    for (k, (binding, p, dtype, mtype, slot)) in arrays.enumerate() {
        let _ = write!(
            out,
            r#"
alias IMAGE_{p}_TYPE = {ty};
fn IMAGE_SIZE_{p}_WIDTH() -> i32 {{ return clic_info.shapes[{k}].x; }}
fn IMAGE_SIZE_{p}_HEIGHT() -> i32 {{ return clic_info.shapes[{k}].y; }}
fn IMAGE_SIZE_{p}_DEPTH() -> i32 {{ return clic_info.shapes[{k}].z; }}
fn IMAGE_{p}_PITCH() -> i32 {{ return clic_info.shapes[{k}].w; }}
"#,
            ty = wgsl_type(dtype),
        );
        if slot != SlotPlan::RuntimeArray {
            continue;
        }
        let _ = write!(
            out,
            r#"
fn clic_inside_{p}(x: i32, y: i32, z: i32) -> bool {{
    let s = clic_info.shapes[{k}];
    return x >= 0 && y >= 0 && z >= 0 && x < s.x && y < s.y && z < s.z;
}}
"#
        );
        match mtype {
            MemoryType::Buffer => wgsl_buffer(&mut out, binding, k, p, dtype),
            MemoryType::Image => wgsl_image(&mut out, binding, k, p, dtype),
        }
    }
    out
}

fn wgsl_buffer(out: &mut String, binding: usize, k: usize, p: &str, dtype: DataType) {
    let _ = write!(
        out,
        r#"
fn clic_index_{p}(x: i32, y: i32, z: i32) -> u32 {{
    let s = clic_info.shapes[{k}];
    let cx = clamp(x, 0, s.x - 1);
    let cy = clamp(y, 0, s.y - 1);
    let cz = clamp(z, 0, s.z - 1);
    return u32(cx + cy * s.w + cz * s.w * s.y);
}}
"#
    );

    if dtype.size() >= 4 {
        let _ = write!(
            out,
            r#"
@group(0) @binding({binding}) var<storage, read_write> {p}: array<IMAGE_{p}_TYPE>;

fn READ_{p}(x: i32, y: i32, z: i32) -> IMAGE_{p}_TYPE {{
    return {p}[clic_index_{p}(x, y, z)];
}}

fn WRITE_{p}(x: i32, y: i32, z: i32, value: IMAGE_{p}_TYPE) {{
    if (clic_inside_{p}(x, y, z)) {{
        {p}[clic_index_{p}(x, y, z)] = value;
    }}
}}
"#
        );
        return;
    }

    // 8/16-bit elements are packed little-endian into 32-bit words.
    let bits = dtype.size() * 8;
    let lanes = 32 / bits;
    let mask = (1u32 << bits) - 1;
    let unpack = if dtype.is_signed() {
        format!("bitcast<i32>(bits << {shift}u) >> {shift}u", shift = 32 - bits)
    } else {
        "bits".to_string()
    };
    let _ = write!(
        out,
        r#"
@group(0) @binding({binding}) var<storage, read_write> {p}: array<atomic<u32>>;

fn READ_{p}(x: i32, y: i32, z: i32) -> IMAGE_{p}_TYPE {{
    let i = clic_index_{p}(x, y, z);
    let shift = (i % {lanes}u) * {bits}u;
    let bits = (atomicLoad(&{p}[i / {lanes}u]) >> shift) & {mask}u;
    return {unpack};
}}

fn WRITE_{p}(x: i32, y: i32, z: i32, value: IMAGE_{p}_TYPE) {{
    if (clic_inside_{p}(x, y, z)) {{
        let i = clic_index_{p}(x, y, z);
        let shift = (i % {lanes}u) * {bits}u;
        atomicAnd(&{p}[i / {lanes}u], ~({mask}u << shift));
        atomicOr(&{p}[i / {lanes}u], (u32(value) & {mask}u) << shift);
    }}
}}
"#
    );
}

/// Images are 2-D storage textures. A volume stacks its slices along y, so
/// slice `z` starts at texture row `z * height`.
fn wgsl_image(out: &mut String, binding: usize, k: usize, p: &str, dtype: DataType) {
    let _ = write!(
        out,
        r#"
@group(0) @binding({binding}) var {p}: texture_storage_2d<{format}, read_write>;

fn READ_{p}(x: i32, y: i32, z: i32) -> IMAGE_{p}_TYPE {{
    let s = clic_info.shapes[{k}];
    let row = clamp(y, 0, s.y - 1) + clamp(z, 0, s.z - 1) * s.y;
    return textureLoad({p}, vec2<i32>(clamp(x, 0, s.x - 1), row)).x;
}}

fn WRITE_{p}(x: i32, y: i32, z: i32, value: IMAGE_{p}_TYPE) {{
    if (clic_inside_{p}(x, y, z)) {{
        let row = y + z * clic_info.shapes[{k}].y;
        textureStore({p}, vec2<i32>(x, row), vec4<IMAGE_{p}_TYPE>(value, 0, 0, 0));
    }}
}}
"#,
        format = texel_format(dtype),
    );
}

fn cuda(dim: Dimensionality, args: &[ArgDesc<'_>]) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"// clic preamble
#define CLIC_DIM {dim}

typedef struct {{
    int range[4];
    int shapes[{MAX_ARRAYS}][4];
}} clic_info_t;

#define CLIC_INFO const clic_info_t clic_info
#define CLIC_X ((int)(blockIdx.x * blockDim.x + threadIdx.x))
#define CLIC_Y ((int)(blockIdx.y * blockDim.y + threadIdx.y))
#define CLIC_Z ((int)(blockIdx.z * blockDim.z + threadIdx.z))
#define CLIC_RANGE_X (clic_info.range[0])
#define CLIC_RANGE_Y (clic_info.range[1])
#define CLIC_RANGE_Z (clic_info.range[2])
#define CLIC_IN_RANGE(x, y, z) ((x) >= 0 && (y) >= 0 && (z) >= 0 && (x) < CLIC_RANGE_X && (y) < CLIC_RANGE_Y && (z) < CLIC_RANGE_Z)

template <typename T>
__device__ inline T clic_read(const T* p, const int* s, int x, int y, int z)
{{
    x = min(max(x, 0), s[0] - 1);
    y = min(max(y, 0), s[1] - 1);
    z = min(max(z, 0), s[2] - 1);
    return p[x + y * s[3] + z * s[3] * s[1]];
}}

template <typename T, typename V>
__device__ inline void clic_write(T* p, const int* s, int x, int y, int z, V v)
{{
    if (x >= 0 && y >= 0 && z >= 0 && x < s[0] && y < s[1] && z < s[2]) {{
        p[x + y * s[3] + z * s[3] * s[1]] = (T)v;
    }}
}}
"#,
        dim = dim.get(),
    );

    let arrays = args.iter().filter_map(|arg| match arg.kind {
        ArgKind::Array { dtype, .. } => Some((arg.name, dtype)),
        ArgKind::Scalar => None,
    });
    for (k, (p, dtype)) in arrays.enumerate() {
        let _ = write!(
            out,
            r#"
#define IMAGE_{p}_TYPE {ty}
#define IMAGE_SIZE_{p}_WIDTH (clic_info.shapes[{k}][0])
#define IMAGE_SIZE_{p}_HEIGHT (clic_info.shapes[{k}][1])
#define IMAGE_SIZE_{p}_DEPTH (clic_info.shapes[{k}][2])
#define IMAGE_{p}_PITCH (clic_info.shapes[{k}][3])
#define READ_{p}(x, y, z) clic_read(({p}), clic_info.shapes[{k}], (x), (y), (z))
#define WRITE_{p}(x, y, z, v) clic_write(({p}), clic_info.shapes[{k}], (x), (y), (z), (v))
"#,
            ty = dtype.c_type(),
        );
    }
    out
}
