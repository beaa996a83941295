//! Kernel source reflection and parameter binding.
//!
//! Kernels are opaque source text. A light scan recovers the entry point's
//! formal parameters so that a [`ParameterList`](super::ParameterList) can be
//! checked before anything reaches the device:
//!
//! - WGSL: parameter *i* is `@group(0) @binding(i)`. Array parameters the
//!   kernel does not declare itself are declared by the generated preamble.
//! - CUDA: parameter *i* is the *i*-th argument of the `__global__` entry,
//!   optionally followed by `CLIC_INFO`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::backend::BackendKind;
use crate::dtype::{DataType, MemoryType};
use crate::error::{ClicError, ClicResult};
use crate::shape::Dimensionality;

use super::preamble::MAX_ARRAYS;

static LINE_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"//[^\n]*"));
static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)/\*.*?\*/"));
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| re(r"[A-Za-z_][A-Za-z0-9_]*"));
static WGSL_VAR: LazyLock<Regex> = LazyLock::new(|| {
    re(r"((?:@\s*\w+\s*(?:\([^)]*\))?\s*)+)var\s*(?:<([^>]*)>)?\s*([A-Za-z_]\w*)\s*:\s*([^;]+);")
});
static WGSL_GROUP: LazyLock<Regex> = LazyLock::new(|| re(r"@\s*group\s*\(\s*(\d+)\s*\)"));
static WGSL_BINDING: LazyLock<Regex> = LazyLock::new(|| re(r"@\s*binding\s*\(\s*(\d+)\s*\)"));
static WGSL_WORKGROUP: LazyLock<Regex> = LazyLock::new(|| re(r"@\s*workgroup_size\s*\(([^)]*)\)"));
static WGSL_STORAGE_TEXTURE: LazyLock<Regex> =
    LazyLock::new(|| re(r"^texture_storage_([123])d\s*<\s*(\w+)\s*,\s*(\w+)\s*>$"));
static WGSL_TEXTURE: LazyLock<Regex> = LazyLock::new(|| re(r"^texture_([123])d\s*<\s*(\w+)\s*>$"));
static WGSL_ARRAY: LazyLock<Regex> = LazyLock::new(|| re(r"^array\s*<\s*(.+?)\s*(?:,\s*\w+\s*)?>$"));
static WGSL_ATOMIC: LazyLock<Regex> = LazyLock::new(|| re(r"^atomic\s*<\s*(\w+)\s*>$"));
static C_QUALIFIER: LazyLock<Regex> =
    LazyLock::new(|| re(r"\b(?:const|volatile|__restrict__|__restrict|restrict)\b"));
static C_FORMAL_NAME: LazyLock<Regex> = LazyLock::new(|| re(r"([A-Za-z_]\w*)\s*(?:\[\s*\])?$"));
static ALIAS: LazyLock<Regex> = LazyLock::new(|| re(r"^IMAGE_(\w+)_TYPE$"));

fn re(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => unreachable!("invalid built-in pattern {pattern}: {e}"),
    }
}

/// Access mode of an image formal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageAccess {
    /// `texture_Nd<T>`, read with `textureLoad`.
    Sampled,
    Read,
    Write,
    ReadWrite,
}

/// Kind of one formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormalKind {
    /// Linear memory: a WGSL storage array or a CUDA pointer.
    Buffer { element: String, read_only: bool },
    /// WGSL texture.
    Image { dims: u8, element: String, access: ImageAccess },
    /// Scalar value: a WGSL uniform or a CUDA value argument.
    Scalar { ty: String },
}

/// One formal parameter found in kernel source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formal {
    pub name: String,
    /// WGSL binding index or CUDA argument position.
    pub slot: usize,
    pub kind: FormalKind,
}

/// Reflected entry point of a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub entry: String,
    pub formals: Vec<Formal>,
    /// CUDA entry ends with `CLIC_INFO`.
    pub takes_info: bool,
    /// WGSL `@workgroup_size` of the entry.
    pub workgroup_size: Option<[u32; 3]>,
    identifiers: HashSet<String>,
}

impl Signature {
    /// Reflects `entry` in `source` written for `backend`.
    pub fn parse(backend: BackendKind, source: &str, entry: &str) -> ClicResult<Self> {
        match backend {
            BackendKind::Wgpu => Self::parse_wgsl(source, entry),
            BackendKind::Cuda => Self::parse_cuda(source, entry),
        }
    }

    pub fn parse_wgsl(source: &str, entry: &str) -> ClicResult<Self> {
        let code = strip_comments(source);
        let entry_re = re(&format!(r"\bfn\s+{}\s*\(", regex::escape(entry)));
        let start = entry_re
            .find(&code)
            .ok_or_else(|| ClicError::compile(entry, format!("entry point '{entry}' not found")))?
            .start();

        let head = &code[..start];
        let attributes = &head[head.rfind([';', '}']).map_or(0, |i| i + 1)..];
        let workgroup = WGSL_WORKGROUP
            .captures(attributes)
            .ok_or_else(|| ClicError::compile(entry, format!("entry point '{entry}' has no @workgroup_size")))?;
        let workgroup_size = parse_workgroup_size(entry, &workgroup[1])?;

        let mut formals: Vec<Formal> = Vec::new();
        for caps in WGSL_VAR.captures_iter(&code) {
            let attrs = &caps[1];
            let Some(binding) = WGSL_BINDING.captures(attrs) else {
                continue;
            };
            let group = WGSL_GROUP.captures(attrs).map_or("0", |g| g.get(1).map_or("0", |m| m.as_str()));
            if group != "0" {
                return Err(ClicError::compile(entry, format!("only @group(0) is supported, found @group({group})")));
            }
            let slot: usize = binding[1]
                .parse()
                .map_err(|_| ClicError::compile(entry, format!("invalid binding index '{}'", &binding[1])))?;
            let name = caps[3].to_string();
            if formals.iter().any(|f| f.slot == slot) {
                return Err(ClicError::compile(entry, format!("binding {slot} is declared twice")));
            }
            let kind = wgsl_kind(entry, &name, caps.get(2).map(|m| m.as_str()), caps[4].trim())?;
            formals.push(Formal { name, slot, kind });
        }
        formals.sort_by_key(|f| f.slot);

        Ok(Self {
            entry: entry.to_string(),
            formals,
            takes_info: false,
            workgroup_size: Some(workgroup_size),
            identifiers: identifiers(&code),
        })
    }

    pub fn parse_cuda(source: &str, entry: &str) -> ClicResult<Self> {
        let code = strip_comments(source);
        let entry_re = re(&format!(r"__global__\s+void\s+{}\s*\(", regex::escape(entry)));
        let open = entry_re
            .find(&code)
            .ok_or_else(|| ClicError::compile(entry, format!("__global__ entry point '{entry}' not found")))?
            .end();

        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in code[open..].char_indices() {
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    close = Some(open + i);
                    break;
                }
                ')' => depth -= 1,
                _ => {}
            }
        }
        let close = close.ok_or_else(|| ClicError::compile(entry, "unterminated parameter list"))?;

        let args = split_top_level(&code[open..close]);
        let mut formals = Vec::new();
        let mut takes_info = false;
        for (position, arg) in args.iter().enumerate() {
            let arg = arg.trim();
            if arg.is_empty() || arg == "void" {
                continue;
            }
            if takes_info {
                return Err(ClicError::compile(entry, "CLIC_INFO must be the last parameter"));
            }
            if arg == "CLIC_INFO" {
                takes_info = true;
                continue;
            }
            formals.push(cuda_formal(entry, position, arg)?);
        }

        Ok(Self {
            entry: entry.to_string(),
            formals,
            takes_info,
            workgroup_size: None,
            identifiers: identifiers(&code),
        })
    }

    /// Formal bound at `slot`, if the source declares one.
    pub fn formal(&self, slot: usize) -> Option<&Formal> {
        self.formals.iter().find(|f| f.slot == slot)
    }

    /// True when the source uses `name` directly or through one of the
    /// generated preamble accessors.
    pub fn references(&self, name: &str) -> bool {
        [
            name.to_string(),
            format!("READ_{name}"),
            format!("WRITE_{name}"),
            format!("IMAGE_{name}_TYPE"),
            format!("IMAGE_SIZE_{name}_WIDTH"),
            format!("IMAGE_SIZE_{name}_HEIGHT"),
            format!("IMAGE_SIZE_{name}_DEPTH"),
            format!("IMAGE_{name}_PITCH"),
        ]
        .iter()
        .any(|ident| self.identifiers.contains(ident))
    }
}

fn strip_comments(source: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(source, " ");
    LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

fn identifiers(code: &str) -> HashSet<String> {
    IDENTIFIER.find_iter(code).map(|m| m.as_str().to_string()).collect()
}

fn parse_workgroup_size(entry: &str, text: &str) -> ClicResult<[u32; 3]> {
    let mut size = [1u32; 3];
    let parts: Vec<&str> = text.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(ClicError::compile(entry, format!("invalid @workgroup_size({text})")));
    }
    for (slot, part) in size.iter_mut().zip(&parts) {
        *slot = part
            .trim_end_matches(['u', 'i'])
            .parse()
            .map_err(|_| ClicError::compile(entry, format!("@workgroup_size must use integer literals, found '{part}'")))?;
    }
    Ok(size)
}

fn wgsl_kind(entry: &str, name: &str, space: Option<&str>, ty: &str) -> ClicResult<FormalKind> {
    let ty = ty.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some(space) = space {
        let parts: Vec<&str> = space.split(',').map(str::trim).collect();
        return match parts[0] {
            "storage" => {
                let read_only = parts.get(1).is_none_or(|access| *access == "read");
                let element = match WGSL_ARRAY.captures(&ty) {
                    Some(caps) => caps[1].to_string(),
                    None => ty.clone(),
                };
                let element = match WGSL_ATOMIC.captures(&element) {
                    Some(caps) => caps[1].to_string(),
                    None => element,
                };
                Ok(FormalKind::Buffer { element, read_only })
            }
            "uniform" => Ok(FormalKind::Scalar { ty }),
            other => Err(ClicError::compile(
                entry,
                format!("binding '{name}' uses unsupported address space '{other}'"),
            )),
        };
    }

    if let Some(caps) = WGSL_STORAGE_TEXTURE.captures(&ty) {
        let access = match &caps[3] {
            "read" => ImageAccess::Read,
            "write" => ImageAccess::Write,
            "read_write" => ImageAccess::ReadWrite,
            other => {
                return Err(ClicError::compile(entry, format!("binding '{name}' has unknown access '{other}'")));
            }
        };
        return Ok(FormalKind::Image {
            dims: caps[1].parse().unwrap_or(2),
            element: caps[2].to_string(),
            access,
        });
    }
    if let Some(caps) = WGSL_TEXTURE.captures(&ty) {
        return Ok(FormalKind::Image {
            dims: caps[1].parse().unwrap_or(2),
            element: caps[2].to_string(),
            access: ImageAccess::Sampled,
        });
    }
    Err(ClicError::compile(entry, format!("binding '{name}' has unsupported type '{ty}'")))
}

fn split_top_level(list: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for c in list.chars() {
        match c {
            '(' | '<' | '[' => depth += 1,
            ')' | '>' | ']' => depth -= 1,
            ',' if depth == 0 => {
                args.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    args.push(current);
    args
}

fn cuda_formal(entry: &str, slot: usize, arg: &str) -> ClicResult<Formal> {
    let caps = C_FORMAL_NAME
        .captures(arg)
        .ok_or_else(|| ClicError::compile(entry, format!("cannot read parameter '{arg}'")))?;
    let name_match = caps.get(1).ok_or_else(|| ClicError::compile(entry, format!("unnamed parameter '{arg}'")))?;
    let name = name_match.as_str().to_string();
    let type_text = &arg[..name_match.start()];
    let read_only = C_QUALIFIER.find_iter(type_text).any(|m| m.as_str() == "const");
    let pointer = type_text.contains('*') || caps[0].contains('[');
    let base = C_QUALIFIER.replace_all(type_text, " ").replace('*', " ");
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");
    if base.is_empty() {
        return Err(ClicError::compile(entry, format!("parameter '{name}' has no type")));
    }

    let kind = if pointer {
        FormalKind::Buffer { element: base, read_only }
    } else {
        FormalKind::Scalar { ty: base }
    };
    Ok(Formal { name, slot, kind })
}

/// Concrete WGSL element type.
pub(crate) fn wgsl_dtype(ty: &str) -> Option<DataType> {
    match ty {
        "f32" => Some(DataType::F32),
        "f64" => Some(DataType::F64),
        "i32" => Some(DataType::I32),
        "u32" => Some(DataType::U32),
        "i64" => Some(DataType::I64),
        "u64" => Some(DataType::U64),
        _ => None,
    }
}

/// Concrete C element type.
pub(crate) fn c_dtype(ty: &str) -> Option<DataType> {
    match ty {
        "char" | "signed char" | "int8_t" => Some(DataType::I8),
        "unsigned char" | "uint8_t" => Some(DataType::U8),
        "short" | "short int" | "signed short" | "int16_t" => Some(DataType::I16),
        "unsigned short" | "unsigned short int" | "uint16_t" => Some(DataType::U16),
        "int" | "signed" | "signed int" | "int32_t" => Some(DataType::I32),
        "unsigned" | "unsigned int" | "uint32_t" | "uint" => Some(DataType::U32),
        "long long" | "long long int" | "int64_t" => Some(DataType::I64),
        "unsigned long long" | "unsigned long long int" | "uint64_t" => Some(DataType::U64),
        "float" => Some(DataType::F32),
        "double" => Some(DataType::F64),
        _ => None,
    }
}

/// Element type of a WGSL storage texture format.
pub(crate) fn texel_format_dtype(format: &str) -> Option<DataType> {
    match format {
        "r32float" => Some(DataType::F32),
        "r32sint" => Some(DataType::I32),
        "r32uint" => Some(DataType::U32),
        _ => None,
    }
}

/// Description of one actual parameter, as far as binding is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgKind {
    Array {
        dtype: DataType,
        mtype: MemoryType,
        dim: Dimensionality,
    },
    Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArgDesc<'a> {
    pub name: &'a str,
    pub kind: ArgKind,
}

/// How one parameter is bound by the compiled program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotPlan {
    /// Array declared by the generated preamble.
    RuntimeArray,
    /// Array declared by the kernel as a storage buffer or pointer.
    Buffer { read_only: bool },
    /// Array declared by the kernel as a texture.
    Image { access: ImageAccess },
    /// Scalar converted to the declared type.
    Scalar { dtype: DataType },
}

/// Binding of a parameter list against a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BindPlan {
    pub slots: Vec<SlotPlan>,
    pub takes_info: bool,
    pub workgroup_size: Option<[u32; 3]>,
}

impl BindPlan {
    /// Checks `args` against `signature`.
    pub fn new(kernel: &str, backend: BackendKind, signature: &Signature, args: &[ArgDesc<'_>]) -> ClicResult<Self> {
        let mut arrays: HashMap<&str, DataType> = HashMap::new();
        for arg in args {
            if let ArgKind::Array { dtype, .. } = arg.kind {
                if !is_identifier(arg.name) {
                    return Err(ClicError::binding(kernel, format!("array name '{}' is not an identifier", arg.name)));
                }
                if arrays.insert(arg.name, dtype).is_some() {
                    return Err(ClicError::binding(kernel, format!("array name '{}' is used twice", arg.name)));
                }
            }
        }
        if arrays.len() > MAX_ARRAYS {
            return Err(ClicError::binding(
                kernel,
                format!("{} array parameters, at most {MAX_ARRAYS} are supported", arrays.len()),
            ));
        }

        let binder = Binder { kernel, backend, arrays };
        let slots = match backend {
            BackendKind::Wgpu => binder.bind_wgsl(signature, args)?,
            BackendKind::Cuda => binder.bind_cuda(signature, args)?,
        };
        Ok(Self {
            slots,
            takes_info: signature.takes_info,
            workgroup_size: signature.workgroup_size,
        })
    }
}

struct Binder<'a> {
    kernel: &'a str,
    backend: BackendKind,
    arrays: HashMap<&'a str, DataType>,
}

impl Binder<'_> {
    fn bind_wgsl(&self, signature: &Signature, args: &[ArgDesc<'_>]) -> ClicResult<Vec<SlotPlan>> {
        if let Some(extra) = signature.formals.iter().find(|f| f.slot >= args.len()) {
            return Err(self.error(format!(
                "kernel declares @binding({}) '{}' but only {} parameters were supplied",
                extra.slot,
                extra.name,
                args.len()
            )));
        }

        args.iter()
            .enumerate()
            .map(|(slot, arg)| match (signature.formal(slot), arg.kind) {
                (Some(formal), _) => self.bind_formal(formal, arg),
                (None, ArgKind::Array { .. }) if signature.references(arg.name) => Ok(SlotPlan::RuntimeArray),
                (None, ArgKind::Array { .. }) => Err(self.error(format!(
                    "kernel never references array parameter '{}'",
                    arg.name
                ))),
                (None, ArgKind::Scalar) => Err(self.error(format!(
                    "scalar parameter '{}' has no @binding({slot}) uniform",
                    arg.name
                ))),
            })
            .collect()
    }

    fn bind_cuda(&self, signature: &Signature, args: &[ArgDesc<'_>]) -> ClicResult<Vec<SlotPlan>> {
        if signature.formals.len() != args.len() {
            return Err(self.error(format!(
                "kernel declares {} parameters but {} were supplied",
                signature.formals.len(),
                args.len()
            )));
        }
        signature
            .formals
            .iter()
            .zip(args)
            .map(|(formal, arg)| self.bind_formal(formal, arg))
            .collect()
    }

    fn bind_formal(&self, formal: &Formal, arg: &ArgDesc<'_>) -> ClicResult<SlotPlan> {
        match (&formal.kind, arg.kind) {
            (FormalKind::Buffer { element, read_only }, ArgKind::Array { dtype, mtype, .. }) => {
                if self.backend == BackendKind::Wgpu && mtype == MemoryType::Image {
                    return Err(self.error(format!(
                        "'{}' is an image but binding '{}' is a storage buffer",
                        arg.name, formal.name
                    )));
                }
                if !self.element_matches(element, dtype) {
                    return Err(self.error(format!(
                        "'{}' holds {dtype} but '{}' expects {element}",
                        arg.name, formal.name
                    )));
                }
                Ok(SlotPlan::Buffer { read_only: *read_only })
            }
            (FormalKind::Image { dims, element, access }, ArgKind::Array { dtype, mtype, .. }) => {
                if mtype != MemoryType::Image {
                    return Err(self.error(format!(
                        "'{}' is a buffer but binding '{}' is a texture",
                        arg.name, formal.name
                    )));
                }
                // volumes are stacked along y, every image binds as a 2d texture
                if *dims != 2 {
                    return Err(self.error(format!(
                        "'{}' binds as a 2d texture but binding '{}' is {dims}d",
                        arg.name, formal.name
                    )));
                }
                let formal_dtype = match access {
                    ImageAccess::Sampled => self.resolve(element),
                    _ => texel_format_dtype(element),
                };
                if formal_dtype.is_some_and(|expected| expected != dtype) {
                    return Err(self.error(format!(
                        "'{}' holds {dtype} but '{}' expects {element}",
                        arg.name, formal.name
                    )));
                }
                Ok(SlotPlan::Image { access: *access })
            }
            (FormalKind::Scalar { ty }, ArgKind::Scalar) => match self.resolve(ty) {
                Some(dtype) => Ok(SlotPlan::Scalar { dtype }),
                None => Err(self.error(format!(
                    "scalar '{}' binds to '{}' of non-numeric type {ty}",
                    arg.name, formal.name
                ))),
            },
            (FormalKind::Scalar { .. }, ArgKind::Array { .. }) => Err(self.error(format!(
                "'{}' is an array but parameter '{}' is a scalar",
                arg.name, formal.name
            ))),
            (_, ArgKind::Scalar) => Err(self.error(format!(
                "'{}' is a scalar but parameter '{}' is an array",
                arg.name, formal.name
            ))),
        }
    }

    /// Element types match when equal, when the formal is an alias, or when
    /// a WGSL 32-bit word stands for a narrower integer.
    fn element_matches(&self, element: &str, dtype: DataType) -> bool {
        match self.resolve(element) {
            Some(expected) if expected == dtype => true,
            Some(expected) => {
                self.backend == BackendKind::Wgpu
                    && matches!(expected, DataType::I32 | DataType::U32)
                    && matches!(dtype, DataType::I8 | DataType::U8 | DataType::I16 | DataType::U16)
            }
            None => true,
        }
    }

    fn resolve(&self, ty: &str) -> Option<DataType> {
        if let Some(caps) = ALIAS.captures(ty) {
            return self.arrays.get(&caps[1]).copied();
        }
        match self.backend {
            BackendKind::Wgpu => wgsl_dtype(ty),
            BackendKind::Cuda => c_dtype(ty),
        }
    }

    fn error(&self, reason: String) -> ClicError {
        ClicError::binding(self.kernel, reason)
    }
}

fn is_identifier(name: &str) -> bool {
    IDENTIFIER.find(name).is_some_and(|m| m.start() == 0 && m.end() == name.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WGSL_ADD: &str = r#"
// add a scalar
@group(0) @binding(2) var<uniform> scalar: f32;

@compute @workgroup_size(8, 8, 1)
fn add_image_and_scalar(@builtin(global_invocation_id) gid: vec3<u32>) {
    let x = i32(gid.x);
    WRITE_dst(x, 0, 0, READ_src(x, 0, 0) + scalar);
}
"#;

    const CUDA_ADD: &str = r#"
extern "C" __global__ void add_image_and_scalar(
    const IMAGE_src_TYPE* __restrict__ src,
    IMAGE_dst_TYPE* dst,
    float scalar, /* value */
    CLIC_INFO)
{
    WRITE_dst(CLIC_X, CLIC_Y, CLIC_Z, READ_src(CLIC_X, CLIC_Y, CLIC_Z) + scalar);
}
"#;

    fn array(name: &str, dtype: DataType, mtype: MemoryType) -> ArgDesc<'_> {
        ArgDesc { name, kind: ArgKind::Array { dtype, mtype, dim: Dimensionality::Two } }
    }

    fn scalar(name: &str) -> ArgDesc<'_> {
        ArgDesc { name, kind: ArgKind::Scalar }
    }

    #[test]
    fn test_parse_wgsl() {
        let sig = Signature::parse_wgsl(WGSL_ADD, "add_image_and_scalar").unwrap();
        assert_eq!(sig.entry, "add_image_and_scalar");
        assert_eq!(sig.workgroup_size, Some([8, 8, 1]));
        assert_eq!(sig.formals.len(), 1);
        assert_eq!(sig.formals[0].slot, 2);
        assert_eq!(sig.formals[0].kind, FormalKind::Scalar { ty: "f32".into() });
        assert!(sig.references("src"));
        assert!(sig.references("dst"));
        assert!(!sig.references("other"));
    }

    #[test]
    fn test_parse_wgsl_declared_arrays() {
        let source = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<atomic<u32>>;
@group(0) @binding(2) var img: texture_storage_3d<r32float, write>;
@group(0) @binding(3) var tex: texture_2d<i32>;
@compute @workgroup_size(64u)
fn main() {}
"#;
        let sig = Signature::parse_wgsl(source, "main").unwrap();
        assert_eq!(sig.workgroup_size, Some([64, 1, 1]));
        assert_eq!(sig.formals[0].kind, FormalKind::Buffer { element: "f32".into(), read_only: true });
        assert_eq!(sig.formals[1].kind, FormalKind::Buffer { element: "u32".into(), read_only: false });
        assert_eq!(
            sig.formals[2].kind,
            FormalKind::Image { dims: 3, element: "r32float".into(), access: ImageAccess::Write }
        );
        assert_eq!(
            sig.formals[3].kind,
            FormalKind::Image { dims: 2, element: "i32".into(), access: ImageAccess::Sampled }
        );
    }

    #[test]
    fn test_parse_wgsl_errors() {
        let err = Signature::parse_wgsl(WGSL_ADD, "missing").unwrap_err();
        assert!(matches!(err, ClicError::KernelCompileError { .. }));

        let no_size = "@compute fn main() {}";
        assert!(Signature::parse_wgsl(no_size, "main").is_err());

        let const_size = "const N = 8u; @compute @workgroup_size(N) fn main() {}";
        assert!(Signature::parse_wgsl(const_size, "main").is_err());

        let group1 = "@group(1) @binding(0) var<uniform> v: f32; @compute @workgroup_size(1) fn main() {}";
        assert!(Signature::parse_wgsl(group1, "main").is_err());
    }

    #[test]
    fn test_commented_entry_ignored() {
        let source = "// fn main() {}\n/* @workgroup_size(4) */ @compute @workgroup_size(2, 2) fn main() {}";
        let sig = Signature::parse_wgsl(source, "main").unwrap();
        assert_eq!(sig.workgroup_size, Some([2, 2, 1]));
    }

    #[test]
    fn test_parse_cuda() {
        let sig = Signature::parse_cuda(CUDA_ADD, "add_image_and_scalar").unwrap();
        assert!(sig.takes_info);
        assert_eq!(sig.workgroup_size, None);
        assert_eq!(sig.formals.len(), 3);
        assert_eq!(
            sig.formals[0].kind,
            FormalKind::Buffer { element: "IMAGE_src_TYPE".into(), read_only: true }
        );
        assert_eq!(sig.formals[1].name, "dst");
        assert_eq!(sig.formals[2].kind, FormalKind::Scalar { ty: "float".into() });
    }

    #[test]
    fn test_parse_cuda_info_must_be_last() {
        let source = r#"extern "C" __global__ void k(CLIC_INFO, float* a) {}"#;
        assert!(Signature::parse_cuda(source, "k").is_err());

        let empty = r#"extern "C" __global__ void k(void) {}"#;
        let sig = Signature::parse_cuda(empty, "k").unwrap();
        assert!(sig.formals.is_empty());
        assert!(!sig.takes_info);
    }

    #[test]
    fn test_bind_wgsl_runtime_arrays() {
        let sig = Signature::parse_wgsl(WGSL_ADD, "add_image_and_scalar").unwrap();
        let args = [
            array("src", DataType::F32, MemoryType::Buffer),
            array("dst", DataType::F32, MemoryType::Image),
            scalar("scalar"),
        ];
        let plan = BindPlan::new("add", BackendKind::Wgpu, &sig, &args).unwrap();
        assert_eq!(
            plan.slots,
            [SlotPlan::RuntimeArray, SlotPlan::RuntimeArray, SlotPlan::Scalar { dtype: DataType::F32 }]
        );
    }

    #[test]
    fn test_bind_wgsl_count_mismatch() {
        let sig = Signature::parse_wgsl(WGSL_ADD, "add_image_and_scalar").unwrap();

        // Missing scalar: the kernel declares binding 2
        let args = [array("src", DataType::F32, MemoryType::Buffer), array("dst", DataType::F32, MemoryType::Buffer)];
        let err = BindPlan::new("add", BackendKind::Wgpu, &sig, &args).unwrap_err();
        assert!(matches!(err, ClicError::ParameterBindingError { .. }));

        // Extra array the kernel never touches
        let args = [
            array("src", DataType::F32, MemoryType::Buffer),
            array("dst", DataType::F32, MemoryType::Buffer),
            scalar("scalar"),
            array("extra", DataType::F32, MemoryType::Buffer),
        ];
        assert!(BindPlan::new("add", BackendKind::Wgpu, &sig, &args).is_err());

        // Scalar where the kernel expects an array
        let args = [scalar("src"), array("dst", DataType::F32, MemoryType::Buffer), scalar("scalar")];
        assert!(BindPlan::new("add", BackendKind::Wgpu, &sig, &args).is_err());
    }

    #[test]
    fn test_bind_wgsl_declared_types() {
        let source = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var dst: texture_storage_2d<r32float, write>;
@compute @workgroup_size(8, 8) fn main() {}
"#;
        let sig = Signature::parse_wgsl(source, "main").unwrap();

        let ok = [array("src", DataType::F32, MemoryType::Buffer), array("dst", DataType::F32, MemoryType::Image)];
        let plan = BindPlan::new("main", BackendKind::Wgpu, &sig, &ok).unwrap();
        assert_eq!(plan.slots[0], SlotPlan::Buffer { read_only: true });
        assert_eq!(plan.slots[1], SlotPlan::Image { access: ImageAccess::Write });

        let wrong_dtype = [array("src", DataType::I32, MemoryType::Buffer), array("dst", DataType::F32, MemoryType::Image)];
        assert!(BindPlan::new("main", BackendKind::Wgpu, &sig, &wrong_dtype).is_err());

        let wrong_repr = [array("src", DataType::F32, MemoryType::Image), array("dst", DataType::F32, MemoryType::Image)];
        assert!(BindPlan::new("main", BackendKind::Wgpu, &sig, &wrong_repr).is_err());

        // volumes bind as stacked 2d textures, a 3d formal is rejected
        let volume = [
            array("src", DataType::F32, MemoryType::Buffer),
            ArgDesc {
                name: "dst",
                kind: ArgKind::Array { dtype: DataType::F32, mtype: MemoryType::Image, dim: Dimensionality::Three },
            },
        ];
        assert!(BindPlan::new("main", BackendKind::Wgpu, &sig, &volume).is_ok());
        let source_3d = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var dst: texture_storage_3d<r32float, write>;
@compute @workgroup_size(4, 4, 4) fn main() {}
"#;
        let sig_3d = Signature::parse_wgsl(source_3d, "main").unwrap();
        assert!(BindPlan::new("main", BackendKind::Wgpu, &sig_3d, &volume).is_err());
    }

    #[test]
    fn test_bind_wgsl_packed_words() {
        let source = r#"
@group(0) @binding(0) var<storage, read_write> src: array<u32>;
@compute @workgroup_size(64) fn main() {}
"#;
        let sig = Signature::parse_wgsl(source, "main").unwrap();
        let args = [array("src", DataType::U8, MemoryType::Buffer)];
        assert!(BindPlan::new("main", BackendKind::Wgpu, &sig, &args).is_ok());
        let args = [array("src", DataType::F64, MemoryType::Buffer)];
        assert!(BindPlan::new("main", BackendKind::Wgpu, &sig, &args).is_err());
    }

    #[test]
    fn test_bind_cuda() {
        let sig = Signature::parse_cuda(CUDA_ADD, "add_image_and_scalar").unwrap();
        let args = [
            array("src", DataType::F32, MemoryType::Image),
            array("dst", DataType::I32, MemoryType::Buffer),
            scalar("scalar"),
        ];
        let plan = BindPlan::new("add", BackendKind::Cuda, &sig, &args).unwrap();
        assert!(plan.takes_info);
        assert_eq!(plan.slots[0], SlotPlan::Buffer { read_only: true });
        assert_eq!(plan.slots[2], SlotPlan::Scalar { dtype: DataType::F32 });

        let short = [array("src", DataType::F32, MemoryType::Buffer), array("dst", DataType::F32, MemoryType::Buffer)];
        assert!(BindPlan::new("add", BackendKind::Cuda, &sig, &short).is_err());

        let swapped = [array("src", DataType::F32, MemoryType::Buffer), scalar("dst"), scalar("scalar")];
        assert!(BindPlan::new("add", BackendKind::Cuda, &sig, &swapped).is_err());
    }

    #[test]
    fn test_bind_cuda_concrete_types() {
        let source = r#"extern "C" __global__ void k(const float* a, unsigned char* b, int n) {}"#;
        let sig = Signature::parse_cuda(source, "k").unwrap();
        let args = [
            array("a", DataType::F32, MemoryType::Buffer),
            array("b", DataType::U8, MemoryType::Buffer),
            scalar("n"),
        ];
        let plan = BindPlan::new("k", BackendKind::Cuda, &sig, &args).unwrap();
        assert_eq!(plan.slots[2], SlotPlan::Scalar { dtype: DataType::I32 });

        let args = [
            array("a", DataType::F32, MemoryType::Buffer),
            array("b", DataType::U16, MemoryType::Buffer),
            scalar("n"),
        ];
        assert!(BindPlan::new("k", BackendKind::Cuda, &sig, &args).is_err());
    }

    #[test]
    fn test_bind_rejects_bad_names() {
        let sig = Signature::parse_wgsl(WGSL_ADD, "add_image_and_scalar").unwrap();
        let args = [
            array("src", DataType::F32, MemoryType::Buffer),
            array("src", DataType::F32, MemoryType::Buffer),
            scalar("scalar"),
        ];
        assert!(BindPlan::new("add", BackendKind::Wgpu, &sig, &args).is_err());

        let args = [
            array("my src", DataType::F32, MemoryType::Buffer),
            array("dst", DataType::F32, MemoryType::Buffer),
            scalar("scalar"),
        ];
        assert!(BindPlan::new("add", BackendKind::Wgpu, &sig, &args).is_err());
    }
}
