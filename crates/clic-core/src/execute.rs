//! Kernel execution.
//!
//! [`execute`] binds a [`ParameterList`] to a kernel, compiles (or reuses) the
//! program variant for the parameters' element types, representations and
//! dimensionality, and enqueues one dispatch on the device's queue.

use std::sync::Arc;

use tracing::trace;

use crate::array::Array;
use crate::backend::BoundArg;
use crate::device::{Device, Memory};
use crate::error::{ClicError, ClicResult};
use crate::kernel::{
    ArgDesc, ArgKind, BindPlan, DispatchInfo, KernelInfo, ParameterList, ParameterValue, ProgramKey, ProgramVariant,
    RangeArray, Signature, SlotPlan, assemble, generate,
};

/// Runs `kernel` over `range` with `params` on `device`.
///
/// Parameters bind positionally: WGSL parameter *i* is `@binding(i)`, CUDA
/// parameter *i* is the *i*-th entry argument. A range with a zero component
/// compiles and validates but enqueues nothing.
///
/// Returns once the dispatch is enqueued, or once it has completed when the
/// device waits for every dispatch.
pub fn execute(
    device: &Arc<Device>,
    kernel: &KernelInfo,
    params: &ParameterList,
    range: impl Into<RangeArray>,
) -> ClicResult<()> {
    let range = range.into();
    trace!(kernel = kernel.name(), device = %device.id(), ?range, params = params.len(), "execute");
    device.ensure_valid()?;

    let backend = device.backend();
    let args = describe(device, params)?;
    let dim = args
        .iter()
        .filter_map(|arg| match arg.kind {
            ArgKind::Array { dim, .. } => Some(dim),
            ArgKind::Scalar => None,
        })
        .max()
        .unwrap_or_else(|| range.dim());

    let source = kernel.resolve(backend, dim)?;
    let key = ProgramKey {
        device: device.id(),
        kernel: kernel.name().to_string(),
        variant: ProgramVariant { dim, signature: variant_signature(&args) },
    };
    let program = device.program(&key, &args, || {
        let signature = Signature::parse(backend, source, kernel.name())?;
        let plan = BindPlan::new(kernel.name(), backend, &signature, &args)?;
        let text = assemble(backend, &generate(backend, dim, &args, &plan), source);
        Ok((plan, text))
    })?;

    let bound = bind(kernel.name(), params, &program.plan.slots)?;
    if range.is_empty() {
        trace!(kernel = kernel.name(), "empty range, nothing enqueued");
        return Ok(());
    }

    let info = DispatchInfo::new(&range, params.arrays().map(|(_, array)| array.layout()))?;
    device.dispatch(&program, &bound, &info, &range)?;

    if device.wait_to_finish() {
        device.synchronize()?;
    }
    Ok(())
}

/// Binding view of `params`. Arrays must live on `device`.
fn describe<'a>(device: &Arc<Device>, params: &'a ParameterList) -> ClicResult<Vec<ArgDesc<'a>>> {
    params
        .iter()
        .map(|(name, value)| {
            let kind = match value {
                ParameterValue::Array(array) => {
                    if !Arc::ptr_eq(array.device(), device) {
                        return Err(ClicError::DeviceMismatch {
                            expected: device.id().to_string(),
                            actual: array.device().id().to_string(),
                        });
                    }
                    ArgKind::Array { dtype: array.dtype(), mtype: array.mtype(), dim: array.dim() }
                }
                ParameterValue::Scalar(_) => ArgKind::Scalar,
            };
            Ok(ArgDesc { name, kind })
        })
        .collect()
}

/// `name:dtype:mtype:dim` per array and `name:scalar` per scalar. Scalars
/// are converted to the declared type, so their own type does not matter.
fn variant_signature(args: &[ArgDesc<'_>]) -> String {
    args.iter()
        .map(|arg| match arg.kind {
            ArgKind::Array { dtype, mtype, dim } => format!("{}:{dtype}:{mtype}:{}", arg.name, dim.get()),
            ArgKind::Scalar => format!("{}:scalar", arg.name),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Arguments in binding order, scalars converted to their formal's type.
fn bind<'a>(kernel: &str, params: &'a ParameterList, slots: &[SlotPlan]) -> ClicResult<Vec<BoundArg<'a, Memory>>> {
    if slots.len() != params.len() {
        return Err(ClicError::binding(
            kernel,
            format!("program binds {} parameters, {} supplied", slots.len(), params.len()),
        ));
    }
    params
        .iter()
        .zip(slots)
        .map(|((name, value), slot)| match (value, slot) {
            (ParameterValue::Array(_), SlotPlan::Scalar { .. }) => Err(ClicError::binding(
                kernel,
                format!("'{name}' is an array but its parameter is a scalar"),
            )),
            (ParameterValue::Array(array), _) => Ok(memory(array)),
            (ParameterValue::Scalar(scalar), SlotPlan::Scalar { dtype }) => Ok(BoundArg::Scalar(scalar.cast(*dtype))),
            (ParameterValue::Scalar(_), _) => Err(ClicError::binding(
                kernel,
                format!("'{name}' is a scalar but its parameter is an array"),
            )),
        })
        .collect()
}

fn memory(array: &Array) -> BoundArg<'_, Memory> {
    BoundArg::Memory { memory: array.memory(), layout: array.layout() }
}
