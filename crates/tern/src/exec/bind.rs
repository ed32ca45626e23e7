use std::borrow::Borrow;

use tern_core::{Error, Result, Tensor};
use tern_graph::{Context, Module, Placeholder};

/// Bind `inputs[i]` to `placeholders[i]` in `ctx`.
///
/// The context receives a handle sharing each tensor's storage, not a copy.
/// Types are checked when a compiled function reads the binding.
pub fn bind_placeholders<P: Borrow<Placeholder>>(
    ctx: &mut Context,
    placeholders: &[P],
    inputs: &[Tensor],
) -> Result<()> {
    if placeholders.len() != inputs.len() {
        return Err(Error::ArityMismatch {
            what: "bind_placeholders",
            expected: placeholders.len(),
            got: inputs.len(),
        });
    }
    for (ph, t) in placeholders.iter().zip(inputs) {
        ctx.insert(ph.borrow(), t.clone());
    }
    Ok(())
}

/// Like [`bind_placeholders`], resolving each name in `module` first.
///
/// Nothing is bound unless every name resolves.
pub fn bind_placeholders_by_name<S: AsRef<str>>(
    ctx: &mut Context,
    module: &Module,
    names: &[S],
    inputs: &[Tensor],
) -> Result<()> {
    let placeholders = names
        .iter()
        .map(|n| module.placeholder_by_name(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    bind_placeholders(ctx, &placeholders, inputs)
}
