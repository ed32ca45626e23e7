// Batch runner — Stream sub-batches through the sole compiled function
//
// The sample cursor belongs to the caller. Each iteration binds, for every
// placeholder, `width` rows of its input starting at `cursor mod B`, where B
// is that input's leading dimension, runs once, then advances the cursor by
// `width`. Rows wrap around to the start of the input.
//
// `width` is the leading dimension of the first placeholder. Every
// placeholder must share it, and every input must have a non-zero multiple
// of it as leading dimension and the placeholder's trailing dimensions.

use std::borrow::Borrow;

use tern_core::{Error, Result, Tensor};
use tern_graph::{Context, Placeholder};

use super::engine::ExecutionEngine;

/// Run `iterations` times, sliding over `inputs` from `*cursor`.
///
/// On return `*cursor` has advanced by `width` per completed iteration,
/// including when a later iteration fails. An iteration whose advance would
/// overflow `usize` is not run and returns an error instead of wrapping.
pub fn run_batch<P: Borrow<Placeholder>>(
    engine: &ExecutionEngine,
    ctx: &mut Context,
    iterations: usize,
    cursor: &mut usize,
    placeholders: &[P],
    inputs: &[Tensor],
) -> Result<()> {
    if placeholders.len() != inputs.len() {
        return Err(Error::ArityMismatch {
            what: "run_batch",
            expected: placeholders.len(),
            got: inputs.len(),
        });
    }
    let width = slice_width(placeholders, inputs)?;

    for _ in 0..iterations {
        let next = cursor.checked_add(width).ok_or_else(|| {
            Error::msg(format!("run_batch: cursor {} cannot advance by {width}", *cursor))
        })?;
        for (ph, input) in placeholders.iter().zip(inputs) {
            let batch = input.dims()[0];
            let start = *cursor % batch;
            ctx.insert(ph.borrow(), input.rows_wrapping(start, width)?);
        }
        log::trace!("run_batch: cursor {} width {}", *cursor, width);
        engine.run(ctx)?;
        *cursor = next;
    }
    Ok(())
}

/// Validate every (placeholder, input) pair and return the slice width.
fn slice_width<P: Borrow<Placeholder>>(
    placeholders: &[P],
    inputs: &[Tensor],
) -> Result<usize> {
    let mismatch = |ph: &Placeholder, reason: String| Error::BatchShapeMismatch {
        placeholder: ph.name().to_string(),
        reason,
    };

    let mut width = None;
    for (ph, input) in placeholders.iter().zip(inputs) {
        let ph = ph.borrow();
        let Some((&lead, trailing)) = ph.dims().split_first() else {
            return Err(mismatch(ph, "placeholder has no leading dimension".to_string()));
        };
        let w = *width.get_or_insert(lead);
        if lead != w {
            return Err(mismatch(
                ph,
                format!("leading dimension {lead} differs from slice width {w}"),
            ));
        }
        let Some((&batch, in_trailing)) = input.dims().split_first() else {
            return Err(mismatch(ph, "input has no leading dimension".to_string()));
        };
        if in_trailing != trailing {
            return Err(mismatch(
                ph,
                format!("input sample shape {:?} does not match {:?}", in_trailing, trailing),
            ));
        }
        if batch == 0 || w == 0 || batch % w != 0 {
            return Err(mismatch(
                ph,
                format!("input batch {batch} is not a non-zero multiple of slice width {w}"),
            ));
        }
    }
    Ok(width.unwrap_or(0))
}
