//! Load and store operations.
//!
//! Addresses are byte addresses into the unit's address space; data is big-endian.

use super::{OperationContext, OperationDef};
use crate::common::{RuntimeError, SimValue};

type Outcome = Result<Vec<SimValue>, RuntimeError>;

fn load(
    inputs: &[SimValue],
    ctx: &mut OperationContext<'_>,
    size: usize,
    signed: bool,
) -> Outcome {
    let (memory, space) = ctx.memory()?;
    let raw = memory.load(space, inputs[0].unsigned(), size)?;
    let loaded = SimValue::new(raw, (size * 8) as u32);
    Ok(vec![loaded.extend_to(inputs[0].width().max(32), signed)])
}

fn store(inputs: &[SimValue], ctx: &mut OperationContext<'_>, size: usize) -> Outcome {
    let (memory, space) = ctx.memory()?;
    let value = inputs[1].with_width((size * 8) as u32).unsigned();
    memory.store(space, inputs[0].unsigned(), size, value)?;
    Ok(Vec::new())
}

fn ldw(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    load(i, ctx, 4, false)
}

fn ldh(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    load(i, ctx, 2, true)
}

fn ldhu(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    load(i, ctx, 2, false)
}

fn ldq(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    load(i, ctx, 1, true)
}

fn ldqu(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    load(i, ctx, 1, false)
}

fn stw(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    store(i, ctx, 4)
}

fn sth(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    store(i, ctx, 2)
}

fn stq(i: &[SimValue], ctx: &mut OperationContext<'_>) -> Outcome {
    store(i, ctx, 1)
}

/// Built-in memory operations.
pub const OPERATIONS: &[OperationDef] = &[
    OperationDef { name: "ldw", inputs: 1, outputs: 1, behavior: ldw },
    OperationDef { name: "ldh", inputs: 1, outputs: 1, behavior: ldh },
    OperationDef { name: "ldhu", inputs: 1, outputs: 1, behavior: ldhu },
    OperationDef { name: "ldq", inputs: 1, outputs: 1, behavior: ldq },
    OperationDef { name: "ldqu", inputs: 1, outputs: 1, behavior: ldqu },
    OperationDef { name: "stw", inputs: 2, outputs: 0, behavior: stw },
    OperationDef { name: "sth", inputs: 2, outputs: 0, behavior: sth },
    OperationDef { name: "stq", inputs: 2, outputs: 0, behavior: stq },
];
