//! Integer ALU operations.
//!
//! Results take the width of the first operand; the output port truncates them
//! to its own width when they are committed.

use super::{OperationContext, OperationDef};
use crate::common::{RuntimeError, RuntimeErrorKind, SimValue};

type Outcome = Result<Vec<SimValue>, RuntimeError>;

fn binary(inputs: &[SimValue], f: impl Fn(SimValue, SimValue) -> u64) -> Outcome {
    let (a, b) = (inputs[0], inputs[1]);
    Ok(vec![SimValue::new(f(a, b), a.width())])
}

fn divisor(b: SimValue) -> Result<SimValue, RuntimeError> {
    if b.is_nonzero() {
        Ok(b)
    } else {
        Err(RuntimeError::new(
            RuntimeErrorKind::DivisionByZero,
            "division by zero",
        ))
    }
}

fn add(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned().wrapping_add(b.unsigned()))
}

fn sub(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned().wrapping_sub(b.unsigned()))
}

fn mul(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned().wrapping_mul(b.unsigned()))
}

fn div(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    let b = divisor(i[1])?;
    binary(&[i[0], b], |a, b| a.signed().wrapping_div(b.signed()) as u64)
}

fn divu(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    let b = divisor(i[1])?;
    binary(&[i[0], b], |a, b| a.unsigned() / b.unsigned())
}

fn modulo(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    let b = divisor(i[1])?;
    binary(&[i[0], b], |a, b| a.signed().wrapping_rem(b.signed()) as u64)
}

fn modu(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    let b = divisor(i[1])?;
    binary(&[i[0], b], |a, b| a.unsigned() % b.unsigned())
}

fn and(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned() & b.unsigned())
}

fn ior(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned() | b.unsigned())
}

fn xor(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned() ^ b.unsigned())
}

// Shift amounts use the low bits only, as the hardware does.
fn shamt(a: SimValue, b: SimValue) -> u32 {
    (b.unsigned() as u32) % a.width().max(1)
}

fn shl(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned() << shamt(a, b))
}

fn shr(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| (a.signed() >> shamt(a, b)) as u64)
}

fn shru(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned() >> shamt(a, b))
}

fn eq(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| u64::from(a.unsigned() == b.unsigned()))
}

fn gt(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| u64::from(a.signed() > b.signed()))
}

fn gtu(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| u64::from(a.unsigned() > b.unsigned()))
}

fn min(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.signed().min(b.signed()) as u64)
}

fn max(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.signed().max(b.signed()) as u64)
}

fn minu(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned().min(b.unsigned()))
}

fn maxu(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    binary(i, |a, b| a.unsigned().max(b.unsigned()))
}

fn neg(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    Ok(vec![SimValue::from_signed(
        i[0].signed().wrapping_neg(),
        i[0].width(),
    )])
}

fn sxqw(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    Ok(vec![i[0].with_width(8).sign_extend_to(i[0].width())])
}

fn sxhw(i: &[SimValue], _: &mut OperationContext<'_>) -> Outcome {
    Ok(vec![i[0].with_width(16).sign_extend_to(i[0].width())])
}

const fn op(
    name: &'static str,
    inputs: usize,
    behavior: super::OperationBehavior,
) -> OperationDef {
    OperationDef {
        name,
        inputs,
        outputs: 1,
        behavior,
    }
}

/// Built-in ALU operations.
pub const OPERATIONS: &[OperationDef] = &[
    op("add", 2, add),
    op("sub", 2, sub),
    op("mul", 2, mul),
    op("div", 2, div),
    op("divu", 2, divu),
    op("mod", 2, modulo),
    op("modu", 2, modu),
    op("and", 2, and),
    op("ior", 2, ior),
    op("xor", 2, xor),
    op("shl", 2, shl),
    op("shr", 2, shr),
    op("shru", 2, shru),
    op("eq", 2, eq),
    op("gt", 2, gt),
    op("gtu", 2, gtu),
    op("min", 2, min),
    op("max", 2, max),
    op("minu", 2, minu),
    op("maxu", 2, maxu),
    op("neg", 1, neg),
    op("sxqw", 1, sxqw),
    op("sxhw", 1, sxhw),
];
