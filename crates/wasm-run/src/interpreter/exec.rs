use crate::instance::memory::SharedMemory;
use crate::instance::Instance;
use crate::module::Func;
use crate::parse::body::{BlockKind, Instruction, ParsedBody};
use crate::parse::func::{FuncIdx, ParsedFunction};

use super::float::{wasm_max, wasm_min};
use super::Trap;

/// Maximum call depth before trapping with `CallStackExhausted`.
/// The interpreter uses one Rust frame per wasm call, so this also
/// bounds native stack use.
const MAX_CALL_DEPTH: u32 = 1_000;

/// An entered block: which block it is and the operand stack height
/// below its parameters.
#[derive(Debug, Clone, Copy)]
struct Label {
    block: u32,
    height: usize,
}

/// What `execute` does after a step.
enum Control {
    Next,
    Call(FuncIdx),
    Return,
}

// --- Stack helpers. Slots hold raw bits; i32/f32 are zero-extended. ---

#[inline(always)]
fn pop_raw(stack: &mut Vec<u64>) -> Result<u64, Trap> {
    stack.pop().ok_or(Trap::StackUnderflow)
}

#[inline(always)]
fn pop_i32(stack: &mut Vec<u64>) -> Result<i32, Trap> {
    Ok(pop_raw(stack)? as i32)
}

#[inline(always)]
fn pop_i64(stack: &mut Vec<u64>) -> Result<i64, Trap> {
    Ok(pop_raw(stack)? as i64)
}

#[inline(always)]
fn pop_f32(stack: &mut Vec<u64>) -> Result<f32, Trap> {
    Ok(f32::from_bits(pop_raw(stack)? as u32))
}

#[inline(always)]
fn pop_f64(stack: &mut Vec<u64>) -> Result<f64, Trap> {
    Ok(f64::from_bits(pop_raw(stack)?))
}

macro_rules! push_i32 {
    ($stack:expr, $v:expr) => { $stack.push($v as u32 as u64) }
}
macro_rules! push_i64 {
    ($stack:expr, $v:expr) => { $stack.push($v as u64) }
}
macro_rules! push_f32 {
    ($stack:expr, $v:expr) => { $stack.push(($v).to_bits() as u64) }
}
macro_rules! push_f64 {
    ($stack:expr, $v:expr) => { $stack.push(($v).to_bits()) }
}

macro_rules! binop {
    ($stack:expr, $pop:ident, $push:ident, $op:expr) => {{
        let b = $pop($stack)?;
        let a = $pop($stack)?;
        $push!($stack, $op(a, b));
    }};
}

macro_rules! unop {
    ($stack:expr, $pop:ident, $push:ident, $op:expr) => {{
        let a = $pop($stack)?;
        $push!($stack, $op(a));
    }};
}

macro_rules! cmpop {
    ($stack:expr, $pop:ident, $op:expr) => {{
        let b = $pop($stack)?;
        let a = $pop($stack)?;
        push_i32!($stack, $op(a, b) as i32);
    }};
}

/// Trapping float → int truncation. `$in_range` sees the truncated value.
macro_rules! trunc {
    ($stack:expr, $pop:ident, $push:ident, $int:ty, $in_range:expr) => {{
        let a = $pop($stack)?;
        if a.is_nan() {
            return Err(Trap::InvalidConversion);
        }
        let t = a.trunc();
        if !$in_range(t) {
            return Err(Trap::IntegerOverflow);
        }
        $push!($stack, t as $int);
    }};
}

macro_rules! load {
    ($inst:expr, $stack:expr, $offset:expr, $n:literal, $conv:expr) => {{
        let addr = pop_i32($stack)? as u32 as u64 + $offset;
        let bytes = memory($inst)?.borrow().load::<$n>(addr)?;
        $stack.push($conv(bytes));
    }};
}

macro_rules! store {
    ($inst:expr, $stack:expr, $offset:expr, $pop:ident, $conv:expr) => {{
        let value = $pop($stack)?;
        let addr = pop_i32($stack)? as u32 as u64 + $offset;
        memory($inst)?.borrow_mut().store(addr, &$conv(value))?;
    }};
}

fn memory<'a>(inst: &'a Instance<'_>) -> Result<&'a SharedMemory, Trap> {
    inst.memory
        .as_ref()
        .ok_or(Trap::MalformedCode("memory access without a memory"))
}

/// Call `func` with its arguments on top of `stack`; on return they have
/// been replaced by its results. Used by both the host entry point and
/// the call instructions.
pub(super) fn call_function(
    inst: &mut Instance<'_>,
    func: FuncIdx,
    stack: &mut Vec<u64>,
    depth: &mut u32,
) -> Result<(), Trap> {
    let module = inst.module;
    match module
        .get_func(func)
        .ok_or(Trap::MalformedCode("call to undefined function"))?
    {
        Func::Imported { link, func, .. } => {
            let linked = inst
                .linked
                .get_mut(*link)
                .ok_or(Trap::MalformedCode("call into a missing linked module"))?;
            call_function(linked, *func, stack, depth)
        }
        Func::Local(parsed) => {
            *depth += 1;
            if *depth > MAX_CALL_DEPTH {
                *depth -= 1;
                return Err(Trap::CallStackExhausted);
            }
            let result = execute(inst, parsed, stack, depth);
            *depth -= 1;
            result
        }
    }
}

/// Drop everything between `height` and the top `arity` values.
fn unwind(stack: &mut Vec<u64>, height: usize, arity: usize) -> Result<(), Trap> {
    let top = stack
        .len()
        .checked_sub(arity)
        .filter(|top| *top >= height)
        .ok_or(Trap::StackUnderflow)?;
    stack.drain(height..top);
    Ok(())
}

fn branch(
    body: &ParsedBody,
    labels: &mut Vec<Label>,
    stack: &mut Vec<u64>,
    depth: u32,
    pc: &mut usize,
) -> Result<Control, Trap> {
    let target = labels
        .len()
        .checked_sub(1 + depth as usize)
        .ok_or(Trap::MalformedCode("branch depth out of range"))?;
    let label = labels[target];
    let block = &body.blocks[label.block as usize];
    unwind(stack, label.height, block.branch_arity())?;
    match block.kind {
        BlockKind::Function => return Ok(Control::Return),
        BlockKind::Loop => {
            labels.truncate(target + 1);
            *pc = block.start_pc as usize + 1;
        }
        BlockKind::Block | BlockKind::If => {
            labels.truncate(target);
            *pc = block.end_pc as usize + 1;
        }
    }
    Ok(Control::Next)
}

/// Enter a block, recording the stack height below its parameters.
fn enter(body: &ParsedBody, labels: &mut Vec<Label>, stack: &[u64], idx: u32) -> Result<(), Trap> {
    let block = &body.blocks[idx as usize];
    let height = stack
        .len()
        .checked_sub(block.params as usize)
        .ok_or(Trap::StackUnderflow)?;
    labels.push(Label { block: idx, height });
    Ok(())
}

fn execute(
    inst: &mut Instance<'_>,
    func: &ParsedFunction,
    stack: &mut Vec<u64>,
    depth: &mut u32,
) -> Result<(), Trap> {
    let params = func.param_count();
    let args_start = stack.len().checked_sub(params).ok_or(Trap::StackUnderflow)?;
    let mut locals = stack.split_off(args_start);
    locals.resize(func.locals.len(), 0);

    let base = stack.len();
    let mut labels = vec![Label { block: 0, height: base }];
    let mut pc = 0usize;

    // Calls happen here rather than in `step`, so recursion only stacks
    // these small frames.
    loop {
        match step(inst, &func.body, &mut locals, &mut labels, stack, &mut pc)? {
            Control::Next => {}
            Control::Call(callee) => call_function(inst, callee, stack, depth)?,
            Control::Return => break,
        }
    }

    unwind(stack, base, func.result_count())
}

/// Execute the instruction at `pc`.
#[inline(never)]
fn step(
    inst: &mut Instance<'_>,
    body: &ParsedBody,
    locals: &mut [u64],
    labels: &mut Vec<Label>,
    stack: &mut Vec<u64>,
    pc: &mut usize,
) -> Result<Control, Trap> {
    let module = inst.module;
    let op = *body
        .ops
        .get(*pc)
        .ok_or(Trap::MalformedCode("execution ran past the end of the function"))?;
    *pc += 1;

    match op {
        Instruction::Unreachable => return Err(Trap::Unreachable),
        Instruction::Nop => {}

        Instruction::Block(idx) | Instruction::Loop(idx) => {
            enter(body, labels, stack, idx)?;
        }
        Instruction::If(idx) => {
            let cond = pop_i32(stack)?;
            enter(body, labels, stack, idx)?;
            if cond == 0 {
                let block = &body.blocks[idx as usize];
                // Jump past `else`, or onto `end` so the label is popped.
                *pc = match block.else_pc {
                    Some(else_pc) => else_pc as usize + 1,
                    None => block.end_pc as usize,
                };
            }
        }
        Instruction::Else(idx) => {
            *pc = body.blocks[idx as usize].end_pc as usize;
        }
        Instruction::End(0) => return Ok(Control::Return),
        Instruction::End(_) => {
            labels.pop();
        }
        Instruction::Br(relative) => return branch(body, labels, stack, relative, pc),
        Instruction::BrIf(relative) => {
            if pop_i32(stack)? != 0 {
                return branch(body, labels, stack, relative, pc);
            }
        }
        Instruction::BrTable(idx) => {
            let index = pop_i32(stack)? as u32;
            let relative = body.br_tables[idx as usize].depth_for(index);
            return branch(body, labels, stack, relative, pc);
        }
        Instruction::Return => return Ok(Control::Return),

        Instruction::Call(idx) => return Ok(Control::Call(FuncIdx(idx))),
        Instruction::CallIndirect(type_idx) => {
            let slot = pop_i32(stack)? as u32;
            let callee = inst
                .table
                .get(slot as usize)
                .ok_or(Trap::UndefinedElement)?
                .ok_or(Trap::UninitializedElement)?;
            let expected = module.types.get(type_idx as usize);
            if expected.is_none() || module.func_type(FuncIdx(callee)) != expected {
                return Err(Trap::IndirectCallTypeMismatch);
            }
            return Ok(Control::Call(FuncIdx(callee)));
        }

        Instruction::Drop => {
            pop_raw(stack)?;
        }
        Instruction::Select => {
            let cond = pop_i32(stack)?;
            let b = pop_raw(stack)?;
            let a = pop_raw(stack)?;
            stack.push(if cond != 0 { a } else { b });
        }

        Instruction::LocalGet(idx) => {
            let value = *locals
                .get(idx as usize)
                .ok_or(Trap::MalformedCode("local index out of range"))?;
            stack.push(value);
        }
        Instruction::LocalSet(idx) => {
            let value = pop_raw(stack)?;
            *locals
                .get_mut(idx as usize)
                .ok_or(Trap::MalformedCode("local index out of range"))? = value;
        }
        Instruction::LocalTee(idx) => {
            let value = *stack.last().ok_or(Trap::StackUnderflow)?;
            *locals
                .get_mut(idx as usize)
                .ok_or(Trap::MalformedCode("local index out of range"))? = value;
        }
        Instruction::GlobalGet(idx) => {
            let value = *inst
                .globals
                .get(idx as usize)
                .ok_or(Trap::MalformedCode("global index out of range"))?;
            stack.push(value);
        }
        Instruction::GlobalSet(idx) => {
            let value = pop_raw(stack)?;
            *inst
                .globals
                .get_mut(idx as usize)
                .ok_or(Trap::MalformedCode("global index out of range"))? = value;
        }

        Instruction::I32Load(offset) => load!(inst, stack, offset, 4, |b| u32::from_le_bytes(b) as u64),
        Instruction::I64Load(offset) => load!(inst, stack, offset, 8, u64::from_le_bytes),
        Instruction::F32Load(offset) => load!(inst, stack, offset, 4, |b| u32::from_le_bytes(b) as u64),
        Instruction::F64Load(offset) => load!(inst, stack, offset, 8, u64::from_le_bytes),
        Instruction::I32Load8S(offset) => load!(inst, stack, offset, 1, |b| i8::from_le_bytes(b) as i32 as u32 as u64),
        Instruction::I32Load8U(offset) => load!(inst, stack, offset, 1, |b| u8::from_le_bytes(b) as u64),
        Instruction::I32Load16S(offset) => load!(inst, stack, offset, 2, |b| i16::from_le_bytes(b) as i32 as u32 as u64),
        Instruction::I32Load16U(offset) => load!(inst, stack, offset, 2, |b| u16::from_le_bytes(b) as u64),
        Instruction::I64Load8S(offset) => load!(inst, stack, offset, 1, |b| i8::from_le_bytes(b) as i64 as u64),
        Instruction::I64Load8U(offset) => load!(inst, stack, offset, 1, |b| u8::from_le_bytes(b) as u64),
        Instruction::I64Load16S(offset) => load!(inst, stack, offset, 2, |b| i16::from_le_bytes(b) as i64 as u64),
        Instruction::I64Load16U(offset) => load!(inst, stack, offset, 2, |b| u16::from_le_bytes(b) as u64),
        Instruction::I64Load32S(offset) => load!(inst, stack, offset, 4, |b| i32::from_le_bytes(b) as i64 as u64),
        Instruction::I64Load32U(offset) => load!(inst, stack, offset, 4, |b| u32::from_le_bytes(b) as u64),
        Instruction::I32Store(offset) => store!(inst, stack, offset, pop_i32, i32::to_le_bytes),
        Instruction::I64Store(offset) => store!(inst, stack, offset, pop_i64, i64::to_le_bytes),
        Instruction::F32Store(offset) => store!(inst, stack, offset, pop_f32, f32::to_le_bytes),
        Instruction::F64Store(offset) => store!(inst, stack, offset, pop_f64, f64::to_le_bytes),
        Instruction::I32Store8(offset) => store!(inst, stack, offset, pop_i32, |v: i32| [v as u8]),
        Instruction::I32Store16(offset) => store!(inst, stack, offset, pop_i32, |v: i32| (v as u16).to_le_bytes()),
        Instruction::I64Store8(offset) => store!(inst, stack, offset, pop_i64, |v: i64| [v as u8]),
        Instruction::I64Store16(offset) => store!(inst, stack, offset, pop_i64, |v: i64| (v as u16).to_le_bytes()),
        Instruction::I64Store32(offset) => store!(inst, stack, offset, pop_i64, |v: i64| (v as u32).to_le_bytes()),
        Instruction::MemorySize => {
            let pages = memory(inst)?.borrow().pages();
            push_i32!(stack, pages);
        }
        Instruction::MemoryGrow => {
            let delta = pop_i32(stack)? as u32;
            let old = memory(inst)?.borrow_mut().grow(delta);
            push_i32!(stack, old.map_or(-1, |pages| pages as i32));
        }

        Instruction::I32Const(v) => push_i32!(stack, v),
        Instruction::I64Const(v) => push_i64!(stack, v),
        Instruction::F32Const(bits) => stack.push(bits as u64),
        Instruction::F64Const(bits) => stack.push(bits),

        // i32
        Instruction::I32Eqz => unop!(stack, pop_i32, push_i32, |a: i32| (a == 0) as i32),
        Instruction::I32Eq => cmpop!(stack, pop_i32, |a: i32, b: i32| a == b),
        Instruction::I32Ne => cmpop!(stack, pop_i32, |a: i32, b: i32| a != b),
        Instruction::I32LtS => cmpop!(stack, pop_i32, |a: i32, b: i32| a < b),
        Instruction::I32LtU => cmpop!(stack, pop_i32, |a: i32, b: i32| (a as u32) < (b as u32)),
        Instruction::I32GtS => cmpop!(stack, pop_i32, |a: i32, b: i32| a > b),
        Instruction::I32GtU => cmpop!(stack, pop_i32, |a: i32, b: i32| (a as u32) > (b as u32)),
        Instruction::I32LeS => cmpop!(stack, pop_i32, |a: i32, b: i32| a <= b),
        Instruction::I32LeU => cmpop!(stack, pop_i32, |a: i32, b: i32| (a as u32) <= (b as u32)),
        Instruction::I32GeS => cmpop!(stack, pop_i32, |a: i32, b: i32| a >= b),
        Instruction::I32GeU => cmpop!(stack, pop_i32, |a: i32, b: i32| (a as u32) >= (b as u32)),
        Instruction::I32Clz => unop!(stack, pop_i32, push_i32, |a: i32| a.leading_zeros()),
        Instruction::I32Ctz => unop!(stack, pop_i32, push_i32, |a: i32| a.trailing_zeros()),
        Instruction::I32Popcnt => unop!(stack, pop_i32, push_i32, |a: i32| a.count_ones()),
        Instruction::I32Add => binop!(stack, pop_i32, push_i32, i32::wrapping_add),
        Instruction::I32Sub => binop!(stack, pop_i32, push_i32, i32::wrapping_sub),
        Instruction::I32Mul => binop!(stack, pop_i32, push_i32, i32::wrapping_mul),
        Instruction::I32DivS => {
            let b = pop_i32(stack)?;
            let a = pop_i32(stack)?;
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            push_i32!(stack, a.checked_div(b).ok_or(Trap::IntegerOverflow)?);
        }
        Instruction::I32DivU => {
            let b = pop_i32(stack)? as u32;
            let a = pop_i32(stack)? as u32;
            push_i32!(stack, a.checked_div(b).ok_or(Trap::IntegerDivideByZero)?);
        }
        Instruction::I32RemS => {
            let b = pop_i32(stack)?;
            let a = pop_i32(stack)?;
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            push_i32!(stack, a.wrapping_rem(b));
        }
        Instruction::I32RemU => {
            let b = pop_i32(stack)? as u32;
            let a = pop_i32(stack)? as u32;
            push_i32!(stack, a.checked_rem(b).ok_or(Trap::IntegerDivideByZero)?);
        }
        Instruction::I32And => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a & b),
        Instruction::I32Or => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a | b),
        Instruction::I32Xor => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a ^ b),
        Instruction::I32Shl => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a.wrapping_shl(b as u32)),
        Instruction::I32ShrS => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a.wrapping_shr(b as u32)),
        Instruction::I32ShrU => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| (a as u32).wrapping_shr(b as u32)),
        Instruction::I32Rotl => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a.rotate_left(b as u32)),
        Instruction::I32Rotr => binop!(stack, pop_i32, push_i32, |a: i32, b: i32| a.rotate_right(b as u32)),

        // i64
        Instruction::I64Eqz => unop!(stack, pop_i64, push_i32, |a: i64| (a == 0) as i32),
        Instruction::I64Eq => cmpop!(stack, pop_i64, |a: i64, b: i64| a == b),
        Instruction::I64Ne => cmpop!(stack, pop_i64, |a: i64, b: i64| a != b),
        Instruction::I64LtS => cmpop!(stack, pop_i64, |a: i64, b: i64| a < b),
        Instruction::I64LtU => cmpop!(stack, pop_i64, |a: i64, b: i64| (a as u64) < (b as u64)),
        Instruction::I64GtS => cmpop!(stack, pop_i64, |a: i64, b: i64| a > b),
        Instruction::I64GtU => cmpop!(stack, pop_i64, |a: i64, b: i64| (a as u64) > (b as u64)),
        Instruction::I64LeS => cmpop!(stack, pop_i64, |a: i64, b: i64| a <= b),
        Instruction::I64LeU => cmpop!(stack, pop_i64, |a: i64, b: i64| (a as u64) <= (b as u64)),
        Instruction::I64GeS => cmpop!(stack, pop_i64, |a: i64, b: i64| a >= b),
        Instruction::I64GeU => cmpop!(stack, pop_i64, |a: i64, b: i64| (a as u64) >= (b as u64)),
        Instruction::I64Clz => unop!(stack, pop_i64, push_i64, |a: i64| a.leading_zeros()),
        Instruction::I64Ctz => unop!(stack, pop_i64, push_i64, |a: i64| a.trailing_zeros()),
        Instruction::I64Popcnt => unop!(stack, pop_i64, push_i64, |a: i64| a.count_ones()),
        Instruction::I64Add => binop!(stack, pop_i64, push_i64, i64::wrapping_add),
        Instruction::I64Sub => binop!(stack, pop_i64, push_i64, i64::wrapping_sub),
        Instruction::I64Mul => binop!(stack, pop_i64, push_i64, i64::wrapping_mul),
        Instruction::I64DivS => {
            let b = pop_i64(stack)?;
            let a = pop_i64(stack)?;
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            push_i64!(stack, a.checked_div(b).ok_or(Trap::IntegerOverflow)?);
        }
        Instruction::I64DivU => {
            let b = pop_i64(stack)? as u64;
            let a = pop_i64(stack)? as u64;
            push_i64!(stack, a.checked_div(b).ok_or(Trap::IntegerDivideByZero)?);
        }
        Instruction::I64RemS => {
            let b = pop_i64(stack)?;
            let a = pop_i64(stack)?;
            if b == 0 {
                return Err(Trap::IntegerDivideByZero);
            }
            push_i64!(stack, a.wrapping_rem(b));
        }
        Instruction::I64RemU => {
            let b = pop_i64(stack)? as u64;
            let a = pop_i64(stack)? as u64;
            push_i64!(stack, a.checked_rem(b).ok_or(Trap::IntegerDivideByZero)?);
        }
        Instruction::I64And => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a & b),
        Instruction::I64Or => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a | b),
        Instruction::I64Xor => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a ^ b),
        Instruction::I64Shl => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a.wrapping_shl(b as u32)),
        Instruction::I64ShrS => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a.wrapping_shr(b as u32)),
        Instruction::I64ShrU => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| (a as u64).wrapping_shr(b as u32)),
        Instruction::I64Rotl => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a.rotate_left(b as u32)),
        Instruction::I64Rotr => binop!(stack, pop_i64, push_i64, |a: i64, b: i64| a.rotate_right(b as u32)),

        // f32
        Instruction::F32Eq => cmpop!(stack, pop_f32, |a: f32, b: f32| a == b),
        Instruction::F32Ne => cmpop!(stack, pop_f32, |a: f32, b: f32| a != b),
        Instruction::F32Lt => cmpop!(stack, pop_f32, |a: f32, b: f32| a < b),
        Instruction::F32Gt => cmpop!(stack, pop_f32, |a: f32, b: f32| a > b),
        Instruction::F32Le => cmpop!(stack, pop_f32, |a: f32, b: f32| a <= b),
        Instruction::F32Ge => cmpop!(stack, pop_f32, |a: f32, b: f32| a >= b),
        Instruction::F32Abs => unop!(stack, pop_f32, push_f32, f32::abs),
        Instruction::F32Neg => unop!(stack, pop_f32, push_f32, |a: f32| -a),
        Instruction::F32Ceil => unop!(stack, pop_f32, push_f32, f32::ceil),
        Instruction::F32Floor => unop!(stack, pop_f32, push_f32, f32::floor),
        Instruction::F32Trunc => unop!(stack, pop_f32, push_f32, f32::trunc),
        Instruction::F32Nearest => unop!(stack, pop_f32, push_f32, f32::round_ties_even),
        Instruction::F32Sqrt => unop!(stack, pop_f32, push_f32, f32::sqrt),
        Instruction::F32Add => binop!(stack, pop_f32, push_f32, |a: f32, b: f32| a + b),
        Instruction::F32Sub => binop!(stack, pop_f32, push_f32, |a: f32, b: f32| a - b),
        Instruction::F32Mul => binop!(stack, pop_f32, push_f32, |a: f32, b: f32| a * b),
        Instruction::F32Div => binop!(stack, pop_f32, push_f32, |a: f32, b: f32| a / b),
        Instruction::F32Min => binop!(stack, pop_f32, push_f32, wasm_min::<f32>),
        Instruction::F32Max => binop!(stack, pop_f32, push_f32, wasm_max::<f32>),
        Instruction::F32Copysign => binop!(stack, pop_f32, push_f32, f32::copysign),

        // f64
        Instruction::F64Eq => cmpop!(stack, pop_f64, |a: f64, b: f64| a == b),
        Instruction::F64Ne => cmpop!(stack, pop_f64, |a: f64, b: f64| a != b),
        Instruction::F64Lt => cmpop!(stack, pop_f64, |a: f64, b: f64| a < b),
        Instruction::F64Gt => cmpop!(stack, pop_f64, |a: f64, b: f64| a > b),
        Instruction::F64Le => cmpop!(stack, pop_f64, |a: f64, b: f64| a <= b),
        Instruction::F64Ge => cmpop!(stack, pop_f64, |a: f64, b: f64| a >= b),
        Instruction::F64Abs => unop!(stack, pop_f64, push_f64, f64::abs),
        Instruction::F64Neg => unop!(stack, pop_f64, push_f64, |a: f64| -a),
        Instruction::F64Ceil => unop!(stack, pop_f64, push_f64, f64::ceil),
        Instruction::F64Floor => unop!(stack, pop_f64, push_f64, f64::floor),
        Instruction::F64Trunc => unop!(stack, pop_f64, push_f64, f64::trunc),
        Instruction::F64Nearest => unop!(stack, pop_f64, push_f64, f64::round_ties_even),
        Instruction::F64Sqrt => unop!(stack, pop_f64, push_f64, f64::sqrt),
        Instruction::F64Add => binop!(stack, pop_f64, push_f64, |a: f64, b: f64| a + b),
        Instruction::F64Sub => binop!(stack, pop_f64, push_f64, |a: f64, b: f64| a - b),
        Instruction::F64Mul => binop!(stack, pop_f64, push_f64, |a: f64, b: f64| a * b),
        Instruction::F64Div => binop!(stack, pop_f64, push_f64, |a: f64, b: f64| a / b),
        Instruction::F64Min => binop!(stack, pop_f64, push_f64, wasm_min::<f64>),
        Instruction::F64Max => binop!(stack, pop_f64, push_f64, wasm_max::<f64>),
        Instruction::F64Copysign => binop!(stack, pop_f64, push_f64, f64::copysign),

        // Conversions
        Instruction::I32WrapI64 => unop!(stack, pop_i64, push_i32, |a: i64| a as i32),
        Instruction::I32TruncF32S => trunc!(stack, pop_f32, push_i32, i32, |t: f32| t >= -2147483648.0 && t < 2147483648.0),
        Instruction::I32TruncF32U => trunc!(stack, pop_f32, push_i32, u32, |t: f32| t > -1.0 && t < 4294967296.0),
        Instruction::I32TruncF64S => trunc!(stack, pop_f64, push_i32, i32, |t: f64| t >= -2147483648.0 && t < 2147483648.0),
        Instruction::I32TruncF64U => trunc!(stack, pop_f64, push_i32, u32, |t: f64| t > -1.0 && t < 4294967296.0),
        Instruction::I64ExtendI32S => unop!(stack, pop_i32, push_i64, |a: i32| a as i64),
        Instruction::I64ExtendI32U => unop!(stack, pop_i32, push_i64, |a: i32| a as u32 as i64),
        Instruction::I64TruncF32S => trunc!(stack, pop_f32, push_i64, i64, |t: f32| t >= -9223372036854775808.0 && t < 9223372036854775808.0),
        Instruction::I64TruncF32U => trunc!(stack, pop_f32, push_i64, u64, |t: f32| t > -1.0 && t < 18446744073709551616.0),
        Instruction::I64TruncF64S => trunc!(stack, pop_f64, push_i64, i64, |t: f64| t >= -9223372036854775808.0 && t < 9223372036854775808.0),
        Instruction::I64TruncF64U => trunc!(stack, pop_f64, push_i64, u64, |t: f64| t > -1.0 && t < 18446744073709551616.0),
        Instruction::F32ConvertI32S => unop!(stack, pop_i32, push_f32, |a: i32| a as f32),
        Instruction::F32ConvertI32U => unop!(stack, pop_i32, push_f32, |a: i32| a as u32 as f32),
        Instruction::F32ConvertI64S => unop!(stack, pop_i64, push_f32, |a: i64| a as f32),
        Instruction::F32ConvertI64U => unop!(stack, pop_i64, push_f32, |a: i64| a as u64 as f32),
        Instruction::F32DemoteF64 => unop!(stack, pop_f64, push_f32, |a: f64| a as f32),
        Instruction::F64ConvertI32S => unop!(stack, pop_i32, push_f64, |a: i32| a as f64),
        Instruction::F64ConvertI32U => unop!(stack, pop_i32, push_f64, |a: i32| a as u32 as f64),
        Instruction::F64ConvertI64S => unop!(stack, pop_i64, push_f64, |a: i64| a as f64),
        Instruction::F64ConvertI64U => unop!(stack, pop_i64, push_f64, |a: i64| a as u64 as f64),
        Instruction::F64PromoteF32 => unop!(stack, pop_f32, push_f64, |a: f32| a as f64),
        // Same bits, same zero-extended slot.
        Instruction::I32ReinterpretF32
        | Instruction::I64ReinterpretF64
        | Instruction::F32ReinterpretI32
        | Instruction::F64ReinterpretI64 => {}

        // Sign extension
        Instruction::I32Extend8S => unop!(stack, pop_i32, push_i32, |a: i32| a as i8 as i32),
        Instruction::I32Extend16S => unop!(stack, pop_i32, push_i32, |a: i32| a as i16 as i32),
        Instruction::I64Extend8S => unop!(stack, pop_i64, push_i64, |a: i64| a as i8 as i64),
        Instruction::I64Extend16S => unop!(stack, pop_i64, push_i64, |a: i64| a as i16 as i64),
        Instruction::I64Extend32S => unop!(stack, pop_i64, push_i64, |a: i64| a as i32 as i64),

        // Saturating truncation: `as` already saturates and maps NaN to 0.
        Instruction::I32TruncSatF32S => unop!(stack, pop_f32, push_i32, |a: f32| a as i32),
        Instruction::I32TruncSatF32U => unop!(stack, pop_f32, push_i32, |a: f32| a as u32),
        Instruction::I32TruncSatF64S => unop!(stack, pop_f64, push_i32, |a: f64| a as i32),
        Instruction::I32TruncSatF64U => unop!(stack, pop_f64, push_i32, |a: f64| a as u32),
        Instruction::I64TruncSatF32S => unop!(stack, pop_f32, push_i64, |a: f32| a as i64),
        Instruction::I64TruncSatF32U => unop!(stack, pop_f32, push_i64, |a: f32| a as u64),
        Instruction::I64TruncSatF64S => unop!(stack, pop_f64, push_i64, |a: f64| a as i64),
        Instruction::I64TruncSatF64U => unop!(stack, pop_f64, push_i64, |a: f64| a as u64),
    }
    Ok(Control::Next)
}

#[cfg(test)]
mod tests {
    use crate::module::Module;
    use crate::value::Val;
    use crate::{Error, InvokeMode, Trap};

    fn run(wat: &str, name: &str, args: &[Val]) -> Result<Vec<Val>, Error> {
        let module = Module::new(wat)?;
        let mut instance = crate::Engine::default().instantiate(&module)?;
        instance.call_export(name, args, InvokeMode::CONVERT_FAULTS)
    }

    #[test]
    fn block_results_survive_branches() {
        let results = run(
            r#"(module
                (func (export "f") (result i32)
                    block (result i32)
                        i32.const 1
                        i32.const 2
                        br 0
                    end))"#,
            "f",
            &[],
        )
        .unwrap();
        assert_eq!(results, vec![Val::I32(2)]);
    }

    #[test]
    fn loops_count_down() {
        let results = run(
            r#"(module
                (func (export "sum") (param $n i32) (result i32)
                    (local $acc i32)
                    loop $top
                        local.get $acc
                        local.get $n
                        i32.add
                        local.set $acc
                        local.get $n
                        i32.const 1
                        i32.sub
                        local.tee $n
                        br_if $top
                    end
                    local.get $acc))"#,
            "sum",
            &[Val::I32(10)],
        )
        .unwrap();
        assert_eq!(results, vec![Val::I32(55)]);
    }

    #[test]
    fn br_table_picks_target() {
        let wat = r#"(module
            (func (export "pick") (param i32) (result i32)
                block
                    block
                        block
                            local.get 0
                            br_table 0 1 2
                        end
                        i32.const 10
                        return
                    end
                    i32.const 20
                    return
                end
                i32.const 30))"#;
        for (arg, want) in [(0, 10), (1, 20), (2, 30), (99, 30)] {
            assert_eq!(run(wat, "pick", &[Val::I32(arg)]).unwrap(), vec![Val::I32(want)]);
        }
    }

    #[test]
    fn if_without_else_skips_body() {
        let wat = r#"(module
            (func (export "f") (param i32) (result i32)
                (local $r i32)
                i32.const 5
                local.set $r
                local.get 0
                if
                    i32.const 7
                    local.set $r
                end
                local.get $r))"#;
        assert_eq!(run(wat, "f", &[Val::I32(0)]).unwrap(), vec![Val::I32(5)]);
        assert_eq!(run(wat, "f", &[Val::I32(1)]).unwrap(), vec![Val::I32(7)]);
    }

    #[test]
    fn signed_division_overflow_traps() {
        let err = run(
            r#"(module
                (func (export "f") (result i32)
                    i32.const 0x80000000
                    i32.const -1
                    i32.div_s))"#,
            "f",
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Runtime(Trap::IntegerOverflow)));
    }

    #[test]
    fn float_truncation_checks_range() {
        let wat = r#"(module
            (func (export "f") (param f64) (result i32)
                local.get 0
                i32.trunc_f64_s))"#;
        assert_eq!(run(wat, "f", &[Val::F64(-2147483648.9)]).unwrap(), vec![Val::I32(i32::MIN)]);
        let err = run(wat, "f", &[Val::F64(2147483648.0)]).unwrap_err();
        assert!(matches!(err, Error::Runtime(Trap::IntegerOverflow)));
        let err = run(wat, "f", &[Val::F64(f64::NAN)]).unwrap_err();
        assert!(matches!(err, Error::Runtime(Trap::InvalidConversion)));
    }

    #[test]
    fn deep_recursion_exhausts_call_stack() {
        let err = run(
            r#"(module
                (func $f (export "f") (result i32)
                    call $f))"#,
            "f",
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Runtime(Trap::CallStackExhausted)));
    }
}
