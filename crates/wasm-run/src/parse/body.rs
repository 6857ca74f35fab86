use wasmparser::{BlockType, FuncType, FunctionBody, Operator};

/// A parsed function body, pre-decoded from raw wasm bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct ParsedBody {
    /// One entry per instruction.
    pub(crate) ops: Vec<Instruction>,

    /// Block metadata, indexed by block index. Index 0 is the function.
    pub(crate) blocks: Vec<Block>,

    /// Out-of-line `br_table` targets, indexed by `Instruction::BrTable`.
    pub(crate) br_tables: Vec<BrTable>,
}

/// Decoded instruction. Block-structured ops carry their block index so
/// branch targets never have to be searched for at run time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Instruction {
    // Control
    Unreachable,
    Nop,
    Block(u32),
    Loop(u32),
    If(u32),
    Else(u32),
    End(u32),
    Br(u32),
    BrIf(u32),
    BrTable(u32),
    Return,
    Call(u32),
    CallIndirect(u32),
    Drop,
    Select,

    // Locals / globals
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(u32),
    GlobalSet(u32),

    // Memory (offset immediate; alignment is only a hint)
    I32Load(u64),
    I64Load(u64),
    F32Load(u64),
    F64Load(u64),
    I32Load8S(u64),
    I32Load8U(u64),
    I32Load16S(u64),
    I32Load16U(u64),
    I64Load8S(u64),
    I64Load8U(u64),
    I64Load16S(u64),
    I64Load16U(u64),
    I64Load32S(u64),
    I64Load32U(u64),
    I32Store(u64),
    I64Store(u64),
    F32Store(u64),
    F64Store(u64),
    I32Store8(u64),
    I32Store16(u64),
    I64Store8(u64),
    I64Store16(u64),
    I64Store32(u64),
    MemorySize,
    MemoryGrow,

    // Constants (floats kept as raw bits)
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),

    // i32
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // i64
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // f32
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // f64
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // Sign extension
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Saturating truncation
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

/// Metadata for a block/loop/if/function, resolved at parse time.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub(crate) kind: BlockKind,
    /// PC of the block opener (block/loop/if instruction).
    pub(crate) start_pc: u32,
    /// PC of the `end` instruction (patched when `end` is parsed).
    pub(crate) end_pc: u32,
    /// PC of the `else` instruction, for an `If` that has one.
    pub(crate) else_pc: Option<u32>,
    pub(crate) params: u32,
    pub(crate) results: u32,
}

impl Block {
    /// Number of values a branch to this block carries.
    pub(crate) fn branch_arity(&self) -> usize {
        match self.kind {
            BlockKind::Loop => self.params as usize,
            _ => self.results as usize,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BlockKind {
    /// Implicit function-level block.
    Function,
    Block,
    Loop,
    If,
}

/// Targets of one `br_table`, as relative depths.
#[derive(Debug, Clone)]
pub(crate) struct BrTable {
    pub(crate) targets: Box<[u32]>,
    pub(crate) default: u32,
}

impl BrTable {
    pub(crate) fn depth_for(&self, index: u32) -> u32 {
        self.targets
            .get(index as usize)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Map operators that carry no immediate one-to-one onto instructions.
macro_rules! plain_ops {
    ($op:expr, $($name:ident),* $(,)?) => {
        match $op {
            $(Operator::$name => Some(Instruction::$name),)*
            _ => None,
        }
    };
}

/// Map memory operators onto instructions carrying the offset immediate.
macro_rules! memory_ops {
    ($op:expr, $($name:ident),* $(,)?) => {
        match $op {
            $(Operator::$name { memarg } => Some(Instruction::$name(memarg.offset)),)*
            _ => None,
        }
    };
}

impl ParsedBody {
    /// Parse a raw wasm function body. `types` is the module's type
    /// section, needed to size blocks typed by a type index.
    pub(crate) fn parse(
        reader: &FunctionBody,
        types: &[FuncType],
        result_count: u32,
    ) -> Result<Self, String> {
        let mut body = Self::default();

        // Implicit function-level block (index 0).
        let func_block_idx = body.open_block(BlockKind::Function, 0, result_count);

        let ops_reader = reader
            .get_operators_reader()
            .map_err(|e| e.to_string())?;
        // Track open block indices so `end` can find the right one.
        let mut block_stack: Vec<u32> = vec![func_block_idx];

        for op in ops_reader {
            let op = op.map_err(|e| e.to_string())?;
            body.parse_op(op, types, &mut block_stack)?;
        }
        if !block_stack.is_empty() {
            return Err("function body is missing its final `end`".into());
        }
        Ok(body)
    }

    /// Allocate a new block entry, returning its index.
    fn open_block(&mut self, kind: BlockKind, params: u32, results: u32) -> u32 {
        let idx = self.blocks.len() as u32;
        self.blocks.push(Block {
            kind,
            start_pc: self.ops.len() as u32,
            end_pc: 0,
            else_pc: None,
            params,
            results,
        });
        idx
    }

    fn parse_op(
        &mut self,
        op: Operator,
        types: &[FuncType],
        block_stack: &mut Vec<u32>,
    ) -> Result<(), String> {
        if block_stack.is_empty() {
            return Err("operators after the final `end`".into());
        }
        if let Some(instr) = plain_instruction(&op).or_else(|| memory_instruction(&op)) {
            self.ops.push(instr);
            return Ok(());
        }

        let instr = match op {
            Operator::Block { blockty } => {
                let (params, results) = block_arity(blockty, types)?;
                let idx = self.open_block(BlockKind::Block, params, results);
                block_stack.push(idx);
                Instruction::Block(idx)
            }
            Operator::Loop { blockty } => {
                let (params, results) = block_arity(blockty, types)?;
                let idx = self.open_block(BlockKind::Loop, params, results);
                block_stack.push(idx);
                Instruction::Loop(idx)
            }
            Operator::If { blockty } => {
                let (params, results) = block_arity(blockty, types)?;
                let idx = self.open_block(BlockKind::If, params, results);
                block_stack.push(idx);
                Instruction::If(idx)
            }
            Operator::Else => {
                let idx = *block_stack.last().ok_or("`else` without open block")?;
                let block = &mut self.blocks[idx as usize];
                if block.kind != BlockKind::If || block.else_pc.is_some() {
                    return Err("`else` outside of an `if` block".into());
                }
                block.else_pc = Some(self.ops.len() as u32);
                Instruction::Else(idx)
            }
            Operator::End => {
                let idx = block_stack.pop().ok_or("`end` without open block")?;
                self.blocks[idx as usize].end_pc = self.ops.len() as u32;
                Instruction::End(idx)
            }
            Operator::Br { relative_depth } => Instruction::Br(relative_depth),
            Operator::BrIf { relative_depth } => Instruction::BrIf(relative_depth),
            Operator::BrTable { targets } => {
                let default = targets.default();
                let targets = targets
                    .targets()
                    .collect::<Result<Box<[u32]>, _>>()
                    .map_err(|e| e.to_string())?;
                let idx = self.br_tables.len() as u32;
                self.br_tables.push(BrTable { targets, default });
                Instruction::BrTable(idx)
            }
            Operator::Call { function_index } => Instruction::Call(function_index),
            Operator::CallIndirect {
                type_index,
                table_index,
                ..
            } => {
                if table_index != 0 {
                    return Err(format!("call_indirect through table {table_index} is not supported"));
                }
                Instruction::CallIndirect(type_index)
            }
            Operator::TypedSelect { .. } => Instruction::Select,
            Operator::LocalGet { local_index } => Instruction::LocalGet(local_index),
            Operator::LocalSet { local_index } => Instruction::LocalSet(local_index),
            Operator::LocalTee { local_index } => Instruction::LocalTee(local_index),
            Operator::GlobalGet { global_index } => Instruction::GlobalGet(global_index),
            Operator::GlobalSet { global_index } => Instruction::GlobalSet(global_index),
            Operator::MemorySize { .. } => Instruction::MemorySize,
            Operator::MemoryGrow { .. } => Instruction::MemoryGrow,
            Operator::I32Const { value } => Instruction::I32Const(value),
            Operator::I64Const { value } => Instruction::I64Const(value),
            Operator::F32Const { value } => Instruction::F32Const(value.bits()),
            Operator::F64Const { value } => Instruction::F64Const(value.bits()),
            other => return Err(format!("unsupported instruction `{other:?}`")),
        };
        self.ops.push(instr);
        Ok(())
    }
}

/// `(params, results)` of a block type.
fn block_arity(blockty: BlockType, types: &[FuncType]) -> Result<(u32, u32), String> {
    match blockty {
        BlockType::Empty => Ok((0, 0)),
        BlockType::Type(_) => Ok((0, 1)),
        BlockType::FuncType(idx) => {
            let ty = types
                .get(idx as usize)
                .ok_or_else(|| format!("block type index {idx} out of bounds"))?;
            Ok((ty.params().len() as u32, ty.results().len() as u32))
        }
    }
}

fn memory_instruction(op: &Operator) -> Option<Instruction> {
    memory_ops!(
        op,
        I32Load, I64Load, F32Load, F64Load,
        I32Load8S, I32Load8U, I32Load16S, I32Load16U,
        I64Load8S, I64Load8U, I64Load16S, I64Load16U, I64Load32S, I64Load32U,
        I32Store, I64Store, F32Store, F64Store,
        I32Store8, I32Store16, I64Store8, I64Store16, I64Store32,
    )
}

fn plain_instruction(op: &Operator) -> Option<Instruction> {
    plain_ops!(
        op,
        Unreachable, Nop, Return, Drop, Select,
        I32Eqz, I32Eq, I32Ne, I32LtS, I32LtU, I32GtS, I32GtU, I32LeS, I32LeU, I32GeS, I32GeU,
        I32Clz, I32Ctz, I32Popcnt, I32Add, I32Sub, I32Mul, I32DivS, I32DivU, I32RemS, I32RemU,
        I32And, I32Or, I32Xor, I32Shl, I32ShrS, I32ShrU, I32Rotl, I32Rotr,
        I64Eqz, I64Eq, I64Ne, I64LtS, I64LtU, I64GtS, I64GtU, I64LeS, I64LeU, I64GeS, I64GeU,
        I64Clz, I64Ctz, I64Popcnt, I64Add, I64Sub, I64Mul, I64DivS, I64DivU, I64RemS, I64RemU,
        I64And, I64Or, I64Xor, I64Shl, I64ShrS, I64ShrU, I64Rotl, I64Rotr,
        F32Eq, F32Ne, F32Lt, F32Gt, F32Le, F32Ge,
        F32Abs, F32Neg, F32Ceil, F32Floor, F32Trunc, F32Nearest, F32Sqrt,
        F32Add, F32Sub, F32Mul, F32Div, F32Min, F32Max, F32Copysign,
        F64Eq, F64Ne, F64Lt, F64Gt, F64Le, F64Ge,
        F64Abs, F64Neg, F64Ceil, F64Floor, F64Trunc, F64Nearest, F64Sqrt,
        F64Add, F64Sub, F64Mul, F64Div, F64Min, F64Max, F64Copysign,
        I32WrapI64, I32TruncF32S, I32TruncF32U, I32TruncF64S, I32TruncF64U,
        I64ExtendI32S, I64ExtendI32U, I64TruncF32S, I64TruncF32U, I64TruncF64S, I64TruncF64U,
        F32ConvertI32S, F32ConvertI32U, F32ConvertI64S, F32ConvertI64U, F32DemoteF64,
        F64ConvertI32S, F64ConvertI32U, F64ConvertI64S, F64ConvertI64U, F64PromoteF32,
        I32ReinterpretF32, I64ReinterpretF64, F32ReinterpretI32, F64ReinterpretI64,
        I32Extend8S, I32Extend16S, I64Extend8S, I64Extend16S, I64Extend32S,
        I32TruncSatF32S, I32TruncSatF32U, I32TruncSatF64S, I32TruncSatF64U,
        I64TruncSatF32S, I64TruncSatF32U, I64TruncSatF64S, I64TruncSatF64U,
    )
}
