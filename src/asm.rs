//! Assembly writer.
//!
//! The innermost layer of code generation: it knows Intel-syntax mnemonics,
//! register aliases per operand width, and the System V calling convention
//! for one-argument calls. It also owns the four-slot scratch register pool,
//! the label counter, and the `.bss`/`.data` layout flushed by [`AsmWriter::finish`].
//!
//! Scratch registers are the callee-saved set `r12..r15`, so values survive
//! calls into the runtime. `rax` is reachable through a fifth, special handle
//! that is never allocated from the pool.

use crate::debug::{self, Severity};
use crate::error::{CompileError, CompileResult};
use serde::Serialize;
use std::fmt::Write;

const SCRATCH_COUNT: usize = 4;

const REG64: [&str; 5] = ["r12", "r13", "r14", "r15", "rax"];
const REG32: [&str; 5] = ["r12d", "r13d", "r14d", "r15d", "eax"];
const REG16: [&str; 5] = ["r12w", "r13w", "r14w", "r15w", "ax"];
const REG8: [&str; 5] = ["r12b", "r13b", "r14b", "r15b", "al"];

/// Handle to a scratch register (0..=3) or the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg(usize);

/// The accumulator handle. Never part of the scratch pool.
pub const RAX: Reg = Reg(4);

impl Reg {
    fn name(self, size: RegSize) -> &'static str {
        match size {
            RegSize::Qword => REG64[self.0],
            RegSize::Dword => REG32[self.0],
            RegSize::Word => REG16[self.0],
            RegSize::Byte => REG8[self.0],
        }
    }
}

pub type LabelId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegSize {
    Byte,
    Word,
    Dword,
    Qword,
}

impl RegSize {
    pub fn from_width(bits: u32) -> CompileResult<Self> {
        match bits {
            8 => Ok(RegSize::Byte),
            16 => Ok(RegSize::Word),
            32 => Ok(RegSize::Dword),
            64 => Ok(RegSize::Qword),
            _ => Err(CompileError::new(format!(
                "[ASM] unsupported operand width {bits}"
            ))),
        }
    }

    fn reserve_directive(self) -> &'static str {
        match self {
            RegSize::Byte => "resb",
            RegSize::Word => "resw",
            RegSize::Dword => "resd",
            RegSize::Qword => "resq",
        }
    }

    fn data_directive(self) -> &'static str {
        match self {
            RegSize::Byte => "db",
            RegSize::Word => "dw",
            RegSize::Dword => "dd",
            RegSize::Qword => "dq",
        }
    }

    fn mem_keyword(self) -> &'static str {
        match self {
            RegSize::Byte => "byte",
            RegSize::Word => "word",
            RegSize::Dword => "dword",
            RegSize::Qword => "qword",
        }
    }
}

/// Initial value of a global that can be emitted as literal `.data` bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    Int(i64),
    /// String bytes, including the terminating NUL. Emitted as an anonymous
    /// byte sequence with the global holding its address.
    Str(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
enum StoredInit {
    Int(i64),
    Addr(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalEntry {
    pub name: String,
    pub size: RegSize,
    pub count: usize,
    init: Option<StoredInit>,
}

pub struct AsmWriter {
    text: String,
    globals: Vec<GlobalEntry>,
    strings: Vec<(String, Vec<u8>)>,
    free_regs: [bool; SCRATCH_COUNT],
    label_count: LabelId,
    string_count: u32,
}

impl Default for AsmWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl AsmWriter {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            globals: Vec::new(),
            strings: Vec::new(),
            free_regs: [true; SCRATCH_COUNT],
            label_count: 0,
            string_count: 0,
        }
    }

    // ============================================================
    //                     Register allocation
    // ============================================================

    fn allocate_register(&mut self) -> CompileResult<Reg> {
        for i in 0..SCRATCH_COUNT {
            if self.free_regs[i] {
                self.free_regs[i] = false;
                debug::print(
                    Severity::Debug,
                    format!("[ASM] allocating register {}", REG64[i]),
                );
                return Ok(Reg(i));
            }
        }
        Err(CompileError::new("[ASM] out of scratch registers"))
    }

    pub fn free_register(&mut self, reg: Reg) -> CompileResult<()> {
        if reg.0 >= SCRATCH_COUNT {
            return Err(CompileError::new(format!(
                "[ASM] can't free special register {}",
                REG64[reg.0]
            )));
        }
        if self.free_regs[reg.0] {
            return Err(CompileError::new(format!(
                "[ASM] register {} is already free",
                REG64[reg.0]
            )));
        }
        self.free_regs[reg.0] = true;
        Ok(())
    }

    /// True when no scratch register is allocated. Holds at every statement
    /// boundary.
    pub fn scratch_pool_is_free(&self) -> bool {
        self.free_regs.iter().all(|&free| free)
    }

    // ============================================================
    //                     Values and arithmetic
    // ============================================================

    /// Allocates a register and loads an immediate into it.
    ///
    /// ```text
    /// mov r12, 10
    /// ```
    pub fn init_imm(&mut self, value: i64) -> CompileResult<Reg> {
        let reg = self.allocate_register()?;
        let _ = writeln!(self.text, "\tmov {}, {}", reg.name(RegSize::Qword), value);
        Ok(reg)
    }

    /// Width-sized register move. Frees the source when asked to.
    pub fn mov_reg(&mut self, dst: Reg, src: Reg, size: RegSize, free_src: bool) -> CompileResult<()> {
        let _ = writeln!(self.text, "\tmov {}, {}", dst.name(size), src.name(size));
        if free_src {
            self.free_register(src)?;
        }
        Ok(())
    }

    /// Adds `r2` into `r1` and frees `r2`.
    ///
    /// ```text
    /// add r12, r13
    /// ```
    pub fn add(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        let _ = writeln!(
            self.text,
            "\tadd {}, {}",
            r1.name(RegSize::Qword),
            r2.name(RegSize::Qword)
        );
        self.free_register(r2)?;
        Ok(r1)
    }

    pub fn sub(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        let _ = writeln!(
            self.text,
            "\tsub {}, {}",
            r1.name(RegSize::Qword),
            r2.name(RegSize::Qword)
        );
        self.free_register(r2)?;
        Ok(r1)
    }

    pub fn mul(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        let _ = writeln!(
            self.text,
            "\timul {}, {}",
            r1.name(RegSize::Qword),
            r2.name(RegSize::Qword)
        );
        self.free_register(r2)?;
        Ok(r1)
    }

    /// Signed division through `rdx:rax`: the dividend moves into `rax`,
    /// `cqo` sign-extends it, and the quotient moves back into `r1`.
    ///
    /// ```text
    /// mov rax, r12
    /// cqo
    /// idiv r13
    /// mov r12, rax
    /// ```
    pub fn div(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        let _ = writeln!(self.text, "\tmov rax, {}", r1.name(RegSize::Qword));
        self.text.push_str("\tcqo\n");
        let _ = writeln!(self.text, "\tidiv {}", r2.name(RegSize::Qword));
        let _ = writeln!(self.text, "\tmov {}, rax", r1.name(RegSize::Qword));
        self.free_register(r2)?;
        Ok(r1)
    }

    /// Shift left by an immediate bit count.
    pub fn sll(&mut self, reg: Reg, count: u32) {
        let _ = writeln!(self.text, "\tshl {}, {}", reg.name(RegSize::Qword), count);
    }

    // ============================================================
    //                        Comparisons
    // ============================================================

    /// Shared body of the six comparisons: compare, set the byte flag, then
    /// widen it back to 64 bits. The result lands in `r1` as 0 or 1.
    ///
    /// ```text
    /// cmp r12, r13
    /// sete r12b
    /// movzx r12, r12b
    /// ```
    fn comp(&mut self, r1: Reg, r2: Reg, setcc: &str) -> CompileResult<Reg> {
        let _ = writeln!(
            self.text,
            "\tcmp {}, {}",
            r1.name(RegSize::Qword),
            r2.name(RegSize::Qword)
        );
        let _ = writeln!(self.text, "\t{} {}", setcc, r1.name(RegSize::Byte));
        let _ = writeln!(
            self.text,
            "\tmovzx {}, {}",
            r1.name(RegSize::Qword),
            r1.name(RegSize::Byte)
        );
        self.free_register(r2)?;
        Ok(r1)
    }

    pub fn comp_eq(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        self.comp(r1, r2, "sete")
    }

    pub fn comp_ne(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        self.comp(r1, r2, "setne")
    }

    pub fn comp_gt(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        self.comp(r1, r2, "setg")
    }

    pub fn comp_ge(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        self.comp(r1, r2, "setge")
    }

    pub fn comp_lt(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        self.comp(r1, r2, "setl")
    }

    pub fn comp_le(&mut self, r1: Reg, r2: Reg) -> CompileResult<Reg> {
        self.comp(r1, r2, "setle")
    }

    // ============================================================
    //                      Labels and jumps
    // ============================================================

    pub fn new_label(&mut self) -> LabelId {
        let id = self.label_count;
        self.label_count += 1;
        id
    }

    pub fn emit_label(&mut self, label: LabelId) {
        let _ = writeln!(self.text, "__label__{label}:");
    }

    pub fn jmp(&mut self, label: LabelId) {
        let _ = writeln!(self.text, "\tjmp __label__{label}");
    }

    /// Compares `reg` against an immediate and jumps. Frees `reg`.
    ///
    /// ```text
    /// cmp r12, 1
    /// jne __label__3
    /// ```
    fn jmp_with_cond(
        &mut self,
        reg: Reg,
        comp_val: i64,
        jcc: &str,
        label: LabelId,
    ) -> CompileResult<()> {
        let _ = writeln!(self.text, "\tcmp {}, {}", reg.name(RegSize::Qword), comp_val);
        let _ = writeln!(self.text, "\t{jcc} __label__{label}");
        self.free_register(reg)
    }

    pub fn jmp_eq(&mut self, reg: Reg, comp_val: i64, label: LabelId) -> CompileResult<()> {
        self.jmp_with_cond(reg, comp_val, "je", label)
    }

    pub fn jmp_ne(&mut self, reg: Reg, comp_val: i64, label: LabelId) -> CompileResult<()> {
        self.jmp_with_cond(reg, comp_val, "jne", label)
    }

    // ============================================================
    //                      Memory and globals
    // ============================================================

    /// Loads the address of a named global.
    ///
    /// ```text
    /// lea r12, [x]
    /// ```
    pub fn address_of(&mut self, name: &str) -> CompileResult<Reg> {
        let reg = self.allocate_register()?;
        let _ = writeln!(self.text, "\tlea {}, [{}]", reg.name(RegSize::Qword), name);
        Ok(reg)
    }

    /// Loads memory at the address held in `addr`. Frees `addr`.
    ///
    /// ```text
    /// mov r13d, dword [r12]
    /// ```
    pub fn load_mem(&mut self, addr: Reg, size: RegSize) -> CompileResult<Reg> {
        let out = self.allocate_register()?;
        let _ = writeln!(
            self.text,
            "\tmov {}, {} [{}]",
            out.name(size),
            size.mem_keyword(),
            addr.name(RegSize::Qword)
        );
        self.free_register(addr)?;
        Ok(out)
    }

    /// Stores `value` to the address held in `addr`. Frees `addr`, and
    /// `value` when asked to.
    pub fn store_mem(
        &mut self,
        addr: Reg,
        value: Reg,
        size: RegSize,
        free_value: bool,
    ) -> CompileResult<()> {
        let _ = writeln!(
            self.text,
            "\tmov {} [{}], {}",
            size.mem_keyword(),
            addr.name(RegSize::Qword),
            value.name(size)
        );
        self.free_register(addr)?;
        if free_value {
            self.free_register(value)?;
        }
        Ok(())
    }

    /// Records a global for the `.bss` layout. `count` above 1 reserves an
    /// array of elements; 0 is treated as a single element.
    pub fn add_global_var(&mut self, name: &str, size: RegSize, count: usize) -> CompileResult<()> {
        if self.find_global(name).is_some() {
            return Err(CompileError::new(format!(
                "[ASM] redefinition of global symbol '{name}'"
            )));
        }
        debug::print(
            Severity::Debug,
            format!("[ASM] adding symbol '{name}' to the bss section"),
        );
        self.globals.push(GlobalEntry {
            name: name.to_string(),
            size,
            count: count.max(1),
            init: None,
        });
        Ok(())
    }

    /// Gives a recorded global a literal initial value, moving it from the
    /// `.bss` reservation list to the `.data` section.
    pub fn set_global_initial(&mut self, name: &str, value: GlobalInit) -> CompileResult<()> {
        let init = match value {
            GlobalInit::Int(v) => StoredInit::Int(v),
            GlobalInit::Str(bytes) => StoredInit::Addr(self.string_literal(bytes)),
        };
        let entry = self.find_global_mut(name).ok_or_else(|| {
            CompileError::new(format!("[ASM] unknown global symbol '{name}'"))
        })?;
        entry.init = Some(init);
        Ok(())
    }

    /// Width-sized store of a register into a named global.
    pub fn set_global(&mut self, name: &str, reg: Reg, free_value: bool) -> CompileResult<()> {
        let size = self
            .find_global(name)
            .ok_or_else(|| CompileError::new(format!("[ASM] unknown global symbol '{name}'")))?
            .size;
        let _ = writeln!(self.text, "\tmov [{}], {}", name, reg.name(size));
        if free_value {
            self.free_register(reg)?;
        }
        Ok(())
    }

    /// Zero-extended load of a named global into a fresh register. The full
    /// register is cleared first so narrow loads leave no stale upper bits.
    ///
    /// ```text
    /// xor r12, r12
    /// mov r12d, [x]
    /// ```
    pub fn get_global(&mut self, name: &str) -> CompileResult<Reg> {
        let size = self
            .find_global(name)
            .ok_or_else(|| CompileError::new(format!("[ASM] unknown global symbol '{name}'")))?
            .size;
        let reg = self.allocate_register()?;
        let _ = writeln!(
            self.text,
            "\txor {}, {}",
            reg.name(RegSize::Qword),
            reg.name(RegSize::Qword)
        );
        let _ = writeln!(self.text, "\tmov {}, [{}]", reg.name(size), name);
        Ok(reg)
    }

    /// Emits the bytes of a string literal under a freshly minted `.data`
    /// name and returns that name.
    pub fn string_literal(&mut self, bytes: Vec<u8>) -> String {
        let name = format!("__str_lit_{}", self.string_count);
        self.string_count += 1;
        self.strings.push((name.clone(), bytes));
        name
    }

    fn find_global(&self, name: &str) -> Option<&GlobalEntry> {
        self.globals.iter().find(|entry| entry.name == name)
    }

    fn find_global_mut(&mut self, name: &str) -> Option<&mut GlobalEntry> {
        self.globals.iter_mut().find(|entry| entry.name == name)
    }

    // ============================================================
    //                         Functions
    // ============================================================

    /// Opens a function: its `.text` section header, the exported symbol,
    /// and the frame setup.
    ///
    /// ```text
    /// section .text
    /// global  main
    /// main:
    ///     push rbp
    ///     mov rbp, rsp
    /// ```
    pub fn func_prologue(&mut self, name: &str) {
        self.text.push_str("section\t.text\n");
        let _ = writeln!(self.text, "global\t{name}");
        let _ = writeln!(self.text, "{name}:");
        self.text.push_str("\tpush rbp\n");
        self.text.push_str("\tmov rbp, rsp\n");
    }

    pub fn func_epilogue(&mut self) {
        self.text.push_str("\tpop rbp\n");
        self.text.push_str("\tret\n\n");
    }

    /// Stores the incoming first argument (`rdi`) into a named global.
    pub fn store_incoming_arg(&mut self, name: &str, size: RegSize) {
        let rdi = match size {
            RegSize::Qword => "rdi",
            RegSize::Dword => "edi",
            RegSize::Word => "di",
            RegSize::Byte => "dil",
        };
        let _ = writeln!(self.text, "\tmov [{name}], {rdi}");
    }

    /// One-argument call per System V AMD64: argument in `rdi`, result in
    /// `rax`. Returns the result register when the caller wants it.
    pub fn func_call(
        &mut self,
        name: &str,
        arg: Option<Reg>,
        need_return: bool,
    ) -> CompileResult<Option<Reg>> {
        let out = self.allocate_register()?;
        if let Some(arg) = arg {
            let _ = writeln!(self.text, "\tmov rdi, {}", arg.name(RegSize::Qword));
        }
        let _ = writeln!(self.text, "\tcall {name}");
        let _ = writeln!(self.text, "\tmov {}, rax", out.name(RegSize::Qword));
        if let Some(arg) = arg {
            self.free_register(arg)?;
        }
        if need_return {
            Ok(Some(out))
        } else {
            self.free_register(out)?;
            Ok(None)
        }
    }

    /// Moves a value into the width-matching alias of `rax` and frees it.
    pub fn func_return(&mut self, reg: Reg, size: RegSize) -> CompileResult<()> {
        self.mov_reg(RAX, reg, size, true)
    }

    // ============================================================
    //                          Wrapup
    // ============================================================

    /// Flushes the extern declarations, `.bss` reservations, `.data` entries
    /// and the GNU-stack note after the emitted text, consuming the writer.
    pub fn finish(self) -> String {
        let mut out = self.text;
        out.push('\n');
        for name in ["print", "print_char", "print_str", "print_ln"] {
            let _ = writeln!(out, "extern {name}");
        }
        out.push('\n');

        let bss: Vec<&GlobalEntry> = self.globals.iter().filter(|e| e.init.is_none()).collect();
        if !bss.is_empty() {
            out.push_str("section .bss\n");
            for entry in bss {
                let _ = writeln!(
                    out,
                    "\t{} {} {}",
                    entry.name,
                    entry.size.reserve_directive(),
                    entry.count
                );
            }
            out.push('\n');
        }

        let data: Vec<&GlobalEntry> = self.globals.iter().filter(|e| e.init.is_some()).collect();
        if !data.is_empty() || !self.strings.is_empty() {
            out.push_str("section .data\n");
            for entry in data {
                match entry.init.as_ref() {
                    Some(StoredInit::Int(value)) => {
                        let _ = writeln!(
                            out,
                            "\t{} {} {}",
                            entry.name,
                            entry.size.data_directive(),
                            value
                        );
                    }
                    Some(StoredInit::Addr(label)) => {
                        let _ = writeln!(out, "\t{} dq {}", entry.name, label);
                    }
                    None => {}
                }
            }
            for (name, bytes) in &self.strings {
                let rendered: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
                let _ = writeln!(out, "\t{} db {}", name, rendered.join(", "));
            }
            out.push('\n');
        }

        out.push_str("section .note.GNU-stack noalloc noexec nowrite progbits\n");
        out
    }
}
