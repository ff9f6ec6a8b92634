//! Code generation.
//!
//! A post-order walk of the AST: expression walks return the scratch register
//! holding their value, statement walks return nothing and leave the register
//! pool empty. `break` targets the end label of the innermost enclosing loop,
//! tracked as a stack while loop bodies are generated.

use crate::asm::{AsmWriter, GlobalInit, LabelId, Reg, RegSize};
use crate::ast::{BinaryOp, Decl, Expr, ExprKind, FuncDecl, Program, Stmt, StmtKind, VarDecl};
use crate::error::{CompileError, CompileResult};
use crate::symtab::{Symbol, SymbolTable};

pub fn generate(program: &Program, symtab: &SymbolTable) -> CompileResult<String> {
    let mut generator = Codegen::new(symtab);
    generator.run(program)
}

struct Codegen<'a> {
    asm: AsmWriter,
    symtab: &'a SymbolTable,
    loop_ends: Vec<LabelId>,
    return_emitted: bool,
}

impl<'a> Codegen<'a> {
    fn new(symtab: &'a SymbolTable) -> Self {
        Self {
            asm: AsmWriter::new(),
            symtab,
            loop_ends: Vec::new(),
            return_emitted: false,
        }
    }

    fn run(&mut self, program: &Program) -> CompileResult<String> {
        for decl in &program.decls {
            match decl {
                Decl::Func(func) => self.gen_decl_func(func)?,
                Decl::Var(var) => self.gen_decl_var(var)?,
            }
        }
        Ok(std::mem::take(&mut self.asm).finish())
    }

    // ============================================================
    //                        Declarations
    // ============================================================

    fn gen_decl_func(&mut self, func: &FuncDecl) -> CompileResult<()> {
        let Symbol::Func { name, formals, .. } = self.symtab.get(func.symbol) else {
            return Err(CompileError::new(
                "[CG] declaration symbol is not a function",
            ));
        };

        self.return_emitted = false;
        self.asm.func_prologue(name);
        for (i, formal) in formals.iter().enumerate() {
            let size = RegSize::from_width(formal.ty.width())?;
            self.asm.add_global_var(&formal.name, size, 0)?;
            // Only the first argument arrives in a register.
            if i == 0 {
                self.asm.store_incoming_arg(&formal.name, size);
            }
        }

        for stmt in &func.body {
            self.gen_stmt(stmt)?;
        }

        if !self.return_emitted {
            let reg = self.asm.init_imm(0)?;
            self.asm.func_return(reg, RegSize::Byte)?;
        }
        if !self.asm.scratch_pool_is_free() {
            return Err(CompileError::new(format!(
                "[CG] register left allocated at the end of function '{name}'"
            )));
        }
        self.asm.func_epilogue();
        Ok(())
    }

    fn gen_decl_var(&mut self, var: &VarDecl) -> CompileResult<()> {
        let symbol = self.symtab.get(var.symbol);
        let ty = symbol.ty();
        let elem_width = if ty.is_array() {
            ty.element()?.width()
        } else {
            ty.width()
        };
        let size = RegSize::from_width(elem_width)?;
        self.asm.add_global_var(symbol.name(), size, ty.array_len)?;

        if let Some(init) = &var.init {
            match &init.kind {
                ExprKind::IntLit(value) => {
                    self.asm
                        .set_global_initial(symbol.name(), GlobalInit::Int(*value))?;
                }
                ExprKind::StrLit(bytes) => {
                    self.asm
                        .set_global_initial(symbol.name(), GlobalInit::Str(bytes.clone()))?;
                }
                _ => {
                    let reg = self.gen_expr(init)?;
                    self.asm.set_global(symbol.name(), reg, true)?;
                }
            }
        }
        Ok(())
    }

    // ============================================================
    //                         Statements
    // ============================================================

    fn gen_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Empty => Ok(()),
            StmtKind::VarDecl(vars) => {
                for var in vars {
                    self.gen_decl_var(var)?;
                }
                Ok(())
            }
            StmtKind::Expr(expr) => match &expr.kind {
                ExprKind::Assign { .. } => {
                    self.gen_assign(expr, false)?;
                    Ok(())
                }
                ExprKind::Call { .. } => {
                    self.gen_call(expr, false)?;
                    Ok(())
                }
                _ => {
                    let reg = self.gen_expr(expr)?;
                    self.asm.free_register(reg)
                }
            },
            StmtKind::If { cond, then, els } => self.gen_stmt_if(cond, then, els.as_deref()),
            StmtKind::While { cond, body } => self.gen_stmt_while(cond, body),
            StmtKind::DoWhile { body, cond } => self.gen_stmt_do_while(body, cond),
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.gen_stmt_for(init, cond, update.as_ref(), body),
            StmtKind::Break => {
                let end = self.loop_ends.last().copied().ok_or_else(|| {
                    CompileError::new("[CG] break statement outside a loop context")
                })?;
                self.asm.jmp(end);
                Ok(())
            }
            StmtKind::Return { value, func } => self.gen_stmt_return(value.as_ref(), *func),
            StmtKind::Block(stmts) => {
                for stmt in stmts {
                    self.gen_stmt(stmt)?;
                }
                Ok(())
            }
        }
    }

    fn gen_stmt_if(&mut self, cond: &Expr, then: &Stmt, els: Option<&Stmt>) -> CompileResult<()> {
        let false_label = self.asm.new_label();
        let end_label = self.asm.new_label();

        let comp = self.gen_expr(cond)?;
        self.asm.jmp_ne(comp, 1, false_label)?;
        self.gen_stmt(then)?;
        self.asm.jmp(end_label);
        self.asm.emit_label(false_label);
        if let Some(els) = els {
            self.gen_stmt(els)?;
            self.asm.jmp(end_label);
        }
        self.asm.emit_label(end_label);
        Ok(())
    }

    fn gen_stmt_while(&mut self, cond: &Expr, body: &Stmt) -> CompileResult<()> {
        let start_label = self.asm.new_label();
        let end_label = self.asm.new_label();

        self.loop_ends.push(end_label);
        self.asm.emit_label(start_label);
        let comp = self.gen_expr(cond)?;
        self.asm.jmp_ne(comp, 1, end_label)?;
        self.gen_stmt(body)?;
        self.asm.jmp(start_label);
        self.asm.emit_label(end_label);
        self.loop_ends.pop();
        Ok(())
    }

    fn gen_stmt_do_while(&mut self, body: &Stmt, cond: &Expr) -> CompileResult<()> {
        let start_label = self.asm.new_label();
        let end_label = self.asm.new_label();

        self.loop_ends.push(end_label);
        self.asm.emit_label(start_label);
        self.gen_stmt(body)?;
        let comp = self.gen_expr(cond)?;
        self.asm.jmp_eq(comp, 1, start_label)?;
        self.asm.emit_label(end_label);
        self.loop_ends.pop();
        Ok(())
    }

    fn gen_stmt_for(
        &mut self,
        init: &Stmt,
        cond: &Expr,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> CompileResult<()> {
        let start_label = self.asm.new_label();
        let end_label = self.asm.new_label();

        self.loop_ends.push(end_label);
        self.gen_stmt(init)?;
        self.asm.emit_label(start_label);
        let comp = self.gen_expr(cond)?;
        self.asm.jmp_ne(comp, 1, end_label)?;
        self.gen_stmt(body)?;
        if let Some(update) = update {
            match &update.kind {
                ExprKind::Assign { .. } => {
                    self.gen_assign(update, false)?;
                }
                ExprKind::Call { .. } => {
                    self.gen_call(update, false)?;
                }
                _ => {
                    let reg = self.gen_expr(update)?;
                    self.asm.free_register(reg)?;
                }
            }
        }
        self.asm.jmp(start_label);
        self.asm.emit_label(end_label);
        self.loop_ends.pop();
        Ok(())
    }

    fn gen_stmt_return(&mut self, value: Option<&Expr>, func: usize) -> CompileResult<()> {
        if let Some(value) = value {
            let reg = self.gen_expr(value)?;
            let width = self.symtab.get(func).ty().width();
            self.asm.func_return(reg, RegSize::from_width(width)?)?;
        }
        self.return_emitted = true;
        Ok(())
    }

    // ============================================================
    //                        Expressions
    // ============================================================

    fn gen_expr(&mut self, expr: &Expr) -> CompileResult<Reg> {
        match &expr.kind {
            ExprKind::IntLit(value) => self.asm.init_imm(*value),
            ExprKind::StrLit(bytes) => {
                let name = self.asm.string_literal(bytes.clone());
                self.asm.address_of(&name)
            }
            ExprKind::Var(symbol) => self.asm.get_global(self.symtab.get(*symbol).name()),
            ExprKind::AddressOf(symbol) => {
                self.asm.address_of(self.symtab.get(*symbol).name())
            }
            ExprKind::Deref(inner) => {
                let addr = self.gen_expr(inner)?;
                self.asm
                    .load_mem(addr, RegSize::from_width(expr.ty.width())?)
            }
            ExprKind::Scale { expr: inner, factor } => {
                let reg = self.gen_expr(inner)?;
                let offset = self.asm.init_imm(*factor as i64)?;
                self.asm.mul(reg, offset)
            }
            ExprKind::Index { elem_width, .. } => {
                let addr = self.gen_index_address(expr)?;
                self.asm.load_mem(addr, RegSize::from_width(*elem_width)?)
            }
            ExprKind::Call { .. } => {
                let reg = self.gen_call(expr, true)?;
                reg.ok_or_else(|| CompileError::new("[CG] call produced no value"))
            }
            ExprKind::Assign { .. } => {
                let reg = self.gen_assign(expr, true)?;
                reg.ok_or_else(|| CompileError::new("[CG] assignment produced no value"))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let left = self.gen_expr(lhs)?;
                let right = self.gen_expr(rhs)?;
                match op {
                    BinaryOp::Add => self.asm.add(left, right),
                    BinaryOp::Sub => self.asm.sub(left, right),
                    BinaryOp::Mul => self.asm.mul(left, right),
                    BinaryOp::Div => self.asm.div(left, right),
                    BinaryOp::Eq => self.asm.comp_eq(left, right),
                    BinaryOp::Ne => self.asm.comp_ne(left, right),
                    BinaryOp::Gt => self.asm.comp_gt(left, right),
                    BinaryOp::Ge => self.asm.comp_ge(left, right),
                    BinaryOp::Lt => self.asm.comp_lt(left, right),
                    BinaryOp::Le => self.asm.comp_le(left, right),
                }
            }
        }
    }

    /// Computes the address of an indexed element: scale the index by the
    /// element size, then add the array base.
    fn gen_index_address(&mut self, expr: &Expr) -> CompileResult<Reg> {
        let ExprKind::Index {
            symbol,
            index,
            elem_width,
        } = &expr.kind
        else {
            return Err(CompileError::new("[CG] expected an array index node"));
        };
        let idx = self.gen_expr(index)?;
        self.asm.sll(idx, (elem_width / 8).trailing_zeros());
        let base = self.asm.address_of(self.symtab.get(*symbol).name())?;
        self.asm.add(base, idx)
    }

    /// Generates an assignment. Returns the value register when the
    /// assignment is used as an expression.
    fn gen_assign(&mut self, expr: &Expr, want_value: bool) -> CompileResult<Option<Reg>> {
        let ExprKind::Assign { target, value } = &expr.kind else {
            return Err(CompileError::new("[CG] expected an assignment node"));
        };

        let val = self.gen_expr(value)?;
        match &target.kind {
            ExprKind::Var(symbol) => {
                self.asm
                    .set_global(self.symtab.get(*symbol).name(), val, !want_value)?;
            }
            ExprKind::Deref(inner) => {
                let addr = self.gen_expr(inner)?;
                let size = RegSize::from_width(target.ty.width())?;
                self.asm.store_mem(addr, val, size, !want_value)?;
            }
            ExprKind::Index { elem_width, .. } => {
                let addr = self.gen_index_address(target)?;
                let size = RegSize::from_width(*elem_width)?;
                self.asm.store_mem(addr, val, size, !want_value)?;
            }
            _ => {
                return Err(CompileError::new("[CG] unsupported lvalue in assignment"));
            }
        }
        Ok(want_value.then_some(val))
    }

    fn gen_call(&mut self, expr: &Expr, need_return: bool) -> CompileResult<Option<Reg>> {
        let ExprKind::Call { symbol, args } = &expr.kind else {
            return Err(CompileError::new("[CG] expected a function call node"));
        };
        if args.len() > 1 {
            return Err(CompileError::new(format!(
                "[CG] function '{}' called with more than one argument",
                self.symtab.get(*symbol).name()
            )));
        }
        let arg = match args.first() {
            Some(arg) => Some(self.gen_expr(arg)?),
            None => None,
        };
        self.asm
            .func_call(self.symtab.get(*symbol).name(), arg, need_return)
    }
}
