//! Abstract syntax tree.
//!
//! Every expression node carries the type the parser computed for it, so code
//! generation never re-derives types. Symbols are referred to by their index
//! in the global symbol table.

use crate::error::SourceLocation;
use crate::symtab::SymbolTable;
use crate::types::Type;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Func(FuncDecl),
    Var(VarDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub symbol: usize,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub symbol: usize,
    pub init: Option<Expr>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Empty,
    VarDecl(Vec<VarDecl>),
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Box<Stmt>,
        cond: Expr,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Return {
        value: Option<Expr>,
        /// Symbol index of the enclosing function.
        func: usize,
    },
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLit(i64),
    /// Decoded bytes including the terminating NUL.
    StrLit(Vec<u8>),
    Var(usize),
    AddressOf(usize),
    /// One node per `*`; each peels one pointer level.
    Deref(Box<Expr>),
    /// Pointer-arithmetic operand scaled by the pointee size in bytes.
    Scale {
        expr: Box<Expr>,
        factor: u32,
    },
    Index {
        symbol: usize,
        index: Box<Expr>,
        /// Element width in bits; indexing shifts by its byte log2.
        elem_width: u32,
    },
    Call {
        symbol: usize,
        args: Vec<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Sub => "SUB",
            BinaryOp::Mul => "MUL",
            BinaryOp::Div => "DIV",
            BinaryOp::Eq => "CMP_EQ",
            BinaryOp::Ne => "CMP_NE",
            BinaryOp::Gt => "CMP_GT",
            BinaryOp::Ge => "CMP_GE",
            BinaryOp::Lt => "CMP_LT",
            BinaryOp::Le => "CMP_LE",
        }
    }
}

/// Renders the declaration list as an indented tree, for `TOYC_DEBUG` runs.
pub fn dump(program: &Program, symtab: &SymbolTable) -> String {
    let mut out = String::new();
    for decl in &program.decls {
        match decl {
            Decl::Func(func) => {
                let _ = writeln!(out, "FUNC_DECL {}", symtab.get(func.symbol).name());
                for stmt in &func.body {
                    dump_stmt(&mut out, stmt, symtab, 1);
                }
            }
            Decl::Var(var) => dump_var_decl(&mut out, var, symtab, 0),
        }
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("   ");
    }
    out.push_str("|-- ");
}

fn dump_var_decl(out: &mut String, var: &VarDecl, symtab: &SymbolTable, depth: usize) {
    indent(out, depth);
    let symbol = symtab.get(var.symbol);
    let _ = writeln!(out, "VAR_DECL {}: {}", symbol.name(), symbol.ty());
    if let Some(init) = &var.init {
        dump_expr(out, init, symtab, depth + 1);
    }
}

fn dump_stmt(out: &mut String, stmt: &Stmt, symtab: &SymbolTable, depth: usize) {
    match &stmt.kind {
        StmtKind::Empty => {
            indent(out, depth);
            out.push_str("EMPTY\n");
        }
        StmtKind::VarDecl(vars) => {
            for var in vars {
                dump_var_decl(out, var, symtab, depth);
            }
        }
        StmtKind::Expr(expr) => dump_expr(out, expr, symtab, depth),
        StmtKind::If { cond, then, els } => {
            indent(out, depth);
            out.push_str("IF\n");
            dump_expr(out, cond, symtab, depth + 1);
            dump_stmt(out, then, symtab, depth + 1);
            if let Some(els) = els {
                dump_stmt(out, els, symtab, depth + 1);
            }
        }
        StmtKind::While { cond, body } => {
            indent(out, depth);
            out.push_str("WHILE\n");
            dump_expr(out, cond, symtab, depth + 1);
            dump_stmt(out, body, symtab, depth + 1);
        }
        StmtKind::DoWhile { body, cond } => {
            indent(out, depth);
            out.push_str("DO_WHILE\n");
            dump_stmt(out, body, symtab, depth + 1);
            dump_expr(out, cond, symtab, depth + 1);
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            indent(out, depth);
            out.push_str("FOR\n");
            dump_stmt(out, init, symtab, depth + 1);
            dump_expr(out, cond, symtab, depth + 1);
            if let Some(update) = update {
                dump_expr(out, update, symtab, depth + 1);
            }
            dump_stmt(out, body, symtab, depth + 1);
        }
        StmtKind::Break => {
            indent(out, depth);
            out.push_str("BREAK\n");
        }
        StmtKind::Return { value, .. } => {
            indent(out, depth);
            out.push_str("RETURN\n");
            if let Some(value) = value {
                dump_expr(out, value, symtab, depth + 1);
            }
        }
        StmtKind::Block(stmts) => {
            for stmt in stmts {
                dump_stmt(out, stmt, symtab, depth);
            }
        }
    }
}

fn dump_expr(out: &mut String, expr: &Expr, symtab: &SymbolTable, depth: usize) {
    indent(out, depth);
    match &expr.kind {
        ExprKind::IntLit(value) => {
            let _ = writeln!(out, "INT_LIT: {value}");
        }
        ExprKind::StrLit(bytes) => {
            let _ = writeln!(out, "STR_LIT: {} bytes", bytes.len());
        }
        ExprKind::Var(symbol) => {
            let _ = writeln!(out, "VAR {}", symtab.get(*symbol).name());
        }
        ExprKind::AddressOf(symbol) => {
            let _ = writeln!(out, "ADDRESSOF {}", symtab.get(*symbol).name());
        }
        ExprKind::Deref(inner) => {
            out.push_str("PTRDREF\n");
            dump_expr(out, inner, symtab, depth + 1);
        }
        ExprKind::Scale { expr: inner, factor } => {
            let _ = writeln!(out, "OFFSET_SCALE: {factor}");
            dump_expr(out, inner, symtab, depth + 1);
        }
        ExprKind::Index { symbol, index, .. } => {
            let _ = writeln!(out, "ARRAY_INDEX {}", symtab.get(*symbol).name());
            dump_expr(out, index, symtab, depth + 1);
        }
        ExprKind::Call { symbol, args } => {
            let _ = writeln!(out, "FUNC_CALL {}", symtab.get(*symbol).name());
            for arg in args {
                dump_expr(out, arg, symtab, depth + 1);
            }
        }
        ExprKind::Assign { target, value } => {
            out.push_str("ASSIGN\n");
            dump_expr(out, target, symtab, depth + 1);
            dump_expr(out, value, symtab, depth + 1);
        }
        ExprKind::Binary { op, lhs, rhs } => {
            let _ = writeln!(out, "{}", op.name());
            dump_expr(out, lhs, symtab, depth + 1);
            dump_expr(out, rhs, symtab, depth + 1);
        }
    }
}
