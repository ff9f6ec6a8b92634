//! Recursive-descent parser with embedded semantic analysis.
//!
//! Parsing and type checking happen in one pass: every expression node leaves
//! here with its type computed, symbols resolved to table indices, and pointer
//! arithmetic already rewritten into scaled offsets. Two ambiguities need
//! lookahead beyond one token: function vs. variable at the top level (decided
//! by the token after the identifier) and assignment vs. plain expression at
//! statement level (decided by scanning for `=` before a terminator).

use crate::ast::{BinaryOp, Decl, Expr, ExprKind, FuncDecl, Program, Stmt, StmtKind, VarDecl};
use crate::error::{CompileError, CompileResult, SourceLocation};
use crate::lexer::{Keyword, Lexer, Punct, Token, TokenKind};
use crate::symtab::{Formal, Symbol, SymbolTable};
use crate::types::{self, Type};

pub fn parse(lexer: &mut Lexer) -> CompileResult<(Program, SymbolTable)> {
    let mut parser = Parser::new(lexer);
    let program = parser.parse_program()?;
    Ok((program, parser.symtab))
}

struct Parser<'a> {
    lexer: &'a mut Lexer,
    symtab: SymbolTable,
    current_func: Option<usize>,
    loop_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(lexer: &'a mut Lexer) -> Self {
        Self {
            lexer,
            symtab: SymbolTable::with_runtime(),
            current_func: None,
            loop_depth: 0,
        }
    }

    // ============================================================
    //                       Declarations
    // ============================================================

    fn parse_program(&mut self) -> CompileResult<Program> {
        let mut decls = Vec::new();
        loop {
            if self.lexer.peek()?.kind == TokenKind::Eof {
                break;
            }
            // Look past the type specifier and identifier; a '(' there means
            // a function declaration, anything else a variable.
            let mut n = 1;
            while self.lexer.peek_at(n)?.kind == TokenKind::Punct(Punct::Star) {
                n += 1;
            }
            let after_ident = self.lexer.peek_at(n + 1)?;
            if after_ident.kind == TokenKind::Punct(Punct::LParen) {
                decls.push(Decl::Func(self.parse_function()?));
            } else {
                for var in self.parse_var_decl()? {
                    decls.push(Decl::Var(var));
                }
            }
        }
        Ok(Program { decls })
    }

    fn parse_type(&mut self) -> CompileResult<Type> {
        let tok = self.lexer.scan()?;
        let mut ty = match tok.kind {
            TokenKind::Keyword(Keyword::Void) => types::VOID,
            TokenKind::Keyword(Keyword::Char) => types::CHAR,
            TokenKind::Keyword(Keyword::Int) => types::INT,
            TokenKind::Keyword(Keyword::Long) => types::LONG,
            _ => {
                return Err(CompileError::at(
                    format!(
                        "[DECL] expected a type specifier, found {}",
                        tok.describe()
                    ),
                    tok.location,
                ));
            }
        };
        while self.consume_punct(Punct::Star)? {
            ty = ty.pointer_to();
        }
        Ok(ty)
    }

    fn parse_function(&mut self) -> CompileResult<FuncDecl> {
        let return_type = self.parse_type()?;
        let (name, name_loc) = self.expect_ident("[DECL]")?;
        self.expect_punct(Punct::LParen, "[DECL]")?;

        let mut formals = Vec::new();
        if self.lexer.peek()?.kind != TokenKind::Punct(Punct::RParen) {
            loop {
                let ty = self.parse_type()?;
                let (arg_name, arg_loc) = self.expect_ident("[DECL]")?;
                if ty.is_void() {
                    return Err(CompileError::at(
                        format!("[DECL] argument '{arg_name}' can't have type void"),
                        arg_loc,
                    ));
                }
                formals.push(Formal { name: arg_name, ty });
                if !self.consume_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "[DECL]")?;

        let symbol = self
            .symtab
            .add(Symbol::Func {
                name,
                return_type,
                formals: formals.clone(),
            })
            .map_err(|err| locate(err, name_loc))?;
        for formal in &formals {
            self.symtab
                .add(Symbol::Var {
                    name: formal.name.clone(),
                    ty: formal.ty,
                })
                .map_err(|err| locate(err, name_loc))?;
        }

        self.current_func = Some(symbol);
        self.loop_depth = 0;
        let body_stmt = self.parse_block()?;
        self.current_func = None;

        let body = match body_stmt.kind {
            StmtKind::Block(stmts) => stmts,
            kind => vec![Stmt {
                kind,
                location: body_stmt.location,
            }],
        };
        Ok(FuncDecl { symbol, body })
    }

    fn parse_var_decl(&mut self) -> CompileResult<Vec<VarDecl>> {
        let base_ty = self.parse_type()?;
        let mut decls = Vec::new();
        loop {
            let (name, loc) = self.expect_ident("[DECL]")?;
            if base_ty.is_void() {
                return Err(CompileError::at(
                    format!("[DECL] variable '{name}' can't have type void"),
                    loc,
                ));
            }
            let symbol = self
                .symtab
                .add(Symbol::Var { name, ty: base_ty })
                .map_err(|err| locate(err, loc))?;

            let mut init = None;
            match self.lexer.peek()?.kind {
                TokenKind::Punct(Punct::LBracket) => {
                    self.lexer.scan()?;
                    let len_tok = self.lexer.scan()?;
                    let len = match len_tok.kind {
                        TokenKind::IntLit(value) if value > 0 => value as usize,
                        TokenKind::IntLit(_) => {
                            return Err(CompileError::at(
                                "[DECL] array size must be a positive integer",
                                len_tok.location,
                            ));
                        }
                        _ => {
                            return Err(CompileError::at(
                                format!(
                                    "[DECL] expected an array size, found {}",
                                    len_tok.describe()
                                ),
                                len_tok.location,
                            ));
                        }
                    };
                    self.expect_punct(Punct::RBracket, "[DECL]")?;
                    self.symtab.set_var_type(symbol, Type::array_of(base_ty, len));
                }
                TokenKind::Punct(Punct::Assign) => {
                    self.lexer.scan()?;
                    let value = self.parse_expression()?;
                    types::check_assign(base_ty, value.ty).map_err(|err| locate(err, loc))?;
                    init = Some(value);
                }
                _ => {}
            }

            decls.push(VarDecl {
                symbol,
                init,
                location: loc,
            });
            if !self.consume_punct(Punct::Comma)? {
                break;
            }
        }
        self.expect_punct(Punct::Semicolon, "[DECL]")?;
        Ok(decls)
    }

    // ============================================================
    //                        Statements
    // ============================================================

    fn parse_block(&mut self) -> CompileResult<Stmt> {
        let tok = self.lexer.peek()?;
        if tok.kind != TokenKind::Punct(Punct::LBrace) {
            return self.parse_statement();
        }
        self.lexer.scan()?;
        let mut stmts = Vec::new();
        loop {
            match self.lexer.peek()?.kind {
                TokenKind::Punct(Punct::RBrace) => {
                    self.lexer.scan()?;
                    break;
                }
                TokenKind::Eof => {
                    return Err(CompileError::at(
                        "[STMT] expected '}' before end of file",
                        tok.location,
                    ));
                }
                _ => stmts.push(self.parse_statement()?),
            }
        }
        Ok(Stmt {
            kind: StmtKind::Block(stmts),
            location: tok.location,
        })
    }

    fn parse_statement(&mut self) -> CompileResult<Stmt> {
        let tok = self.lexer.peek()?;
        match tok.kind {
            TokenKind::Punct(Punct::Semicolon) => {
                self.lexer.scan()?;
                Ok(Stmt {
                    kind: StmtKind::Empty,
                    location: tok.location,
                })
            }
            TokenKind::Punct(Punct::Star) | TokenKind::Ident(_) => {
                let expr = self.parse_expression()?;
                self.expect_punct(Punct::Semicolon, "[STMT]")?;
                Ok(Stmt {
                    kind: StmtKind::Expr(expr),
                    location: tok.location,
                })
            }
            TokenKind::Keyword(Keyword::If) => self.parse_if(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::Do) => self.parse_do_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Break) => {
                self.lexer.scan()?;
                self.expect_punct(Punct::Semicolon, "[STMT]")?;
                if self.loop_depth == 0 {
                    return Err(CompileError::at(
                        "[STMT] break statement outside a loop",
                        tok.location,
                    ));
                }
                Ok(Stmt {
                    kind: StmtKind::Break,
                    location: tok.location,
                })
            }
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            _ => Ok(Stmt {
                kind: StmtKind::VarDecl(self.parse_var_decl()?),
                location: tok.location,
            }),
        }
    }

    fn parse_if(&mut self) -> CompileResult<Stmt> {
        let tok = self.expect_keyword(Keyword::If, "[STMT]")?;
        self.expect_punct(Punct::LParen, "[STMT]")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "[STMT]")?;
        let then = Box::new(self.parse_block()?);

        let els = if self.consume_keyword(Keyword::Else)? {
            if self.lexer.peek()?.kind == TokenKind::Keyword(Keyword::If) {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(self.parse_block()?))
            }
        } else {
            None
        };

        Ok(Stmt {
            kind: StmtKind::If { cond, then, els },
            location: tok.location,
        })
    }

    fn parse_while(&mut self) -> CompileResult<Stmt> {
        let tok = self.expect_keyword(Keyword::While, "[STMT]")?;
        self.expect_punct(Punct::LParen, "[STMT]")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "[STMT]")?;
        self.loop_depth += 1;
        let body = Box::new(self.parse_block()?);
        self.loop_depth -= 1;
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            location: tok.location,
        })
    }

    fn parse_do_while(&mut self) -> CompileResult<Stmt> {
        let tok = self.expect_keyword(Keyword::Do, "[STMT]")?;
        self.loop_depth += 1;
        let body = Box::new(self.parse_block()?);
        self.loop_depth -= 1;
        self.expect_keyword(Keyword::While, "[STMT]")?;
        self.expect_punct(Punct::LParen, "[STMT]")?;
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::RParen, "[STMT]")?;
        self.expect_punct(Punct::Semicolon, "[STMT]")?;
        Ok(Stmt {
            kind: StmtKind::DoWhile { body, cond },
            location: tok.location,
        })
    }

    fn parse_for(&mut self) -> CompileResult<Stmt> {
        let tok = self.expect_keyword(Keyword::For, "[STMT]")?;
        self.expect_punct(Punct::LParen, "[STMT]")?;
        let init = Box::new(self.parse_statement()?);
        let cond = self.parse_expression()?;
        self.expect_punct(Punct::Semicolon, "[STMT]")?;
        let update = if self.lexer.peek()?.kind == TokenKind::Punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(Punct::RParen, "[STMT]")?;
        self.loop_depth += 1;
        let body = Box::new(self.parse_block()?);
        self.loop_depth -= 1;
        Ok(Stmt {
            kind: StmtKind::For {
                init,
                cond,
                update,
                body,
            },
            location: tok.location,
        })
    }

    fn parse_return(&mut self) -> CompileResult<Stmt> {
        let tok = self.expect_keyword(Keyword::Return, "[STMT]")?;
        let func = self.current_func.ok_or_else(|| {
            CompileError::at("[STMT] return statement outside a function", tok.location)
        })?;
        let return_type = self.symtab.get(func).ty();

        if self.consume_punct(Punct::Semicolon)? {
            if !return_type.is_void() {
                return Err(CompileError::at(
                    format!(
                        "[STMT] function '{}' must return a value",
                        self.symtab.get(func).name()
                    ),
                    tok.location,
                ));
            }
            return Ok(Stmt {
                kind: StmtKind::Return { value: None, func },
                location: tok.location,
            });
        }

        let value = self.parse_expression()?;
        types::check_assign(return_type, value.ty).map_err(|err| locate(err, tok.location))?;
        self.expect_punct(Punct::Semicolon, "[STMT]")?;
        Ok(Stmt {
            kind: StmtKind::Return {
                value: Some(value),
                func,
            },
            location: tok.location,
        })
    }

    // ============================================================
    //                        Expressions
    // ============================================================

    fn parse_expression(&mut self) -> CompileResult<Expr> {
        if self.assignment_ahead()? {
            self.parse_assignment()
        } else {
            self.parse_comparison()
        }
    }

    /// Scans the lookahead buffer for a `=` before the next expression
    /// terminator.
    fn assignment_ahead(&mut self) -> CompileResult<bool> {
        let mut n = 0;
        loop {
            match self.lexer.peek_at(n)?.kind {
                TokenKind::Punct(Punct::Assign) => return Ok(true),
                TokenKind::Punct(Punct::Semicolon | Punct::Comma | Punct::RParen)
                | TokenKind::Eof => return Ok(false),
                _ => n += 1,
            }
        }
    }

    fn parse_assignment(&mut self) -> CompileResult<Expr> {
        let target = self.parse_lvalue()?;
        let loc = target.location;
        self.expect_punct(Punct::Assign, "[EXPR]")?;
        let value = self.parse_expression()?;
        types::check_assign(target.ty, value.ty).map_err(|err| locate(err, loc))?;
        Ok(Expr {
            ty: target.ty,
            location: loc,
            kind: ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
        })
    }

    fn parse_lvalue(&mut self) -> CompileResult<Expr> {
        let tok = self.lexer.peek()?;
        match tok.kind {
            TokenKind::Punct(Punct::Star) => self.parse_deref_chain(),
            TokenKind::Ident(_) => {
                let (name, loc) = self.expect_ident("[EXPR]")?;
                let symbol = self.lookup(&name, loc)?;
                if self.symtab.get(symbol).is_function() {
                    return Err(CompileError::at(
                        format!("[EXPR] function '{name}' can't be assigned to"),
                        loc,
                    ));
                }
                let ty = self.symtab.get(symbol).ty();
                if self.consume_punct(Punct::LBracket)? {
                    let index = self.parse_expression()?;
                    self.expect_punct(Punct::RBracket, "[EXPR]")?;
                    let elem = ty.element().map_err(|err| locate(err, loc))?;
                    Ok(Expr {
                        kind: ExprKind::Index {
                            symbol,
                            index: Box::new(index),
                            elem_width: elem.width(),
                        },
                        ty: elem,
                        location: loc,
                    })
                } else {
                    if ty.is_array() {
                        return Err(CompileError::at(
                            format!("[EXPR] can't assign to array '{name}'"),
                            loc,
                        ));
                    }
                    Ok(Expr {
                        kind: ExprKind::Var(symbol),
                        ty,
                        location: loc,
                    })
                }
            }
            _ => Err(CompileError::at(
                format!("[EXPR] expected an lvalue, found {}", tok.describe()),
                tok.location,
            )),
        }
    }

    fn parse_comparison(&mut self) -> CompileResult<Expr> {
        let lhs = self.parse_additive()?;
        let tok = self.lexer.peek()?;
        let op = match tok.kind {
            TokenKind::Punct(Punct::EqEq) => BinaryOp::Eq,
            TokenKind::Punct(Punct::NotEq) => BinaryOp::Ne,
            TokenKind::Punct(Punct::Greater) => BinaryOp::Gt,
            TokenKind::Punct(Punct::GreaterEq) => BinaryOp::Ge,
            TokenKind::Punct(Punct::Less) => BinaryOp::Lt,
            TokenKind::Punct(Punct::LessEq) => BinaryOp::Le,
            _ => return Ok(lhs),
        };
        self.lexer.scan()?;
        let rhs = self.parse_additive()?;
        types::unify_expr(lhs.ty, rhs.ty).map_err(|err| locate(err, tok.location))?;
        Ok(Expr {
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty: types::CHAR,
            location: tok.location,
        })
    }

    fn parse_additive(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let tok = self.lexer.peek()?;
            let op = match tok.kind {
                TokenKind::Punct(Punct::Plus) => BinaryOp::Add,
                TokenKind::Punct(Punct::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.lexer.scan()?;
            let mut rhs = self.parse_multiplicative()?;

            // Mixed pointer/integer operands step by whole elements: the
            // integer side is scaled by the pointee size.
            let ty = if lhs.ty.is_pointer() && !rhs.ty.is_pointer() {
                let factor = lhs.ty.element_width_bytes().map_err(|e| locate(e, tok.location))?;
                rhs = scale(rhs, factor);
                lhs.ty
            } else if rhs.ty.is_pointer() && !lhs.ty.is_pointer() {
                let factor = rhs.ty.element_width_bytes().map_err(|e| locate(e, tok.location))?;
                lhs = scale(lhs, factor);
                rhs.ty
            } else {
                types::unify_expr(lhs.ty, rhs.ty).map_err(|err| locate(err, tok.location))?
            };

            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                location: tok.location,
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> CompileResult<Expr> {
        let mut lhs = self.parse_val()?;
        loop {
            let tok = self.lexer.peek()?;
            let op = match tok.kind {
                TokenKind::Punct(Punct::Star) => BinaryOp::Mul,
                TokenKind::Punct(Punct::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.lexer.scan()?;
            let rhs = self.parse_val()?;
            if lhs.ty.is_pointer() || rhs.ty.is_pointer() {
                return Err(CompileError::at(
                    "[EXPR] pointers are not valid multiplicative operands",
                    tok.location,
                ));
            }
            let ty = types::unify_expr(lhs.ty, rhs.ty).map_err(|err| locate(err, tok.location))?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                ty,
                location: tok.location,
            };
        }
        Ok(lhs)
    }

    fn parse_val(&mut self) -> CompileResult<Expr> {
        let tok = self.lexer.peek()?;
        match tok.kind {
            TokenKind::IntLit(value) => {
                self.lexer.scan()?;
                let ty = if (0..256).contains(&value) {
                    types::CHAR
                } else {
                    types::INT
                };
                Ok(Expr {
                    kind: ExprKind::IntLit(value),
                    ty,
                    location: tok.location,
                })
            }
            TokenKind::StrLit(bytes) => {
                self.lexer.scan()?;
                Ok(Expr {
                    kind: ExprKind::StrLit(bytes),
                    ty: types::CHAR.pointer_to(),
                    location: tok.location,
                })
            }
            TokenKind::Punct(Punct::LParen) => {
                self.lexer.scan()?;
                let expr = self.parse_expression()?;
                self.expect_punct(Punct::RParen, "[EXPR]")?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::Amp) => {
                self.lexer.scan()?;
                let (name, loc) = self.expect_ident("[EXPR]")?;
                let symbol = self.lookup(&name, loc)?;
                if self.symtab.get(symbol).is_function() {
                    return Err(CompileError::at(
                        format!("[EXPR] can't take the address of function '{name}'"),
                        loc,
                    ));
                }
                Ok(Expr {
                    ty: self.symtab.get(symbol).ty().pointer_to(),
                    kind: ExprKind::AddressOf(symbol),
                    location: loc,
                })
            }
            TokenKind::Punct(Punct::Star) => self.parse_deref_chain(),
            TokenKind::Ident(_) => self.parse_val_ident(),
            _ => Err(CompileError::at(
                format!("[EXPR] expected a value, found {}", tok.describe()),
                tok.location,
            )),
        }
    }

    fn parse_deref_chain(&mut self) -> CompileResult<Expr> {
        let star = self.expect_punct(Punct::Star, "[EXPR]")?;
        let mut count = 1;
        while self.consume_punct(Punct::Star)? {
            count += 1;
        }
        let mut expr = self.parse_val()?;
        for _ in 0..count {
            let ty = expr.ty.deref(1).map_err(|err| locate(err, star.location))?;
            expr = Expr {
                kind: ExprKind::Deref(Box::new(expr)),
                ty,
                location: star.location,
            };
        }
        Ok(expr)
    }

    fn parse_val_ident(&mut self) -> CompileResult<Expr> {
        let (name, loc) = self.expect_ident("[EXPR]")?;
        let symbol = self.lookup(&name, loc)?;
        match self.lexer.peek()?.kind {
            TokenKind::Punct(Punct::LParen) => self.parse_call(symbol, loc),
            TokenKind::Punct(Punct::LBracket) => {
                self.lexer.scan()?;
                let index = self.parse_expression()?;
                self.expect_punct(Punct::RBracket, "[EXPR]")?;
                let ty = self.symtab.get(symbol).ty();
                let elem = ty.element().map_err(|err| locate(err, loc))?;
                Ok(Expr {
                    kind: ExprKind::Index {
                        symbol,
                        index: Box::new(index),
                        elem_width: elem.width(),
                    },
                    ty: elem,
                    location: loc,
                })
            }
            _ => {
                let sym = self.symtab.get(symbol);
                if sym.is_function() {
                    return Err(CompileError::at(
                        format!("[EXPR] function '{name}' used as a variable"),
                        loc,
                    ));
                }
                let ty = sym.ty();
                if ty.is_array() {
                    // An array in value position decays to a pointer to its
                    // first element.
                    return Ok(Expr {
                        kind: ExprKind::AddressOf(symbol),
                        ty: Type {
                            primitive: ty.primitive,
                            pointer_level: ty.pointer_level,
                            array_len: 0,
                        },
                        location: loc,
                    });
                }
                Ok(Expr {
                    kind: ExprKind::Var(symbol),
                    ty,
                    location: loc,
                })
            }
        }
    }

    fn parse_call(&mut self, symbol: usize, loc: SourceLocation) -> CompileResult<Expr> {
        let (return_type, formals) = match self.symtab.get(symbol) {
            Symbol::Func {
                return_type,
                formals,
                ..
            } => (*return_type, formals.clone()),
            Symbol::Var { name, .. } => {
                return Err(CompileError::at(
                    format!("[EXPR] '{name}' is not a function"),
                    loc,
                ));
            }
        };

        self.expect_punct(Punct::LParen, "[EXPR]")?;
        let mut args = Vec::new();
        if self.lexer.peek()?.kind != TokenKind::Punct(Punct::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.consume_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "[EXPR]")?;

        if args.len() != formals.len() {
            return Err(CompileError::at(
                format!(
                    "[EXPR] function '{}' expects {} argument(s), found {}",
                    self.symtab.get(symbol).name(),
                    formals.len(),
                    args.len()
                ),
                loc,
            ));
        }
        for (arg, formal) in args.iter().zip(&formals) {
            types::check_assign(formal.ty, arg.ty).map_err(|err| locate(err, arg.location))?;
        }

        Ok(Expr {
            kind: ExprKind::Call { symbol, args },
            ty: return_type,
            location: loc,
        })
    }

    // ============================================================
    //                      Token helpers
    // ============================================================

    fn lookup(&self, name: &str, loc: SourceLocation) -> CompileResult<usize> {
        self.symtab
            .find(name)
            .ok_or_else(|| CompileError::at(format!("[EXPR] '{name}' is not defined"), loc))
    }

    fn expect_punct(&mut self, punct: Punct, tag: &str) -> CompileResult<Token> {
        let tok = self.lexer.scan()?;
        if tok.kind == TokenKind::Punct(punct) {
            Ok(tok)
        } else {
            Err(CompileError::at(
                format!("{tag} expected '{punct}', found {}", tok.describe()),
                tok.location,
            ))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, tag: &str) -> CompileResult<Token> {
        let tok = self.lexer.scan()?;
        if tok.kind == TokenKind::Keyword(keyword) {
            Ok(tok)
        } else {
            Err(CompileError::at(
                format!("{tag} expected '{keyword}', found {}", tok.describe()),
                tok.location,
            ))
        }
    }

    fn expect_ident(&mut self, tag: &str) -> CompileResult<(String, SourceLocation)> {
        let tok = self.lexer.scan()?;
        match tok.kind {
            TokenKind::Ident(name) => Ok((name, tok.location)),
            _ => Err(CompileError::at(
                format!("{tag} expected an identifier, found {}", tok.describe()),
                tok.location,
            )),
        }
    }

    fn consume_punct(&mut self, punct: Punct) -> CompileResult<bool> {
        if self.lexer.peek()?.kind == TokenKind::Punct(punct) {
            self.lexer.scan()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> CompileResult<bool> {
        if self.lexer.peek()?.kind == TokenKind::Keyword(keyword) {
            self.lexer.scan()?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Wraps a pointer-arithmetic operand so code generation multiplies it by
/// the element size.
fn scale(expr: Expr, factor: u32) -> Expr {
    let ty = expr.ty;
    let location = expr.location;
    Expr {
        kind: ExprKind::Scale {
            expr: Box::new(expr),
            factor,
        },
        ty,
        location,
    }
}

/// Attaches a location to an error raised by a location-unaware layer.
fn locate(err: CompileError, loc: SourceLocation) -> CompileError {
    if err.location().is_none() {
        CompileError::at(err.message().to_string(), loc)
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types;

    fn parse_source(source: &str) -> CompileResult<(Program, SymbolTable)> {
        let mut lexer = Lexer::new(source);
        parse(&mut lexer)
    }

    fn first_func(program: &Program) -> &FuncDecl {
        for decl in &program.decls {
            if let Decl::Func(func) = decl {
                return func;
            }
        }
        panic!("no function declaration");
    }

    #[test]
    fn parses_a_minimal_function() {
        let (program, symtab) = parse_source("void main() { }").unwrap();
        assert_eq!(program.decls.len(), 1);
        let func = first_func(&program);
        assert_eq!(symtab.get(func.symbol).name(), "main");
        assert!(func.body.is_empty());
    }

    #[test]
    fn distinguishes_functions_from_variables() {
        let (program, symtab) = parse_source("int x; void main() { } long* p;").unwrap();
        assert_eq!(program.decls.len(), 3);
        assert!(matches!(program.decls[0], Decl::Var(_)));
        assert!(matches!(program.decls[1], Decl::Func(_)));
        assert!(matches!(program.decls[2], Decl::Var(_)));
        assert_eq!(symtab.get(symtab.find("p").unwrap()).ty(), types::LONG.pointer_to());
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let (program, _) = parse_source("void main() { int x; x = 2 + 3 * 4; }").unwrap();
        let func = first_func(&program);
        let StmtKind::Expr(assign) = &func.body[1].kind else {
            panic!("expected an expression statement");
        };
        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected an assignment");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn literal_types_split_at_256() {
        let (program, _) =
            parse_source("void main() { int x; x = 255; x = 256; }").unwrap();
        let func = first_func(&program);
        let exprs: Vec<_> = func.body[1..]
            .iter()
            .map(|stmt| match &stmt.kind {
                StmtKind::Expr(expr) => match &expr.kind {
                    ExprKind::Assign { value, .. } => value.ty,
                    _ => panic!("expected assignment"),
                },
                _ => panic!("expected expression statement"),
            })
            .collect();
        assert_eq!(exprs, vec![types::CHAR, types::INT]);
    }

    #[test]
    fn comparison_yields_char() {
        let (program, _) = parse_source("void main() { int x; x = 0; if (x < 3) { } }").unwrap();
        let func = first_func(&program);
        let StmtKind::If { cond, .. } = &func.body[2].kind else {
            panic!("expected if");
        };
        assert_eq!(cond.ty, types::CHAR);
    }

    #[test]
    fn pointer_addition_inserts_a_scale_node() {
        let (program, _) =
            parse_source("void main() { int* p; int x; p = &x; p = p + 2; }").unwrap();
        let func = first_func(&program);
        let StmtKind::Expr(assign) = &func.body[3].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary add");
        };
        assert_eq!(*op, BinaryOp::Add);
        let ExprKind::Scale { factor, .. } = &rhs.kind else {
            panic!("expected a scaled operand, got {:?}", rhs.kind);
        };
        assert_eq!(*factor, 4);
        assert_eq!(value.ty, types::INT.pointer_to());
    }

    #[test]
    fn pointer_to_pointer_scales_by_eight() {
        let (program, _) = parse_source(
            "void main() { int** pp; long q; q = 0; pp = pp + 1; }",
        )
        .unwrap();
        let func = first_func(&program);
        let StmtKind::Expr(assign) = &func.body[3].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { rhs, .. } = &value.kind else {
            panic!("expected binary add");
        };
        assert!(matches!(rhs.kind, ExprKind::Scale { factor: 8, .. }));
    }

    #[test]
    fn deref_chain_peels_pointer_levels() {
        let (program, _) = parse_source(
            "void main() { int** pp; int x; x = 0; x = **pp; }",
        )
        .unwrap();
        let func = first_func(&program);
        let StmtKind::Expr(assign) = &func.body[3].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &assign.kind else {
            panic!("expected assignment");
        };
        assert_eq!(value.ty, types::INT);
        let ExprKind::Deref(inner) = &value.kind else {
            panic!("expected outer deref");
        };
        assert_eq!(inner.ty, types::INT.pointer_to());
        assert!(matches!(inner.kind, ExprKind::Deref(_)));
    }

    #[test]
    fn array_declaration_updates_symbol_type() {
        let (_, symtab) = parse_source("char a[4];").unwrap();
        let ty = symtab.get(symtab.find("a").unwrap()).ty();
        assert_eq!(ty, Type::array_of(types::CHAR, 4));
    }

    #[test]
    fn array_decays_in_value_position() {
        let (program, _) =
            parse_source("char a[4]; void main() { print_str(a); }").unwrap();
        let func = first_func(&program);
        let StmtKind::Expr(call) = &func.body[0].kind else {
            panic!("expected call statement");
        };
        let ExprKind::Call { args, .. } = &call.kind else {
            panic!("expected a call");
        };
        assert!(matches!(args[0].kind, ExprKind::AddressOf(_)));
        assert_eq!(args[0].ty, types::CHAR.pointer_to());
    }

    #[test]
    fn break_outside_a_loop_is_fatal() {
        let err = parse_source("void main() { break; }").unwrap_err();
        assert!(err.message().contains("outside a loop"));
    }

    #[test]
    fn break_inside_a_loop_parses() {
        assert!(parse_source("void main() { while (1) { break; } }").is_ok());
    }

    #[test]
    fn undefined_variable_is_fatal() {
        let err = parse_source("void main() { x = 1; }").unwrap_err();
        assert!(err.message().contains("not defined"));
    }

    #[test]
    fn redefinition_is_fatal() {
        let err = parse_source("int x; int x;").unwrap_err();
        assert!(err.message().contains("redefinition"));
    }

    #[test]
    fn calling_a_variable_is_fatal() {
        let err = parse_source("int x; void main() { x(3); }").unwrap_err();
        assert!(err.message().contains("not a function"));
    }

    #[test]
    fn using_a_function_as_a_variable_is_fatal() {
        let err = parse_source("void f() { } void main() { int x; x = f + 1; }").unwrap_err();
        assert!(err.message().contains("used as a variable"));
    }

    #[test]
    fn arity_mismatch_is_fatal() {
        let err = parse_source("void main() { print(1, 2); }").unwrap_err();
        assert!(err.message().contains("argument"));
    }

    #[test]
    fn narrowing_assignment_is_fatal() {
        let err = parse_source("void main() { char c; int x; x = 0; c = x; }").unwrap_err();
        assert!(err.message().contains("[DATATYPE]"));
    }

    #[test]
    fn void_in_expression_is_fatal() {
        let err = parse_source("void main() { int x; x = print(1) + 2; }").unwrap_err();
        assert!(err.message().contains("void"));
    }

    #[test]
    fn assignment_to_array_name_is_fatal() {
        let err = parse_source("char a[4]; void main() { a = 0; }").unwrap_err();
        assert!(err.message().contains("array"));
    }

    #[test]
    fn missing_return_value_is_fatal() {
        let err = parse_source("int f() { return; }").unwrap_err();
        assert!(err.message().contains("must return a value"));
    }

    #[test]
    fn return_type_must_be_assign_compatible() {
        let err = parse_source("char f() { int x; x = 300; return x; }").unwrap_err();
        assert!(err.message().contains("[DATATYPE]"));
    }

    #[test]
    fn for_update_may_be_empty() {
        let (program, _) =
            parse_source("void main() { int i; for (i = 0; i < 3;) { i = i + 1; } }").unwrap();
        let func = first_func(&program);
        let StmtKind::For { update, .. } = &func.body[1].kind else {
            panic!("expected for");
        };
        assert!(update.is_none());
    }

    #[test]
    fn braced_block_keeps_statement_as_only_child() {
        let (program, _) = parse_source("void main() { print(1); }").unwrap();
        let func = first_func(&program);
        assert_eq!(func.body.len(), 1);
        assert!(matches!(func.body[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn braceless_body_is_a_single_statement() {
        let (program, _) = parse_source("void main() print(1);").unwrap();
        let func = first_func(&program);
        assert_eq!(func.body.len(), 1);
        assert!(matches!(func.body[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn else_if_chains_parse() {
        let (program, _) = parse_source(
            "void main() { int x; x = 1; if (x == 0) { } else if (x == 1) { } else { } }",
        )
        .unwrap();
        let func = first_func(&program);
        let StmtKind::If { els, .. } = &func.body[2].kind else {
            panic!("expected if");
        };
        let els = els.as_ref().expect("else branch");
        assert!(matches!(els.kind, StmtKind::If { .. }));
    }

    #[test]
    fn every_expression_carries_a_type() {
        let (program, _) = parse_source(
            "void main() { int x; int* p; x = 1 + 2 * 3; p = &x; *p = *p + 1; if (x < 5) { print(x); } }",
        )
        .unwrap();
        fn check_expr(expr: &Expr) {
            assert!(expr.ty.width() > 0 || expr.ty.is_void());
            match &expr.kind {
                ExprKind::Deref(inner) | ExprKind::Scale { expr: inner, .. } => check_expr(inner),
                ExprKind::Index { index, .. } => check_expr(index),
                ExprKind::Call { args, .. } => args.iter().for_each(check_expr),
                ExprKind::Assign { target, value } => {
                    check_expr(target);
                    check_expr(value);
                }
                ExprKind::Binary { lhs, rhs, .. } => {
                    check_expr(lhs);
                    check_expr(rhs);
                }
                _ => {}
            }
        }
        fn check_stmt(stmt: &Stmt) {
            match &stmt.kind {
                StmtKind::Expr(expr) => check_expr(expr),
                StmtKind::If { cond, then, els } => {
                    check_expr(cond);
                    check_stmt(then);
                    if let Some(els) = els {
                        check_stmt(els);
                    }
                }
                StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
                    check_expr(cond);
                    check_stmt(body);
                }
                StmtKind::For {
                    init,
                    cond,
                    update,
                    body,
                } => {
                    check_stmt(init);
                    check_expr(cond);
                    if let Some(update) = update {
                        check_expr(update);
                    }
                    check_stmt(body);
                }
                StmtKind::Return { value, .. } => {
                    if let Some(value) = value {
                        check_expr(value);
                    }
                }
                StmtKind::Block(stmts) => stmts.iter().for_each(check_stmt),
                _ => {}
            }
        }
        let func = first_func(&program);
        func.body.iter().for_each(check_stmt);
    }

    #[test]
    fn function_formals_become_symbols() {
        let (_, symtab) = parse_source("int add(int a) { return a + 1; }").unwrap();
        let func_idx = symtab.find("add").unwrap();
        let Symbol::Func { formals, .. } = symtab.get(func_idx) else {
            panic!("expected function symbol");
        };
        assert_eq!(formals.len(), 1);
        assert_eq!(formals[0].name, "a");
        assert!(symtab.find("a").is_some());
    }
}
