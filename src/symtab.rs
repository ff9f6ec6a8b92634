//! Global symbol table.
//!
//! One append-only table holds every named entity in the compilation unit.
//! Indices are dense, zero-based, and stable; the AST refers to symbols by
//! index only. The table grows during parsing and is read-only during code
//! generation.

use crate::debug::{self, Severity};
use crate::error::{CompileError, CompileResult};
use crate::types::{self, Type};
use serde::Serialize;

/// Hard cap on table size.
pub const MAX_GLOBAL_SYMBOLS: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Formal {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Symbol {
    Var {
        name: String,
        ty: Type,
    },
    Func {
        name: String,
        return_type: Type,
        formals: Vec<Formal>,
    },
}

impl Symbol {
    pub fn name(&self) -> &str {
        match self {
            Symbol::Var { name, .. } => name,
            Symbol::Func { name, .. } => name,
        }
    }

    /// The variable's type, or the function's return type.
    pub fn ty(&self) -> Type {
        match self {
            Symbol::Var { ty, .. } => *ty,
            Symbol::Func { return_type, .. } => *return_type,
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Symbol::Func { .. })
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table pre-populated with the four runtime entry points.
    pub fn with_runtime() -> Self {
        let mut table = Self::new();
        for (name, arg_ty) in [
            ("print", types::LONG),
            ("print_char", types::CHAR),
            ("print_str", types::CHAR.pointer_to()),
            ("print_ln", types::CHAR.pointer_to()),
        ] {
            table.symbols.push(Symbol::Func {
                name: name.to_string(),
                return_type: types::VOID,
                formals: vec![Formal {
                    name: "value".to_string(),
                    ty: arg_ty,
                }],
            });
        }
        table
    }

    pub fn add(&mut self, symbol: Symbol) -> CompileResult<usize> {
        if self.find(symbol.name()).is_some() {
            return Err(CompileError::new(format!(
                "[SYMTAB] redefinition of '{}'",
                symbol.name()
            )));
        }
        if self.symbols.len() == MAX_GLOBAL_SYMBOLS {
            return Err(CompileError::new(
                "[SYMTAB] reached the maximum number of global symbols",
            ));
        }
        debug::print(
            Severity::Debug,
            format!("added symbol '{}' to the global symbol table", symbol.name()),
        );
        self.symbols.push(symbol);
        Ok(self.symbols.len() - 1)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.symbols.iter().position(|sym| sym.name() == name)
    }

    pub fn get(&self, index: usize) -> &Symbol {
        &self.symbols[index]
    }

    /// Rewrites a variable's type in place (array declarators refine the
    /// declared type after the symbol already exists).
    pub fn set_var_type(&mut self, index: usize, new_ty: Type) {
        if let Symbol::Var { ty, .. } = &mut self.symbols[index] {
            *ty = new_ty;
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_symbols_are_preloaded() {
        let table = SymbolTable::with_runtime();
        assert_eq!(table.len(), 4);
        assert_eq!(table.find("print"), Some(0));
        assert_eq!(table.find("print_char"), Some(1));
        assert_eq!(table.find("print_str"), Some(2));
        assert_eq!(table.find("print_ln"), Some(3));
        assert!(table.get(0).is_function());
    }

    #[test]
    fn indices_are_dense_and_stable() {
        let mut table = SymbolTable::new();
        let a = table
            .add(Symbol::Var {
                name: "a".to_string(),
                ty: types::INT,
            })
            .unwrap();
        let b = table
            .add(Symbol::Var {
                name: "b".to_string(),
                ty: types::CHAR,
            })
            .unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(table.get(a).name(), "a");
        assert_eq!(table.find("b"), Some(b));
    }

    #[test]
    fn redefinition_is_fatal() {
        let mut table = SymbolTable::new();
        table
            .add(Symbol::Var {
                name: "x".to_string(),
                ty: types::INT,
            })
            .unwrap();
        let err = table
            .add(Symbol::Var {
                name: "x".to_string(),
                ty: types::INT,
            })
            .unwrap_err();
        assert!(err.message().contains("[SYMTAB]"));
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut table = SymbolTable::new();
        for i in 0..MAX_GLOBAL_SYMBOLS {
            table
                .add(Symbol::Var {
                    name: format!("v{i}"),
                    ty: types::INT,
                })
                .unwrap();
        }
        assert!(table
            .add(Symbol::Var {
                name: "overflow".to_string(),
                ty: types::INT,
            })
            .is_err());
    }
}
