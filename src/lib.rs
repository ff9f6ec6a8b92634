pub mod asm;
pub mod ast;
pub mod codegen;
pub mod debug;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod symtab;
pub mod types;

use crate::error::CompileResult;
use crate::lexer::Lexer;

/// Compiles a source string to x86-64 assembly text.
pub fn compile(source: &str) -> CompileResult<String> {
    let mut lexer = Lexer::new(source);
    let (program, symtab) = parser::parse(&mut lexer)?;
    codegen::generate(&program, &symtab)
}
