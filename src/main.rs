use clap::Parser;
use std::{fs, path::PathBuf};

use toyccomp::codegen;
use toyccomp::debug::{self, Severity};
use toyccomp::error::{CompileError, CompileResult};
use toyccomp::lexer::Lexer;
use toyccomp::{ast, parser};

#[derive(Parser, Debug)]
#[command(name = "toyccomp")]
#[command(about = "A tiny C compiler targeting x86-64 NASM assembly")]
struct Args {
    /// Input source file.
    input: PathBuf,
    /// Output assembly file.
    #[arg(short = 'o', long = "output", default_value = "out.s")]
    output: PathBuf,
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        println!("[ERROR] {err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> CompileResult<()> {
    let mut lexer = Lexer::from_file(&args.input)?;
    let (program, symtab) = parser::parse(&mut lexer)?;
    if debug::enabled(Severity::Debug) {
        debug::print(Severity::Debug, "parsed declarations:");
        print!("{}", ast::dump(&program, &symtab));
    }

    let assembly = codegen::generate(&program, &symtab)?;
    fs::write(&args.output, assembly).map_err(|err| {
        CompileError::new(format!(
            "failed to write {}: {err}",
            args.output.display()
        ))
    })?;
    debug::print(
        Severity::Info,
        format!(
            "compiled {} to {}",
            args.input.display(),
            args.output.display()
        ),
    );
    Ok(())
}
