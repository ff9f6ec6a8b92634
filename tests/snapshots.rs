//! Structured snapshots of the compiler's serializable records: the token
//! stream a source fragment lexes to, and the symbol-table entries the
//! parser builds from declarations.

use toyccomp::lexer::{Lexer, TokenKind};
use toyccomp::parser;

fn lex(source: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(source);
    let mut kinds = Vec::new();
    loop {
        let kind = lexer.scan().expect("scan").kind;
        let done = kind == TokenKind::Eof;
        kinds.push(kind);
        if done {
            break;
        }
    }
    kinds
}

#[test]
fn token_stream_of_a_declaration() {
    insta::assert_json_snapshot!(lex("int x = 41; print(x);"), @r###"
    [
      {
        "Keyword": "Int"
      },
      {
        "Ident": "x"
      },
      {
        "Punct": "Assign"
      },
      {
        "IntLit": 41
      },
      {
        "Punct": "Semicolon"
      },
      {
        "Ident": "print"
      },
      {
        "Punct": "LParen"
      },
      {
        "Ident": "x"
      },
      {
        "Punct": "RParen"
      },
      {
        "Punct": "Semicolon"
      },
      "Eof"
    ]
    "###);
}

#[test]
fn function_symbol_records_its_signature() {
    let mut lexer = Lexer::new("char* greeting(int count) { return \"hi\"; }");
    let (_, symtab) = parser::parse(&mut lexer).expect("parse");
    let idx = symtab.find("greeting").expect("symbol");
    insta::assert_json_snapshot!(symtab.get(idx), @r###"
    {
      "Func": {
        "name": "greeting",
        "return_type": {
          "primitive": "Char",
          "pointer_level": 1,
          "array_len": 0
        },
        "formals": [
          {
            "name": "count",
            "ty": {
              "primitive": "Int",
              "pointer_level": 0,
              "array_len": 0
            }
          }
        ]
      }
    }
    "###);
}

#[test]
fn array_variable_symbol_records_its_type() {
    let mut lexer = Lexer::new("char a[4];");
    let (_, symtab) = parser::parse(&mut lexer).expect("parse");
    let idx = symtab.find("a").expect("symbol");
    insta::assert_json_snapshot!(symtab.get(idx), @r###"
    {
      "Var": {
        "name": "a",
        "ty": {
          "primitive": "Char",
          "pointer_level": 1,
          "array_len": 4
        }
      }
    }
    "###);
}
