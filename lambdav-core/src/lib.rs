//! lambdav: an s-expression fragment shader language compiled to SPIR-V.
//!
//! A source file is a sequence of `(define NAME BODY)` forms and top-level
//! statements (in practice `output` calls). Compilation walks each
//! statement once, inlining user functions at their call sites, and
//! assembles a single SPIR-V 1.3 module with a fragment entry point named
//! `main`.

pub mod ast;
pub mod codegen;
pub mod emit;
pub mod error;
pub mod parser;
pub mod scope;

use ast::{ExprKind, Expression};
use codegen::Emitter;
use error::{CompilerError, Result};
use log::debug;
use parser::Parser;

pub struct Compiler;

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler
    }

    /// Compile a source program into a SPIR-V module.
    pub fn compile(&self, source: &str) -> Result<Vec<u32>> {
        let mut parser = Parser::new(source);
        let mut emitter = Emitter::new();

        parser.skip_ws();
        while !parser.at_end() {
            let expr = parser.next_expression()?;

            if let Some((name, body)) = as_define(&expr)? {
                debug!("define {} = {}", name, body);
                emitter.define(name, body);
            } else {
                let value = emitter.generate(&expr)?;
                // Statements must not leave a value behind.
                if !value.ty.is_void() {
                    return Err(CompilerError::Type(
                        "Expression wasn't toplevel".into(),
                        expr.loc,
                    ));
                }
            }

            parser.skip_ws();
        }

        Ok(emitter.finish())
    }
}

/// Recognize `(define NAME BODY)` at the top level.
fn as_define<'e, 'a>(expr: &'e Expression<'a>) -> Result<Option<(&'a str, &'e Expression<'a>)>> {
    let ExprKind::List(values) = &expr.kind else {
        return Ok(None);
    };
    if !matches!(values.first().map(|head| &head.kind), Some(ExprKind::Identifier("define"))) {
        return Ok(None);
    }

    if values.len() != 3 {
        return Err(CompilerError::Shape(
            "Define needs 2 arguments".into(),
            expr.loc,
        ));
    }
    let ExprKind::Identifier(name) = values[1].kind else {
        return Err(CompilerError::Shape(
            "Define needs an identifier to bind".into(),
            values[1].loc,
        ));
    };
    Ok(Some((name, &values[2])))
}
