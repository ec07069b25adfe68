pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod vm;

use ast::{Program, Span};
use bytecode::Instruction;
use diagnostic::Diagnostic;

/// A failure at any stage between source text and a finished run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error("{} parse error(s)", .0.len())]
    Parse(Vec<parser::ParseError>),
    #[error(transparent)]
    Compile(#[from] compiler::CompileError),
    #[error(transparent)]
    Vm(#[from] vm::VmError),
}

impl Error {
    /// One diagnostic per underlying error, carrying `source` for snippets when given.
    pub fn diagnostics(&self, source: Option<&str>) -> Vec<Diagnostic> {
        let diags = match self {
            Error::Lex(e) => vec![Diagnostic::from(e)],
            Error::Parse(errors) => errors.iter().map(Diagnostic::from).collect(),
            Error::Compile(e) => vec![Diagnostic::from(e)],
            Error::Vm(e) => vec![Diagnostic::from(e)],
        };
        match source {
            Some(src) => diags.into_iter().map(|d| d.with_source(src)).collect(),
            None => diags,
        }
    }
}

/// Lex and parse. Every parse error found during recovery is reported.
pub fn parse_source(source: &str) -> Result<Program, Error> {
    let tokens = lexer::lex(source)?
        .into_iter()
        .map(|(token, range)| (token, Span::from(range)))
        .collect();
    let (program, errors) = parser::parse(tokens);
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(Error::Parse(errors))
    }
}

/// Lex, parse and compile from instruction offset zero.
pub fn compile_source(source: &str) -> Result<Vec<Instruction>, Error> {
    compile_source_at(source, 0)
}

/// Compile for appending after `base` existing instructions.
pub fn compile_source_at(source: &str, base: usize) -> Result<Vec<Instruction>, Error> {
    let program = parse_source(source)?;
    Ok(compiler::Compiler::starting_at(base).compile(&program.statements)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_source_reports_each_stage() {
        assert!(matches!(compile_source("var a = @;"), Err(Error::Lex(_))));
        assert!(matches!(compile_source("var = 1;"), Err(Error::Parse(_))));
        assert!(matches!(compile_source("class A {}"), Err(Error::Compile(_))));
        assert!(compile_source("print 1;").is_ok());
    }

    #[test]
    fn parse_errors_become_one_diagnostic_each() {
        let err = parse_source("var = 1;\nvar = 2;").unwrap_err();
        let diags = err.diagnostics(Some("var = 1;\nvar = 2;"));
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.source.is_some() && d.code.is_some()));
    }

    #[test]
    fn listing_round_trip_keeps_multi_line_strings() {
        let code = compile_source("print \"a\nb\";").unwrap();
        assert_eq!(code.len(), 2);
        let decoded = bytecode::parse_listing(&bytecode::to_listing(&code));
        assert_eq!(decoded, code);
    }

    #[test]
    fn offset_compile_shifts_labels() {
        let code = compile_source_at("while (false) {}", 40).unwrap();
        assert_eq!(code[0].to_string(), "LABEL loop_start_40");
    }
}
