pub mod ansi;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A message attached to a span of source. The first label of a
/// diagnostic is drawn under its source line.
#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<&'static str>,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Diagnostic::new(Severity::Warning, message)
    }

    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            severity,
            code: None,
            message: message.into(),
            labels: Vec::new(),
            notes: Vec::new(),
            suggestion: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.labels.push(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// A runtime error, noting the instruction `vm` stopped on.
    pub fn runtime(err: &crate::vm::VmError, vm: &crate::vm::Vm) -> Self {
        let d = Diagnostic::from(err);
        match vm.failing_instruction() {
            Some((at, inst)) => d.with_note(format!("at instruction {}: {}", at, inst)),
            None => d,
        }
    }
}

// ---- From impls for each stage's error type ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected character(s) '{}'", e.snippet))
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        Diagnostic::error(&e.message).with_code(e.code).with_span(e.span, "here")
    }
}

impl From<&crate::compiler::CompileError> for Diagnostic {
    fn from(e: &crate::compiler::CompileError) -> Self {
        let d = Diagnostic::error(e.to_string());
        match e {
            crate::compiler::CompileError::Generation { .. } => {
                d.with_note("classes, methods and properties are parsed but not compiled")
            }
            crate::compiler::CompileError::UnsupportedCallee { .. } => {
                d.with_suggestion("bind the function to a name and call it by that name")
            }
        }
    }
}

impl From<&crate::vm::VmError> for Diagnostic {
    fn from(e: &crate::vm::VmError) -> Self {
        Diagnostic::error(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "something went wrong");
        assert!(d.code.is_none());
        assert!(d.labels.is_empty());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn diagnostic_with_span() {
        let d = Diagnostic::error("bad token")
            .with_span(Span { start: 5, end: 8 }, "here");
        assert_eq!(d.labels.len(), 1);
        assert_eq!(d.labels[0].span.start, 5);
        assert_eq!(d.labels[0].span.end, 8);
        assert_eq!(d.labels[0].message, "here");
    }

    #[test]
    fn diagnostic_with_note_and_suggestion() {
        let d = Diagnostic::warning("unused value")
            .with_note("at instruction 4")
            .with_suggestion("drop the expression");
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.notes, vec!["at instruction 4"]);
        assert_eq!(d.suggestion.as_deref(), Some("drop the expression"));
    }

    #[test]
    fn from_lex_error() {
        let e = crate::lexer::LexError {
            position: 8,
            snippet: "@".to_string(),
            suggestion: "Remove the character".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.severity, Severity::Error);
        assert!(d.message.contains('@'));
        assert_eq!(d.labels[0].span, Span { start: 8, end: 9 });
        assert!(d.suggestion.is_some());
    }

    #[test]
    fn from_parse_error() {
        let e = crate::parser::ParseError {
            code: "SB-P004",
            position: 2,
            span: Span { start: 10, end: 15 },
            message: "expected ';' after value".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.code, Some("SB-P004"));
        assert!(d.message.contains("expected ';'"));
        assert_eq!(d.labels[0].span, Span { start: 10, end: 15 });
    }

    #[test]
    fn from_compile_error() {
        let e = crate::compiler::CompileError::Generation { node: "class declaration" };
        let d = Diagnostic::from(&e);
        assert!(d.message.contains("class declaration"));
        assert_eq!(d.notes.len(), 1);
        assert!(d.labels.is_empty());
    }

    #[test]
    fn from_vm_error() {
        let e = crate::vm::VmError::UndefinedFunction { name: "foo".to_string() };
        let d = Diagnostic::from(&e);
        assert!(d.message.contains("foo"));
        assert!(d.labels.is_empty()); // no span for runtime errors
    }

    #[test]
    fn runtime_error_names_failing_instruction() {
        let code = crate::bytecode::parse_listing("PUSH_CONST 1\nPUSH_CONST 0\nDIV\nPRINT");
        let mut vm = crate::vm::Vm::new(code);
        let err = vm.run().unwrap_err();
        let d = Diagnostic::runtime(&err, &vm);
        assert_eq!(d.message, "division by zero");
        assert_eq!(d.notes, vec!["at instruction 2: DIV"]);
    }
}
