use std::fmt::Write;

use crate::ast::SourceMap;
use super::{Diagnostic, Label, Severity};

#[derive(Clone, Copy)]
enum Style {
    Bold,
    Error,
    Warning,
    Gutter,
    Dim,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Bold => "1",
            Style::Error => "1;31",
            Style::Warning => "1;33",
            Style::Gutter => "36",
            Style::Dim => "2",
        }
    }
}

/// Renders diagnostics as rustc-style text, optionally with ANSI colour.
pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    /// Colour only when stderr is a terminal.
    pub fn for_stderr() -> Self {
        use std::io::IsTerminal;
        AnsiRenderer { use_color: std::io::stderr().is_terminal() }
    }

    fn paint(&self, style: Style, s: &str) -> String {
        if self.use_color {
            format!("\x1b[{}m{s}\x1b[0m", style.code())
        } else {
            s.to_string()
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let (word, style) = match d.severity {
            Severity::Error => ("error", Style::Error),
            Severity::Warning => ("warning", Style::Warning),
        };
        let header = match d.code {
            Some(code) => format!("{word}[{code}]"),
            None => word.to_string(),
        };

        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", self.paint(style, &header), self.paint(Style::Bold, &d.message));

        let mut labels = d.labels.iter();
        if let (Some(source), Some(first)) = (&d.source, labels.next()) {
            self.render_snippet(&mut out, source, first);
        }
        // labels after the first, or every label when there is no source
        let rest = if d.source.is_some() { labels.as_slice() } else { d.labels.as_slice() };
        let eq = self.paint(Style::Dim, "=");
        for label in rest.iter().filter(|l| !l.message.is_empty()) {
            let _ = writeln!(out, "  {eq} {}", label.message);
        }
        for note in &d.notes {
            let _ = writeln!(out, "  {eq} note: {note}");
        }
        if let Some(suggestion) = &d.suggestion {
            let _ = writeln!(out, "  {eq} suggestion: {suggestion}");
        }
        out
    }

    /// `--> line:col`, the source line, and carets under the span.
    fn render_snippet(&self, out: &mut String, source: &str, label: &Label) {
        let map = SourceMap::new(source);
        let loc = map.span_start(label.span);
        let width = loc.line.to_string().len();
        let pad = " ".repeat(width);
        let bar = self.paint(Style::Gutter, "|");

        let _ = writeln!(out, "  {} {loc}", self.paint(Style::Gutter, "-->"));
        let _ = writeln!(out, "{pad} {bar}");
        let number = self.paint(Style::Gutter, &format!("{:>width$}", loc.line));
        let _ = writeln!(out, "{number} {bar} {}", map.line(loc.line));

        let indent = " ".repeat(loc.column - 1);
        let carets = "^".repeat(label.span.end.saturating_sub(label.span.start).max(1));
        let marker = if label.message.is_empty() { carets } else { format!("{carets} {}", label.message) };
        let _ = writeln!(out, "{pad} {bar} {indent}{}", self.paint(Style::Error, &marker));
        let _ = writeln!(out, "{pad} {bar}");
    }
}
