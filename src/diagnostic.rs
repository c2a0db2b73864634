use std::fmt;

use crate::span::Span;

/// A compiler diagnostic (error or warning).
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
    pub span: Span,
    pub notes: Vec<String>,
    pub help: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Error taxonomy. Everything except `Syntax` and `Name` is raised while
/// specializing a kernel for a signature, before any lane executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed source text.
    Syntax,
    /// Unknown variable, function, parameter or keyword.
    Name,
    /// Operation undefined for the operand dtypes.
    Type,
    /// Broadcast-incompatible shapes, bad axes, non-constant reduction axes.
    Shape,
    /// Malformed compile-time constant (e.g. non power-of-two `arange`).
    Value,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Shape => "ShapeError",
            ErrorKind::Value => "ValueError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Diagnostic {
    /// A syntax error.
    pub fn error(message: String, span: Span) -> Self {
        Self::of_kind(ErrorKind::Syntax, message, span)
    }

    pub fn of_kind(kind: ErrorKind, message: String, span: Span) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message,
            span,
            notes: Vec::new(),
            help: None,
        }
    }

    pub fn name_error(message: String, span: Span) -> Self {
        Self::of_kind(ErrorKind::Name, message, span)
    }

    pub fn type_error(message: String, span: Span) -> Self {
        Self::of_kind(ErrorKind::Type, message, span)
    }

    pub fn shape_error(message: String, span: Span) -> Self {
        Self::of_kind(ErrorKind::Shape, message, span)
    }

    pub fn value_error(message: String, span: Span) -> Self {
        Self::of_kind(ErrorKind::Value, message, span)
    }

    pub fn warning(message: String, span: Span) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message, span)
        }
    }

    pub fn with_note(mut self, note: String) -> Self {
        self.notes.push(note);
        self
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Render the diagnostic to stderr using ariadne.
    pub fn render(&self, filename: &str, source: &str) {
        use ariadne::{Color, Label, Report, ReportKind, Source};

        let kind = match self.severity {
            Severity::Error => ReportKind::Error,
            Severity::Warning => ReportKind::Warning,
        };

        let color = match self.severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
        };

        let mut report = Report::build(kind, filename, self.span.start as usize)
            .with_message(format!("{}: {}", self.kind, self.message))
            .with_label(
                Label::new((filename, self.span.range()))
                    .with_message(&self.message)
                    .with_color(color),
            );

        for note in &self.notes {
            report = report.with_note(note);
        }

        if let Some(help) = &self.help {
            report = report.with_help(help);
        }

        if let Err(e) = report
            .finish()
            .eprint((filename, Source::from(source)))
        {
            log::warn!("failed to render diagnostic: {}", e);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Render a list of diagnostics.
pub fn render_diagnostics(diagnostics: &[Diagnostic], filename: &str, source: &str) {
    for diag in diagnostics {
        diag.render(filename, source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let span = Span::new(0, 10, 15);
        let d = Diagnostic::type_error("bitwise op on float32".to_string(), span);
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.kind, ErrorKind::Type);
        assert_eq!(d.message, "bitwise op on float32");
        assert_eq!(d.span.start, 10);
        assert_eq!(d.span.end, 15);
        assert!(d.notes.is_empty());
        assert!(d.help.is_none());
    }

    #[test]
    fn test_kind_constructors() {
        let s = Span::dummy();
        assert_eq!(Diagnostic::error(String::new(), s).kind, ErrorKind::Syntax);
        assert_eq!(Diagnostic::name_error(String::new(), s).kind, ErrorKind::Name);
        assert_eq!(Diagnostic::shape_error(String::new(), s).kind, ErrorKind::Shape);
        assert_eq!(Diagnostic::value_error(String::new(), s).kind, ErrorKind::Value);
    }

    #[test]
    fn test_warning_construction() {
        let d = Diagnostic::warning("unused variable".to_string(), Span::dummy());
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.message, "unused variable");
    }

    #[test]
    fn test_chained_builders() {
        let d = Diagnostic::shape_error("cannot broadcast".to_string(), Span::new(0, 0, 5))
            .with_note("lhs shape [32, 1]".to_string())
            .with_help("insert an axis with x[:, None]".to_string())
            .with_note("rhs shape [16]".to_string());
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.help.as_deref(), Some("insert an axis with x[:, None]"));
    }

    #[test]
    fn test_display_prefixes_kind() {
        let d = Diagnostic::value_error("arange length 3 is not a power of two".into(), Span::dummy());
        assert_eq!(
            d.to_string(),
            "ValueError: arange length 3 is not a power of two"
        );
    }

    #[test]
    fn test_render_does_not_panic() {
        let source = "kernel k(X) {\n    let y = load(X) & 1.5\n}\n";
        let d = Diagnostic::type_error("bitwise op on float32".to_string(), Span::new(0, 22, 37))
            .with_note("operands: float32, float32".to_string());
        d.render("test.tsl", source);
    }

    #[test]
    fn test_render_diagnostics_multiple() {
        let source = "let x = 1\nlet y = 2\n";
        let diagnostics = vec![
            Diagnostic::warning("unused x".to_string(), Span::new(0, 4, 5)),
            Diagnostic::warning("unused y".to_string(), Span::new(0, 14, 15)),
        ];
        render_diagnostics(&diagnostics, "test.tsl", source);
    }
}
