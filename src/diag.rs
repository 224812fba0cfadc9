//! Terminal rendering for semantic diagnostics.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use codespan_reporting::term::{emit, Config};

use crate::errors::SemanticError;

/// Prints `err` against the named source text on stderr.
pub fn report_error(err: &SemanticError, filename: &str, src: &str) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let file = SimpleFile::new(filename, src);
    let diag = Diagnostic::error()
        .with_message(&err.message)
        .with_labels(vec![Label::primary((), err.span.clone())]);
    let _ = emit(&mut stderr, &Config::default(), &file, &diag);
}
