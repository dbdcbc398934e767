// Our basic error type.

use std::{error, fmt, result};

use codespan_reporting::{
    diagnostic::Diagnostic,
    term::{
        self,
        termcolor::{ColorChoice, NoColor, StandardStream},
    },
};
use thiserror::Error;

use crate::{
    known_files::{FileId, KnownFiles},
    tokenizer::Span,
};

/// Our standard result type.
pub type Result<T, E = Error> = result::Result<T, E>;

/// The four ways a unit of work can fail.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FailureKind {
    /// The input does not conform to the grammar, or is otherwise unusable
    /// as written (duplicate declarations, malformed pragmas).
    ParseUnusable,
    /// A name could not be resolved against the scope stack, the package
    /// context, the metadata index or the synonym chain.
    UnresolvedReference,
    /// We have no rewrite rule for this construct.
    UnsupportedConstruct,
    /// Code generation needed a type annotation that type inference never
    /// produced. This is a pipeline defect, not a user error.
    TypeInferenceIncomplete,
}

impl FailureKind {
    /// A short, stable name, used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ParseUnusable => "parse-unusable",
            FailureKind::UnresolvedReference => "unresolved-reference",
            FailureKind::UnsupportedConstruct => "unsupported-construct",
            FailureKind::TypeInferenceIncomplete => "type-inference-incomplete",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Our standard error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An error in the PL/SQL source code supplied by the user, either at
    /// parse time or during analysis.
    Source(#[from] Box<SourceError>),

    /// A name we could not resolve.
    UnresolvedReference { name: String, span: Span },

    /// A construct we know how to parse, but not how to translate.
    UnsupportedConstruct { construct: String, span: Span },

    /// Code generation asked for a type that inference never recorded.
    TypeInferenceIncomplete { message: String, span: Span },

    /// An error with extra context. We may replace this with more specific
    /// errors later.
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    /// An unknown error occurred.
    Other(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Create a new `Error::Other` from an error value.
    pub fn other<E>(e: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        Error::Other(Box::<E>::new(e))
    }

    /// An error pointing at a specific location in the source.
    pub fn annotated(
        message: impl Into<String>,
        span: Span,
        label: impl Into<String>,
    ) -> Self {
        let mut diagnostic = Diagnostic::error().with_message(message.into());
        if let Some(label) = span.to_label(label.into()) {
            diagnostic = diagnostic.with_labels(vec![label]);
        }
        Error::Source(Box::new(SourceError {
            expected: None,
            diagnostic,
        }))
    }

    /// A name we could not resolve.
    pub fn unresolved(name: impl Into<String>, span: Span) -> Self {
        Error::UnresolvedReference {
            name: name.into(),
            span,
        }
    }

    /// A construct with no rewrite rule.
    pub fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        Error::UnsupportedConstruct {
            construct: construct.into(),
            span,
        }
    }

    /// A missing type annotation.
    pub fn incomplete(message: impl Into<String>, span: Span) -> Self {
        Error::TypeInferenceIncomplete {
            message: message.into(),
            span,
        }
    }

    /// Which failure kind does this error belong to?
    ///
    /// Errors that don't carry a kind of their own (I/O problems, bad
    /// metadata) count as unusable input, since retrying with the same input
    /// cannot help.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Source(_) | Error::Other(_) => FailureKind::ParseUnusable,
            Error::UnresolvedReference { .. } => FailureKind::UnresolvedReference,
            Error::UnsupportedConstruct { .. } => FailureKind::UnsupportedConstruct,
            Error::TypeInferenceIncomplete { .. } => FailureKind::TypeInferenceIncomplete,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Build a `codespan_reporting` diagnostic for this error.
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        match self {
            Error::Source(e) => e.diagnostic.clone(),
            Error::UnresolvedReference { name, span } => {
                with_optional_label(Diagnostic::error(), *span, "not defined")
                    .with_message(format!("cannot resolve name `{}`", name))
            }
            Error::UnsupportedConstruct { construct, span } => {
                with_optional_label(Diagnostic::error(), *span, "no PL/pgSQL equivalent")
                    .with_message(format!("unsupported construct: {}", construct))
            }
            Error::TypeInferenceIncomplete { message, span } => {
                with_optional_label(Diagnostic::bug(), *span, "no type recorded")
                    .with_message(format!("type inference incomplete: {}", message))
            }
            Error::Context { context, source } => {
                let mut diagnostic = source.to_diagnostic();
                diagnostic.message = format!("{}: {}", context, diagnostic.message);
                diagnostic
            }
            Error::Other(e) => Diagnostic::error().with_message(e.to_string()),
        }
    }

    /// Emit this error to stderr, with colors and source code snippets.
    pub fn emit(&self, files: &KnownFiles) {
        let writer = StandardStream::stderr(ColorChoice::Auto);
        let config = term::Config::default();
        if term::emit(&mut writer.lock(), &config, files, &self.to_diagnostic()).is_err() {
            // The source is gone, so fall back to the plain message chain.
            eprintln!("ERROR: {}", self);
            let mut next = error::Error::source(self);
            while let Some(source) = next {
                eprintln!("  caused by: {}", source);
                next = source.source();
            }
        }
    }

    /// Render this error without colors, for reports and tests.
    pub fn render(&self, files: &KnownFiles) -> String {
        let mut out = NoColor::new(Vec::new());
        let config = term::Config::default();
        match term::emit(&mut out, &config, files, &self.to_diagnostic()) {
            Ok(()) => String::from_utf8_lossy(&out.into_inner()).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

fn with_optional_label(
    diagnostic: Diagnostic<FileId>,
    span: Span,
    label: &str,
) -> Diagnostic<FileId> {
    match span.to_label(label.to_owned()) {
        Some(label) => diagnostic.with_labels(vec![label]),
        None => diagnostic,
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // We include transparent errors here, in case someone prints them
        // without a full chain.
        match self {
            Error::Source(e) => write!(f, "{}", e),
            Error::UnresolvedReference { name, .. } => {
                write!(f, "cannot resolve name `{}`", name)
            }
            Error::UnsupportedConstruct { construct, .. } => {
                write!(f, "unsupported construct: {}", construct)
            }
            Error::TypeInferenceIncomplete { message, .. } => {
                write!(f, "type inference incomplete: {}", message)
            }
            Error::Context { context, source } => write!(f, "{}: {}", context, source),
            Error::Other(e) => write!(f, "{}", e),
        }
    }
}

/// Format an error message.
macro_rules! format_err {
    ($($arg:tt)*) => {
        Error::Other(format!($($arg)*).into())
    };
}

// A trick to make `format_err!` accessible from within this crate.
pub(crate) use format_err;

/// Helper trait used to attach context to foreign errors.
pub trait Context<T, E>: Sized {
    fn with_context<S, F>(self, context_fn: F) -> Result<T>
    where
        S: Into<String>,
        F: FnOnce() -> S,
    {
        self.context(context_fn())
    }

    fn context<S>(self, context: S) -> Result<T>
    where
        S: Into<String>;
}

impl<T, E> Context<T, E> for Result<T, E>
where
    E: error::Error + Send + Sync + 'static,
{
    fn context<S>(self, context: S) -> Result<T>
    where
        S: Into<String>,
    {
        self.map_err(|e| Error::Context {
            context: context.into(),
            source: Box::new(Error::other(e)),
        })
    }
}

/// A parse error or other problem with user-supplied source.
#[derive(Debug)]
pub struct SourceError {
    pub expected: Option<String>,
    pub diagnostic: Diagnostic<FileId>,
}

impl SourceError {
    /// A parse error at a single location.
    pub fn parse_error(message: &str, span: Span, expected: impl fmt::Display) -> Self {
        let expected = expected.to_string();
        let mut diagnostic = Diagnostic::error().with_message(message.to_owned());
        if let Some(label) = span.to_label(format!("expected {}", expected)) {
            diagnostic = diagnostic.with_labels(vec![label]);
        }
        SourceError {
            expected: Some(expected),
            diagnostic,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.expected {
            Some(expected) => write!(f, "{}: expected {}", self.diagnostic.message, expected),
            None => write!(f, "{}", self.diagnostic.message),
        }
    }
}

impl error::Error for SourceError {}

impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        Error::Source(Box::new(e))
    }
}
