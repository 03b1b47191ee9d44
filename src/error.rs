//! Error taxonomy and the shared error reporter.
//!
//! Four families of failure exist in the pipeline:
//! - configuration errors, raised synchronously from a feature/property
//!   setter and never deferred;
//! - fatal document errors (well-formedness violations), routed through
//!   the shared [`ErrorReporter`] and surfaced at the parse boundary;
//! - cancellation, a payload-free unwind signal that every stage must
//!   pass through untouched;
//! - invariant violations, contract breaches by an external collaborator
//!   (typically a content filter) that fail loudly.

use std::{cell::RefCell, fmt, rc::Rc};

/// Numeric error codes for reported document errors.
///
/// The vocabulary follows the scanner productions: one code per distinct
/// well-formedness failure the pipeline can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XmlErrorCode {
    InternalError,
    DocumentEmpty,
    DocumentEnd,
    InvalidChar,
    InvalidCharRef,
    UndeclaredEntity,
    EntityLoop,
    EntityNotFinished,
    AttributeNotFinished,
    AttributeWithoutValue,
    AttributeRedefined,
    LtInAttribute,
    LiteralNotFinished,
    CommentNotFinished,
    HyphenInComment,
    PINotFinished,
    ReservedPITarget,
    CDATANotFinished,
    TagNameMismatch,
    TagNotFinished,
    GtRequired,
    EqualRequired,
    NameRequired,
    SpaceRequired,
    DoctypeNotFinished,
    EntityDeclNotFinished,
    AttlistDeclNotFinished,
    ElementDeclNotFinished,
    NotationDeclNotFinished,
    CondSectionNotFinished,
    PERefInInternalSubset,
    VersionMissing,
    UnsupportedVersion,
    UnsupportedEncoding,
    XmlDeclNotFinished,
    StandaloneValue,
    NamespaceUndeclaredPrefix,
    NamespaceEmptyBinding,
    NamespaceReservedPrefix,
    ExtraContent,
}

/// Severity of a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum XmlSeverity {
    Warning,
    Error,
    FatalError,
}

impl fmt::Display for XmlSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlSeverity::Warning => write!(f, "warning"),
            XmlSeverity::Error => write!(f, "error"),
            XmlSeverity::FatalError => write!(f, "fatal error"),
        }
    }
}

/// A single reported document error with its source position.
#[derive(Debug, Clone)]
pub struct ParseDiagnostic {
    pub code: XmlErrorCode,
    pub message: String,
    pub system_id: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sysid) = self.system_id.as_deref() {
            write!(f, "{}:", sysid)?;
        }
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Top-level error type crossing the library boundary.
#[derive(Debug, Clone)]
pub enum XmlError {
    /// The feature id is not in the recognized vocabulary.
    FeatureNotRecognized(String),
    /// The feature id is recognized but the requested state is not
    /// supported by this configuration.
    FeatureNotSupported(String),
    /// The property id is not in the recognized vocabulary.
    PropertyNotRecognized(String),
    /// The property id is recognized but the supplied value is not
    /// supported.
    PropertyNotSupported(String),
    /// A critical feature/property was mutated while a parse was in
    /// progress.
    ConfigDuringParse(String),
    /// A fatal document error; parsing stopped at the reported position.
    Fatal(ParseDiagnostic),
    /// The distinguished cancellation unwind signal. Carries no payload
    /// and must never be mistaken for a document error.
    Cancelled,
    /// A contract breach by an external collaborator, e.g. a filter
    /// rejecting the document root. Not recoverable.
    Invariant(String),
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlError::FeatureNotRecognized(id) => write!(f, "feature not recognized: {id}"),
            XmlError::FeatureNotSupported(id) => write!(f, "feature not supported: {id}"),
            XmlError::PropertyNotRecognized(id) => write!(f, "property not recognized: {id}"),
            XmlError::PropertyNotSupported(id) => write!(f, "property not supported: {id}"),
            XmlError::ConfigDuringParse(id) => {
                write!(f, "cannot change {id} while a parse is in progress")
            }
            XmlError::Fatal(diag) => write!(f, "{diag}"),
            XmlError::Cancelled => write!(f, "parsing was cancelled"),
            XmlError::Invariant(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for XmlError {}

impl XmlError {
    /// `true` for the cancellation unwind signal and nothing else.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, XmlError::Cancelled)
    }
}

/// Callback invoked for every reported diagnostic.
pub type ErrorHandler = Box<dyn FnMut(XmlSeverity, &ParseDiagnostic)>;

/// Severity-tagged diagnostic sink shared by every pipeline component.
///
/// Components report through [`ErrorReporter::report`]; a fatal report
/// both records the diagnostic and returns the error so the caller can
/// propagate it with `?`. Warnings and recoverable errors are recorded
/// and parsing continues.
#[derive(Default)]
pub struct ErrorReporter {
    handler: Option<ErrorHandler>,
    diagnostics: Vec<(XmlSeverity, ParseDiagnostic)>,
    fatal_seen: bool,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a user handler; diagnostics are still recorded internally.
    pub fn set_handler(&mut self, handler: ErrorHandler) {
        self.handler = Some(handler);
    }

    pub fn report(&mut self, severity: XmlSeverity, diagnostic: ParseDiagnostic) {
        log::debug!("report {severity}: {diagnostic}");
        if let Some(handler) = self.handler.as_mut() {
            handler(severity, &diagnostic);
        }
        if severity == XmlSeverity::FatalError {
            self.fatal_seen = true;
        }
        self.diagnostics.push((severity, diagnostic));
    }

    /// Report a fatal error and hand back the matching [`XmlError`].
    pub fn fatal(&mut self, diagnostic: ParseDiagnostic) -> XmlError {
        self.report(XmlSeverity::FatalError, diagnostic.clone());
        XmlError::Fatal(diagnostic)
    }

    pub fn fatal_seen(&self) -> bool {
        self.fatal_seen
    }

    pub fn diagnostics(&self) -> &[(XmlSeverity, ParseDiagnostic)] {
        &self.diagnostics
    }

    /// Drop recorded state so the reporter can serve another parse.
    pub fn reset(&mut self) {
        self.diagnostics.clear();
        self.fatal_seen = false;
    }
}

/// Shared handle to the reporter; one per configuration, cloned into
/// every component of both version pipelines.
pub type SharedErrorReporter = Rc<RefCell<ErrorReporter>>;

pub fn shared_reporter() -> SharedErrorReporter {
    Rc::new(RefCell::new(ErrorReporter::new()))
}

/// Error codes for document-tree mutation failures.
///
/// Named after the DOM exception vocabulary, but these are plain error
/// codes, not exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomError {
    HierarchyRequest,
    NotFound,
    NoModificationAllowed,
    InUseAttribute,
}

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomError::HierarchyRequest => write!(f, "hierarchy request error"),
            DomError::NotFound => write!(f, "node not found"),
            DomError::NoModificationAllowed => write!(f, "no modification allowed"),
            DomError::InUseAttribute => write!(f, "attribute already in use"),
        }
    }
}

impl std::error::Error for DomError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguishable() {
        let err = XmlError::Cancelled;
        assert!(err.is_cancelled());
        let fatal = XmlError::Fatal(ParseDiagnostic {
            code: XmlErrorCode::TagNotFinished,
            message: "unterminated start tag".into(),
            system_id: None,
            line: 3,
            column: 7,
        });
        assert!(!fatal.is_cancelled());
    }

    #[test]
    fn reporter_records_and_flags_fatal() {
        let mut reporter = ErrorReporter::new();
        reporter.report(
            XmlSeverity::Warning,
            ParseDiagnostic {
                code: XmlErrorCode::UndeclaredEntity,
                message: "entity 'x' not declared".into(),
                system_id: None,
                line: 1,
                column: 5,
            },
        );
        assert!(!reporter.fatal_seen());
        let err = reporter.fatal(ParseDiagnostic {
            code: XmlErrorCode::DocumentEmpty,
            message: "document is empty".into(),
            system_id: None,
            line: 1,
            column: 1,
        });
        assert!(matches!(err, XmlError::Fatal(_)));
        assert!(reporter.fatal_seen());
        assert_eq!(reporter.diagnostics().len(), 2);
    }
}
