//! Runtime errors, captured tracebacks and the host-facing [`RunError`].
//!
//! Script-level errors are a plain `(kind, reason)` string pair so that errors thrown by
//! scripts, raised by the VM and returned by native functions all share one shape.
//! Defects of the bytecode contract and exhausted resources are kept apart from them:
//! catcher frames never see those.

use std::{borrow::Cow, fmt, sync::Arc};

use strum::{Display, EnumString, IntoStaticStr};

use crate::{bytecode::Chunk, resource::ResourceError};

/// Error kinds raised by the VM itself.
///
/// Uses strum derives for `Display`, `FromStr` and `Into<&'static str>`. The string form is
/// what appears as the kind of a [`RuntimeError`], e.g. `ArgumentCount` renders as
/// `"Argument Count"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// Undefined names, constant reassignment, missing members.
    Scope,
    /// An operand of the wrong type.
    Type,
    /// A value outside a variable's declared range.
    Range,
    #[strum(serialize = "Argument Count")]
    ArgumentCount,
    Assertion,
    Import,
    Index,
    /// Reading a private attribute from outside its class.
    Publicity,
}

impl ErrorKind {
    /// Creates a runtime error of this kind.
    pub fn error(self, reason: impl Into<String>) -> RuntimeError {
        RuntimeError::new(<&'static str>::from(self), reason)
    }
}

/// A script-level error: a kind and a human readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeError {
    pub kind: String,
    pub reason: String,
}

impl RuntimeError {
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Returns true when this error has the given built-in kind.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == <&'static str>::from(kind)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Error (Runtime): {}", self.kind, self.reason)
    }
}

impl std::error::Error for RuntimeError {}

/// A point in a chunk's bytecode, used to locate an error or a call site in the source.
#[derive(Debug, Clone)]
pub(crate) struct CodeSite {
    pub chunk: Arc<Chunk>,
    pub offset: usize,
}

impl CodeSite {
    pub fn line(&self) -> usize {
        self.chunk.line(self.offset)
    }
}

/// One line of a traceback: the file, the name of the function being executed and the
/// site it was called from.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub(crate) file: Arc<str>,
    pub(crate) context: Arc<str>,
    pub(crate) site: CodeSite,
}

impl TraceEntry {
    pub(crate) fn new(file: Arc<str>, context: Arc<str>, chunk: Arc<Chunk>, offset: usize) -> Self {
        Self {
            file,
            context,
            site: CodeSite { chunk, offset },
        }
    }

    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    #[must_use]
    pub fn context(&self) -> &str {
        &self.context
    }

    /// 1-based source line of the call site.
    #[must_use]
    pub fn line(&self) -> usize {
        self.site.line()
    }
}

/// A runtime error together with where it was raised.
///
/// The traceback is captured once, when the error is first raised, so it still describes
/// the failing call chain after the frames have been unwound.
#[derive(Debug, Clone)]
pub struct RaisedError {
    pub error: RuntimeError,
    /// `None` when the VM was never traced, which renders as a flat message.
    pub(crate) traceback: Option<Vec<TraceEntry>>,
    pub(crate) origin: Option<CodeSite>,
    captured: bool,
}

impl RaisedError {
    pub(crate) fn new(error: RuntimeError) -> Self {
        Self {
            error,
            traceback: None,
            origin: None,
            captured: false,
        }
    }

    pub(crate) fn is_captured(&self) -> bool {
        self.captured
    }

    pub(crate) fn capture(&mut self, traceback: Option<Vec<TraceEntry>>, origin: Option<CodeSite>) {
        self.traceback = traceback;
        self.origin = origin;
        self.captured = true;
    }

    /// The traceback entries, outermost call first.
    #[must_use]
    pub fn traceback(&self) -> &[TraceEntry] {
        self.traceback.as_deref().unwrap_or_default()
    }

    /// Renders the error report shown to users.
    ///
    /// With a traceback this is:
    ///
    /// ```text
    /// Traceback (most recent call last):
    ///   ╰──►  File main, line 1, in main
    ///   ╰──►  File main, line 4, in divide
    ///
    /// Type Error (Runtime): Expected number
    /// File main, line 2
    /// return a / b;
    ///        ^^^^^
    /// ```
    #[must_use]
    pub fn report(&self) -> String {
        let Some(traceback) = &self.traceback else {
            return format!("{}\n", self.error);
        };
        let mut out = String::from("Traceback (most recent call last):\n");
        for entry in traceback {
            out.push_str(&format!(
                "  ╰──►  File {}, line {}, in {}\n",
                entry.file,
                entry.line(),
                entry.context
            ));
        }
        out.push_str(&format!("\n{}\n", self.error));
        let file = traceback.last().map_or("<script>", |entry| &*entry.file);
        if let Some(origin) = &self.origin {
            out.push_str(&format!("File {file}, line {}\n", origin.line()));
            out.push_str(&origin.chunk.highlight(origin.offset));
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for RaisedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

/// Error returned by every operation that runs bytecode.
///
/// Three variants:
/// - `Runtime`: a script error nothing caught
/// - `Resource`: the stack or frame limit was exceeded, never catchable
/// - `Internal`: the bytecode broke the VM's contract (a compiler or VM bug), never catchable
#[derive(Debug, Clone)]
pub enum RunError {
    Runtime(Box<RaisedError>),
    Resource(ResourceError),
    Internal(Cow<'static, str>),
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }

    /// The script-level error, if this is one.
    #[must_use]
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            Self::Runtime(raised) => Some(&raised.error),
            _ => None,
        }
    }

    /// True for errors no catcher frame or safe mode may recover from.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Runtime(_))
    }
}

impl From<RuntimeError> for RunError {
    fn from(error: RuntimeError) -> Self {
        Self::Runtime(Box::new(RaisedError::new(error)))
    }
}

impl From<ResourceError> for RunError {
    fn from(error: ResourceError) -> Self {
        Self::Resource(error)
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime(raised) => write!(f, "{raised}"),
            Self::Resource(err) => write!(f, "{err}"),
            Self::Internal(msg) => write!(f, "internal VM error: {msg}"),
        }
    }
}

impl std::error::Error for RunError {}

pub(crate) type RunResult<T> = Result<T, RunError>;
