use std::fmt;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Io,
    Parse,
    Encoding,
    Compile,
    UnknownType,
    DanglingReference,
    ConstraintViolation,
    InvalidArgument,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub context: String,
    /// 1-based source line, set for parse and encoding failures.
    pub line: Option<usize>,
}

impl Error {
    pub fn new(kind: ErrorKind, context: String) -> Self {
        Error { kind, context, line: None }
    }

    pub fn at_line(kind: ErrorKind, line: usize, context: String) -> Self {
        Error { kind, context, line: Some(line) }
    }

    pub fn parse(line: usize, context: impl Into<String>) -> Self {
        Self::at_line(ErrorKind::Parse, line, context.into())
    }

    pub fn compile(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, context.into())
    }

    pub fn unknown_type(name: &str) -> Self {
        Self::new(ErrorKind::UnknownType, format!("no record set of type '{}'", name))
    }

    pub fn constraint(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstraintViolation, context.into())
    }

    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, context.into())
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{:?} at line {}: {}", self.kind, line, self.context),
            None => write!(f, "{:?}: {}", self.kind, self.context),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::Io, err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::new(ErrorKind::Encoding, err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::new(ErrorKind::Compile, format!("invalid regular expression: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::InvalidArgument, format!("invalid configuration: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
