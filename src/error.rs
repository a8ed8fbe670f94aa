use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing, loading, storing or filtering variables.
///
/// Messages carry variable names and positions but never variable values,
/// since `.env` files routinely hold secrets.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("environment file {} is either not found, not a file or not readable", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 input: {0}")]
    InvalidEncoding(#[from] std::string::FromUtf8Error),

    #[error("variables already loaded, flush existing variables before loading again")]
    AlreadyLoaded,

    #[error(
        "variable {name} can't be overwritten, discard it or hard-flush variables to change its value"
    )]
    Overwrite { name: String },

    #[error("can't {action} \"{name}\" because variables are read-only")]
    ReadOnly { name: String, action: &'static str },

    #[error("can't {action} variables because they are read-only")]
    ReadOnlyVars { action: &'static str },

    #[error("{name} {message}")]
    Filter { name: String, message: String },

    #[error("{id} is not a valid filter name")]
    UnknownFilter { id: String },

    #[error("filter name \"{id}\" is already registered")]
    FilterAlreadyRegistered { id: String },

    #[error("invalid arguments for filter \"{id}\": {message}")]
    FilterArgs { id: String, message: String },

    #[error("can't add filters to {name} because its filtered value is already cached")]
    FilterAfterCache { name: String },

    #[error("variable name must be a non-empty string")]
    InvalidName,

    #[error("value of {name} can't be stored in the process environment")]
    InvalidValue { name: String },

    #[error("{} is not a valid directory", path.display())]
    InvalidDirectory { path: PathBuf },

    #[error("loaded variable names are not held by this instance")]
    NamesNotHeld,
}

/// A line that could not be turned into a variable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ParseError {
    pub line: u32,
    pub column: u32,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn new(line: u32, column: u32, kind: ParseErrorKind) -> Self {
        Self { line, column, kind }
    }

    pub(crate) fn at_line(mut self, line: u32) -> Self {
        self.line = line;
        self
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "parse error at line {}, column {}: {}",
            self.line, self.column, self.kind
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// An unquoted value contains whitespace.
    MalformedValue { name: String },
}

impl Display for ParseErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedValue { name } => write!(
                f,
                "value of {name} contains whitespace and must be surrounded by quotes"
            ),
        }
    }
}

/// Rejection raised by a single filter.
///
/// The variable name is not known at this level; the filter chain wraps it
/// into [`Error::Filter`] with the name prepended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FilterError {
    pub message: String,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn for_variable(self, name: &str) -> Error {
        Error::Filter {
            name: name.to_owned(),
            message: self.message,
        }
    }
}
