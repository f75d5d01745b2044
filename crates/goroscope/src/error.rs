use std::error::Error as StdError;
use std::fmt;
use std::io;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure while compiling or evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalError {
    message: String,
    /// Byte offset into the condition source, for syntax errors.
    offset: Option<usize>,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: None,
        }
    }

    pub fn at(offset: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: Some(offset),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} (at offset {offset})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for EvalError {}

#[derive(Debug)]
pub enum Error {
    /// A header line whose goroutine id is not a valid integer.
    Parse { line: usize, message: String },
    Evaluation(EvalError),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
            Self::Evaluation(err) => write!(f, "invalid condition: {err}"),
            Self::Io(err) => write!(f, "{err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Parse { .. } => None,
            Self::Evaluation(err) => Some(err),
            Self::Io(err) => Some(err),
        }
    }
}

impl From<EvalError> for Error {
    fn from(err: EvalError) -> Self {
        Self::Evaluation(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_error_display_includes_offset() {
        let err = EvalError::at(4, "unexpected token");
        assert_eq!(err.to_string(), "unexpected token (at offset 4)");
        assert_eq!(EvalError::new("boom").to_string(), "boom");
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        assert!(matches!(err, Error::Io(_)));
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "sink closed");
    }
}
