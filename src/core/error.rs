// Error taxonomy shared by the value model, tables and file sessions.
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    UnknownFormat,
    HeaderParse,
    Io,
    TypeMismatch,
    SchemaMismatch,
    UnsupportedConversion,
    ColumnNotFound,
    RowNotFound,
    DuplicateColumn,
    IndexOutOfRange,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    path: Option<PathBuf>,
    index: Option<usize>,
    offset: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            path: None,
            index: None,
            offset: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(index) = self.index {
            write!(f, " (index: {index})")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " (offset: {offset})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::UnknownFormat => 3,
        ErrorKind::HeaderParse => 4,
        ErrorKind::Io => 5,
        ErrorKind::TypeMismatch => 6,
        ErrorKind::SchemaMismatch => 7,
        ErrorKind::UnsupportedConversion => 8,
        ErrorKind::ColumnNotFound => 9,
        ErrorKind::RowNotFound => 10,
        ErrorKind::DuplicateColumn => 11,
        ErrorKind::IndexOutOfRange => 12,
    }
}

/// Shorthand for the `Usage` errors raised by misused sessions.
pub(crate) fn usage(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Usage).with_message(message)
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use std::error::Error as StdError;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::UnknownFormat, 3),
            (ErrorKind::HeaderParse, 4),
            (ErrorKind::Io, 5),
            (ErrorKind::TypeMismatch, 6),
            (ErrorKind::SchemaMismatch, 7),
            (ErrorKind::UnsupportedConversion, 8),
            (ErrorKind::ColumnNotFound, 9),
            (ErrorKind::RowNotFound, 10),
            (ErrorKind::DuplicateColumn, 11),
            (ErrorKind::IndexOutOfRange, 12),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::Io)
            .with_message("short read")
            .with_path("/tmp/stack.mrcs")
            .with_index(3)
            .with_offset(2048);
        assert_eq!(
            err.to_string(),
            "Io: short read (path: /tmp/stack.mrcs) (index: 3) (offset: 2048)"
        );
    }

    #[test]
    fn source_is_exposed() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = Error::new(ErrorKind::Io).with_source(io);
        assert!(err.source().is_some());
    }
}
