use std::fmt;

use thiserror::Error;

/// A single schema validation failure recorded by the compiler front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaErrorRecord {
    /// Human readable description of the violation.
    pub message: String,
    /// Enclosing scopes (file, type, field) active when the error was recorded.
    pub scope: Vec<String>,
    /// Source line of the offending declaration, when the parse tree carries one.
    pub line: Option<u32>,
}

impl SchemaErrorRecord {
    /// Returns the scope chain joined with '.'
    pub fn scope_path(&self) -> String {
        self.scope.join(".")
    }
}

impl fmt::Display for SchemaErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.scope.is_empty() {
            write!(f, "{}: ", self.scope_path())?;
        }
        write!(f, "{}", self.message)?;
        if let Some(line) = self.line {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Every error recorded during one compile pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaErrors(pub Vec<SchemaErrorRecord>);

impl SchemaErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaErrorRecord> {
        self.0.iter()
    }

    /// Returns true if any record message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.0.iter().any(|record| record.message.contains(needle))
    }
}

impl fmt::Display for SchemaErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, record) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", record)?;
        }
        Ok(())
    }
}

/// Unified error type for the flatwire library.
#[derive(Error, Debug)]
pub enum Error {
    /// The buffer does not hold a well-formed object graph.
    #[error("Corrupt buffer: {0}")]
    CorruptBuffer(String),

    /// A read or write fell outside the buffer.
    #[error("Out of bounds: offset {offset} + {len} exceeds buffer length {buffer_len}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },

    /// Nesting went deeper than the configured limit while parsing.
    #[error("Maximum nesting depth ({limit}) exceeded")]
    DepthLimitExceeded { limit: usize },

    /// An offset no longer fits in the signed 32-bit range of the wire format.
    #[error("Buffer too large: {0}")]
    BufferTooLarge(String),

    /// The destination buffer cannot hold the object being written.
    #[error("Buffer too small: {needed} bytes needed, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// Attempted to mutate an object that was deserialized as immutable.
    #[error("Object is not mutable: {0}")]
    NotMutable(String),

    /// The operation is not valid for the receiver.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation needs writable memory but the input buffer is read-only.
    #[error("Read-only buffer: {0}")]
    ReadOnlyBuffer(String),

    /// A required table field was absent (fully-qualified field name).
    #[error("Required field '{0}' is missing")]
    RequiredField(String),

    /// A value did not match the type declared in the schema.
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// The field name is not declared by the table or struct.
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// Schema compilation failed; carries every recorded violation.
    #[error("Schema compilation failed with {} error(s):\n{0}", .0.len())]
    Schema(SchemaErrors),

    /// A code generator could not render the compiled schema.
    #[error("Codegen Error: {0}")]
    CodegenError(String),
}

/// A specialized `Result` type for flatwire operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::CodegenError(format!("JSON rendering failed: {}", err))
    }
}

impl Error {
    /// Returns true for the contract-violation class raised when mutating immutable objects.
    pub fn is_not_mutable(&self) -> bool {
        matches!(self, Error::NotMutable(_))
    }

    /// Returns true for errors raised because the buffer content is unusable.
    pub fn is_corrupt_buffer(&self) -> bool {
        matches!(
            self,
            Error::CorruptBuffer(_) | Error::OutOfBounds { .. } | Error::DepthLimitExceeded { .. }
        )
    }
}
