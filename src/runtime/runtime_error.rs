use thiserror::Error;

/// Why an operation failed at runtime.
///
/// Object-model operations, builtins and host functions return these; the
/// VM wraps the first one it sees into a [`RuntimeError`] with a trace.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("stack overflow")]
    StackOverflow,

    #[error("object allocation limit exceeded")]
    ObjectAllocLimit,

    #[error("index out of bounds")]
    IndexOutOfBounds,

    #[error("invalid index type: {0}")]
    InvalidIndexType(String),

    #[error("invalid index value type: {0}")]
    InvalidIndexValueType(String),

    #[error("invalid index on error")]
    InvalidIndexOnError,

    #[error("invalid slice index: {low} > {high}")]
    InvalidSliceIndex { low: i64, high: i64 },

    #[error("not indexable: {0}")]
    NotIndexable(String),

    #[error("not index-assignable: {0}")]
    NotIndexAssignable(String),

    #[error("not iterable: {0}")]
    NotIterable(String),

    #[error("not callable: {0}")]
    NotCallable(String),

    #[error("unsupported binary operation: {lhs} {op} {rhs}")]
    UnsupportedBinaryOp {
        lhs: String,
        op: String,
        rhs: String,
    },

    #[error("invalid operator")]
    InvalidOperator,

    #[error("invalid char value: {0}")]
    InvalidChar(i64),

    #[error("division by zero")]
    DivisionByZero,

    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongNumArguments { want: String, got: usize },

    #[error("invalid type for argument '{name}': expected {expected}, found {found}")]
    InvalidArgumentType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("invalid range step: must be > 0, found {0}")]
    InvalidRangeStep(i64),

    #[error("exceeding string size limit")]
    StringLimit,

    #[error("exceeding bytes size limit")]
    BytesLimit,

    #[error("aborted")]
    Aborted,

    #[error("send on closed channel")]
    SendOnClosedChannel,

    #[error("close of closed channel")]
    CloseOfClosedChannel,

    #[error("panic: {message}\n{backtrace}")]
    Panic { message: String, backtrace: String },

    #[error("time out of range")]
    TimeOutOfRange,

    #[error("malformed function: {0}")]
    MalformedFunction(String),

    /// Failure raised by host code through a user function.
    #[error("{0}")]
    Custom(String),
}

impl ErrorKind {
    /// Conditions that stop a VM for good: retrying inside the same VM
    /// cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::ObjectAllocLimit
                | ErrorKind::Aborted
                | ErrorKind::StackOverflow
                | ErrorKind::SendOnClosedChannel
                | ErrorKind::CloseOfClosedChannel
        )
    }

    pub fn wrong_args(want: impl Into<String>, got: usize) -> Self {
        ErrorKind::WrongNumArguments {
            want: want.into(),
            got,
        }
    }

    pub fn invalid_arg(name: &str, expected: &str, found: &str) -> Self {
        ErrorKind::InvalidArgumentType {
            name: name.to_string(),
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        ErrorKind::Custom(message.into())
    }
}

/// A runtime failure surfaced to the host, with the source positions of
/// the failing instruction and each enclosing call.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Runtime Error: {}", self.kind)?;
        for pos in &self.call_stack {
            write!(f, "\n\tat {}", pos)?;
        }
        Ok(())
    }
}

impl RuntimeError {
    pub fn new(kind: ErrorKind) -> Self {
        RuntimeError {
            kind,
            call_stack: Vec::new(),
        }
    }

    /// Append one `at <pos>` line, innermost first.
    pub fn with_context(mut self, pos: impl Into<String>) -> Self {
        self.call_stack.push(pos.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

impl From<ErrorKind> for RuntimeError {
    fn from(kind: ErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}
