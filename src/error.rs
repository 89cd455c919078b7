use thiserror::Error;

/// What went wrong while decoding a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// A read needed more bytes than the buffer has left
    #[error("truncated stream: needed {wanted} bytes, {available} available")]
    Truncated { wanted: usize, available: usize },
    /// Missing header, or first byte is not the protocol marker
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// Text integer token is not a valid literal
    #[error("malformed number: {0}")]
    MalformedNumber(String),
    /// Opcode needs more operands than the stack holds
    #[error("stack underflow")]
    StackUnderflow,
    /// Opcode needs a value at the stack top and there is none
    #[error("stack empty")]
    StackEmpty,
    /// Collect-to-mark ran off the bottom of the stack
    #[error("no mark on stack")]
    MissingMark,
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// SETITEMS got a key without a value
    #[error("odd number of items for dict: {0}")]
    OddItemCount(usize),
    #[error("memo index {0} not found")]
    MemoMiss(u32),
    /// MEMOIZE has no 32-bit index left to assign
    #[error("memo holds {0} entries, past the last 32-bit index")]
    MemoExhausted(usize),
    #[error("persistent id {0:?} not found")]
    PersistentIdNotFound(String),
    /// Resolver failed for a reason other than absence
    #[error("persistent id resolver failed: {0}")]
    Resolver(String),
    #[error("invalid UTF-8 in text payload")]
    InvalidUtf8,
    /// Only raised in strict mode; otherwise unknown opcodes are skipped
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    /// Only raised in strict mode; stack depth after STOP was not 1
    #[error("stack holds {0} values after STOP, expected 1")]
    UnbalancedStack(usize),
}

/// A decode failure together with the buffer offset it happened at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at offset {offset}")]
pub struct DecodeError {
    pub kind: ErrorKind,
    pub offset: usize,
}

impl DecodeError {
    pub fn new(kind: ErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

/// Setup-time failures while building an opcode table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("opcode 0x{opcode:02x} registered twice ({existing} then {incoming})")]
    DuplicateOpcode {
        opcode: u8,
        existing: &'static str,
        incoming: &'static str,
    },
}

impl RegistryError {
    pub(crate) fn duplicate(opcode: u8, existing: &'static str, incoming: &'static str) -> Self {
        RegistryError::DuplicateOpcode {
            opcode,
            existing,
            incoming,
        }
    }
}

/// Failures of the reference encoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("mark sentinel cannot be encoded")]
    Mark,
    #[error("{0} payload too large to encode")]
    TooLarge(&'static str),
    /// Line-terminated arguments (GLOBAL, PERSID) cannot contain `\n`
    #[error("{0} contains a newline")]
    Newline(&'static str),
    #[error("maximum nesting depth of {0} exceeded")]
    TooDeep(usize),
}

/// Failures of the JSON rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("maximum nesting depth of {0} exceeded")]
    TooDeep(usize),
}

/// Anything the top-level decode entry points can fail with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl Error {
    /// The decode error kind, if this is a decode-time failure.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Error::Decode(e) => Some(&e.kind),
            Error::Registry(_) => None,
        }
    }

    /// Byte offset of a decode-time failure.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Error::Decode(e) => Some(e.offset),
            Error::Registry(_) => None,
        }
    }
}
