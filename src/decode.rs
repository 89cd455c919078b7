use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::cursor::Cursor;
use crate::error::{DecodeError, Error, ErrorKind};
use crate::memo::Memo;
use crate::opcodes::HEADER_MARKER;
use crate::options::DecodeOptions;
use crate::registry::OpcodeRegistry;
use crate::report::{DecodeReport, Warning};
use crate::resolver::{NoResolver, ResolveError, Resolver};
use crate::types::{DictRef, ListRef, Value};

/// Decode a stream that carries no persistent references.
///
/// Returns the single value left on the stack at STOP together with a
/// report of skipped opcodes and tolerated irregularities.
pub fn decode(data: &[u8]) -> Result<(Value, DecodeReport), Error> {
    Decoder::new(&NoResolver).decode(data)
}

/// Decode a stream, resolving PERSID/BINPERSID ids through `resolver`.
pub fn decode_with(data: &[u8], resolver: &dyn Resolver) -> Result<(Value, DecodeReport), Error> {
    Decoder::new(resolver).decode(data)
}

/// Reusable decode configuration: a resolver plus options.
///
/// Each call to [`Decoder::decode`] builds its own stack, memo and cursor,
/// so one `Decoder` can serve many buffers.
pub struct Decoder<'r> {
    resolver: &'r dyn Resolver,
    options: DecodeOptions,
}

impl<'r> Decoder<'r> {
    pub fn new(resolver: &'r dyn Resolver) -> Self {
        Self {
            resolver,
            options: DecodeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Decode with the standard opcode table for the header's version.
    pub fn decode(&self, data: &[u8]) -> Result<(Value, DecodeReport), Error> {
        let version = read_header(data)?;
        let registry = OpcodeRegistry::for_protocol(version)?;
        Ok(self.run(data, version, &registry)?)
    }

    /// Decode with a caller-built opcode table, e.g. one extended with
    /// extra handlers. The header is still validated.
    pub fn decode_with_registry(
        &self,
        data: &[u8],
        registry: &OpcodeRegistry,
    ) -> Result<(Value, DecodeReport), Error> {
        let version = read_header(data)?;
        Ok(self.run(data, version, registry)?)
    }

    fn run(
        &self,
        data: &[u8],
        version: u8,
        registry: &OpcodeRegistry,
    ) -> Result<(Value, DecodeReport), DecodeError> {
        debug!(target: "pickle_stream::decode", version, len = data.len(), "decoding stream");
        let mut cursor = Cursor::at(data, 2);
        let mut machine = Machine::new(version, self.resolver, &self.options);
        machine.run(&mut cursor, registry)?;
        machine
            .finish()
            .map_err(|kind| DecodeError::new(kind, cursor.position()))
    }
}

/// Validate the two-byte header and return the protocol version.
fn read_header(data: &[u8]) -> Result<u8, DecodeError> {
    match data {
        [HEADER_MARKER, version, ..] => Ok(*version),
        [first, _, ..] => Err(DecodeError::new(
            ErrorKind::MalformedHeader(format!(
                "expected marker 0x{HEADER_MARKER:02x}, found 0x{first:02x}"
            )),
            0,
        )),
        _ => Err(DecodeError::new(
            ErrorKind::MalformedHeader(format!("{} bytes, need 2", data.len())),
            0,
        )),
    }
}

/// Operand stack, memo table and report for one decode.
///
/// Opcode handlers receive this alongside the cursor. `Value::Mark`
/// entries on the stack delimit variable-length runs; the value-level
/// accessors treat a mark as the bottom of the stack.
pub struct Machine<'r> {
    stack: Vec<Value>,
    memo: Memo,
    report: DecodeReport,
    resolver: &'r dyn Resolver,
    options: &'r DecodeOptions,
    version: u8,
    op_offset: usize,
}

impl<'r> Machine<'r> {
    fn new(version: u8, resolver: &'r dyn Resolver, options: &'r DecodeOptions) -> Self {
        Self {
            stack: Vec::with_capacity(16),
            memo: Memo::new(),
            report: DecodeReport::new(version),
            resolver,
            options,
            version,
            op_offset: 0,
        }
    }

    fn run(&mut self, cursor: &mut Cursor<'_>, registry: &OpcodeRegistry) -> Result<(), DecodeError> {
        while !self.report.stopped && !cursor.is_at_end() {
            let offset = cursor.position();
            let op = cursor
                .read_u8()
                .map_err(|kind| DecodeError::new(kind, offset))?;
            let Some(entry) = registry.get(op) else {
                if self.options.strict {
                    return Err(DecodeError::new(ErrorKind::UnknownOpcode(op), offset));
                }
                warn!(target: "pickle_stream::decode", offset, opcode = op, "skipping unknown opcode");
                self.report
                    .skip(offset, op, cursor.peek_ahead(self.options.skip_context));
                continue;
            };
            trace!(
                target: "pickle_stream::decode",
                offset,
                opcode = entry.name,
                depth = self.stack.len(),
                "dispatch"
            );
            self.op_offset = offset;
            (entry.handler)(cursor, self).map_err(|kind| {
                // Read failures point at the byte the read started from;
                // everything else at the opcode itself.
                let at = match kind {
                    ErrorKind::Truncated { .. } | ErrorKind::InvalidUtf8 => cursor.position(),
                    _ => offset,
                };
                DecodeError::new(kind, at)
            })?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(Value, DecodeReport), ErrorKind> {
        if !self.report.stopped {
            warn!(target: "pickle_stream::decode", "stream ended without STOP");
            self.report.warn(Warning::MissingStop);
        }
        let depth = self.stack.len();
        let value = match self.stack.pop() {
            Some(Value::Mark) | None => return Err(ErrorKind::StackEmpty),
            Some(value) => value,
        };
        if depth > 1 {
            if self.options.strict {
                return Err(ErrorKind::UnbalancedStack(depth));
            }
            warn!(target: "pickle_stream::decode", depth, "values left on stack after STOP");
            self.report.warn(Warning::StackResidue { depth });
        }
        Ok((value, self.report))
    }

    // -- Stack operations --

    #[inline]
    pub fn push(&mut self, val: Value) {
        self.stack.push(val);
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// Pop one value; a mark at the top counts as an empty stack.
    pub fn pop_value(&mut self) -> Result<Value, ErrorKind> {
        match self.stack.last() {
            None | Some(Value::Mark) => Err(ErrorKind::StackUnderflow),
            Some(_) => self.stack.pop().ok_or(ErrorKind::StackUnderflow),
        }
    }

    /// Pop `n` values, returned in the order they were pushed.
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ErrorKind> {
        let len = self.stack.len();
        if len < n || self.stack[len - n..].iter().any(Value::is_mark) {
            return Err(ErrorKind::StackUnderflow);
        }
        Ok(self.stack.split_off(len - n))
    }

    /// Pop anything, mark included.
    pub fn discard_top(&mut self) -> Result<Value, ErrorKind> {
        self.stack.pop().ok_or(ErrorKind::StackEmpty)
    }

    pub fn peek_value(&self) -> Result<&Value, ErrorKind> {
        match self.stack.last() {
            None | Some(Value::Mark) => Err(ErrorKind::StackEmpty),
            Some(v) => Ok(v),
        }
    }

    /// Pop everything above the topmost mark, then the mark itself.
    /// Items come back in push order. Without a mark the stack is left
    /// untouched.
    pub fn collect_to_mark(&mut self) -> Result<Vec<Value>, ErrorKind> {
        let mark = self
            .stack
            .iter()
            .rposition(Value::is_mark)
            .ok_or(ErrorKind::MissingMark)?;
        let items = self.stack.split_off(mark + 1);
        self.stack.pop();
        Ok(items)
    }

    /// The list at the stack top, without popping it.
    pub fn top_list(&self) -> Result<ListRef, ErrorKind> {
        match self.stack.last() {
            None => Err(ErrorKind::StackUnderflow),
            Some(Value::List(items)) => Ok(Rc::clone(items)),
            Some(other) => Err(ErrorKind::TypeMismatch {
                expected: "List",
                found: other.kind_name(),
            }),
        }
    }

    /// The dict at the stack top, without popping it.
    pub fn top_dict(&self) -> Result<DictRef, ErrorKind> {
        match self.stack.last() {
            None => Err(ErrorKind::StackUnderflow),
            Some(Value::Dict(pairs)) => Ok(Rc::clone(pairs)),
            Some(other) => Err(ErrorKind::TypeMismatch {
                expected: "Dict",
                found: other.kind_name(),
            }),
        }
    }

    // -- Memo --

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    /// Memoize the stack top (a shared handle, not a copy).
    pub fn memo_put(&mut self, index: u32) -> Result<(), ErrorKind> {
        let val = self.peek_value()?.clone();
        debug!(target: "pickle_stream::memo", index, kind = val.kind_name(), "memo put");
        self.memo.insert(index, val);
        Ok(())
    }

    pub fn memo_get(&mut self, index: u32) -> Result<(), ErrorKind> {
        let val = self.memo.lookup(index).ok_or(ErrorKind::MemoMiss(index))?;
        self.push(val);
        Ok(())
    }

    // -- Context --

    /// Protocol version from the stream header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Offset of the opcode currently being executed.
    pub fn op_offset(&self) -> usize {
        self.op_offset
    }

    pub fn options(&self) -> &DecodeOptions {
        self.options
    }

    pub fn warn(&mut self, warning: Warning) {
        self.report.warn(warning);
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.report.stopped = true;
    }

    /// Look up a persistent id; absence becomes `PersistentIdNotFound`.
    pub fn resolve(&self, id: &str) -> Result<Vec<u8>, ErrorKind> {
        debug!(target: "pickle_stream::persid", id, "resolving persistent id");
        self.resolver.resolve(id).map_err(|e| match e {
            ResolveError::NotFound => ErrorKind::PersistentIdNotFound(id.to_string()),
            other => ErrorKind::Resolver(other.to_string()),
        })
    }
}
