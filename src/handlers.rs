//! Opcode semantics.
//!
//! Each handler is a plain function so the tables below can be consulted
//! by the registry without any per-decode state.

use std::str::FromStr;

use num_bigint::BigInt;
use tracing::{debug, trace, warn};

use crate::cursor::Cursor;
use crate::decode::Machine;
use crate::error::ErrorKind;
use crate::opcodes::*;
use crate::registry::Handler;
use crate::report::Warning;
use crate::types::{dict_set, IntWidth, Origin, Value};

/// Always registered.
pub(crate) const BASELINE: &[(u8, Handler)] = &[
    (STOP, stop),
    (MARK, mark),
    (POP, pop),
    (POP_MARK, pop_mark),
    (DUP, dup),
    (NONE, none),
    (EMPTY_DICT, empty_dict),
    (EMPTY_LIST, empty_list),
    (EMPTY_TUPLE, empty_tuple),
    (BININT1, binint1),
    (BININT2, binint2),
    (BININT, binint),
    (INT, int),
    (LONG, long),
    (FLOAT, float),
    (BINFLOAT, binfloat),
    (SHORT_BINUNICODE, short_binunicode),
    (BINUNICODE, binunicode),
    (BINUNICODE8, binunicode8),
    (UNICODE, unicode),
    (SHORT_BINBYTES, short_binbytes),
    (BINBYTES, binbytes),
    (BINBYTES8, binbytes8),
    (SHORT_BINSTRING, short_binstring),
    (BINSTRING, binstring),
    (GLOBAL, global),
    (GET, get),
    (PUT, put),
    (APPEND, append),
    (APPENDS, appends),
    (LIST, list),
    (SETITEM, setitem),
    (SETITEMS, setitems),
    (DICT, dict),
    (TUPLE, tuple),
    (BUILD, build),
    (REDUCE, reduce),
];

/// Registered for header version >= 2.
pub(crate) const PROTOCOL_2: &[(u8, Handler)] = &[
    (PROTO, proto),
    (BINPUT, binput),
    (LONG_BINPUT, long_binput),
    (BINGET, binget),
    (LONG_BINGET, long_binget),
    (TUPLE1, tuple1),
    (TUPLE2, tuple2),
    (TUPLE3, tuple3),
    (NEWTRUE, newtrue),
    (NEWFALSE, newfalse),
    (LONG1, long1),
    (LONG4, long4),
    (PERSID, persid),
    (BINPERSID, binpersid),
];

/// Registered for header version >= 4.
pub(crate) const PROTOCOL_4: &[(u8, Handler)] = &[
    (FRAME, frame),
    (MEMOIZE, memoize),
    (STACK_GLOBAL, stack_global),
];

type Op = Result<(), ErrorKind>;

// -- Control --

fn stop(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.mark_stopped();
    Ok(())
}

fn proto(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let declared = cur.read_u8()?;
    if declared != m.version() {
        warn!(target: "pickle_stream::decode", header = m.version(), declared, "PROTO disagrees with header");
        m.warn(Warning::ProtocolMismatch {
            header: m.version(),
            declared,
        });
    }
    Ok(())
}

fn frame(cur: &mut Cursor<'_>, _: &mut Machine<'_>) -> Op {
    // Frames only group opcodes for buffered reading; the contents follow
    // inline.
    let len = cur.read_u64_le()?;
    trace!(target: "pickle_stream::decode", len, "frame");
    Ok(())
}

// -- Stack manipulation --

fn mark(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::Mark);
    Ok(())
}

fn pop(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.discard_top()?;
    Ok(())
}

fn pop_mark(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.collect_to_mark()?;
    Ok(())
}

fn dup(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let top = m.peek_value()?.clone();
    m.push(top);
    Ok(())
}

// -- Scalars --

fn none(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::None);
    Ok(())
}

fn newtrue(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::bool(true));
    Ok(())
}

fn newfalse(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::bool(false));
    Ok(())
}

fn binint1(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let val = cur.read_u8()?;
    m.push(Value::int(IntWidth::One, val as u32));
    Ok(())
}

fn binint2(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let val = cur.read_u16_le()?;
    m.push(Value::int(IntWidth::Two, val as u32));
    Ok(())
}

fn binint(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let val = cur.read_u32_le()?;
    m.push(Value::int(IntWidth::Four, val));
    Ok(())
}

fn int(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let token = cur.read_until_newline()?.trim();
    // INT doubles as the protocol 0 boolean encoding.
    match token {
        "00" => m.push(Value::bool(false)),
        "01" => m.push(Value::bool(true)),
        _ => push_decimal(m, token)?,
    }
    Ok(())
}

fn long(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let token = cur.read_until_newline()?.trim();
    push_decimal(m, token.strip_suffix('L').unwrap_or(token))
}

/// Parse a decimal literal of any size; values beyond 64 bits keep their
/// low 64 bits and are flagged.
fn push_decimal(m: &mut Machine<'_>, token: &str) -> Op {
    if token.len() > m.options().max_long_digits {
        return Err(ErrorKind::MalformedNumber(format!(
            "{} digit literal exceeds limit of {}",
            token.len(),
            m.options().max_long_digits
        )));
    }
    if let Ok(v) = token.parse::<i64>() {
        m.push(Value::long(v));
        return Ok(());
    }
    let big = BigInt::from_str(token)
        .map_err(|_| ErrorKind::MalformedNumber(format!("{token:?}")))?;
    let bytes = big.to_signed_bytes_le();
    let truncated = Cursor::new(&bytes).read_signed_variable_length(bytes.len())?;
    push_long(m, truncated.value, true);
    Ok(())
}

fn push_long(m: &mut Machine<'_>, value: i64, overflowed: bool) {
    if overflowed {
        warn!(target: "pickle_stream::decode", offset = m.op_offset(), value, "long truncated to 64 bits");
        m.warn(Warning::LongOverflow {
            offset: m.op_offset(),
        });
    }
    m.push(Value::Long { value, overflowed });
}

fn long1(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let n = cur.read_u8()? as usize;
    let v = cur.read_signed_variable_length(n)?;
    push_long(m, v.value, v.overflowed);
    Ok(())
}

fn long4(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let n = cur.read_u32_le()? as usize;
    let v = cur.read_signed_variable_length(n)?;
    push_long(m, v.value, v.overflowed);
    Ok(())
}

fn float(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let token = cur.read_until_newline()?.trim();
    let val: f64 = token
        .parse()
        .map_err(|_| ErrorKind::MalformedNumber(format!("{token:?}")))?;
    m.push(Value::Float(val));
    Ok(())
}

fn binfloat(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let val = cur.read_f64_be()?;
    m.push(Value::Float(val));
    Ok(())
}

// -- Text and bytes --

/// Length prefix of a counted payload; `None` for newline-terminated ones.
fn read_len(cur: &mut Cursor<'_>, origin: Origin) -> Result<Option<u64>, ErrorKind> {
    Ok(match origin {
        Origin::Short => Some(cur.read_u8()? as u64),
        Origin::Long => Some(cur.read_u32_le()? as u64),
        Origin::Wide => Some(cur.read_u64_le()?),
        Origin::Line => None,
    })
}

fn read_payload<'a>(cur: &mut Cursor<'a>, len: Option<u64>) -> Result<&'a [u8], ErrorKind> {
    match len {
        Some(n) => cur.read_bytes_u64(n),
        None => cur.read_line(),
    }
}

fn push_text(cur: &mut Cursor<'_>, m: &mut Machine<'_>, origin: Origin) -> Op {
    let len = read_len(cur, origin)?;
    let start = cur.position();
    let bytes = read_payload(cur, len)?;
    let value = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            cur.rewind_to(start);
            return Err(ErrorKind::InvalidUtf8);
        }
    };
    m.push(Value::Text { value, origin });
    Ok(())
}

fn push_bytes(cur: &mut Cursor<'_>, m: &mut Machine<'_>, origin: Origin) -> Op {
    let len = read_len(cur, origin)?;
    let data = read_payload(cur, len)?.to_vec();
    m.push(Value::Bytes { data, origin });
    Ok(())
}

fn short_binunicode(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_text(cur, m, Origin::Short)
}

fn binunicode(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_text(cur, m, Origin::Long)
}

fn binunicode8(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_text(cur, m, Origin::Wide)
}

fn unicode(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_text(cur, m, Origin::Line)
}

fn short_binbytes(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_bytes(cur, m, Origin::Short)
}

fn binbytes(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_bytes(cur, m, Origin::Long)
}

fn binbytes8(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_bytes(cur, m, Origin::Wide)
}

// Python 2 str payloads carry no encoding, so they stay bytes.
fn short_binstring(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_bytes(cur, m, Origin::Short)
}

fn binstring(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    push_bytes(cur, m, Origin::Long)
}

// -- Global references --

fn global(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let module = cur.read_until_newline()?;
    let name = cur.read_until_newline()?;
    m.push(Value::global(module, name));
    Ok(())
}

fn stack_global(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let parts = m.pop_n(2)?;
    match (&parts[0], &parts[1]) {
        (Value::Text { value: module, .. }, Value::Text { value: name, .. }) => {
            let global = Value::global(module.as_str(), name.as_str());
            m.push(global);
            Ok(())
        }
        (Value::Text { .. }, other) | (other, _) => Err(ErrorKind::TypeMismatch {
            expected: "Text",
            found: other.kind_name(),
        }),
    }
}

// -- Memo --

fn parse_index(token: &str) -> Result<u32, ErrorKind> {
    token
        .trim()
        .parse()
        .map_err(|_| ErrorKind::MalformedNumber(format!("memo index {token:?}")))
}

fn put(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = parse_index(cur.read_until_newline()?)?;
    m.memo_put(index)
}

fn binput(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = cur.read_u8()?;
    m.memo_put(index as u32)
}

fn long_binput(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = cur.read_u32_le()?;
    m.memo_put(index)
}

fn memoize(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = m.memo().next_index()?;
    m.memo_put(index)
}

fn get(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = parse_index(cur.read_until_newline()?)?;
    m.memo_get(index)
}

fn binget(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = cur.read_u8()?;
    m.memo_get(index as u32)
}

fn long_binget(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let index = cur.read_u32_le()?;
    m.memo_get(index)
}

// -- Lists --

fn empty_list(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::list(Vec::new()));
    Ok(())
}

fn append(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    if m.stack().len() < 2 {
        return Err(ErrorKind::StackUnderflow);
    }
    let item = m.pop_value()?;
    let list = m.top_list()?;
    list.borrow_mut().push(item);
    Ok(())
}

fn appends(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let items = m.collect_to_mark()?;
    let list = m.top_list()?;
    list.borrow_mut().extend(items);
    Ok(())
}

fn list(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let items = m.collect_to_mark()?;
    m.push(Value::list(items));
    Ok(())
}

// -- Dicts --

fn empty_dict(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::dict(Vec::new()));
    Ok(())
}

fn setitem(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    if m.stack().len() < 3 {
        return Err(ErrorKind::StackUnderflow);
    }
    let value = m.pop_value()?;
    let key = m.pop_value()?;
    let dict = m.top_dict()?;
    dict_set(&dict, key, value);
    Ok(())
}

/// Split a collected `[k1, v1, k2, v2, ...]` run into pairs.
fn into_pairs(items: Vec<Value>, text_keys: bool) -> Result<Vec<(Value, Value)>, ErrorKind> {
    if items.len() % 2 != 0 {
        return Err(ErrorKind::OddItemCount(items.len()));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        if text_keys && !matches!(k, Value::Text { .. }) {
            return Err(ErrorKind::TypeMismatch {
                expected: "Text",
                found: k.kind_name(),
            });
        }
        pairs.push((k, v));
    }
    Ok(pairs)
}

fn setitems(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let items = m.collect_to_mark()?;
    let pairs = into_pairs(items, true)?;
    let dict = m.top_dict()?;
    for (k, v) in pairs {
        dict_set(&dict, k, v);
    }
    Ok(())
}

fn dict(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let items = m.collect_to_mark()?;
    let pairs = into_pairs(items, false)?;
    m.push(Value::dict(pairs));
    Ok(())
}

// -- Tuples --

fn empty_tuple(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    m.push(Value::tuple(Vec::new()));
    Ok(())
}

fn tuple(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let items = m.collect_to_mark()?;
    m.push(Value::tuple(items));
    Ok(())
}

fn tuple_n(m: &mut Machine<'_>, n: usize) -> Op {
    let items = m.pop_n(n)?;
    m.push(Value::tuple(items));
    Ok(())
}

fn tuple1(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    tuple_n(m, 1)
}

fn tuple2(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    tuple_n(m, 2)
}

fn tuple3(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    tuple_n(m, 3)
}

// -- Object construction (never executed) --

/// Merges a dict state into a dict object below it. Anything else is left
/// alone: without class loading there is no object to apply state to.
fn build(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    if m.stack().len() < 2 {
        return Err(ErrorKind::StackUnderflow);
    }
    let state = m.pop_value()?;
    let obj = m.peek_value()?;
    match (obj, &state) {
        (Value::Dict(target), Value::Dict(source)) => {
            if !std::rc::Rc::ptr_eq(target, source) {
                let target = target.clone();
                let pairs = source.borrow().pairs().to_vec();
                for (k, v) in pairs {
                    dict_set(&target, k, v);
                }
            }
        }
        (obj, state) => {
            debug!(
                target: "pickle_stream::decode",
                obj = obj.kind_name(),
                state = state.kind_name(),
                "BUILD not applied"
            );
            let offset = m.op_offset();
            m.warn(Warning::BuildIgnored { offset });
        }
    }
    Ok(())
}

fn reduce(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let offset = m.op_offset();
    warn!(target: "pickle_stream::decode", offset, "REDUCE ignored; callables are never invoked");
    m.warn(Warning::ReduceIgnored { offset });
    Ok(())
}

// -- Persistent references --

fn persid(cur: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let id = cur.read_until_newline()?;
    let payload = m.resolve(id)?;
    m.push(Value::PersistentRef {
        id: id.to_string(),
        payload: payload.into(),
    });
    Ok(())
}

/// The id is the text at position 2 of the tuple on top of the stack,
/// as in `('storage', <type>, '<key>', '<location>', <numel>)`.
fn binpersid(_: &mut Cursor<'_>, m: &mut Machine<'_>) -> Op {
    let id = match m.peek_value()? {
        Value::Tuple(items) if items.len() >= 3 => match &items[2] {
            Value::Text { value, .. } => value.clone(),
            other => {
                return Err(ErrorKind::TypeMismatch {
                    expected: "Text persistent id",
                    found: other.kind_name(),
                })
            }
        },
        other => {
            return Err(ErrorKind::TypeMismatch {
                expected: "Tuple of at least 3 items",
                found: other.kind_name(),
            })
        }
    };
    let payload = m.resolve(&id)?;
    m.pop_value()?;
    m.push(Value::PersistentRef {
        id,
        payload: payload.into(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::decode::{decode, decode_with};
    use crate::error::ErrorKind;
    use crate::report::Warning;
    use crate::resolver::MapResolver;
    use crate::types::{IntWidth, Origin, Value};

    fn ok(data: &[u8]) -> Value {
        decode(data).unwrap().0
    }

    fn fails(data: &[u8]) -> ErrorKind {
        decode(data).unwrap_err().kind().cloned().unwrap()
    }

    fn k1(v: u32) -> Value {
        Value::int(IntWidth::One, v)
    }

    #[test]
    fn test_fixed_width_ints() {
        assert_eq!(ok(b"\x80\x02K\x2a."), k1(42));
        assert_eq!(ok(b"\x80\x02M\x34\x12."), Value::int(IntWidth::Two, 0x1234));
        assert_eq!(
            ok(b"\x80\x02J\xff\xff\xff\xff."),
            Value::int(IntWidth::Four, u32::MAX)
        );
    }

    #[test]
    fn test_bools() {
        assert_eq!(ok(b"\x80\x02\x88."), k1(1));
        assert_eq!(ok(b"\x80\x02\x89."), k1(0));
        assert_eq!(ok(b"\x80\x00I01\n."), k1(1));
        assert_eq!(ok(b"\x80\x00I00\n."), k1(0));
    }

    #[test]
    fn test_long_text() {
        assert_eq!(ok(b"\x80\x02L-12345L\n."), Value::long(-12345));
        assert_eq!(ok(b"\x80\x02I77\n."), Value::long(77));
        assert!(matches!(
            fails(b"\x80\x02L12a\n."),
            ErrorKind::MalformedNumber(_)
        ));
        assert!(matches!(fails(b"\x80\x02L\n."), ErrorKind::MalformedNumber(_)));
    }

    #[test]
    fn test_long_text_overflow_is_flagged() {
        // 2**64 + 5
        let (value, report) = decode(b"\x80\x02L18446744073709551621\n.").unwrap();
        assert_eq!(
            value,
            Value::Long {
                value: 5,
                overflowed: true
            }
        );
        assert_eq!(report.warnings, vec![Warning::LongOverflow { offset: 2 }]);
    }

    #[test]
    fn test_long_text_digit_limit() {
        let mut data = b"\x80\x02L".to_vec();
        data.extend(std::iter::repeat(b'9').take(20_000));
        data.extend_from_slice(b"\n.");
        let kind = fails(&data);
        assert!(matches!(kind, ErrorKind::MalformedNumber(ref msg) if msg.contains("limit")));
    }

    #[test]
    fn test_long1() {
        assert_eq!(ok(b"\x80\x02\x8a\x01\xff."), Value::long(-1));
        assert_eq!(ok(b"\x80\x02\x8a\x02\xe8\x03."), Value::long(1000));
    }

    #[test]
    fn test_long1_zero_length() {
        // No payload bytes: the very next byte is the following opcode.
        let value = ok(b"\x80\x02(\x8a\x00K\x07t.");
        assert_eq!(value, Value::tuple(vec![Value::long(0), k1(7)]));
        assert_eq!(value.as_tuple().unwrap()[0].as_i64(), Some(0));
    }

    #[test]
    fn test_long4_overflow() {
        let mut data = b"\x80\x02\x8b\x09\x00\x00\x00".to_vec();
        data.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0, 1]);
        data.push(b'.');
        let (value, report) = decode(&data).unwrap();
        assert_eq!(
            value,
            Value::Long {
                value: 1,
                overflowed: true
            }
        );
        assert_eq!(value.as_i64(), None);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_long4_truncated() {
        assert!(matches!(
            fails(b"\x80\x02\x8b\xff\xff\xff\xff\x00."),
            ErrorKind::Truncated { .. }
        ));
    }

    #[test]
    fn test_floats() {
        let mut data = b"\x80\x02G".to_vec();
        data.extend_from_slice(&1.5f64.to_be_bytes());
        data.push(b'.');
        assert_eq!(ok(&data), Value::Float(1.5));
        assert_eq!(ok(b"\x80\x00F-0.25\n."), Value::Float(-0.25));
        assert!(matches!(fails(b"\x80\x00Fx\n."), ErrorKind::MalformedNumber(_)));
    }

    #[test]
    fn test_text_variants() {
        let expected = Value::text("hello");
        assert_eq!(ok(b"\x80\x02\x8c\x05hello."), expected);
        assert_eq!(ok(b"\x80\x02X\x05\x00\x00\x00hello."), expected);
        assert_eq!(
            ok(b"\x80\x02\x8d\x05\x00\x00\x00\x00\x00\x00\x00hello."),
            expected
        );
        assert_eq!(ok(b"\x80\x02Vhello\n."), expected);

        match ok(b"\x80\x02\x8d\x05\x00\x00\x00\x00\x00\x00\x00hello.") {
            Value::Text { origin, .. } => assert_eq!(origin, Origin::Wide),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_text_invalid_utf8() {
        assert_eq!(fails(b"\x80\x02\x8c\x02\xff\xfe."), ErrorKind::InvalidUtf8);
    }

    #[test]
    fn test_text_payload_errors_point_at_payload() {
        // Both failures start at the payload, one byte past the length.
        let bad_utf8 = decode(b"\x80\x02\x8c\x02\xff\xfe.").unwrap_err();
        assert_eq!(bad_utf8.offset(), Some(4));
        let truncated = decode(b"\x80\x02\x8c\x05ab").unwrap_err();
        assert!(matches!(truncated.kind(), Some(ErrorKind::Truncated { .. })));
        assert_eq!(truncated.offset(), Some(4));

        let bad_utf8 = decode(b"\x80\x02X\x01\x00\x00\x00\xff.").unwrap_err();
        assert_eq!(bad_utf8.offset(), Some(7));
    }

    #[test]
    fn test_bytes_variants() {
        let expected = Value::bytes(vec![0u8, 1, 255]);
        assert_eq!(ok(b"\x80\x02C\x03\x00\x01\xff."), expected);
        assert_eq!(ok(b"\x80\x02B\x03\x00\x00\x00\x00\x01\xff."), expected);
        assert_eq!(
            ok(b"\x80\x02\x8e\x03\x00\x00\x00\x00\x00\x00\x00\x00\x01\xff."),
            expected
        );
        assert_eq!(ok(b"\x80\x02U\x03\x00\x01\xff."), expected);
        assert_eq!(ok(b"\x80\x02T\x03\x00\x00\x00\x00\x01\xff."), expected);
    }

    #[test]
    fn test_declared_length_exceeds_buffer() {
        for data in [
            &b"\x80\x02C\xff\x00."[..],
            &b"\x80\x02B\xff\xff\xff\xff\x00."[..],
            &b"\x80\x02X\xff\xff\xff\x7f."[..],
            &b"\x80\x02\x8e\x00\x00\x00\x00\x00\x01\x00\x00."[..],
            &b"\x80\x02\x8d\xff\xff\xff\xff\xff\xff\xff\xff."[..],
        ] {
            assert!(
                matches!(fails(data), ErrorKind::Truncated { .. }),
                "expected truncation for {data:?}"
            );
        }
    }

    #[test]
    fn test_global_is_inert() {
        assert_eq!(
            ok(b"\x80\x02cos\nsystem\n."),
            Value::global("os", "system")
        );
        assert!(matches!(
            fails(b"\x80\x02cos\nsystem"),
            ErrorKind::Truncated { .. }
        ));
    }

    #[test]
    fn test_stack_global() {
        assert_eq!(
            ok(b"\x80\x04\x8c\x07torch._\x8c\x05utils\x93."),
            Value::global("torch._", "utils")
        );
        assert!(matches!(
            fails(b"\x80\x04K\x01\x8c\x01x\x93."),
            ErrorKind::TypeMismatch { found: "Int", .. }
        ));
    }

    #[test]
    fn test_memo_roundtrip_and_miss() {
        assert_eq!(ok(b"\x80\x02K\x05q\x00\x30h\x00."), k1(5));
        assert_eq!(ok(b"\x80\x02K\x05r\x00\x01\x00\x00\x30j\x00\x01\x00\x00."), k1(5));
        assert_eq!(ok(b"\x80\x00K\x05p3\n0g3\n."), k1(5));
        assert_eq!(fails(b"\x80\x02h\x09."), ErrorKind::MemoMiss(9));
        assert_eq!(fails(b"\x80\x02q\x00."), ErrorKind::StackEmpty);
        assert!(matches!(fails(b"\x80\x00g-1\n."), ErrorKind::MalformedNumber(_)));
    }

    #[test]
    fn test_memoize_uses_next_index() {
        assert_eq!(
            ok(b"\x80\x04K\x01\x94K\x02\x94\x30\x30h\x01."),
            k1(2)
        );
    }

    #[test]
    fn test_memo_shares_instance() {
        // MARK, EMPTY_LIST, BINPUT 0, BINGET 0, BININT1 1, APPEND, TUPLE
        let value = ok(b"\x80\x02(]q\x00h\x00K\x01at.");
        let items = value.as_tuple().unwrap();
        assert!(items[0].same_instance(&items[1]));
        assert_eq!(items[0].as_list().unwrap().borrow().len(), 1);
        assert_eq!(items[0], Value::list(vec![k1(1)]));
    }

    #[test]
    fn test_append() {
        assert_eq!(ok(b"\x80\x02]K\x01a."), Value::list(vec![k1(1)]));
        assert_eq!(fails(b"\x80\x02K\x01a."), ErrorKind::StackUnderflow);
        assert_eq!(
            fails(b"\x80\x02}K\x01a."),
            ErrorKind::TypeMismatch {
                expected: "List",
                found: "Dict"
            }
        );
    }

    #[test]
    fn test_appends_preserves_order() {
        assert_eq!(
            ok(b"\x80\x02](K\x01K\x02K\x03e."),
            Value::list(vec![k1(1), k1(2), k1(3)])
        );
        assert_eq!(ok(b"\x80\x02](e."), Value::list(vec![]));
    }

    #[test]
    fn test_appends_requires_list_under_mark() {
        assert!(matches!(
            fails(b"\x80\x02)(K\x01e."),
            ErrorKind::TypeMismatch { found: "Tuple", .. }
        ));
    }

    #[test]
    fn test_collecting_opcodes_without_mark() {
        for op in [b'e', b'u', b't', b'l', b'd', b'1'] {
            let data = [0x80, 0x02, b']', b'K', 1, b'K', 2, op, b'.'];
            assert_eq!(fails(&data), ErrorKind::MissingMark, "opcode {op}");
        }
    }

    #[test]
    fn test_setitem() {
        assert_eq!(
            ok(b"\x80\x02}K\x01K\x02s."),
            Value::dict(vec![(k1(1), k1(2))])
        );
        // existing key is overwritten
        assert_eq!(
            ok(b"\x80\x02}\x8c\x01aK\x01s\x8c\x01aK\x02s."),
            Value::dict(vec![(Value::text("a"), k1(2))])
        );
        assert_eq!(fails(b"\x80\x02K\x01K\x02s."), ErrorKind::StackUnderflow);
        assert!(matches!(
            fails(b"\x80\x02]K\x01K\x02s."),
            ErrorKind::TypeMismatch { expected: "Dict", .. }
        ));
    }

    #[test]
    fn test_setitem_int_keys_by_width() {
        let value = ok(b"\x80\x02}K\x01NsM\x01\x00NsK\x01\x88s.");
        let dict = value.as_dict().unwrap().borrow();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(&k1(1)), Some(&Value::bool(true)));
    }

    #[test]
    fn test_many_setitem_int_keys() {
        let mut data = b"\x80\x02}".to_vec();
        for i in 0..30_000u16 {
            data.push(b'M');
            data.extend_from_slice(&i.to_le_bytes());
            data.extend_from_slice(b"Ns");
        }
        data.push(b'.');
        let value = ok(&data);
        let dict = value.as_dict().unwrap().borrow();
        assert_eq!(dict.len(), 30_000);
        assert_eq!(dict.get(&Value::int(IntWidth::Two, 29_999)), Some(&Value::None));
    }

    fn setitems_stream(n: usize) -> Vec<u8> {
        let mut data = b"\x80\x02}(".to_vec();
        for i in 0..n {
            if i % 2 == 0 {
                data.extend_from_slice(&[0x8c, 1, b'a' + i as u8]);
            } else {
                data.extend_from_slice(&[b'K', i as u8]);
            }
        }
        data.extend_from_slice(b"u.");
        data
    }

    #[test]
    fn test_setitems_item_count_parity() {
        for n in [1, 3, 5] {
            assert_eq!(
                fails(&setitems_stream(n)),
                ErrorKind::OddItemCount(n),
                "n = {n}"
            );
        }
        for n in [0, 2, 4] {
            let value = ok(&setitems_stream(n));
            assert_eq!(value.as_dict().unwrap().borrow().len(), n / 2, "n = {n}");
        }
    }

    #[test]
    fn test_setitems_pairs_keys_with_values() {
        let value = ok(&setitems_stream(4));
        assert_eq!(value.get_str("a"), Some(k1(1)));
        assert_eq!(value.get_str("c"), Some(k1(3)));
    }

    #[test]
    fn test_setitems_requires_text_keys_and_dict() {
        assert!(matches!(
            fails(b"\x80\x02}(K\x01K\x02u."),
            ErrorKind::TypeMismatch { expected: "Text", found: "Int" }
        ));
        assert!(matches!(
            fails(b"\x80\x02](\x8c\x01aK\x02u."),
            ErrorKind::TypeMismatch { expected: "Dict", found: "List" }
        ));
    }

    #[test]
    fn test_dict_and_list_from_mark() {
        assert_eq!(
            ok(b"\x80\x00(K\x01K\x02d."),
            Value::dict(vec![(k1(1), k1(2))])
        );
        assert_eq!(ok(b"\x80\x00(K\x01K\x02l."), Value::list(vec![k1(1), k1(2)]));
        assert_eq!(fails(b"\x80\x00(K\x01d."), ErrorKind::OddItemCount(1));
    }

    #[test]
    fn test_tuples() {
        assert_eq!(ok(b"\x80\x02)."), Value::tuple(vec![]));
        assert_eq!(ok(b"\x80\x02(K\x01K\x02t."), Value::tuple(vec![k1(1), k1(2)]));
        assert_eq!(ok(b"\x80\x02K\x01\x85."), Value::tuple(vec![k1(1)]));
        assert_eq!(
            ok(b"\x80\x02K\x01K\x02\x86."),
            Value::tuple(vec![k1(1), k1(2)])
        );
        assert_eq!(
            ok(b"\x80\x02K\x01K\x02K\x03\x87."),
            Value::tuple(vec![k1(1), k1(2), k1(3)])
        );
        assert_eq!(fails(b"\x80\x02K\x01\x86."), ErrorKind::StackUnderflow);
        assert_eq!(fails(b"\x80\x02(K\x01\x86."), ErrorKind::StackUnderflow);
    }

    #[test]
    fn test_nested_marks() {
        assert_eq!(
            ok(b"\x80\x02(K\x01(K\x02tt."),
            Value::tuple(vec![k1(1), Value::tuple(vec![k1(2)])])
        );
    }

    #[test]
    fn test_dup_pop_and_pop_mark() {
        let value = ok(b"\x80\x02]2\x86.");
        let items = value.as_tuple().unwrap();
        assert!(items[0].same_instance(&items[1]));
        assert_eq!(fails(b"\x80\x022."), ErrorKind::StackEmpty);

        assert_eq!(ok(b"\x80\x02K\x01K\x020."), k1(1));
        assert_eq!(ok(b"\x80\x02K\x01(K\x02K\x031."), k1(1));
        assert_eq!(fails(b"\x80\x020."), ErrorKind::StackEmpty);
    }

    #[test]
    fn test_build_merges_dicts() {
        let value = ok(b"\x80\x02}\x8c\x01aK\x01s}\x8c\x01bK\x02sb.");
        assert_eq!(
            value,
            Value::dict(vec![
                (Value::text("a"), k1(1)),
                (Value::text("b"), k1(2))
            ])
        );
    }

    #[test]
    fn test_build_on_non_dict_is_reported() {
        let (value, report) = decode(b"\x80\x02cmod\nCls\n}b.").unwrap();
        assert_eq!(value, Value::global("mod", "Cls"));
        assert_eq!(report.warnings, vec![Warning::BuildIgnored { offset: 12 }]);
        assert_eq!(fails(b"\x80\x02}b."), ErrorKind::StackUnderflow);
    }

    #[test]
    fn test_build_with_self_state() {
        let value = ok(b"\x80\x02}\x8c\x01aK\x01s2b.");
        assert_eq!(value, Value::dict(vec![(Value::text("a"), k1(1))]));
    }

    #[test]
    fn test_reduce_is_noop() {
        let (value, report) = decode(b"\x80\x02cos\nsystem\n\x8c\x02ls\x85R.").unwrap();
        assert_eq!(value, Value::tuple(vec![Value::text("ls")]));
        assert!(report
            .warnings
            .contains(&Warning::ReduceIgnored { offset: 18 }));
        assert!(report.warnings.contains(&Warning::StackResidue { depth: 2 }));
    }

    #[test]
    fn test_proto_mismatch_warns() {
        let (_, report) = decode(b"\x80\x02\x80\x03N.").unwrap();
        assert_eq!(
            report.warnings,
            vec![Warning::ProtocolMismatch {
                header: 2,
                declared: 3
            }]
        );
        let (_, report) = decode(b"\x80\x02\x80\x02N.").unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_frame_is_transparent() {
        assert_eq!(
            ok(b"\x80\x04\x95\x03\x00\x00\x00\x00\x00\x00\x00K\x01."),
            k1(1)
        );
    }

    #[test]
    fn test_persid() {
        let mut blobs = MapResolver::new();
        blobs.insert("0", vec![9u8, 8, 7]);
        let (value, _) = decode_with(b"\x80\x02P0\n.", &blobs).unwrap();
        assert_eq!(value.as_bytes(), Some(&[9u8, 8, 7][..]));
        match &value {
            Value::PersistentRef { id, .. } => assert_eq!(id, "0"),
            other => panic!("expected persistent ref, got {other:?}"),
        }
        let err = decode_with(b"\x80\x02P1\n.", &blobs).unwrap_err();
        assert_eq!(
            err.kind(),
            Some(&ErrorKind::PersistentIdNotFound("1".to_string()))
        );
        assert_eq!(err.offset(), Some(2));
    }

    #[test]
    fn test_binpersid_replaces_tuple() {
        let mut blobs = MapResolver::new();
        blobs.insert("k7", vec![1u8, 2]);
        // ('storage', None, 'k7', 'cpu', 2) BINPERSID inside a list
        let data = b"\x80\x02](\x8c\x07storageN\x8c\x02k7\x8c\x03cpuK\x02tQa.";
        let (value, report) = decode_with(data, &blobs).unwrap();
        assert!(report.is_clean());
        let list = value.as_list().unwrap().borrow();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].as_bytes(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_binpersid_shape_errors() {
        let blobs = MapResolver::new();
        let kind = |data: &[u8]| {
            decode_with(data, &blobs)
                .unwrap_err()
                .kind()
                .cloned()
                .unwrap()
        };
        assert!(matches!(
            kind(b"\x80\x02\x8c\x01xQ."),
            ErrorKind::TypeMismatch { found: "Text", .. }
        ));
        assert!(matches!(
            kind(b"\x80\x02NNK\x01\x87Q."),
            ErrorKind::TypeMismatch { found: "Int", .. }
        ));
        assert!(matches!(
            kind(b"\x80\x02NN\x86Q."),
            ErrorKind::TypeMismatch { found: "Tuple", .. }
        ));
        assert_eq!(kind(b"\x80\x02Q."), ErrorKind::StackEmpty);
        assert_eq!(
            kind(b"\x80\x02NN\x8c\x01z\x87Q."),
            ErrorKind::PersistentIdNotFound("z".to_string())
        );
    }
}
