//! Reference encoder.
//!
//! Writes a `Value` graph back out as a protocol 2 stream that the decoder
//! reads to an equal graph. Containers are memoized on first sight, so a
//! container reached twice is written once and fetched from the memo
//! afterwards; that is what keeps shared and cyclic graphs intact.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::EncodeError;
use crate::opcodes::*;
use crate::types::{IntWidth, Origin, Value, MAX_DEPTH};

/// Encode `val` as a complete stream (header, body, STOP).
pub fn encode(val: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.write_u8(PROTO);
    encoder.write_u8(2);
    encoder.encode_value(val, 0)?;
    encoder.write_u8(STOP);
    Ok(encoder.buf)
}

struct Encoder {
    buf: Vec<u8>,
    /// Container address → memo index.
    memo: HashMap<*const (), u32>,
}

impl Encoder {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            memo: HashMap::new(),
        }
    }

    fn write_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn write_line(&mut self, field: &'static str, s: &str) -> Result<(), EncodeError> {
        if s.contains('\n') {
            return Err(EncodeError::Newline(field));
        }
        self.write_bytes(s.as_bytes());
        self.write_u8(b'\n');
        Ok(())
    }

    fn write_len_u32(&mut self, what: &'static str, n: usize) -> Result<(), EncodeError> {
        let n = u32::try_from(n).map_err(|_| EncodeError::TooLarge(what))?;
        self.write_bytes(&n.to_le_bytes());
        Ok(())
    }

    fn put(&mut self, key: *const ()) -> Result<(), EncodeError> {
        let index = u32::try_from(self.memo.len()).map_err(|_| EncodeError::TooLarge("memo"))?;
        self.memo.insert(key, index);
        if index < 256 {
            self.write_u8(BINPUT);
            self.write_u8(index as u8);
        } else {
            self.write_u8(LONG_BINPUT);
            self.write_bytes(&index.to_le_bytes());
        }
        Ok(())
    }

    /// Emit a memo fetch if `key` was already written.
    fn get(&mut self, key: *const ()) -> bool {
        let Some(&index) = self.memo.get(&key) else {
            return false;
        };
        if index < 256 {
            self.write_u8(BINGET);
            self.write_u8(index as u8);
        } else {
            self.write_u8(LONG_BINGET);
            self.write_bytes(&index.to_le_bytes());
        }
        true
    }

    fn encode_value(&mut self, val: &Value, depth: usize) -> Result<(), EncodeError> {
        if depth > MAX_DEPTH {
            return Err(EncodeError::TooDeep(MAX_DEPTH));
        }
        match val {
            Value::None => self.write_u8(NONE),
            Value::Int { width, value } => self.encode_int(*width, *value)?,
            Value::Long { value, overflowed } => self.encode_long(*value, *overflowed),
            Value::Float(f) => {
                self.write_u8(BINFLOAT);
                self.write_bytes(&f.to_be_bytes());
            }
            Value::Text { value, origin } => self.encode_text(value, *origin)?,
            Value::Bytes { data, origin } => self.encode_bytes(data, *origin)?,
            Value::Global { module, name } => {
                self.write_u8(GLOBAL);
                self.write_line("module", module)?;
                self.write_line("name", name)?;
            }
            Value::PersistentRef { id, .. } => {
                self.write_u8(PERSID);
                self.write_line("persistent id", id)?;
            }
            Value::List(items) => {
                let key = Rc::as_ptr(items) as *const ();
                if self.get(key) {
                    return Ok(());
                }
                self.write_u8(EMPTY_LIST);
                self.put(key)?;
                let items = items.borrow();
                if !items.is_empty() {
                    self.write_u8(MARK);
                    for item in items.iter() {
                        self.encode_value(item, depth + 1)?;
                    }
                    self.write_u8(APPENDS);
                }
            }
            Value::Dict(pairs) => {
                let key = Rc::as_ptr(pairs) as *const ();
                if self.get(key) {
                    return Ok(());
                }
                self.write_u8(EMPTY_DICT);
                self.put(key)?;
                let pairs = pairs.borrow();
                if pairs.is_empty() {
                    return Ok(());
                }
                // SETITEMS only takes text keys; anything else goes in
                // one pair at a time.
                if pairs.iter().all(|(k, _)| k.as_text().is_some()) {
                    self.write_u8(MARK);
                    for (k, v) in pairs.iter() {
                        self.encode_value(k, depth + 1)?;
                        self.encode_value(v, depth + 1)?;
                    }
                    self.write_u8(SETITEMS);
                } else {
                    for (k, v) in pairs.iter() {
                        self.encode_value(k, depth + 1)?;
                        self.encode_value(v, depth + 1)?;
                        self.write_u8(SETITEM);
                    }
                }
            }
            Value::Tuple(items) => self.encode_tuple(items, depth)?,
            Value::Mark => return Err(EncodeError::Mark),
        }
        Ok(())
    }

    fn encode_int(&mut self, width: IntWidth, value: u32) -> Result<(), EncodeError> {
        match width {
            IntWidth::One => {
                let v = u8::try_from(value).map_err(|_| EncodeError::TooLarge("Int"))?;
                self.write_u8(BININT1);
                self.write_u8(v);
            }
            IntWidth::Two => {
                let v = u16::try_from(value).map_err(|_| EncodeError::TooLarge("Int"))?;
                self.write_u8(BININT2);
                self.write_bytes(&v.to_le_bytes());
            }
            IntWidth::Four => {
                self.write_u8(BININT);
                self.write_bytes(&value.to_le_bytes());
            }
        }
        Ok(())
    }

    fn encode_long(&mut self, value: i64, overflowed: bool) {
        self.write_u8(LONG1);
        if overflowed {
            // A ninth, sign-extending byte makes the decoder flag the value
            // again.
            let sign = if value < 0 { 0xff } else { 0x00 };
            self.write_u8(9);
            self.write_bytes(&value.to_le_bytes());
            self.write_u8(sign);
        } else {
            let bytes = num_bigint::BigInt::from(value).to_signed_bytes_le();
            self.write_u8(bytes.len() as u8);
            self.write_bytes(&bytes);
        }
    }

    fn encode_text(&mut self, s: &str, origin: Origin) -> Result<(), EncodeError> {
        let bytes = s.as_bytes();
        let n = bytes.len();
        match origin {
            Origin::Short if n < 256 => {
                self.write_u8(SHORT_BINUNICODE);
                self.write_u8(n as u8);
            }
            Origin::Wide => {
                self.write_u8(BINUNICODE8);
                self.write_bytes(&(n as u64).to_le_bytes());
            }
            Origin::Line if !s.contains('\n') => {
                self.write_u8(UNICODE);
                self.write_bytes(bytes);
                self.write_u8(b'\n');
                return Ok(());
            }
            _ => {
                self.write_u8(BINUNICODE);
                self.write_len_u32("Text", n)?;
            }
        }
        self.write_bytes(bytes);
        Ok(())
    }

    fn encode_bytes(&mut self, data: &[u8], origin: Origin) -> Result<(), EncodeError> {
        let n = data.len();
        match origin {
            Origin::Short if n < 256 => {
                self.write_u8(SHORT_BINBYTES);
                self.write_u8(n as u8);
            }
            Origin::Wide => {
                self.write_u8(BINBYTES8);
                self.write_bytes(&(n as u64).to_le_bytes());
            }
            _ => {
                self.write_u8(BINBYTES);
                self.write_len_u32("Bytes", n)?;
            }
        }
        self.write_bytes(data);
        Ok(())
    }

    fn encode_tuple(&mut self, items: &Rc<[Value]>, depth: usize) -> Result<(), EncodeError> {
        let key = Rc::as_ptr(items) as *const Value as *const ();
        if self.get(key) {
            return Ok(());
        }
        let n = items.len();
        if n == 0 {
            self.write_u8(EMPTY_TUPLE);
            return self.put(key);
        }
        if n > 3 {
            self.write_u8(MARK);
        }
        for item in items.iter() {
            self.encode_value(item, depth + 1)?;
        }
        // A tuple reachable from its own items was already written while
        // encoding them; drop the partial copy and fetch that one.
        if self.memo.contains_key(&key) {
            if n > 3 {
                self.write_u8(POP_MARK);
            } else {
                for _ in 0..n {
                    self.write_u8(POP);
                }
            }
            self.get(key);
            return Ok(());
        }
        match n {
            1 => self.write_u8(TUPLE1),
            2 => self.write_u8(TUPLE2),
            3 => self.write_u8(TUPLE3),
            _ => self.write_u8(TUPLE),
        }
        self.put(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, decode_with};
    use crate::resolver::MapResolver;

    fn roundtrip(val: &Value) -> Value {
        let bytes = encode(val).unwrap();
        let (decoded, report) = decode(&bytes).unwrap();
        assert!(report.is_clean(), "{:?}", report.summary());
        decoded
    }

    #[test]
    fn test_header_and_stop() {
        let bytes = encode(&Value::None).unwrap();
        assert_eq!(bytes, b"\x80\x02N.");
    }

    #[test]
    fn test_roundtrip_scalars() {
        let cases = [
            Value::None,
            Value::bool(true),
            Value::bool(false),
            Value::int(IntWidth::One, 255),
            Value::int(IntWidth::Two, 65535),
            Value::int(IntWidth::Four, u32::MAX),
            Value::long(0),
            Value::long(-1),
            Value::long(1000),
            Value::long(i64::MIN),
            Value::long(i64::MAX),
            Value::Float(3.25),
            Value::Float(-0.5),
            Value::global("collections", "OrderedDict"),
        ];
        for val in cases {
            assert_eq!(roundtrip(&val), val);
        }
    }

    #[test]
    fn test_int_keeps_declared_width() {
        let bytes = encode(&Value::int(IntWidth::Two, 5)).unwrap();
        assert_eq!(bytes, b"\x80\x02M\x05\x00.");
        assert_eq!(
            encode(&Value::int(IntWidth::One, 300)),
            Err(EncodeError::TooLarge("Int"))
        );
    }

    #[test]
    fn test_roundtrip_overflowed_long() {
        for value in [5i64, -5] {
            let val = Value::Long {
                value,
                overflowed: true,
            };
            let bytes = encode(&val).unwrap();
            let (decoded, report) = decode(&bytes).unwrap();
            assert_eq!(decoded, val);
            assert_eq!(report.warnings.len(), 1);
        }
    }

    #[test]
    fn test_roundtrip_text_origins() {
        let long_text = "x".repeat(300);
        for origin in [Origin::Short, Origin::Long, Origin::Wide, Origin::Line] {
            for s in ["", "héllo", long_text.as_str(), "two\nlines"] {
                let val = Value::Text {
                    value: s.to_string(),
                    origin,
                };
                assert_eq!(roundtrip(&val), val, "{origin:?} {s:?}");
            }
        }
    }

    #[test]
    fn test_text_origin_selects_opcode() {
        let val = Value::Text {
            value: "ab".to_string(),
            origin: Origin::Line,
        };
        assert_eq!(encode(&val).unwrap(), b"\x80\x02Vab\n.");
        let val = Value::Text {
            value: "ab".to_string(),
            origin: Origin::Wide,
        };
        let bytes = encode(&val).unwrap();
        assert_eq!(bytes[2], BINUNICODE8);
    }

    #[test]
    fn test_roundtrip_bytes_origins() {
        for origin in [Origin::Short, Origin::Long, Origin::Wide] {
            for data in [vec![], vec![0u8, 1, 255], vec![7u8; 400]] {
                let val = Value::Bytes {
                    data: data.clone(),
                    origin,
                };
                assert_eq!(roundtrip(&val), val);
            }
        }
    }

    #[test]
    fn test_roundtrip_containers() {
        let val = Value::dict(vec![(
            Value::text("items"),
            Value::list(vec![
                Value::tuple(vec![Value::long(1), Value::long(2)]),
                Value::dict(vec![]),
                Value::list(vec![]),
            ]),
        )]);
        assert_eq!(roundtrip(&val), val);
    }

    #[test]
    fn test_roundtrip_tuple_sizes() {
        for n in 0..=5 {
            let items: Vec<Value> = (0..n).map(Value::long).collect();
            let val = Value::tuple(items);
            assert_eq!(roundtrip(&val), val, "tuple size {n}");
        }
    }

    #[test]
    fn test_roundtrip_non_text_keys() {
        let val = Value::dict(vec![
            (Value::long(1), Value::text("one")),
            (Value::tuple(vec![]), Value::None),
        ]);
        let bytes = encode(&val).unwrap();
        assert!(!bytes.contains(&SETITEMS));
        assert_eq!(roundtrip(&val), val);
    }

    #[test]
    fn test_shared_container_written_once() {
        let shared = Value::list(vec![Value::long(1)]);
        let val = Value::tuple(vec![shared.clone(), shared]);
        let decoded = roundtrip(&val);
        let items = decoded.as_tuple().unwrap();
        assert!(items[0].same_instance(&items[1]));
        items[0].as_list().unwrap().borrow_mut().push(Value::None);
        assert_eq!(items[1].as_list().unwrap().borrow().len(), 2);
    }

    #[test]
    fn test_cyclic_list() {
        let l = Value::list(vec![]);
        l.as_list().unwrap().borrow_mut().push(l.clone());
        let bytes = encode(&l).unwrap();
        assert_eq!(bytes, b"\x80\x02]q\x00(h\x00e.");
        let (decoded, _) = decode(&bytes).unwrap();
        let inner = decoded.as_list().unwrap().borrow()[0].clone();
        assert!(inner.same_instance(&decoded));
    }

    #[test]
    fn test_tuple_reached_through_its_own_items() {
        let l = Value::list(vec![]);
        let t = Value::tuple(vec![l.clone()]);
        l.as_list().unwrap().borrow_mut().push(t.clone());

        let decoded = roundtrip(&t);
        let list = decoded.as_tuple().unwrap()[0].clone();
        let back = list.as_list().unwrap().borrow()[0].clone();
        assert!(back.same_instance(&decoded));
    }

    #[test]
    fn test_many_containers_use_wide_memo_indices() {
        let val = Value::list((0..300).map(|_| Value::dict(vec![])).collect());
        let bytes = encode(&val).unwrap();
        assert!(bytes.contains(&LONG_BINPUT));
        assert_eq!(roundtrip(&val), val);
    }

    #[test]
    fn test_persistent_ref_resolves_on_decode() {
        let val = Value::PersistentRef {
            id: "0".to_string(),
            payload: Rc::from(&b"blob"[..]),
        };
        let bytes = encode(&val).unwrap();
        assert_eq!(bytes, b"\x80\x02P0\n.");
        let mut blobs = MapResolver::new();
        blobs.insert("0", b"blob".to_vec());
        let (decoded, _) = decode_with(&bytes, &blobs).unwrap();
        assert_eq!(decoded, val);
    }

    #[test]
    fn test_unencodable_values() {
        assert_eq!(encode(&Value::Mark), Err(EncodeError::Mark));
        assert_eq!(
            encode(&Value::global("a\nb", "c")),
            Err(EncodeError::Newline("module"))
        );
        let val = Value::list(vec![Value::Mark]);
        assert_eq!(encode(&val), Err(EncodeError::Mark));
    }

    #[test]
    fn test_nesting_limit() {
        let mut val = Value::None;
        for _ in 0..MAX_DEPTH {
            val = Value::tuple(vec![val]);
        }
        assert_eq!(roundtrip(&val), val);
        let val = Value::list(vec![val]);
        assert_eq!(encode(&val), Err(EncodeError::TooDeep(MAX_DEPTH)));
    }
}
