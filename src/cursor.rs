use crate::error::ErrorKind;

/// A little-endian signed integer decoded from a length-prefixed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarInt {
    pub value: i64,
    /// The run was wider than 64 bits; `value` holds only the low 8 bytes.
    pub overflowed: bool,
}

/// Bounds-checked sequential reader over an immutable buffer.
///
/// Every read either advances the position by exactly the bytes it
/// consumed or fails without moving it, so the position at failure is
/// the precise error offset.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Start reading at `pos` (clamped to the buffer length).
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos: pos.min(data.len()),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Move back to an earlier position, undoing reads whose result was
    /// rejected by the caller.
    pub fn rewind_to(&mut self, pos: usize) {
        self.pos = pos.min(self.pos);
    }

    /// Up to `n` bytes from the current position, without consuming them.
    pub fn peek_ahead(&self, n: usize) -> &'a [u8] {
        let end = self.pos.saturating_add(n).min(self.data.len());
        &self.data[self.pos..end]
    }

    /// Consume `n` bytes. `n` may come from an untrusted length field; it
    /// is checked against the remaining length before anything is sliced.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ErrorKind> {
        let available = self.remaining();
        if n > available {
            return Err(ErrorKind::Truncated {
                wanted: n,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Like `read_bytes`, for lengths decoded from 8-byte fields.
    pub fn read_bytes_u64(&mut self, n: u64) -> Result<&'a [u8], ErrorKind> {
        match usize::try_from(n) {
            Ok(n) => self.read_bytes(n),
            Err(_) => Err(ErrorKind::Truncated {
                wanted: usize::MAX,
                available: self.remaining(),
            }),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ErrorKind> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ErrorKind> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, ErrorKind> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, ErrorKind> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, ErrorKind> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64_be(&mut self) -> Result<f64, ErrorKind> {
        Ok(f64::from_be_bytes(self.read_array()?))
    }

    /// Bytes up to (not including) the next `\n`; the newline is consumed.
    pub fn read_line(&mut self) -> Result<&'a [u8], ErrorKind> {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(len) => {
                self.pos += len + 1;
                Ok(&rest[..len])
            }
            None => Err(ErrorKind::Truncated {
                wanted: rest.len() + 1,
                available: rest.len(),
            }),
        }
    }

    /// Newline-terminated token as UTF-8 text.
    pub fn read_until_newline(&mut self) -> Result<&'a str, ErrorKind> {
        let start = self.pos;
        let line = self.read_line()?;
        match std::str::from_utf8(line) {
            Ok(s) => Ok(s),
            Err(_) => {
                self.pos = start;
                Err(ErrorKind::InvalidUtf8)
            }
        }
    }

    /// Interpret the next `n` bytes as a little-endian two's-complement
    /// integer. Runs wider than 8 bytes keep only their low 8 bytes and are
    /// flagged as overflowed; the sign then comes from byte 7.
    pub fn read_signed_variable_length(&mut self, n: usize) -> Result<VarInt, ErrorKind> {
        let bytes = self.read_bytes(n)?;
        Ok(signed_le(bytes))
    }
}

fn signed_le(bytes: &[u8]) -> VarInt {
    if bytes.is_empty() {
        return VarInt {
            value: 0,
            overflowed: false,
        };
    }
    let width = bytes.len().min(8);
    let negative = bytes[width - 1] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[..width].copy_from_slice(&bytes[..width]);
    VarInt {
        value: i64::from_le_bytes(buf),
        overflowed: bytes.len() > 8,
    }
}
