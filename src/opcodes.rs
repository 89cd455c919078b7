//! Pickle opcodes understood by the decoder.
//!
//! Values follow Python's pickletools.py. Grouped by the protocol that
//! introduced them; which ones are actually dispatched is decided by the
//! registry for the stream's header version.

// -- Protocol 0/1 (text-based, legacy) --
pub const MARK: u8 = b'('; // push special markobject on stack
pub const STOP: u8 = b'.'; // every pickle ends with STOP
pub const POP: u8 = b'0'; // discard topmost stack item
pub const POP_MARK: u8 = b'1'; // discard stack top through topmost markobject
pub const DUP: u8 = b'2'; // duplicate top stack item
pub const FLOAT: u8 = b'F'; // push float; decimal string argument
pub const INT: u8 = b'I'; // push integer or bool
pub const LONG: u8 = b'L'; // push long; decimal string argument
pub const NONE: u8 = b'N'; // push None
pub const REDUCE: u8 = b'R'; // apply callable to argtuple (never executed here)
pub const UNICODE: u8 = b'V'; // push Unicode string; NL-terminated UTF-8
pub const APPEND: u8 = b'a'; // append stack top to list below it
pub const BUILD: u8 = b'b'; // merge state into object below it
pub const GLOBAL: u8 = b'c'; // push module\nname\n reference
pub const DICT: u8 = b'd'; // build a dict from stack items
pub const EMPTY_DICT: u8 = b'}'; // push empty dict
pub const APPENDS: u8 = b'e'; // extend list on stack by topmost slice
pub const GET: u8 = b'g'; // push item from memo by string index
pub const LIST: u8 = b'l'; // build list from topmost stack slice
pub const EMPTY_LIST: u8 = b']'; // push empty list
pub const PUT: u8 = b'p'; // store stack top in memo by string index
pub const SETITEM: u8 = b's'; // add key+value pair to dict
pub const TUPLE: u8 = b't'; // build tuple from topmost stack slice
pub const EMPTY_TUPLE: u8 = b')'; // push empty tuple
pub const SETITEMS: u8 = b'u'; // modify dict by adding topmost key+value pairs
pub const PERSID: u8 = b'P'; // push persistent object; NL-terminated id

// -- Protocol 1 (binary) --
pub const BININT: u8 = b'J'; // push 4-byte int
pub const BININT1: u8 = b'K'; // push 1-byte unsigned int
pub const BININT2: u8 = b'M'; // push 2-byte unsigned int
pub const BINSTRING: u8 = b'T'; // push bytes; 4-byte counted
pub const SHORT_BINSTRING: u8 = b'U'; // push bytes; 1-byte counted
pub const BINUNICODE: u8 = b'X'; // push Unicode string; 4-byte counted UTF-8
pub const BINGET: u8 = b'h'; // push item from memo by 1-byte index
pub const LONG_BINGET: u8 = b'j'; // push item from memo by 4-byte index
pub const BINPUT: u8 = b'q'; // store stack top in memo by 1-byte index
pub const LONG_BINPUT: u8 = b'r'; // store stack top in memo by 4-byte index
pub const BINFLOAT: u8 = b'G'; // push float; binary 8-byte IEEE
pub const BINBYTES: u8 = b'B'; // push bytes; 4-byte counted
pub const SHORT_BINBYTES: u8 = b'C'; // push bytes; 1-byte counted
pub const BINPERSID: u8 = b'Q'; // push persistent object; id from stack

// -- Protocol 2 --
pub const PROTO: u8 = 0x80; // identify pickle protocol
pub const TUPLE1: u8 = 0x85; // build 1-tuple from top of stack
pub const TUPLE2: u8 = 0x86; // build 2-tuple from top two stack items
pub const TUPLE3: u8 = 0x87; // build 3-tuple from top three stack items
pub const NEWTRUE: u8 = 0x88; // push True
pub const NEWFALSE: u8 = 0x89; // push False
pub const LONG1: u8 = 0x8a; // push long from < 256 bytes
pub const LONG4: u8 = 0x8b; // push really big long

// -- Protocol 4 --
pub const SHORT_BINUNICODE: u8 = 0x8c; // 1-byte length unicode
pub const BINUNICODE8: u8 = 0x8d; // 8-byte length unicode
pub const BINBYTES8: u8 = 0x8e; // 8-byte length bytes
pub const STACK_GLOBAL: u8 = 0x93; // like GLOBAL but takes args from stack
pub const MEMOIZE: u8 = 0x94; // store top in memo (auto-incrementing key)
pub const FRAME: u8 = 0x95; // framing for protocol 4+

/// Marker byte every stream starts with (the PROTO opcode).
pub const HEADER_MARKER: u8 = PROTO;

/// Human-readable opcode name, used in reports and trace output.
pub fn name(op: u8) -> &'static str {
    match op {
        MARK => "MARK",
        STOP => "STOP",
        POP => "POP",
        POP_MARK => "POP_MARK",
        DUP => "DUP",
        FLOAT => "FLOAT",
        INT => "INT",
        LONG => "LONG",
        NONE => "NONE",
        REDUCE => "REDUCE",
        UNICODE => "UNICODE",
        APPEND => "APPEND",
        BUILD => "BUILD",
        GLOBAL => "GLOBAL",
        DICT => "DICT",
        EMPTY_DICT => "EMPTY_DICT",
        APPENDS => "APPENDS",
        GET => "GET",
        LIST => "LIST",
        EMPTY_LIST => "EMPTY_LIST",
        PUT => "PUT",
        SETITEM => "SETITEM",
        TUPLE => "TUPLE",
        EMPTY_TUPLE => "EMPTY_TUPLE",
        SETITEMS => "SETITEMS",
        PERSID => "PERSID",
        BININT => "BININT",
        BININT1 => "BININT1",
        BININT2 => "BININT2",
        BINSTRING => "BINSTRING",
        SHORT_BINSTRING => "SHORT_BINSTRING",
        BINUNICODE => "BINUNICODE",
        BINGET => "BINGET",
        LONG_BINGET => "LONG_BINGET",
        BINPUT => "BINPUT",
        LONG_BINPUT => "LONG_BINPUT",
        BINFLOAT => "BINFLOAT",
        BINBYTES => "BINBYTES",
        SHORT_BINBYTES => "SHORT_BINBYTES",
        BINPERSID => "BINPERSID",
        PROTO => "PROTO",
        TUPLE1 => "TUPLE1",
        TUPLE2 => "TUPLE2",
        TUPLE3 => "TUPLE3",
        NEWTRUE => "NEWTRUE",
        NEWFALSE => "NEWFALSE",
        LONG1 => "LONG1",
        LONG4 => "LONG4",
        SHORT_BINUNICODE => "SHORT_BINUNICODE",
        BINUNICODE8 => "BINUNICODE8",
        BINBYTES8 => "BINBYTES8",
        STACK_GLOBAL => "STACK_GLOBAL",
        MEMOIZE => "MEMOIZE",
        FRAME => "FRAME",
        _ => "UNKNOWN",
    }
}
