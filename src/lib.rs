//! Decoder for pickle serialization streams.
//!
//! A stream is a sequence of one-byte opcodes, each followed by its own
//! arguments, executed against an operand stack and a memo table. The
//! decoder never imports or calls anything: global references stay inert
//! (module, name) pairs and REDUCE/BUILD do not construct objects.
//! Persistent ids are handed to a caller-supplied [`Resolver`].
//!
//! ```no_run
//! use pickle_stream::{decode_with, DirectoryResolver};
//!
//! let data = std::fs::read("archive/data.pkl")?;
//! let blobs = DirectoryResolver::new("archive/data");
//! let (value, report) = decode_with(&data, &blobs)?;
//! for line in report.summary() {
//!     eprintln!("{line}");
//! }
//! println!("{}", pickle_stream::to_json(&value)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod cursor;
mod decode;
mod encode;
mod error;
mod handlers;
mod json;
mod memo;
pub mod opcodes;
mod options;
mod registry;
mod report;
mod resolver;
mod types;

pub use crate::cursor::{Cursor, VarInt};
pub use crate::decode::{decode, decode_with, Decoder, Machine};
pub use crate::encode::encode;
pub use crate::error::{DecodeError, EncodeError, Error, ErrorKind, RegistryError, RenderError};
pub use crate::json::to_json;
pub use crate::memo::Memo;
pub use crate::options::DecodeOptions;
pub use crate::registry::{Entry, Handler, OpcodeRegistry};
pub use crate::report::{DecodeReport, SkippedOpcode, Warning};
pub use crate::resolver::{DirectoryResolver, MapResolver, NoResolver, ResolveError, Resolver};
pub use crate::types::{dict_set, Dict, DictRef, IntWidth, ListRef, Origin, TupleRef, Value, MAX_DEPTH};
